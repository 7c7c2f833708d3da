use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use chrono::Utc;
use uuid::Uuid;

use crate::auth::middleware::AuthUser;
use crate::engine::calendar::add_days;
use crate::engine::ledger::validate_count;
use crate::error::{AppError, AppResult};
use crate::handlers::goals::find_goal;
use crate::models::checkin::{Checkin, CheckinQuery, CheckinRequest};
use crate::AppState;

/// Default window for listing when no range is given.
const DEFAULT_LIST_DAYS: i64 = 30;

pub async fn set_checkin(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(goal_id): Path<Uuid>,
    Json(body): Json<CheckinRequest>,
) -> AppResult<Json<Checkin>> {
    let goal = find_goal(&state, auth_user.id, goal_id).await?;

    let now = Utc::now().naive_utc();
    let date = body.validate_date(now.date()).map_err(AppError::Validation)?;
    let count = validate_count(&goal, body.count)?;
    state.resolver.check_open(&goal, date, now)?;

    let checkin = state.checkins.upsert_checkin(goal.id, date, count).await?;
    tracing::debug!(goal_id = %goal.id, date = %date, count, "Check-in recorded");

    Ok(Json(checkin))
}

pub async fn list_checkins(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(goal_id): Path<Uuid>,
    Query(query): Query<CheckinQuery>,
) -> AppResult<Json<Vec<Checkin>>> {
    let goal = find_goal(&state, auth_user.id, goal_id).await?;

    let end = query.end_date.unwrap_or_else(|| Utc::now().date_naive());
    let start = match query.start_date {
        Some(start) => start,
        None => add_days(end, -DEFAULT_LIST_DAYS)?,
    };
    if start > end {
        return Err(AppError::Validation(
            "start_date must not be after end_date".into(),
        ));
    }

    let checkins = state.checkins.list_checkins(goal.id, start, end).await?;
    Ok(Json(checkins))
}
