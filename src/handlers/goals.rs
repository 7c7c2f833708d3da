use axum::{
    extract::{Path, State},
    Extension, Json,
};
use chrono::{NaiveDateTime, Utc};
use serde::Serialize;
use uuid::Uuid;
use validator::Validate;

use crate::auth::middleware::AuthUser;
use crate::engine::ledger::CheckinLedger;
use crate::engine::progress::{GoalBucket, ProgressStatus};
use crate::error::{AppError, AppResult};
use crate::models::goal::{CreateGoalRequest, Goal, GoalWithProgress, UpdateGoalRequest};
use crate::AppState;

#[derive(Debug, Default, Serialize)]
pub struct GoalOverview {
    pub upcoming: Vec<GoalWithProgress>,
    pub active: Vec<GoalWithProgress>,
    pub completed: Vec<GoalWithProgress>,
    pub missed: Vec<GoalWithProgress>,
    pub ended: Vec<GoalWithProgress>,
}

/// Check-ins covering everything `evaluate`/`classify` look at for `now`.
async fn load_ledger(state: &AppState, goal: &Goal, now: NaiveDateTime) -> AppResult<CheckinLedger> {
    let (start, end) = state.resolver.lookup_window(goal, now);
    let records = state.checkins.list_checkins(goal.id, start, end).await?;
    Ok(CheckinLedger::from_records(records))
}

async fn with_progress(state: &AppState, goal: Goal, now: NaiveDateTime) -> AppResult<GoalWithProgress> {
    let ledger = load_ledger(state, &goal, now).await?;
    let progress = state.resolver.evaluate(&goal, &ledger, now);
    let week_total = ledger.week_total(goal.id, now.date());
    Ok(GoalWithProgress {
        goal,
        progress,
        week_total,
    })
}

pub(crate) async fn find_goal(state: &AppState, user_id: Uuid, goal_id: Uuid) -> AppResult<Goal> {
    state
        .goals
        .get_goal(user_id, goal_id)
        .await?
        .ok_or(AppError::NotFound("Goal not found".into()))
}

pub async fn list_goals(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> AppResult<Json<Vec<GoalWithProgress>>> {
    let now = Utc::now().naive_utc();
    let goals = state.goals.list_goals_for_user(auth_user.id).await?;

    let mut result = Vec::with_capacity(goals.len());
    for goal in goals {
        result.push(with_progress(&state, goal, now).await?);
    }
    Ok(Json(result))
}

pub async fn get_goal(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(goal_id): Path<Uuid>,
) -> AppResult<Json<GoalWithProgress>> {
    let goal = find_goal(&state, auth_user.id, goal_id).await?;
    Ok(Json(with_progress(&state, goal, Utc::now().naive_utc()).await?))
}

pub async fn get_progress(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(goal_id): Path<Uuid>,
) -> AppResult<Json<ProgressStatus>> {
    let goal = find_goal(&state, auth_user.id, goal_id).await?;
    let now = Utc::now().naive_utc();
    let ledger = load_ledger(&state, &goal, now).await?;
    Ok(Json(state.resolver.evaluate(&goal, &ledger, now)))
}

pub async fn create_goal(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(body): Json<CreateGoalRequest>,
) -> AppResult<Json<Goal>> {
    body.validate()?;

    let today = Utc::now().date_naive();
    let goal = Goal::from_request(auth_user.id, body, today)?;
    state.goals.insert_goal(&goal).await?;

    tracing::info!(
        user_id = %auth_user.id,
        goal_id = %goal.id,
        kind = goal.recurrence.kind().as_str(),
        "Goal created"
    );
    Ok(Json(goal))
}

pub async fn update_goal(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(goal_id): Path<Uuid>,
    Json(body): Json<UpdateGoalRequest>,
) -> AppResult<Json<Goal>> {
    body.validate()?;

    let mut goal = find_goal(&state, auth_user.id, goal_id).await?;
    goal.apply_update(body)?;
    state.goals.update_goal(&goal).await?;

    Ok(Json(goal))
}

pub async fn delete_goal(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(goal_id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    if !state.goals.delete_goal(auth_user.id, goal_id).await? {
        return Err(AppError::NotFound("Goal not found".into()));
    }
    tracing::info!(user_id = %auth_user.id, goal_id = %goal_id, "Goal deleted");
    Ok(Json(serde_json::json!({ "deleted": true })))
}

pub async fn overview(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> AppResult<Json<GoalOverview>> {
    let now = Utc::now().naive_utc();
    let goals = state.goals.list_goals_for_user(auth_user.id).await?;

    let mut overview = GoalOverview::default();
    for goal in goals {
        let ledger = load_ledger(&state, &goal, now).await?;
        let bucket = state.resolver.classify(&goal, &ledger, now);
        let progress = state.resolver.evaluate(&goal, &ledger, now);
        let week_total = ledger.week_total(goal.id, now.date());
        let entry = GoalWithProgress {
            goal,
            progress,
            week_total,
        };
        match bucket {
            GoalBucket::Upcoming => overview.upcoming.push(entry),
            GoalBucket::Active => overview.active.push(entry),
            GoalBucket::Completed => overview.completed.push(entry),
            GoalBucket::Missed => overview.missed.push(entry),
            GoalBucket::Ended => overview.ended.push(entry),
        }
    }
    Ok(Json(overview))
}
