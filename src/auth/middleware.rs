use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::error::AppError;
use crate::AppState;

/// Set by the upstream gateway after it authenticates the caller.
pub const USER_ID_HEADER: &str = "x-user-id";
pub const SWEEP_TOKEN_HEADER: &str = "x-sweep-token";

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
}

pub async fn require_user(mut req: Request, next: Next) -> Result<Response, AppError> {
    let id = req
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
        .ok_or(AppError::Unauthorized)?;

    req.extensions_mut().insert(AuthUser { id });
    Ok(next.run(req).await)
}

/// Guards the manual sweep trigger when `SWEEP_TOKEN` is configured.
pub async fn require_sweep_token(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(expected) = state.config.sweep_token.as_deref() {
        let provided = req
            .headers()
            .get(SWEEP_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(AppError::Unauthorized)?;
        if provided != expected {
            tracing::warn!("Sweep trigger rejected: bad token");
            return Err(AppError::Forbidden);
        }
    }
    Ok(next.run(req).await)
}
