use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::identity::{CurrentUser, Session};
use crate::models::rename::RenameJob;
use crate::models::user::{Role, UserProfile};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    pub role: Role,
}

#[derive(Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct RenameRequest {
    pub name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// POST /api/v1/auth/sign-up
pub async fn handle_sign_up(
    State(state): State<AppState>,
    Json(req): Json<SignUpRequest>,
) -> Result<(StatusCode, Json<Session>), AppError> {
    let session = state
        .identity
        .sign_up(&req.email, &req.password, &req.name, req.role)
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// POST /api/v1/auth/sign-in
pub async fn handle_sign_in(
    State(state): State<AppState>,
    Json(req): Json<SignInRequest>,
) -> Result<Json<Session>, AppError> {
    Ok(Json(state.identity.sign_in(&req.email, &req.password).await?))
}

/// GET /api/v1/me
pub async fn handle_me(CurrentUser(user): CurrentUser) -> Json<UserProfile> {
    Json(user)
}

/// PATCH /api/v1/me/name
///
/// The profile changes immediately; copies of the name on resumes and comments
/// are rewritten by a background job whose progress is polled separately.
pub async fn handle_rename(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<RenameRequest>,
) -> Result<(StatusCode, Json<RenameJob>), AppError> {
    let job = state.rename.start(&user, &req.name).await?;
    state.rename.spawn(job.id);
    Ok((StatusCode::ACCEPTED, Json(job)))
}

/// GET /api/v1/me/rename-jobs/:id
pub async fn handle_get_rename_job(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<RenameJob>, AppError> {
    Ok(Json(state.rename.get(&user, id).await?))
}

/// POST /api/v1/me/rename-jobs/:id/retry
pub async fn handle_retry_rename_job(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<RenameJob>), AppError> {
    let job = state.rename.get(&user, id).await?;
    if job.finished_at.is_some() {
        return Ok((StatusCode::OK, Json(job)));
    }
    state.rename.spawn(job.id);
    Ok((StatusCode::ACCEPTED, Json(job)))
}

/// PUT /api/v1/me/password
pub async fn handle_change_password(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<StatusCode, AppError> {
    state
        .identity
        .change_password(&user, &req.current_password, &req.new_password)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/v1/me
pub async fn handle_delete_account(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<StatusCode, AppError> {
    state.identity.delete_account(&user, &state.review).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/reviewers
pub async fn handle_list_reviewers(
    State(state): State<AppState>,
    CurrentUser(_): CurrentUser,
) -> Result<Json<Vec<UserProfile>>, AppError> {
    Ok(Json(state.identity.reviewers().await?))
}
