use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::identity::CurrentUser;
use crate::models::comment::{Comment, Reply};
use crate::models::resume::{Resume, ResumeStatus, ResumeSummary, ResumeVersion};
use crate::review::service::{Scope, UploadedFile};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ListQuery {
    pub scope: Option<Scope>,
    pub status: Option<ResumeStatus>,
}

#[derive(Deserialize)]
pub struct StatusRequest {
    pub status: ResumeStatus,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareRequest {
    pub reviewer_ids: Vec<Uuid>,
}

#[derive(Deserialize)]
pub struct CommentRequest {
    pub text: String,
    pub x: Option<f64>,
    pub y: Option<f64>,
}

#[derive(Deserialize)]
pub struct TextRequest {
    pub text: String,
}

#[derive(Deserialize)]
pub struct ResolvedRequest {
    pub resolved: bool,
}

/// Pulls the `file` part out of a multipart body; other parts are drained and ignored.
async fn read_file(mut multipart: Multipart) -> Result<UploadedFile, AppError> {
    let mut file = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Malformed multipart body: {e}")))?
    {
        if field.name() == Some("file") {
            let file_name = field
                .file_name()
                .map(str::to_string)
                .ok_or_else(|| AppError::Validation("file part has no file name".to_string()))?;
            let content_type = field.content_type().map(str::to_string);
            let bytes = field
                .bytes()
                .await
                .map_err(|e| AppError::Validation(format!("Could not read upload: {e}")))?;
            file = Some(UploadedFile {
                file_name,
                content_type,
                bytes,
            });
        } else {
            field
                .bytes()
                .await
                .map_err(|e| AppError::Validation(format!("Malformed multipart body: {e}")))?;
        }
    }
    file.ok_or_else(|| AppError::Validation("multipart body has no 'file' part".to_string()))
}

// ── Resumes ────────────────────────────────────────────────────────────────

/// GET /api/v1/resumes?scope=mine|shared&status=
pub async fn handle_list_resumes(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<ResumeSummary>>, AppError> {
    let scope = q.scope.unwrap_or_else(|| Scope::default_for(user.role));
    Ok(Json(state.review.list(&user, scope, q.status).await?))
}

/// POST /api/v1/resumes (multipart, field `file`)
pub async fn handle_upload_resume(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Resume>), AppError> {
    let file = read_file(multipart).await?;
    let resume = state.review.upload(&user, file).await?;
    Ok((StatusCode::CREATED, Json(resume)))
}

/// GET /api/v1/resumes/:id
pub async fn handle_get_resume(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Resume>, AppError> {
    Ok(Json(state.review.get(&user, id).await?))
}

/// DELETE /api/v1/resumes/:id
pub async fn handle_delete_resume(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.review.delete(&user, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/v1/resumes/:id/file (multipart, field `file`)
pub async fn handle_replace_file(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    multipart: Multipart,
) -> Result<Json<Resume>, AppError> {
    let file = read_file(multipart).await?;
    Ok(Json(state.review.replace_file(&user, id, file).await?))
}

/// GET /api/v1/resumes/:id/versions
pub async fn handle_list_versions(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ResumeVersion>>, AppError> {
    Ok(Json(state.review.versions(&user, id).await?))
}

/// PATCH /api/v1/resumes/:id/status
pub async fn handle_set_status(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(req): Json<StatusRequest>,
) -> Result<Json<Resume>, AppError> {
    Ok(Json(state.review.set_status(&user, id, req.status).await?))
}

// ── Sharing ────────────────────────────────────────────────────────────────

/// POST /api/v1/resumes/:id/share
pub async fn handle_share(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(req): Json<ShareRequest>,
) -> Result<Json<Resume>, AppError> {
    Ok(Json(state.review.grant(&user, id, &req.reviewer_ids).await?))
}

/// DELETE /api/v1/resumes/:id/share/:reviewer_id
pub async fn handle_revoke(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((id, reviewer_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Resume>, AppError> {
    Ok(Json(state.review.revoke(&user, id, reviewer_id).await?))
}

// ── Comments ───────────────────────────────────────────────────────────────

/// POST /api/v1/resumes/:id/comments
pub async fn handle_add_comment(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(req): Json<CommentRequest>,
) -> Result<(StatusCode, Json<Comment>), AppError> {
    let comment = state
        .review
        .add_comment(&user, id, &req.text, req.x, req.y)
        .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

/// PATCH /api/v1/resumes/:id/comments/:comment_id
pub async fn handle_edit_comment(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((id, comment_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<TextRequest>,
) -> Result<Json<Comment>, AppError> {
    Ok(Json(
        state
            .review
            .edit_comment(&user, id, comment_id, &req.text)
            .await?,
    ))
}

/// DELETE /api/v1/resumes/:id/comments/:comment_id
pub async fn handle_delete_comment(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((id, comment_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    state.review.delete_comment(&user, id, comment_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/resumes/:id/comments/:comment_id/replies
pub async fn handle_add_reply(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((id, comment_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<TextRequest>,
) -> Result<(StatusCode, Json<Reply>), AppError> {
    let reply = state
        .review
        .add_reply(&user, id, comment_id, &req.text)
        .await?;
    Ok((StatusCode::CREATED, Json(reply)))
}

/// PUT /api/v1/resumes/:id/comments/:comment_id/resolved
pub async fn handle_set_resolved(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((id, comment_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<ResolvedRequest>,
) -> Result<Json<Resume>, AppError> {
    Ok(Json(
        state
            .review
            .set_resolved(&user, id, comment_id, req.resolved)
            .await?,
    ))
}
