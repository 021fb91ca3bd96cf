use std::convert::Infallible;

use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::identity::CurrentUser;
use crate::live::ResumeChanged;
use crate::models::resume::ResumeStatus;
use crate::models::user::UserProfile;
use crate::review::service::{ReviewService, Scope};
use crate::state::AppState;

type EventSender = mpsc::Sender<Result<Event, Infallible>>;
type EventStream = Sse<ReceiverStream<Result<Event, Infallible>>>;

const STREAM_BUFFER: usize = 16;

#[derive(Deserialize)]
pub struct DashboardQuery {
    pub scope: Option<Scope>,
    pub status: Option<ResumeStatus>,
}

fn json_event<T: Serialize>(name: &str, payload: &T) -> Event {
    match serde_json::to_string(payload) {
        Ok(json) => Event::default().event(name).data(json),
        Err(e) => Event::default().event("error").data(e.to_string()),
    }
}

/// Returns `false` once the client has gone away.
async fn emit(tx: &EventSender, event: Event) -> bool {
    tx.send(Ok(event)).await.is_ok()
}

fn stream(rx: mpsc::Receiver<Result<Event, Infallible>>) -> EventStream {
    Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::default())
}

/// GET /api/v1/resumes/:id/live
///
/// Sends a full `snapshot` on connect and after every change, `deleted` when
/// the resume goes away, and `error` if the caller loses access.
pub async fn handle_resume_live(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<EventStream, AppError> {
    // Subscribe before the first read so no write can slip in between.
    let changes = state.review.live().subscribe();
    let first = state.review.get(&user, id).await?;

    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    let review = state.review.clone();
    tokio::spawn(async move {
        if emit(&tx, json_event("snapshot", &first)).await {
            follow_resume(review, user, id, changes, tx).await;
        }
    });
    Ok(stream(rx))
}

async fn follow_resume(
    review: ReviewService,
    user: UserProfile,
    id: Uuid,
    mut changes: broadcast::Receiver<ResumeChanged>,
    tx: EventSender,
) {
    loop {
        match changes.recv().await {
            Ok(change) if change.resume_id != id => continue,
            Ok(change) if change.deleted => {
                emit(&tx, json_event("deleted", &serde_json::json!({ "id": id }))).await;
                return;
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("Live view of resume {id} skipped {skipped} change(s), resending");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }

        match review.get(&user, id).await {
            Ok(resume) => {
                if !emit(&tx, json_event("snapshot", &resume)).await {
                    return;
                }
            }
            Err(AppError::NotFound(_)) => {
                emit(&tx, json_event("deleted", &serde_json::json!({ "id": id }))).await;
                return;
            }
            Err(e) => {
                warn!("Ending live view of resume {id} for {}: {e}", user.id);
                let body = serde_json::json!({ "message": e.to_string() });
                emit(&tx, json_event("error", &body)).await;
                return;
            }
        }
    }
}

/// GET /api/v1/resumes/live?scope=mine|shared
///
/// Sends the whole dashboard list on connect and whenever a resume the caller
/// owns or can see changes.
pub async fn handle_dashboard_live(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(q): Query<DashboardQuery>,
) -> Result<EventStream, AppError> {
    let scope = q.scope.unwrap_or_else(|| Scope::default_for(user.role));
    let mut changes = state.review.live().subscribe();
    let first = state.review.list(&user, scope, q.status).await?;

    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    let review = state.review.clone();
    tokio::spawn(async move {
        if !emit(&tx, json_event("snapshot", &first)).await {
            return;
        }
        loop {
            match changes.recv().await {
                Ok(change) if !change.concerns(user.id) => continue,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return,
            }
            let event = match review.list(&user, scope, q.status).await {
                Ok(list) => json_event("snapshot", &list),
                Err(e) => {
                    warn!("Dashboard refresh for {} failed: {e}", user.id);
                    let body = serde_json::json!({ "message": e.to_string() });
                    emit(&tx, json_event("error", &body)).await;
                    return;
                }
            };
            if !emit(&tx, event).await {
                return;
            }
        }
    });
    Ok(stream(rx))
}
