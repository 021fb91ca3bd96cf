pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, patch, post, put},
    Router,
};

use crate::identity::handlers as identity;
use crate::live::handlers as live;
use crate::review::handlers as review;
use crate::state::AppState;

/// Headroom on top of the file itself for multipart boundaries and headers.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes + MULTIPART_OVERHEAD;

    Router::new()
        .route("/health", get(health::health_handler))
        // Identity
        .route("/api/v1/auth/sign-up", post(identity::handle_sign_up))
        .route("/api/v1/auth/sign-in", post(identity::handle_sign_in))
        .route(
            "/api/v1/me",
            get(identity::handle_me).delete(identity::handle_delete_account),
        )
        .route("/api/v1/me/name", patch(identity::handle_rename))
        .route("/api/v1/me/password", put(identity::handle_change_password))
        .route(
            "/api/v1/me/rename-jobs/:id",
            get(identity::handle_get_rename_job),
        )
        .route(
            "/api/v1/me/rename-jobs/:id/retry",
            post(identity::handle_retry_rename_job),
        )
        .route("/api/v1/reviewers", get(identity::handle_list_reviewers))
        // Resumes
        .route(
            "/api/v1/resumes",
            get(review::handle_list_resumes).post(review::handle_upload_resume),
        )
        .route("/api/v1/resumes/live", get(live::handle_dashboard_live))
        .route(
            "/api/v1/resumes/:id",
            get(review::handle_get_resume).delete(review::handle_delete_resume),
        )
        .route("/api/v1/resumes/:id/live", get(live::handle_resume_live))
        .route("/api/v1/resumes/:id/file", put(review::handle_replace_file))
        .route(
            "/api/v1/resumes/:id/versions",
            get(review::handle_list_versions),
        )
        .route("/api/v1/resumes/:id/status", patch(review::handle_set_status))
        // Sharing
        .route("/api/v1/resumes/:id/share", post(review::handle_share))
        .route(
            "/api/v1/resumes/:id/share/:reviewer_id",
            axum::routing::delete(review::handle_revoke),
        )
        // Comments
        .route(
            "/api/v1/resumes/:id/comments",
            post(review::handle_add_comment),
        )
        .route(
            "/api/v1/resumes/:id/comments/:comment_id",
            patch(review::handle_edit_comment).delete(review::handle_delete_comment),
        )
        .route(
            "/api/v1/resumes/:id/comments/:comment_id/replies",
            post(review::handle_add_reply),
        )
        .route(
            "/api/v1/resumes/:id/comments/:comment_id/resolved",
            put(review::handle_set_resolved),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::{
        body::{to_bytes, Body},
        http::{header, Method, Request, StatusCode},
        response::Response,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::config::Config;
    use crate::identity::memory::MemoryAuthProvider;
    use crate::identity::{IdentityService, TokenIssuer};
    use crate::live::LiveHub;
    use crate::rename::RenameService;
    use crate::review::service::tests::PDF;
    use crate::review::service::ReviewService;
    use crate::storage::memory::MemoryBlobStore;
    use crate::store::memory::{MemoryProfileStore, MemoryRenameLedger, MemoryResumeStore};

    fn test_config() -> Config {
        Config {
            database_url: "postgres://unused".to_string(),
            redis_url: None,
            s3_bucket: "resumes".to_string(),
            s3_endpoint: "http://localhost:9000".to_string(),
            s3_region: "us-east-1".to_string(),
            s3_public_url: "http://localhost:9000/resumes".to_string(),
            aws_access_key_id: "test".to_string(),
            aws_secret_access_key: "test".to_string(),
            jwt_secret: "router-test-secret".to_string(),
            jwt_ttl_hours: 1,
            port: 0,
            rust_log: "debug".to_string(),
            request_timeout: Duration::from_secs(5),
            max_upload_bytes: 1024 * 1024,
            upload_sweep_after: Duration::from_secs(3600),
        }
    }

    fn app() -> Router {
        let config = test_config();
        let profiles = Arc::new(MemoryProfileStore::default());
        let review = ReviewService::new(
            Arc::new(MemoryResumeStore::default()),
            profiles.clone(),
            Arc::new(MemoryBlobStore::default()),
            LiveHub::local(),
            config.max_upload_bytes,
        );
        let identity = IdentityService::new(
            Arc::new(MemoryAuthProvider::default()),
            profiles.clone(),
            TokenIssuer::new(&config.jwt_secret, config.jwt_ttl_hours),
        );
        let rename = RenameService::new(
            review.clone(),
            profiles,
            Arc::new(MemoryRenameLedger::default()),
        );
        build_router(AppState {
            config,
            identity,
            review,
            rename,
        })
    }

    async fn send(app: &Router, req: Request<Body>) -> Response {
        app.clone().oneshot(req).await.unwrap()
    }

    fn json_request(method: Method, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get(uri: &str, token: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap()
    }

    async fn body_json(res: Response) -> Value {
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn sign_up(app: &Router, email: &str, name: &str, role: &str) -> (String, String) {
        let res = send(
            app,
            json_request(
                Method::POST,
                "/api/v1/auth/sign-up",
                None,
                json!({ "email": email, "password": "secret1", "name": name, "role": role }),
            ),
        )
        .await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let body = body_json(res).await;
        (
            body["token"].as_str().unwrap().to_string(),
            body["profile"]["id"].as_str().unwrap().to_string(),
        )
    }

    fn upload(token: &str, file_name: &str, bytes: &[u8]) -> Request<Body> {
        multipart(Method::POST, "/api/v1/resumes", token, file_name, bytes)
    }

    fn multipart(
        method: Method,
        uri: &str,
        token: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> Request<Body> {
        let boundary = "reviewdesk-test-boundary";
        let mut body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: application/pdf\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let res = send(
            &app(),
            Request::builder().uri("/health").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_json(res).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_requests_without_token_are_unauthorized() {
        let res = send(
            &app(),
            Request::builder()
                .uri("/api/v1/resumes")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(res).await["error"]["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn test_upload_share_comment_flow_over_http() {
        let app = app();
        let (student, _) = sign_up(&app, "ada@uni.edu", "Ada", "student").await;
        let (reviewer, reviewer_id) = sign_up(&app, "john@corp.com", "John", "reviewer").await;

        let res = send(&app, upload(&student, "resume_v1.pdf", PDF)).await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let resume = body_json(res).await;
        let id = resume["id"].as_str().unwrap().to_string();
        assert_eq!(resume["version"], 1);
        assert_eq!(resume["status"], "pending");

        // Not shared yet.
        let res = send(&app, get(&format!("/api/v1/resumes/{id}"), &reviewer)).await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_json(res).await["error"]["code"], "PERMISSION_DENIED");

        let res = send(
            &app,
            json_request(
                Method::POST,
                &format!("/api/v1/resumes/{id}/share"),
                Some(&student),
                json!({ "reviewerIds": [reviewer_id] }),
            ),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);

        let res = send(
            &app,
            json_request(
                Method::POST,
                &format!("/api/v1/resumes/{id}/comments"),
                Some(&reviewer),
                json!({ "text": "Add metrics", "x": 12.5, "y": 40.0 }),
            ),
        )
        .await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let comment = body_json(res).await;
        assert_eq!(comment["authorName"], "John");

        let res = send(&app, get("/api/v1/resumes?scope=shared", &reviewer)).await;
        let list = body_json(res).await;
        assert_eq!(list.as_array().unwrap().len(), 1);
        assert_eq!(list[0]["unresolvedCount"], 1);
    }

    #[tokio::test]
    async fn test_non_pdf_upload_is_rejected() {
        let app = app();
        let (student, _) = sign_up(&app, "ada@uni.edu", "Ada", "student").await;
        let res = send(&app, upload(&student, "notes.txt", b"hello")).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_rename_returns_accepted_job() {
        let app = app();
        let (student, _) = sign_up(&app, "ada@uni.edu", "Ada", "student").await;
        let res = send(
            &app,
            json_request(
                Method::PATCH,
                "/api/v1/me/name",
                Some(&student),
                json!({ "name": "Ada Lovelace" }),
            ),
        )
        .await;
        assert_eq!(res.status(), StatusCode::ACCEPTED);
        let job = body_json(res).await;
        assert_eq!(job["newName"], "Ada Lovelace");

        let res = send(&app, get("/api/v1/me", &student)).await;
        assert_eq!(body_json(res).await["name"], "Ada Lovelace");
    }

    async fn shared_resume(app: &Router) -> (String, String, String, String) {
        let (student, _) = sign_up(app, "ada@uni.edu", "Ada", "student").await;
        let (reviewer, reviewer_id) = sign_up(app, "john@corp.com", "John", "reviewer").await;
        let res = send(app, upload(&student, "resume_v1.pdf", PDF)).await;
        let id = body_json(res).await["id"].as_str().unwrap().to_string();
        let res = send(
            app,
            json_request(
                Method::POST,
                &format!("/api/v1/resumes/{id}/share"),
                Some(&student),
                json!({ "reviewerIds": [reviewer_id] }),
            ),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        (student, reviewer, reviewer_id, id)
    }

    #[tokio::test]
    async fn test_replace_file_bumps_version() {
        let app = app();
        let (student, reviewer, _, id) = shared_resume(&app).await;
        let uri = format!("/api/v1/resumes/{id}/file");

        let res = send(
            &app,
            multipart(Method::PUT, &uri, &reviewer, "resume_v2.pdf", PDF),
        )
        .await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        let res = send(
            &app,
            multipart(Method::PUT, &uri, &student, "resume_v2.pdf", PDF),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        let resume = body_json(res).await;
        assert_eq!(resume["version"], 2);
        assert_eq!(resume["fileName"], "resume_v2.pdf");

        let res = send(&app, get(&format!("/api/v1/resumes/{id}/versions"), &student)).await;
        assert_eq!(body_json(res).await.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_revoked_reviewer_loses_access() {
        let app = app();
        let (student, reviewer, reviewer_id, id) = shared_resume(&app).await;

        let res = send(&app, get(&format!("/api/v1/resumes/{id}"), &reviewer)).await;
        assert_eq!(res.status(), StatusCode::OK);

        let res = send(
            &app,
            Request::builder()
                .method(Method::DELETE)
                .uri(format!("/api/v1/resumes/{id}/share/{reviewer_id}"))
                .header(header::AUTHORIZATION, format!("Bearer {student}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert!(body_json(res).await["sharedWithIds"]
            .as_array()
            .unwrap()
            .is_empty());

        let res = send(&app, get(&format!("/api/v1/resumes/{id}"), &reviewer)).await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_live_endpoint_opens_event_stream() {
        let app = app();
        let (student, _, _, id) = shared_resume(&app).await;

        let res = send(
            &app,
            Request::builder()
                .uri(format!("/api/v1/resumes/{id}/live?access_token={student}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        let content_type = res.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("text/event-stream"));

        let res = send(&app, get("/api/v1/resumes/live", &student)).await;
        assert_eq!(res.status(), StatusCode::OK);

        let res = send(
            &app,
            Request::builder()
                .uri(format!("/api/v1/resumes/{id}/live"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }
}
