use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Query},
    http::{header::AUTHORIZATION, request::Parts},
};
use serde::Deserialize;

use crate::errors::AppError;
use crate::models::user::UserProfile;
use crate::state::AppState;

/// The signed-in caller, resolved from `Authorization: Bearer <token>`.
///
/// Browsers cannot set headers on `EventSource`, so the live endpoints may pass
/// the token as an `access_token` query parameter instead.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub UserProfile);

#[derive(Deserialize)]
struct TokenQuery {
    access_token: Option<String>,
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        if let Some(user) = parts.extensions.get::<CurrentUser>() {
            return Ok(user.clone());
        }

        let token = match bearer_token(parts) {
            Some(token) => token,
            None => Query::<TokenQuery>::from_request_parts(parts, state)
                .await
                .ok()
                .and_then(|Query(q)| q.access_token)
                .ok_or(AppError::Unauthorized)?,
        };

        let user = CurrentUser(state.identity.resolve(&token).await?);
        parts.extensions.insert(user.clone());
        Ok(user)
    }
}

fn bearer_token(parts: &Parts) -> Option<String> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}
