//! Who is calling, and what their profile says about them.
//!
//! Credentials live behind [`AuthProvider`]; profiles (name, role) live in the
//! [`ProfileStore`]. A session token names the principal, and every request
//! resolves it to a fresh profile.

pub mod auth;
pub mod extract;
pub mod handlers;
#[cfg(test)]
pub mod memory;
pub mod token;

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::user::{Role, UserProfile};
use crate::review::service::ReviewService;
use crate::store::ProfileStore;

pub use auth::{AuthProvider, PgAuthProvider};
pub use extract::CurrentUser;
pub use token::TokenIssuer;

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub token: String,
    pub profile: UserProfile,
}

#[derive(Clone)]
pub struct IdentityService {
    auth: Arc<dyn AuthProvider>,
    profiles: Arc<dyn ProfileStore>,
    tokens: TokenIssuer,
}

impl IdentityService {
    pub fn new(
        auth: Arc<dyn AuthProvider>,
        profiles: Arc<dyn ProfileStore>,
        tokens: TokenIssuer,
    ) -> Self {
        Self {
            auth,
            profiles,
            tokens,
        }
    }

    /// Creates the credential, then the profile. A failed profile write removes
    /// the credential again so the email can be reused.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        name: &str,
        role: Role,
    ) -> Result<Session, AppError> {
        let email = normalize_email(email)?;
        validate_password(password)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("name cannot be empty".to_string()));
        }

        let principal = self.auth.sign_up(&email, password).await?;
        let profile = UserProfile {
            id: principal,
            name: name.to_string(),
            email,
            role,
        };

        if let Err(e) = self.profiles.create(&profile).await {
            warn!("Profile write for {principal} failed, removing credential: {e}");
            if let Err(cleanup) = self.auth.delete_account(principal).await {
                warn!("Could not remove credential {principal}: {cleanup}");
            }
            return Err(e);
        }

        info!("New {} account {principal}", profile.role);
        self.session_for(profile)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AppError> {
        let email = normalize_email(email)?;
        let principal = self.auth.sign_in(&email, password).await?;
        let profile = self.load_profile(principal).await?;
        self.session_for(profile)
    }

    /// Maps a session token to the caller's current profile.
    pub async fn resolve(&self, token: &str) -> Result<UserProfile, AppError> {
        let principal = self.tokens.verify(token)?;
        self.load_profile(principal).await
    }

    pub async fn change_password(
        &self,
        user: &UserProfile,
        current: &str,
        new_password: &str,
    ) -> Result<(), AppError> {
        validate_password(new_password)?;
        // Re-authenticate so a stolen token alone cannot take over the account.
        let principal = self.auth.sign_in(&user.email, current).await?;
        if principal != user.id {
            return Err(AppError::Unauthorized);
        }
        self.auth.change_password(user.id, new_password).await?;
        info!("Password changed for {}", user.id);
        Ok(())
    }

    /// Students take their resumes with them. Reviewers lose access everywhere
    /// but their comments stay on the documents they reviewed.
    pub async fn delete_account(
        &self,
        user: &UserProfile,
        review: &ReviewService,
    ) -> Result<(), AppError> {
        match user.role {
            Role::Student => {
                let removed = review.delete_all_owned_by(user.id).await?;
                info!("Removed {removed} resume(s) of departing student {}", user.id);
            }
            Role::Reviewer => {
                let revoked = review.revoke_everywhere(user.id).await?;
                info!("Revoked departing reviewer {} from {revoked} resume(s)", user.id);
            }
        }
        self.profiles.delete(user.id).await?;
        self.auth.delete_account(user.id).await?;
        info!("Deleted account {}", user.id);
        Ok(())
    }

    pub async fn reviewers(&self) -> Result<Vec<UserProfile>, AppError> {
        self.profiles.list_by_role(Role::Reviewer).await
    }

    async fn load_profile(&self, principal: Uuid) -> Result<UserProfile, AppError> {
        self.profiles
            .get(principal)
            .await?
            .ok_or(AppError::Unauthorized)
    }

    fn session_for(&self, profile: UserProfile) -> Result<Session, AppError> {
        Ok(Session {
            token: self.tokens.issue(profile.id)?,
            profile,
        })
    }
}

fn normalize_email(email: &str) -> Result<String, AppError> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(AppError::Validation(format!("'{email}' is not a valid email"))),
    }
}

fn validate_password(password: &str) -> Result<(), AppError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
