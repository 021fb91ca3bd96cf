use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::user::CredentialRow;

/// Credential checks for email/password principals.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Registers a new principal. Fails with `Conflict` if the email is taken.
    async fn sign_up(&self, email: &str, password: &str) -> Result<Uuid, AppError>;

    /// Returns the principal for matching credentials, `Unauthorized` otherwise.
    async fn sign_in(&self, email: &str, password: &str) -> Result<Uuid, AppError>;

    async fn change_password(&self, principal: Uuid, new_password: &str) -> Result<(), AppError>;

    async fn delete_account(&self, principal: Uuid) -> Result<(), AppError>;
}

/// Argon2 hashing is CPU-bound, so it runs off the async workers.
pub async fn hash_password(password: &str) -> Result<String, AppError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || password_auth::generate_hash(password))
        .await
        .map_err(|e| AppError::Internal(e.into()))
}

pub async fn verify_password(password: &str, hash: &str) -> Result<bool, AppError> {
    let password = password.to_string();
    let hash = hash.to_string();
    tokio::task::spawn_blocking(move || password_auth::verify_password(password, &hash).is_ok())
        .await
        .map_err(|e| AppError::Internal(e.into()))
}

#[derive(Clone)]
pub struct PgAuthProvider {
    pool: PgPool,
}

impl PgAuthProvider {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuthProvider for PgAuthProvider {
    async fn sign_up(&self, email: &str, password: &str) -> Result<Uuid, AppError> {
        let principal = Uuid::new_v4();
        let hash = hash_password(password).await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO credentials (principal_id, email, password_hash)
            VALUES ($1, $2, $3)
            ON CONFLICT (email) DO NOTHING
            "#,
        )
        .bind(principal)
        .bind(email)
        .bind(&hash)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(AppError::Conflict(format!("{email} is already registered")));
        }
        info!("Registered principal {principal}");
        Ok(principal)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Uuid, AppError> {
        let row: Option<CredentialRow> = sqlx::query_as(
            "SELECT principal_id, password_hash FROM credentials WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            debug!("Sign-in for unknown email");
            return Err(AppError::Unauthorized);
        };

        if verify_password(password, &row.password_hash).await? {
            Ok(row.principal_id)
        } else {
            debug!("Sign-in with wrong password for principal {}", row.principal_id);
            Err(AppError::Unauthorized)
        }
    }

    async fn change_password(&self, principal: Uuid, new_password: &str) -> Result<(), AppError> {
        let hash = hash_password(new_password).await?;
        let updated = sqlx::query("UPDATE credentials SET password_hash = $2 WHERE principal_id = $1")
            .bind(principal)
            .bind(&hash)
            .execute(&self.pool)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(AppError::not_found("Account", principal));
        }
        Ok(())
    }

    async fn delete_account(&self, principal: Uuid) -> Result<(), AppError> {
        sqlx::query("DELETE FROM credentials WHERE principal_id = $1")
            .bind(principal)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
