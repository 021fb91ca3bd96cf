//! Persistence seams. Handlers and services only see these traits; the
//! PostgreSQL implementations live in [`postgres`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::rename::RenameJob;
use crate::models::resume::{Resume, ResumeVersion};
use crate::models::user::{Role, UserProfile};

#[cfg(test)]
pub mod memory;
pub mod postgres;

pub use postgres::{PgProfileStore, PgRenameLedger, PgResumeStore};

/// Resume documents, keyed by id, queryable by owner and by reviewer access.
#[async_trait]
pub trait ResumeStore: Send + Sync {
    async fn create(&self, resume: &Resume) -> Result<(), AppError>;

    async fn get(&self, id: Uuid) -> Result<Option<Resume>, AppError>;

    /// Writes the whole document if its stored revision still equals `expected_revision`.
    /// Returns `false` when another writer got there first or the document is gone.
    async fn update(&self, resume: &Resume, expected_revision: i64) -> Result<bool, AppError>;

    async fn delete(&self, id: Uuid) -> Result<bool, AppError>;

    /// Ready resumes owned by `student_id`, newest upload first.
    async fn list_by_student(&self, student_id: Uuid) -> Result<Vec<Resume>, AppError>;

    /// Ready resumes whose access list contains `reviewer_id`, newest upload first.
    async fn list_by_shared_reviewer(&self, reviewer_id: Uuid) -> Result<Vec<Resume>, AppError>;

    /// Every resume owned by `user_id` or shared with them, provisional ones included.
    async fn list_involving(&self, user_id: Uuid) -> Result<Vec<Resume>, AppError>;

    /// Provisional records last touched before `older_than`.
    async fn list_stale_uploads(&self, older_than: DateTime<Utc>)
        -> Result<Vec<Resume>, AppError>;

    async fn record_version(&self, entry: &ResumeVersion) -> Result<(), AppError>;

    async fn list_versions(&self, resume_id: Uuid) -> Result<Vec<ResumeVersion>, AppError>;
}

/// User profile records keyed by auth principal id.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Fails with `Conflict` if the id or email is taken.
    async fn create(&self, profile: &UserProfile) -> Result<(), AppError>;

    async fn get(&self, id: Uuid) -> Result<Option<UserProfile>, AppError>;

    async fn update_name(&self, id: Uuid, name: &str) -> Result<bool, AppError>;

    async fn delete(&self, id: Uuid) -> Result<bool, AppError>;

    async fn list_by_role(&self, role: Role) -> Result<Vec<UserProfile>, AppError>;
}

/// Completion ledger for rename fan-out jobs.
#[async_trait]
pub trait RenameLedger: Send + Sync {
    async fn create_job(&self, job: &RenameJob) -> Result<(), AppError>;

    async fn get_job(&self, id: Uuid) -> Result<Option<RenameJob>, AppError>;

    /// Counts one attempt on a document; `error` of `None` marks it completed.
    async fn record_attempt(
        &self,
        job_id: Uuid,
        resume_id: Uuid,
        error: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), AppError>;

    async fn finish_job(&self, job_id: Uuid, at: DateTime<Utc>) -> Result<(), AppError>;

    async fn list_unfinished(&self) -> Result<Vec<RenameJob>, AppError>;
}
