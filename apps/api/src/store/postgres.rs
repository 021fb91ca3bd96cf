use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::rename::{RenameDocument, RenameJob, RenameJobRow};
use crate::models::resume::{Resume, ResumeRow, ResumeVersion};
use crate::models::user::{Role, UserProfile, UserRow};
use crate::store::{ProfileStore, RenameLedger, ResumeStore};

const RESUME_COLUMNS: &str = "id, student_id, student_name, file_name, download_url, storage_path, \
     uploaded_at, status, version, comments, shared_with_ids, upload_state, revision";

/// PostgreSQL error code for unique constraint violations.
const UNIQUE_VIOLATION: &str = "23505";

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|d| d.code())
        .is_some_and(|code| code == UNIQUE_VIOLATION)
}

fn into_resumes(rows: Vec<ResumeRow>) -> Result<Vec<Resume>, AppError> {
    rows.into_iter().map(Resume::try_from).collect()
}

#[derive(Clone)]
pub struct PgResumeStore {
    pool: PgPool,
}

impl PgResumeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResumeStore for PgResumeStore {
    async fn create(&self, resume: &Resume) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO resumes
                (id, student_id, student_name, file_name, download_url, storage_path,
                 uploaded_at, status, version, comments, shared_with_ids, upload_state, revision)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(resume.id)
        .bind(resume.student_id)
        .bind(&resume.student_name)
        .bind(&resume.file_name)
        .bind(&resume.download_url)
        .bind(&resume.storage_path)
        .bind(resume.uploaded_at)
        .bind(resume.status.as_str())
        .bind(resume.version)
        .bind(Json(&resume.comments))
        .bind(resume.shared_with_ids.as_slice())
        .bind(resume.upload_state.as_str())
        .bind(resume.revision)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Resume>, AppError> {
        let row: Option<ResumeRow> =
            sqlx::query_as(&format!("SELECT {RESUME_COLUMNS} FROM resumes WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Resume::try_from).transpose()
    }

    async fn update(&self, resume: &Resume, expected_revision: i64) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE resumes SET
                student_name = $2,
                file_name = $3,
                download_url = $4,
                storage_path = $5,
                uploaded_at = $6,
                status = $7,
                version = $8,
                comments = $9,
                shared_with_ids = $10,
                upload_state = $11,
                revision = $12,
                updated_at = now()
            WHERE id = $1 AND revision = $13
            "#,
        )
        .bind(resume.id)
        .bind(&resume.student_name)
        .bind(&resume.file_name)
        .bind(&resume.download_url)
        .bind(&resume.storage_path)
        .bind(resume.uploaded_at)
        .bind(resume.status.as_str())
        .bind(resume.version)
        .bind(Json(&resume.comments))
        .bind(resume.shared_with_ids.as_slice())
        .bind(resume.upload_state.as_str())
        .bind(resume.revision)
        .bind(expected_revision)
        .execute(&self.pool)
        .await?;

        let applied = result.rows_affected() == 1;
        if !applied {
            debug!(
                "Conditional write on resume {} at revision {expected_revision} did not apply",
                resume.id
            );
        }
        Ok(applied)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM resumes WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_by_student(&self, student_id: Uuid) -> Result<Vec<Resume>, AppError> {
        let rows: Vec<ResumeRow> = sqlx::query_as(&format!(
            "SELECT {RESUME_COLUMNS} FROM resumes \
             WHERE student_id = $1 AND upload_state = 'ready' \
             ORDER BY uploaded_at DESC"
        ))
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;
        into_resumes(rows)
    }

    async fn list_by_shared_reviewer(&self, reviewer_id: Uuid) -> Result<Vec<Resume>, AppError> {
        let rows: Vec<ResumeRow> = sqlx::query_as(&format!(
            "SELECT {RESUME_COLUMNS} FROM resumes \
             WHERE $1 = ANY(shared_with_ids) AND upload_state = 'ready' \
             ORDER BY uploaded_at DESC"
        ))
        .bind(reviewer_id)
        .fetch_all(&self.pool)
        .await?;
        into_resumes(rows)
    }

    async fn list_involving(&self, user_id: Uuid) -> Result<Vec<Resume>, AppError> {
        let rows: Vec<ResumeRow> = sqlx::query_as(&format!(
            "SELECT {RESUME_COLUMNS} FROM resumes \
             WHERE student_id = $1 OR $1 = ANY(shared_with_ids)"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        into_resumes(rows)
    }

    async fn list_stale_uploads(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Resume>, AppError> {
        let rows: Vec<ResumeRow> = sqlx::query_as(&format!(
            "SELECT {RESUME_COLUMNS} FROM resumes \
             WHERE upload_state = 'uploading' AND updated_at < $1"
        ))
        .bind(older_than)
        .fetch_all(&self.pool)
        .await?;
        into_resumes(rows)
    }

    async fn record_version(&self, entry: &ResumeVersion) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO resume_versions
                (resume_id, version, file_name, download_url, storage_path, uploaded_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (resume_id, version) DO NOTHING
            "#,
        )
        .bind(entry.resume_id)
        .bind(entry.version)
        .bind(&entry.file_name)
        .bind(&entry.download_url)
        .bind(&entry.storage_path)
        .bind(entry.uploaded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_versions(&self, resume_id: Uuid) -> Result<Vec<ResumeVersion>, AppError> {
        Ok(sqlx::query_as::<_, ResumeVersion>(
            r#"
            SELECT resume_id, version, file_name, download_url, storage_path, uploaded_at
            FROM resume_versions
            WHERE resume_id = $1
            ORDER BY version ASC
            "#,
        )
        .bind(resume_id)
        .fetch_all(&self.pool)
        .await?)
    }
}

#[derive(Clone)]
pub struct PgProfileStore {
    pool: PgPool,
}

impl PgProfileStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProfileStore for PgProfileStore {
    async fn create(&self, profile: &UserProfile) -> Result<(), AppError> {
        sqlx::query("INSERT INTO users (id, name, email, role) VALUES ($1, $2, $3, $4)")
            .bind(profile.id)
            .bind(&profile.name)
            .bind(&profile.email)
            .bind(profile.role.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::Conflict(format!("A profile for {} already exists", profile.email))
                } else {
                    AppError::Database(e)
                }
            })?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<UserProfile>, AppError> {
        let row: Option<UserRow> =
            sqlx::query_as("SELECT id, name, email, role FROM users WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(UserProfile::try_from).transpose()
    }

    async fn update_name(&self, id: Uuid, name: &str) -> Result<bool, AppError> {
        let result = sqlx::query("UPDATE users SET name = $2 WHERE id = $1")
            .bind(id)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_by_role(&self, role: Role) -> Result<Vec<UserProfile>, AppError> {
        let rows: Vec<UserRow> =
            sqlx::query_as("SELECT id, name, email, role FROM users WHERE role = $1 ORDER BY name")
                .bind(role.as_str())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(UserProfile::try_from).collect()
    }
}

#[derive(Clone)]
pub struct PgRenameLedger {
    pool: PgPool,
}

impl PgRenameLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn documents(&self, job_id: Uuid) -> Result<Vec<RenameDocument>, AppError> {
        Ok(sqlx::query_as::<_, RenameDocument>(
            r#"
            SELECT resume_id, attempts, last_error, completed_at
            FROM rename_job_documents
            WHERE job_id = $1
            ORDER BY resume_id
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?)
    }
}

#[async_trait]
impl RenameLedger for PgRenameLedger {
    async fn create_job(&self, job: &RenameJob) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO rename_jobs (id, user_id, new_name, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(job.id)
        .bind(job.user_id)
        .bind(&job.new_name)
        .bind(job.created_at)
        .execute(&mut *tx)
        .await?;

        for doc in &job.documents {
            sqlx::query("INSERT INTO rename_job_documents (job_id, resume_id) VALUES ($1, $2)")
                .bind(job.id)
                .bind(doc.resume_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<RenameJob>, AppError> {
        let row: Option<RenameJobRow> = sqlx::query_as(
            "SELECT id, user_id, new_name, created_at, finished_at FROM rename_jobs WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let documents = self.documents(row.id).await?;
                Ok(Some(row.with_documents(documents)))
            }
            None => Ok(None),
        }
    }

    async fn record_attempt(
        &self,
        job_id: Uuid,
        resume_id: Uuid,
        error: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let completed_at = if error.is_none() { Some(at) } else { None };
        sqlx::query(
            r#"
            UPDATE rename_job_documents
            SET attempts = attempts + 1,
                last_error = $3,
                completed_at = COALESCE(completed_at, $4)
            WHERE job_id = $1 AND resume_id = $2
            "#,
        )
        .bind(job_id)
        .bind(resume_id)
        .bind(error)
        .bind(completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn finish_job(&self, job_id: Uuid, at: DateTime<Utc>) -> Result<(), AppError> {
        sqlx::query("UPDATE rename_jobs SET finished_at = $2 WHERE id = $1 AND finished_at IS NULL")
            .bind(job_id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_unfinished(&self) -> Result<Vec<RenameJob>, AppError> {
        let rows: Vec<RenameJobRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, new_name, created_at, finished_at
            FROM rename_jobs
            WHERE finished_at IS NULL
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            let documents = self.documents(row.id).await?;
            jobs.push(row.with_documents(documents));
        }
        Ok(jobs)
    }
}
