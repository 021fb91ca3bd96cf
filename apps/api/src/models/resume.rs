use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::comment::Comment;

/// Review status label. Any value may follow any other; no transition table applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResumeStatus {
    Pending,
    InReview,
    Reviewed,
    Approved,
}

impl ResumeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResumeStatus::Pending => "pending",
            ResumeStatus::InReview => "in-review",
            ResumeStatus::Reviewed => "reviewed",
            ResumeStatus::Approved => "approved",
        }
    }
}

impl fmt::Display for ResumeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResumeStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ResumeStatus::Pending),
            "in-review" => Ok(ResumeStatus::InReview),
            "reviewed" => Ok(ResumeStatus::Reviewed),
            "approved" => Ok(ResumeStatus::Approved),
            other => Err(AppError::Validation(format!("Unknown status '{other}'"))),
        }
    }
}

/// Whether the file behind a record has finished uploading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    Uploading,
    Ready,
}

impl UploadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadState::Uploading => "uploading",
            UploadState::Ready => "ready",
        }
    }
}

impl FromStr for UploadState {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploading" => Ok(UploadState::Uploading),
            "ready" => Ok(UploadState::Ready),
            other => Err(AppError::Validation(format!("Unknown upload state '{other}'"))),
        }
    }
}

/// A student-submitted resume together with its review thread and reviewer ACL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resume {
    pub id: Uuid,
    pub student_id: Uuid,
    pub student_name: String,
    pub file_name: String,
    #[serde(rename = "downloadURL")]
    pub download_url: String,
    pub storage_path: String,
    pub uploaded_at: DateTime<Utc>,
    pub status: ResumeStatus,
    pub version: i32,
    pub comments: Vec<Comment>,
    pub shared_with_ids: Vec<Uuid>,
    pub upload_state: UploadState,
    /// Bumped on every successful write; used for compare-and-swap updates.
    pub revision: i64,
}

impl Resume {
    /// A provisional record written before the file reaches blob storage.
    pub fn provisional(
        student_id: Uuid,
        student_name: &str,
        file_name: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Resume {
            id: Uuid::new_v4(),
            student_id,
            student_name: student_name.to_string(),
            file_name: file_name.to_string(),
            download_url: String::new(),
            storage_path: String::new(),
            uploaded_at: now,
            status: ResumeStatus::Pending,
            version: 1,
            comments: Vec::new(),
            shared_with_ids: Vec::new(),
            upload_state: UploadState::Uploading,
            revision: 0,
        }
    }

    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.student_id == user_id
    }

    pub fn is_shared_with(&self, user_id: Uuid) -> bool {
        self.shared_with_ids.contains(&user_id)
    }

    pub fn unresolved_count(&self) -> usize {
        self.comments.iter().filter(|c| !c.resolved).count()
    }
}

/// Compact dashboard entry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeSummary {
    pub id: Uuid,
    pub student_id: Uuid,
    pub student_name: String,
    pub file_name: String,
    #[serde(rename = "downloadURL")]
    pub download_url: String,
    pub uploaded_at: DateTime<Utc>,
    pub status: ResumeStatus,
    pub version: i32,
    pub comment_count: usize,
    pub unresolved_count: usize,
    pub shared_with_ids: Vec<Uuid>,
}

impl From<&Resume> for ResumeSummary {
    fn from(r: &Resume) -> Self {
        ResumeSummary {
            id: r.id,
            student_id: r.student_id,
            student_name: r.student_name.clone(),
            file_name: r.file_name.clone(),
            download_url: r.download_url.clone(),
            uploaded_at: r.uploaded_at,
            status: r.status,
            version: r.version,
            comment_count: r.comments.len(),
            unresolved_count: r.unresolved_count(),
            shared_with_ids: r.shared_with_ids.clone(),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ResumeRow {
    pub id: Uuid,
    pub student_id: Uuid,
    pub student_name: String,
    pub file_name: String,
    pub download_url: String,
    pub storage_path: String,
    pub uploaded_at: DateTime<Utc>,
    pub status: String,
    pub version: i32,
    pub comments: Json<Vec<Comment>>,
    pub shared_with_ids: Vec<Uuid>,
    pub upload_state: String,
    pub revision: i64,
}

impl TryFrom<ResumeRow> for Resume {
    type Error = AppError;

    fn try_from(row: ResumeRow) -> Result<Self, Self::Error> {
        Ok(Resume {
            id: row.id,
            student_id: row.student_id,
            student_name: row.student_name,
            file_name: row.file_name,
            download_url: row.download_url,
            storage_path: row.storage_path,
            uploaded_at: row.uploaded_at,
            status: row.status.parse()?,
            version: row.version,
            comments: row.comments.0,
            shared_with_ids: row.shared_with_ids,
            upload_state: row.upload_state.parse()?,
            revision: row.revision,
        })
    }
}

/// One entry of a resume's file history. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ResumeVersion {
    pub resume_id: Uuid,
    pub version: i32,
    pub file_name: String,
    #[serde(rename = "downloadURL")]
    pub download_url: String,
    pub storage_path: String,
    pub uploaded_at: DateTime<Utc>,
}

impl ResumeVersion {
    pub fn of(resume: &Resume) -> Self {
        ResumeVersion {
            resume_id: resume.id,
            version: resume.version,
            file_name: resume.file_name.clone(),
            download_url: resume.download_url.clone(),
            storage_path: resume.storage_path.clone(),
            uploaded_at: resume.uploaded_at,
        }
    }
}
