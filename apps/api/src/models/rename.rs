use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// Durable record of a display-name change being propagated into resumes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameJob {
    pub id: Uuid,
    pub user_id: Uuid,
    pub new_name: String,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub documents: Vec<RenameDocument>,
}

impl RenameJob {
    pub fn new(user_id: Uuid, new_name: &str, resume_ids: &[Uuid], now: DateTime<Utc>) -> Self {
        RenameJob {
            id: Uuid::new_v4(),
            user_id,
            new_name: new_name.to_string(),
            created_at: now,
            finished_at: None,
            documents: resume_ids
                .iter()
                .map(|resume_id| RenameDocument {
                    resume_id: *resume_id,
                    attempts: 0,
                    last_error: None,
                    completed_at: None,
                })
                .collect(),
        }
    }

    pub fn pending(&self) -> impl Iterator<Item = &RenameDocument> {
        self.documents.iter().filter(|d| d.completed_at.is_none())
    }

    pub fn is_complete(&self) -> bool {
        self.pending().next().is_none()
    }
}

/// Per-resume ledger entry of a rename job.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RenameDocument {
    pub resume_id: Uuid,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
pub struct RenameJobRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub new_name: String,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RenameJobRow {
    pub fn with_documents(self, documents: Vec<RenameDocument>) -> RenameJob {
        RenameJob {
            id: self.id,
            user_id: self.user_id,
            new_name: self.new_name,
            created_at: self.created_at,
            finished_at: self.finished_at,
            documents,
        }
    }
}
