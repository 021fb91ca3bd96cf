//! In-process stores used by the service and router tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::rename::RenameJob;
use crate::models::resume::{Resume, ResumeVersion, UploadState};
use crate::models::user::{Role, UserProfile};
use crate::store::{ProfileStore, RenameLedger, ResumeStore};

#[derive(Default)]
pub struct MemoryResumeStore {
    resumes: Mutex<HashMap<Uuid, (Resume, DateTime<Utc>)>>,
    versions: Mutex<Vec<ResumeVersion>>,
    /// Number of upcoming conditional writes to reject, simulating a concurrent writer.
    pub fail_next_updates: AtomicUsize,
}

impl MemoryResumeStore {
    pub fn insert_raw(&self, resume: Resume, updated_at: DateTime<Utc>) {
        self.resumes
            .lock()
            .unwrap()
            .insert(resume.id, (resume, updated_at));
    }

    fn listed<F: Fn(&Resume) -> bool>(&self, pred: F) -> Vec<Resume> {
        let mut out: Vec<Resume> = self
            .resumes
            .lock()
            .unwrap()
            .values()
            .map(|(r, _)| r)
            .filter(|r| r.upload_state == UploadState::Ready && pred(r))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        out
    }
}

#[async_trait]
impl ResumeStore for MemoryResumeStore {
    async fn create(&self, resume: &Resume) -> Result<(), AppError> {
        self.insert_raw(resume.clone(), Utc::now());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Resume>, AppError> {
        Ok(self.resumes.lock().unwrap().get(&id).map(|(r, _)| r.clone()))
    }

    async fn update(&self, resume: &Resume, expected_revision: i64) -> Result<bool, AppError> {
        if self
            .fail_next_updates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Ok(false);
        }
        let mut resumes = self.resumes.lock().unwrap();
        match resumes.get_mut(&resume.id) {
            Some((stored, updated_at)) if stored.revision == expected_revision => {
                *stored = resume.clone();
                *updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        self.versions.lock().unwrap().retain(|v| v.resume_id != id);
        Ok(self.resumes.lock().unwrap().remove(&id).is_some())
    }

    async fn list_by_student(&self, student_id: Uuid) -> Result<Vec<Resume>, AppError> {
        Ok(self.listed(|r| r.student_id == student_id))
    }

    async fn list_by_shared_reviewer(&self, reviewer_id: Uuid) -> Result<Vec<Resume>, AppError> {
        Ok(self.listed(|r| r.is_shared_with(reviewer_id)))
    }

    async fn list_involving(&self, user_id: Uuid) -> Result<Vec<Resume>, AppError> {
        Ok(self
            .resumes
            .lock()
            .unwrap()
            .values()
            .map(|(r, _)| r)
            .filter(|r| r.is_owned_by(user_id) || r.is_shared_with(user_id))
            .cloned()
            .collect())
    }

    async fn list_stale_uploads(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Resume>, AppError> {
        Ok(self
            .resumes
            .lock()
            .unwrap()
            .values()
            .filter(|(r, at)| r.upload_state == UploadState::Uploading && *at < older_than)
            .map(|(r, _)| r.clone())
            .collect())
    }

    async fn record_version(&self, entry: &ResumeVersion) -> Result<(), AppError> {
        let mut versions = self.versions.lock().unwrap();
        if !versions
            .iter()
            .any(|v| v.resume_id == entry.resume_id && v.version == entry.version)
        {
            versions.push(entry.clone());
        }
        Ok(())
    }

    async fn list_versions(&self, resume_id: Uuid) -> Result<Vec<ResumeVersion>, AppError> {
        let mut out: Vec<_> = self
            .versions
            .lock()
            .unwrap()
            .iter()
            .filter(|v| v.resume_id == resume_id)
            .cloned()
            .collect();
        out.sort_by_key(|v| v.version);
        Ok(out)
    }
}

#[derive(Default)]
pub struct MemoryProfileStore {
    profiles: Mutex<HashMap<Uuid, UserProfile>>,
    pub fail_creates: std::sync::atomic::AtomicBool,
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn create(&self, profile: &UserProfile) -> Result<(), AppError> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(AppError::Internal(anyhow::anyhow!("profile store offline")));
        }
        let mut profiles = self.profiles.lock().unwrap();
        if profiles
            .values()
            .any(|p| p.id == profile.id || p.email == profile.email)
        {
            return Err(AppError::Conflict(format!(
                "A profile for {} already exists",
                profile.email
            )));
        }
        profiles.insert(profile.id, profile.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<UserProfile>, AppError> {
        Ok(self.profiles.lock().unwrap().get(&id).cloned())
    }

    async fn update_name(&self, id: Uuid, name: &str) -> Result<bool, AppError> {
        Ok(match self.profiles.lock().unwrap().get_mut(&id) {
            Some(p) => {
                p.name = name.to_string();
                true
            }
            None => false,
        })
    }

    async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        Ok(self.profiles.lock().unwrap().remove(&id).is_some())
    }

    async fn list_by_role(&self, role: Role) -> Result<Vec<UserProfile>, AppError> {
        let mut out: Vec<_> = self
            .profiles
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.role == role)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }
}

#[derive(Default)]
pub struct MemoryRenameLedger {
    jobs: Mutex<HashMap<Uuid, RenameJob>>,
}

#[async_trait]
impl RenameLedger for MemoryRenameLedger {
    async fn create_job(&self, job: &RenameJob) -> Result<(), AppError> {
        self.jobs.lock().unwrap().insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<RenameJob>, AppError> {
        Ok(self.jobs.lock().unwrap().get(&id).cloned())
    }

    async fn record_attempt(
        &self,
        job_id: Uuid,
        resume_id: Uuid,
        error: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut jobs = self.jobs.lock().unwrap();
        let doc = jobs
            .get_mut(&job_id)
            .and_then(|j| j.documents.iter_mut().find(|d| d.resume_id == resume_id));
        if let Some(doc) = doc {
            doc.attempts += 1;
            doc.last_error = error.map(String::from);
            if error.is_none() && doc.completed_at.is_none() {
                doc.completed_at = Some(at);
            }
        }
        Ok(())
    }

    async fn finish_job(&self, job_id: Uuid, at: DateTime<Utc>) -> Result<(), AppError> {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(&job_id) {
            job.finished_at.get_or_insert(at);
        }
        Ok(())
    }

    async fn list_unfinished(&self) -> Result<Vec<RenameJob>, AppError> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|j| j.finished_at.is_none())
            .cloned()
            .collect())
    }
}
