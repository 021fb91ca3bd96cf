//! Resume lifecycle, sharing, status and feedback operations.
//!
//! Every write goes through [`ReviewService::mutate`]: read the document, apply
//! a change in memory, write it back only if nobody else wrote in between.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::live::{LiveHub, ResumeChanged};
use crate::models::comment::{Author, Comment, Reply};
use crate::models::resume::{Resume, ResumeStatus, ResumeSummary, ResumeVersion, UploadState};
use crate::models::user::{Role, UserProfile};
use crate::review::{acl, comments};
use crate::storage::validation::{validate_pdf, PDF_CONTENT_TYPE};
use crate::storage::{resume_blob_path, resume_blob_prefix, BlobStore};
use crate::store::{ProfileStore, ResumeStore};

pub const MAX_WRITE_ATTEMPTS: u32 = 5;
const WRITE_BACKOFF_BASE_MS: u64 = 25;

/// A file received from a client, not yet validated.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// Which dashboard list to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Resumes the caller owns.
    Mine,
    /// Resumes shared with the caller.
    Shared,
}

impl Scope {
    pub fn default_for(role: Role) -> Self {
        match role {
            Role::Student => Scope::Mine,
            Role::Reviewer => Scope::Shared,
        }
    }
}

#[derive(Clone)]
pub struct ReviewService {
    resumes: Arc<dyn ResumeStore>,
    profiles: Arc<dyn ProfileStore>,
    blobs: Arc<dyn BlobStore>,
    live: LiveHub,
    max_upload_bytes: usize,
}

impl ReviewService {
    pub fn new(
        resumes: Arc<dyn ResumeStore>,
        profiles: Arc<dyn ProfileStore>,
        blobs: Arc<dyn BlobStore>,
        live: LiveHub,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            resumes,
            profiles,
            blobs,
            live,
            max_upload_bytes,
        }
    }

    pub fn resumes(&self) -> &Arc<dyn ResumeStore> {
        &self.resumes
    }

    pub fn live(&self) -> &LiveHub {
        &self.live
    }

    /// Optimistic read-modify-write of one resume.
    ///
    /// `apply` runs against a fresh copy on every attempt and may reject the
    /// change by returning an error, which is passed through unchanged.
    pub async fn mutate<T, F>(&self, id: Uuid, mut apply: F) -> Result<(Resume, T), AppError>
    where
        F: FnMut(&mut Resume) -> Result<T, AppError> + Send,
        T: Send,
    {
        for attempt in 0..MAX_WRITE_ATTEMPTS {
            if attempt > 0 {
                let delay = Duration::from_millis(WRITE_BACKOFF_BASE_MS << (attempt - 1));
                debug!(
                    "Write on resume {id} lost a race (attempt {attempt}), retrying after {}ms",
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let mut resume = self
                .resumes
                .get(id)
                .await?
                .ok_or_else(|| AppError::not_found("Resume", id))?;

            let expected = resume.revision;
            let out = apply(&mut resume)?;
            resume.revision = expected + 1;

            if self.resumes.update(&resume, expected).await? {
                self.live.publish(ResumeChanged::updated(&resume)).await;
                return Ok((resume, out));
            }
        }

        warn!("Giving up on resume {id} after {MAX_WRITE_ATTEMPTS} conflicting writes");
        Err(AppError::Conflict(format!(
            "Resume {id} is being modified concurrently, try again"
        )))
    }

    async fn load(&self, id: Uuid) -> Result<Resume, AppError> {
        self.resumes
            .get(id)
            .await?
            .ok_or_else(|| AppError::not_found("Resume", id))
    }

    // ── Reads ──────────────────────────────────────────────────────────────

    pub async fn get(&self, user: &UserProfile, id: Uuid) -> Result<Resume, AppError> {
        let resume = self.load(id).await?;
        acl::ensure_can_view(&resume, user)?;
        Ok(resume)
    }

    pub async fn list(
        &self,
        user: &UserProfile,
        scope: Scope,
        status: Option<ResumeStatus>,
    ) -> Result<Vec<ResumeSummary>, AppError> {
        let resumes = match scope {
            Scope::Mine => self.resumes.list_by_student(user.id).await?,
            Scope::Shared => self.resumes.list_by_shared_reviewer(user.id).await?,
        };
        Ok(resumes
            .iter()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .map(ResumeSummary::from)
            .collect())
    }

    pub async fn versions(
        &self,
        user: &UserProfile,
        id: Uuid,
    ) -> Result<Vec<ResumeVersion>, AppError> {
        self.get(user, id).await?;
        self.resumes.list_versions(id).await
    }

    // ── File lifecycle ─────────────────────────────────────────────────────

    async fn store_blob(&self, path: &str, bytes: Bytes) -> Result<String, AppError> {
        let progress = |fraction: f64| {
            debug!("Upload of {path}: {:.0}%", fraction * 100.0);
        };
        self.blobs
            .upload(path, bytes, PDF_CONTENT_TYPE, &progress)
            .await
    }

    fn validate(&self, file: &UploadedFile) -> Result<(), AppError> {
        validate_pdf(
            &file.file_name,
            file.content_type.as_deref(),
            &file.bytes,
            self.max_upload_bytes,
        )
    }

    /// Provisional record, then blob, then finalize. A failed blob upload removes the record.
    pub async fn upload(&self, user: &UserProfile, file: UploadedFile) -> Result<Resume, AppError> {
        if user.role != Role::Student {
            return Err(AppError::Forbidden(
                "Only students can upload resumes".to_string(),
            ));
        }
        self.validate(&file)?;

        let provisional = Resume::provisional(user.id, &user.name, &file.file_name, Utc::now());
        self.resumes.create(&provisional).await?;

        let path = resume_blob_path(
            provisional.id,
            provisional.version,
            Uuid::new_v4(),
            &file.file_name,
        );
        let url = match self.store_blob(&path, file.bytes).await {
            Ok(url) => url,
            Err(e) => {
                if let Err(cleanup) = self.resumes.delete(provisional.id).await {
                    warn!(
                        "Failed to remove provisional resume {} after upload error: {cleanup}",
                        provisional.id
                    );
                }
                return Err(e);
            }
        };

        // The provisional record can disappear while the blob is in flight
        // (account deletion, sweeper). The blob then has no owner left.
        let finalized = self
            .mutate(provisional.id, |r| {
                r.download_url = url.clone();
                r.storage_path = path.clone();
                r.upload_state = UploadState::Ready;
                Ok(())
            })
            .await;
        let (resume, ()) = match finalized {
            Ok(done) => done,
            Err(e) => {
                if let Err(cleanup) = self.blobs.delete(&path).await {
                    warn!("Failed to remove orphaned blob {path}: {cleanup}");
                }
                return Err(e);
            }
        };
        self.resumes.record_version(&ResumeVersion::of(&resume)).await?;

        info!(
            "Student {} uploaded resume {} ({})",
            user.id, resume.id, resume.file_name
        );
        Ok(resume)
    }

    /// Stores a new file version. Comments, status and sharing are kept.
    pub async fn replace_file(
        &self,
        user: &UserProfile,
        id: Uuid,
        file: UploadedFile,
    ) -> Result<Resume, AppError> {
        let current = self.load(id).await?;
        acl::ensure_owner(&current, user)?;
        if current.upload_state != UploadState::Ready {
            return Err(AppError::Conflict(format!(
                "Resume {id} is still uploading"
            )));
        }
        self.validate(&file)?;

        let next_version = current.version + 1;
        let path = resume_blob_path(id, next_version, Uuid::new_v4(), &file.file_name);
        let url = self.store_blob(&path, file.bytes).await?;
        let now = Utc::now();

        let result = self
            .mutate(id, |r| {
                acl::ensure_owner(r, user)?;
                if r.version + 1 != next_version {
                    return Err(AppError::Conflict(format!(
                        "Resume {id} was replaced concurrently"
                    )));
                }
                r.version = next_version;
                r.file_name = file.file_name.clone();
                r.download_url = url.clone();
                r.storage_path = path.clone();
                r.uploaded_at = now;
                Ok(())
            })
            .await;

        match result {
            Ok((resume, ())) => {
                self.resumes.record_version(&ResumeVersion::of(&resume)).await?;
                info!("Resume {id} replaced, now at version {}", resume.version);
                Ok(resume)
            }
            Err(e) => {
                if let Err(cleanup) = self.blobs.delete(&path).await {
                    warn!("Failed to remove orphaned blob {path}: {cleanup}");
                }
                Err(e)
            }
        }
    }

    pub async fn delete(&self, user: &UserProfile, id: Uuid) -> Result<(), AppError> {
        let resume = self.load(id).await?;
        acl::ensure_owner(&resume, user)?;
        self.remove(&resume).await
    }

    async fn remove(&self, resume: &Resume) -> Result<(), AppError> {
        self.resumes.delete(resume.id).await?;
        self.live.publish(ResumeChanged::deleted(resume)).await;

        if let Err(e) = self.blobs.delete_prefix(&resume_blob_prefix(resume.id)).await {
            warn!("Resume {} deleted but its files remain: {e}", resume.id);
        }
        info!("Deleted resume {}", resume.id);
        Ok(())
    }

    /// Removes every resume owned by a student whose account is going away,
    /// including uploads that have not finished yet.
    pub async fn delete_all_owned_by(&self, student_id: Uuid) -> Result<usize, AppError> {
        let owned: Vec<Resume> = self
            .resumes
            .list_involving(student_id)
            .await?
            .into_iter()
            .filter(|r| r.is_owned_by(student_id))
            .collect();
        for resume in &owned {
            self.remove(resume).await?;
        }
        Ok(owned.len())
    }

    /// Drops a reviewer from every access list that names them. Their comments stay.
    pub async fn revoke_everywhere(&self, reviewer_id: Uuid) -> Result<usize, AppError> {
        let shared: Vec<Resume> = self
            .resumes
            .list_involving(reviewer_id)
            .await?
            .into_iter()
            .filter(|r| r.is_shared_with(reviewer_id))
            .collect();
        for resume in &shared {
            let (_, removed) = self
                .mutate(resume.id, |r| Ok(acl::revoke(&mut r.shared_with_ids, reviewer_id)))
                .await?;
            if removed {
                self.publish_access_lost(resume, reviewer_id).await;
            }
        }
        Ok(shared.len())
    }

    /// Deletes provisional records (and any partial blobs) whose upload never finished.
    pub async fn sweep_stale_uploads(&self, older_than: DateTime<Utc>) -> Result<usize, AppError> {
        let stale = self.resumes.list_stale_uploads(older_than).await?;
        for resume in &stale {
            self.resumes.delete(resume.id).await?;
            if let Err(e) = self.blobs.delete_prefix(&resume_blob_prefix(resume.id)).await {
                warn!("Could not remove files of abandoned upload {}: {e}", resume.id);
            }
        }
        if !stale.is_empty() {
            info!("Swept {} abandoned uploads", stale.len());
        }
        Ok(stale.len())
    }

    // ── Status ─────────────────────────────────────────────────────────────

    pub async fn set_status(
        &self,
        user: &UserProfile,
        id: Uuid,
        status: ResumeStatus,
    ) -> Result<Resume, AppError> {
        let (resume, ()) = self
            .mutate(id, |r| {
                acl::ensure_can_view(r, user)?;
                r.status = status;
                Ok(())
            })
            .await?;
        info!("Resume {id} status set to {status} by {}", user.id);
        Ok(resume)
    }

    // ── Sharing ────────────────────────────────────────────────────────────

    pub async fn grant(
        &self,
        user: &UserProfile,
        id: Uuid,
        reviewer_ids: &[Uuid],
    ) -> Result<Resume, AppError> {
        if reviewer_ids.is_empty() {
            return Err(AppError::Validation(
                "reviewerIds cannot be empty".to_string(),
            ));
        }
        acl::ensure_owner(&self.load(id).await?, user)?;

        for reviewer_id in reviewer_ids {
            match self.profiles.get(*reviewer_id).await? {
                Some(p) if p.role == Role::Reviewer => {}
                _ => {
                    return Err(AppError::Validation(format!(
                        "{reviewer_id} is not a reviewer"
                    )))
                }
            }
        }

        let (resume, added) = self
            .mutate(id, |r| {
                acl::ensure_owner(r, user)?;
                Ok(acl::grant(&mut r.shared_with_ids, reviewer_ids))
            })
            .await?;
        info!("Resume {id} shared with {} new reviewer(s)", added.len());
        Ok(resume)
    }

    pub async fn revoke(
        &self,
        user: &UserProfile,
        id: Uuid,
        reviewer_id: Uuid,
    ) -> Result<Resume, AppError> {
        let (resume, removed) = self
            .mutate(id, |r| {
                acl::ensure_owner(r, user)?;
                Ok(acl::revoke(&mut r.shared_with_ids, reviewer_id))
            })
            .await?;
        if removed {
            info!("Revoked reviewer {reviewer_id} from resume {id}");
            self.publish_access_lost(&resume, reviewer_id).await;
        }
        Ok(resume)
    }

    /// Lets the revoked reviewer's open views notice they lost access.
    async fn publish_access_lost(&self, resume: &Resume, reviewer_id: Uuid) {
        let mut event = ResumeChanged::updated(resume);
        event.shared_with_ids = vec![reviewer_id];
        self.live.publish(event).await;
    }

    // ── Comments ───────────────────────────────────────────────────────────

    pub async fn add_comment(
        &self,
        user: &UserProfile,
        id: Uuid,
        text: &str,
        x: Option<f64>,
        y: Option<f64>,
    ) -> Result<Comment, AppError> {
        let position = comments::parse_position(x, y)?;
        let author = author_of(user);
        let (_, comment) = self
            .mutate(id, |r| {
                acl::ensure_can_comment(r, user)?;
                comments::add_comment(&mut r.comments, text, &author, position, Utc::now())
            })
            .await?;
        Ok(comment)
    }

    pub async fn add_reply(
        &self,
        user: &UserProfile,
        id: Uuid,
        comment_id: Uuid,
        text: &str,
    ) -> Result<Reply, AppError> {
        let author = author_of(user);
        let (_, reply) = self
            .mutate(id, |r| {
                acl::ensure_can_view(r, user)?;
                comments::add_reply(&mut r.comments, comment_id, text, &author, Utc::now())
            })
            .await?;
        Ok(reply)
    }

    /// Owner-only. An unknown comment id leaves the resume unchanged.
    pub async fn set_resolved(
        &self,
        user: &UserProfile,
        id: Uuid,
        comment_id: Uuid,
        resolved: bool,
    ) -> Result<Resume, AppError> {
        let (resume, matched) = self
            .mutate(id, |r| {
                acl::ensure_owner(r, user)?;
                Ok(comments::toggle_resolved(&mut r.comments, comment_id, resolved))
            })
            .await?;
        if !matched {
            debug!("Resolve on resume {id} named unknown comment {comment_id}");
        }
        Ok(resume)
    }

    /// Author-only.
    pub async fn edit_comment(
        &self,
        user: &UserProfile,
        id: Uuid,
        comment_id: Uuid,
        text: &str,
    ) -> Result<Comment, AppError> {
        let (_, comment) = self
            .mutate(id, |r| {
                acl::ensure_can_view(r, user)?;
                if comments::find(&r.comments, comment_id)?.author_id != user.id {
                    return Err(AppError::Forbidden(
                        "Only the author can edit a comment".to_string(),
                    ));
                }
                comments::edit_comment(&mut r.comments, comment_id, text)
            })
            .await?;
        Ok(comment)
    }

    /// Author or owning student. Deleting an unknown comment is a no-op.
    pub async fn delete_comment(
        &self,
        user: &UserProfile,
        id: Uuid,
        comment_id: Uuid,
    ) -> Result<(), AppError> {
        self.mutate(id, |r| {
            acl::ensure_can_view(r, user)?;
            if let Ok(existing) = comments::find(&r.comments, comment_id) {
                if existing.author_id != user.id && !r.is_owned_by(user.id) {
                    return Err(AppError::Forbidden(
                        "Only the author or the owner can delete a comment".to_string(),
                    ));
                }
            }
            Ok(comments::delete_comment(&mut r.comments, comment_id))
        })
        .await?;
        Ok(())
    }
}

fn author_of(user: &UserProfile) -> Author {
    Author {
        id: user.id,
        name: user.name.clone(),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
