//! Display-name propagation.
//!
//! Author names are copied onto every resume, comment and reply, so a rename
//! has to rewrite each affected document. The work is recorded as a job with a
//! per-document ledger: each document is retried on its own, completed
//! documents are never redone, and unfinished jobs are picked up again after a
//! restart.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::rename::RenameJob;
use crate::models::user::UserProfile;
use crate::review::comments;
use crate::review::service::ReviewService;
use crate::store::{ProfileStore, RenameLedger};

const MAX_DOCUMENT_ATTEMPTS: u32 = 3;
const DOCUMENT_CONCURRENCY: usize = 4;
const RETRY_BASE_MS: u64 = 200;

#[derive(Clone)]
pub struct RenameService {
    review: ReviewService,
    profiles: Arc<dyn ProfileStore>,
    ledger: Arc<dyn RenameLedger>,
}

impl RenameService {
    pub fn new(
        review: ReviewService,
        profiles: Arc<dyn ProfileStore>,
        ledger: Arc<dyn RenameLedger>,
    ) -> Self {
        Self {
            review,
            profiles,
            ledger,
        }
    }

    /// Updates the profile and records the fan-out job. The caller decides
    /// whether to run the job inline or in the background.
    pub async fn start(&self, user: &UserProfile, new_name: &str) -> Result<RenameJob, AppError> {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(AppError::Validation("name cannot be empty".to_string()));
        }

        if !self.profiles.update_name(user.id, new_name).await? {
            return Err(AppError::not_found("User", user.id));
        }

        // Unfinished uploads are included so they do not finalize under the old name.
        let affected = self.review.resumes().list_involving(user.id).await?;
        let ids: Vec<Uuid> = affected.iter().map(|r| r.id).collect();

        let job = RenameJob::new(user.id, new_name, &ids, Utc::now());
        self.ledger.create_job(&job).await?;
        info!(
            "Rename job {} for user {} covers {} resume(s)",
            job.id,
            user.id,
            ids.len()
        );
        Ok(job)
    }

    pub async fn get(&self, user: &UserProfile, job_id: Uuid) -> Result<RenameJob, AppError> {
        match self.ledger.get_job(job_id).await? {
            Some(job) if job.user_id == user.id => Ok(job),
            _ => Err(AppError::not_found("Rename job", job_id)),
        }
    }

    /// Processes every pending document of a job and returns its final ledger state.
    pub async fn run(&self, job_id: Uuid) -> Result<RenameJob, AppError> {
        let job = self
            .ledger
            .get_job(job_id)
            .await?
            .ok_or_else(|| AppError::not_found("Rename job", job_id))?;

        let pending: Vec<Uuid> = job.pending().map(|d| d.resume_id).collect();
        let job = Arc::new(job);

        stream::iter(pending)
            .for_each_concurrent(DOCUMENT_CONCURRENCY, |resume_id| {
                let service = self.clone();
                let job = job.clone();
                async move {
                    service.process_document(&job, resume_id).await;
                }
            })
            .await;

        let job = self
            .ledger
            .get_job(job_id)
            .await?
            .ok_or_else(|| AppError::not_found("Rename job", job_id))?;

        if job.is_complete() {
            self.ledger.finish_job(job_id, Utc::now()).await?;
            info!("Rename job {job_id} finished");
        } else {
            warn!(
                "Rename job {job_id} left {} document(s) pending",
                job.pending().count()
            );
        }

        self.ledger
            .get_job(job_id)
            .await?
            .ok_or_else(|| AppError::not_found("Rename job", job_id))
    }

    /// Runs a job on the runtime without blocking the caller.
    pub fn spawn(&self, job_id: Uuid) {
        let service = self.clone();
        tokio::spawn(async move {
            if let Err(e) = service.run(job_id).await {
                error!("Rename job {job_id} failed: {e}");
            }
        });
    }

    /// Re-queues every job that did not finish, e.g. after a restart.
    pub async fn resume_unfinished(&self) -> Result<usize, AppError> {
        let jobs = self.ledger.list_unfinished().await?;
        for job in &jobs {
            self.spawn(job.id);
        }
        if !jobs.is_empty() {
            info!("Resumed {} unfinished rename job(s)", jobs.len());
        }
        Ok(jobs.len())
    }

    async fn process_document(&self, job: &RenameJob, resume_id: Uuid) {
        for attempt in 0..MAX_DOCUMENT_ATTEMPTS {
            if attempt > 0 {
                let delay = Duration::from_millis(RETRY_BASE_MS << (attempt - 1));
                tokio::time::sleep(delay).await;
            }

            let outcome = match self.apply(job, resume_id).await {
                // A deleted resume has nothing left to rename.
                Ok(()) | Err(AppError::NotFound(_)) => None,
                Err(e) => Some(e.to_string()),
            };

            if let Err(e) = self
                .ledger
                .record_attempt(job.id, resume_id, outcome.as_deref(), Utc::now())
                .await
            {
                error!("Could not record rename progress for resume {resume_id}: {e}");
                return;
            }

            match outcome {
                None => return,
                Some(msg) => warn!(
                    "Rename of resume {resume_id} (job {}) attempt {} failed: {msg}",
                    job.id,
                    attempt + 1
                ),
            }
        }
    }

    /// Writes the user's *current* profile name, not the job's, so a job that
    /// runs late (retry, restart) cannot roll back a newer rename.
    async fn apply(&self, job: &RenameJob, resume_id: Uuid) -> Result<(), AppError> {
        let user_id = job.user_id;
        let Some(profile) = self.profiles.get(user_id).await? else {
            debug!("User {user_id} is gone, nothing to rename on resume {resume_id}");
            return Ok(());
        };
        if profile.name != job.new_name {
            debug!(
                "Rename job {} superseded, writing current name for user {user_id}",
                job.id
            );
        }
        let new_name = profile.name.as_str();
        self.review
            .mutate(resume_id, |r| {
                if r.is_owned_by(user_id) {
                    r.student_name = new_name.to_string();
                }
                comments::rename_author(&mut r.comments, user_id, new_name);
                Ok(())
            })
            .await?;
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::service::tests::{pdf, Fixture};
    use crate::models::resume::Resume;
    use crate::models::user::Role;
    use crate::store::memory::MemoryRenameLedger;
    use crate::store::ResumeStore;
    use std::sync::atomic::Ordering;

    fn rename_service(f: &Fixture) -> RenameService {
        RenameService::new(
            f.service.clone(),
            f.profiles.clone(),
            Arc::new(MemoryRenameLedger::default()),
        )
    }

    #[tokio::test]
    async fn test_reviewer_rename_scenario() {
        let f = Fixture::new().await;
        let svc = rename_service(&f);
        let other = f.add_profile("Grace Hopper", Role::Reviewer).await;

        let first = f.shared_resume().await;
        let second = f.shared_resume().await;
        for resume in [&first, &second] {
            f.service
                .grant(&f.student, resume.id, &[other.id])
                .await
                .unwrap();
            let c = f
                .service
                .add_comment(&f.reviewer, resume.id, "Add metrics", None, None)
                .await
                .unwrap();
            f.service
                .add_reply(&f.student, resume.id, c.id, "Will do")
                .await
                .unwrap();
            f.service
                .add_reply(&f.reviewer, resume.id, c.id, "Thanks")
                .await
                .unwrap();
            f.service
                .add_comment(&other, resume.id, "Fix dates", None, None)
                .await
                .unwrap();
        }

        let job = svc.start(&f.reviewer, "Jonathan Smith").await.unwrap();
        assert_eq!(job.documents.len(), 2);
        let job = svc.run(job.id).await.unwrap();
        assert!(job.finished_at.is_some());

        for resume in [&first, &second] {
            let r = f.service.get(&f.student, resume.id).await.unwrap();
            assert_eq!(r.comments[0].author_name, "Jonathan Smith");
            assert_eq!(r.comments[0].replies[0].author_name, "Ada Student");
            assert_eq!(r.comments[0].replies[1].author_name, "Jonathan Smith");
            assert_eq!(r.comments[1].author_name, "Grace Hopper");
            assert_eq!(r.student_name, "Ada Student");
        }
        let profile = f.profiles.get(f.reviewer.id).await.unwrap().unwrap();
        assert_eq!(profile.name, "Jonathan Smith");
    }

    #[tokio::test]
    async fn test_student_rename_updates_owner_name_and_replies() {
        let f = Fixture::new().await;
        let svc = rename_service(&f);
        let resume = f.shared_resume().await;
        let c = f
            .service
            .add_comment(&f.reviewer, resume.id, "Add metrics", None, None)
            .await
            .unwrap();
        f.service
            .add_reply(&f.student, resume.id, c.id, "Will do")
            .await
            .unwrap();

        let job = svc.start(&f.student, "Ada Lovelace").await.unwrap();
        svc.run(job.id).await.unwrap();

        let r = f.service.get(&f.student, resume.id).await.unwrap();
        assert_eq!(r.student_name, "Ada Lovelace");
        assert_eq!(r.comments[0].replies[0].author_name, "Ada Lovelace");
        assert_eq!(r.comments[0].author_name, "John Smith");
    }

    #[tokio::test]
    async fn test_failed_document_stays_pending_then_completes_on_rerun() {
        let f = Fixture::new().await;
        let svc = rename_service(&f);
        let resume = f
            .service
            .upload(&f.student, pdf("cv.pdf"))
            .await
            .unwrap();

        let job = svc.start(&f.student, "Ada L").await.unwrap();
        // Every optimistic write of every attempt loses its race.
        f.resumes.fail_next_updates.store(
            (MAX_DOCUMENT_ATTEMPTS * crate::review::service::MAX_WRITE_ATTEMPTS) as usize,
            Ordering::SeqCst,
        );
        let job = svc.run(job.id).await.unwrap();
        assert!(job.finished_at.is_none());
        assert_eq!(job.documents[0].attempts, MAX_DOCUMENT_ATTEMPTS as i32);
        assert!(job.documents[0].last_error.is_some());

        let job = svc.run(job.id).await.unwrap();
        assert!(job.finished_at.is_some());
        let r = f.service.get(&f.student, resume.id).await.unwrap();
        assert_eq!(r.student_name, "Ada L");
    }

    #[tokio::test]
    async fn test_deleted_resume_counts_as_done() {
        let f = Fixture::new().await;
        let svc = rename_service(&f);
        let resume = f.shared_resume().await;
        let job = svc.start(&f.reviewer, "J. Smith").await.unwrap();
        f.service.delete(&f.student, resume.id).await.unwrap();

        let job = svc.run(job.id).await.unwrap();
        assert!(job.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_older_job_running_last_keeps_newest_name() {
        let f = Fixture::new().await;
        let svc = rename_service(&f);
        let resume = f.shared_resume().await;
        f.service
            .add_comment(&f.reviewer, resume.id, "Add metrics", None, None)
            .await
            .unwrap();

        let older = svc.start(&f.reviewer, "Johnny").await.unwrap();
        let newer = svc.start(&f.reviewer, "Jonathan Smith").await.unwrap();
        svc.run(newer.id).await.unwrap();
        let older = svc.run(older.id).await.unwrap();
        assert!(older.finished_at.is_some());

        let profile = f.profiles.get(f.reviewer.id).await.unwrap().unwrap();
        let r = f.service.get(&f.student, resume.id).await.unwrap();
        assert_eq!(profile.name, "Jonathan Smith");
        assert_eq!(r.comments[0].author_name, profile.name);
    }

    #[tokio::test]
    async fn test_rename_reaches_upload_still_in_flight() {
        let f = Fixture::new().await;
        let svc = rename_service(&f);
        let uploading = Resume::provisional(f.student.id, "Ada Student", "cv.pdf", Utc::now());
        f.resumes.insert_raw(uploading.clone(), Utc::now());

        let job = svc.start(&f.student, "Ada Lovelace").await.unwrap();
        assert_eq!(job.documents.len(), 1);
        svc.run(job.id).await.unwrap();

        let stored = f.resumes.get(uploading.id).await.unwrap().unwrap();
        assert_eq!(stored.student_name, "Ada Lovelace");
    }

    #[tokio::test]
    async fn test_blank_name_rejected_and_jobs_private() {
        let f = Fixture::new().await;
        let svc = rename_service(&f);
        assert!(matches!(
            svc.start(&f.student, "   ").await,
            Err(AppError::Validation(_))
        ));

        let job = svc.start(&f.student, "Ada").await.unwrap();
        assert!(svc.get(&f.student, job.id).await.is_ok());
        assert!(matches!(
            svc.get(&f.reviewer, job.id).await,
            Err(AppError::NotFound(_))
        ));
    }
}
