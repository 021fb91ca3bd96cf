//! Reviewer access list and per-operation permission checks.

use uuid::Uuid;

use crate::errors::AppError;
use crate::models::resume::Resume;
use crate::models::user::UserProfile;

/// Adds reviewer ids to the access list, skipping ones already present.
/// Returns the ids that were actually added.
pub fn grant(shared_with: &mut Vec<Uuid>, reviewer_ids: &[Uuid]) -> Vec<Uuid> {
    let mut added = Vec::new();
    for id in reviewer_ids {
        if !shared_with.contains(id) {
            shared_with.push(*id);
            added.push(*id);
        }
    }
    added
}

/// Removes one reviewer id. Revoking an absent id is a no-op.
pub fn revoke(shared_with: &mut Vec<Uuid>, reviewer_id: Uuid) -> bool {
    let before = shared_with.len();
    shared_with.retain(|id| *id != reviewer_id);
    shared_with.len() != before
}

pub fn can_view(resume: &Resume, user: &UserProfile) -> bool {
    resume.is_owned_by(user.id) || resume.is_shared_with(user.id)
}

pub fn ensure_can_view(resume: &Resume, user: &UserProfile) -> Result<(), AppError> {
    if can_view(resume, user) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "No access to resume {}",
            resume.id
        )))
    }
}

pub fn ensure_owner(resume: &Resume, user: &UserProfile) -> Result<(), AppError> {
    if resume.is_owned_by(user.id) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "Only the owning student can do this on resume {}",
            resume.id
        )))
    }
}

/// Top-level comments come from reviewers the resume is shared with.
pub fn ensure_can_comment(resume: &Resume, user: &UserProfile) -> Result<(), AppError> {
    if resume.is_shared_with(user.id) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "Only reviewers with access can comment on resume {}",
            resume.id
        )))
    }
}
