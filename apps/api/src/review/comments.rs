//! Comment and reply mutations over a resume's comment list.
//!
//! These functions are pure: the service reads the document, applies one of
//! them in memory and writes the document back with a revision check.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::comment::{Author, Comment, Position, Reply};

/// Returns `now`, or the smallest instant after `floor` if the clock has not moved past it.
fn stamp_after(now: DateTime<Utc>, floor: DateTime<Utc>) -> DateTime<Utc> {
    if now > floor {
        now
    } else {
        floor + Duration::microseconds(1)
    }
}

pub fn normalize_text(text: &str) -> Result<String, AppError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation("text cannot be empty".to_string()));
    }
    Ok(trimmed.to_string())
}

/// Both coordinates or neither.
pub fn parse_position(x: Option<f64>, y: Option<f64>) -> Result<Option<Position>, AppError> {
    match (x, y) {
        (Some(x), Some(y)) if x.is_finite() && y.is_finite() => Ok(Some(Position { x, y })),
        (Some(_), Some(_)) => Err(AppError::Validation(
            "position coordinates must be finite numbers".to_string(),
        )),
        (None, None) => Ok(None),
        _ => Err(AppError::Validation(
            "x and y must be supplied together".to_string(),
        )),
    }
}

/// Appends a new unresolved comment and returns a copy of it.
pub fn add_comment(
    comments: &mut Vec<Comment>,
    text: &str,
    author: &Author,
    position: Option<Position>,
    now: DateTime<Utc>,
) -> Result<Comment, AppError> {
    let comment = Comment {
        id: Uuid::new_v4(),
        text: normalize_text(text)?,
        author_id: author.id,
        author_name: author.name.clone(),
        created_at: now,
        resolved: false,
        replies: Vec::new(),
        x: position.map(|p| p.x),
        y: position.map(|p| p.y),
    };
    comments.push(comment.clone());
    Ok(comment)
}

/// Appends a reply under `comment_id`. An unknown comment is reported, not ignored.
pub fn add_reply(
    comments: &mut [Comment],
    comment_id: Uuid,
    text: &str,
    author: &Author,
    now: DateTime<Utc>,
) -> Result<Reply, AppError> {
    let text = normalize_text(text)?;
    let comment = find_mut(comments, comment_id)?;

    let floor = comment
        .replies
        .last()
        .map(|r| r.created_at)
        .unwrap_or(comment.created_at)
        .max(comment.created_at);

    let reply = Reply {
        id: Uuid::new_v4(),
        text,
        author_id: author.id,
        author_name: author.name.clone(),
        created_at: stamp_after(now, floor),
    };
    comment.replies.push(reply.clone());
    Ok(reply)
}

/// Sets the resolved flag. Returns whether a comment matched; an unknown id changes nothing.
pub fn toggle_resolved(comments: &mut [Comment], comment_id: Uuid, resolved: bool) -> bool {
    match comments.iter_mut().find(|c| c.id == comment_id) {
        Some(comment) => {
            comment.resolved = resolved;
            true
        }
        None => false,
    }
}

pub fn edit_comment(
    comments: &mut [Comment],
    comment_id: Uuid,
    new_text: &str,
) -> Result<Comment, AppError> {
    let text = normalize_text(new_text)?;
    let comment = find_mut(comments, comment_id)?;
    comment.text = text;
    Ok(comment.clone())
}

/// Removes a comment with its replies. Returns the removed comment, if any.
pub fn delete_comment(comments: &mut Vec<Comment>, comment_id: Uuid) -> Option<Comment> {
    let idx = comments.iter().position(|c| c.id == comment_id)?;
    Some(comments.remove(idx))
}

pub fn find(comments: &[Comment], comment_id: Uuid) -> Result<&Comment, AppError> {
    comments
        .iter()
        .find(|c| c.id == comment_id)
        .ok_or_else(|| AppError::not_found("Comment", comment_id))
}

fn find_mut(comments: &mut [Comment], comment_id: Uuid) -> Result<&mut Comment, AppError> {
    comments
        .iter_mut()
        .find(|c| c.id == comment_id)
        .ok_or_else(|| AppError::not_found("Comment", comment_id))
}

/// Rewrites the display name on every comment and reply authored by `author_id`.
/// Returns the number of entries changed.
pub fn rename_author(comments: &mut [Comment], author_id: Uuid, new_name: &str) -> usize {
    let mut changed = 0;
    for comment in comments.iter_mut() {
        if comment.author_id == author_id && comment.author_name != new_name {
            comment.author_name = new_name.to_string();
            changed += 1;
        }
        for reply in comment.replies.iter_mut() {
            if reply.author_id == author_id && reply.author_name != new_name {
                reply.author_name = new_name.to_string();
                changed += 1;
            }
        }
    }
    changed
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
