//! Blob storage for uploaded resume files.

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use crate::errors::AppError;

#[cfg(test)]
pub mod memory;
pub mod s3;
pub mod validation;

pub use s3::S3BlobStore;

/// Receives the uploaded fraction (0.0 to 1.0) as transfer proceeds.
pub type ProgressFn<'a> = &'a (dyn Fn(f64) + Send + Sync);

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `bytes` at `path` and returns a retrievable URL.
    async fn upload(
        &self,
        path: &str,
        bytes: Bytes,
        content_type: &str,
        progress: ProgressFn<'_>,
    ) -> Result<String, AppError>;

    async fn delete(&self, path: &str) -> Result<(), AppError>;

    /// Removes every object stored under `prefix`.
    async fn delete_prefix(&self, prefix: &str) -> Result<(), AppError>;
}

/// Blob key for one upload of one file version. `upload_id` keeps two uploads
/// racing for the same version from ever sharing a key.
pub fn resume_blob_path(
    resume_id: Uuid,
    version: i32,
    upload_id: Uuid,
    file_name: &str,
) -> String {
    format!(
        "{}v{version}/{upload_id}/{}",
        resume_blob_prefix(resume_id),
        sanitize_file_name(file_name)
    )
}

pub fn resume_blob_prefix(resume_id: Uuid) -> String {
    format!("resumes/{resume_id}/")
}

/// Keeps the name readable in URLs while dropping path separators and control characters.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "resume.pdf".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_path_layout() {
        let id = Uuid::nil();
        let upload = Uuid::new_v4();
        assert_eq!(
            resume_blob_path(id, 2, upload, "My Resume.pdf"),
            format!("resumes/{id}/v2/{upload}/My_Resume.pdf")
        );
    }

    #[test]
    fn test_uploads_of_same_version_and_name_get_distinct_keys() {
        let id = Uuid::new_v4();
        let first = resume_blob_path(id, 2, Uuid::new_v4(), "cv.pdf");
        let second = resume_blob_path(id, 2, Uuid::new_v4(), "cv.pdf");
        assert_ne!(first, second);
        assert!(first.starts_with(&resume_blob_prefix(id)));
    }

    #[test]
    fn test_sanitize_strips_directories() {
        assert_eq!(sanitize_file_name("../../etc/passwd.pdf"), "passwd.pdf");
        assert_eq!(sanitize_file_name("C:\\docs\\cv.pdf"), "cv.pdf");
        assert_eq!(sanitize_file_name("..."), "resume.pdf");
    }
}
