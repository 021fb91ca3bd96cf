//! In-process blob store used by tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;

use crate::errors::AppError;
use crate::storage::{BlobStore, ProgressFn};

#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<BTreeMap<String, Bytes>>,
    pub fail_uploads: AtomicBool,
    /// Hands control back to the scheduler mid-upload so concurrent callers interleave.
    pub yield_on_upload: AtomicBool,
}

impl MemoryBlobStore {
    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(
        &self,
        path: &str,
        bytes: Bytes,
        _content_type: &str,
        progress: ProgressFn<'_>,
    ) -> Result<String, AppError> {
        progress(0.0);
        if self.yield_on_upload.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(AppError::S3("simulated outage".to_string()));
        }
        self.objects.lock().unwrap().insert(path.to_string(), bytes);
        progress(1.0);
        Ok(format!("memory://{path}"))
    }

    async fn delete(&self, path: &str) -> Result<(), AppError> {
        self.objects.lock().unwrap().remove(path);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<(), AppError> {
        self.objects
            .lock()
            .unwrap()
            .retain(|key, _| !key.starts_with(prefix));
        Ok(())
    }
}
