use async_trait::async_trait;
use aws_config::timeout::TimeoutConfig;
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::errors::AppError;
use crate::storage::{BlobStore, ProgressFn};

/// S3 rejects multipart parts smaller than 5 MiB (except the last one).
const PART_SIZE: usize = 5 * 1024 * 1024;

/// Blob store backed by S3 or an S3-compatible server such as MinIO.
#[derive(Clone)]
pub struct S3BlobStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    public_url: String,
}

impl S3BlobStore {
    /// Constructs a client configured for MinIO (local) or AWS (production).
    pub async fn from_config(config: &Config) -> Self {
        let credentials = Credentials::new(
            &config.aws_access_key_id,
            &config.aws_secret_access_key,
            None,
            None,
            "reviewdesk-static",
        );

        let timeouts = TimeoutConfig::builder()
            .operation_timeout(config.request_timeout)
            .build();

        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.s3_region.clone()))
            .credentials_provider(credentials)
            .endpoint_url(&config.s3_endpoint)
            .timeout_config(timeouts)
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build();

        Self {
            client: aws_sdk_s3::Client::from_conf(s3_config),
            bucket: config.s3_bucket.clone(),
            public_url: config.s3_public_url.clone(),
        }
    }

    fn locator(&self, path: &str) -> String {
        format!("{}/{}", self.public_url, path)
    }

    async fn upload_multipart(
        &self,
        path: &str,
        bytes: Bytes,
        content_type: &str,
        progress: ProgressFn<'_>,
    ) -> Result<(), AppError> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(path)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| s3_error("create multipart upload", &e))?;

        let upload_id = created
            .upload_id()
            .ok_or_else(|| AppError::S3(format!("no upload id returned for {path}")))?
            .to_string();

        match self
            .upload_parts(path, &upload_id, &bytes, progress)
            .await
        {
            Ok(parts) => {
                self.client
                    .complete_multipart_upload()
                    .bucket(&self.bucket)
                    .key(path)
                    .upload_id(&upload_id)
                    .multipart_upload(
                        CompletedMultipartUpload::builder()
                            .set_parts(Some(parts))
                            .build(),
                    )
                    .send()
                    .await
                    .map_err(|e| s3_error("complete multipart upload", &e))?;
                Ok(())
            }
            Err(e) => {
                if let Err(abort) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(path)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(
                        "Failed to abort multipart upload {upload_id} for {path}: {}",
                        DisplayErrorContext(&abort)
                    );
                }
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        path: &str,
        upload_id: &str,
        bytes: &Bytes,
        progress: ProgressFn<'_>,
    ) -> Result<Vec<CompletedPart>, AppError> {
        let total = bytes.len();
        let mut parts = Vec::new();
        let mut offset = 0;
        let mut part_number = 1;

        while offset < total {
            let end = (offset + PART_SIZE).min(total);
            let chunk = bytes.slice(offset..end);

            let uploaded = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(path)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk))
                .send()
                .await
                .map_err(|e| s3_error("upload part", &e))?;

            parts.push(
                CompletedPart::builder()
                    .set_e_tag(uploaded.e_tag().map(String::from))
                    .part_number(part_number)
                    .build(),
            );

            offset = end;
            part_number += 1;
            progress(offset as f64 / total as f64);
            debug!("Uploaded part {} of {path} ({offset}/{total} bytes)", part_number - 1);
        }

        Ok(parts)
    }
}

fn s3_error<E>(action: &str, err: &E) -> AppError
where
    E: std::error::Error,
{
    AppError::S3(format!("{action} failed: {}", DisplayErrorContext(err)))
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn upload(
        &self,
        path: &str,
        bytes: Bytes,
        content_type: &str,
        progress: ProgressFn<'_>,
    ) -> Result<String, AppError> {
        let size = bytes.len();
        progress(0.0);

        if size > PART_SIZE {
            self.upload_multipart(path, bytes, content_type, progress)
                .await?;
        } else {
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(path)
                .body(ByteStream::from(bytes))
                .content_type(content_type)
                .send()
                .await
                .map_err(|e| s3_error("put object", &e))?;
            progress(1.0);
        }

        info!("Uploaded {size} bytes to s3://{}/{}", self.bucket, path);
        Ok(self.locator(path))
    }

    async fn delete(&self, path: &str) -> Result<(), AppError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| s3_error("delete object", &e))?;
        debug!("Deleted s3://{}/{}", self.bucket, path);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<(), AppError> {
        let mut continuation: Option<String> = None;
        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| s3_error("list objects", &e))?;

            for object in page.contents() {
                if let Some(key) = object.key() {
                    self.delete(key).await?;
                }
            }

            match page.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }
        Ok(())
    }
}
