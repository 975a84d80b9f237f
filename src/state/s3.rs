//! S3-based state storage backend.
//!
//! Keeps `state.json` and `state.lock` under an optional key prefix so a
//! team can share one state per environment.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use tracing::debug;

use crate::error::{Result, StateError};

use super::store::{Document, StateStore};

/// S3-based state store.
#[derive(Debug)]
pub struct S3StateStore {
    client: Client,
    bucket: String,
    /// Empty or ending in `/`.
    prefix: String,
}

/// Normalises a key prefix to `""` or `"a/b/"`.
fn normalize_prefix(prefix: Option<&str>) -> String {
    prefix
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .map(|p| format!("{p}/"))
        .unwrap_or_default()
}

impl S3StateStore {
    /// Creates a store using the ambient AWS configuration.
    pub async fn new(bucket: &str, prefix: Option<&str>, region: Option<&str>) -> Self {
        let mut loader = aws_config::from_env();
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region.to_string()));
        }
        Self::with_client(Client::new(&loader.load().await), bucket, prefix)
    }

    /// Creates a store with an existing client.
    #[must_use]
    pub fn with_client(client: Client, bucket: &str, prefix: Option<&str>) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: normalize_prefix(prefix),
        }
    }

    fn key(&self, doc: Document) -> String {
        object_key(&self.prefix, doc)
    }
}

fn object_key(prefix: &str, doc: Document) -> String {
    format!("{prefix}{}", doc.file_name())
}

#[async_trait]
impl StateStore for S3StateStore {
    async fn read_document(&self, doc: Document) -> Result<Option<String>> {
        let key = self.key(doc);
        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let service_err = e.into_service_error();
                if service_err.is_no_such_key() {
                    return Ok(None);
                }
                return Err(StateError::s3(format!("get {}: {service_err}", self.location(doc))).into());
            }
        };

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| StateError::s3(format!("read {}: {e}", self.location(doc))))?
            .into_bytes();

        String::from_utf8(bytes.to_vec())
            .map(Some)
            .map_err(|e| {
                StateError::Corrupted {
                    message: format!("{} is not UTF-8: {e}", self.location(doc)),
                }
                .into()
            })
    }

    async fn write_document(&self, doc: Document, content: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.key(doc))
            .body(ByteStream::from(content.as_bytes().to_vec()))
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| StateError::s3(format!("put {}: {e}", self.location(doc))))?;

        debug!("Wrote {} ({} bytes)", self.location(doc), content.len());
        Ok(())
    }

    async fn remove_document(&self, doc: Document) -> Result<()> {
        // S3 deletes of missing keys succeed.
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.key(doc))
            .send()
            .await
            .map_err(|e| StateError::s3(format!("delete {}: {e}", self.location(doc))))?;
        Ok(())
    }

    fn location(&self, doc: Document) -> String {
        format!("s3://{}/{}", self.bucket, self.key(doc))
    }

    fn backend_type(&self) -> &'static str {
        "s3"
    }
}
