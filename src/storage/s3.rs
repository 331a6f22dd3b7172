//! Amazon S3 bucket over presigned requests
//!
//! Every request is a SigV4 presigned URL sent through `reqwest`, so the
//! same client works against AWS and S3-compatible stores (MinIO, Ceph).
//! Without credentials requests go out unsigned, which suits public
//! buckets and local emulators.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Response, StatusCode};
use rusty_s3::actions::ListObjectsV2;
use rusty_s3::{Credentials, S3Action, UrlStyle};
use tracing::{debug, error};
use url::Url;

use super::blob::Bucket;
use crate::error::{Result, WeirError};
use crate::settings::Settings;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifetime of a presigned URL; each one is used immediately
const SIGNATURE_TTL: Duration = Duration::from_secs(300);

/// S3 caps a listing page at 1000 keys
const PAGE_SIZE: usize = 1000;

#[derive(Clone)]
pub struct S3Bucket {
    client: reqwest::Client,
    bucket: rusty_s3::Bucket,
    credentials: Option<Credentials>,
}

impl fmt::Debug for S3Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Bucket")
            .field("endpoint", &self.bucket.base_url().as_str())
            .field("bucket", &self.bucket.name())
            .field("credentials", &self.credentials.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl S3Bucket {
    pub fn new(
        endpoint: &str,
        bucket: impl Into<String>,
        region: impl Into<String>,
        path_style: bool,
        credentials: Option<Credentials>,
    ) -> Result<Self> {
        let endpoint = Url::parse(endpoint).map_err(|e| WeirError::Settings {
            reason: format!("Invalid S3 endpoint '{}': {}", endpoint, e),
        })?;
        let style = if path_style {
            UrlStyle::Path
        } else {
            UrlStyle::VirtualHost
        };
        let bucket = rusty_s3::Bucket::new(endpoint, style, bucket.into(), region.into())
            .map_err(|e| WeirError::Settings {
                reason: format!("Invalid S3 bucket: {}", e),
            })?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent("weir/0.1")
            .build()
            .map_err(|e| WeirError::Settings {
                reason: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            bucket,
            credentials,
        })
    }

    /// Build from the `[s3]` settings table; `bucket` is required
    ///
    /// Credentials are used only when both the key id and the secret are set.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let s3 = &settings.s3;
        let bucket = s3.bucket.clone().ok_or_else(|| WeirError::Settings {
            reason: "storage_backend is 's3' but [s3] bucket is not set".to_string(),
        })?;
        let endpoint = s3
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://s3.{}.amazonaws.com", s3.region));
        let credentials = match (&s3.access_key_id, &s3.secret_access_key) {
            (Some(key), Some(secret)) => Some(Credentials::new(key.clone(), secret.clone())),
            _ => None,
        };
        Self::new(&endpoint, bucket, s3.region.clone(), s3.path_style, credentials)
    }

    async fn send(&self, key: &str, request: reqwest::RequestBuilder) -> Result<Response> {
        request.send().await.map_err(|e| WeirError::Remote {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    async fn fail(key: &str, response: Response) -> WeirError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        error!(key, status = %status, body = %body, "S3 request failed");
        WeirError::Remote {
            key: key.to_string(),
            reason: format!("HTTP {}: {}", status, body),
        }
    }
}

#[async_trait]
impl Bucket for S3Bucket {
    fn backend(&self) -> &'static str {
        "s3"
    }

    fn name(&self) -> &str {
        self.bucket.name()
    }

    fn scheme(&self) -> &'static str {
        "s3"
    }

    async fn put(&self, key: &str, content: Bytes) -> Result<()> {
        let url = self
            .bucket
            .put_object(self.credentials.as_ref(), key)
            .sign(SIGNATURE_TTL);
        debug!(bucket = %self.bucket.name(), key, size = content.len(), "uploading object");

        let response = self.send(key, self.client.put(url).body(content)).await?;
        if !response.status().is_success() {
            return Err(Self::fail(key, response).await);
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let url = self
            .bucket
            .get_object(self.credentials.as_ref(), key)
            .sign(SIGNATURE_TTL);

        let response = self.send(key, self.client.get(url)).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                response.bytes().await.map(Some).map_err(|e| WeirError::Remote {
                    key: key.to_string(),
                    reason: e.to_string(),
                })
            }
            _ => Err(Self::fail(key, response).await),
        }
    }

    /// S3 answers 204 for a missing key, so existence is checked first
    async fn delete(&self, key: &str) -> Result<()> {
        if !self.exists(key).await? {
            return Err(WeirError::FileNotFound {
                path: key.to_string(),
            });
        }
        let url = self
            .bucket
            .delete_object(self.credentials.as_ref(), key)
            .sign(SIGNATURE_TTL);

        let response = self.send(key, self.client.delete(url)).await?;
        if !response.status().is_success() {
            return Err(Self::fail(key, response).await);
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let url = self
            .bucket
            .head_object(self.credentials.as_ref(), key)
            .sign(SIGNATURE_TTL);

        let response = self.send(key, self.client.head(url)).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            _ => Err(Self::fail(key, response).await),
        }
    }

    async fn list(&self, prefix: &str, limit: Option<usize>) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let remaining = limit.map(|l| l.saturating_sub(keys.len()));
            let page_size = remaining.map_or(PAGE_SIZE, |r| r.min(PAGE_SIZE));

            let mut action = self.bucket.list_objects_v2(self.credentials.as_ref());
            action.with_prefix(prefix);
            action.with_max_keys(page_size);
            if let Some(token) = &continuation {
                action.with_continuation_token(token.as_str());
            }
            let url = action.sign(SIGNATURE_TTL);

            let response = self.send(prefix, self.client.get(url)).await?;
            if !response.status().is_success() {
                return Err(Self::fail(prefix, response).await);
            }
            let text = response.text().await.map_err(|e| WeirError::Remote {
                key: prefix.to_string(),
                reason: e.to_string(),
            })?;
            let page = ListObjectsV2::parse_response(&text).map_err(|e| WeirError::Remote {
                key: prefix.to_string(),
                reason: format!("Failed to parse object listing: {}", e),
            })?;

            keys.extend(page.contents.into_iter().map(|object| object.key));
            if limit.is_some_and(|l| keys.len() >= l) {
                break;
            }
            match page.next_continuation_token {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }

        keys.sort_unstable();
        if let Some(limit) = limit {
            keys.truncate(limit);
        }
        Ok(keys)
    }
}
