//! Google Cloud Storage bucket over the JSON API
//!
//! Uses `storage/v1` for metadata, listing and deletes and the media
//! upload endpoint for writes. Authentication is an OAuth2 bearer token
//! taken from settings (`GOOGLE_OAUTH_ACCESS_TOKEN` wins); without one,
//! requests go out anonymously, which works for public buckets and local
//! emulators.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, error};
use url::Url;

use super::blob::Bucket;
use crate::error::{Result, WeirError};
use crate::settings::Settings;

pub const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Objects per listing page
const PAGE_SIZE: usize = 1000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectList {
    #[serde(default)]
    items: Vec<ObjectMeta>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectMeta {
    name: String,
}

#[derive(Clone)]
pub struct GcsBucket {
    client: reqwest::Client,
    endpoint: Url,
    bucket: String,
    token: Option<String>,
}

impl fmt::Debug for GcsBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcsBucket")
            .field("endpoint", &self.endpoint.as_str())
            .field("bucket", &self.bucket)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl GcsBucket {
    pub fn new(endpoint: &str, bucket: impl Into<String>, token: Option<String>) -> Result<Self> {
        let endpoint = Url::parse(endpoint).map_err(|e| WeirError::Settings {
            reason: format!("Invalid GCS endpoint '{}': {}", endpoint, e),
        })?;
        if endpoint.cannot_be_a_base() {
            return Err(WeirError::Settings {
                reason: format!("GCS endpoint '{}' cannot hold a path", endpoint),
            });
        }
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
            endpoint,
            bucket: bucket.into(),
            token,
        })
    }

    /// Build from the `[gcs]` settings table; `bucket` is required
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let bucket = settings.gcs.bucket.clone().ok_or_else(|| WeirError::Settings {
            reason: "storage_backend is 'gcs' but [gcs] bucket is not set".to_string(),
        })?;
        let endpoint = settings.gcs.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT);
        Self::new(endpoint, bucket, settings.gcs.token.clone())
    }

    /// Endpoint URL with extra path segments, each percent-encoded
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn object_url(&self, key: &str) -> Url {
        self.url(&["storage", "v1", "b", &self.bucket, "o", key])
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, key: &str, builder: RequestBuilder) -> Result<Response> {
        builder.send().await.map_err(|e| WeirError::Remote {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    async fn fail(key: &str, response: Response) -> WeirError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        error!(key, status = %status, body = %body, "GCS request failed");
        WeirError::Remote {
            key: key.to_string(),
            reason: format!("HTTP {}: {}", status, body),
        }
    }
}

#[async_trait]
impl Bucket for GcsBucket {
    fn backend(&self) -> &'static str {
        "gcs"
    }

    fn name(&self) -> &str {
        &self.bucket
    }

    fn scheme(&self) -> &'static str {
        "gs"
    }

    async fn put(&self, key: &str, content: Bytes) -> Result<()> {
        let mut url = self.url(&["upload", "storage", "v1", "b", &self.bucket, "o"]);
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", key);
        debug!(bucket = %self.bucket, key, size = content.len(), "uploading object");

        let builder = self
            .request(Method::POST, url)
            .header("Content-Type", "application/octet-stream")
            .body(content);
        let response = self.send(key, builder).await?;
        if !response.status().is_success() {
            return Err(Self::fail(key, response).await);
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let mut url = self.object_url(key);
        url.query_pairs_mut().append_pair("alt", "media");

        let response = self.send(key, self.request(Method::GET, url)).await?;
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

    async fn delete(&self, key: &str) -> Result<()> {
        let response = self
            .send(key, self.request(Method::DELETE, self.object_url(key)))
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(WeirError::FileNotFound {
                path: key.to_string(),
            }),
            status if status.is_success() => Ok(()),
            _ => Err(Self::fail(key, response).await),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let response = self
            .send(key, self.request(Method::GET, self.object_url(key)))
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            _ => Err(Self::fail(key, response).await),
        }
    }

    async fn list(&self, prefix: &str, limit: Option<usize>) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let remaining = limit.map(|l| l.saturating_sub(keys.len()));
            let page_size = remaining.map_or(PAGE_SIZE, |r| r.min(PAGE_SIZE));
            let mut url = self.url(&["storage", "v1", "b", &self.bucket, "o"]);
            {
                let mut query = url.query_pairs_mut();
                query
                    .append_pair("prefix", prefix)
                    .append_pair("maxResults", &page_size.to_string());
                if let Some(token) = &page_token {
                    query.append_pair("pageToken", token);
                }
            }

            let response = self.send(prefix, self.request(Method::GET, url)).await?;
            if !response.status().is_success() {
                return Err(Self::fail(prefix, response).await);
            }
            let page: ObjectList = response.json().await.map_err(|e| WeirError::Remote {
                key: prefix.to_string(),
                reason: format!("Failed to parse object listing: {}", e),
            })?;

            keys.extend(page.items.into_iter().map(|item| item.name));
            if limit.is_some_and(|l| keys.len() >= l) {
                break;
            }
            match page.next_page_token {
                Some(token) => page_token = Some(token),
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
