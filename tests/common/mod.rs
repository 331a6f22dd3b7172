//! Shared fixtures: one of every storage backend, with fake GCS and S3 servers

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use percent_encoding::percent_decode_str;
use serde_json::json;
use tempfile::TempDir;
use weir::storage::{BlobStorage, GcsBucket, LocalStorage, MemoryBucket, MemoryStorage, S3Bucket};
use weir::Storage;
use wiremock::matchers::any;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// A backend plus whatever must stay alive while it is used
pub struct Fixture {
    pub name: &'static str,
    pub storage: Arc<dyn Storage>,
    _dir: Option<TempDir>,
    _server: Option<MockServer>,
}

pub fn local() -> Fixture {
    let dir = TempDir::new().unwrap();
    let storage = LocalStorage::new(dir.path().join("root")).unwrap();
    Fixture {
        name: "local",
        storage: Arc::new(storage),
        _dir: Some(dir),
        _server: None,
    }
}

pub fn memory() -> Fixture {
    Fixture {
        name: "memory",
        storage: Arc::new(MemoryStorage::new("/srv/root").unwrap()),
        _dir: None,
        _server: None,
    }
}

pub fn memory_bucket() -> Fixture {
    Fixture {
        name: "memory-bucket",
        storage: Arc::new(BlobStorage::new(MemoryBucket::new(), "root").unwrap()),
        _dir: None,
        _server: None,
    }
}

pub async fn gcs() -> Fixture {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(FakeGcs::default())
        .mount(&server)
        .await;
    let bucket = GcsBucket::new(&server.uri(), "test-bucket", Some("token".into())).unwrap();
    Fixture {
        name: "gcs",
        storage: Arc::new(BlobStorage::new(bucket, "root").unwrap()),
        _dir: None,
        _server: Some(server),
    }
}

pub async fn s3() -> Fixture {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(FakeS3::default())
        .mount(&server)
        .await;
    let bucket = S3Bucket::new(&server.uri(), "test-bucket", "us-east-1", true, None).unwrap();
    Fixture {
        name: "s3",
        storage: Arc::new(BlobStorage::new(bucket, "root").unwrap()),
        _dir: None,
        _server: Some(server),
    }
}

pub async fn all_backends() -> Vec<Fixture> {
    vec![local(), memory(), memory_bucket(), gcs().await, s3().await]
}

type Objects = Arc<Mutex<BTreeMap<String, Vec<u8>>>>;

fn query(request: &Request, name: &str) -> Option<String> {
    request
        .url
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

/// One page of keys under `prefix` starting at the numeric `offset` token
fn page(
    objects: &BTreeMap<String, Vec<u8>>,
    prefix: &str,
    offset: usize,
    max: usize,
) -> (Vec<String>, Option<String>) {
    let matching: Vec<&String> = objects.keys().filter(|k| k.starts_with(prefix)).collect();
    let keys = matching.iter().skip(offset).take(max).map(|k| k.to_string()).collect();
    let next = (offset + max < matching.len()).then(|| (offset + max).to_string());
    (keys, next)
}

// =============================================================================
// FAKE GCS JSON API
// =============================================================================

const OBJECTS_PREFIX: &str = "/storage/v1/b/test-bucket/o";
const UPLOAD_PATH: &str = "/upload/storage/v1/b/test-bucket/o";

/// In-memory stand-in for the GCS JSON API endpoints the bucket client uses
#[derive(Clone, Default)]
pub struct FakeGcs {
    objects: Objects,
}

impl FakeGcs {
    fn list(&self, request: &Request) -> ResponseTemplate {
        let prefix = query(request, "prefix").unwrap_or_default();
        let max = query(request, "maxResults").and_then(|m| m.parse().ok()).unwrap_or(1000);
        let offset = query(request, "pageToken").and_then(|t| t.parse().ok()).unwrap_or(0);
        let (keys, next) = page(&self.objects.lock(), &prefix, offset, max);

        let mut body = json!({ "kind": "storage#objects" });
        if !keys.is_empty() {
            body["items"] = keys.iter().map(|name| json!({ "name": name })).collect();
        }
        if let Some(token) = next {
            body["nextPageToken"] = json!(token);
        }
        ResponseTemplate::new(200).set_body_json(body)
    }
}

impl Respond for FakeGcs {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let path = request.url.path();
        let method = request.method.as_str();

        if method == "POST" && path == UPLOAD_PATH {
            let Some(name) = query(request, "name") else {
                return ResponseTemplate::new(400);
            };
            self.objects.lock().insert(name.clone(), request.body.clone());
            return ResponseTemplate::new(200).set_body_json(json!({ "name": name }));
        }

        if method == "GET" && path == OBJECTS_PREFIX {
            return self.list(request);
        }

        let Some(encoded) = path.strip_prefix(OBJECTS_PREFIX).and_then(|p| p.strip_prefix('/'))
        else {
            return ResponseTemplate::new(404);
        };
        let name = percent_decode_str(encoded).decode_utf8_lossy().into_owned();
        let mut objects = self.objects.lock();

        match method {
            "GET" => match objects.get(&name) {
                Some(content) if query(request, "alt").as_deref() == Some("media") => {
                    ResponseTemplate::new(200).set_body_bytes(content.clone())
                }
                Some(content) => ResponseTemplate::new(200)
                    .set_body_json(json!({ "name": name, "size": content.len().to_string() })),
                None => ResponseTemplate::new(404),
            },
            "DELETE" => match objects.remove(&name) {
                Some(_) => ResponseTemplate::new(204),
                None => ResponseTemplate::new(404),
            },
            _ => ResponseTemplate::new(405),
        }
    }
}

// =============================================================================
// FAKE S3 (PATH-STYLE)
// =============================================================================

const S3_BUCKET_PATH: &str = "/test-bucket";

/// In-memory stand-in for the S3 REST calls the bucket client makes
///
/// Signatures are not checked. Deleting a missing key answers 204, as S3 does.
#[derive(Clone, Default)]
pub struct FakeS3 {
    objects: Objects,
}

impl FakeS3 {
    fn list(&self, request: &Request) -> ResponseTemplate {
        let prefix = query(request, "prefix").unwrap_or_default();
        let max = query(request, "max-keys").and_then(|m| m.parse().ok()).unwrap_or(1000);
        let offset = query(request, "continuation-token")
            .and_then(|t| t.parse().ok())
            .unwrap_or(0);
        let (keys, next) = page(&self.objects.lock(), &prefix, offset, max);

        let mut body = String::from(
            r#"<?xml version="1.0" encoding="UTF-8"?><ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">"#,
        );
        body.push_str(&format!(
            "<Name>test-bucket</Name><Prefix>{prefix}</Prefix><KeyCount>{}</KeyCount><MaxKeys>{max}</MaxKeys><IsTruncated>{}</IsTruncated>",
            keys.len(),
            next.is_some()
        ));
        for key in &keys {
            body.push_str(&format!(
                "<Contents><Key>{key}</Key><LastModified>2024-01-01T00:00:00.000Z</LastModified><ETag>\"0\"</ETag><Size>0</Size><StorageClass>STANDARD</StorageClass></Contents>"
            ));
        }
        if let Some(token) = next {
            body.push_str(&format!("<NextContinuationToken>{token}</NextContinuationToken>"));
        }
        body.push_str("</ListBucketResult>");
        ResponseTemplate::new(200).set_body_raw(body, "application/xml")
    }
}

impl Respond for FakeS3 {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let path = request.url.path();
        let method = request.method.as_str();

        if method == "GET"
            && (path == S3_BUCKET_PATH || path == format!("{S3_BUCKET_PATH}/"))
            && query(request, "list-type").is_some()
        {
            return self.list(request);
        }

        let Some(encoded) = path
            .strip_prefix(S3_BUCKET_PATH)
            .and_then(|p| p.strip_prefix('/'))
            .filter(|p| !p.is_empty())
        else {
            return ResponseTemplate::new(404);
        };
        let key = percent_decode_str(encoded).decode_utf8_lossy().into_owned();
        let mut objects = self.objects.lock();

        match method {
            "PUT" => {
                objects.insert(key, request.body.clone());
                ResponseTemplate::new(200)
            }
            "GET" => match objects.get(&key) {
                Some(content) => ResponseTemplate::new(200).set_body_bytes(content.clone()),
                None => ResponseTemplate::new(404),
            },
            "HEAD" if objects.contains_key(&key) => ResponseTemplate::new(200),
            "HEAD" => ResponseTemplate::new(404),
            "DELETE" => {
                objects.remove(&key);
                ResponseTemplate::new(204)
            }
            _ => ResponseTemplate::new(405),
        }
    }
}
