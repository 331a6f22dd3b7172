//! Process-wide settings
//!
//! Settings are read from a TOML document whose location comes from the
//! environment:
//!
//! 1. `WEIR_SETTINGS` (must point to an existing file)
//! 2. `weir.toml` in the working directory, if present
//! 3. Built-in defaults
//!
//! The document is loaded once on first access and cached for the process
//! lifetime. [`reset`] exists for test isolation only.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, WeirError};
use crate::util::LazyHolder;

/// Environment variable naming the settings document.
pub const SETTINGS_ENV: &str = "WEIR_SETTINGS";

/// Fallback settings file looked up in the working directory.
pub const DEFAULT_SETTINGS_FILE: &str = "weir.toml";

/// Environment variable holding a GCS bearer token.
pub const GCS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

/// Environment variables holding S3 credentials and region.
pub const S3_ACCESS_KEY_ENV: &str = "AWS_ACCESS_KEY_ID";
pub const S3_SECRET_KEY_ENV: &str = "AWS_SECRET_ACCESS_KEY";
pub const S3_REGION_ENV: &str = "AWS_REGION";

/// Main settings structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Storage backend identifier (local, memory, memory-bucket, gcs, s3)
    pub storage_backend: String,

    /// Prefix every storage path is resolved against
    pub storage_root: String,

    /// Base context document on the local filesystem
    pub context_path: Option<PathBuf>,

    /// Storage-root-relative folder holding run folders
    pub runs_prefix: String,

    /// Write `context.yaml` into the run folder before the first task
    pub persist_context: bool,

    /// Default tracing filter when RUST_LOG is unset
    pub log_level: String,

    pub gcs: GcsSettings,

    pub s3: S3Settings,

    pub queue: QueueSettings,

    /// Any other top-level key, available through [`Settings::get`]
    #[serde(flatten)]
    pub extra: BTreeMap<String, toml::Value>,
}

/// Google Cloud Storage backend settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GcsSettings {
    pub bucket: Option<String>,

    /// API endpoint; defaults to https://storage.googleapis.com
    pub endpoint: Option<String>,

    /// OAuth2 bearer token (`GOOGLE_OAUTH_ACCESS_TOKEN` takes precedence)
    pub token: Option<String>,
}

/// Amazon S3 (or S3-compatible) backend settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct S3Settings {
    pub bucket: Option<String>,

    pub region: String,

    /// Custom endpoint for S3-compatible stores; defaults to AWS for `region`
    pub endpoint: Option<String>,

    /// Address the bucket as a path segment instead of a subdomain
    pub path_style: bool,

    pub access_key_id: Option<String>,

    pub secret_access_key: Option<String>,
}

impl Default for S3Settings {
    fn default() -> Self {
        Self {
            bucket: None,
            region: "us-east-1".to_string(),
            endpoint: None,
            path_style: false,
            access_key_id: None,
            secret_access_key: None,
        }
    }
}

/// In-process queue settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueueSettings {
    /// Maximum number of pending jobs before `submit` waits
    pub capacity: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self { capacity: 64 }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            storage_backend: "local".to_string(),
            storage_root: "data".to_string(),
            context_path: None,
            runs_prefix: "runs".to_string(),
            persist_context: true,
            log_level: "info".to_string(),
            gcs: GcsSettings::default(),
            s3: S3Settings::default(),
            queue: QueueSettings::default(),
            extra: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Parse settings from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load settings from a file
    ///
    /// A relative `context_path` is resolved against the file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| WeirError::Settings {
            reason: format!("Failed to read settings file '{}': {}", path.display(), e),
        })?;

        let mut settings = Self::from_toml(&content)?;
        if let (Some(ctx), Some(dir)) = (settings.context_path.as_ref(), path.parent()) {
            if ctx.is_relative() {
                settings.context_path = Some(dir.join(ctx));
            }
        }
        Ok(settings.with_env())
    }

    /// Locate and load settings from the environment
    pub fn discover() -> Result<Self> {
        if let Some(path) = std::env::var_os(SETTINGS_ENV) {
            let path = PathBuf::from(path);
            debug!(path = %path.display(), "loading settings from {}", SETTINGS_ENV);
            if !path.exists() {
                return Err(WeirError::Settings {
                    reason: format!(
                        "{} points to '{}', which does not exist",
                        SETTINGS_ENV,
                        path.display()
                    ),
                });
            }
            return Self::load(path);
        }

        let fallback = Path::new(DEFAULT_SETTINGS_FILE);
        if fallback.exists() {
            debug!("loading settings from ./{}", DEFAULT_SETTINGS_FILE);
            return Self::load(fallback);
        }

        debug!("no settings file found, using defaults");
        Ok(Self::default().with_env())
    }

    /// Merge with environment variables
    ///
    /// Environment variables take precedence over file values.
    pub fn with_env(mut self) -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        if let Some(token) = var(GCS_TOKEN_ENV) {
            self.gcs.token = Some(token);
        }
        if let Some(key) = var(S3_ACCESS_KEY_ENV) {
            self.s3.access_key_id = Some(key);
        }
        if let Some(secret) = var(S3_SECRET_KEY_ENV) {
            self.s3.secret_access_key = Some(secret);
        }
        if let Some(region) = var(S3_REGION_ENV) {
            self.s3.region = region;
        }
        self
    }

    /// Typed access to a setting outside the known fields
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        self.extra
            .get(name)
            .map(|value| {
                value.clone().try_into().map_err(|e: toml::de::Error| WeirError::Settings {
                    reason: format!("Setting '{}' has unexpected type: {}", name, e),
                })
            })
            .transpose()
    }
}

// ═══════════════════════════════════════════════════════════════
// PROCESS-WIDE HOLDER
// ═══════════════════════════════════════════════════════════════

static SETTINGS: Lazy<LazyHolder<Settings>> = Lazy::new(|| LazyHolder::new(Settings::discover));

/// Get the process settings, loading them on first access
pub fn get() -> Result<Arc<Settings>> {
    SETTINGS.get()
}

/// Install explicit settings for this process
pub fn configure(settings: Settings) -> Arc<Settings> {
    SETTINGS.set(settings)
}

/// Whether settings were loaded or configured yet
pub fn is_loaded() -> bool {
    SETTINGS.is_initialized()
}

/// Forget cached settings. Test harnesses only.
pub fn reset() {
    SETTINGS.reset();
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serial_test::serial;
    use std::env;
    use tempfile::TempDir;

    #[test]
    fn defaults() {
        let settings = Settings::default();
        assert_eq!(settings.storage_backend, "local");
        assert_eq!(settings.runs_prefix, "runs");
        assert!(settings.persist_context);
        assert_eq!(settings.queue.capacity, 64);
    }

    #[test]
    fn parses_known_and_extra_keys() {
        let settings = Settings::from_toml(
            r#"
storage_backend = "memory"
storage_root = "/tmp/weir"
team = "forecasting"
max_rows = 1000

[gcs]
bucket = "artifacts"
"#,
        )
        .unwrap();

        assert_eq!(settings.storage_backend, "memory");
        assert_eq!(settings.gcs.bucket.as_deref(), Some("artifacts"));
        assert_eq!(settings.get::<String>("team").unwrap().as_deref(), Some("forecasting"));
        assert_eq!(settings.get::<i64>("max_rows").unwrap(), Some(1000));
        assert_eq!(settings.get::<String>("missing").unwrap(), None);
        assert!(settings.get::<bool>("team").is_err());
    }

    #[test]
    fn relative_context_path_resolves_against_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("weir.toml");
        fs::write(&path, "context_path = \"configs/context.yaml\"\n").unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(
            settings.context_path,
            Some(dir.path().join("configs/context.yaml"))
        );
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("weir.toml");
        fs::write(&path, "storage_backend = [").unwrap();
        assert!(matches!(
            Settings::load(&path),
            Err(WeirError::SettingsParse(_))
        ));
    }

    #[test]
    #[serial]
    fn discover_reads_env_named_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(&path, "storage_backend = \"memory\"\n").unwrap();

        env::set_var(SETTINGS_ENV, &path);
        let settings = Settings::discover();
        env::remove_var(SETTINGS_ENV);

        assert_eq!(settings.unwrap().storage_backend, "memory");
    }

    #[test]
    #[serial]
    fn discover_fails_on_missing_env_file() {
        env::set_var(SETTINGS_ENV, "/nonexistent/weir.toml");
        let settings = Settings::discover();
        env::remove_var(SETTINGS_ENV);

        assert!(matches!(settings, Err(WeirError::Settings { .. })));
    }

    #[test]
    #[serial]
    fn holder_loads_lazily_and_resets() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("weir.toml");
        fs::write(&path, "storage_backend = \"memory-bucket\"\n").unwrap();

        reset();
        assert!(!is_loaded());

        env::set_var(SETTINGS_ENV, &path);
        let loaded = get().unwrap();
        env::remove_var(SETTINGS_ENV);

        assert!(is_loaded());
        assert_eq!(loaded.storage_backend, "memory-bucket");

        configure(Settings::default());
        assert_eq!(get().unwrap().storage_backend, "local");

        reset();
        assert!(!is_loaded());
    }

    #[test]
    #[serial]
    fn env_token_overrides_file_token() {
        env::set_var(GCS_TOKEN_ENV, "from-env");
        let settings = Settings::from_toml("[gcs]\ntoken = \"from-file\"\n")
            .unwrap()
            .with_env();
        env::remove_var(GCS_TOKEN_ENV);

        assert_eq!(settings.gcs.token.as_deref(), Some("from-env"));
    }

    #[test]
    #[serial]
    fn s3_table_and_env_credentials() {
        env::set_var(S3_SECRET_KEY_ENV, "env-secret");
        env::remove_var(S3_ACCESS_KEY_ENV);
        env::remove_var(S3_REGION_ENV);
        let settings = Settings::from_toml(
            r#"
storage_backend = "s3"

[s3]
bucket = "artifacts"
endpoint = "http://localhost:9000"
path_style = true
access_key_id = "file-key"
"#,
        )
        .unwrap()
        .with_env();
        env::remove_var(S3_SECRET_KEY_ENV);

        assert_eq!(settings.s3.bucket.as_deref(), Some("artifacts"));
        assert_eq!(settings.s3.region, "us-east-1");
        assert!(settings.s3.path_style);
        assert_eq!(settings.s3.access_key_id.as_deref(), Some("file-key"));
        assert_eq!(settings.s3.secret_access_key.as_deref(), Some("env-secret"));
    }
}
