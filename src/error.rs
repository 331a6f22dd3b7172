//! Error types with codes and fix suggestions
//!
//! Error code ranges:
//! - WEIR-000-009: Registry errors
//! - WEIR-010-019: Dispatch errors (DAG/task lookup, run arguments)
//! - WEIR-020-039: Storage errors
//! - WEIR-040-049: Context and merge errors
//! - WEIR-050-059: Settings errors
//! - WEIR-060-069: Remote backend errors
//! - WEIR-070-079: Queue errors

use thiserror::Error;

pub type Result<T> = std::result::Result<T, WeirError>;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// All error variants are part of the public API.
#[derive(Error, Debug)]
pub enum WeirError {
    // ═══════════════════════════════════════════
    // REGISTRY ERRORS (000-009)
    // ═══════════════════════════════════════════
    #[error("[WEIR-001] {kind} with label '{label}' is already registered")]
    RegistryConflict { kind: &'static str, label: String },

    // ═══════════════════════════════════════════
    // DISPATCH ERRORS (010-019)
    // ═══════════════════════════════════════════
    #[error("[WEIR-010] DAG with label '{label}' was not found in registry")]
    DagNotFound { label: String },

    #[error("[WEIR-011] Task with label '{label}' was not found in registry")]
    TaskNotFound { label: String },

    #[error("[WEIR-012] Task '{task}' not found in DAG '{dag}' list of tasks")]
    TaskNotInDag { task: String, dag: String },

    #[error("[WEIR-013] Conflicting run arguments: {reason}")]
    ArgumentConflict { reason: String },

    /// A task body failed. Displays the task's own message, unchanged.
    #[error(transparent)]
    Task(anyhow::Error),

    // ═══════════════════════════════════════════
    // STORAGE ERRORS (020-039)
    // ═══════════════════════════════════════════
    #[error("[WEIR-020] File '{path}' does not exist")]
    FileNotFound { path: String },

    #[error("[WEIR-021] Path conflict at '{path}': {reason}")]
    PathConflict { path: String, reason: String },

    #[error("[WEIR-022] Invalid storage path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("[WEIR-023] Storage I/O error at '{path}': {source}")]
    StorageIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("[WEIR-024] Unknown storage backend '{name}'")]
    UnknownBackend { name: String },

    // ═══════════════════════════════════════════
    // CONTEXT / MERGE ERRORS (040-049)
    // ═══════════════════════════════════════════
    #[error("[WEIR-040] Cannot merge '{key}': {base} in base conflicts with {patch} in patch")]
    TypeConflict {
        key: String,
        base: &'static str,
        patch: &'static str,
    },

    #[error("[WEIR-041] Context is read-only: cannot write '{key}'")]
    ReadOnly { key: String },

    #[error("[WEIR-042] Invalid patch '{source_name}': {reason}")]
    InvalidPatch { source_name: String, reason: String },

    #[error("[WEIR-043] Context value at '{key}' has unexpected shape: {reason}")]
    ContextValue { key: String, reason: String },

    #[error("[WEIR-044] YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // ═══════════════════════════════════════════
    // SETTINGS ERRORS (050-059)
    // ═══════════════════════════════════════════
    #[error("[WEIR-050] Settings error: {reason}")]
    Settings { reason: String },

    #[error("[WEIR-051] Failed to parse settings: {0}")]
    SettingsParse(#[from] toml::de::Error),

    // ═══════════════════════════════════════════
    // REMOTE BACKEND ERRORS (060-069)
    // ═══════════════════════════════════════════
    #[error("[WEIR-060] Remote storage request failed for '{key}': {reason}")]
    Remote { key: String, reason: String },

    // ═══════════════════════════════════════════
    // QUEUE ERRORS (070-079)
    // ═══════════════════════════════════════════
    #[error("[WEIR-070] Queue error: {reason}")]
    Queue { reason: String },
}

impl WeirError {
    /// Get the error code (e.g., "WEIR-001")
    pub fn code(&self) -> &'static str {
        match self {
            Self::RegistryConflict { .. } => "WEIR-001",
            Self::DagNotFound { .. } => "WEIR-010",
            Self::TaskNotFound { .. } => "WEIR-011",
            Self::TaskNotInDag { .. } => "WEIR-012",
            Self::ArgumentConflict { .. } => "WEIR-013",
            Self::Task(_) => "WEIR-014",
            Self::FileNotFound { .. } => "WEIR-020",
            Self::PathConflict { .. } => "WEIR-021",
            Self::InvalidPath { .. } => "WEIR-022",
            Self::StorageIo { .. } => "WEIR-023",
            Self::UnknownBackend { .. } => "WEIR-024",
            Self::TypeConflict { .. } => "WEIR-040",
            Self::ReadOnly { .. } => "WEIR-041",
            Self::InvalidPatch { .. } => "WEIR-042",
            Self::ContextValue { .. } => "WEIR-043",
            Self::Yaml(_) => "WEIR-044",
            Self::Settings { .. } => "WEIR-050",
            Self::SettingsParse(_) => "WEIR-051",
            Self::Remote { .. } => "WEIR-060",
            Self::Queue { .. } => "WEIR-070",
        }
    }

    /// Lookup failures: unknown labels and missing files.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::DagNotFound { .. }
                | Self::TaskNotFound { .. }
                | Self::TaskNotInDag { .. }
                | Self::FileNotFound { .. }
        )
    }

    pub(crate) fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::StorageIo {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn conflict(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PathConflict {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl FixSuggestion for WeirError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            Self::RegistryConflict { .. } => Some("Pick a label that is unique across the process"),
            Self::DagNotFound { .. } => {
                Some("Register the DAG during bootstrap before dispatching it")
            }
            Self::TaskNotFound { .. } => Some("Register the task during bootstrap"),
            Self::TaskNotInDag { .. } => Some("Use a task label listed by the DAG"),
            Self::ArgumentConflict { .. } => Some("Set only one of `task` or `from_task`"),
            Self::Task(_) => None,
            Self::FileNotFound { .. } => Some("Check the path relative to the storage root"),
            Self::PathConflict { .. } => {
                Some("Pass `recursive`/`overwrite`, or drop the trailing separator for files")
            }
            Self::InvalidPath { .. } => Some("Use a root-relative path without '..' segments"),
            Self::StorageIo { .. } => Some("Check file permissions under the storage root"),
            Self::UnknownBackend { .. } => {
                Some("Use one of: local, memory, memory-bucket, gcs (or register a backend)")
            }
            Self::TypeConflict { .. } => Some("Patch values must keep the type of the base value"),
            Self::ReadOnly { .. } => Some("Build a new context with patches instead"),
            Self::InvalidPatch { .. } => Some("A patch must be a YAML mapping"),
            Self::ContextValue { .. } => Some("Check the value type in context.yaml"),
            Self::Yaml(_) => Some("Check YAML syntax: indentation and quoting"),
            Self::Settings { .. } => Some("Check the file named by WEIR_SETTINGS"),
            Self::SettingsParse(_) => Some("Check TOML syntax of the settings file"),
            Self::Remote { .. } => Some("Check bucket name, endpoint and credentials"),
            Self::Queue { .. } => Some("Check that the queue worker is running"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_conflict_code_and_display() {
        let err = WeirError::RegistryConflict {
            kind: "DAG",
            label: "daily".into(),
        };
        assert_eq!(err.code(), "WEIR-001");
        assert!(err.to_string().contains("[WEIR-001]"));
        assert!(err.to_string().contains("daily"));
    }

    #[test]
    fn task_error_is_transparent() {
        let err = WeirError::Task(anyhow::anyhow!("task exploded"));
        assert_eq!(err.to_string(), "task exploded");
        assert!(err.fix_suggestion().is_none());
    }

    #[test]
    fn not_found_family() {
        assert!(WeirError::DagNotFound { label: "x".into() }.is_not_found());
        assert!(WeirError::FileNotFound { path: "a".into() }.is_not_found());
        assert!(!WeirError::conflict("a/", "ends with separator").is_not_found());
    }

    #[test]
    fn every_variant_with_a_code_has_a_suggestion() {
        let err = WeirError::TypeConflict {
            key: "a".into(),
            base: "number",
            patch: "string",
        };
        assert_eq!(err.code(), "WEIR-040");
        assert!(err.fix_suggestion().is_some());
    }
}
