//! Root-relative storage paths
//!
//! Every backend receives paths relative to its storage root. A path is
//! split on [`SEPARATOR`]; empty and `.` segments are dropped and `..` is
//! rejected, so no path can escape the root. A trailing separator marks a
//! directory: such a path can never name a file.

use crate::error::{Result, WeirError};

/// Path separator shared by all built-in backends.
pub const SEPARATOR: char = '/';

/// A parsed, normalized storage path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePath {
    raw: String,
    segments: Vec<String>,
    trailing_separator: bool,
}

impl StoragePath {
    pub fn parse(raw: &str) -> Result<Self> {
        Ok(Self {
            raw: raw.to_string(),
            segments: split_segments(raw)?,
            trailing_separator: raw.ends_with(SEPARATOR),
        })
    }

    /// The path exactly as the caller wrote it
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// True when the path can only name a directory
    pub fn is_dir_only(&self) -> bool {
        self.trailing_separator || self.is_root()
    }

    /// Last segment, `None` at the root
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Parent directory (the root is its own parent)
    pub fn parent(&self) -> StoragePath {
        let mut segments = self.segments.clone();
        segments.pop();
        let raw = if segments.is_empty() {
            String::new()
        } else {
            format!("{}{}", segments.join("/"), SEPARATOR)
        };
        StoragePath {
            raw,
            segments,
            trailing_separator: true,
        }
    }

    /// Proper ancestors from the top down, root excluded
    pub fn ancestors(&self) -> impl Iterator<Item = &[String]> + '_ {
        (1..self.segments.len()).map(move |end| &self.segments[..end])
    }

    /// Normalized form without a trailing separator
    pub fn normalized(&self) -> String {
        self.segments.join("/")
    }
}

/// Split a path into clean segments
pub fn split_segments(raw: &str) -> Result<Vec<String>> {
    let mut segments = Vec::new();
    for part in raw.split(SEPARATOR) {
        match part {
            "" | "." => continue,
            ".." => {
                return Err(WeirError::InvalidPath {
                    path: raw.to_string(),
                    reason: "'..' segments are not allowed".to_string(),
                })
            }
            other => segments.push(other.to_string()),
        }
    }
    Ok(segments)
}

/// Join a directory path and a child name from a listing
pub fn join(parent: &str, child: &str) -> String {
    let parent = parent.trim_end_matches(SEPARATOR);
    let child = child.trim_start_matches(SEPARATOR);
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{parent}{SEPARATOR}{child}")
    }
}
