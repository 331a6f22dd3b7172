//! Key paths into configuration trees
//!
//! Supports:
//! - a.b.c (dot notation)
//! - a.items[0].b (array index)
//! - a.items.0.b (numeric segment as index)

use serde_yaml::Value;

use crate::error::WeirError;

/// A parsed key path segment
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Mapping key access: .field
    Field(String),
    /// Sequence index access: [0]
    Index(usize),
}

/// Parse a dotted key path into segments
///
/// Examples:
/// - "weir.run_id" → [Field("weir"), Field("run_id")]
/// - "models[0].name" → [Field("models"), Index(0), Field("name")]
pub fn parse(path: &str) -> Result<Vec<Segment>, WeirError> {
    if path.is_empty() {
        return Ok(vec![]);
    }

    let invalid = |reason: &str| WeirError::ContextValue {
        key: path.to_string(),
        reason: reason.to_string(),
    };

    let mut segments = Vec::new();

    for part in path.split('.') {
        if part.is_empty() {
            return Err(invalid("empty path segment"));
        }

        if let Some(bracket_pos) = part.find('[') {
            let field = &part[..bracket_pos];
            if !field.is_empty() {
                segments.push(Segment::Field(field.to_string()));
            }

            if !part.ends_with(']') {
                return Err(invalid("unterminated index"));
            }

            let index: usize = part[bracket_pos + 1..part.len() - 1]
                .parse()
                .map_err(|_| invalid("index is not a number"))?;

            segments.push(Segment::Index(index));
        } else if let Ok(index) = part.parse::<usize>() {
            segments.push(Segment::Index(index));
        } else {
            segments.push(Segment::Field(part.to_string()));
        }
    }

    Ok(segments)
}

/// Walk segments down a tree, borrowing the final node
pub fn apply<'a>(value: &'a Value, segments: &[Segment]) -> Option<&'a Value> {
    let mut current = value;

    for segment in segments {
        current = match segment {
            Segment::Field(name) => current.get(name.as_str())?,
            Segment::Index(idx) => current.get(*idx)?,
        };
    }

    Some(current)
}

/// Parse and apply in one step
pub fn resolve<'a>(value: &'a Value, path: &str) -> Result<Option<&'a Value>, WeirError> {
    let segments = parse(path)?;
    Ok(apply(value, &segments))
}
