//! Run identity
//!
//! `run_id` is `YYYYMMDDTHHMMSS-<uuid4 hex>`: sortable by start time, and
//! the random suffix keeps concurrent runs started in the same second
//! apart. The run folder is `{runs_prefix}/{YYYY}/{MM}/{DD}/{run_id}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use uuid::Uuid;

use super::{Context, RESERVED_NAMESPACE};
use crate::storage::path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunIdentity {
    pub run_id: String,
    pub run_folder: String,
}

impl RunIdentity {
    pub fn generate(runs_prefix: &str) -> Self {
        Self::at(Utc::now(), runs_prefix)
    }

    pub fn at(started: DateTime<Utc>, runs_prefix: &str) -> Self {
        let run_id = format!(
            "{}-{}",
            started.format("%Y%m%dT%H%M%S"),
            Uuid::new_v4().simple()
        );
        let partition = format!("{}/{}", started.format("%Y/%m/%d"), run_id);
        Self {
            run_folder: path::join(runs_prefix, &partition),
            run_id,
        }
    }

    /// Identity stored in a context, if both keys are present
    pub fn of(context: &Context) -> Option<Self> {
        Some(Self {
            run_id: context.run_id()?.to_string(),
            run_folder: context.run_folder()?.to_string(),
        })
    }

    /// `{weir: {run_id, run_folder}}`, ready to merge last
    pub(crate) fn to_patch(&self) -> Value {
        let mut identity = Mapping::new();
        identity.insert("run_id".into(), self.run_id.clone().into());
        identity.insert("run_folder".into(), self.run_folder.clone().into());

        let mut patch = Mapping::new();
        patch.insert(RESERVED_NAMESPACE.into(), Value::Mapping(identity));
        Value::Mapping(patch)
    }
}
