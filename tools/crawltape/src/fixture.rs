use crate::types::{Attributes, ExtractionOutcome, FetchJob, ResultSnapshot};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Version written by this build. Any rewrite of an older fixture upgrades to it.
pub const FIXTURE_VERSION: u32 = 1;

/// Version tag given to fixtures written before versioning existed.
pub const LEGACY_VERSION: u32 = 0;

/// Persisted snapshot of one callback invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    pub version: u32,
    /// Text encoding in effect when the fixture was captured.
    pub encoding: String,
    pub worker_id: String,
    pub job: FetchJob,
    pub result: ResultSnapshot,
    pub attributes_before: Attributes,
    pub attributes_after: Attributes,
    pub outcome: ExtractionOutcome,
    /// Ids of the pipeline stages that ran after capture, in forward order.
    pub stages: Vec<String>,
    pub settings: BTreeMap<String, Value>,
}

impl Fixture {
    pub fn callback_name(&self) -> &str {
        self.job.callback_name()
    }

    pub fn is_legacy(&self) -> bool {
        self.version == LEGACY_VERSION
    }
}
