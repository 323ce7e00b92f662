//! Normalized pod event wire format (spec §6).
//!
//! This is the payload the Watcher publishes and the Completion Consumer
//! receives — independent of the transport (`lapin` or the in-process
//! fallback). Field names and nesting match the wire format verbatim so a
//! captured message can be replayed byte-for-byte in tests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WireContainerState {
    Scheduled,
    Running,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WireOutcome {
    Succeeded,
    Crashed,
    Expired,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMeta {
    pub phase: String,
    #[serde(default)]
    pub reason: Option<String>,
    pub pod_name: String,
    pub pod_id: String,
    #[serde(default)]
    pub outcome: Option<WireOutcome>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventTimes {
    #[serde(default)]
    pub started: Option<DateTime<Utc>>,
    #[serde(default)]
    pub init_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub init_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub main_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub main_end: Option<DateTime<Utc>>,
}

/// One Kubernetes pod phase transition, normalized by the Watcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub state: WireContainerState,
    pub meta: EventMeta,
    #[serde(default)]
    pub times: EventTimes,
}

impl NormalizedEvent {
    /// The Job Store lookup key: the cluster-assigned pod name, which the
    /// Dispatcher wrote as `container_ref` when it submitted the workload.
    pub fn container_ref(&self) -> &str {
        &self.meta.pod_name
    }

    /// AMQP `correlation_id` (spec §6): the pod's Kubernetes UID, distinct
    /// from `pod_name` because a crash-looped pod can be recreated under
    /// the same name.
    pub fn correlation_id(&self) -> &str {
        &self.meta.pod_id
    }

    pub fn is_synthetic(&self) -> bool {
        self.meta.reason.as_deref() == Some("synthetic")
    }
}
