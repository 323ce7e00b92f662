//! Job model
//!
//! `Job` is the central entity of the orchestrator: a single grading
//! attempt with durable state. See spec §3 for the full data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of the cluster workload backing a Job.
///
/// Declaration order doubles as the allowed transition order: `derive(Ord)`
/// on a fieldless enum orders variants by position, so `a < b` here means
/// "a must not be reached after b" (spec §3 invariant 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContainerState {
    Created,
    Ordered,
    Scheduled,
    Running,
    Completed,
}

impl ContainerState {
    pub fn is_terminal(self) -> bool {
        self == ContainerState::Completed
    }
}

/// Normalized terminal status of a completed container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContainerOutcome {
    Succeeded,
    Crashed,
    Expired,
    Unknown,
}

/// State of delivering the grading outcome to the upstream LMS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UploadState {
    Pending,
    Scheduled,
    Succeeded,
    Failed,
}

impl UploadState {
    /// Whether `self -> next` is one of the allowed edges in spec §3
    /// invariant 2 (`PENDING -> SCHEDULED -> {SUCCEEDED|FAILED}`, with
    /// `FAILED` allowed to re-enter `SCHEDULED`).
    pub fn can_transition_to(self, next: UploadState) -> bool {
        use UploadState::*;
        matches!(
            (self, next),
            (Pending, Scheduled)
                | (Scheduled, Succeeded)
                | (Scheduled, Failed)
                | (Failed, Scheduled)
        )
    }
}

/// Structured record carried alongside a submission: learner identifiers,
/// optional personalized-variant reference, workspace path, upstream
/// result URL.
///
/// `attempt` and `upload_url_defaulted` are supplements pulled from the
/// original implementation's `ordinal_number` query parameter and its
/// `submission_url` fallback (see SPEC_FULL.md §B).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionMeta {
    pub uids: Vec<String>,
    pub personalized_exercise: Option<String>,
    pub workspace_path: String,
    pub upload_url: String,
    #[serde(default = "default_attempt")]
    pub attempt: u32,
    #[serde(default)]
    pub upload_url_defaulted: bool,
}

fn default_attempt() -> u32 {
    1
}

/// Timing record filled in by the Watcher from the terminal pod event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Timing {
    pub started: Option<DateTime<Utc>>,
    pub init_start: Option<DateTime<Utc>>,
    pub init_end: Option<DateTime<Utc>>,
    pub main_start: Option<DateTime<Utc>>,
    pub main_end: Option<DateTime<Utc>>,
}

/// Grading outcome, populated by the Container Callback Endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultPayload {
    pub points: i32,
    pub max_points: i32,
    pub feedback: String,
    #[serde(default)]
    pub error: bool,
    #[serde(default)]
    pub grading_data: Option<serde_json::Value>,
}

impl ResultPayload {
    /// The defaulted payload used when a job reaches outcome EXPIRED
    /// without a callback ever arriving (spec §7, scenario S2).
    pub fn expired_default() -> Self {
        Self {
            points: 0,
            max_points: 1,
            feedback: String::new(),
            error: true,
            grading_data: None,
        }
    }
}

/// The central Job entity (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub course_key: String,
    pub exercise_key: String,
    pub lang: String,
    pub submission_meta: SubmissionMeta,

    pub container_ref: Option<String>,
    pub container_state: ContainerState,
    pub container_outcome: Option<ContainerOutcome>,
    pub timing: Timing,

    pub result_payload: Option<ResultPayload>,

    pub upload_state: UploadState,
    pub upload_attempt: u32,
    pub upload_code: Option<u16>,
    pub upload_state_updated: Option<DateTime<Utc>>,
    pub upload_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Construct a freshly-intaken job in state CREATED.
    pub fn new(
        course_key: impl Into<String>,
        exercise_key: impl Into<String>,
        lang: impl Into<String>,
        submission_meta: SubmissionMeta,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            course_key: course_key.into(),
            exercise_key: exercise_key.into(),
            lang: lang.into(),
            submission_meta,
            container_ref: None,
            container_state: ContainerState::Created,
            container_outcome: None,
            timing: Timing::default(),
            result_payload: None,
            upload_state: UploadState::Pending,
            upload_attempt: 0,
            upload_code: None,
            upload_state_updated: None,
            upload_at: None,
            created_at: Utc::now(),
        }
    }

    /// Ready for upload per spec §3 invariant 4: COMPLETED and a result is
    /// present (either from the callback, or a synthetic default).
    pub fn ready_for_upload(&self) -> bool {
        self.container_state == ContainerState::Completed && self.result_payload.is_some()
    }
}
