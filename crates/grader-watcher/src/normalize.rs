//! Pod phase normalization (spec §4.D): turn a Kubernetes `Pod` status
//! snapshot into the wire-format `NormalizedEvent`. `Succeeded` maps to
//! success, a `Failed` phase whose reason is `DeadlineExceeded` maps to an
//! expired run, and any other `Failed` maps to a crash.

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{ContainerStatus, Pod};

use grader_eventbus::{EventMeta, EventTimes, NormalizedEvent, WireContainerState, WireOutcome};

/// `None` means "nothing worth publishing yet" (e.g. the pod exists but
/// has not been scheduled to a node).
pub fn normalize_pod(pod: &Pod) -> Option<NormalizedEvent> {
    let name = pod.metadata.name.clone()?;
    let uid = pod.metadata.uid.clone().unwrap_or_else(|| name.clone());
    let status = pod.status.as_ref()?;
    let phase = status.phase.as_deref().unwrap_or("Unknown");

    let (state, outcome, reason) = match phase {
        "Succeeded" => (
            WireContainerState::Completed,
            Some(WireOutcome::Succeeded),
            None,
        ),
        "Failed" => {
            let reason = failure_reason(pod);
            let outcome = if reason.as_deref() == Some("DeadlineExceeded") {
                WireOutcome::Expired
            } else {
                WireOutcome::Crashed
            };
            (WireContainerState::Completed, Some(outcome), reason)
        }
        "Running" => (WireContainerState::Running, None, None),
        "Pending" if pod.spec.as_ref().and_then(|s| s.node_name.as_ref()).is_some() => {
            (WireContainerState::Scheduled, None, None)
        }
        _ => return None,
    };

    Some(NormalizedEvent {
        state,
        meta: EventMeta {
            phase: phase.to_string(),
            reason,
            pod_name: name,
            pod_id: uid,
            outcome,
        },
        times: extract_timing(pod),
    })
}

fn failure_reason(pod: &Pod) -> Option<String> {
    pod.status
        .as_ref()?
        .container_statuses
        .as_ref()?
        .iter()
        .find_map(|cs| cs.state.as_ref()?.terminated.as_ref()?.reason.clone())
}

fn extract_timing(pod: &Pod) -> EventTimes {
    let started = pod.status.as_ref().and_then(|s| s.start_time.clone()).map(|t| t.0);

    let init_statuses = pod
        .status
        .as_ref()
        .and_then(|s| s.init_container_statuses.as_deref())
        .unwrap_or(&[]);
    let main_statuses = pod
        .status
        .as_ref()
        .and_then(|s| s.container_statuses.as_deref())
        .unwrap_or(&[]);

    EventTimes {
        started,
        init_start: earliest_start(init_statuses),
        init_end: latest_end(init_statuses),
        main_start: earliest_start(main_statuses),
        main_end: latest_end(main_statuses),
    }
}

/// Earliest start time across every container in the list, whether it is
/// still running or has already terminated.
fn earliest_start(statuses: &[ContainerStatus]) -> Option<DateTime<Utc>> {
    statuses
        .iter()
        .filter_map(|cs| {
            let state = cs.state.as_ref()?;
            state
                .terminated
                .as_ref()
                .and_then(|t| t.started_at.as_ref())
                .or_else(|| state.running.as_ref().and_then(|r| r.started_at.as_ref()))
                .map(|t| t.0)
        })
        .min()
}

/// Latest end time across every container in the list. A container still
/// running has no `finished_at` yet, so it contributes "now" — the same
/// fallback the original watcher used when a job's duration was computed
/// while grading was still in progress.
fn latest_end(statuses: &[ContainerStatus]) -> Option<DateTime<Utc>> {
    let mut ends: Vec<DateTime<Utc>> = statuses
        .iter()
        .filter_map(|cs| {
            cs.state
                .as_ref()?
                .terminated
                .as_ref()?
                .finished_at
                .as_ref()
                .map(|t| t.0)
        })
        .collect();

    if statuses
        .iter()
        .any(|cs| cs.state.as_ref().is_some_and(|s| s.running.is_some()))
    {
        ends.push(Utc::now());
    }

    ends.into_iter().max()
}
