//! Completion Consumer (spec §4.F): the sink side of the Event Bus. Resolves
//! a normalized pod event to its Job, applies it under the Job Store's
//! per-record guard, and — for a terminal event whose outcome is not
//! SUCCEEDED — synthesizes the default failing result a callback will
//! never arrive to set (spec §7, scenario S2).
//!
//! This consumer only ever moves `container_state`/`result_payload`; it
//! never touches `upload_state`. A job reaching COMPLETED with a payload
//! present just sits at PENDING until the Uploader's own poll discovers it
//! and claims it (spec §5) — that claim is the sole place PENDING/FAILED
//! moves to SCHEDULED.

use grader_core::{
    apply_transition, ContainerOutcome, ContainerState, CoreError, Job, JobStore, JobTransition,
    ResultPayload, Timing,
};
use grader_eventbus::{Delivery, EventConsumer, NormalizedEvent, WireContainerState, WireOutcome};

/// Drives the consume loop: `receive` → resolve → apply → ack/nack.
/// A free function rather than a struct because it owns no state beyond
/// the store and bus it is given each call — there is nothing to
/// construct.
pub async fn run(store: &dyn JobStore, consumer: &dyn EventConsumer) {
    loop {
        let delivery = match consumer.receive().await {
            Ok(Some(delivery)) => delivery,
            Ok(None) => return, // bus drained for shutdown
            Err(e) => {
                tracing::error!(error = %e, "event bus receive failed");
                continue;
            }
        };

        match apply_delivery(store, delivery.event()).await {
            Ok(()) => {
                if let Err(e) = delivery.ack().await {
                    tracing::error!(error = %e, "failed to ack event");
                }
            }
            Err(ApplyError::UnknownJob(container_ref)) => {
                tracing::warn!(container_ref, "event for unknown container_ref, dropping");
                let _ = delivery.nack(false).await;
            }
            Err(ApplyError::Store(e)) => {
                tracing::error!(error = %e, "failed to apply event, will redeliver");
                let _ = delivery.nack(true).await;
            }
        }
    }
}

enum ApplyError {
    UnknownJob(String),
    Store(CoreError),
}

impl From<CoreError> for ApplyError {
    fn from(e: CoreError) -> Self {
        ApplyError::Store(e)
    }
}

async fn apply_delivery(store: &dyn JobStore, event: &NormalizedEvent) -> Result<(), ApplyError> {
    let job = match store.find_by_container_ref(event.container_ref()).await {
        Ok(job) => job,
        Err(CoreError::NotFound(_)) => {
            return Err(ApplyError::UnknownJob(event.container_ref().to_string()))
        }
        Err(e) => return Err(e.into()),
    };

    let job_id = job.id;
    let event = event.clone();

    store
        .update(
            job_id,
            Box::new(move |mut job: Job| {
                apply_event(&mut job, &event)?;
                Ok(job)
            }),
        )
        .await?;

    Ok(())
}

fn apply_event(job: &mut Job, event: &NormalizedEvent) -> Result<(), CoreError> {
    let to = match event.state {
        WireContainerState::Scheduled => ContainerState::Scheduled,
        WireContainerState::Running => ContainerState::Running,
        WireContainerState::Completed => ContainerState::Completed,
    };

    let outcome = event.meta.outcome.map(|o| match o {
        WireOutcome::Succeeded => ContainerOutcome::Succeeded,
        WireOutcome::Crashed => ContainerOutcome::Crashed,
        WireOutcome::Expired => ContainerOutcome::Expired,
        WireOutcome::Unknown => ContainerOutcome::Unknown,
    });

    let timing = if to == ContainerState::Completed {
        Some(Timing {
            started: event.times.started,
            init_start: event.times.init_start,
            init_end: event.times.init_end,
            main_start: event.times.main_start,
            main_end: event.times.main_end,
        })
    } else {
        None
    };

    apply_transition(
        job,
        JobTransition::ContainerState {
            to,
            outcome,
            timing,
        },
    )?;

    if to == ContainerState::Completed && outcome != Some(ContainerOutcome::Succeeded) {
        apply_transition(
            job,
            JobTransition::ResultPayload {
                payload: ResultPayload::expired_default(),
                overwrite: false,
            },
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use grader_core::{InMemoryJobStore, SubmissionMeta, UploadState};
    use grader_eventbus::{EventMeta, EventTimes, InMemoryEventBus};

    fn meta() -> SubmissionMeta {
        SubmissionMeta {
            uids: vec!["u1".into()],
            personalized_exercise: None,
            workspace_path: "/tmp/x".into(),
            upload_url: "http://lms.example/result".into(),
            attempt: 1,
            upload_url_defaulted: false,
        }
    }

    fn event(pod: &str, state: WireContainerState, outcome: Option<WireOutcome>) -> NormalizedEvent {
        NormalizedEvent {
            state,
            meta: EventMeta {
                phase: "x".into(),
                reason: None,
                pod_name: pod.into(),
                pod_id: pod.into(),
                outcome,
            },
            times: EventTimes::default(),
        }
    }

    #[tokio::test]
    async fn unknown_container_ref_is_dropped_not_retried() {
        use grader_eventbus::EventPublisher;

        let store = InMemoryJobStore::new();
        let bus = InMemoryEventBus::new();
        bus.publisher_handle()
            .publish(&event(
                "grader-ghost",
                WireContainerState::Running,
                None,
            ))
            .await
            .unwrap();

        // drive one iteration manually instead of the infinite `run` loop
        let delivery = bus.receive().await.unwrap().unwrap();
        match apply_delivery(&store, delivery.event()).await {
            Err(ApplyError::UnknownJob(_)) => {}
            _ => panic!("expected UnknownJob"),
        }
    }

    #[tokio::test]
    async fn crashed_outcome_synthesizes_default_result_and_leaves_upload_pending() {
        let store = InMemoryJobStore::new();
        let mut job = Job::new("c1", "e1", "en", meta());
        job.container_ref = Some("grader-x".into());
        apply_transition(
            &mut job,
            JobTransition::ContainerState {
                to: ContainerState::Ordered,
                outcome: None,
                timing: None,
            },
        )
        .unwrap();
        let job_id = job.id;
        store.create(job).await.unwrap();

        let ev = event(
            "grader-x",
            WireContainerState::Completed,
            Some(WireOutcome::Crashed),
        );
        apply_delivery(&store, &ev).await.unwrap();

        let updated = store.get(job_id).await.unwrap();
        assert_eq!(updated.container_state, ContainerState::Completed);
        assert_eq!(updated.container_outcome, Some(ContainerOutcome::Crashed));
        assert!(updated.result_payload.is_some());
        // Ready for upload, but still PENDING: claiming it is the
        // Uploader's job, not this consumer's.
        assert_eq!(updated.upload_state, UploadState::Pending);
    }

    #[tokio::test]
    async fn succeeded_outcome_without_callback_waits_for_result_payload() {
        let store = InMemoryJobStore::new();
        let mut job = Job::new("c1", "e1", "en", meta());
        job.container_ref = Some("grader-y".into());
        let job_id = job.id;
        store.create(job).await.unwrap();

        let ev = event(
            "grader-y",
            WireContainerState::Completed,
            Some(WireOutcome::Succeeded),
        );
        apply_delivery(&store, &ev).await.unwrap();

        let updated = store.get(job_id).await.unwrap();
        assert_eq!(updated.container_state, ContainerState::Completed);
        assert!(updated.result_payload.is_none());
        assert_eq!(updated.upload_state, UploadState::Pending);
    }

    #[tokio::test]
    async fn duplicate_completed_event_is_idempotent() {
        let store = InMemoryJobStore::new();
        let mut job = Job::new("c1", "e1", "en", meta());
        job.container_ref = Some("grader-z".into());
        let job_id = job.id;
        store.create(job).await.unwrap();

        let ev = event(
            "grader-z",
            WireContainerState::Completed,
            Some(WireOutcome::Crashed),
        );
        apply_delivery(&store, &ev).await.unwrap();
        apply_delivery(&store, &ev).await.unwrap();

        let updated = store.get(job_id).await.unwrap();
        assert_eq!(updated.container_outcome, Some(ContainerOutcome::Crashed));
    }
}
