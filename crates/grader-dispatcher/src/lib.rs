//! Cluster Dispatcher (spec §4.C): turns an ORDERED Job into a running
//! Kubernetes pod, or — if submission itself fails — a synthetic COMPLETED
//! event so the job does not hang forever waiting for a Watcher
//! notification that will never arrive.

pub mod label;
pub mod workload;

use std::sync::Arc;

use async_trait::async_trait;
use grader_core::{
    apply_transition, ContainerOutcome, ContainerState, CoreError, Job, JobStore, JobTransition,
};
use grader_eventbus::{EventMeta, EventPublisher, EventTimes, NormalizedEvent, WireContainerState};
use k8s_openapi::api::core::v1::Pod;
use kube::api::PostParams;
use kube::Api;
use uuid::Uuid;

pub use workload::{ClusterConfig, ExerciseContainerSpec};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("job store error: {0}")]
    Store(#[from] CoreError),

    #[error("cluster submission failed: {0}")]
    Cluster(String),
}

/// Thin seam over `kube::Api<Pod>` so the dispatch algorithm is testable
/// without a live cluster, the way `ob-workflow`'s engine sits on top of a
/// repository trait rather than talking to Postgres directly.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn submit(&self, pod: Pod) -> Result<String, DispatchError>;
}

pub struct KubeClusterClient {
    api: Api<Pod>,
}

impl KubeClusterClient {
    pub fn new(client: kube::Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn submit(&self, pod: Pod) -> Result<String, DispatchError> {
        let created = self
            .api
            .create(&PostParams::default(), &pod)
            .await
            .map_err(|e| DispatchError::Cluster(e.to_string()))?;
        created
            .metadata
            .name
            .ok_or_else(|| DispatchError::Cluster("created pod has no name".into()))
    }
}

pub struct ClusterDispatcher {
    client: Arc<dyn ClusterClient>,
    cluster: ClusterConfig,
}

impl ClusterDispatcher {
    pub fn new(client: Arc<dyn ClusterClient>, cluster: ClusterConfig) -> Self {
        Self { client, cluster }
    }

    /// Submit `job` to the cluster, advancing it to ORDERED on success.
    /// On cluster failure, mark it COMPLETED/UNKNOWN and publish a
    /// synthetic terminal event so downstream stages treat it exactly like
    /// a pod that ran and crashed, rather than special-casing
    /// "never scheduled" everywhere else (spec §4.C Non-goals note:
    /// dispatch failures are surfaced, not silently retried, unless
    /// `dispatch.auto_retry_on_failure` is set — see SPEC_FULL.md §D.1).
    pub async fn dispatch(
        &self,
        store: &dyn JobStore,
        publisher: &dyn EventPublisher,
        job_id: Uuid,
        exercise: &ExerciseContainerSpec,
    ) -> Result<(), DispatchError> {
        let job = store.get(job_id).await?;
        let container_name = format!("grader-{}", job_id.simple());
        let pod = workload::build_pod(&container_name, &job, exercise, &self.cluster);

        match self.client.submit(pod).await {
            Ok(name) => {
                store
                    .update(
                        job_id,
                        Box::new(move |mut job: Job| {
                            job.container_ref = Some(name);
                            apply_transition(
                                &mut job,
                                JobTransition::ContainerState {
                                    to: ContainerState::Ordered,
                                    outcome: None,
                                    timing: None,
                                },
                            )?;
                            Ok(job)
                        }),
                    )
                    .await?;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "cluster submission failed, marking job completed/unknown");
                let fallback_ref = container_name.clone();
                store
                    .update(
                        job_id,
                        Box::new(move |mut job: Job| {
                            job.container_ref.get_or_insert(fallback_ref);
                            apply_transition(
                                &mut job,
                                JobTransition::ContainerState {
                                    to: ContainerState::Completed,
                                    outcome: Some(ContainerOutcome::Unknown),
                                    timing: None,
                                },
                            )?;
                            Ok(job)
                        }),
                    )
                    .await?;

                let event = NormalizedEvent {
                    state: WireContainerState::Completed,
                    meta: EventMeta {
                        phase: "Failed".into(),
                        reason: Some("synthetic".into()),
                        pod_name: container_name.clone(),
                        pod_id: container_name,
                        outcome: Some(grader_eventbus::WireOutcome::Unknown),
                    },
                    times: EventTimes::default(),
                };
                let _ = publisher.publish(&event).await;

                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grader_core::{InMemoryJobStore, SubmissionMeta};
    use grader_eventbus::InMemoryEventBus;

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

    struct AlwaysSucceeds;
    #[async_trait]
    impl ClusterClient for AlwaysSucceeds {
        async fn submit(&self, pod: Pod) -> Result<String, DispatchError> {
            Ok(pod.metadata.name.unwrap())
        }
    }

    struct AlwaysFails;
    #[async_trait]
    impl ClusterClient for AlwaysFails {
        async fn submit(&self, _pod: Pod) -> Result<String, DispatchError> {
            Err(DispatchError::Cluster("no nodes available".into()))
        }
    }

    fn cluster() -> ClusterConfig {
        ClusterConfig {
            namespace: "grader".into(),
            image_puller_base_url: "https://fetch.example".into(),
            constant_environment_node_selector: Default::default(),
            constant_environment_toleration_key: "grader.aplus.io/dedicated".into(),
            default_cpu_limit: "1".into(),
            default_memory_limit: "1Gi".into(),
            default_memory_request: "128Mi".into(),
            grader_name: "aplus-manager".into(),
        }
    }

    #[tokio::test]
    async fn success_advances_job_to_ordered_with_container_ref() {
        let store = InMemoryJobStore::new();
        let bus = InMemoryEventBus::new();
        let job = Job::new("c1", "e1", "en", meta());
        let job_id = job.id;
        store.create(job).await.unwrap();

        let dispatcher = ClusterDispatcher::new(Arc::new(AlwaysSucceeds), cluster());
        dispatcher
            .dispatch(&store, &bus, job_id, &ExerciseContainerSpec::default())
            .await
            .unwrap();

        let updated = store.get(job_id).await.unwrap();
        assert_eq!(updated.container_state, ContainerState::Ordered);
        assert!(updated.container_ref.is_some());
    }

    #[tokio::test]
    async fn failure_marks_completed_unknown_and_publishes_synthetic_event() {
        let store = InMemoryJobStore::new();
        let bus = InMemoryEventBus::new();
        let job = Job::new("c1", "e1", "en", meta());
        let job_id = job.id;
        store.create(job).await.unwrap();

        let dispatcher = ClusterDispatcher::new(Arc::new(AlwaysFails), cluster());
        let result = dispatcher
            .dispatch(&store, &bus, job_id, &ExerciseContainerSpec::default())
            .await;
        assert!(result.is_err());

        let updated = store.get(job_id).await.unwrap();
        assert_eq!(updated.container_state, ContainerState::Completed);
        assert_eq!(updated.container_outcome, Some(ContainerOutcome::Unknown));

        let delivery = bus.receive().await.unwrap().unwrap();
        assert!(delivery.event().is_synthetic());
    }
}
