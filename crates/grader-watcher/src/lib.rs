//! Event Watcher (spec §4.D): a long-lived `kube::runtime::watcher` loop
//! over the grading namespace's pods, normalizing every phase transition
//! and publishing it to the Event Bus.
//!
//! Reconnection and the relist-on-`410 Gone` fallback are handled inside
//! `kube::runtime::watcher` itself; this module's own retry loop covers
//! the case where the watch stream ends entirely (connection reset,
//! apiserver restart), backing off between reconnect attempts the same
//! way a poll loop backs off between empty polls.

pub mod normalize;

use std::sync::Arc;
use std::time::Duration;

use grader_eventbus::EventPublisher;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::watcher::{self, Event};
use kube::{Api, Client};
use tokio::sync::watch;
use tokio_stream::StreamExt;

use normalize::normalize_pod;

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("kube watch error: {0}")]
    Kube(#[from] watcher::Error),
}

pub struct PodWatcher {
    client: Client,
    namespace: String,
}

impl PodWatcher {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    /// Run until `shutdown` is signalled. Each time the underlying stream
    /// ends (as opposed to yielding an error on an individual item, which
    /// `kube::runtime::watcher` already retries internally) this restarts
    /// it with exponential backoff.
    pub async fn run(
        &self,
        publisher: Arc<dyn EventPublisher>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let mut backoff = backoff::ExponentialBackoff {
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(30),
            max_elapsed_time: None,
            ..Default::default()
        };

        loop {
            if *shutdown.borrow() {
                return;
            }

            let stream = watcher::watcher(api.clone(), watcher::Config::default());
            tokio::pin!(stream);

            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                    next = stream.next() => {
                        match next {
                            Some(Ok(event)) => {
                                backoff.reset();
                                self.handle_event(event, &publisher).await;
                            }
                            Some(Err(e)) => {
                                tracing::warn!(error = %e, "pod watch stream item error");
                            }
                            None => {
                                let delay = backoff::backoff::Backoff::next_backoff(&mut backoff)
                                    .unwrap_or(Duration::from_secs(30));
                                tracing::warn!(?delay, "pod watch stream ended, reconnecting");
                                tokio::time::sleep(delay).await;
                                break;
                            }
                        }
                    }
                }
            }
        }
    }

    async fn handle_event(&self, event: Event<Pod>, publisher: &Arc<dyn EventPublisher>) {
        match event {
            Event::Applied(pod) => self.publish_if_normalized(&pod, publisher).await,
            Event::Restarted(pods) => {
                // Reconciliation-by-listing fallback: the relist kube hands
                // us after a resourceVersion gap. Each pod's current status
                // is republished so the Consumer's idempotent apply catches
                // the orchestrator back up.
                for pod in pods {
                    self.publish_if_normalized(&pod, publisher).await;
                }
            }
            Event::Deleted(_) => {}
        }
    }

    async fn publish_if_normalized(&self, pod: &Pod, publisher: &Arc<dyn EventPublisher>) {
        let Some(event) = normalize_pod(pod) else {
            return;
        };
        // Sequential await preserves per-pod ordering: this task is the
        // only publisher, so the order events leave `normalize_pod` is the
        // order they reach the bus (spec §8 invariant: per container_ref,
        // events arrive in emission order).
        if let Err(e) = publisher.publish(&event).await {
            tracing::error!(error = %e, pod = %event.container_ref(), "failed to publish pod event");
        }
    }
}
