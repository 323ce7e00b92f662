//! In-memory Job Store.
//!
//! Spec §4.A allows "a single-node implementation MAY use a local
//! transactional store" — this is that store. It also doubles as the fake
//! used by the other crates' unit tests so they don't need a live Postgres.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::CoreError;
use crate::model::{ContainerState, Job, UploadState};
use crate::store::JobStore;

#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: Job) -> Result<(), CoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(container_ref) = &job.container_ref {
            if jobs
                .values()
                .any(|j| j.container_ref.as_deref() == Some(container_ref.as_str()))
            {
                return Err(CoreError::Conflict(container_ref.clone()));
            }
        }
        jobs.insert(job.id, job);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Job, CoreError> {
        self.jobs
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(CoreError::NotFound(id))
    }

    async fn find_by_container_ref(&self, container_ref: &str) -> Result<Job, CoreError> {
        self.jobs
            .lock()
            .unwrap()
            .values()
            .find(|j| j.container_ref.as_deref() == Some(container_ref))
            .cloned()
            .ok_or(CoreError::NotFound(Uuid::nil()))
    }

    async fn update(
        &self,
        id: Uuid,
        mutator: Box<dyn FnOnce(Job) -> Result<Job, CoreError> + Send>,
    ) -> Result<Job, CoreError> {
        // Holding the mutex across `mutator` (a synchronous closure, never
        // `.await`ed) is the per-record exclusive guard: other jobs' updates
        // still block briefly on the map-wide lock, which is acceptable for
        // the single-node deployment this store targets.
        let mut jobs = self.jobs.lock().unwrap();
        let current = jobs.get(&id).cloned().ok_or(CoreError::NotFound(id))?;
        let updated = mutator(current)?;
        jobs.insert(id, updated.clone());
        Ok(updated)
    }

    async fn list_pending_upload(&self) -> Result<Vec<Job>, CoreError> {
        let jobs = self.jobs.lock().unwrap();
        let mut pending: Vec<Job> = jobs
            .values()
            .filter(|j| {
                j.container_state == ContainerState::Completed
                    && matches!(j.upload_state, UploadState::Pending | UploadState::Failed)
            })
            .cloned()
            .collect();
        pending.sort_by_key(|j| j.upload_state_updated);
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SubmissionMeta;

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

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = InMemoryJobStore::new();
        let job = Job::new("c1", "e1", "en", meta());
        let id = job.id;
        store.create(job).await.unwrap();
        let fetched = store.get(id).await.unwrap();
        assert_eq!(fetched.id, id);
    }

    #[tokio::test]
    async fn create_rejects_duplicate_container_ref() {
        let store = InMemoryJobStore::new();
        let mut a = Job::new("c1", "e1", "en", meta());
        a.container_ref = Some("grader-abc".into());
        let mut b = Job::new("c1", "e1", "en", meta());
        b.container_ref = Some("grader-abc".into());

        store.create(a).await.unwrap();
        let err = store.create(b).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn get_missing_job_is_not_found() {
        let store = InMemoryJobStore::new();
        let err = store.get(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }
}
