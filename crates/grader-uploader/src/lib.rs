//! Result Uploader (spec §4.G, §5): claims COMPLETED jobs off the Job
//! Store's pending-upload queue, renders feedback, and delivers it to the
//! upstream LMS — retrying transient failures with backoff and giving up on
//! permanent ones, then cleaning up the submission workspace on success.
//!
//! "At most one Uploader worker is active on a job at a time" (spec §5) is
//! enforced by this crate, not the Consumer or the Callback Endpoint:
//! `claim_for_dispatch` performs the PENDING/FAILED -> SCHEDULED transition
//! itself, inside the Job Store's per-record `update` guard, immediately
//! before dispatch. A second worker racing on the same job observes the
//! record already SCHEDULED under that same guard and backs off without
//! submitting a duplicate.

pub mod feedback;
pub mod sink;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use grader_core::{
    apply_transition, ContainerState, CoreError, Job, JobStore, JobTransition, UploadState,
};
use grader_workspace::SubmissionWorkspaces;

pub use feedback::{render_feedback, FeedbackError, RenderedFeedback};
pub use sink::{HttpResultSink, ResultSink, SinkError};

#[derive(Debug, Clone, Copy)]
pub struct UploaderConfig {
    /// Attempts (including the first) before a transient failure is
    /// abandoned and left in FAILED for an operator to notice.
    pub retry_ceiling: u32,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self { retry_ceiling: 8 }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error(transparent)]
    Store(#[from] CoreError),

    #[error(transparent)]
    Feedback(#[from] FeedbackError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// One pass over the store's pending-upload queue: claim and submit every
/// job whose backoff window has elapsed. `template_src` resolves the
/// per-exercise feedback template (an external, out-of-scope collaborator —
/// see spec §1 Non-goals).
pub async fn run_once(
    store: &dyn JobStore,
    sink: &dyn ResultSink,
    workspaces: &SubmissionWorkspaces,
    cfg: &UploaderConfig,
    template_src: impl Fn(&Job) -> String,
) -> Result<usize, CoreError> {
    let candidates = store.list_pending_upload().await?;
    let mut submitted = 0;

    for job in candidates {
        if !eligible_now(&job) {
            continue;
        }
        let template = template_src(&job);
        match process_job(store, sink, workspaces, cfg, &job, &template).await {
            Ok(true) => submitted += 1,
            Ok(false) => {} // lost the claim race to another Uploader worker, or not ready yet
            Err(e) => tracing::error!(job_id = %job.id, error = %e, "upload attempt failed"),
        }
    }

    Ok(submitted)
}

/// PENDING is only "not yet scheduled" — it still needs
/// `Job::ready_for_upload` (a result payload actually present) before this
/// worker bothers claiming it. FAILED additionally waits for its backoff
/// window.
fn eligible_now(job: &Job) -> bool {
    match job.upload_state {
        UploadState::Pending => job.ready_for_upload(),
        UploadState::Failed => {
            job.ready_for_upload()
                && job
                    .upload_state_updated
                    .map(|since| {
                        Utc::now().signed_duration_since(since).num_milliseconds() as u64
                            >= backoff_delay(job.upload_attempt).as_millis() as u64
                    })
                    .unwrap_or(true)
        }
        _ => false,
    }
}

/// Claim `job_id` for this worker: transition PENDING/FAILED -> SCHEDULED
/// under the Job Store's per-record guard, iff the record is still ready
/// and unclaimed by the time the guard is held. Returns `None` if another
/// worker already claimed it (or it was never actually ready), in which
/// case the caller must not submit anything.
async fn claim_for_dispatch(store: &dyn JobStore, job_id: uuid::Uuid) -> Result<Option<Job>, CoreError> {
    let claimed = Arc::new(AtomicBool::new(false));
    let claimed_flag = claimed.clone();

    let updated = store
        .update(
            job_id,
            Box::new(move |mut job: Job| {
                if job.ready_for_upload()
                    && matches!(job.upload_state, UploadState::Pending | UploadState::Failed)
                {
                    apply_transition(&mut job, JobTransition::UploadState(UploadState::Scheduled))?;
                    claimed_flag.store(true, Ordering::SeqCst);
                }
                Ok(job)
            }),
        )
        .await?;

    Ok(if claimed.load(Ordering::SeqCst) {
        Some(updated)
    } else {
        None
    })
}

/// Returns `Ok(true)` if this worker claimed and submitted the job,
/// `Ok(false)` if it lost the claim race (or the job was not actually ready)
/// and nothing was submitted.
async fn process_job(
    store: &dyn JobStore,
    sink: &dyn ResultSink,
    workspaces: &SubmissionWorkspaces,
    cfg: &UploaderConfig,
    job: &Job,
    template_src: &str,
) -> Result<bool, UploadError> {
    let Some(job) = claim_for_dispatch(store, job.id).await? else {
        return Ok(false);
    };
    let job = &job;

    let payload = job
        .result_payload
        .clone()
        .expect("claim_for_dispatch only claims COMPLETED jobs with a result payload");

    let rendered = render_feedback(template_src, &payload)?;
    if rendered.used_alert_fallback() {
        tracing::warn!(job_id = %job.id, missing = ?rendered.missing_fields, "feedback template did not reference required fields");
    }

    let status = sink
        .submit(
            &job.submission_meta.upload_url,
            payload.points,
            payload.max_points,
            &rendered.body,
            payload.error,
        )
        .await?;

    let job_id = job.id;
    let attempt = job.upload_attempt;

    if (200..300).contains(&status) {
        store
            .update(
                job_id,
                Box::new(move |mut job: Job| {
                    apply_transition(&mut job, JobTransition::UploadCode(status))?;
                    apply_transition(&mut job, JobTransition::UploadState(UploadState::Succeeded))?;
                    Ok(job)
                }),
            )
            .await?;
        if let Err(e) = workspaces.delete(job_id).await {
            tracing::warn!(job_id = %job_id, error = %e, "failed to delete submission workspace after successful upload");
        }
        return Ok(true);
    }

    let transient = status == 408 || status == 429 || (500..600).contains(&status);
    let give_up = transient && attempt + 1 >= cfg.retry_ceiling;

    store
        .update(
            job_id,
            Box::new(move |mut job: Job| {
                apply_transition(&mut job, JobTransition::UploadCode(status))?;
                apply_transition(&mut job, JobTransition::UploadState(UploadState::Failed))?;
                if transient && !give_up {
                    apply_transition(&mut job, JobTransition::UploadState(UploadState::Scheduled))?;
                }
                Ok(job)
            }),
        )
        .await?;

    if !transient {
        tracing::warn!(job_id = %job_id, status, "upload rejected permanently, not retrying");
    } else if give_up {
        tracing::error!(job_id = %job_id, status, attempts = attempt + 1, "giving up on upload after exhausting retries");
    }

    Ok(true)
}

/// The nth retry's backoff delay, in the style of the Watcher's reconnect
/// backoff — an exponential schedule capped at five minutes.
fn backoff_delay(attempt: u32) -> Duration {
    let mut policy = backoff::ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_secs(2))
        .with_max_interval(Duration::from_secs(300))
        .with_max_elapsed_time(None)
        .build();

    let mut delay = Duration::from_secs(2);
    for _ in 0..=attempt {
        delay = backoff::backoff::Backoff::next_backoff(&mut policy).unwrap_or(delay);
    }
    delay
}
