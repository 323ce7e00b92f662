//! Central transition function (spec §9: "Callback-on-attribute-set for
//! state prep").
//!
//! Rather than stamping derived fields (`upload_state_updated`/
//! `upload_attempt`/`upload_at`) as a side effect wherever a field happens
//! to be assigned, one explicit function is the Job Store's `update`
//! mutator's only caller: it is the single point where derived fields are
//! computed, and the only place invariants
//! 1 and 2 (spec §3) are enforced.

use chrono::Utc;

use crate::error::CoreError;
use crate::model::{ContainerOutcome, ContainerState, Job, ResultPayload, Timing, UploadState};

/// One mutation applied to a Job under the Job Store's per-record guard.
pub enum JobTransition {
    /// Advance (or no-op re-apply) of `container_state`. `outcome`/`timing`
    /// are only meaningful when `to == Completed`.
    ContainerState {
        to: ContainerState,
        outcome: Option<ContainerOutcome>,
        timing: Option<Timing>,
    },
    /// Advance (or no-op re-apply) of `upload_state`.
    UploadState(UploadState),
    /// Record the HTTP status of an upload attempt.
    UploadCode(u16),
    /// Store a result payload delivered by the Callback Endpoint or
    /// synthesized for an EXPIRED job with no callback.
    ///
    /// `overwrite` governs whether an already-populated payload (e.g. a
    /// synthetic default written on EXPIRED) is replaced — see SPEC_FULL.md
    /// §D.2, "callback wins" is the default deployment choice but callers
    /// decide it explicitly here rather than this module silently picking.
    ResultPayload {
        payload: ResultPayload,
        overwrite: bool,
    },
}

/// Apply one `JobTransition` to `job`, enforcing spec §3 invariants 1–2 and
/// computing every derived field (`upload_state_updated`, `upload_attempt`,
/// `upload_at`). Returns `CoreError::InvariantViolation` for an illegal
/// transition; the caller (the Job Store's mutator) must not persist `job`
/// in that case.
pub fn apply_transition(job: &mut Job, transition: JobTransition) -> Result<(), CoreError> {
    match transition {
        JobTransition::ContainerState { to, outcome, timing } => {
            if to < job.container_state {
                return Err(CoreError::InvariantViolation(format!(
                    "container_state cannot move backward: {:?} -> {:?}",
                    job.container_state, to
                )));
            }
            if to == job.container_state {
                // Duplicate event for the same phase: no-op (spec §4.F idempotence).
                return Ok(());
            }
            job.container_state = to;
            if to == ContainerState::Completed {
                if let Some(outcome) = outcome {
                    job.container_outcome = Some(outcome);
                }
                if let Some(timing) = timing {
                    job.timing = timing;
                }
            }
            Ok(())
        }
        JobTransition::UploadState(to) => {
            if to == job.upload_state {
                return Ok(());
            }
            if !job.upload_state.can_transition_to(to) {
                return Err(CoreError::InvariantViolation(format!(
                    "upload_state cannot move {:?} -> {:?}",
                    job.upload_state, to
                )));
            }
            job.upload_state = to;
            job.upload_state_updated = Some(Utc::now());
            Ok(())
        }
        JobTransition::UploadCode(code) => {
            job.upload_code = Some(code);
            job.upload_attempt += 1;
            job.upload_at = Some(Utc::now());
            Ok(())
        }
        JobTransition::ResultPayload { payload, overwrite } => {
            if job.result_payload.is_some() && !overwrite {
                return Ok(());
            }
            job.result_payload = Some(payload);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContainerState::*, SubmissionMeta};

    fn fresh_job() -> Job {
        Job::new(
            "c1",
            "e1",
            "en",
            SubmissionMeta {
                uids: vec!["u1".into()],
                personalized_exercise: None,
                workspace_path: "/tmp/x".into(),
                upload_url: "http://lms.example/result".into(),
                attempt: 1,
                upload_url_defaulted: false,
            },
        )
    }

    #[test]
    fn container_state_advances_monotonically() {
        let mut job = fresh_job();
        apply_transition(
            &mut job,
            JobTransition::ContainerState {
                to: Ordered,
                outcome: None,
                timing: None,
            },
        )
        .unwrap();
        assert_eq!(job.container_state, Ordered);

        apply_transition(
            &mut job,
            JobTransition::ContainerState {
                to: Scheduled,
                outcome: None,
                timing: None,
            },
        )
        .unwrap();
        assert_eq!(job.container_state, Scheduled);
    }

    #[test]
    fn container_state_rejects_backward_transition() {
        let mut job = fresh_job();
        apply_transition(
            &mut job,
            JobTransition::ContainerState {
                to: Running,
                outcome: None,
                timing: None,
            },
        )
        .unwrap();

        let err = apply_transition(
            &mut job,
            JobTransition::ContainerState {
                to: Scheduled,
                outcome: None,
                timing: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::InvariantViolation(_)));
        assert_eq!(job.container_state, Running);
    }

    #[test]
    fn container_state_allows_skipping_forward() {
        let mut job = fresh_job();
        apply_transition(
            &mut job,
            JobTransition::ContainerState {
                to: Completed,
                outcome: Some(ContainerOutcome::Unknown),
                timing: None,
            },
        )
        .unwrap();
        assert_eq!(job.container_state, Completed);
        assert_eq!(job.container_outcome, Some(ContainerOutcome::Unknown));
    }

    #[test]
    fn duplicate_terminal_event_is_a_no_op() {
        let mut job = fresh_job();
        apply_transition(
            &mut job,
            JobTransition::ContainerState {
                to: Completed,
                outcome: Some(ContainerOutcome::Succeeded),
                timing: None,
            },
        )
        .unwrap();

        // Same phase delivered again (spec §8 invariant 6, scenario S5).
        apply_transition(
            &mut job,
            JobTransition::ContainerState {
                to: Completed,
                outcome: Some(ContainerOutcome::Crashed),
                timing: None,
            },
        )
        .unwrap();
        // The second (duplicate) delivery must not overwrite the outcome.
        assert_eq!(job.container_outcome, Some(ContainerOutcome::Succeeded));
    }

    #[test]
    fn upload_state_follows_allowed_edges() {
        let mut job = fresh_job();
        apply_transition(&mut job, JobTransition::UploadState(UploadState::Scheduled)).unwrap();
        assert_eq!(job.upload_state, UploadState::Scheduled);
        assert!(job.upload_state_updated.is_some());

        apply_transition(&mut job, JobTransition::UploadState(UploadState::Failed)).unwrap();
        assert_eq!(job.upload_state, UploadState::Failed);

        // FAILED may re-enter SCHEDULED.
        apply_transition(&mut job, JobTransition::UploadState(UploadState::Scheduled)).unwrap();
        assert_eq!(job.upload_state, UploadState::Scheduled);
    }

    #[test]
    fn upload_state_rejects_illegal_edge() {
        let mut job = fresh_job();
        let err =
            apply_transition(&mut job, JobTransition::UploadState(UploadState::Succeeded))
                .unwrap_err();
        assert!(matches!(err, CoreError::InvariantViolation(_)));
    }

    #[test]
    fn upload_code_increments_attempt_every_time() {
        let mut job = fresh_job();
        apply_transition(&mut job, JobTransition::UploadCode(503)).unwrap();
        apply_transition(&mut job, JobTransition::UploadCode(503)).unwrap();
        apply_transition(&mut job, JobTransition::UploadCode(200)).unwrap();
        assert_eq!(job.upload_attempt, 3);
        assert_eq!(job.upload_code, Some(200));
    }

    #[test]
    fn result_payload_respects_overwrite_flag() {
        let mut job = fresh_job();
        apply_transition(
            &mut job,
            JobTransition::ResultPayload {
                payload: ResultPayload::expired_default(),
                overwrite: false,
            },
        )
        .unwrap();

        let late_callback = ResultPayload {
            points: 8,
            max_points: 10,
            feedback: "ok".into(),
            error: false,
            grading_data: None,
        };

        // overwrite=false must not replace the synthetic default.
        apply_transition(
            &mut job,
            JobTransition::ResultPayload {
                payload: late_callback.clone(),
                overwrite: false,
            },
        )
        .unwrap();
        assert_eq!(job.result_payload.as_ref().unwrap().points, 0);

        // overwrite=true (callback wins, the default deployment choice) does.
        apply_transition(
            &mut job,
            JobTransition::ResultPayload {
                payload: late_callback,
                overwrite: true,
            },
        )
        .unwrap();
        assert_eq!(job.result_payload.as_ref().unwrap().points, 8);
    }
}
