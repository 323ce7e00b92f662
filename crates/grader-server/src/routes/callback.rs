//! Container Callback Endpoint (spec §4.H): `POST /container-post`.
//! Parses the container's own `error` field leniently — it arrives as the
//! string `"no"`/`"false"`/`"true"` rather than a JSON boolean.
//!
//! There is no shared secret here: the job's own `id` is the bearer token
//! the container was handed at dispatch time (SPEC_FULL.md §B), so the
//! Authorization header is simply required to name the same job the form
//! claims to be reporting on.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Form;
use grader_core::{CoreError, Job, JobTransition, ResultPayload};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::{bearer_job_id, TokenQuery};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CallbackForm {
    pub sid: Uuid,
    pub points: i32,
    pub max_points: i32,
    #[serde(default)]
    pub feedback: String,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub grading_data: Option<String>,
}

pub async fn container_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(token_query): Query<TokenQuery>,
    Form(form): Form<CallbackForm>,
) -> Result<&'static str, (StatusCode, &'static str)> {
    let token_job_id =
        bearer_job_id(&headers, &token_query, &state.config.auth).map_err(|code| (code, "unauthorized"))?;
    if token_job_id != form.sid {
        return Err((StatusCode::UNAUTHORIZED, "bearer token does not match sid"));
    }

    let job = state.store.get(form.sid).await.map_err(|e| match e {
        CoreError::NotFound(_) => (StatusCode::NOT_FOUND, "unknown sid"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "store error"),
    })?;

    let job_id = job.id;
    let grading_data = form
        .grading_data
        .as_deref()
        .and_then(|raw| serde_json::from_str(raw).ok());

    let payload = ResultPayload {
        points: form.points,
        max_points: form.max_points,
        feedback: form.feedback,
        error: parse_error_token(&form.error),
        grading_data,
    };

    let overwrite = state.config.upload.callback_overrides_synthetic_result;

    state
        .store
        .update(
            job_id,
            Box::new(move |mut job: Job| {
                grader_core::apply_transition(
                    &mut job,
                    JobTransition::ResultPayload { payload, overwrite },
                )?;
                Ok(job)
            }),
        )
        .await
        .map_err(|_| (StatusCode::INTERNAL_SERVER_ERROR, "store error"))?;

    Ok("ok")
}

/// The original sends `error` as a form-encoded string, not a real
/// boolean: `"no"`/`"false"`/`""`/absent all mean "no error", anything
/// else (notably `"yes"`/`"true"`/`"1"`) means an error occurred.
fn parse_error_token(raw: &str) -> bool {
    !matches!(raw.to_ascii_lowercase().as_str(), "" | "no" | "false" | "0")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_negative_tokens() {
        assert!(!parse_error_token("no"));
        assert!(!parse_error_token("false"));
        assert!(!parse_error_token(""));
        assert!(!parse_error_token("0"));
        assert!(!parse_error_token("NO"));
    }

    #[test]
    fn recognizes_positive_tokens() {
        assert!(parse_error_token("yes"));
        assert!(parse_error_token("true"));
        assert!(parse_error_token("1"));
    }
}
