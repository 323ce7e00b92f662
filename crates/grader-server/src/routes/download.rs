//! Container download endpoints (spec §4.H): `submission.tar.gz`,
//! `exercise.tar.gz`, `personalized.tar.gz`. The job id isn't part of the
//! URL — it's the bearer token itself (SPEC_FULL.md §B), so a container can
//! only ever pull its own files.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;

use crate::auth::{bearer_job_id, TokenQuery};
use crate::state::AppState;

pub async fn download_tarball(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(token_query): Query<TokenQuery>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, &'static str)> {
    let job_id =
        bearer_job_id(&headers, &token_query, &state.config.auth).map_err(|code| (code, "unauthorized"))?;

    let kind = filename
        .strip_suffix(".tar.gz")
        .ok_or((StatusCode::BAD_REQUEST, "expected a .tar.gz filename"))?;

    match kind {
        "submission" => {
            let dir = state.workspaces.submission_dir(job_id);
            let bytes = state
                .workspaces
                .tar_gz(dir)
                .await
                .map_err(|_| (StatusCode::NOT_FOUND, "workspace not found"))?;
            Ok(([("content-type", "application/gzip")], bytes))
        }
        "exercise" => {
            let job = state
                .store
                .get(job_id)
                .await
                .map_err(|_| (StatusCode::NOT_FOUND, "unknown job"))?;
            let dir = state
                .catalog
                .exercise_dir(&job.course_key, &job.exercise_key)
                .ok_or((StatusCode::NOT_FOUND, "exercise tarball not found"))?;
            let bytes = state
                .workspaces
                .tar_gz(dir)
                .await
                .map_err(|_| (StatusCode::NOT_FOUND, "exercise tarball not found"))?;
            Ok(([("content-type", "application/gzip")], bytes))
        }
        "personalized" => {
            let job = state
                .store
                .get(job_id)
                .await
                .map_err(|_| (StatusCode::NOT_FOUND, "unknown job"))?;
            let personalized = job
                .submission_meta
                .personalized_exercise
                .as_deref()
                .ok_or((StatusCode::NOT_FOUND, "job has no personalized exercise"))?;
            let dir = state
                .catalog
                .personalized_dir(&job.course_key, &job.exercise_key, personalized)
                .ok_or((StatusCode::NOT_FOUND, "personalized tarball not found"))?;
            let bytes = state
                .workspaces
                .tar_gz(dir)
                .await
                .map_err(|_| (StatusCode::NOT_FOUND, "personalized tarball not found"))?;
            Ok(([("content-type", "application/gzip")], bytes))
        }
        _ => Err((StatusCode::BAD_REQUEST, "unknown tarball kind")),
    }
}
