//! Submission intake (spec §4.H): `POST /{course}/{exercise}`.

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use grader_core::{Job, SubmissionMeta};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct IntakeResponse {
    pub job_id: uuid::Uuid,
}

pub async fn accept_submission(
    State(state): State<AppState>,
    Path((course_key, exercise_key)): Path<(String, String)>,
    mut multipart: Multipart,
) -> Result<Json<IntakeResponse>, (StatusCode, String)> {
    let mut files = Vec::new();
    let mut uids = Vec::new();
    let mut upload_url = None;
    let mut lang = "en".to_string();
    let mut personalized_exercise = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        if field.file_name().is_some() {
            let file_name = field.file_name().unwrap().to_string();
            let data = field
                .bytes()
                .await
                .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
            files.push((file_name, data.to_vec()));
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

        match name.as_str() {
            "uid" => uids.push(value),
            "upload_url" | "submission_url" => upload_url = Some(value),
            "lang" => lang = value,
            "personalized_exercise" => personalized_exercise = Some(value),
            _ => {}
        }
    }

    if uids.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "at least one uid is required".into()));
    }

    // Supplement from SPEC_FULL.md §B: fall back to a deployment-wide
    // default upload URL when the caller omits one, and flag that the
    // fallback was used so the Uploader's logs make the substitution
    // visible rather than silent.
    let upload_url_defaulted = upload_url.is_none();
    let upload_url = upload_url.unwrap_or_else(|| format!(
        "{}/{}/{}/result",
        state.config.server.bind_addr, course_key, exercise_key
    ));

    let meta = SubmissionMeta {
        uids,
        personalized_exercise,
        workspace_path: String::new(),
        upload_url,
        attempt: 1,
        upload_url_defaulted,
    };

    let job = Job::new(course_key.clone(), exercise_key.clone(), lang, meta.clone());
    let job_id = job.id;

    state
        .workspaces
        .create(
            job_id,
            &files,
            &grader_workspace::WorkspaceMeta {
                upload_url: meta.upload_url.clone(),
                personalized_exercise: meta.personalized_exercise.clone(),
                course_key: course_key.clone(),
                exercise_key: exercise_key.clone(),
                lang: job.lang.clone(),
            },
        )
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    state
        .store
        .create(job)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    dispatch_in_background(state.clone(), job_id, course_key, exercise_key);

    Ok(Json(IntakeResponse { job_id }))
}

/// Dispatch happens off the request path: the caller only needs an
/// acknowledgement that the submission was accepted, not that a pod
/// exists yet (spec §4.C is decoupled from §4.H for exactly this reason).
fn dispatch_in_background(state: AppState, job_id: uuid::Uuid, course_key: String, exercise_key: String) {
    tokio::spawn(async move {
        let spec = state.catalog.container_spec(&course_key, &exercise_key);
        if let Err(e) = state
            .dispatcher
            .dispatch(state.store.as_ref(), state.publisher.as_ref(), job_id, &spec)
            .await
        {
            tracing::error!(job_id = %job_id, error = %e, "dispatch failed");
        }
    });
}
