//! `GET /{course}/aplus-config.json`: the course-configuration surface is
//! an explicit Non-goal (spec §1) — this orchestrator consumes that
//! configuration, it does not serve it. Stubbed as a delegated contract so
//! the route exists for reverse-proxy wiring without pretending to
//! implement a catalog service here.

use axum::extract::Path;
use axum::http::StatusCode;

pub async fn aplus_config(Path(_course_key): Path<String>) -> (StatusCode, &'static str) {
    (
        StatusCode::NOT_IMPLEMENTED,
        "course configuration is served by the course-catalog collaborator",
    )
}
