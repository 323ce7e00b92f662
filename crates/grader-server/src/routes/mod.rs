pub mod callback;
pub mod course_config;
pub mod download;
pub mod intake;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/:course/:exercise", post(intake::accept_submission))
        .route("/container-post", post(callback::container_post))
        .route("/container/:filename", get(download::download_tarball))
        .route("/:course/aplus-config.json", get(course_config::aplus_config))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
