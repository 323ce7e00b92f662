//! Shared application state threaded through every axum handler: repository
//! and config handles bundled behind `Arc` for cheap per-request cloning.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use grader_core::JobStore;
use grader_dispatcher::{ClusterDispatcher, ExerciseContainerSpec};
use grader_eventbus::EventPublisher;
use grader_workspace::SubmissionWorkspaces;

use crate::config::Config;

/// Per-exercise grading configuration. A stand-in for the course-catalog
/// surface spec §1's Non-goals put out of scope: in a full deployment this
/// is fetched from the LMS's course configuration API, not held in memory.
#[derive(Debug, Clone, Default)]
pub struct ExerciseCatalog {
    pub feedback_templates: HashMap<(String, String), String>,
    pub container_specs: HashMap<(String, String), ExerciseContainerSpec>,
    /// Directory holding the exercise's unpacked `exercise.tar.gz` contents,
    /// keyed by `(course_key, exercise_key)` — archived on demand by
    /// `download_tarball` the same way a submission's workspace directory is.
    pub exercise_dirs: HashMap<(String, String), PathBuf>,
    /// Directory holding a personalized variant's contents, keyed by
    /// `(course_key, exercise_key, personalized_exercise)`.
    pub personalized_dirs: HashMap<(String, String, String), PathBuf>,
}

impl ExerciseCatalog {
    pub fn feedback_template(&self, course_key: &str, exercise_key: &str) -> String {
        self.feedback_templates
            .get(&(course_key.to_string(), exercise_key.to_string()))
            .cloned()
            .unwrap_or_else(|| {
                "{{ points }}/{{ max_points }} {{ out }} (error: {{ error }})".to_string()
            })
    }

    pub fn container_spec(&self, course_key: &str, exercise_key: &str) -> ExerciseContainerSpec {
        self.container_specs
            .get(&(course_key.to_string(), exercise_key.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn exercise_dir(&self, course_key: &str, exercise_key: &str) -> Option<PathBuf> {
        self.exercise_dirs
            .get(&(course_key.to_string(), exercise_key.to_string()))
            .cloned()
    }

    pub fn personalized_dir(
        &self,
        course_key: &str,
        exercise_key: &str,
        personalized_exercise: &str,
    ) -> Option<PathBuf> {
        self.personalized_dirs
            .get(&(
                course_key.to_string(),
                exercise_key.to_string(),
                personalized_exercise.to_string(),
            ))
            .cloned()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub publisher: Arc<dyn EventPublisher>,
    pub workspaces: SubmissionWorkspaces,
    pub catalog: Arc<ExerciseCatalog>,
    pub config: Arc<Config>,
    pub dispatcher: Arc<ClusterDispatcher>,
}
