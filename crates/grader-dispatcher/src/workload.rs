//! Workload (pod) spec construction, grounded in the original
//! implementation's `kubernetes-run.py` pod builder: an init container that
//! downloads the exercise/submission/personalized tarballs into shared
//! scratch volumes, a main container that runs the grading command against
//! them, and the constant-environment scheduling constraints
//! (node selector, anti-affinity, toleration) that keep grading containers
//! off the general workload nodes.

use std::collections::BTreeMap;

use grader_core::Job;
use k8s_openapi::api::core::v1::{
    Affinity, Container, EmptyDirVolumeSource, EnvVar, NodeAffinity, NodeSelectorRequirement,
    NodeSelectorTerm, PodAffinityTerm, PodAntiAffinity, Pod, PodSpec, PreferredSchedulingTerm,
    ResourceRequirements, Toleration, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, LabelSelectorRequirement, ObjectMeta,
};

use crate::label::sanitize_label;

/// Applied to a constant-environment pod's own labels and matched by its
/// anti-affinity term, so at most one such pod lands per node regardless of
/// which exercise it is grading.
const CONST_ENVIRONMENT_LABEL: &str = "grader.aplus.io/constant-environment";

/// Static description of how a given exercise's grading container is run.
/// Supplied by the (out-of-scope) course configuration surface; the
/// Dispatcher only consumes it.
#[derive(Debug, Clone)]
pub struct ExerciseContainerSpec {
    pub image: String,
    pub cmd: Vec<String>,
    pub cpu_limit: Option<String>,
    pub memory_limit: Option<String>,
    pub max_seconds: i64,
    pub require_constant_environment: bool,
    pub network_access: bool,
}

impl Default for ExerciseContainerSpec {
    fn default() -> Self {
        Self {
            image: "apluslms/grading-base:latest".into(),
            cmd: vec!["./run.sh".into()],
            cpu_limit: None,
            memory_limit: None,
            max_seconds: 3600,
            require_constant_environment: false,
            network_access: false,
        }
    }
}

/// Cluster-wide scheduling policy, set once at deployment time.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub namespace: String,
    pub image_puller_base_url: String,
    pub constant_environment_node_selector: BTreeMap<String, String>,
    pub constant_environment_toleration_key: String,
    pub default_cpu_limit: String,
    pub default_memory_limit: String,
    pub default_memory_request: String,
    pub grader_name: String,
}

const RUN_VOLUME: &str = "run";
const SUBMISSION_VOLUME: &str = "submission";
const EXERCISE_VOLUME: &str = "exercise";
const PERSONALIZED_VOLUME: &str = "personalized";

/// Build the pod spec for one grading attempt. `container_name` is the
/// name this pod will be submitted under (and becomes `container_ref`);
/// the caller picks it so retries and the sanitizer stay in one place.
pub fn build_pod(
    container_name: &str,
    job: &Job,
    exercise: &ExerciseContainerSpec,
    cluster: &ClusterConfig,
) -> Pod {
    let cpu_limit = exercise
        .cpu_limit
        .clone()
        .unwrap_or_else(|| cluster.default_cpu_limit.clone());
    let memory_limit = exercise
        .memory_limit
        .clone()
        .unwrap_or_else(|| cluster.default_memory_limit.clone());
    let cpu_request = half_cpu_quantity(&cpu_limit);

    let mut limits = BTreeMap::new();
    limits.insert("cpu".to_string(), Quantity(cpu_limit));
    limits.insert("memory".to_string(), Quantity(memory_limit));

    let mut requests = BTreeMap::new();
    requests.insert("cpu".to_string(), Quantity(cpu_request));
    requests.insert(
        "memory".to_string(),
        Quantity(cluster.default_memory_request.clone()),
    );

    let volume_mounts = vec![
        volume_mount(RUN_VOLUME, "/run/grader"),
        volume_mount(SUBMISSION_VOLUME, "/submission"),
        volume_mount(EXERCISE_VOLUME, "/exercise"),
        volume_mount(PERSONALIZED_VOLUME, "/personalized"),
    ];

    let init_container = Container {
        name: "init".into(),
        image: Some(format!("{}/fetcher:latest", cluster.image_puller_base_url)),
        command: Some(vec!["/fetch.sh".into()]),
        env: Some(vec![
            env_var("SUBMISSION_URL", &job.submission_meta.upload_url),
            env_var("COURSE_KEY", &job.course_key),
            env_var("EXERCISE_KEY", &job.exercise_key),
        ]),
        volume_mounts: Some(volume_mounts.clone()),
        ..Default::default()
    };

    let main_container = Container {
        name: "main".into(),
        image: Some(exercise.image.clone()),
        command: Some(exercise.cmd.clone()),
        resources: Some(ResourceRequirements {
            limits: Some(limits),
            requests: Some(requests),
            ..Default::default()
        }),
        volume_mounts: Some(volume_mounts),
        ..Default::default()
    };

    let volumes = vec![
        empty_dir_volume(RUN_VOLUME),
        empty_dir_volume(SUBMISSION_VOLUME),
        empty_dir_volume(EXERCISE_VOLUME),
        empty_dir_volume(PERSONALIZED_VOLUME),
    ];

    let mut labels = BTreeMap::new();
    labels.insert("course".to_string(), sanitize_label(&job.course_key));
    labels.insert("exercise".to_string(), sanitize_label(&job.exercise_key));
    labels.insert("grader".to_string(), sanitize_label(&cluster.grader_name));
    if exercise.require_constant_environment {
        labels.insert(CONST_ENVIRONMENT_LABEL.to_string(), "true".to_string());
    }

    let (node_selector, affinity, tolerations) = if exercise.require_constant_environment {
        (
            Some(cluster.constant_environment_node_selector.clone()),
            Some(constant_environment_affinity(cluster)),
            Some(vec![Toleration {
                key: Some(cluster.constant_environment_toleration_key.clone()),
                operator: Some("Exists".into()),
                effect: Some("NoSchedule".into()),
                ..Default::default()
            }]),
        )
    } else {
        (None, None, None)
    };

    Pod {
        metadata: ObjectMeta {
            name: Some(container_name.to_string()),
            namespace: Some(cluster.namespace.clone()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(PodSpec {
            init_containers: Some(vec![init_container]),
            containers: vec![main_container],
            volumes: Some(volumes),
            restart_policy: Some("Never".into()),
            active_deadline_seconds: Some(exercise.max_seconds),
            automount_service_account_token: Some(false),
            enable_service_links: Some(false),
            node_selector,
            affinity,
            tolerations,
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn volume_mount(name: &str, mount_path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: mount_path.to_string(),
        ..Default::default()
    }
}

fn empty_dir_volume(name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }
}

fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

/// Soft preference toward the constant-environment node pool, plus a hard
/// guarantee that at most one constant-environment pod runs per node: the
/// pool is sized for exactly one grading container apiece, so co-scheduling
/// two would starve one of them.
fn constant_environment_affinity(cluster: &ClusterConfig) -> Affinity {
    let expressions: Vec<NodeSelectorRequirement> = cluster
        .constant_environment_node_selector
        .iter()
        .map(|(k, v)| NodeSelectorRequirement {
            key: k.clone(),
            operator: "In".into(),
            values: Some(vec![v.clone()]),
        })
        .collect();

    Affinity {
        node_affinity: Some(NodeAffinity {
            preferred_during_scheduling_ignored_during_execution: Some(vec![
                PreferredSchedulingTerm {
                    weight: 100,
                    preference: NodeSelectorTerm {
                        match_expressions: Some(expressions),
                        ..Default::default()
                    },
                },
            ]),
            ..Default::default()
        }),
        pod_anti_affinity: Some(PodAntiAffinity {
            required_during_scheduling_ignored_during_execution: Some(vec![PodAffinityTerm {
                label_selector: Some(LabelSelector {
                    match_expressions: Some(vec![LabelSelectorRequirement {
                        key: CONST_ENVIRONMENT_LABEL.to_string(),
                        operator: "In".to_string(),
                        values: Some(vec!["true".to_string()]),
                    }]),
                    ..Default::default()
                }),
                topology_key: "kubernetes.io/hostname".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Half of a CPU quantity string, rounded down to millicores, with a floor
/// of `100m`. Accepts either a bare core count (`"2"`) or a millicore
/// suffix (`"500m"`); anything else is returned as the request verbatim
/// (the cluster will reject the pod if it is not a valid quantity).
fn half_cpu_quantity(limit: &str) -> String {
    if let Some(millis) = limit.strip_suffix('m') {
        if let Ok(m) = millis.parse::<i64>() {
            return format!("{}m", (m / 2).max(100));
        }
    } else if let Ok(cores) = limit.parse::<f64>() {
        let millis = (cores * 1000.0 / 2.0).max(100.0) as i64;
        return format!("{millis}m");
    }
    limit.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use grader_core::{Job, SubmissionMeta};

    fn cluster() -> ClusterConfig {
        let mut selector = BTreeMap::new();
        selector.insert("grader.aplus.io/pool".to_string(), "constant".to_string());
        ClusterConfig {
            namespace: "grader".into(),
            image_puller_base_url: "https://fetch.example".into(),
            constant_environment_node_selector: selector,
            constant_environment_toleration_key: "grader.aplus.io/dedicated".into(),
            default_cpu_limit: "1".into(),
            default_memory_limit: "1Gi".into(),
            default_memory_request: "128Mi".into(),
            grader_name: "aplus-manager".into(),
        }
    }

    fn job() -> Job {
        Job::new(
            "o1",
            "hello_world",
            "en",
            SubmissionMeta {
                uids: vec!["1234".into()],
                personalized_exercise: None,
                workspace_path: "/tmp/x".into(),
                upload_url: "http://lms.example/result".into(),
                attempt: 1,
                upload_url_defaulted: false,
            },
        )
    }

    #[test]
    fn sets_active_deadline_and_no_service_account_token() {
        let pod = build_pod("grader-abc", &job(), &ExerciseContainerSpec::default(), &cluster());
        let spec = pod.spec.unwrap();
        assert_eq!(spec.active_deadline_seconds, Some(3600));
        assert_eq!(spec.automount_service_account_token, Some(false));
        assert_eq!(spec.enable_service_links, Some(false));
        assert_eq!(spec.restart_policy.as_deref(), Some("Never"));
    }

    #[test]
    fn cpu_request_is_half_of_limit() {
        let mut exercise = ExerciseContainerSpec::default();
        exercise.cpu_limit = Some("2".into());
        let pod = build_pod("grader-abc", &job(), &exercise, &cluster());
        let resources = pod.spec.unwrap().containers[0].resources.clone().unwrap();
        assert_eq!(
            resources.requests.unwrap().get("cpu").unwrap().0,
            "1000m"
        );
        assert_eq!(resources.limits.unwrap().get("cpu").unwrap().0, "2");
    }

    #[test]
    fn constant_environment_applies_node_selector_and_toleration() {
        let mut exercise = ExerciseContainerSpec::default();
        exercise.require_constant_environment = true;
        let pod = build_pod("grader-abc", &job(), &exercise, &cluster());
        let spec = pod.spec.unwrap();
        assert!(spec.node_selector.is_some());
        assert!(spec.tolerations.is_some());
        assert!(spec.affinity.is_some());
    }

    #[test]
    fn constant_environment_pods_carry_a_hard_per_node_anti_affinity() {
        let mut exercise = ExerciseContainerSpec::default();
        exercise.require_constant_environment = true;
        let pod = build_pod("grader-abc", &job(), &exercise, &cluster());

        let labels = pod.metadata.labels.clone().unwrap();
        assert_eq!(labels.get(CONST_ENVIRONMENT_LABEL).map(String::as_str), Some("true"));

        let affinity = pod.spec.unwrap().affinity.unwrap();
        let anti_affinity = affinity.pod_anti_affinity.expect("pod_anti_affinity must be set");
        let terms = anti_affinity
            .required_during_scheduling_ignored_during_execution
            .expect("anti-affinity must be hard (required), not only preferred");
        assert_eq!(terms.len(), 1);
        assert_eq!(terms[0].topology_key, "kubernetes.io/hostname");
        let selector = terms[0].label_selector.as_ref().unwrap();
        let expr = &selector.match_expressions.as_ref().unwrap()[0];
        assert_eq!(expr.key, CONST_ENVIRONMENT_LABEL);
        assert_eq!(expr.operator, "In");
        assert_eq!(expr.values.as_deref(), Some(&["true".to_string()][..]));
    }

    #[test]
    fn default_run_has_no_constant_environment_label() {
        let pod = build_pod("grader-abc", &job(), &ExerciseContainerSpec::default(), &cluster());
        let labels = pod.metadata.labels.unwrap();
        assert!(!labels.contains_key(CONST_ENVIRONMENT_LABEL));
    }

    #[test]
    fn default_run_has_no_scheduling_constraints() {
        let pod = build_pod("grader-abc", &job(), &ExerciseContainerSpec::default(), &cluster());
        let spec = pod.spec.unwrap();
        assert!(spec.node_selector.is_none());
        assert!(spec.tolerations.is_none());
    }

    #[test]
    fn labels_are_sanitized() {
        let mut j = job();
        j.course_key = "Ohjelmoinnin peruskurssi — Y1!".into();
        let pod = build_pod("grader-abc", &j, &ExerciseContainerSpec::default(), &cluster());
        let labels = pod.metadata.labels.unwrap();
        assert_eq!(labels.get("course").unwrap(), "Ohjelmoinnin_peruskurssi__Y1");
    }
}
