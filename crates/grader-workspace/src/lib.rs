//! Submission Workspace (spec §4.B).
//!
//! A directory tree keyed by job id containing uploaded files and a
//! metadata sidecar. Owned by the orchestrator; created at intake, deleted
//! after SUCCEEDED upload.

use std::io;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata sidecar written next to a submission's files. This is what the
/// Container Callback Endpoint's bearer-token lookup (spec §4.H) resolves
/// `sid` to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceMeta {
    pub upload_url: String,
    pub personalized_exercise: Option<String>,
    pub course_key: String,
    pub exercise_key: String,
    pub lang: String,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("workspace not found for job {0}")]
    NotFound(Uuid),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("corrupt metadata sidecar: {0}")]
    CorruptMeta(#[from] serde_json::Error),
}

const META_FILE: &str = "meta.json";
const SUBMISSION_DIR: &str = "submission";

/// Filesystem area rooted at a configured directory, one subdirectory per
/// job id.
#[derive(Clone)]
pub struct SubmissionWorkspaces {
    root: PathBuf,
}

impl SubmissionWorkspaces {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn job_dir(&self, job_id: Uuid) -> PathBuf {
        self.root.join(job_id.to_string())
    }

    pub fn submission_dir(&self, job_id: Uuid) -> PathBuf {
        self.job_dir(job_id).join(SUBMISSION_DIR)
    }

    fn meta_path(&self, job_id: Uuid) -> PathBuf {
        self.job_dir(job_id).join(META_FILE)
    }

    /// Materialize a new submission: write every uploaded file under
    /// `submission/` and the metadata sidecar next to it.
    pub async fn create(
        &self,
        job_id: Uuid,
        files: &[(String, Vec<u8>)],
        meta: &WorkspaceMeta,
    ) -> Result<PathBuf, WorkspaceError> {
        let submission_dir = self.submission_dir(job_id);
        tokio::fs::create_dir_all(&submission_dir).await?;

        for (name, contents) in files {
            let path = submission_dir.join(sanitize_filename(name));
            tokio::fs::write(&path, contents).await?;
        }

        self.write_meta(job_id, meta).await?;
        Ok(self.job_dir(job_id))
    }

    pub async fn write_meta(
        &self,
        job_id: Uuid,
        meta: &WorkspaceMeta,
    ) -> Result<(), WorkspaceError> {
        tokio::fs::create_dir_all(self.job_dir(job_id)).await?;
        let data = serde_json::to_vec_pretty(meta)?;
        tokio::fs::write(self.meta_path(job_id), data).await?;
        Ok(())
    }

    /// Read the metadata sidecar. Kept around (not destructively read, per
    /// SPEC_FULL.md §B) so repeated container tar-download requests keep
    /// working until the workspace is deleted.
    pub async fn read_meta(&self, job_id: Uuid) -> Result<WorkspaceMeta, WorkspaceError> {
        let path = self.meta_path(job_id);
        let data = tokio::fs::read(&path)
            .await
            .map_err(|_| WorkspaceError::NotFound(job_id))?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Build a `tar.gz` of `dir` into memory, the way `_container_download_sendtar`
    /// streams `exercise.tar.gz`/`submission.tar.gz`/`personalized.tar.gz`.
    pub async fn tar_gz(&self, dir: PathBuf) -> Result<Vec<u8>, WorkspaceError> {
        tokio::task::spawn_blocking(move || build_tar_gz(&dir))
            .await
            .expect("tar_gz blocking task panicked")
    }

    /// Delete the whole workspace. Gated on upload reaching SUCCEEDED
    /// (spec §3, Submission workspace lifecycle).
    pub async fn delete(&self, job_id: Uuid) -> Result<(), WorkspaceError> {
        let dir = self.job_dir(job_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn exists(&self, job_id: Uuid) -> bool {
        self.job_dir(job_id).exists()
    }
}

fn build_tar_gz(dir: &Path) -> Result<Vec<u8>, WorkspaceError> {
    let enc = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(enc);
    builder.append_dir_all(".", dir)?;
    let enc = builder.into_inner()?;
    Ok(enc.finish()?)
}

/// Reject path traversal in uploaded file names; keep everything inside the
/// submission directory.
fn sanitize_filename(name: &str) -> PathBuf {
    let cleaned = name
        .replace('\\', "/")
        .split('/')
        .filter(|seg| !seg.is_empty() && *seg != ".." && *seg != ".")
        .collect::<Vec<_>>()
        .join("_");
    if cleaned.is_empty() {
        PathBuf::from("unnamed")
    } else {
        PathBuf::from(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> WorkspaceMeta {
        WorkspaceMeta {
            upload_url: "http://lms.example/result".into(),
            personalized_exercise: None,
            course_key: "c1".into(),
            exercise_key: "e1".into(),
            lang: "en".into(),
        }
    }

    #[tokio::test]
    async fn create_writes_files_and_meta() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = SubmissionWorkspaces::new(tmp.path());
        let job_id = Uuid::new_v4();

        ws.create(
            job_id,
            &[("hello.py".to_string(), b"print(1)".to_vec())],
            &meta(),
        )
        .await
        .unwrap();

        let submission = ws.submission_dir(job_id);
        assert!(submission.join("hello.py").exists());

        let read_back = ws.read_meta(job_id).await.unwrap();
        assert_eq!(read_back.course_key, "c1");
    }

    #[tokio::test]
    async fn sanitize_filename_blocks_path_traversal() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = SubmissionWorkspaces::new(tmp.path());
        let job_id = Uuid::new_v4();

        ws.create(
            job_id,
            &[("../../etc/passwd".to_string(), b"oops".to_vec())],
            &meta(),
        )
        .await
        .unwrap();

        assert!(!ws.job_dir(job_id).join("../../etc/passwd").exists());
        assert!(ws.submission_dir(job_id).join("etc_passwd").exists());
    }

    #[tokio::test]
    async fn tar_gz_round_trips_through_gzip() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = SubmissionWorkspaces::new(tmp.path());
        let job_id = Uuid::new_v4();
        ws.create(
            job_id,
            &[("hello.py".to_string(), b"print(1)".to_vec())],
            &meta(),
        )
        .await
        .unwrap();

        let bytes = ws.tar_gz(ws.submission_dir(job_id)).await.unwrap();
        assert!(!bytes.is_empty());
        // gzip magic number
        assert_eq!(&bytes[0..2], &[0x1f, 0x8b]);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = SubmissionWorkspaces::new(tmp.path());
        let job_id = Uuid::new_v4();
        ws.create(job_id, &[], &meta()).await.unwrap();
        ws.delete(job_id).await.unwrap();
        assert!(!ws.exists(job_id));
        // Deleting again must not error (already-purged workspace).
        ws.delete(job_id).await.unwrap();
    }
}
