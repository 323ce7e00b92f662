//! The upstream delivery seam (spec §4.G): posting rendered feedback back
//! to the LMS's `upload_url`. A trait, so the retry/backoff state machine
//! is testable without a live LMS endpoint — the same seam shape as
//! `grader-dispatcher::ClusterClient`.

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("request error: {0}")]
    Request(String),
}

#[async_trait]
pub trait ResultSink: Send + Sync {
    /// POST the rendered result. Returns the HTTP status code; transport
    /// failures (DNS, connection refused, timeout) are `SinkError` and
    /// treated the same as a 5xx by the retry classifier.
    async fn submit(
        &self,
        url: &str,
        points: i32,
        max_points: i32,
        feedback: &str,
        error: bool,
    ) -> Result<u16, SinkError>;
}

pub struct HttpResultSink {
    client: reqwest::Client,
}

impl HttpResultSink {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ResultSink for HttpResultSink {
    async fn submit(
        &self,
        url: &str,
        points: i32,
        max_points: i32,
        feedback: &str,
        error: bool,
    ) -> Result<u16, SinkError> {
        let response = self
            .client
            .post(url)
            .form(&[
                ("points", points.to_string()),
                ("max_points", max_points.to_string()),
                ("feedback", feedback.to_string()),
                ("error", if error { "true" } else { "false" }.to_string()),
            ])
            .send()
            .await
            .map_err(|e| SinkError::Request(e.to_string()))?;

        Ok(response.status().as_u16())
    }
}
