//! Bearer-token authentication for the callback and download endpoints
//! (spec §4.H).
//!
//! There is no deployment-wide shared secret: a job's own `id` is minted
//! once at intake and handed to the container as its credential (the
//! fetch-init container's env, and the URL it is told to call back), the
//! same way the original orchestrator's container auth worked. Presenting
//! that id as a bearer token authorizes the caller for that job and only
//! that job. A `?token=` query-parameter fallback to the `Authorization:
//! Bearer` header is available for debug deployments, gated behind an
//! explicit config flag rather than always-on.

use axum::extract::Query;
use axum::http::{HeaderMap, StatusCode};
use serde::Deserialize;
use uuid::Uuid;

use crate::config::AuthConfig;

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

/// Extract the job id presented as a bearer token: from the `Authorization`
/// header, or — only when both `auth.debug` and
/// `auth.allow_query_token_in_debug` are set — from a `?token=` query
/// parameter. Never accept the query fallback in a non-debug deployment,
/// even if a caller asks for it. Returns `UNAUTHORIZED` for a missing,
/// malformed, or non-UUID token; it is the caller's job to then check the
/// returned id actually owns the record being acted on.
pub fn bearer_job_id(
    headers: &HeaderMap,
    query: &TokenQuery,
    auth: &AuthConfig,
) -> Result<Uuid, StatusCode> {
    let raw = bearer_token(headers)
        .map(str::to_string)
        .or_else(|| {
            if auth.debug && auth.allow_query_token_in_debug {
                query.token.clone()
            } else {
                None
            }
        })
        .ok_or(StatusCode::UNAUTHORIZED)?;

    Uuid::parse_str(&raw).map_err(|_| StatusCode::UNAUTHORIZED)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

pub type TokenQueryExtractor = Query<TokenQuery>;

#[cfg(test)]
mod tests {
    use super::*;

    fn auth_config(debug: bool, allow_query: bool) -> AuthConfig {
        AuthConfig {
            allow_query_token_in_debug: allow_query,
            debug,
        }
    }

    fn job_id() -> Uuid {
        Uuid::parse_str("11111111-1111-1111-1111-111111111111").unwrap()
    }

    #[test]
    fn accepts_matching_bearer_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            format!("Bearer {}", job_id()).parse().unwrap(),
        );
        let query = TokenQuery { token: None };
        assert_eq!(
            bearer_job_id(&headers, &query, &auth_config(false, false)),
            Ok(job_id())
        );
    }

    #[test]
    fn rejects_non_uuid_bearer_header() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Bearer not-a-uuid".parse().unwrap());
        let query = TokenQuery { token: None };
        assert_eq!(
            bearer_job_id(&headers, &query, &auth_config(false, false)),
            Err(StatusCode::UNAUTHORIZED)
        );
    }

    #[test]
    fn rejects_missing_bearer_header() {
        let headers = HeaderMap::new();
        let query = TokenQuery { token: None };
        assert_eq!(
            bearer_job_id(&headers, &query, &auth_config(false, false)),
            Err(StatusCode::UNAUTHORIZED)
        );
    }

    #[test]
    fn query_token_rejected_outside_debug_mode() {
        let headers = HeaderMap::new();
        let query = TokenQuery { token: Some(job_id().to_string()) };
        assert_eq!(
            bearer_job_id(&headers, &query, &auth_config(false, true)),
            Err(StatusCode::UNAUTHORIZED)
        );
    }

    #[test]
    fn query_token_accepted_when_debug_and_flag_both_set() {
        let headers = HeaderMap::new();
        let query = TokenQuery { token: Some(job_id().to_string()) };
        assert_eq!(
            bearer_job_id(&headers, &query, &auth_config(true, true)),
            Ok(job_id())
        );
    }

    #[test]
    fn query_token_rejected_when_debug_but_flag_unset() {
        let headers = HeaderMap::new();
        let query = TokenQuery { token: Some(job_id().to_string()) };
        assert_eq!(
            bearer_job_id(&headers, &query, &auth_config(true, false)),
            Err(StatusCode::UNAUTHORIZED)
        );
    }
}
