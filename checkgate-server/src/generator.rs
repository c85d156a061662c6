//! The plugin generator endpoint.
//!
//! Each request names a commit and the check patterns it must satisfy. The
//! response is the parameter set to render: the request's own data when the
//! commit is good, the last known-good data when it is not, or nothing.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::Json;
use tracing::{info, warn};

use checkgate_core::{
    ApplicationStore, CommitChecker, GeneratorRequest, GeneratorResponse, ResolvedRequest,
};

use crate::error::ApiError;
use crate::AppState;

/// `POST /api/v1/getparams.execute`
pub async fn getparams_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<GeneratorRequest>, JsonRejection>,
) -> Result<Json<GeneratorResponse>, ApiError> {
    validate_auth(&headers, state.plugin_auth_token.as_deref())?;

    let Json(request) = payload?;
    let request = request.resolve()?;

    let response =
        resolve_parameters(state.store.as_ref(), state.checker.as_ref(), &request).await?;
    Ok(Json(response))
}

fn validate_auth(headers: &HeaderMap, expected: Option<&str>) -> Result<(), ApiError> {
    let Some(expected_token) = expected else {
        return Ok(());
    };

    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match auth_header {
        Some(value) => match value.strip_prefix("Bearer ") {
            Some(provided) if provided == expected_token => Ok(()),
            Some(_) => Err(ApiError::Unauthorized("Invalid token")),
            None => Err(ApiError::Unauthorized(
                "Invalid Authorization header format. Expected: Bearer <token>",
            )),
        },
        None => Err(ApiError::Unauthorized("Missing Authorization header")),
    }
}

/// Decide which parameter set to return for a validated request.
///
/// A stored fingerprint equal to the request's short-circuits the CI lookup.
/// Otherwise a passing commit is recorded as the new known-good state and a
/// failing one falls back to whatever was recorded before.
pub async fn resolve_parameters(
    store: &dyn ApplicationStore,
    checker: &dyn CommitChecker,
    request: &ResolvedRequest,
) -> Result<GeneratorResponse, ApiError> {
    let key = request.key();
    let fingerprint = request.fingerprint();
    let existing = store.get(&key).await?;

    if let Some(record) = &existing {
        if record.matches_fingerprint(&fingerprint) {
            info!(
                "{} already validated at {}, skipping CI lookup",
                key, request.sha
            );
            return Ok(GeneratorResponse::single(request.state.clone()));
        }
    }

    let repo = request.coordinates.full_name();
    let passed = checker
        .commit_passed_checks(&request.checks, &repo, &request.sha)
        .await
        .map_err(ApiError::Upstream)?;

    if passed {
        match existing {
            None => {
                let id = store
                    .create(&key, &request.state, Some(&fingerprint))
                    .await?;
                info!("Recorded {} at {} (record {})", key, request.sha, id);
            }
            Some(_) => {
                let id = store
                    .update(&key, &request.state, Some(&fingerprint))
                    .await?;
                info!("Updated {} to {} (record {})", key, request.sha, id);
            }
        }
        return Ok(GeneratorResponse::single(request.state.clone()));
    }

    match existing {
        Some(record) => {
            warn!(
                "Checks failed for {}@{}, returning last known-good state of {}",
                repo, request.sha, key
            );
            Ok(GeneratorResponse::single(record.state))
        }
        None => {
            warn!(
                "Checks failed for {}@{} and {} has no known-good state",
                repo, request.sha, key
            );
            Ok(GeneratorResponse::empty())
        }
    }
}
