// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::time::Instant;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use log::debug;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::error::ServiceError;
use crate::job::{CompileRequest, ExecutionReport};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub workers: usize,
    pub busy_workers: usize,
    pub temp_dirs: usize,
    pub temp_dirs_capacity: usize,
    pub queue_size: usize,
    pub queue_capacity: usize,
    pub sanitize_failures: u64,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.pool.stats();
    Json(HealthResponse {
        status: "healthy".to_string(),
        workers: stats.workers,
        busy_workers: stats.busy_workers,
        temp_dirs: state.scratch.free_count(),
        temp_dirs_capacity: state.scratch.capacity(),
        queue_size: stats.queue_depth,
        queue_capacity: stats.queue_capacity,
        sanitize_failures: state.scratch.sanitize_failures(),
    })
}

/// The body is parsed by hand so clients that forget the JSON content type
/// still get served.
pub async fn compile(State(state): State<AppState>, body: Bytes) -> Response {
    let deadline = Instant::now() + state.request_timeout;

    let request = match parse_request(&body) {
        Ok(request) => request,
        Err(err) => return err.into_response(),
    };

    match submit_and_wait(&state, request, deadline).await {
        Ok(report) => (StatusCode::OK, Json(report.to_response())).into_response(),
        Err(err) => {
            debug!("compile request failed: {err}");
            err.into_response()
        }
    }
}

fn parse_request(body: &[u8]) -> Result<CompileRequest, ServiceError> {
    let request: CompileRequest = serde_json::from_slice(body).map_err(|err| {
        debug!("rejecting malformed request: {err}");
        ServiceError::InvalidInput("Invalid JSON".to_string())
    })?;
    if request.code.is_empty() {
        return Err(ServiceError::InvalidInput("No code provided".to_string()));
    }
    Ok(request)
}

/// If the client disconnects, this future is dropped together with the pending
/// job, which cancels the job.
async fn submit_and_wait(
    state: &AppState,
    request: CompileRequest,
    deadline: Instant,
) -> Result<ExecutionReport, ServiceError> {
    let pending = state.pool.submit(request, deadline).await?;
    debug!("waiting for job {}", pending.id());
    pending.wait(deadline).await
}
