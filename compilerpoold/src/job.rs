// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_io::Timer;
use futures::channel::oneshot;
use futures::future::{self, Either};
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;
use crate::toolchain::StepStatus;

/// Inbound payload of `POST /compile`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileRequest {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub input: String,
}

/// Outbound payload of `POST /compile`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileResponse {
    pub success: bool,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub time_ms: u64,
}

/// What happened to a job once a worker owned it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed { output: String },
    BuildFailed { diagnostics: String, status: StepStatus },
    RunFailed { output: String, status: StepStatus },
    /// The caller gave up before a worker dequeued the job.
    Cancelled,
    /// Setup failed (scratch, materialize, spawn) or the pipeline panicked.
    Internal { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    pub outcome: Outcome,
    pub elapsed: Duration,
}

impl ExecutionReport {
    pub fn new(outcome: Outcome, elapsed: Duration) -> Self {
        Self { outcome, elapsed }
    }

    pub fn cancelled() -> Self {
        Self::new(Outcome::Cancelled, Duration::ZERO)
    }

    pub fn internal(reason: impl Into<String>, elapsed: Duration) -> Self {
        Self::new(
            Outcome::Internal {
                reason: reason.into(),
            },
            elapsed,
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Completed { .. })
    }

    pub fn to_response(&self) -> CompileResponse {
        let time_ms = self.elapsed.as_millis() as u64;
        let (success, output, error) = match &self.outcome {
            Outcome::Completed { output } => (true, output.clone(), None),
            Outcome::BuildFailed {
                diagnostics,
                status,
            } => {
                let error = match status {
                    StepStatus::Exited(_) => "Compilation failed".to_string(),
                    other => format!("Compilation failed: {other}"),
                };
                (false, diagnostics.clone(), Some(error))
            }
            Outcome::RunFailed { output, status } => {
                (false, output.clone(), Some(status.to_string()))
            }
            Outcome::Cancelled => (false, String::new(), Some("Request timeout".to_string())),
            Outcome::Internal { reason } => (false, String::new(), Some(reason.clone())),
        };
        CompileResponse {
            success,
            output,
            error,
            time_ms,
        }
    }
}

/// Cooperative cancellation flag shared between a caller and the worker.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// One admitted unit of work. Consumed by [`Job::deliver`], so a job can
/// neither be answered twice nor reused.
#[derive(Debug)]
pub struct Job {
    id: u64,
    request: CompileRequest,
    cancel: CancelSignal,
    reply: oneshot::Sender<ExecutionReport>,
}

impl Job {
    /// Creates the job together with the caller's half of its result channel.
    pub fn new(id: u64, request: CompileRequest) -> (Job, PendingJob) {
        let (reply, result) = oneshot::channel();
        let cancel = CancelSignal::new();
        let job = Job {
            id,
            request,
            cancel: cancel.clone(),
            reply,
        };
        let pending = PendingJob { id, result, cancel };
        (job, pending)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn request(&self) -> &CompileRequest {
        &self.request
    }

    pub fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.reply.is_canceled()
    }

    /// Sends the report to the caller. Returns `false` when the caller has
    /// already stopped listening, in which case the report is discarded.
    pub fn deliver(self, report: ExecutionReport) -> bool {
        self.reply.send(report).is_ok()
    }
}

/// The caller's view of a submitted job. Dropping it fires the job's
/// cancellation signal.
#[derive(Debug)]
pub struct PendingJob {
    id: u64,
    result: oneshot::Receiver<ExecutionReport>,
    cancel: CancelSignal,
}

impl PendingJob {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the worker's report until `deadline`.
    pub async fn wait(mut self, deadline: Instant) -> Result<ExecutionReport, ServiceError> {
        match future::select(&mut self.result, Timer::at(deadline)).await {
            Either::Left((Ok(report), _)) => match report.outcome {
                Outcome::Cancelled => Err(ServiceError::ExecutionTimeout),
                _ => Ok(report),
            },
            Either::Left((Err(oneshot::Canceled), _)) => Err(ServiceError::PoolClosed),
            Either::Right(_) => {
                self.cancel.cancel();
                Err(ServiceError::ExecutionTimeout)
            }
        }
    }
}

impl Drop for PendingJob {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
