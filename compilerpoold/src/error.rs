// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

/// Failures a caller can observe before a job produces a regular outcome.
///
/// Build and run failures are not errors: they travel as [`crate::job::Outcome`]
/// through the result channel like any successful run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    /// Malformed or empty request, rejected before it reaches the pool.
    #[error("{0}")]
    InvalidInput(String),

    /// The caller's deadline passed while the admission queue was full.
    #[error("Request timeout during submission")]
    SubmissionTimeout,

    /// The caller's deadline passed after the pool had taken the job.
    #[error("Request timeout")]
    ExecutionTimeout,

    /// The pool no longer accepts jobs or dropped the job without answering.
    #[error("Service is shutting down")]
    PoolClosed,
}
