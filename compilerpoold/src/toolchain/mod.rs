// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! The external compile/run collaborator.
//!
//! Every step runs under its own hard deadline. The deadline is enforced here and
//! not by the caller, so a runaway program can occupy a worker for at most the
//! step ceiling no matter what happens on the request side.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

pub mod java;
pub mod process;

#[cfg(test)]
pub mod testing;

pub use java::JavaToolchain;

/// How a subordinate process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Exited(i32),
    Signaled(i32),
    /// Killed because the step deadline elapsed.
    TimedOut(Duration),
}

impl StepStatus {
    pub fn success(&self) -> bool {
        matches!(self, StepStatus::Exited(0))
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepStatus::Exited(code) => write!(f, "exit status: {code}"),
            StepStatus::Signaled(signal) => write!(f, "terminated by signal {signal}"),
            StepStatus::TimedOut(limit) => write!(f, "timed out after {limit:?}"),
        }
    }
}

/// Merged stdout/stderr of one step plus how it ended. Output produced before a
/// deadline kill is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutput {
    pub output: String,
    pub status: StepStatus,
}

impl StepOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

#[async_trait]
pub trait Toolchain: Send + Sync {
    /// Compiles `source` inside `working_dir`.
    async fn compile(
        &self,
        source: &Path,
        working_dir: &Path,
        limit: Duration,
    ) -> anyhow::Result<StepOutput>;

    /// Runs the compiled program identified by `entry` inside `working_dir`.
    async fn run(
        &self,
        entry: &str,
        working_dir: &Path,
        stdin: Option<&[u8]>,
        limit: Duration,
    ) -> anyhow::Result<StepOutput>;
}
