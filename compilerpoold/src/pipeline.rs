// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! Acquire → materialize → build → run → release, for one job.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::entry_point::derive_entry_point;
use crate::job::{CancelSignal, CompileRequest, ExecutionReport, Outcome};
use crate::scratch::ScratchPool;
use crate::toolchain::Toolchain;

/// Fixed ceilings for the two toolchain steps. They do not depend on how long
/// the caller is still willing to wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepLimits {
    pub build: Duration,
    pub run: Duration,
}

impl Default for StepLimits {
    fn default() -> Self {
        Self {
            build: Duration::from_secs(10),
            run: Duration::from_secs(15),
        }
    }
}

/// Runs one request to completion. Never fails: every problem becomes an
/// [`Outcome`]. The scratch directory goes back to the pool on every path.
///
/// `cancel` is checked before each toolchain step; a step that already started
/// runs to completion under its limit.
pub async fn execute(
    request: &CompileRequest,
    cancel: &CancelSignal,
    scratch: &ScratchPool,
    toolchain: &dyn Toolchain,
    limits: &StepLimits,
) -> ExecutionReport {
    let started = Instant::now();

    let lease = match scratch.acquire().await {
        Ok(lease) => lease,
        Err(err) => {
            warn!("no scratch directory for job: {err:#}");
            return ExecutionReport::internal("No scratch directory available", started.elapsed());
        }
    };

    let outcome = run_steps(request, cancel, lease.path(), toolchain, limits).await;
    let elapsed = started.elapsed();
    drop(lease);

    ExecutionReport::new(outcome, elapsed)
}

async fn run_steps(
    request: &CompileRequest,
    cancel: &CancelSignal,
    working_dir: &Path,
    toolchain: &dyn Toolchain,
    limits: &StepLimits,
) -> Outcome {
    let entry = derive_entry_point(&request.code);

    let source = match materialize(working_dir, &entry, &request.code) {
        Ok(source) => source,
        Err(err) => {
            warn!("failed to write source into {}: {}", working_dir.display(), err);
            return Outcome::Internal {
                reason: "Failed to write source file".to_string(),
            };
        }
    };

    if cancel.is_cancelled() {
        debug!("job for {entry} cancelled before build");
        return Outcome::Cancelled;
    }
    debug!("building {} in {}", entry, working_dir.display());
    let build = match toolchain.compile(&source, working_dir, limits.build).await {
        Ok(build) => build,
        Err(err) => {
            warn!("compiler could not be started: {err:#}");
            return Outcome::Internal {
                reason: format!("Failed to start compiler: {err}"),
            };
        }
    };
    if !build.success() {
        debug!("build of {} failed: {}", entry, build.status);
        return Outcome::BuildFailed {
            diagnostics: build.output,
            status: build.status,
        };
    }

    if cancel.is_cancelled() {
        debug!("job for {entry} cancelled after build");
        return Outcome::Cancelled;
    }
    let stdin = (!request.input.is_empty()).then(|| request.input.as_bytes());
    debug!("running {} in {}", entry, working_dir.display());
    let run = match toolchain.run(&entry, working_dir, stdin, limits.run).await {
        Ok(run) => run,
        Err(err) => {
            warn!("program could not be started: {err:#}");
            return Outcome::Internal {
                reason: format!("Failed to start program: {err}"),
            };
        }
    };

    if run.success() {
        Outcome::Completed { output: run.output }
    } else {
        debug!("run of {} failed: {}", entry, run.status);
        Outcome::RunFailed {
            output: run.output,
            status: run.status,
        }
    }
}

fn materialize(working_dir: &Path, entry: &str, code: &str) -> std::io::Result<PathBuf> {
    let source = working_dir.join(format!("{entry}.java"));
    fs::write(&source, code)?;
    Ok(source)
}
