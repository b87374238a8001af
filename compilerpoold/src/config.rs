// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::pipeline::StepLimits;
use crate::worker_pool::PoolSettings;

/// Extra scratch directories on top of the worker count, so cleanup in progress
/// never starves a worker.
pub const SCRATCH_MARGIN: usize = 10;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Args {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Address to bind to
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// Number of compile workers
    #[arg(long, default_value_t = 20)]
    pub workers: usize,

    /// Number of reusable scratch directories [default: workers + 10]
    #[arg(long = "scratch-dirs")]
    pub scratch_dirs: Option<usize>,

    /// Jobs that may wait for a worker [default: 2 * workers]
    #[arg(long = "queue-capacity")]
    pub queue_capacity: Option<usize>,

    /// Directory in which the scratch directories are created [default: system temp dir]
    #[arg(long = "scratch-root", value_name = "DIR")]
    pub scratch_root: Option<PathBuf>,

    /// How long a caller waits for admission and result
    #[arg(long = "request-timeout-secs", default_value_t = 25)]
    pub request_timeout_secs: u64,

    /// Ceiling for the compile step
    #[arg(long = "build-timeout-secs", default_value_t = 10)]
    pub build_timeout_secs: u64,

    /// Ceiling for the run step
    #[arg(long = "run-timeout-secs", default_value_t = 15)]
    pub run_timeout_secs: u64,

    /// Compiler executable
    #[arg(long, default_value = "javac")]
    pub compiler: String,

    /// Runtime executable
    #[arg(long, default_value = "java")]
    pub runtime: String,
}

pub fn validate_args(args: &Args) -> Result<(), String> {
    if args.workers == 0 {
        return Err("--workers must be at least 1".into());
    }

    if let Some(queue_capacity) = args.queue_capacity {
        if queue_capacity == 0 {
            return Err("--queue-capacity must be at least 1".into());
        }
    }

    // fewer directories than workers would make workers wait on each other
    if let Some(scratch_dirs) = args.scratch_dirs {
        if scratch_dirs < args.workers {
            return Err(format!(
                "--scratch-dirs ({}) must not be smaller than --workers ({})",
                scratch_dirs, args.workers
            ));
        }
    }

    match (
        args.request_timeout_secs,
        args.build_timeout_secs,
        args.run_timeout_secs,
    ) {
        (0, _, _) => return Err("--request-timeout-secs must be at least 1".into()),
        (_, 0, _) => return Err("--build-timeout-secs must be at least 1".into()),
        (_, _, 0) => return Err("--run-timeout-secs must be at least 1".into()),
        _ => {}
    }

    if args.compiler.trim().is_empty() || args.runtime.trim().is_empty() {
        return Err("--compiler and --runtime must not be empty".into());
    }

    Ok(())
}

/// Validated settings, passed explicitly to whatever needs them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub scratch_root: PathBuf,
    pub scratch_dirs: usize,
    pub pool: PoolSettings,
    pub request_timeout: Duration,
    pub compiler: String,
    pub runtime: String,
}

impl ServiceConfig {
    pub fn from_args(args: Args) -> Result<Self, String> {
        validate_args(&args)?;

        let scratch_root = args
            .scratch_root
            .unwrap_or_else(|| std::env::temp_dir().join("compilerpoold"));
        Ok(Self {
            bind: args.bind,
            port: args.port,
            scratch_root,
            scratch_dirs: args.scratch_dirs.unwrap_or(args.workers + SCRATCH_MARGIN),
            pool: PoolSettings {
                workers: args.workers,
                queue_capacity: args.queue_capacity.unwrap_or(args.workers * 2),
                limits: StepLimits {
                    build: Duration::from_secs(args.build_timeout_secs),
                    run: Duration::from_secs(args.run_timeout_secs),
                },
            },
            request_timeout: Duration::from_secs(args.request_timeout_secs),
            compiler: args.compiler,
            runtime: args.runtime,
        })
    }
}
