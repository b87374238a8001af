// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use log::{error, info, warn};

use compilerpoold::config::{Args, ServiceConfig};
use compilerpoold::http_api::{self, AppState};
use compilerpoold::scratch::ScratchPool;
use compilerpoold::toolchain::JavaToolchain;
use compilerpoold::worker_pool::WorkerPool;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = match ServiceConfig::from_args(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(2);
        }
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build the HTTP runtime")?;
    let result = runtime.block_on(run(config));
    if let Err(err) = &result {
        error!("compilerpoold stopped: {err:#}");
    }
    result
}

async fn run(config: ServiceConfig) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.scratch_root).with_context(|| {
        format!(
            "failed to create scratch root {}",
            config.scratch_root.display()
        )
    })?;
    let scratch = Arc::new(ScratchPool::new(&config.scratch_root, config.scratch_dirs)?);
    let toolchain = Arc::new(JavaToolchain::new(&config.compiler, &config.runtime));
    let pool = Arc::new(WorkerPool::start(config.pool, scratch.clone(), toolchain)?);

    info!(
        "Starting compilerpoold with {} workers and {} scratch directories in {}",
        config.pool.workers,
        config.scratch_dirs,
        config.scratch_root.display()
    );

    let addr = SocketAddr::new(config.bind, config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    let state = AppState {
        pool: pool.clone(),
        scratch: scratch.clone(),
        request_timeout: config.request_timeout,
    };
    let served = http_api::serve(listener, state, shutdown_signal()).await;

    info!("Stopping, waiting for running jobs");
    let drained = tokio::task::spawn_blocking(move || {
        pool.shutdown();
        scratch.teardown();
    })
    .await;
    if let Err(err) = drained {
        warn!("shutdown did not complete cleanly: {err}");
    }

    served
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!("failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
