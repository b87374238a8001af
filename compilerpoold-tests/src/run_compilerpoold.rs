// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Context;
use futures::channel::oneshot;
use tempfile::TempDir;

use compilerpoold::http_api::{self, AppState};
use compilerpoold::scratch::ScratchPool;
use compilerpoold::toolchain::Toolchain;
use compilerpoold::worker_pool::{PoolSettings, WorkerPool};

/// A compilerpoold instance serving on a random loopback port. Dropping it
/// stops the server, drains the pool and removes the scratch directories.
pub struct TestServer {
    addr: SocketAddr,
    scratch: Arc<ScratchPool>,
    pool: Arc<WorkerPool>,
    shutdown: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<()>>,
    _root: TempDir,
}

impl TestServer {
    pub fn start(
        toolchain: Arc<dyn Toolchain>,
        settings: PoolSettings,
        scratch_dirs: usize,
        request_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let root = tempfile::tempdir().context("failed to create scratch root")?;
        let scratch = Arc::new(ScratchPool::new(root.path(), scratch_dirs)?);
        let pool = Arc::new(WorkerPool::start(settings, scratch.clone(), toolchain)?);

        let listener = TcpListener::bind("127.0.0.1:0").context("failed to bind test port")?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;

        let state = AppState {
            pool: pool.clone(),
            scratch: scratch.clone(),
            request_timeout,
        };
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .context("failed to build test runtime")?;

        let server = thread::Builder::new()
            .name("test-http-server".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    let listener = match tokio::net::TcpListener::from_std(listener) {
                        Ok(listener) => listener,
                        Err(err) => {
                            eprintln!("failed to register test listener: {err}");
                            return;
                        }
                    };
                    let shutdown = async move {
                        let _ = shutdown_rx.await;
                    };
                    if let Err(err) = http_api::serve(listener, state, shutdown).await {
                        eprintln!("test server stopped with error: {err}");
                    }
                });
            })
            .context("failed to spawn server thread")?;

        Ok(Self {
            addr,
            scratch,
            pool,
            shutdown: Some(shutdown_tx),
            server: Some(server),
            _root: root,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn scratch(&self) -> &ScratchPool {
        &self.scratch
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(server) = self.server.take() {
            let _ = server.join();
        }
        self.pool.shutdown();
        self.scratch.teardown();
    }
}
