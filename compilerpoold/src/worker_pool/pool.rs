// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use anyhow::{bail, Context};
use async_channel::{Receiver, Sender};
use async_io::Timer;
use futures::executor::LocalPool;
use futures::future::{self, Either};
use futures::{pin_mut, FutureExt};
use log::{debug, info, warn};
use serde::Serialize;

use crate::error::ServiceError;
use crate::job::{CompileRequest, ExecutionReport, Job, PendingJob};
use crate::pipeline::{self, StepLimits};
use crate::scratch::ScratchPool;
use crate::toolchain::Toolchain;
use crate::worker_pool::countdown::{Countdown, CountdownGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub workers: usize,
    pub queue_capacity: usize,
    pub limits: StepLimits,
}

impl PoolSettings {
    /// `workers` workers with a queue twice that size.
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            queue_capacity: workers * 2,
            limits: StepLimits::default(),
        }
    }
}

/// Point-in-time view; the fields are read one after another, not atomically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub workers: usize,
    pub busy_workers: usize,
    pub queue_depth: usize,
    pub queue_capacity: usize,
}

#[derive(Clone)]
struct WorkerContext {
    scratch: Arc<ScratchPool>,
    toolchain: Arc<dyn Toolchain>,
    limits: StepLimits,
    busy: Arc<AtomicUsize>,
}

#[derive(Debug)]
pub struct WorkerPool {
    tx: Sender<Job>,
    settings: PoolSettings,
    busy: Arc<AtomicUsize>,
    next_job_id: AtomicU64,
    countdown: Arc<Countdown>,
    thread_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawns the worker threads. The pool borrows nothing from the caller; the
    /// scratch pool and toolchain are shared with every worker.
    pub fn start(
        settings: PoolSettings,
        scratch: Arc<ScratchPool>,
        toolchain: Arc<dyn Toolchain>,
    ) -> anyhow::Result<Self> {
        if settings.workers == 0 {
            bail!("worker pool needs at least one worker");
        }
        if settings.queue_capacity == 0 {
            bail!("worker pool needs a queue capacity of at least one");
        }

        let (tx, rx) = async_channel::bounded(settings.queue_capacity);
        let busy = Arc::new(AtomicUsize::new(0));
        let countdown = Arc::new(Countdown::new(settings.workers));
        let context = WorkerContext {
            scratch,
            toolchain,
            limits: settings.limits,
            busy: busy.clone(),
        };

        let mut thread_handles = Vec::with_capacity(settings.workers);
        for worker_id in 0..settings.workers {
            let rx = rx.clone();
            let context = context.clone();
            let countdown = countdown.clone();
            let spawned = thread::Builder::new()
                .name(format!("compile-worker-{worker_id}"))
                .spawn(move || {
                    let _guard = CountdownGuard(&countdown);
                    let mut pool = LocalPool::new();
                    pool.run_until(worker_loop(worker_id, rx, context));
                });
            match spawned {
                Ok(handle) => thread_handles.push(handle),
                Err(err) => {
                    tx.close();
                    for handle in thread_handles {
                        let _ = handle.join();
                    }
                    return Err(err).context("failed to spawn worker thread");
                }
            }
        }

        info!(
            "Started {} compile workers, admission queue holds {} jobs",
            settings.workers, settings.queue_capacity
        );
        Ok(Self {
            tx,
            settings,
            busy,
            next_job_id: AtomicU64::new(1),
            countdown,
            thread_handles: Mutex::new(thread_handles),
        })
    }

    /// Admits a job, waiting for queue room until `deadline`.
    ///
    /// On `SubmissionTimeout` the job was never queued, so it never touches a
    /// worker or a scratch directory.
    pub async fn submit(
        &self,
        request: CompileRequest,
        deadline: Instant,
    ) -> Result<PendingJob, ServiceError> {
        let id = self.next_job_id.fetch_add(1, Ordering::Relaxed);
        let (job, pending) = Job::new(id, request);

        let send = self.tx.send(job);
        pin_mut!(send);
        match future::select(send, Timer::at(deadline)).await {
            Either::Left((Ok(()), _)) => {
                debug!("job {id} admitted");
                Ok(pending)
            }
            Either::Left((Err(_), _)) => Err(ServiceError::PoolClosed),
            Either::Right(_) => {
                debug!("job {id} rejected, queue stayed full until the deadline");
                Err(ServiceError::SubmissionTimeout)
            }
        }
    }

    /// Stops admission. Jobs already queued are still executed.
    pub fn close(&self) {
        if self.tx.close() {
            info!("Admission queue closed, draining {} queued jobs", self.tx.len());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Blocks until every worker has exited, then joins the threads. Only
    /// returns after [`WorkerPool::close`].
    pub fn wait_until_finished(&self) {
        self.countdown.wait();
        let handles = std::mem::take(
            &mut *self
                .thread_handles
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            if handle.join().is_err() {
                warn!("a worker thread terminated with a panic");
            }
        }
        info!("All {} workers stopped", self.settings.workers);
    }

    /// Graceful drain: close, then wait for the workers.
    pub fn shutdown(&self) {
        self.close();
        self.wait_until_finished();
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self.settings.workers,
            busy_workers: self.busy.load(Ordering::SeqCst),
            queue_depth: self.tx.len(),
            queue_capacity: self.settings.queue_capacity,
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // workers exit on their own once the queue is closed and empty
        self.tx.close();
    }
}

async fn worker_loop(worker_id: usize, rx: Receiver<Job>, context: WorkerContext) {
    debug!("worker {worker_id} started");
    while let Ok(job) = rx.recv().await {
        let job_id = job.id();
        if job.is_cancelled() {
            debug!("worker {worker_id}: job {job_id} was cancelled while queued");
            job.deliver(ExecutionReport::cancelled());
            continue;
        }

        context.busy.fetch_add(1, Ordering::SeqCst);
        debug!("worker {worker_id}: executing job {job_id}");
        let started = Instant::now();
        let execution = pipeline::execute(
            job.request(),
            job.cancel_signal(),
            &context.scratch,
            context.toolchain.as_ref(),
            &context.limits,
        );
        let report = match AssertUnwindSafe(execution).catch_unwind().await {
            Ok(report) => report,
            Err(_) => {
                warn!("worker {worker_id}: job {job_id} panicked");
                ExecutionReport::internal("Internal error while executing job", started.elapsed())
            }
        };
        context.busy.fetch_sub(1, Ordering::SeqCst);

        if !job.deliver(report) {
            debug!("worker {worker_id}: caller of job {job_id} is gone, result discarded");
        }
    }
    debug!("worker {worker_id} stopped, queue closed");
}
