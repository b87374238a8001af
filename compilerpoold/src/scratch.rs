// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! Fixed set of reusable working directories.
//!
//! The free handles live in a bounded channel whose capacity equals the number of
//! handles, so returning a handle can never block and a handle is either in the
//! channel or owned by exactly one [`ScratchLease`].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use anyhow::{bail, Context};
use async_channel::{Receiver, Sender, TrySendError};
use log::{debug, info, warn};

const DIR_PREFIX: &str = "compile-scratch-";

/// One working directory. Not `Clone`: the handle is the ownership token.
#[derive(Debug, PartialEq, Eq)]
pub struct ScratchDir {
    id: usize,
    path: PathBuf,
}

impl ScratchDir {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Debug)]
pub struct ScratchPool {
    tx: Sender<ScratchDir>,
    rx: Receiver<ScratchDir>,
    capacity: usize,
    in_use: AtomicUsize,
    sanitize_failures: AtomicU64,
}

impl ScratchPool {
    /// Creates `size` fresh directories below `root`.
    pub fn new(root: &Path, size: usize) -> anyhow::Result<Self> {
        if size == 0 {
            bail!("scratch pool needs at least one directory");
        }
        fs::create_dir_all(root)
            .with_context(|| format!("failed to create scratch root {}", root.display()))?;

        let (tx, rx) = async_channel::bounded(size);
        for id in 0..size {
            let path = tempfile::Builder::new()
                .prefix(DIR_PREFIX)
                .tempdir_in(root)
                .with_context(|| format!("failed to create scratch directory in {}", root.display()))?
                .keep();
            tx.try_send(ScratchDir { id, path })
                .map_err(|_| anyhow::anyhow!("scratch pool rejected a fresh directory"))?;
        }

        info!(
            "Created scratch pool with {} directories under {}",
            size,
            root.display()
        );
        Ok(Self {
            tx,
            rx,
            capacity: size,
            in_use: AtomicUsize::new(0),
            sanitize_failures: AtomicU64::new(0),
        })
    }

    /// Waits until a directory is free. Fails only after [`ScratchPool::teardown`].
    pub async fn acquire(&self) -> anyhow::Result<ScratchLease<'_>> {
        let dir = self
            .rx
            .recv()
            .await
            .context("scratch pool has been torn down")?;
        self.in_use.fetch_add(1, Ordering::SeqCst);
        debug!("acquired scratch directory {}", dir.id);
        Ok(ScratchLease {
            pool: self,
            dir: Some(dir),
        })
    }

    /// Cleans `dir` and makes it available again. A directory that cannot be
    /// cleaned is still returned, so the pool never loses capacity.
    pub fn release(&self, dir: ScratchDir) {
        if let Err(err) = sanitize(&dir.path) {
            self.sanitize_failures.fetch_add(1, Ordering::Relaxed);
            warn!(
                "failed to clean scratch directory {}: {}",
                dir.path.display(),
                err
            );
            if let Err(err) = recreate(&dir.path) {
                warn!(
                    "failed to recreate scratch directory {}, returning it as is: {}",
                    dir.path.display(),
                    err
                );
            }
        }

        self.in_use.fetch_sub(1, Ordering::SeqCst);
        match self.tx.try_send(dir) {
            Ok(()) => {}
            Err(TrySendError::Closed(dir)) => {
                debug!(
                    "scratch pool closed, removing {} directly",
                    dir.path.display()
                );
                let _ = fs::remove_dir_all(&dir.path);
            }
            Err(TrySendError::Full(dir)) => {
                // cannot happen while handles are not duplicated
                warn!(
                    "scratch pool already full, dropping directory {}",
                    dir.path.display()
                );
                let _ = fs::remove_dir_all(&dir.path);
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn free_count(&self) -> usize {
        self.rx.len()
    }

    pub fn in_use_count(&self) -> usize {
        self.in_use.load(Ordering::SeqCst)
    }

    pub fn sanitize_failures(&self) -> u64 {
        self.sanitize_failures.load(Ordering::Relaxed)
    }

    /// Closes the pool and deletes every free directory. Must only run after the
    /// worker pool has been joined. Returns the number of directories removed.
    pub fn teardown(&self) -> usize {
        self.tx.close();
        let mut removed = 0;
        while let Ok(dir) = self.rx.try_recv() {
            match fs::remove_dir_all(&dir.path) {
                Ok(()) => removed += 1,
                Err(err) => warn!("failed to remove {}: {}", dir.path.display(), err),
            }
        }
        if self.in_use_count() > 0 {
            warn!(
                "scratch pool torn down with {} directories still in use",
                self.in_use_count()
            );
        }
        info!("Removed {} scratch directories", removed);
        removed
    }
}

/// A directory on loan to one job. Dropping the lease releases the directory,
/// whichever way the job ended.
#[derive(Debug)]
pub struct ScratchLease<'a> {
    pool: &'a ScratchPool,
    dir: Option<ScratchDir>,
}

impl ScratchLease<'_> {
    pub fn path(&self) -> &Path {
        self.dir
            .as_ref()
            .map(ScratchDir::path)
            .unwrap_or_else(|| Path::new(""))
    }

    pub fn id(&self) -> Option<usize> {
        self.dir.as_ref().map(ScratchDir::id)
    }
}

impl Drop for ScratchLease<'_> {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            self.pool.release(dir);
        }
    }
}

/// Removes everything inside `dir`, keeping `dir` itself. Keeps going after a
/// failed entry and reports the first error.
fn sanitize(dir: &Path) -> io::Result<()> {
    let mut first_error = None;
    for entry in fs::read_dir(dir)? {
        let result = entry.and_then(|entry| {
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                fs::remove_dir_all(path)
            } else {
                fs::remove_file(path)
            }
        });
        if let Err(err) = result {
            first_error.get_or_insert(err);
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn recreate(dir: &Path) -> io::Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }
    fs::create_dir_all(dir)
}
