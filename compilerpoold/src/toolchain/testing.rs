// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

//! In-process toolchain used by the pool and pipeline tests.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_channel::{Receiver, Sender};
use async_io::Timer;
use async_trait::async_trait;

use super::{StepOutput, StepStatus, Toolchain};
use crate::job::CancelSignal;

/// A gate that blocks every run step until it is opened.
#[derive(Debug, Clone)]
pub struct Gate {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl Gate {
    pub fn new() -> Self {
        let (tx, rx) = async_channel::unbounded();
        Self { tx, rx }
    }

    pub fn open(&self) {
        self.tx.close();
    }

    async fn pass(&self) {
        // recv returns Err as soon as the channel is closed
        let _ = self.rx.recv().await;
    }
}

/// Records what it was asked to do. Run output is the source text, so tests can
/// check which job produced which result.
#[derive(Debug)]
pub struct FakeToolchain {
    pub run_delay: Duration,
    pub fail_build_on: Option<String>,
    pub panic_on: Option<String>,
    pub gate: Option<Gate>,
    pub compiled: Mutex<Vec<String>>,
    pub stdin_seen: Mutex<Vec<Option<Vec<u8>>>>,
    pub entries: Mutex<Vec<String>>,
    dirs_in_use: Mutex<HashSet<PathBuf>>,
    running: AtomicUsize,
    pub max_running: AtomicUsize,
}

impl FakeToolchain {
    pub fn new(run_delay: Duration) -> Self {
        Self {
            run_delay,
            fail_build_on: None,
            panic_on: None,
            gate: None,
            compiled: Mutex::new(Vec::new()),
            stdin_seen: Mutex::new(Vec::new()),
            entries: Mutex::new(Vec::new()),
            dirs_in_use: Mutex::new(HashSet::new()),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        }
    }

    pub fn with_gate(mut self, gate: Gate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn compiled(&self) -> Vec<String> {
        self.compiled.lock().unwrap().clone()
    }

    fn source_in(working_dir: &Path) -> String {
        fs::read_dir(working_dir)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .find(|entry| entry.path().extension().is_some_and(|ext| ext == "java"))
            .map(|entry| fs::read_to_string(entry.path()).unwrap())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Toolchain for FakeToolchain {
    async fn compile(
        &self,
        source: &Path,
        working_dir: &Path,
        _limit: Duration,
    ) -> anyhow::Result<StepOutput> {
        assert!(
            self.dirs_in_use
                .lock()
                .unwrap()
                .insert(working_dir.to_path_buf()),
            "scratch directory {} handed out twice",
            working_dir.display()
        );
        let code = fs::read_to_string(source)?;
        self.compiled.lock().unwrap().push(code.clone());

        if self.panic_on.as_deref() == Some(code.as_str()) {
            self.dirs_in_use.lock().unwrap().remove(working_dir);
            panic!("toolchain exploded");
        }
        if self.fail_build_on.as_deref() == Some(code.as_str()) {
            self.dirs_in_use.lock().unwrap().remove(working_dir);
            return Ok(StepOutput {
                output: format!("{}:1: error: broken", source.display()),
                status: StepStatus::Exited(1),
            });
        }
        Ok(StepOutput {
            output: String::new(),
            status: StepStatus::Exited(0),
        })
    }

    async fn run(
        &self,
        entry: &str,
        working_dir: &Path,
        stdin: Option<&[u8]>,
        _limit: Duration,
    ) -> anyhow::Result<StepOutput> {
        self.entries.lock().unwrap().push(entry.to_string());
        self.stdin_seen
            .lock()
            .unwrap()
            .push(stdin.map(|bytes| bytes.to_vec()));

        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now_running, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.pass().await;
        }
        Timer::after(self.run_delay).await;
        self.running.fetch_sub(1, Ordering::SeqCst);

        let output = Self::source_in(working_dir);
        self.dirs_in_use.lock().unwrap().remove(working_dir);
        Ok(StepOutput {
            output,
            status: StepStatus::Exited(0),
        })
    }
}

/// Returns fixed step results, for pipeline tests.
#[derive(Debug)]
pub struct ScriptedToolchain {
    pub build: StepOutput,
    pub run: StepOutput,
    pub runs: AtomicUsize,
    /// Fired while the build step runs, as if the caller left mid-build.
    pub cancel_during_build: Option<CancelSignal>,
}

impl ScriptedToolchain {
    pub fn new(build: StepOutput, run: StepOutput) -> Self {
        Self {
            build,
            run,
            runs: AtomicUsize::new(0),
            cancel_during_build: None,
        }
    }
}

#[async_trait]
impl Toolchain for ScriptedToolchain {
    async fn compile(
        &self,
        _source: &Path,
        _working_dir: &Path,
        _limit: Duration,
    ) -> anyhow::Result<StepOutput> {
        if let Some(cancel) = &self.cancel_during_build {
            cancel.cancel();
        }
        Ok(self.build.clone())
    }

    async fn run(
        &self,
        _entry: &str,
        _working_dir: &Path,
        _stdin: Option<&[u8]>,
        _limit: Duration,
    ) -> anyhow::Result<StepOutput> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(self.run.clone())
    }
}
