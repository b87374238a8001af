// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;

use super::process::run_with_limit;
use super::{StepOutput, Toolchain};

/// `javac` + `java` from the host's PATH (or whatever the config points at).
#[derive(Debug, Clone)]
pub struct JavaToolchain {
    compiler: String,
    runtime: String,
}

impl JavaToolchain {
    pub fn new(compiler: impl Into<String>, runtime: impl Into<String>) -> Self {
        Self {
            compiler: compiler.into(),
            runtime: runtime.into(),
        }
    }
}

impl Default for JavaToolchain {
    fn default() -> Self {
        Self::new("javac", "java")
    }
}

#[async_trait]
impl Toolchain for JavaToolchain {
    async fn compile(
        &self,
        source: &Path,
        working_dir: &Path,
        limit: Duration,
    ) -> anyhow::Result<StepOutput> {
        debug!("compiling {} with {}", source.display(), self.compiler);
        let mut command = Command::new(&self.compiler);
        command
            .args(["-encoding", "UTF-8"])
            .arg(source)
            .current_dir(working_dir);
        run_with_limit(command, None, limit).await
    }

    async fn run(
        &self,
        entry: &str,
        working_dir: &Path,
        stdin: Option<&[u8]>,
        limit: Duration,
    ) -> anyhow::Result<StepOutput> {
        debug!("running {} in {}", entry, working_dir.display());
        // explicit classpath, an inherited CLASSPATH would hide the scratch dir
        let mut command = Command::new(&self.runtime);
        command
            .args(["-cp", "."])
            .arg(entry)
            .current_dir(working_dir);
        run_with_limit(command, stdin, limit).await
    }
}
