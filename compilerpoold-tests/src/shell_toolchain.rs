// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use async_trait::async_trait;
use compilerpoold::toolchain::process::run_with_limit;
use compilerpoold::toolchain::{StepOutput, Toolchain};

/// Treats the submitted code as a POSIX shell script: "compiling" is a syntax
/// check with `sh -n`, running executes it. Lets the whole service be exercised
/// on hosts without a JDK.
#[derive(Debug, Clone, Default)]
pub struct ShellToolchain;

#[async_trait]
impl Toolchain for ShellToolchain {
    async fn compile(
        &self,
        source: &Path,
        working_dir: &Path,
        limit: Duration,
    ) -> anyhow::Result<StepOutput> {
        let mut command = Command::new("sh");
        command.arg("-n").arg(source).current_dir(working_dir);
        run_with_limit(command, None, limit).await
    }

    async fn run(
        &self,
        entry: &str,
        working_dir: &Path,
        stdin: Option<&[u8]>,
        limit: Duration,
    ) -> anyhow::Result<StepOutput> {
        let mut command = Command::new("sh");
        command
            .arg(format!("{entry}.java"))
            .current_dir(working_dir);
        run_with_limit(command, stdin, limit).await
    }
}
