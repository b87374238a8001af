// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::fs::File;
use std::io::{self, Write};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use async_io::{Async, Timer};
use futures::future::{self, Either};
use futures::{pin_mut, AsyncReadExt};
use log::debug;
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::signal::{killpg, Signal};
use nix::sys::wait::{waitid, Id, WaitPidFlag, WaitStatus};
use nix::unistd::{pipe2, Pid};

use super::{StepOutput, StepStatus};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);
const DRAIN_GRACE: Duration = Duration::from_millis(200);
const READ_CHUNK: usize = 8192;
const MAX_CAPTURED_BYTES: usize = 1024 * 1024;

#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

impl Captured {
    fn push(&mut self, chunk: &[u8]) {
        let room = MAX_CAPTURED_BYTES.saturating_sub(self.bytes.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        self.bytes.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    fn into_string(self) -> String {
        let mut text = String::from_utf8_lossy(&self.bytes).into_owned();
        if self.truncated {
            text.push_str("\n[output truncated]\n");
        }
        text
    }
}

/// Spawns `command` in its own process group with stdout and stderr merged into
/// one pipe, feeds `stdin` if given, and waits at most `limit`.
///
/// When the limit elapses the whole process group is killed and whatever was
/// written before that is returned with [`StepStatus::TimedOut`]. The group is
/// also killed after a normal exit, so nothing the step left running in the
/// background survives it. An `Err` means the process could not be started or
/// observed at all.
pub async fn run_with_limit(
    mut command: Command,
    stdin: Option<&[u8]>,
    limit: Duration,
) -> anyhow::Result<StepOutput> {
    let program = command.get_program().to_string_lossy().into_owned();

    // O_CLOEXEC: processes spawned concurrently by other workers must not
    // inherit our write end, or we would never see EOF.
    let (read_end, write_end) = pipe2(OFlag::O_CLOEXEC).context("failed to create output pipe")?;
    let stderr_end = write_end
        .try_clone()
        .context("failed to duplicate output pipe")?;
    let mut reader =
        Async::new(File::from(read_end)).context("failed to register output pipe")?;

    command
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::from(write_end))
        .stderr(Stdio::from(stderr_end))
        .process_group(0);

    let spawned = command.spawn();
    // the command still owns the parent's copies of the write end
    drop(command);
    let mut child = spawned.with_context(|| format!("failed to spawn {program}"))?;
    debug!("spawned {} as pid {}", program, child.id());

    if let Some(bytes) = stdin {
        if let Err(err) = feed_stdin(&mut child, bytes) {
            kill_process_group(&mut child);
            let _ = child.wait();
            return Err(err);
        }
    }

    let mut captured = Captured::default();
    let finished = {
        let completion = read_until_exit(&mut reader, &mut child, &mut captured);
        pin_mut!(completion);
        match future::select(completion, Timer::after(limit)).await {
            Either::Left((status, _)) => Some(status),
            Either::Right(_) => None,
        }
    };

    let status = match finished {
        Some(Ok(())) => {
            // the leader is an unreaped zombie here, so the group id is still ours
            kill_process_group(&mut child);
            let status = child
                .wait()
                .with_context(|| format!("failed to reap {program}"))?;
            status_of(status)
        }
        Some(Err(err)) => {
            kill_process_group(&mut child);
            let _ = child.wait();
            return Err(err).with_context(|| format!("failed to collect output of {program}"));
        }
        None => {
            debug!("{program} exceeded {limit:?}, killing its process group");
            kill_process_group(&mut child);
            drain(&mut reader, &mut captured).await;
            let _ = child.wait();
            StepStatus::TimedOut(limit)
        }
    };

    Ok(StepOutput {
        output: captured.into_string(),
        status,
    })
}

fn feed_stdin(child: &mut Child, bytes: &[u8]) -> anyhow::Result<()> {
    let Some(mut pipe) = child.stdin.take() else {
        return Ok(());
    };
    let bytes = bytes.to_vec();
    thread::Builder::new()
        .name("stdin-feeder".into())
        .spawn(move || {
            // dropping the pipe afterwards closes the child's stdin
            if let Err(err) = pipe.write_all(&bytes) {
                if err.kind() != io::ErrorKind::BrokenPipe {
                    debug!("failed to feed stdin: {err}");
                }
            }
        })
        .context("failed to start stdin feeder")?;
    Ok(())
}

async fn read_to_eof(reader: &mut Async<File>, captured: &mut Captured) -> io::Result<()> {
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => return Ok(()),
            Ok(n) => captured.push(&chunk[..n]),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
}

/// Returns once the child has exited, without reaping it.
async fn read_until_exit(
    reader: &mut Async<File>,
    child: &mut Child,
    captured: &mut Captured,
) -> io::Result<()> {
    read_to_eof(reader, captured).await?;
    let pid = Pid::from_raw(child.id() as i32);
    let flags = WaitPidFlag::WEXITED | WaitPidFlag::WNOHANG | WaitPidFlag::WNOWAIT;
    loop {
        match waitid(Id::Pid(pid), flags) {
            Ok(WaitStatus::StillAlive) => Timer::after(EXIT_POLL_INTERVAL).await,
            Ok(_) => return Ok(()),
            Err(Errno::EINTR) => continue,
            Err(err) => return Err(io::Error::from(err)),
        };
    }
}

/// Picks up output that was still buffered in the pipe when the group was killed.
async fn drain(reader: &mut Async<File>, captured: &mut Captured) {
    let reading = read_to_eof(reader, captured);
    pin_mut!(reading);
    if let Either::Right(_) = future::select(reading, Timer::after(DRAIN_GRACE)).await {
        debug!("output pipe still open after kill, dropping the rest");
    }
}

fn kill_process_group(child: &mut Child) {
    let pgid = Pid::from_raw(child.id() as i32);
    match killpg(pgid, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(err) => {
            debug!("killpg({pgid}) failed: {err}, killing the child only");
            let _ = child.kill();
        }
    }
}

fn status_of(status: ExitStatus) -> StepStatus {
    match (status.code(), status.signal()) {
        (Some(code), _) => StepStatus::Exited(code),
        (None, Some(signal)) => StepStatus::Signaled(signal),
        (None, None) => StepStatus::Exited(-1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use std::time::Instant;

    fn sh(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.args(["-c", script]);
        command
    }

    #[test]
    fn test_captures_stdout_and_stderr() {
        let out = block_on(run_with_limit(
            sh("echo out; echo err 1>&2"),
            None,
            Duration::from_secs(5),
        ))
        .unwrap();

        assert_eq!(out.status, StepStatus::Exited(0));
        assert!(out.output.contains("out\n"));
        assert!(out.output.contains("err\n"));
    }

    #[test]
    fn test_reports_exit_code() {
        let out = block_on(run_with_limit(
            sh("echo failing; exit 3"),
            None,
            Duration::from_secs(5),
        ))
        .unwrap();

        assert_eq!(out.status, StepStatus::Exited(3));
        assert!(!out.success());
        assert_eq!(out.output, "failing\n");
    }

    #[test]
    fn test_feeds_stdin() {
        let out = block_on(run_with_limit(
            Command::new("cat"),
            Some(b"line one\nline two\n"),
            Duration::from_secs(5),
        ))
        .unwrap();

        assert!(out.success());
        assert_eq!(out.output, "line one\nline two\n");
    }

    #[test]
    fn test_timeout_keeps_partial_output() {
        let started = Instant::now();
        let out = block_on(run_with_limit(
            sh("echo partial; sleep 30"),
            None,
            Duration::from_millis(300),
        ))
        .unwrap();

        assert_eq!(out.status, StepStatus::TimedOut(Duration::from_millis(300)));
        assert_eq!(out.output, "partial\n");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_timeout_kills_background_children() {
        // the backgrounded sleep keeps the pipe open; only a group kill frees it
        let started = Instant::now();
        let out = block_on(run_with_limit(
            sh("sleep 30 & echo started; wait"),
            None,
            Duration::from_millis(300),
        ))
        .unwrap();

        assert!(matches!(out.status, StepStatus::TimedOut(_)));
        assert_eq!(out.output, "started\n");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_normal_exit_kills_detached_children() {
        let dir = tempfile::tempdir().unwrap();
        let mut command = sh("(sleep 0.3; touch leaked) >/dev/null 2>&1 </dev/null & echo done");
        command.current_dir(dir.path());

        let out = block_on(run_with_limit(command, None, Duration::from_secs(5))).unwrap();
        assert_eq!(out.status, StepStatus::Exited(0));
        assert_eq!(out.output, "done\n");

        std::thread::sleep(Duration::from_millis(700));
        assert!(!dir.path().join("leaked").exists());
    }

    #[test]
    fn test_missing_program_is_an_error() {
        let result = block_on(run_with_limit(
            Command::new("/nonexistent/compilerpoold-toolchain"),
            None,
            Duration::from_secs(1),
        ));
        assert!(result.is_err());
    }

    #[test]
    fn test_capture_is_bounded() {
        let mut captured = Captured::default();
        captured.push(&vec![b'a'; MAX_CAPTURED_BYTES - 1]);
        captured.push(b"bcd");

        let text = captured.into_string();
        assert!(text.starts_with("aaa"));
        assert!(text.ends_with("b\n[output truncated]\n"));
    }
}
