//! Render orchestrator: validates a request, starts one worker process for
//! it and supervises that process under a hard timeout.
//!
//! Every request gets a fresh child process. Nothing is shared between
//! requests: each child receives its own [`RenderParams`] in its arguments,
//! owns its own browser, and can crash without affecting the server.

use crate::config::ServiceConfig;
use crate::protocol::{WorkerMessage, WorkerOptions};
use crate::request::{normalize_target, RenderParams, RenderRequest};
use crate::{Error, Result};
use log::{debug, info, warn};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, Command};

/// How long to keep reading stdout after the worker has exited.
const DRAIN_GRACE: Duration = Duration::from_secs(1);
/// How long a worker may linger after it has reported.
const REAP_GRACE: Duration = Duration::from_secs(30);

/// How a worker process is started
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    /// Arguments placed before the URL, credentials and options
    pub prefix: Vec<OsString>,
}

impl WorkerCommand {
    pub fn new<I, S>(program: impl Into<PathBuf>, prefix: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: program.into(),
            prefix: prefix.into_iter().map(Into::into).collect(),
        }
    }

    /// This executable's `render` subcommand.
    pub fn current_exe() -> Result<Self> {
        let exe = std::env::current_exe()
            .map_err(|e| Error::ConfigError(format!("cannot locate own executable: {}", e)))?;
        Ok(Self::new(exe, ["render"]))
    }
}

/// Whichever happened first while supervising a worker.
enum Resolution {
    Reported(Option<WorkerMessage>),
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
}

/// Supervises render workers
pub struct Orchestrator {
    config: ServiceConfig,
    worker: WorkerCommand,
}

impl Orchestrator {
    pub fn new(config: ServiceConfig, worker: WorkerCommand) -> Self {
        Self { config, worker }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Render one request. Invalid requests are rejected before any process
    /// is started; everything else resolves within the request timeout.
    pub async fn submit(&self, request: RenderRequest) -> Result<PathBuf> {
        let target = normalize_target(&request, &self.config.internal_host)?;
        let params = RenderParams::resolve(&request, &self.config);
        let options = WorkerOptions::new(&request, params, self.config.store.dir.clone());
        let options_json = serde_json::to_string(&options)
            .map_err(|e| Error::InvalidRequest(format!("cannot encode render options: {}", e)))?;

        info!(
            "Generating PDF for URL: {} (width {}px, scale {})",
            target, params.width_px, params.device_scale_factor
        );

        let mut command = Command::new(&self.worker.program);
        command
            .args(&self.worker.prefix)
            .arg(target.as_str())
            .arg(self.config.credentials.joined())
            .arg(options_json)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        // The worker leads its own process group so the browser it launches
        // can be killed together with it.
        #[cfg(unix)]
        command.process_group(0);

        let child = command
            .spawn()
            .map_err(|e| Error::ProcessFailure(format!("failed to start render worker: {}", e)))?;

        let path = supervise(child, self.config.request_timeout).await?;

        if tokio::fs::metadata(&path).await.is_err() {
            return Err(Error::ProcessFailure(format!(
                "worker reported {} but the file does not exist",
                path.display()
            )));
        }
        Ok(path)
    }
}

/// Race the worker's report, its exit and the timeout. The select resolves
/// exactly once, so one request can never produce two answers.
async fn supervise(mut child: Child, ceiling: Duration) -> Result<PathBuf> {
    let group = WorkerGroup(child.id());
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::ProcessFailure("worker stdout is not captured".into()))?;
    let mut lines = BufReader::new(stdout).lines();

    let resolution = tokio::select! {
        biased;
        message = read_report(&mut lines) => Resolution::Reported(message),
        status = child.wait() => Resolution::Exited(status),
        _ = tokio::time::sleep(ceiling) => Resolution::TimedOut,
    };

    match resolution {
        Resolution::Reported(Some(message)) => {
            reap(child, group);
            message.into_outcome()
        }
        Resolution::Reported(None) => {
            // stdout closed without a report: the process is gone or going
            let status = match tokio::time::timeout(DRAIN_GRACE, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    group.kill();
                    let _ = child.start_kill();
                    child.wait().await
                }
            };
            group.kill();
            Err(exited_without_report(status))
        }
        Resolution::Exited(status) => {
            // the report may still be sitting in the pipe
            let outcome = match tokio::time::timeout(DRAIN_GRACE, read_report(&mut lines)).await {
                Ok(Some(message)) => message.into_outcome(),
                _ => Err(exited_without_report(status)),
            };
            // whatever a crashed worker left behind
            group.kill();
            outcome
        }
        Resolution::TimedOut => {
            warn!("Render worker exceeded {}s, killing it", ceiling.as_secs());
            group.kill();
            if let Err(e) = child.start_kill() {
                debug!("Failed to kill render worker: {}", e);
            }
            let _ = child.wait().await;
            Err(Error::RequestTimeout(ceiling.as_secs()))
        }
    }
}

/// Process group led by a worker. Holds the worker's pid from spawn time,
/// since the child handle forgets it once the worker has been waited on.
#[derive(Debug, Clone, Copy)]
struct WorkerGroup(Option<u32>);

impl WorkerGroup {
    /// SIGKILL every process left in the group, the browser included.
    #[cfg(unix)]
    fn kill(self) {
        let Some(pgid) = self.0.and_then(|pid| i32::try_from(pid).ok()) else {
            return;
        };
        // Safety: plain syscall; ESRCH for an empty group is expected.
        let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
        if rc == 0 {
            debug!("killed process group {}", pgid);
        }
    }

    #[cfg(not(unix))]
    fn kill(self) {}
}

/// First stdout line that is a worker message; `None` once the stream ends.
async fn read_report<R: AsyncBufRead + Unpin>(lines: &mut Lines<R>) -> Option<WorkerMessage> {
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match WorkerMessage::parse_line(&line) {
                Some(message) => return Some(message),
                None => debug!("worker: {}", line),
            },
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to read worker output: {}", e);
                return None;
            }
        }
    }
}

fn exited_without_report(status: std::io::Result<ExitStatus>) -> Error {
    match status {
        Ok(status) if status.success() => {
            Error::ProcessFailure("PDF generation process exited without reporting a result".into())
        }
        Ok(status) => Error::ProcessFailure(format!(
            "PDF generation process exited with error ({})",
            status
        )),
        Err(e) => Error::ProcessFailure(format!("PDF generation process error: {}", e)),
    }
}

/// Wait for a worker that already reported. It gets `REAP_GRACE` to finish
/// its teardown; after that it is killed along with its group.
fn reap(mut child: Child, group: WorkerGroup) {
    tokio::spawn(async move {
        match tokio::time::timeout(REAP_GRACE, child.wait()).await {
            Ok(Ok(status)) => debug!("render worker exited with {}", status),
            Ok(Err(e)) => warn!("Failed to wait for render worker: {}", e),
            Err(_) => {
                warn!("Render worker lingered after reporting, killing it");
                let _ = child.start_kill();
                let _ = child.wait().await;
            }
        }
        group.kill();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn report_is_found_after_noise() {
        let (mut tx, rx) = tokio::io::duplex(256);
        tx.write_all(b"DevTools listening\n{\"success\":true,\"path\":\"out/a.pdf\"}\n")
            .await
            .unwrap();
        drop(tx);
        let mut lines = BufReader::new(rx).lines();
        let message = read_report(&mut lines).await.unwrap();
        assert_eq!(message.path.as_deref(), Some("out/a.pdf"));
        assert!(read_report(&mut lines).await.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn clean_exit_without_report_is_still_a_failure() {
        use std::os::unix::process::ExitStatusExt;
        let err = exited_without_report(Ok(ExitStatus::from_raw(0)));
        assert!(matches!(err, Error::ProcessFailure(ref m) if m.contains("without reporting")));
        let err = exited_without_report(Ok(ExitStatus::from_raw(3 << 8)));
        assert!(matches!(err, Error::ProcessFailure(ref m) if m.contains("exited with error")));
    }
}
