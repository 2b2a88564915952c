//! Isolated execution of crash-prone external helpers.
//!
//! Browser automation and similar collaborators run as separate helper
//! processes speaking JSON over stdio: one request object in, one response
//! object out. A hard wall-clock timeout bounds every call — on expiry the
//! helper gets SIGTERM, a short grace period, then a forced kill. Control
//! always returns to the caller, so a hung helper can never wedge the worker
//! loop or leave a task stuck in `running`.

use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};

use crate::error::SourceError;

/// Grace period between SIGTERM and the forced kill.
const TERM_GRACE_SECS: u64 = 2;

fn default_timeout_secs() -> u64 {
    120
}

/// A configured helper process invocation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelperCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Run a helper process with a bounded wait.
///
/// Writes `request` to the helper's stdin, closes it, and reads stdout to
/// EOF. Non-zero exit or unparseable output is a `Process`/`Payload` error;
/// exceeding the timeout terminates the helper and returns `Timeout`.
pub async fn run_isolated(
    cmd: &HelperCommand,
    request: &serde_json::Value,
) -> Result<serde_json::Value, SourceError> {
    let mut child = Command::new(&cmd.program)
        .args(&cmd.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| SourceError::Process(format!("failed to spawn {}: {}", cmd.program, e)))?;

    {
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| SourceError::Process("helper stdin unavailable".into()))?;
        stdin.write_all(request.to_string().as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.shutdown().await?;
    }

    match tokio::time::timeout(Duration::from_secs(cmd.timeout_secs), drain(&mut child)).await {
        Ok(Ok((stdout, stderr, success))) => {
            if !success {
                let detail = if stderr.trim().is_empty() {
                    stdout.trim().to_string()
                } else {
                    stderr.trim().to_string()
                };
                return Err(SourceError::Process(format!(
                    "{} failed: {}",
                    cmd.program, detail
                )));
            }
            serde_json::from_str(stdout.trim()).map_err(|e| {
                SourceError::Payload(format!("{} produced invalid JSON: {}", cmd.program, e))
            })
        }
        Ok(Err(io)) => Err(io.into()),
        Err(_elapsed) => {
            log::warn!(
                "Helper {} exceeded {}s timeout, terminating",
                cmd.program,
                cmd.timeout_secs
            );
            terminate(&mut child, &cmd.program).await;
            Err(SourceError::Timeout(cmd.timeout_secs))
        }
    }
}

/// Read the helper's stdout and stderr to EOF, then reap it.
async fn drain(child: &mut Child) -> std::io::Result<(String, String, bool)> {
    let mut stdout_pipe = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "helper stdout unavailable"))?;
    let mut stderr_pipe = child
        .stderr
        .take()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "helper stderr unavailable"))?;

    let mut stdout = String::new();
    let mut stderr = String::new();
    let (out_res, err_res) = tokio::join!(
        stdout_pipe.read_to_string(&mut stdout),
        stderr_pipe.read_to_string(&mut stderr),
    );
    out_res?;
    err_res?;

    let status = child.wait().await?;
    Ok((stdout, stderr, status.success()))
}

/// SIGTERM, short grace, then forced kill.
async fn terminate(child: &mut Child, program: &str) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            if tokio::time::timeout(Duration::from_secs(TERM_GRACE_SECS), child.wait())
                .await
                .is_ok()
            {
                log::debug!("Helper {} exited after SIGTERM", program);
                return;
            }
            log::warn!("Helper {} ignored SIGTERM, killing", program);
        }
    }
    let _ = child.start_kill();
    let _ = child.wait().await;
}
