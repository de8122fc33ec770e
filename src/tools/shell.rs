//! `run_shell`: one non-interactive `sh -c` per call, bounded by a timeout.
//!
//! The command runs in its own process group. A timeout, or dropping the
//! call mid-flight, kills the whole group, not only `sh`.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::errors::ToolError;

pub async fn run_shell(
    command: &str,
    working_dir: &Path,
    limit: Duration,
) -> Result<String, ToolError> {
    debug!(command, dir = %working_dir.display(), "running shell command");

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .env("CI", "true")
        .env("DEBIAN_FRONTEND", "noninteractive")
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let child = cmd.spawn().map_err(ToolError::CommandFailed)?;
    let group = ProcessGroup::of(child.id());

    let output = match timeout(limit, child.wait_with_output()).await {
        Ok(result) => {
            group.release();
            result.map_err(ToolError::CommandFailed)?
        }
        Err(_) => {
            warn!(command, limit_ms = limit.as_millis() as u64, "shell command timed out");
            return Err(ToolError::Timeout { limit });
        }
    };

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.is_empty() {
        text.push_str("\nstderr:\n");
        text.push_str(&stderr);
    }
    let code = output.status.code().unwrap_or(-1);
    if code != 0 {
        text.push_str(&format!("\nreturn code: {}", code));
    }

    if text.is_empty() {
        Ok("(no output)".to_string())
    } else {
        Ok(text)
    }
}

/// Kills a command's process group when dropped, unless released.
struct ProcessGroup(Option<i32>);

impl ProcessGroup {
    fn of(leader: Option<u32>) -> Self {
        Self(leader.and_then(|pid| i32::try_from(pid).ok()))
    }

    /// The command finished on its own; leave the group alone.
    fn release(mut self) {
        self.0 = None;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if let Some(pgid) = self.0.take() {
            kill_group(pgid);
        }
    }
}

#[cfg(unix)]
fn kill_group(pgid: i32) {
    debug!(pgid, "killing shell process group");
    // SAFETY: a negative pid signals the group created by `process_group(0)`.
    unsafe {
        libc::kill(-pgid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: i32) {}
