//! Remote command execution over SSH.
//!
//! The one primitive the broker and the benchmark executor consume: run a
//! command on a host, bounded by a timeout, capture exit code and combined
//! output. Kept behind a trait so tests substitute a scripted stub.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub code: i32,
    pub output: String,
}

impl ExecOutput {
    pub fn ok(&self) -> bool {
        self.code == 0
    }
}

#[async_trait]
pub trait RemoteExec: Send + Sync {
    /// Run `command` on `host`. An elapsed timeout is an error, not a
    /// nonzero exit.
    async fn run(&self, host: &str, command: &str, timeout: Duration) -> Result<ExecOutput>;
}

/// SSH subprocess executor. Host keys are not checked: deployment VMs are
/// recreated constantly and their keys churn with them.
pub struct SshExec {
    pub user: String,
    pub connect_timeout_s: u32,
}

impl Default for SshExec {
    fn default() -> Self {
        SshExec {
            user: "root".to_string(),
            connect_timeout_s: 10,
        }
    }
}

impl SshExec {
    fn ssh_args(&self, host: &str, command: &str) -> Vec<String> {
        vec![
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_s),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
            format!("{}@{}", self.user, host),
            command.to_string(),
        ]
    }
}

#[async_trait]
impl RemoteExec for SshExec {
    async fn run(&self, host: &str, command: &str, timeout: Duration) -> Result<ExecOutput> {
        debug!(host, command, "ssh");

        let child = Command::new("ssh")
            .args(self.ssh_args(host, command))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context("spawning ssh")?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| anyhow!("ssh to {host} timed out after {}s", timeout.as_secs()))?
            .context("waiting for ssh")?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(ExecOutput {
            code: output.status.code().unwrap_or(-1),
            output: combined,
        })
    }
}

/// Quick reachability probe: can we run anything at all on the host?
pub async fn reachable(remote: &dyn RemoteExec, host: &str) -> bool {
    matches!(
        remote.run(host, "echo ok", Duration::from_secs(10)).await,
        Ok(out) if out.ok()
    )
}

/// Drop stale host keys on a jump VM. Recreated deployments change keys, and
/// a stale entry turns every nested SSH into a hard failure. Best-effort.
pub async fn clear_known_hosts(remote: &dyn RemoteExec, host: &str) {
    let _ = remote
        .run(host, "rm -f /root/.ssh/known_hosts", Duration::from_secs(10))
        .await;
}
