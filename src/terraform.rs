//! Terraform subprocess wrapper and the [`Provisioner`] implementation over
//! it.
//!
//! Terraform is consumed through a deliberately narrow surface: apply a var
//! set, read an output, destroy. The deployed spec round-trips through a
//! `deployed_spec` output (JSON) so the broker compares against what the
//! cloud actually holds, not what we last asked for.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::broker::{Endpoints, Provisioner};
use crate::model::InfraConfig;

pub struct Terraform {
    dir: PathBuf,
    apply_timeout: Duration,
}

impl Terraform {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Terraform {
            dir: dir.into(),
            apply_timeout: Duration::from_secs(1800),
        }
    }

    async fn exec(&self, args: &[String], timeout: Duration) -> Result<(i32, String, String)> {
        debug!(dir = %self.dir.display(), ?args, "terraform");

        let child = Command::new("terraform")
            .args(args)
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context("spawning terraform")?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| anyhow!("terraform timed out after {}s", timeout.as_secs()))?
            .context("waiting for terraform")?;

        Ok((
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stdout).into_owned(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ))
    }

    /// Initialize the working directory if it has not been initialized yet.
    pub async fn ensure_init(&self) -> Result<()> {
        if self.dir.join(".terraform").exists() {
            return Ok(());
        }
        info!(dir = %self.dir.display(), "terraform init");
        let (code, _, stderr) = self
            .exec(&["init".to_string(), "-input=false".to_string()], self.apply_timeout)
            .await?;
        if code != 0 {
            bail!("terraform init failed: {stderr}");
        }
        Ok(())
    }

    pub async fn apply(&self, vars: &BTreeMap<String, String>) -> Result<()> {
        let mut args = vec![
            "apply".to_string(),
            "-auto-approve".to_string(),
            "-input=false".to_string(),
        ];
        for (key, value) in vars {
            args.push("-var".to_string());
            args.push(format!("{key}={value}"));
        }
        let (code, _, stderr) = self.exec(&args, self.apply_timeout).await?;
        if code != 0 {
            bail!("terraform apply failed: {stderr}");
        }
        Ok(())
    }

    /// Read one output value. Missing, empty, or warning-polluted outputs
    /// come back as `None` rather than an error.
    pub async fn output(&self, name: &str) -> Result<Option<String>> {
        let args = vec!["output".to_string(), "-raw".to_string(), name.to_string()];
        let (code, stdout, _) = self.exec(&args, Duration::from_secs(60)).await?;
        if code != 0 {
            return Ok(None);
        }
        let value = stdout.trim().trim_matches('"').to_string();
        if value.is_empty() || value == "null" || value.starts_with('╷') || value.contains("Warning")
        {
            return Ok(None);
        }
        Ok(Some(value))
    }

    pub async fn destroy(&self) -> Result<()> {
        let args = vec![
            "destroy".to_string(),
            "-auto-approve".to_string(),
            "-input=false".to_string(),
        ];
        let (code, _, stderr) = self.exec(&args, self.apply_timeout).await?;
        if code != 0 {
            bail!("terraform destroy failed: {stderr}");
        }
        Ok(())
    }
}

/// [`Provisioner`] over a terraform working directory. The service plugin
/// supplies the var set that applies a spec and the var set that disables the
/// service deployment while keeping the load-generator host.
pub struct TerraformProvisioner {
    tf: Terraform,
    destroy_vars: BTreeMap<String, String>,
}

impl TerraformProvisioner {
    pub fn new(dir: impl Into<PathBuf>, destroy_vars: BTreeMap<String, String>) -> Self {
        TerraformProvisioner {
            tf: Terraform::new(dir),
            destroy_vars,
        }
    }
}

#[async_trait]
impl Provisioner for TerraformProvisioner {
    async fn apply(&self, _spec: &InfraConfig, vars: &BTreeMap<String, String>) -> Result<()> {
        self.tf.ensure_init().await?;
        self.tf.apply(vars).await
    }

    async fn current_spec(&self) -> Result<Option<InfraConfig>> {
        let Some(raw) = self.tf.output("deployed_spec").await? else {
            return Ok(None);
        };
        match serde_json::from_str::<InfraConfig>(&raw) {
            Ok(spec) => Ok(Some(spec)),
            Err(err) => {
                // Unreadable state forces recreation rather than a guess.
                warn!(%err, "deployed_spec output is unreadable, treating deployment as absent");
                Ok(None)
            }
        }
    }

    async fn endpoints(&self) -> Result<Option<Endpoints>> {
        let service_addr = self.tf.output("service_addr").await?;
        let bench_host = self.tf.output("benchmark_vm_ip").await?;
        Ok(match (service_addr, bench_host) {
            (Some(service_addr), Some(bench_host)) => Some(Endpoints {
                service_addr,
                bench_host,
            }),
            _ => None,
        })
    }

    async fn destroy(&self) -> Result<()> {
        self.tf.ensure_init().await?;
        // Nothing deployed is not an error: applying the disable vars over an
        // empty state is a no-op from the service's point of view.
        self.tf.apply(&self.destroy_vars).await
    }

    async fn teardown_all(&self) -> Result<()> {
        self.tf.destroy().await
    }
}
