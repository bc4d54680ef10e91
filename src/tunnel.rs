use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::LifecycleError;
use crate::types::TunnelHandle;

/// Installs and removes the local tunnel agent.
#[async_trait]
pub trait TunnelProvisioner: Send + Sync {
    /// All-or-nothing: on error nothing is left installed or on disk.
    async fn install(&self) -> Result<TunnelHandle, LifecycleError>;
    /// Best-effort; failures are logged, never returned.
    async fn uninstall(&self, handle: &TunnelHandle);
}

const INSTALL_STEPS: &[&[&str]] = &[&["service", "install"], &["service", "start"]];
const UNINSTALL_STEPS: &[&[&str]] = &[&["down"], &["service", "stop"], &["service", "uninstall"]];

/// Netbird agent copied from a pre-bundled per-platform payload.
#[derive(Debug, Clone)]
pub struct NetbirdTunnel {
    payload: PathBuf,
    setup_key: String,
}

impl NetbirdTunnel {
    pub fn new(payload: impl Into<PathBuf>, setup_key: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            setup_key: setup_key.into(),
        }
    }

    async fn materialize(&self) -> Result<TunnelHandle> {
        let file_name = self
            .payload
            .file_name()
            .context("tunnel payload path has no file name")?;
        let data = tokio::fs::read(&self.payload)
            .await
            .with_context(|| format!("failed to read tunnel payload: {}", self.payload.display()))?;
        debug!(bytes = data.len(), "tunnel payload loaded");

        let work_dir = tempfile::Builder::new()
            .prefix("netbird")
            .tempdir()
            .context("failed to create temp directory")?
            .keep();
        let binary_path = work_dir.join(file_name);

        debug!(path = %binary_path.display(), "writing tunnel binary");
        if let Err(e) = write_executable(&binary_path, &data).await {
            remove_dir(&work_dir).await;
            return Err(e);
        }
        Ok(TunnelHandle {
            binary_path,
            work_dir,
            installed: false,
        })
    }

    async fn start(&self, handle: &TunnelHandle) -> Result<()> {
        for args in INSTALL_STEPS {
            run_step(&handle.binary_path, args).await?;
        }
        run_step(&handle.binary_path, &["up", "--setup-key", self.setup_key.as_str()]).await
    }
}

async fn write_executable(path: &Path, data: &[u8]) -> Result<()> {
    tokio::fs::write(path, data)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
            .await
            .with_context(|| format!("failed to mark {} executable", path.display()))?;
    }
    Ok(())
}

/// Run one subcommand of the tunnel binary; its stdout goes to the debug log.
async fn run_step(binary: &Path, args: &[&str]) -> Result<()> {
    debug!(cmd = %args.join(" "), "running tunnel command");
    let output = Command::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .with_context(|| format!("failed to run {} {}", binary.display(), args.join(" ")))?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.trim().is_empty() {
        debug!(output = %stdout.trim(), "tunnel command output");
    }
    if !output.status.success() {
        bail!(
            "`{}` exited with {}: {}",
            args.join(" "),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

async fn remove_dir(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        warn!(dir = %dir.display(), error = %e, "failed to remove temporary directory");
    }
}

#[async_trait]
impl TunnelProvisioner for NetbirdTunnel {
    async fn install(&self) -> Result<TunnelHandle, LifecycleError> {
        println!("Installing Tunnel...");
        let mut handle = self
            .materialize()
            .await
            .map_err(|e| LifecycleError::Provisioning(format!("{e:#}")))?;
        if let Err(e) = self.start(&handle).await {
            // Roll back whatever half-started, then drop the files.
            self.uninstall(&handle).await;
            return Err(LifecycleError::Provisioning(format!("{e:#}")));
        }
        handle.installed = true;
        Ok(handle)
    }

    async fn uninstall(&self, handle: &TunnelHandle) {
        println!("Uninstalling Tunnel");
        for args in UNINSTALL_STEPS {
            if let Err(e) = run_step(&handle.binary_path, args).await {
                warn!(error = %format!("{e:#}"), "tunnel teardown step failed");
            }
        }
        if let Err(e) = tokio::fs::remove_file(&handle.binary_path).await {
            warn!(
                path = %handle.binary_path.display(),
                error = %e,
                "failed to remove tunnel binary"
            );
        }
        remove_dir(&handle.work_dir).await;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn fake_agent(dir: &Path, log: &Path, fail_on: Option<&str>) -> PathBuf {
        let guard = fail_on
            .map(|word| format!("[ \"$1\" = \"{word}\" ] && exit 3\n"))
            .unwrap_or_default();
        let script = format!("#!/bin/sh\necho \"$@\" >> {}\n{guard}exit 0\n", log.display());
        let path = dir.join("netbird");
        std::fs::write(&path, script).unwrap();
        path
    }

    #[tokio::test]
    async fn install_then_uninstall_runs_agent_commands_and_cleans_files() {
        let scratch = tempfile::tempdir().unwrap();
        let log = scratch.path().join("calls.log");
        let tunnel = NetbirdTunnel::new(fake_agent(scratch.path(), &log, None), "KEY-1");

        let handle = tunnel.install().await.expect("install");
        assert!(handle.installed);
        assert!(handle.binary_path.exists());
        assert_ne!(handle.work_dir, scratch.path());

        tunnel.uninstall(&handle).await;
        assert!(!handle.work_dir.exists());

        let calls = std::fs::read_to_string(&log).unwrap();
        let lines: Vec<&str> = calls.lines().collect();
        assert_eq!(
            lines,
            vec![
                "service install",
                "service start",
                "up --setup-key KEY-1",
                "down",
                "service stop",
                "service uninstall",
            ]
        );
    }

    #[tokio::test]
    async fn failed_start_rolls_back() {
        let scratch = tempfile::tempdir().unwrap();
        let log = scratch.path().join("calls.log");
        let tunnel = NetbirdTunnel::new(fake_agent(scratch.path(), &log, Some("up")), "KEY-2");

        let err = tunnel.install().await.unwrap_err();
        assert!(matches!(err, LifecycleError::Provisioning(_)));
        let calls = std::fs::read_to_string(&log).unwrap();
        assert!(calls.lines().any(|l| l == "service uninstall"));
    }

    #[tokio::test]
    async fn missing_payload_is_provisioning_error() {
        let tunnel = NetbirdTunnel::new("/nonexistent/netbird", "KEY");
        assert!(matches!(tunnel.install().await, Err(LifecycleError::Provisioning(_))));
    }

    #[tokio::test]
    async fn payload_without_file_name_fails_before_touching_disk() {
        let scratch = tempfile::tempdir().unwrap();
        let tunnel = NetbirdTunnel::new(scratch.path().join(".."), "KEY");
        let err = tunnel.install().await.unwrap_err();
        assert!(err.to_string().contains("no file name"), "{err}");
    }
}
