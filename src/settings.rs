//! Host settings that a credentialed scan needs relaxed, and their durable snapshot.
//!
//! The snapshot is written to disk before anything is changed so a later run
//! can still put the host back if this one dies between apply and restore.

use std::path::PathBuf;
use std::process::Stdio;

use ::time::{format_description::well_known, OffsetDateTime};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

use crate::config::SETTINGS_FILE;
use crate::error::LifecycleError;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Running,
    Stopped,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StartType {
    Auto,
    Demand,
    Disabled,
}

impl StartType {
    fn as_sc_arg(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Demand => "demand",
            Self::Disabled => "disabled",
        }
    }
}

/// Pre-scan state of every host setting the scan touches.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HostSettingsSnapshot {
    pub wmi: ServiceState,
    pub remote_registry: ServiceState,
    pub remote_registry_start: StartType,
    pub file_sharing_enabled: bool,
    /// `None` when the registry value did not exist.
    pub local_account_token_filter_policy: Option<u32>,
    pub captured_at: String,
}

/// Capture, relax and restore host configuration for a credentialed scan.
#[async_trait]
pub trait HostSettings: Send + Sync {
    async fn capture(&self) -> Result<HostSettingsSnapshot, LifecycleError>;
    /// Put the host into the scan-ready posture.
    async fn apply(&self) -> Result<(), LifecycleError>;
    async fn restore(&self, snapshot: &HostSettingsSnapshot) -> Result<(), LifecycleError>;
}

/// JSON file holding the last captured snapshot. Overwritten every run, never deleted.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new(SETTINGS_FILE)
    }
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn save(&self, snapshot: &HostSettingsSnapshot) -> Result<(), LifecycleError> {
        let data = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| LifecycleError::Settings(format!("failed to encode snapshot: {e}")))?;
        tokio::fs::write(&self.path, data).await.map_err(|e| {
            LifecycleError::Settings(format!("failed to write {}: {e}", self.path.display()))
        })
    }

    pub async fn load(&self) -> Result<HostSettingsSnapshot, LifecycleError> {
        let data = tokio::fs::read(&self.path).await.map_err(|e| {
            LifecycleError::Settings(format!("failed to read {}: {e}", self.path.display()))
        })?;
        serde_json::from_slice(&data)
            .map_err(|e| LifecycleError::Settings(format!("failed to decode snapshot: {e}")))
    }
}

const POLICY_KEY: &str = r"HKLM\SOFTWARE\Microsoft\Windows\CurrentVersion\Policies\system";
const POLICY_VALUE: &str = "LocalAccountTokenFilterPolicy";
const FILE_SHARING_GROUP: &str = "File and Printer Sharing";
const WMI_GROUP: &str = "Windows Management Instrumentation (WMI)";

type Plan = Vec<Vec<String>>;

fn cmd(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn firewall_group(group: &str, enable: bool) -> Vec<String> {
    vec![
        "netsh".into(),
        "advfirewall".into(),
        "firewall".into(),
        "set".into(),
        "rule".into(),
        format!("group={group}"),
        "new".into(),
        format!("enable={}", if enable { "yes" } else { "no" }),
    ]
}

fn net_service(state: ServiceState, name: &str) -> Vec<String> {
    let verb = match state {
        ServiceState::Running => "start",
        ServiceState::Stopped => "stop",
    };
    cmd(&["net", verb, name])
}

/// Commands that open the host for a credentialed scan.
pub fn apply_plan() -> Plan {
    vec![
        cmd(&["net", "start", "Winmgmt"]),
        cmd(&["sc", "config", "RemoteRegistry", "start=", "auto"]),
        cmd(&["net", "start", "RemoteRegistry"]),
        firewall_group(FILE_SHARING_GROUP, true),
        firewall_group(WMI_GROUP, true),
        cmd(&["reg", "add", POLICY_KEY, "/v", POLICY_VALUE, "/t", "REG_DWORD", "/d", "1", "/f"]),
    ]
}

/// Commands that return the host to `snapshot`.
pub fn restore_plan(snapshot: &HostSettingsSnapshot) -> Plan {
    let mut plan = vec![
        net_service(snapshot.wmi, "Winmgmt"),
        cmd(&[
            "sc",
            "config",
            "RemoteRegistry",
            "start=",
            snapshot.remote_registry_start.as_sc_arg(),
        ]),
        net_service(snapshot.remote_registry, "RemoteRegistry"),
        firewall_group(FILE_SHARING_GROUP, snapshot.file_sharing_enabled),
    ];
    plan.push(match snapshot.local_account_token_filter_policy {
        Some(v) => {
            let v = v.to_string();
            cmd(&["reg", "add", POLICY_KEY, "/v", POLICY_VALUE, "/t", "REG_DWORD", "/d", &v, "/f"])
        }
        None => cmd(&["reg", "delete", POLICY_KEY, "/v", POLICY_VALUE, "/f"]),
    });
    plan
}

fn parse_service_state(sc_query: &str) -> ServiceState {
    if sc_query.contains("RUNNING") {
        ServiceState::Running
    } else {
        ServiceState::Stopped
    }
}

fn parse_start_type(sc_qc: &str) -> StartType {
    if sc_qc.contains("DEMAND_START") {
        StartType::Demand
    } else if sc_qc.contains("DISABLED") {
        StartType::Disabled
    } else {
        StartType::Auto
    }
}

fn parse_policy(reg_query: &str) -> Option<u32> {
    let line = reg_query.lines().find(|l| l.contains(POLICY_VALUE))?;
    let hex = line.split_whitespace().last()?.trim_start_matches("0x");
    u32::from_str_radix(hex, 16).ok()
}

/// Windows services, firewall groups and the remote UAC token policy.
#[derive(Debug, Clone, Default)]
pub struct WindowsHostSettings;

impl WindowsHostSettings {
    async fn query(&self, argv: &[&str]) -> Result<Option<String>, LifecycleError> {
        let output = Command::new(argv[0])
            .args(&argv[1..])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                LifecycleError::Settings(format!("failed to run {}: {e}", argv.join(" ")))
            })?;
        if !output.status.success() {
            debug!(cmd = %argv.join(" "), status = %output.status, "query exited non-zero");
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()))
    }

    /// Runs every command; non-zero exits are logged, spawn failures reported after the rest ran.
    async fn execute(&self, plan: Plan) -> Result<(), LifecycleError> {
        let mut first_err = None;
        for argv in plan {
            debug!(cmd = %argv.join(" "), "executing command");
            match Command::new(&argv[0]).args(&argv[1..]).stdin(Stdio::null()).output().await {
                Ok(out) if out.status.success() => {
                    debug!(output = %String::from_utf8_lossy(&out.stdout).trim(), "command output");
                }
                Ok(out) => {
                    debug!(
                        status = %out.status,
                        output = %String::from_utf8_lossy(&out.stdout).trim(),
                        "command exited with non-zero status"
                    );
                }
                Err(e) => {
                    first_err.get_or_insert(LifecycleError::Settings(format!(
                        "failed to run {}: {e}",
                        argv.join(" ")
                    )));
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

#[async_trait]
impl HostSettings for WindowsHostSettings {
    async fn capture(&self) -> Result<HostSettingsSnapshot, LifecycleError> {
        let wmi = self.query(&["sc", "query", "Winmgmt"]).await?;
        let rr = self.query(&["sc", "query", "RemoteRegistry"]).await?;
        let rr_start = self.query(&["sc", "qc", "RemoteRegistry"]).await?;
        let sharing = self
            .query(&[
                "powershell",
                "-Command",
                "Get-NetFirewallRule -Group 'File and Printer Sharing' | Select -ExpandProperty Enabled",
            ])
            .await?;
        let policy = self.query(&["reg", "query", POLICY_KEY, "/v", POLICY_VALUE]).await?;

        Ok(HostSettingsSnapshot {
            wmi: parse_service_state(wmi.as_deref().unwrap_or_default()),
            remote_registry: parse_service_state(rr.as_deref().unwrap_or_default()),
            remote_registry_start: parse_start_type(rr_start.as_deref().unwrap_or_default()),
            file_sharing_enabled: sharing.as_deref().is_some_and(|s| s.contains("True")),
            local_account_token_filter_policy: policy.as_deref().and_then(parse_policy),
            captured_at: OffsetDateTime::now_utc()
                .format(&well_known::Rfc3339)
                .unwrap_or_default(),
        })
    }

    async fn apply(&self) -> Result<(), LifecycleError> {
        println!("Enabling services and settings for the credentialed scan...");
        self.execute(apply_plan()).await
    }

    async fn restore(&self, snapshot: &HostSettingsSnapshot) -> Result<(), LifecycleError> {
        println!("Restoring original settings...");
        self.execute(restore_plan(snapshot)).await
    }
}
