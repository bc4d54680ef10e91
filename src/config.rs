use std::path::PathBuf;
use std::time::Duration;

/// Remote scan service base endpoint, fixed at build time.
pub const DEFAULT_API_BASE: &str = match option_env!("TUNNEL_SCAN_API_BASE") {
    Some(v) => v,
    None => "http://api.smbdefence.com/",
};

/// Network identifier handed to the tunnel's `up --setup-key`.
pub const DEFAULT_SETUP_KEY: &str = match option_env!("TUNNEL_SETUP_KEY") {
    Some(v) => v,
    None => "31847937-F42C-421D-88E5-248096337E2C",
};

/// Directory (relative to the running executable unless absolute) holding
/// `<os>/amd/x64/netbird[.exe]`.
pub const DEFAULT_PAYLOAD_DIR: &str = match option_env!("TUNNEL_PAYLOAD_DIR") {
    Some(v) => v,
    None => "netbird",
};

/// Settings snapshot written before host settings are touched.
pub const SETTINGS_FILE: &str = "settings.json";

/// Timing and retry constants for one lifecycle run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// Wait after the tunnel comes up before the first reachability probe.
    pub connect_delay: Duration,
    /// Total reachability probes before giving up.
    pub reachability_attempts: u32,
    pub reachability_delay: Duration,
    /// Wait after create-scan before the first status fetch.
    pub initial_poll_delay: Duration,
    pub poll_interval: Duration,
    /// Consecutive failed status fetches that abort the run.
    pub max_consecutive_failures: u32,
    /// Wait between stop and delete of an active job.
    pub settle_delay: Duration,
    pub export_delay: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            connect_delay: Duration::from_secs(5),
            reachability_attempts: 5,
            reachability_delay: Duration::from_secs(5),
            initial_poll_delay: Duration::from_secs(20),
            poll_interval: Duration::from_secs(20),
            max_consecutive_failures: 21,
            settle_delay: Duration::from_secs(5),
            export_delay: Duration::from_secs(20),
        }
    }
}

impl LifecycleConfig {
    /// Same shape with every delay collapsed to a millisecond; used by tests.
    pub fn immediate() -> Self {
        let tick = Duration::from_millis(1);
        Self {
            connect_delay: tick,
            reachability_delay: tick,
            initial_poll_delay: tick,
            poll_interval: tick,
            settle_delay: tick,
            export_delay: tick,
            ..Self::default()
        }
    }
}

/// HTTP client settings for the remote scan service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub base_url: String,
    pub request_timeout: Duration,
    pub probe_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE.to_string(),
            request_timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

impl ServiceConfig {
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }
}

/// Resolve the payload directory against the directory of the running executable.
pub fn payload_dir() -> PathBuf {
    let dir = PathBuf::from(DEFAULT_PAYLOAD_DIR);
    if dir.is_absolute() {
        return dir;
    }
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|p| p.join(&dir)))
        .unwrap_or(dir)
}
