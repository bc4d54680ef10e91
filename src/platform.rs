//! Per-OS capability selection. Everything platform-specific is decided here
//! once at startup; the controller only sees the resulting [`Capabilities`].

use std::path::Path;
use std::sync::Arc;

use crate::credentials::CredentialEncoding;
use crate::error::LifecycleError;
use crate::probe::{CredentialPreflight, SshPreflight};
use crate::settings::{HostSettings, WindowsHostSettings};
use crate::tunnel::{NetbirdTunnel, TunnelProvisioner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    Windows,
    MacOs,
}

impl Platform {
    pub fn current() -> Result<Self, LifecycleError> {
        Self::from_os(std::env::consts::OS)
    }

    pub fn from_os(os: &str) -> Result<Self, LifecycleError> {
        match os {
            "linux" => Ok(Self::Linux),
            "windows" => Ok(Self::Windows),
            "macos" => Ok(Self::MacOs),
            other => Err(LifecycleError::Platform(format!(
                "unsupported operating system: {other}"
            ))),
        }
    }

    /// Capitalized OS name the scan service expects.
    pub fn os_label(self) -> &'static str {
        match self {
            Self::Linux => "Linux",
            Self::Windows => "Windows",
            Self::MacOs => "Darwin",
        }
    }

    /// Bundled tunnel binary for this platform, relative to the payload directory.
    pub fn payload_path(self, dir: &Path) -> std::path::PathBuf {
        match self {
            Self::Linux => dir.join("linux/amd/x64/netbird"),
            Self::Windows => dir.join("windows/amd/x64/netbird.exe"),
            Self::MacOs => dir.join("macosx/amd/x64/netbird"),
        }
    }

    pub fn credential_encoding(self) -> CredentialEncoding {
        match self {
            Self::Windows => CredentialEncoding::NtlmHash,
            Self::Linux | Self::MacOs => CredentialEncoding::Plain,
        }
    }

    /// Fails unless running as root / an elevated administrator.
    pub fn check_privilege(self) -> Result<(), LifecycleError> {
        let elevated = match self {
            Self::Windows => is_admin(),
            Self::Linux | Self::MacOs => is_root(),
        };
        if elevated {
            return Ok(());
        }
        Err(LifecycleError::Platform(match self {
            Self::Windows => {
                "administrator privileges are required; re-run from an elevated prompt".into()
            }
            Self::Linux | Self::MacOs => "please run as root or with sudo".into(),
        }))
    }

    pub fn capabilities(self, payload_dir: &Path, setup_key: &str) -> Capabilities {
        let tunnel: Arc<dyn TunnelProvisioner> =
            Arc::new(NetbirdTunnel::new(self.payload_path(payload_dir), setup_key));
        let mut settings: Option<Arc<dyn HostSettings>> = None;
        let mut preflight: Option<Arc<dyn CredentialPreflight>> = None;
        match self {
            Self::Windows => settings = Some(Arc::new(WindowsHostSettings)),
            Self::Linux | Self::MacOs => preflight = Some(Arc::new(SshPreflight::default())),
        }
        Capabilities {
            tunnel,
            settings,
            preflight,
            encoding: self.credential_encoding(),
            os_label: self.os_label().to_string(),
        }
    }
}

#[cfg(unix)]
fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
fn is_root() -> bool {
    false
}

/// True when the process token is elevated.
#[cfg(windows)]
fn is_admin() -> bool {
    is_elevated::is_elevated()
}

#[cfg(not(windows))]
fn is_admin() -> bool {
    false
}

/// What the controller may do on this host.
#[derive(Clone)]
pub struct Capabilities {
    pub tunnel: Arc<dyn TunnelProvisioner>,
    /// Present only where a credentialed scan has to relax host settings.
    pub settings: Option<Arc<dyn HostSettings>>,
    /// Checked before a credentialed scan is created.
    pub preflight: Option<Arc<dyn CredentialPreflight>>,
    pub encoding: CredentialEncoding,
    pub os_label: String,
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities")
            .field("settings", &self.settings.is_some())
            .field("preflight", &self.preflight.is_some())
            .field("encoding", &self.encoding)
            .field("os_label", &self.os_label)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_windows_mutates_settings_and_hashes() {
        let dir = Path::new("/opt/payload");
        let win = Platform::Windows.capabilities(dir, "k");
        assert!(win.settings.is_some() && win.preflight.is_none());
        assert_eq!(win.encoding, CredentialEncoding::NtlmHash);

        let linux = Platform::Linux.capabilities(dir, "k");
        assert!(linux.settings.is_none() && linux.preflight.is_some());
        assert_eq!(linux.os_label, "Linux");
    }

    #[test]
    fn unsupported_os_is_platform_error() {
        assert!(matches!(Platform::from_os("freebsd"), Err(LifecycleError::Platform(_))));
        assert_eq!(Platform::from_os("macos").unwrap().os_label(), "Darwin");
    }

    #[cfg(not(windows))]
    #[test]
    fn windows_elevation_never_granted_off_windows() {
        let err = Platform::Windows.check_privilege().unwrap_err();
        assert!(err.to_string().contains("administrator privileges are required"));
    }

    #[test]
    fn payload_layout() {
        let p = Platform::Windows.payload_path(Path::new("netbird"));
        assert!(p.ends_with("windows/amd/x64/netbird.exe"));
    }
}
