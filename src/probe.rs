use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time;
use tracing::{debug, warn};

use crate::error::LifecycleError;

/// Connect to `addr` within `timeout`.
///
/// Returns the open stream, or `None` when the port is closed, filtered or
/// the connect times out.
pub async fn connect(addr: SocketAddr, timeout: Duration) -> Option<TcpStream> {
    match time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Some(stream),
        Ok(Err(e)) => {
            debug!(%addr, error = %e, "connect refused");
            None
        }
        Err(_) => {
            debug!(%addr, "connect timed out");
            None
        }
    }
}

/// First line the server volunteers, if any arrives within a short window.
async fn greeting(stream: &mut TcpStream) -> Option<String> {
    let mut buf = [0u8; 256];
    match time::timeout(Duration::from_millis(500), stream.read(&mut buf)).await {
        Ok(Ok(n)) if n > 0 => {
            let text = String::from_utf8_lossy(&buf[..n]);
            text.lines().next().map(|l| l.trim().to_string())
        }
        _ => None,
    }
}

/// Host-side precondition checked before a credentialed scan is created.
#[async_trait]
pub trait CredentialPreflight: Send + Sync {
    async fn check(&self) -> Result<(), LifecycleError>;
}

/// Credentialed scans on Unix log in over SSH, so something must listen on port 22.
#[derive(Debug, Clone)]
pub struct SshPreflight {
    pub addr: SocketAddr,
    pub timeout: Duration,
}

impl Default for SshPreflight {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 22)),
            timeout: Duration::from_secs(1),
        }
    }
}

impl SshPreflight {
    /// Whether a listener is up; a non-SSH greeting only earns a warning.
    pub async fn listening(&self) -> Result<Option<String>, LifecycleError> {
        let Some(mut stream) = connect(self.addr, self.timeout).await else {
            return Err(LifecycleError::Preflight(format!(
                "no SSH listener on {}; credentialed scans need SSH",
                self.addr
            )));
        };
        let banner = greeting(&mut stream).await;
        match banner.as_deref() {
            Some(b) if b.starts_with("SSH-") => debug!(banner = b, "ssh listener found"),
            other => warn!(
                addr = %self.addr,
                banner = ?other,
                "listener on the SSH port did not identify as SSH"
            ),
        }
        Ok(banner)
    }
}

#[async_trait]
impl CredentialPreflight for SshPreflight {
    async fn check(&self) -> Result<(), LifecycleError> {
        match self.listening().await {
            Ok(_) => {
                println!("SSH is running on {}", self.addr);
                Ok(())
            }
            Err(e) => {
                println!("SSH is not running on {}", self.addr);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    async fn serve_once(greeting: &'static [u8]) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(greeting).await.unwrap();
        });
        addr
    }

    fn preflight(addr: SocketAddr) -> SshPreflight {
        SshPreflight {
            addr,
            timeout: Duration::from_millis(300),
        }
    }

    #[tokio::test]
    async fn ssh_listener_passes_with_banner() {
        let addr = serve_once(b"SSH-2.0-test\r\n").await;
        let banner = preflight(addr).listening().await.unwrap();
        assert_eq!(banner.as_deref(), Some("SSH-2.0-test"));
    }

    #[tokio::test]
    async fn other_listener_still_passes() {
        let addr = serve_once(b"220 smtp ready\r\n").await;
        assert!(preflight(addr).check().await.is_ok());
    }

    #[tokio::test]
    async fn preflight_fails_without_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        assert!(matches!(
            preflight(addr).check().await,
            Err(LifecycleError::Preflight(_))
        ));
    }
}
