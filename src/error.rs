use thiserror::Error;

/// Failure of a single exchange with the remote scan service.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Connection, DNS, timeout or body read failure.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-success status or a payload that does not match the expected shape.
    #[error("service error: {0}")]
    Service(String),
}

impl ClientError {
    pub fn service(msg: impl Into<String>) -> Self {
        Self::Service(msg.into())
    }
}

/// Everything that can end a lifecycle run early.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Tunnel binary could not be materialized or started.
    #[error("tunnel provisioning failed: {0}")]
    Provisioning(String),

    /// Unsupported OS or missing privileges.
    #[error("platform error: {0}")]
    Platform(String),

    /// Host configuration command failed.
    #[error("host settings error: {0}")]
    Settings(String),

    #[error("scan service still offline after {attempts} attempts")]
    ServiceUnreachable { attempts: u32 },

    #[error("giving up after {failures} consecutive status failures: {last}")]
    PollingExhausted { failures: u32, last: ClientError },

    /// A precondition for a credentialed scan is not met.
    #[error("preflight failed: {0}")]
    Preflight(String),

    #[error("operator input failed: {0}")]
    Prompt(String),

    #[error("interrupted")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_lift_into_lifecycle() {
        let err: LifecycleError = ClientError::service("HTTP 500").into();
        assert_eq!(err.to_string(), "service error: HTTP 500");
        assert!(matches!(err, LifecycleError::Client(ClientError::Service(_))));
    }

    #[test]
    fn polling_exhausted_mentions_count() {
        let err = LifecycleError::PollingExhausted {
            failures: 10,
            last: ClientError::service("no host entry"),
        };
        assert!(err.to_string().contains("10 consecutive"));
    }
}
