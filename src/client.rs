use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::ServiceConfig;
use crate::error::ClientError;
use crate::types::{ExportRequest, JobId, ScanCreated, ScanRequest, ScanStatus, StatusResponse};

/// Remote scan service operations. Each call is exactly one request; retry
/// policy belongs to the caller.
#[async_trait]
pub trait ScanService: Send + Sync {
    async fn create_scan(&self, request: &ScanRequest) -> Result<JobId, ClientError>;
    async fn get_status(&self, id: JobId) -> Result<ScanStatus, ClientError>;
    async fn stop_scan(&self, id: JobId) -> Result<(), ClientError>;
    async fn delete_scan(&self, id: JobId) -> Result<(), ClientError>;
    async fn export_report(&self, id: JobId, email: &str) -> Result<(), ClientError>;
    /// Never fails: any problem reads as "offline".
    async fn is_reachable(&self) -> bool;
}

/// HTTP/JSON implementation of [`ScanService`].
#[derive(Clone, Debug)]
pub struct ScanClient {
    client: Arc<Client>,
    config: ServiceConfig,
}

impl ScanClient {
    pub fn new(config: ServiceConfig) -> Result<Self, ClientError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            client: Arc::new(client),
            config,
        })
    }

    fn url(&self, route: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), route)
    }

    async fn probe(&self) -> Result<bool, ClientError> {
        let resp = self
            .client
            .get(self.url("status"))
            .timeout(self.config.probe_timeout)
            .send()
            .await?;
        let value: serde_json::Value = decode(expect_success(resp, "status")?).await?;
        Ok(value.get("status").and_then(|s| s.as_str()) == Some("online"))
    }
}

fn expect_success(resp: Response, op: &str) -> Result<Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        Err(ClientError::service(format!("{op}: received HTTP {status}")))
    }
}

/// Read the full body, then decode; shape mismatches are service errors, not transport errors.
async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ClientError> {
    let body = resp.text().await?;
    serde_json::from_str(&body)
        .map_err(|e| ClientError::service(format!("malformed response: {e}")))
}

#[async_trait]
impl ScanService for ScanClient {
    async fn create_scan(&self, request: &ScanRequest) -> Result<JobId, ClientError> {
        let resp = self
            .client
            .post(self.url("create_scan"))
            .json(request)
            .send()
            .await?;
        let created: ScanCreated = decode(expect_success(resp, "create_scan")?).await?;
        Ok(JobId(created.scan_id))
    }

    async fn get_status(&self, id: JobId) -> Result<ScanStatus, ClientError> {
        let resp = self
            .client
            .get(self.url(&format!("scan_status/{id}")))
            .send()
            .await?;
        let body: StatusResponse = decode(expect_success(resp, "scan_status")?).await?;
        body.into_status()
    }

    async fn stop_scan(&self, id: JobId) -> Result<(), ClientError> {
        let resp = self
            .client
            .post(self.url(&format!("stop_scan/{id}")))
            .send()
            .await?;
        expect_success(resp, "stop_scan").map(|_| ())
    }

    async fn delete_scan(&self, id: JobId) -> Result<(), ClientError> {
        let resp = self
            .client
            .delete(self.url(&format!("delete_scan/{id}")))
            .send()
            .await?;
        expect_success(resp, "delete_scan").map(|_| ())
    }

    async fn export_report(&self, id: JobId, email: &str) -> Result<(), ClientError> {
        let request = ExportRequest {
            scan_id: id.0,
            email,
        };
        let resp = self
            .client
            .post(self.url("export_report"))
            .json(&request)
            .send()
            .await?;
        let body: serde_json::Map<String, serde_json::Value> =
            decode(expect_success(resp, "export_report")?).await?;
        debug!(response = ?body, "export accepted");
        Ok(())
    }

    async fn is_reachable(&self) -> bool {
        match self.probe().await {
            Ok(online) => online,
            Err(e) => {
                debug!(error = %e, "service status probe failed");
                false
            }
        }
    }
}
