//! Scan lifecycle: tunnel up, wait for the service, run one scan, export,
//! delete, and tear everything down exactly once.
//!
//! All resources the run acquires live in one [`RunState`] behind a mutex.
//! Both the normal path and the interrupt path end in [`Controller::teardown`],
//! which takes the lock for its whole duration and consumes each resource as
//! it releases it, so a second call finds nothing left to do.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::ScanService;
use crate::config::LifecycleConfig;
use crate::credentials::{wire_fields, Credentials};
use crate::error::LifecycleError;
use crate::operator::Operator;
use crate::platform::Capabilities;
use crate::settings::{HostSettingsSnapshot, SnapshotStore};
use crate::types::{JobId, JobStatus, ScanJob, ScanRequest, ScanStatus, TunnelHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    TunnelUp,
    AwaitingServiceOnline,
    ScanRunning,
    Exporting,
    Cleaned,
}

/// Everything a run owns. Teardown must be valid for any value of this record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunState {
    pub phase: Phase,
    pub tunnel: Option<TunnelHandle>,
    pub job: Option<ScanJob>,
    pub credentialed_scan: bool,
    pub settings_applied: bool,
    pub settings_restored: bool,
    pub deletion_attempted: bool,
    /// In-memory copy of what was written to the snapshot store.
    pub snapshot: Option<HostSettingsSnapshot>,
}

/// How a run ended, after teardown.
#[derive(Debug)]
pub enum RunOutcome {
    Completed,
    Cancelled,
    Failed(LifecycleError),
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Completed => 0,
            Self::Cancelled | Self::Failed(_) => 1,
        }
    }
}

pub struct Controller {
    service: Arc<dyn ScanService>,
    caps: Capabilities,
    operator: Arc<dyn Operator>,
    snapshots: SnapshotStore,
    config: LifecycleConfig,
    state: Arc<Mutex<RunState>>,
    cancel: CancellationToken,
}

impl Controller {
    pub fn new(
        service: Arc<dyn ScanService>,
        caps: Capabilities,
        operator: Arc<dyn Operator>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            service,
            caps,
            operator,
            snapshots: SnapshotStore::default(),
            config,
            state: Arc::new(Mutex::new(RunState::default())),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_snapshot_store(mut self, store: SnapshotStore) -> Self {
        self.snapshots = store;
        self
    }

    /// Token whose cancellation requests emergency teardown.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> Arc<Mutex<RunState>> {
        Arc::clone(&self.state)
    }

    /// Run the whole lifecycle, then tear down no matter how it ended.
    pub async fn drive(&self) -> RunOutcome {
        let outcome = match self.run().await {
            Ok(()) => RunOutcome::Completed,
            Err(LifecycleError::Cancelled) => RunOutcome::Cancelled,
            Err(e) => RunOutcome::Failed(e),
        };
        self.teardown().await;
        outcome
    }

    async fn run(&self) -> Result<(), LifecycleError> {
        self.checkpoint()?;
        let handle = self.caps.tunnel.install().await?;
        {
            let mut state = self.state.lock().await;
            state.tunnel = Some(handle);
            Self::enter(&mut state, Phase::TunnelUp);
        }
        self.checkpoint()?;

        self.await_service_online().await?;

        let email = self.ask(|op| op.email()).await?;
        println!("Scan results will be sent to: {email}");
        let credentialed = self.ask(|op| op.wants_credentialed_scan()).await?;
        let credentials = if credentialed {
            Some(self.ask(|op| op.credentials()).await?)
        } else {
            None
        };
        self.state.lock().await.credentialed_scan = credentialed;

        if credentialed {
            self.prepare_host().await?;
            println!("Running a credentialed/full scan...");
        } else {
            println!("Running a non-credentialed scan...");
        }

        let id = self.create_job(&email, credentials.as_ref()).await?;
        self.poll_until_finished(id).await?;
        println!("\nScan completed.");

        {
            let mut state = self.state.lock().await;
            Self::enter(&mut state, Phase::Exporting);
            self.restore_step(&mut state).await;
        }
        println!("Exporting full report...");
        self.pause(self.config.export_delay).await?;
        self.service.export_report(id, &email).await?;
        self.checkpoint()?;

        self.delete_step(&mut *self.state.lock().await).await?;
        self.checkpoint()
    }

    fn enter(state: &mut RunState, phase: Phase) {
        info!(from = ?state.phase, to = ?phase, "phase transition");
        state.phase = phase;
    }

    fn checkpoint(&self) -> Result<(), LifecycleError> {
        if self.cancel.is_cancelled() {
            Err(LifecycleError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep that ends early, with `Cancelled`, when teardown is requested.
    async fn pause(&self, duration: Duration) -> Result<(), LifecycleError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(LifecycleError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Run a blocking prompt off the runtime; an interrupt abandons it.
    async fn ask<T, F>(&self, prompt: F) -> Result<T, LifecycleError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Operator) -> Result<T, LifecycleError> + Send + 'static,
    {
        let operator = Arc::clone(&self.operator);
        let task = tokio::task::spawn_blocking(move || prompt(&*operator));
        tokio::select! {
            _ = self.cancel.cancelled() => Err(LifecycleError::Cancelled),
            joined = task => joined.map_err(|e| LifecycleError::Prompt(e.to_string()))?,
        }
    }

    async fn await_service_online(&self) -> Result<(), LifecycleError> {
        Self::enter(&mut *self.state.lock().await, Phase::AwaitingServiceOnline);
        println!("Attempting to connect to API");
        self.pause(self.config.connect_delay).await?;

        let attempts = self.config.reachability_attempts;
        for attempt in 1..=attempts {
            let online = self.service.is_reachable().await;
            self.checkpoint()?;
            if online {
                debug!("API is online.");
                return Ok(());
            }
            if attempt < attempts {
                debug!(attempt, "API is offline. Retrying...");
                self.pause(self.config.reachability_delay).await?;
            }
        }
        println!("API is offline.");
        Err(LifecycleError::ServiceUnreachable { attempts })
    }

    /// Preflight, then snapshot-persist-apply where the platform needs settings relaxed.
    async fn prepare_host(&self) -> Result<(), LifecycleError> {
        if let Some(preflight) = &self.caps.preflight {
            preflight.check().await?;
            self.checkpoint()?;
        }
        let Some(settings) = &self.caps.settings else {
            return Ok(());
        };

        debug!("Storing current settings...");
        let snapshot = match settings.capture().await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "could not capture host settings; leaving them untouched");
                return self.checkpoint();
            }
        };
        if let Err(e) = self.snapshots.save(&snapshot).await {
            warn!(error = %e, "could not persist settings snapshot; leaving settings untouched");
            return self.checkpoint();
        }
        {
            let mut state = self.state.lock().await;
            state.snapshot = Some(snapshot);
            // Set before apply: a half-applied change still needs restoring.
            state.settings_applied = true;
        }
        if let Err(e) = settings.apply().await {
            warn!(error = %e, "applying host settings failed");
        }
        self.checkpoint()
    }

    async fn create_job(
        &self,
        email: &str,
        credentials: Option<&Credentials>,
    ) -> Result<JobId, LifecycleError> {
        let (username, password) = wire_fields(credentials, self.caps.encoding);
        let request = ScanRequest {
            email: email.to_string(),
            username,
            password,
            operating_system: self.caps.os_label.clone(),
        };
        let id = self.service.create_scan(&request).await?;
        {
            let mut state = self.state.lock().await;
            state.job = Some(ScanJob::created(id));
            Self::enter(&mut state, Phase::ScanRunning);
        }
        self.checkpoint()?;
        Ok(id)
    }

    /// Fetch status every `poll_interval` until the job leaves the in-progress states.
    ///
    /// Failed fetches are tolerated until `max_consecutive_failures` happen in
    /// a row; any successful fetch resets the count.
    pub async fn poll_until_finished(&self, id: JobId) -> Result<ScanStatus, LifecycleError> {
        println!("Scan started successfully with Scan ID: {id}");
        println!("Scanning...");
        self.pause(self.config.initial_poll_delay).await?;

        let mut failures = 0u32;
        loop {
            let fetched = self.service.get_status(id).await;
            self.checkpoint()?;
            match fetched {
                Ok(status) => {
                    failures = 0;
                    if let Some(job) = self.state.lock().await.job.as_mut() {
                        job.observe(&status);
                    }
                    println!("{} {}", status.progress_label, status.counts);
                    if !status.status.is_in_progress() {
                        return Ok(status);
                    }
                }
                Err(e) => {
                    failures += 1;
                    if failures >= self.config.max_consecutive_failures {
                        println!("Error getting scan status: {e}\nExiting");
                        return Err(LifecycleError::PollingExhausted { failures, last: e });
                    }
                    debug!(error = %e, failures, "Error getting scan status, trying again");
                }
            }
            self.pause(self.config.poll_interval).await?;
        }
    }

    /// Stop first if the job may still be active, wait for it to settle, then delete.
    ///
    /// The stop is best-effort: the delete is always sent.
    async fn delete_job(&self, id: JobId) -> Result<(), LifecycleError> {
        println!("Deleting scan...");
        let active = match self.service.get_status(id).await {
            Ok(status) => status.status.is_in_progress(),
            Err(e) => {
                debug!(error = %e, "status unknown before delete; stopping first");
                true
            }
        };
        let mut stop_failure = None;
        if active {
            if let Err(e) = self.service.stop_scan(id).await {
                debug!(error = %e, "stop before delete failed");
                stop_failure = Some(e);
            }
            tokio::time::sleep(self.config.settle_delay).await;
        }
        if let Err(e) = self.service.delete_scan(id).await {
            if let Some(stop) = stop_failure {
                warn!(error = %stop, "scan could not be stopped either");
            }
            return Err(e.into());
        }
        Ok(())
    }

    async fn delete_step(&self, state: &mut RunState) -> Result<(), LifecycleError> {
        if state.deletion_attempted {
            return Ok(());
        }
        let Some(id) = state.job.as_ref().map(|j| j.id) else {
            return Ok(());
        };
        state.deletion_attempted = true;
        self.delete_job(id).await?;
        if let Some(job) = state.job.as_mut() {
            job.status = JobStatus::Deleted;
        }
        Ok(())
    }

    async fn restore_step(&self, state: &mut RunState) {
        if !state.settings_applied || state.settings_restored {
            return;
        }
        let Some(settings) = &self.caps.settings else {
            return;
        };
        state.settings_restored = true;

        debug!("Loading settings from JSON file...");
        let snapshot = match self.snapshots.load().await {
            Ok(s) => s,
            Err(e) => match state.snapshot.clone() {
                Some(s) => {
                    warn!(error = %e, "snapshot file unreadable; restoring from memory");
                    s
                }
                None => {
                    warn!(error = %e, "no settings snapshot available; cannot restore");
                    return;
                }
            },
        };
        if let Err(e) = settings.restore(&snapshot).await {
            warn!(error = %e, "restoring host settings failed");
        }
    }

    /// Release every resource still held, in order: host settings, remote job,
    /// tunnel. Each step is attempted even if an earlier one failed.
    pub async fn teardown(&self) {
        let mut state = self.state.lock().await;
        if state.phase == Phase::Cleaned {
            debug!("teardown already ran");
            return;
        }

        self.restore_step(&mut state).await;
        if let Err(e) = self.delete_step(&mut state).await {
            warn!(error = %e, "failed to delete remote scan");
        }
        if let Some(handle) = state.tunnel.take() {
            if handle.installed {
                self.caps.tunnel.uninstall(&handle).await;
            }
        }
        Self::enter(&mut state, Phase::Cleaned);
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("caps", &self.caps)
            .field("config", &self.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}
