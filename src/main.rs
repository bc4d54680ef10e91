use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tunnel_scan_rs::client::ScanClient;
use tunnel_scan_rs::config::{self, LifecycleConfig, ServiceConfig};
use tunnel_scan_rs::controller::{Controller, RunOutcome};
use tunnel_scan_rs::operator::TerminalOperator;
use tunnel_scan_rs::platform::Platform;
use tunnel_scan_rs::signals;

/// tunnel-scan-rs: run one remote vulnerability scan of this host through a temporary tunnel.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "tunnel-scan-rs",
    version,
    about = "Run one remote vulnerability scan of this host through a temporary tunnel, then clean up.",
    long_about = None
)]
struct Cli {
    /// Enable verbose diagnostic output.
    #[arg(long, default_value_t = false)]
    debug: bool,
}

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn build_controller() -> Result<Controller> {
    let platform = Platform::current()?;
    platform.check_privilege()?;

    let payload_dir = config::payload_dir();
    debug!(
        ?platform,
        api = config::DEFAULT_API_BASE,
        payload = %payload_dir.display(),
        "configuration"
    );

    let service = ScanClient::new(ServiceConfig::default()).context("failed to build HTTP client")?;
    let caps = platform.capabilities(&payload_dir, config::DEFAULT_SETUP_KEY);
    Ok(Controller::new(
        Arc::new(service),
        caps,
        Arc::new(TerminalOperator),
        LifecycleConfig::default(),
    ))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    // Nothing has been acquired yet, so failures here need no teardown.
    let controller = match build_controller().await {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    };

    signals::spawn_interrupt_listener(controller.cancel_token());
    let outcome = controller.drive().await;
    match &outcome {
        RunOutcome::Completed => println!("All done."),
        RunOutcome::Cancelled => eprintln!("Interrupted; cleanup finished."),
        RunOutcome::Failed(e) => eprintln!("Error: {e}"),
    }
    // An abandoned prompt may still block a runtime thread; exit without waiting on it.
    std::process::exit(outcome.exit_code());
}
