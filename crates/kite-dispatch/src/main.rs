//! kite-dispatch - provision a Buildkite agent Job for one scheduled job

use std::io::Read;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use kite_common::telemetry::{init_telemetry, TelemetryConfig};
use kite_common::{Config, JobEvent};
use kite_dispatch::{DispatchError, InvocationOutcome, ProvisioningCore};
use kite_workload::compile_agent_job;

/// Handle one Buildkite "Job Scheduled" event against an EKS cluster
#[derive(Parser, Debug)]
#[command(name = "kite-dispatch", version, about, long_about = None)]
struct Cli {
    /// Path to the event JSON; read from stdin when omitted
    #[arg(short = 'e', long = "event")]
    event: Option<PathBuf>,

    /// Print the Job that would be submitted for JOB_ID as YAML and exit
    ///
    /// Needs configuration but makes no AWS or cluster calls.
    #[arg(long = "print-spec", value_name = "JOB_ID")]
    print_spec: Option<String>,

    /// Human-readable logs instead of JSON
    #[arg(long, env = "KITE_LOG_TEXT")]
    text_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        anyhow::bail!("failed to install rustls crypto provider: {e:?}");
    }

    let cli = Cli::parse();

    init_telemetry(TelemetryConfig {
        json: !cli.text_logs,
        ..TelemetryConfig::default()
    })?;

    let config = Config::from_env().map_err(DispatchError::from)?;

    if let Some(job_id) = cli.print_spec {
        let job = compile_agent_job(&job_id, &config);
        let yaml = serde_yaml::to_string(&job).context("failed to serialize Job")?;
        println!("{yaml}");
        return Ok(());
    }

    let payload = read_event(cli.event.as_ref())?;
    let event = JobEvent::from_json(&payload).map_err(DispatchError::from)?;

    let core = ProvisioningCore::from_config(config).await;
    match core.handle(&event).await {
        Ok(outcome) => {
            report(&outcome);
            Ok(())
        }
        Err(e) => {
            error!(error = %e, retryable = e.is_retryable(), "invocation failed");
            Err(e.into())
        }
    }
}

fn read_event(path: Option<&PathBuf>) -> anyhow::Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read event from {}", path.display())),
        None => {
            let mut payload = String::new();
            std::io::stdin()
                .read_to_string(&mut payload)
                .context("failed to read event from stdin")?;
            Ok(payload)
        }
    }
}

fn report(outcome: &InvocationOutcome) {
    match outcome {
        InvocationOutcome::Ineligible => info!("ignored: not a dynamic queue job"),
        InvocationOutcome::Skipped => info!("agent job already exists"),
        InvocationOutcome::Provisioned { name } => info!(job_name = %name, "agent job created"),
        InvocationOutcome::RaceLost { name } => {
            info!(job_name = %name, "agent job created concurrently")
        }
    }
}
