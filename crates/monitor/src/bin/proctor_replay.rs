//! Proctor scenario replay
//!
//! Replays a YAML scenario of timed host inputs against the full proctor
//! runtime with an offline backend and simulated devices, then prints the
//! outcome as JSON.
//!
//! Usage:
//!   proctor_replay scenarios/tab_switch.yaml
//!   proctor_replay scenarios/phone.yaml --config proctor.yaml --speed 20 -v

use clap::Parser;
use std::path::PathBuf;

use proctor_monitor::scenario::{run_scenario, Scenario};
use proctor_monitor::ProctorConfig;

/// Replay a proctoring scenario and report what the monitor decided
#[derive(Parser, Debug)]
#[command(name = "proctor_replay")]
#[command(about = "Replay a proctoring scenario against an offline backend")]
struct Args {
    /// Scenario file (YAML)
    scenario: PathBuf,

    /// Proctor configuration (YAML or JSON); defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// How much faster than scenario time to run
    #[arg(long, default_value = "10")]
    speed: u32,

    /// Print the step log before the report
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "proctor_monitor=info".into()),
        )
        .init();

    let args = Args::parse();

    let config = ProctorConfig::load(args.config.as_deref())?;
    let scenario = Scenario::from_file(&args.scenario)?;
    let report = run_scenario(&scenario, &config, args.speed).await?;

    if args.verbose {
        for line in &report.step_log {
            eprintln!("{}", line);
        }
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
