//! infracon: operator CLI for the infrastructure console core.
//!
//! Evaluates action filters offline, waits on orchestrator jobs, inspects the
//! network service providers of a physical network and runs the device
//! provisioning chain.

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tabled::{Table, Tabled};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use infracon::client::list_items;
use infracon::orchestrator::Params;
use infracon::workflows::{DeviceRequest, provision_device_chain};
use infracon::{
    ActionSet, ChainEvent, Console, ConsoleConfig, FilterContext, JobHandle, JobId, ProviderKind,
    ResourceKind, actions_for_raw,
};

/// Infrastructure console CLI
#[derive(Parser, Debug)]
#[command(name = "infracon", version, about)]
struct Cli {
    /// Orchestrator API endpoint (e.g., http://localhost:8080/client/api)
    #[arg(long, env = "INFRACON_ENDPOINT", global = true)]
    endpoint: Option<String>,

    /// Session key sent with every command
    #[arg(long, env = "INFRACON_SESSION_KEY", global = true, hide_env_values = true)]
    session_key: Option<String>,

    /// Job poll interval in milliseconds
    #[arg(long, global = true)]
    poll_interval_ms: Option<u64>,

    /// JSON config file, overridden by the flags above
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the actions permitted on resource records read from a file
    Actions {
        /// Resource kind (zone, pod, cluster, host, primary-storage, router, ...)
        #[arg(long)]
        kind: String,

        /// JSON file holding one record, a list of records or a list response
        #[arg(long)]
        file: PathBuf,

        /// Evaluate as an administrator
        #[arg(long)]
        admin: bool,
    },

    /// Poll a job until it finishes (Ctrl+C cancels)
    Wait {
        /// Job ID
        job_id: String,

        /// Return only this key of the job result
        #[arg(long)]
        result_key: Option<String>,
    },

    /// List the network service providers of a physical network
    Providers {
        /// Physical network ID
        #[arg(long)]
        physical_network: String,
    },

    /// Register an external device, creating its provider if needed
    AddDevice {
        /// Physical network ID
        #[arg(long)]
        physical_network: String,

        /// Provider kind (netscaler, f5, srx, nicira, bigswitch)
        #[arg(long)]
        device: String,

        /// Device parameter as key=value (repeatable)
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
}

#[derive(Tabled)]
struct ActionRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "ACTIONS")]
    actions: String,
}

#[derive(Tabled)]
struct ProviderRow {
    #[tabled(rename = "PROVIDER")]
    name: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "STATE")]
    state: String,
    #[tabled(rename = "ACTIONS")]
    actions: String,
}

fn parse_param(s: &str) -> std::result::Result<(String, String), String> {
    let (k, v) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    if k.is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((k.to_string(), v.to_string()))
}

fn format_actions(actions: &ActionSet) -> String {
    if actions.is_empty() {
        return "-".to_string();
    }
    actions
        .iter()
        .map(|a| a.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn load_config(cli: &Cli) -> Result<ConsoleConfig> {
    let mut config = match &cli.config {
        Some(path) => ConsoleConfig::from_json_file(path)?,
        None => ConsoleConfig::default(),
    };
    if let Some(endpoint) = &cli.endpoint {
        config.endpoint = endpoint.clone();
    }
    if cli.session_key.is_some() {
        config.session_key = cli.session_key.clone();
    }
    if let Some(ms) = cli.poll_interval_ms {
        config.poll_interval_ms = ms;
    }
    config.validate()?;
    Ok(config)
}

/// Token cancelled on the first Ctrl+C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling");
            token.cancel();
        }
    });
    cancel
}

/// Records in a file: a single object, an array, or a wrapped list response.
fn read_records(kind: ResourceKind, path: &PathBuf) -> Result<Vec<Value>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let body: Value = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    let map = match body {
        Value::Array(items) => return Ok(items),
        Value::Object(map) => map,
        _ => bail!("{} holds no resource records", path.display()),
    };
    if map.contains_key(kind.item_key()) {
        return Ok(list_items(kind, Value::Object(map))?);
    }
    if map.len() == 1 && !map.contains_key("id") {
        let inner = map.into_iter().next().map(|(_, v)| v).unwrap_or(Value::Null);
        return Ok(list_items(kind, inner)?);
    }
    Ok(vec![Value::Object(map)])
}

fn print_event(event: &ChainEvent) {
    match event {
        ChainEvent::Started { chain, steps, .. } => println!("{}: {} steps", chain, steps),
        ChainEvent::StepStarted { index, step, .. } => println!("  [{}] {} ...", index, step),
        ChainEvent::StepCompleted {
            index, step, job_id, ..
        } => match job_id {
            Some(job_id) => println!("  [{}] {} done (job {})", index, step, job_id),
            None => println!("  [{}] {} done", index, step),
        },
        ChainEvent::StepSkipped {
            index, step, reason, ..
        } => println!("  [{}] {} skipped: {}", index, step, reason),
        ChainEvent::StepFailed {
            index, step, reason, ..
        } => println!("  [{}] {} failed: {}", index, step, reason),
        ChainEvent::Finished { chain, success, .. } => {
            println!("{}: {}", chain, if *success { "finished" } else { "aborted" })
        }
    }
}

/// Print chain events until every sender is gone. Yields how many were printed.
fn spawn_event_printer(mut events: broadcast::Receiver<ChainEvent>) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut printed = 0;
        loop {
            match events.recv().await {
                Ok(event) => {
                    print_event(&event);
                    printed += 1;
                }
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "Missed chain events"),
                Err(RecvError::Closed) => break,
            }
        }
        printed
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "infracon=info,reqwest=warn,hyper=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Actions { kind, file, admin } => {
            let kind: ResourceKind = kind.parse()?;
            let ctx = FilterContext { is_admin: *admin };
            let rows: Vec<ActionRow> = read_records(kind, file)?
                .iter()
                .map(|raw| ActionRow {
                    id: raw
                        .get("id")
                        .and_then(Value::as_str)
                        .unwrap_or("-")
                        .to_string(),
                    actions: format_actions(&actions_for_raw(kind, raw, &ctx)),
                })
                .collect();
            println!("{}", Table::new(rows));
        }

        Commands::Wait { job_id, result_key } => {
            let console = Console::from_config(&load_config(&cli)?)?;
            let cancel = cancel_on_ctrl_c();
            let mut handle = JobHandle::new(JobId::from(job_id.as_str()), "wait", result_key.as_deref());
            let result = console.poller().wait(&mut handle, &cancel).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }

        Commands::Providers { physical_network } => {
            let console = Console::from_config(&load_config(&cli)?)?;
            let snapshot = console
                .registry()
                .activate(console.orchestrator().as_ref(), physical_network)
                .await?;

            let mut rows = Vec::new();
            for kind in ProviderKind::ALL {
                let nsp = snapshot.provider_or_absent(kind.provider_name());
                let actions = console
                    .registry()
                    .provider_actions(physical_network, kind.provider_name())
                    .await;
                rows.push(ProviderRow {
                    name: nsp.name.clone(),
                    id: if nsp.is_present() { nsp.id.clone() } else { "-".to_string() },
                    state: match nsp.state.as_str() {
                        "" => "-".to_string(),
                        state => state.to_string(),
                    },
                    actions: format_actions(&actions),
                });
            }
            println!("{}", Table::new(rows));
        }

        Commands::AddDevice {
            physical_network,
            device,
            params,
        } => {
            let provider: ProviderKind = device.parse()?;
            let console = Console::from_config(&load_config(&cli)?)?;
            let cancel = cancel_on_ctrl_c();

            console
                .registry()
                .activate(console.orchestrator().as_ref(), physical_network)
                .await?;

            let chain = provision_device_chain(
                console.orchestrator(),
                console.registry(),
                DeviceRequest {
                    physical_network_id: physical_network.clone(),
                    provider,
                    params: params.iter().cloned().collect::<Params>(),
                },
            )
            .await?;

            let printer = spawn_event_printer(console.subscribe());

            let result = console.run_chain(chain, &cancel).await;
            // Closes the event channel so the printer drains and exits.
            drop(console);
            printer.await?;

            let report =
                result.map_err(|e| anyhow!("{} (step '{}'): {}", e.chain, e.step, e.reason()))?;
            println!("{}", serde_json::to_string_pretty(&report.output)?);
        }
    }

    Ok(())
}
