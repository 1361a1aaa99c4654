//! organ-master - hybrid pipe organ master controller
//!
//! Loads the organ definition, opens MIDI transports, spawns the
//! registration engine and serves the operator console and control API.

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use organ_master::actions::Actions;
use organ_master::api;
use organ_master::cli;
use organ_master::config::OrganConfig;
use organ_master::engine::EngineActor;
use organ_master::expression::spawn_tremulant_clock;
use organ_master::input::ConsoleInput;
use organ_master::output::{MidiPortSink, OutputDispatcher};
use organ_master::registry::RankRegistry;
use organ_master::stops::StopTable;

/// Organ Master - route console keys through stops and couplers to ranks
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "organ.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// List available MIDI ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Disable the HTTP control API
    #[arg(long)]
    no_api: bool,

    /// Disable the interactive console (run headless)
    #[arg(long)]
    no_console: bool,

    /// Override the API port from the config file
    #[arg(long)]
    api_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_logging(&args.log_level)?;

    if args.list_ports {
        list_ports_formatted()?;
        return Ok(());
    }

    info!("Starting organ-master...");
    info!("Configuration file: {}", args.config);

    let config = OrganConfig::load(&args.config).await?;

    // Build the static tables; any violation here is fatal
    let registry = Arc::new(
        RankRegistry::from_config(&config.ranks, &config.tremulants)
            .context("Invalid rank configuration")?,
    );
    let stops = Arc::new(
        StopTable::from_config(
            &config.stops,
            &config.couplers,
            &registry,
            config.limits.max_pitch_offset,
        )
        .context("Invalid stop/coupler configuration")?,
    );
    info!(
        "Loaded {} rank(s), {} stop(s), {} coupler(s), {} tremulant group(s)",
        registry.len(),
        config.stops.len(),
        config.couplers.len(),
        config.tremulants.len()
    );

    // Open one output worker per distinct port; failure to open is fatal
    let dispatcher = OutputDispatcher::spawn(&registry, |destination, port| {
        info!("Opening {} output port '{}'", destination, port);
        Ok(Box::new(MidiPortSink::open("organ-master", port)?))
    })?;

    // The serialized core
    let engine = EngineActor::spawn(
        registry.clone(),
        stops.clone(),
        config.tremulants.clone(),
        &config.modulation,
        dispatcher,
    );

    let _tremulant_clock = spawn_tremulant_clock(engine.clone(), &config.modulation);

    // Console input; without it the engine is driven by simulation and API
    let _console_input = match &config.input {
        Some(input_config) => Some(ConsoleInput::start(input_config, engine.clone())?),
        None => {
            warn!("No input section configured; keys arrive only via console simulation");
            None
        }
    };

    let actions = Arc::new(Actions::new(engine.clone(), stops, registry));

    if config.api.enabled && !args.no_api {
        let port = args.api_port.unwrap_or(config.api.port);
        let api_actions = actions.clone();
        tokio::spawn(async move {
            if let Err(e) = api::start_server(api_actions, port).await {
                warn!("API server stopped: {}", e);
            }
        });
    }

    info!("Ready: {} rank(s) addressable", actions.rank_count());

    if args.no_console {
        shutdown_signal().await;
    } else {
        cli::run_repl(actions).await?;
    }

    info!("organ-master shutdown complete");
    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
    info!("Shutdown signal received");
}

/// Print every MIDI port visible to the system
fn list_ports_formatted() -> Result<()> {
    let midi_in = midir::MidiInput::new("organ-master-scan")?;
    println!("\n{}", "Input ports:".bold());
    for port in midi_in.ports() {
        println!("  {}", midi_in.port_name(&port).unwrap_or_default().green());
    }

    let midi_out = midir::MidiOutput::new("organ-master-scan")?;
    println!("\n{}", "Output ports:".bold());
    for port in midi_out.ports() {
        println!("  {}", midi_out.port_name(&port).unwrap_or_default().cyan());
    }

    Ok(())
}
