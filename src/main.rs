//! Telemetry Sensor Agent CLI
//!
//! Captures interaction events and delivers them reliably to a collector.

use clap::{Parser, Subcommand};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use telemetry_sensor_agent::{
    agent::{self, DeliveryAgent},
    collector::{BlockingCollectorClient, CollectorClient, CollectorConfig},
    config::{Config, SourceConfig},
    connectivity::ConnectivityWatcher,
    sensor::{Sensor, SensorConfig},
    spool::EventSpool,
    stats::create_shared_stats_with_persistence,
    VERSION,
};

#[derive(Parser)]
#[command(name = "telemetry-sensor")]
#[command(version = VERSION)]
#[command(about = "Interaction telemetry capture and reliable delivery", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the capture and delivery pipeline
    Start {
        /// Interaction sources to capture (pointer, keyboard, scroll, window, or all)
        #[arg(long, default_value = "all")]
        sources: String,

        /// Collector base URL (overrides config file)
        #[arg(long)]
        collector_url: Option<String>,

        /// Collector bearer token (overrides config file)
        #[arg(long)]
        collector_token: Option<String>,

        /// Flush interval in seconds
        #[arg(long)]
        flush_interval: Option<u64>,

        /// In-memory batch size before spilling to the durable spool
        #[arg(long)]
        batch_size: Option<usize>,

        /// Run the HTTP ingest server for out-of-process pages (requires server feature)
        #[arg(long)]
        serve: bool,

        /// Ingest server port
        #[arg(long, default_value = "8686")]
        port: u16,
    },

    /// Flush spooled events once and exit (platform wake-up hook)
    Flush,

    /// Pause event capture
    Pause,

    /// Resume event capture
    Resume,

    /// Show pipeline status
    Status,

    /// Show configuration
    Config,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            sources,
            collector_url,
            collector_token,
            flush_interval,
            batch_size,
            serve,
            port,
        } => {
            cmd_start(
                &sources,
                collector_url,
                collector_token,
                flush_interval,
                batch_size,
                serve,
                port,
            );
        }
        Commands::Flush => {
            cmd_flush();
        }
        Commands::Pause => {
            cmd_pause();
        }
        Commands::Resume => {
            cmd_resume();
        }
        Commands::Status => {
            cmd_status();
        }
        Commands::Config => {
            cmd_config();
        }
    }
}

#[allow(unused_variables)]
fn cmd_start(
    sources: &str,
    collector_url: Option<String>,
    collector_token: Option<String>,
    flush_interval: Option<u64>,
    batch_size: Option<usize>,
    serve: bool,
    port: u16,
) {
    println!("Telemetry Sensor Agent v{VERSION}");
    println!();

    // Parse source configuration
    let source_config = SourceConfig::from_csv(sources);
    if !source_config.any_enabled() {
        eprintln!("Error: At least one source must be enabled (pointer, keyboard, scroll, window)");
        std::process::exit(1);
    }

    // Load configuration and apply CLI overrides
    let mut config = Config::load().unwrap_or_default();
    config.sources = source_config;
    if let Some(url) = collector_url {
        config.collector_url = url;
    }
    if let Some(token) = collector_token {
        config.collector_token = Some(token);
    }
    if let Some(secs) = flush_interval {
        config.flush_interval = Duration::from_secs(secs);
    }
    if let Some(size) = batch_size {
        config.batch_size = size;
    }
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    println!("Starting pipeline...");
    println!("  Collector: {}", config.collector_url);
    println!("  Flush interval: {}s", config.flush_interval.as_secs());
    println!("  Batch size: {}", config.batch_size);
    println!(
        "  Sources: pointer={} keyboard={} scroll={} window={}",
        config.sources.pointer, config.sources.keyboard, config.sources.scroll, config.sources.window
    );

    // Set up the pipeline stats log
    let stats = create_shared_stats_with_persistence(config.stats_path());

    // Create sensor and delivery agent
    let mut sensor = Sensor::new(SensorConfig {
        capture_pointer: config.sources.pointer,
        capture_keyboard: config.sources.keyboard,
        capture_scroll: config.sources.scroll,
        capture_window: config.sources.window,
    });

    let collector_config =
        CollectorConfig::new(&config.collector_url, config.collector_token.clone());
    let client = CollectorClient::new(collector_config.clone());
    println!("  Device ID: {}", client.device_id());

    let mut agent = DeliveryAgent::new(
        config.spool_path(),
        config.batch_size,
        client,
        stats.clone(),
    );
    if let Err(e) = agent.activate() {
        eprintln!("Error opening event spool: {e}");
        std::process::exit(1);
    }
    println!("  Session ID: {}", agent.session_id());
    if agent.spool_len() > 0 {
        println!("  Recovered spooled entries: {}", agent.spool_len());
    }

    // Probe the collector once so startup output shows reachability
    match BlockingCollectorClient::new(collector_config.clone()) {
        Ok(probe) => match probe.test_connection() {
            Ok(true) => println!("  Collector connection: OK"),
            Ok(false) => eprintln!("Warning: Collector health check failed"),
            Err(e) => eprintln!("Warning: Could not reach collector: {e}"),
        },
        Err(e) => eprintln!("Warning: Could not create collector probe: {e}"),
    }

    println!();
    println!("Press Ctrl+C to stop");
    println!();

    // Set up Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl+C handler");

    // Connectivity watcher for offline retry
    let watcher = match ConnectivityWatcher::spawn(
        collector_config,
        Duration::from_secs(config.connectivity_poll_secs),
        running.clone(),
    ) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            eprintln!("Warning: Connectivity watcher unavailable: {e}");
            None
        }
    };
    let signals = watcher
        .as_ref()
        .map(|w| w.receiver().clone())
        .unwrap_or_else(crossbeam_channel::never);

    // Optional HTTP ingest server feeding the same channel
    #[cfg(feature = "server")]
    if serve {
        let sender = sensor.sender();
        let server_running = running.clone();
        thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("Failed to create server runtime");
            runtime.block_on(async move {
                match telemetry_sensor_agent::server::run(
                    telemetry_sensor_agent::server::ServerConfig::new(port),
                    sender,
                )
                .await
                {
                    Ok((addr, shutdown_tx)) => {
                        println!("  Ingest server: http://{addr}/ingest");
                        while server_running.load(Ordering::SeqCst) {
                            tokio::time::sleep(Duration::from_millis(200)).await;
                        }
                        let _ = shutdown_tx.send(());
                    }
                    Err(e) => eprintln!("Error starting ingest server: {e}"),
                }
            });
        });
    }

    #[cfg(not(feature = "server"))]
    if serve {
        eprintln!("Warning: --serve flag ignored (server feature not enabled at compile time)");
    }

    // Run the agent loop on its own thread
    let messages = sensor.receiver().clone();
    let flush_interval_cfg = config.flush_interval;
    let agent_running = running.clone();
    let agent_handle = thread::spawn(move || {
        if let Err(e) = agent::run(agent, messages, signals, flush_interval_cfg, agent_running) {
            eprintln!("Agent loop error: {e}");
        }
    });

    // Support pause/resume from another process by polling the config file.
    let mut paused = config.paused;
    if paused {
        println!("Capture is currently paused.");
        println!("Run `telemetry-sensor resume` to start capturing.");
    } else if let Err(e) = sensor.start() {
        eprintln!("Error starting sensor: {e}");
    }

    let mut last_config_check = std::time::Instant::now();
    while running.load(Ordering::SeqCst) {
        if last_config_check.elapsed() >= Duration::from_secs(1) {
            if let Ok(cfg) = Config::load() {
                if cfg.paused != paused {
                    paused = cfg.paused;
                    if paused {
                        println!();
                        println!("Pausing capture...");
                        sensor.stop();
                    } else {
                        println!();
                        println!("Resuming capture...");
                        if let Err(e) = sensor.start() {
                            eprintln!("Error resuming sensor: {e}");
                        }
                    }
                }
            }
            last_config_check = std::time::Instant::now();
        }
        thread::sleep(Duration::from_millis(100));
    }

    // Shutdown: session-end is best-effort, the agent may already be gone.
    println!();
    println!("Stopping pipeline...");
    sensor.stop();
    stats.record_events_dropped(sensor.dropped_count());

    if agent_handle.join().is_err() {
        eprintln!("Agent loop panicked");
    }
    if let Some(watcher) = watcher {
        watcher.join();
    }

    if let Err(e) = stats.save() {
        eprintln!("Warning: Could not save pipeline stats: {e}");
    }

    println!();
    println!("{}", stats.summary());
}

/// One-shot flush of the durable spool.
///
/// Intended to be invoked by the platform when connectivity returns while
/// no pipeline process is running (network-change hook, cron, etc.).
fn cmd_flush() {
    let config = Config::load().unwrap_or_default();
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    let stats = create_shared_stats_with_persistence(config.stats_path());
    let client = CollectorClient::new(CollectorConfig::new(
        &config.collector_url,
        config.collector_token.clone(),
    ));

    let mut agent = DeliveryAgent::new(config.spool_path(), config.batch_size, client, stats.clone());
    if let Err(e) = agent.activate() {
        eprintln!("Error opening event spool: {e}");
        std::process::exit(1);
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to create runtime");

    match runtime.block_on(agent.flush()) {
        telemetry_sensor_agent::FlushOutcome::Idle => {
            println!("Nothing to deliver.");
        }
        telemetry_sensor_agent::FlushOutcome::Delivered(count) => {
            let _ = stats.save();
            println!("Delivered {count} spooled events.");
        }
        telemetry_sensor_agent::FlushOutcome::Failed => {
            let _ = stats.save();
            eprintln!(
                "Delivery failed; {} entries remain spooled.",
                agent.spool_len()
            );
            std::process::exit(1);
        }
    }
}

fn cmd_pause() {
    let mut config = Config::load().unwrap_or_default();
    config.paused = true;
    if let Err(e) = config.save() {
        eprintln!("Error saving config: {e}");
        std::process::exit(1);
    }
    println!("Capture paused. Use 'telemetry-sensor resume' to continue.");
}

fn cmd_resume() {
    let mut config = Config::load().unwrap_or_default();
    config.paused = false;
    if let Err(e) = config.save() {
        eprintln!("Error saving config: {e}");
        std::process::exit(1);
    }
    println!("Capture resumed.");
}

fn cmd_status() {
    let config = Config::load().unwrap_or_default();

    println!("Telemetry Sensor Agent Status");
    println!("=============================");
    println!();

    println!("Configuration:");
    println!("  Collector: {}", config.collector_url);
    println!("  Flush interval: {}s", config.flush_interval.as_secs());
    println!("  Batch size: {}", config.batch_size);
    println!("  Paused: {}", config.paused);
    println!();

    // Spool depth without disturbing the file
    match EventSpool::open(config.spool_path()) {
        Ok(spool) => {
            println!("Durable spool:");
            println!("  Path: {:?}", spool.path());
            println!("  Pending entries: {}", spool.len());
        }
        Err(e) => {
            println!("Durable spool: unavailable ({e})");
        }
    }
    println!();

    // Load and show cumulative stats if available
    let stats_path = config.stats_path();
    if stats_path.exists() {
        if let Ok(content) = std::fs::read_to_string(&stats_path) {
            if let Ok(stats) = serde_json::from_str::<serde_json::Value>(&content) {
                println!("Cumulative Statistics:");
                if let Some(accepted) = stats.get("events_accepted") {
                    println!("  Events accepted: {accepted}");
                }
                if let Some(delivered) = stats.get("events_delivered") {
                    println!("  Events delivered: {delivered}");
                }
                if let Some(failures) = stats.get("delivery_failures") {
                    println!("  Delivery failures: {failures}");
                }
                if let Some(dropped) = stats.get("events_dropped") {
                    println!("  Events dropped at sensor: {dropped}");
                }
            }
        }
    } else {
        println!("No previous session data found.");
    }
}

fn cmd_config() {
    let config = Config::load().unwrap_or_default();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}
