//! Demonstration of the telemetry capture and delivery pipeline.
//!
//! This example shows how to:
//! 1. Create and start a sensor
//! 2. Feed it synthetic page interactions
//! 3. Drain the message channel into a delivery agent
//! 4. Flush the outstanding entries to a collector
//!
//! Run with: cargo run --example pipeline_demo [collector-url]
//!
//! Without a reachable collector the flush fails and the demo shows the
//! spooled entries waiting for retry.

use std::time::Duration;

use telemetry_sensor_agent::{
    agent::DeliveryAgent,
    collector::{CollectorClient, CollectorConfig},
    sensor::{Interaction, Sensor, SensorConfig},
    stats::create_shared_stats,
    FlushOutcome, VERSION,
};

fn main() {
    println!("Telemetry Sensor Agent - Pipeline Demo (v{VERSION})");
    println!("===================================================");
    println!();

    let collector_url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://127.0.0.1:8787".to_string());

    // Create the sensor and simulate a small browsing session
    let mut sensor = Sensor::new(SensorConfig::default());
    sensor.navigate("https://example.com/home");
    sensor.start().expect("Failed to start sensor");

    sensor.observe(Interaction::PointerMove { x: 120.0, y: 80.0 });
    sensor.observe(Interaction::Click { x: 120.0, y: 80.0 });
    sensor.observe(Interaction::KeyDown {
        key: "Tab".to_string(),
    });
    sensor.observe(Interaction::Scroll { depth_ratio: 0.4 });
    sensor.observe(Interaction::Resize {
        width: 1024,
        height: 768,
    });
    sensor.navigate("https://example.com/checkout");
    sensor.observe(Interaction::VisibilityChange { hidden: true });
    sensor.observe(Interaction::VisibilityChange { hidden: false });
    sensor.stop(); // emits session-end

    // Set up the delivery side
    let stats = create_shared_stats();
    let spool_dir = std::env::temp_dir().join("telemetry-pipeline-demo");
    let client = CollectorClient::new(CollectorConfig::new(&collector_url, None));

    let mut agent = DeliveryAgent::new(
        spool_dir.join("events.jsonl"),
        5, // small batch so the spill is visible
        client,
        stats.clone(),
    );
    agent.activate().expect("Failed to open spool");
    println!("Session ID: {}", agent.session_id());
    println!("Collector:  {collector_url}");
    println!();

    // Drain the channel into the agent
    while let Ok(message) = sensor
        .receiver()
        .recv_timeout(Duration::from_millis(10))
    {
        agent.handle_message(&message);
    }

    println!(
        "Outstanding: {} in memory, {} spooled",
        agent.batch_len(),
        agent.spool_len()
    );
    println!();

    // Flush once
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to create runtime");

    match runtime.block_on(agent.flush()) {
        FlushOutcome::Delivered(count) => {
            println!("Delivered {count} events to the collector.");
        }
        FlushOutcome::Failed => {
            println!(
                "Delivery failed (is a collector running at {collector_url}?)."
            );
            println!(
                "{} entries remain spooled and will be retried on the next flush.",
                agent.spool_len()
            );
        }
        FlushOutcome::Idle => {
            println!("Nothing to deliver.");
        }
    }

    println!();
    println!("{}", stats.summary());
    println!();
    println!("Demo complete!");
}
