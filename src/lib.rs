//! Telemetry Sensor Agent - interaction capture with reliable delivery.
//!
//! This library captures user-interaction events and delivers them to a
//! remote collector with at-least-once semantics, surviving restarts and
//! network outages.
//!
//! # Delivery Guarantees
//!
//! - **At-least-once**: an accepted event appears in at least one delivered
//!   payload once a flush succeeds; re-delivery after a failure is possible
//! - **No loss on failure**: a failed delivery never removes spooled entries
//! - **Bounded loss window**: only in-memory batch entries (at most
//!   `batch_size - 1`) are lost if the agent is torn down
//! - **Best-effort capture**: the sensor itself drops events silently when
//!   the channel is unavailable; durability starts at the agent
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Telemetry Sensor Agent                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌──────────┐   ┌───────────────┐   ┌──────────────┐       │
//! │  │  Sensor  │──▶│ DeliveryAgent │──▶│  Collector   │       │
//! │  │ (page)   │   │ (batch+spool) │   │ (HTTP POST)  │       │
//! │  └──────────┘   └───────────────┘   └──────────────┘       │
//! │       │                 │                   ▲              │
//! │       ▼                 ▼                   │              │
//! │  ┌──────────┐   ┌───────────────┐   ┌──────────────┐       │
//! │  │ Pipeline │   │  EventSpool   │   │ Connectivity │       │
//! │  │  Stats   │   │ (JSONL queue) │   │   Watcher    │       │
//! │  └──────────┘   └───────────────┘   └──────────────┘       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use telemetry_sensor_agent::sensor::{Interaction, Sensor, SensorConfig};
//!
//! let mut sensor = Sensor::new(SensorConfig::default());
//! sensor.navigate("https://example.com");
//! sensor.start().expect("Failed to start sensor");
//!
//! sensor.observe(Interaction::Click { x: 100.0, y: 200.0 });
//!
//! // The agent side consumes sensor.receiver() and handles delivery.
//! ```

pub mod agent;
pub mod collector;
pub mod config;
pub mod connectivity;
pub mod sensor;
pub mod spool;
pub mod stats;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use agent::{AgentState, DeliveryAgent, FlushOutcome, QueueEntry};
pub use collector::{
    BlockingCollectorClient, CollectorClient, CollectorConfig, CollectorError, FlushPayload,
};
pub use config::{Config, SourceConfig};
pub use connectivity::{ConnectivityWatcher, Signal};
pub use sensor::{ChannelMessage, EventEnvelope, EventType, Interaction, Sensor, SensorConfig};
pub use spool::{EventSpool, SpoolError};
pub use stats::{PipelineStats, SharedPipelineStats, StatsSnapshot};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
