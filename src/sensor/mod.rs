//! Page-side sensor: observes raw interactions and forwards normalized
//! event envelopes into the message channel.
//!
//! The sensor is a pure translation layer. It keeps no persistent state and
//! offers no delivery guarantee of its own: if the channel is full or the
//! agent side is gone, events are dropped silently. Durability starts at the
//! [`crate::agent::DeliveryAgent`].

pub mod types;

pub use types::{ChannelMessage, EventDetail, EventEnvelope, EventPayload, EventType, Viewport};

use crossbeam_channel::{bounded, Receiver, Sender};

/// Default channel capacity between sensor and agent.
const CHANNEL_CAPACITY: usize = 10_000;

/// Configuration for which interaction sources the sensor observes.
#[derive(Debug, Clone)]
pub struct SensorConfig {
    /// Pointer movement and clicks
    pub capture_pointer: bool,
    /// Key-down events
    pub capture_keyboard: bool,
    /// Scroll depth events
    pub capture_scroll: bool,
    /// Focus, blur, visibility, and resize events
    pub capture_window: bool,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            capture_pointer: true,
            capture_keyboard: true,
            capture_scroll: true,
            capture_window: true,
        }
    }
}

/// Errors that can occur when starting the sensor.
#[derive(Debug)]
pub enum SensorError {
    AlreadyRunning,
}

impl std::fmt::Display for SensorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorError::AlreadyRunning => write!(f, "Sensor is already running"),
        }
    }
}

impl std::error::Error for SensorError {}

/// A raw interaction observed on the page surface.
#[derive(Debug, Clone)]
pub enum Interaction {
    PointerMove { x: f64, y: f64 },
    Click { x: f64, y: f64 },
    Scroll { depth_ratio: f64 },
    KeyDown { key: String },
    Focus,
    Blur,
    VisibilityChange { hidden: bool },
    Resize { width: u32, height: u32 },
}

/// Observes page interactions and emits normalized envelopes.
pub struct Sensor {
    config: SensorConfig,
    sender: Sender<ChannelMessage>,
    receiver: Receiver<ChannelMessage>,
    running: bool,
    origin_url: String,
    referrer: String,
    viewport: Viewport,
    dropped: u64,
}

impl Sensor {
    /// Create a new sensor with the default channel capacity.
    pub fn new(config: SensorConfig) -> Self {
        Self::with_capacity(config, CHANNEL_CAPACITY)
    }

    /// Create a new sensor with an explicit channel capacity.
    pub fn with_capacity(config: SensorConfig, capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self {
            config,
            sender,
            receiver,
            running: false,
            origin_url: "about:blank".to_string(),
            referrer: String::new(),
            viewport: Viewport::default(),
            dropped: 0,
        }
    }

    /// Start observing. Emits the synthetic session-start event.
    pub fn start(&mut self) -> Result<(), SensorError> {
        if self.running {
            return Err(SensorError::AlreadyRunning);
        }
        self.running = true;

        let envelope = EventEnvelope::session_start(
            &self.origin_url,
            self.viewport,
            host_locale(),
            host_timezone(),
            self.referrer.clone(),
            format!("telemetry-sensor-agent/{}", env!("CARGO_PKG_VERSION")),
        );
        self.forward(envelope);
        Ok(())
    }

    /// Stop observing. Emits session-end best-effort: if the channel is
    /// already gone the event is lost, which is acceptable at this layer.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        let envelope = EventEnvelope::session_end(&self.origin_url, self.viewport);
        self.forward(envelope);
        self.running = false;
    }

    /// Check if the sensor is currently running.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Record a page navigation. The previous origin becomes the referrer.
    pub fn navigate(&mut self, url: impl Into<String>) {
        self.referrer = std::mem::replace(&mut self.origin_url, url.into());
    }

    /// Current page URL the sensor attaches to captured events.
    pub fn origin_url(&self) -> &str {
        &self.origin_url
    }

    /// Translate a raw interaction into an envelope and forward it.
    ///
    /// Interactions from disabled sources are ignored. Nothing is forwarded
    /// while the sensor is stopped.
    pub fn observe(&mut self, interaction: Interaction) {
        if !self.running {
            return;
        }

        let envelope = match interaction {
            Interaction::PointerMove { x, y } if self.config.capture_pointer => {
                EventEnvelope::pointer_move(&self.origin_url, self.viewport, x, y)
            }
            Interaction::Click { x, y } if self.config.capture_pointer => {
                EventEnvelope::click(&self.origin_url, self.viewport, x, y)
            }
            Interaction::Scroll { depth_ratio } if self.config.capture_scroll => {
                EventEnvelope::scroll(&self.origin_url, self.viewport, depth_ratio)
            }
            Interaction::KeyDown { key } if self.config.capture_keyboard => {
                EventEnvelope::key_down(&self.origin_url, self.viewport, key)
            }
            Interaction::Focus if self.config.capture_window => {
                EventEnvelope::focus(&self.origin_url, self.viewport)
            }
            Interaction::Blur if self.config.capture_window => {
                EventEnvelope::blur(&self.origin_url, self.viewport)
            }
            Interaction::VisibilityChange { hidden } if self.config.capture_window => {
                EventEnvelope::visibility(&self.origin_url, self.viewport, hidden)
            }
            Interaction::Resize { width, height } if self.config.capture_window => {
                self.viewport = Viewport::new(width, height);
                EventEnvelope::resize(&self.origin_url, self.viewport)
            }
            _ => return,
        };

        self.forward(envelope);
    }

    /// Get the receiver side of the message channel for the agent.
    pub fn receiver(&self) -> &Receiver<ChannelMessage> {
        &self.receiver
    }

    /// Get a sender clone, for external producers feeding the same channel.
    pub fn sender(&self) -> Sender<ChannelMessage> {
        self.sender.clone()
    }

    /// Number of events dropped because the channel was unavailable.
    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }

    // Fire-and-forget send. No backpressure at this layer.
    fn forward(&mut self, envelope: EventEnvelope) {
        match ChannelMessage::event(&envelope) {
            Some(message) => {
                if self.sender.try_send(message).is_err() {
                    self.dropped += 1;
                    log::debug!("channel unavailable, dropped {:?} event", envelope.event_type);
                }
            }
            None => {
                self.dropped += 1;
            }
        }
    }
}

/// Best-effort host locale, e.g. "en-US".
fn host_locale() -> String {
    std::env::var("LANG")
        .ok()
        .and_then(|lang| {
            let tag = lang.split('.').next().unwrap_or("").replace('_', "-");
            if tag.is_empty() || tag == "C" {
                None
            } else {
                Some(tag)
            }
        })
        .unwrap_or_else(|| "en-US".to_string())
}

/// Host timezone from the TZ environment variable, falling back to UTC.
fn host_timezone() -> String {
    std::env::var("TZ")
        .ok()
        .and_then(|tz| tz.parse::<chrono_tz::Tz>().ok())
        .unwrap_or(chrono_tz::Tz::UTC)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_emits_session_start() {
        let mut sensor = Sensor::new(SensorConfig::default());
        sensor.navigate("https://example.com/home");
        sensor.start().unwrap();

        let message = sensor.receiver().try_recv().unwrap();
        let envelope = message.parse_event().unwrap();
        assert_eq!(envelope.event_type, EventType::SessionStart);
        assert_eq!(envelope.payload.origin_url, "https://example.com/home");
    }

    #[test]
    fn test_double_start_rejected() {
        let mut sensor = Sensor::new(SensorConfig::default());
        sensor.start().unwrap();
        assert!(matches!(sensor.start(), Err(SensorError::AlreadyRunning)));
    }

    #[test]
    fn test_observe_translates_click() {
        let mut sensor = Sensor::new(SensorConfig::default());
        sensor.navigate("https://example.com");
        sensor.start().unwrap();
        let _ = sensor.receiver().try_recv(); // session-start

        sensor.observe(Interaction::Click { x: 12.0, y: 34.0 });
        let envelope = sensor.receiver().try_recv().unwrap().parse_event().unwrap();
        assert_eq!(envelope.event_type, EventType::Click);
        assert_eq!(
            envelope.payload.detail,
            EventDetail::Pointer {
                client_x: 12.0,
                client_y: 34.0
            }
        );
    }

    #[test]
    fn test_disabled_source_filtered() {
        let config = SensorConfig {
            capture_keyboard: false,
            ..SensorConfig::default()
        };
        let mut sensor = Sensor::new(config);
        sensor.start().unwrap();
        let _ = sensor.receiver().try_recv();

        sensor.observe(Interaction::KeyDown {
            key: "a".to_string(),
        });
        assert!(sensor.receiver().try_recv().is_err());
    }

    #[test]
    fn test_resize_updates_viewport() {
        let mut sensor = Sensor::new(SensorConfig::default());
        sensor.start().unwrap();
        let _ = sensor.receiver().try_recv();

        sensor.observe(Interaction::Resize {
            width: 640,
            height: 480,
        });
        let envelope = sensor.receiver().try_recv().unwrap().parse_event().unwrap();
        assert_eq!(envelope.payload.viewport, Viewport::new(640, 480));

        // Subsequent events carry the new viewport.
        sensor.observe(Interaction::Focus);
        let envelope = sensor.receiver().try_recv().unwrap().parse_event().unwrap();
        assert_eq!(envelope.payload.viewport, Viewport::new(640, 480));
    }

    #[test]
    fn test_full_channel_drops_silently() {
        let mut sensor = Sensor::with_capacity(SensorConfig::default(), 1);
        sensor.start().unwrap(); // fills the single slot with session-start

        sensor.observe(Interaction::Focus);
        sensor.observe(Interaction::Blur);
        assert_eq!(sensor.dropped_count(), 2);

        // The first message is still intact.
        let envelope = sensor.receiver().try_recv().unwrap().parse_event().unwrap();
        assert_eq!(envelope.event_type, EventType::SessionStart);
    }

    #[test]
    fn test_navigate_sets_referrer() {
        let mut sensor = Sensor::new(SensorConfig::default());
        sensor.navigate("https://example.com/a");
        sensor.navigate("https://example.com/b");
        sensor.start().unwrap();

        let envelope = sensor.receiver().try_recv().unwrap().parse_event().unwrap();
        match envelope.payload.detail {
            EventDetail::Session { ref referrer, .. } => {
                assert_eq!(referrer, "https://example.com/a")
            }
            ref other => panic!("unexpected detail: {other:?}"),
        }
    }

    #[test]
    fn test_no_events_while_stopped() {
        let mut sensor = Sensor::new(SensorConfig::default());
        sensor.observe(Interaction::Focus);
        assert!(sensor.receiver().try_recv().is_err());
    }
}
