//! Event envelope types for the telemetry pipeline.
//!
//! Every observed interaction is normalized into an [`EventEnvelope`] before
//! it enters the message channel. The envelope shape is fixed: a tagged
//! `event_type` plus a payload carrying capture time, page context, and the
//! type-specific detail fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed set of interaction event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    PointerMove,
    Click,
    Scroll,
    KeyDown,
    Focus,
    Blur,
    TabHidden,
    TabVisible,
    Resize,
    SessionStart,
    SessionEnd,
}

/// Page viewport dimensions at capture time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// Type-specific detail fields, flattened into the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventDetail {
    /// Session-start context (locale/timezone/referrer/user-agent).
    Session {
        locale: String,
        timezone: String,
        referrer: String,
        user_agent: String,
    },
    /// Pointer position for pointer-move and click events.
    Pointer { client_x: f64, client_y: f64 },
    /// Key identifier for key-down events.
    Key { key: String },
    /// How far down the page the user has scrolled, in [0.0, 1.0].
    Scroll { depth_ratio: f64 },
    /// Events with no extra fields (focus, blur, visibility, resize, session-end).
    Empty {},
}

/// Envelope payload: capture context plus the flattened detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    /// Timestamp when the event was captured
    pub timestamp: DateTime<Utc>,
    /// Page URL active at capture time
    pub origin_url: String,
    /// Viewport dimensions at capture time
    pub viewport: Viewport,
    /// Type-specific fields
    #[serde(flatten)]
    pub detail: EventDetail,
}

/// A captured interaction event, as sent over the message channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_type: EventType,
    pub payload: EventPayload,
}

impl EventEnvelope {
    fn new(event_type: EventType, origin_url: &str, viewport: Viewport, detail: EventDetail) -> Self {
        Self {
            event_type,
            payload: EventPayload {
                timestamp: Utc::now(),
                origin_url: origin_url.to_string(),
                viewport,
                detail,
            },
        }
    }

    /// Create a pointer movement event.
    pub fn pointer_move(origin_url: &str, viewport: Viewport, client_x: f64, client_y: f64) -> Self {
        Self::new(
            EventType::PointerMove,
            origin_url,
            viewport,
            EventDetail::Pointer { client_x, client_y },
        )
    }

    /// Create a click event.
    pub fn click(origin_url: &str, viewport: Viewport, client_x: f64, client_y: f64) -> Self {
        Self::new(
            EventType::Click,
            origin_url,
            viewport,
            EventDetail::Pointer { client_x, client_y },
        )
    }

    /// Create a scroll event. The depth ratio is clamped to [0.0, 1.0].
    pub fn scroll(origin_url: &str, viewport: Viewport, depth_ratio: f64) -> Self {
        Self::new(
            EventType::Scroll,
            origin_url,
            viewport,
            EventDetail::Scroll {
                depth_ratio: depth_ratio.clamp(0.0, 1.0),
            },
        )
    }

    /// Create a key-down event carrying the key identifier.
    pub fn key_down(origin_url: &str, viewport: Viewport, key: impl Into<String>) -> Self {
        Self::new(
            EventType::KeyDown,
            origin_url,
            viewport,
            EventDetail::Key { key: key.into() },
        )
    }

    /// Create a window focus event.
    pub fn focus(origin_url: &str, viewport: Viewport) -> Self {
        Self::new(EventType::Focus, origin_url, viewport, EventDetail::Empty {})
    }

    /// Create a window blur event.
    pub fn blur(origin_url: &str, viewport: Viewport) -> Self {
        Self::new(EventType::Blur, origin_url, viewport, EventDetail::Empty {})
    }

    /// Create a visibility-change event.
    pub fn visibility(origin_url: &str, viewport: Viewport, hidden: bool) -> Self {
        let event_type = if hidden {
            EventType::TabHidden
        } else {
            EventType::TabVisible
        };
        Self::new(event_type, origin_url, viewport, EventDetail::Empty {})
    }

    /// Create a resize event. The viewport carries the new dimensions.
    pub fn resize(origin_url: &str, viewport: Viewport) -> Self {
        Self::new(EventType::Resize, origin_url, viewport, EventDetail::Empty {})
    }

    /// Create the synthetic session-start event.
    pub fn session_start(
        origin_url: &str,
        viewport: Viewport,
        locale: impl Into<String>,
        timezone: impl Into<String>,
        referrer: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> Self {
        Self::new(
            EventType::SessionStart,
            origin_url,
            viewport,
            EventDetail::Session {
                locale: locale.into(),
                timezone: timezone.into(),
                referrer: referrer.into(),
                user_agent: user_agent.into(),
            },
        )
    }

    /// Create the synthetic session-end event.
    pub fn session_end(origin_url: &str, viewport: Viewport) -> Self {
        Self::new(
            EventType::SessionEnd,
            origin_url,
            viewport,
            EventDetail::Empty {},
        )
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.payload.timestamp
    }
}

/// A structured message on the Sensor → Agent channel.
///
/// Only messages with `type == "event"` carry an envelope; anything else is
/// ignored by the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: serde_json::Value,
}

impl ChannelMessage {
    pub const EVENT_KIND: &'static str = "event";

    /// Wrap an envelope into a channel message.
    ///
    /// Returns `None` if the envelope cannot be serialized; the sensor layer
    /// drops such events silently.
    pub fn event(envelope: &EventEnvelope) -> Option<Self> {
        serde_json::to_value(envelope).ok().map(|data| Self {
            kind: Self::EVENT_KIND.to_string(),
            data,
        })
    }

    /// Extract the event envelope, if this is a well-formed event message.
    pub fn parse_event(&self) -> Option<EventEnvelope> {
        if self.kind != Self::EVENT_KIND {
            return None;
        }
        serde_json::from_value(self.data.clone()).ok()
    }
}
