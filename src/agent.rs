//! Delivery agent: buffers accepted events, persists overflow, and flushes
//! batches to the remote collector with at-least-once semantics.
//!
//! The agent is decoupled from any page: it owns the receiving side of the
//! message channel, an in-memory batch, and the durable spool. A flush moves
//! the batch into the spool, sends the spool's full contents in one request,
//! and clears the spool only after a confirmed 2xx response. Failed
//! deliveries leave the spool untouched for the next trigger.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};

use crate::collector::{CollectorClient, FlushPayload};
use crate::connectivity::Signal;
use crate::sensor::{ChannelMessage, EventEnvelope, EventPayload, EventType};
use crate::spool::{EventSpool, SpoolError};
use crate::stats::SharedPipelineStats;

/// Default number of in-memory entries before the batch spills to the spool.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Default interval between timer-triggered flushes.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);

/// An accepted event, stamped with the agent's session and receipt time.
///
/// This is exactly the wire shape of one element of the flush payload's
/// `events` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Session active when the agent accepted the event
    pub session_id: String,
    /// Event type, copied from the envelope
    pub event_type: EventType,
    /// The envelope payload
    pub payload: EventPayload,
    /// Agent-side receipt time
    pub received_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn new(session_id: &str, envelope: EventEnvelope) -> Self {
        Self {
            session_id: session_id.to_string(),
            event_type: envelope.event_type,
            payload: envelope.payload,
            received_at: Utc::now(),
        }
    }
}

/// Agent lifecycle state. `Ready` is the only steady state; there is no
/// terminal state, the host may tear the agent down at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Installing,
    Activating,
    Ready,
}

/// Result of one flush invocation. Flushes never fail fatally; a `Failed`
/// outcome means the spool was left intact for the next trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing outstanding; no network request was made.
    Idle,
    /// All outstanding entries were delivered and the spool cleared.
    Delivered(usize),
    /// Delivery failed; entries remain spooled.
    Failed,
}

/// The background delivery agent.
pub struct DeliveryAgent {
    session_id: String,
    state: AgentState,
    batch: Vec<QueueEntry>,
    batch_size: usize,
    spool_path: PathBuf,
    spool: Option<EventSpool>,
    client: CollectorClient,
    stats: SharedPipelineStats,
}

impl DeliveryAgent {
    /// Create a new agent in the `Installing` state.
    ///
    /// A fresh session id is generated here and held in memory only; it is
    /// never persisted. Entries recovered from the spool keep the session id
    /// they were accepted under, but a flush payload's top-level session id
    /// is always the current agent's.
    pub fn new(
        spool_path: impl Into<PathBuf>,
        batch_size: usize,
        client: CollectorClient,
        stats: SharedPipelineStats,
    ) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            state: AgentState::Installing,
            batch: Vec::new(),
            batch_size: batch_size.max(1),
            spool_path: spool_path.into(),
            spool: None,
            client,
            stats,
        }
    }

    /// Open the durable spool and transition to `Ready`.
    ///
    /// Entries persisted by a previous agent lifetime are recovered here and
    /// will be included in the next flush.
    pub fn activate(&mut self) -> Result<(), SpoolError> {
        self.state = AgentState::Activating;
        let spool = EventSpool::open(&self.spool_path)?;
        if !spool.is_empty() {
            log::info!(
                "recovered {} spooled entries from a previous session",
                spool.len()
            );
        }
        self.spool = Some(spool);
        self.state = AgentState::Ready;
        log::debug!("agent ready, session {}", self.session_id);
        Ok(())
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == AgentState::Ready
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Handle one channel message. Well-formed event messages are accepted;
    /// everything else is dropped without error.
    pub fn handle_message(&mut self, message: &ChannelMessage) {
        match message.parse_event() {
            Some(envelope) => self.accept_event(envelope),
            None => {
                log::debug!("ignoring malformed channel message (type {:?})", message.kind);
            }
        }
    }

    /// Accept an event into the in-memory batch. At `batch_size` entries the
    /// whole batch moves into the spool. Never fails: a spool write error is
    /// logged and the batch is retained in memory for the next flush.
    pub fn accept_event(&mut self, envelope: EventEnvelope) {
        let entry = QueueEntry::new(&self.session_id, envelope);
        self.batch.push(entry);
        self.stats.record_event_accepted();

        if self.batch.len() >= self.batch_size {
            self.spill();
        }
    }

    /// Move the in-memory batch into the spool.
    fn spill(&mut self) {
        if self.batch.is_empty() {
            return;
        }
        let Some(spool) = self.spool.as_mut() else {
            log::warn!(
                "spool not open; holding {} entries in memory",
                self.batch.len()
            );
            return;
        };

        match spool.append(&self.batch) {
            Ok(()) => {
                self.stats.record_entries_spooled(self.batch.len() as u64);
                self.batch.clear();
            }
            Err(e) => {
                // Entries stay in memory and the next flush retries the move.
                log::warn!("spool append failed, retaining batch in memory: {e}");
            }
        }
    }

    /// Drain everything outstanding and attempt one delivery.
    ///
    /// Ordering within one invocation is strict: batch → spool move, spool
    /// read, network send, then clear only after a confirmed success. An
    /// empty spool short-circuits with no network request.
    pub async fn flush(&mut self) -> FlushOutcome {
        self.spill();

        let entries = {
            let Some(spool) = self.spool.as_ref() else {
                return FlushOutcome::Failed;
            };
            match spool.read_all() {
                Ok(entries) => entries,
                Err(e) => {
                    log::warn!("spool read failed, skipping flush: {e}");
                    return FlushOutcome::Failed;
                }
            }
        };

        if entries.is_empty() {
            return FlushOutcome::Idle;
        }

        let count = entries.len();
        self.stats.record_flush_attempted();

        let payload = FlushPayload {
            session_id: self.session_id.clone(),
            ts: Utc::now().timestamp_millis(),
            events: entries,
        };

        match self.client.post_events(&payload).await {
            Ok(ack) => {
                if let Some(spool) = self.spool.as_mut() {
                    if let Err(e) = spool.clear() {
                        // Entries will be re-delivered next flush; acceptable
                        // under at-least-once.
                        log::warn!("spool clear failed after delivery: {e}");
                    }
                }
                self.stats.record_flush_delivered(count as u64);
                log::info!(
                    "delivered {count} events (collector accepted {:?})",
                    ack.accepted
                );
                FlushOutcome::Delivered(count)
            }
            Err(e) => {
                self.stats.record_delivery_failure();
                log::warn!("delivery failed, keeping {count} spooled entries: {e}");
                FlushOutcome::Failed
            }
        }
    }

    /// Entries currently held in the in-memory batch.
    pub fn batch_len(&self) -> usize {
        self.batch.len()
    }

    /// Entries currently persisted in the spool.
    pub fn spool_len(&self) -> usize {
        self.spool.as_ref().map(|s| s.len()).unwrap_or(0)
    }

    /// Total outstanding entries (batch + spool).
    pub fn pending(&self) -> usize {
        self.batch_len() + self.spool_len()
    }
}

/// Run the agent loop until `running` goes false.
///
/// One thread, three triggers: message arrival, connectivity-restoration
/// signal, and the periodic flush timer. Flushes block the loop on a
/// current-thread runtime, so they are serialized; overlapping flushes
/// cannot occur in-process.
pub fn run(
    mut agent: DeliveryAgent,
    messages: Receiver<ChannelMessage>,
    signals: Receiver<Signal>,
    flush_interval: Duration,
    running: Arc<AtomicBool>,
) -> std::io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let mut last_flush = Instant::now();

    while running.load(Ordering::SeqCst) {
        crossbeam_channel::select! {
            recv(messages) -> message => match message {
                Ok(message) => agent.handle_message(&message),
                Err(_) => {
                    log::info!("message channel closed, stopping agent loop");
                    break;
                }
            },
            recv(signals) -> signal => match signal {
                Ok(Signal::ConnectivityRestored) => {
                    log::info!("connectivity restored, flushing");
                    runtime.block_on(agent.flush());
                    last_flush = Instant::now();
                }
                Err(_) => {
                    // Watcher gone; fall back to the timer alone.
                    std::thread::sleep(Duration::from_millis(50));
                }
            },
            default(Duration::from_millis(200)) => {}
        }

        if last_flush.elapsed() >= flush_interval {
            runtime.block_on(agent.flush());
            last_flush = Instant::now();
        }
    }

    // Final best-effort flush so a clean shutdown leaves nothing behind.
    runtime.block_on(agent.flush());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::CollectorConfig;
    use crate::sensor::Viewport;
    use crate::stats::PipelineStats;

    fn test_agent(dir: &std::path::Path, batch_size: usize) -> DeliveryAgent {
        let client = CollectorClient::new(CollectorConfig::new("http://127.0.0.1:9", None));
        let mut agent = DeliveryAgent::new(
            dir.join("events.jsonl"),
            batch_size,
            client,
            Arc::new(PipelineStats::new()),
        );
        agent.activate().unwrap();
        agent
    }

    fn envelope(key: &str) -> EventEnvelope {
        EventEnvelope::key_down("https://example.com", Viewport::default(), key)
    }

    #[test]
    fn test_state_machine() {
        let dir = tempfile::tempdir().unwrap();
        let client = CollectorClient::new(CollectorConfig::new("http://127.0.0.1:9", None));
        let mut agent = DeliveryAgent::new(
            dir.path().join("events.jsonl"),
            DEFAULT_BATCH_SIZE,
            client,
            Arc::new(PipelineStats::new()),
        );
        assert_eq!(agent.state(), AgentState::Installing);
        agent.activate().unwrap();
        assert!(agent.is_ready());
    }

    #[test]
    fn test_accept_below_threshold_stays_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let mut agent = test_agent(dir.path(), 50);

        agent.accept_event(envelope("a"));
        agent.accept_event(envelope("b"));

        assert_eq!(agent.batch_len(), 2);
        assert_eq!(agent.spool_len(), 0);
    }

    #[test]
    fn test_threshold_moves_whole_batch_to_spool() {
        let dir = tempfile::tempdir().unwrap();
        let mut agent = test_agent(dir.path(), 3);

        for key in ["a", "b", "c"] {
            agent.accept_event(envelope(key));
        }

        assert_eq!(agent.batch_len(), 0);
        assert_eq!(agent.spool_len(), 3);

        // The next event starts a fresh batch.
        agent.accept_event(envelope("d"));
        assert_eq!(agent.batch_len(), 1);
        assert_eq!(agent.spool_len(), 3);
    }

    #[test]
    fn test_entries_stamped_with_agent_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut agent = test_agent(dir.path(), 1);
        let session_id = agent.session_id().to_string();

        agent.accept_event(envelope("a"));
        let spool = EventSpool::open(dir.path().join("events.jsonl")).unwrap();
        let entries = spool.read_all().unwrap();
        assert_eq!(entries[0].session_id, session_id);
    }

    #[test]
    fn test_malformed_message_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut agent = test_agent(dir.path(), 50);

        agent.handle_message(&ChannelMessage {
            kind: "event".to_string(),
            data: serde_json::json!({"not": "an envelope"}),
        });
        agent.handle_message(&ChannelMessage {
            kind: "ping".to_string(),
            data: serde_json::Value::Null,
        });

        assert_eq!(agent.pending(), 0);
    }

    #[test]
    fn test_flush_on_empty_spool_is_idle() {
        let dir = tempfile::tempdir().unwrap();
        let mut agent = test_agent(dir.path(), 50);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        assert_eq!(runtime.block_on(agent.flush()), FlushOutcome::Idle);
    }

    #[test]
    fn test_restart_recovers_spooled_entries() {
        let dir = tempfile::tempdir().unwrap();
        let first_session;
        {
            let mut agent = test_agent(dir.path(), 2);
            first_session = agent.session_id().to_string();
            agent.accept_event(envelope("a"));
            agent.accept_event(envelope("b"));
            assert_eq!(agent.spool_len(), 2);
        }

        // A recreated agent sees the persisted entries under a new session.
        let agent = test_agent(dir.path(), 2);
        assert_ne!(agent.session_id(), first_session);
        assert_eq!(agent.spool_len(), 2);
    }
}
