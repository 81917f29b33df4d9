//! Connectivity watcher: the platform wake-up hook for offline retry.
//!
//! A background thread polls the collector health endpoint and emits a
//! signal on the offline → online transition. The agent loop treats that
//! signal exactly like a timer tick, so spooled entries from an offline
//! period are retried as soon as the collector is reachable again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::collector::{BlockingCollectorClient, CollectorConfig, CollectorError};

/// Signals delivered to the agent loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// The collector became reachable after being unreachable.
    ConnectivityRestored,
}

/// Background health poller for the collector endpoint.
pub struct ConnectivityWatcher {
    receiver: Receiver<Signal>,
    handle: Option<JoinHandle<()>>,
}

impl ConnectivityWatcher {
    /// Spawn the watcher thread. It polls until `running` goes false.
    pub fn spawn(
        config: CollectorConfig,
        poll_interval: Duration,
        running: Arc<AtomicBool>,
    ) -> Result<Self, CollectorError> {
        let client = BlockingCollectorClient::new(config)?;
        let (sender, receiver) = bounded(4);

        let handle = std::thread::spawn(move || {
            poll_loop(client, sender, poll_interval, running);
        });

        Ok(Self {
            receiver,
            handle: Some(handle),
        })
    }

    /// Get the signal receiver for the agent loop.
    pub fn receiver(&self) -> &Receiver<Signal> {
        &self.receiver
    }

    /// Wait for the watcher thread to finish.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn poll_loop(
    client: BlockingCollectorClient,
    sender: Sender<Signal>,
    poll_interval: Duration,
    running: Arc<AtomicBool>,
) {
    // None until the first probe completes, so startup in an online state
    // does not count as a restoration.
    let mut online: Option<bool> = None;

    while running.load(Ordering::SeqCst) {
        let up = client.test_connection().unwrap_or(false);

        if up && online == Some(false) {
            log::info!("collector reachable again");
            // Full signal buffer means a flush is already pending.
            let _ = sender.try_send(Signal::ConnectivityRestored);
        }
        online = Some(up);

        // Sleep in short slices so shutdown stays responsive.
        let mut remaining = poll_interval;
        while running.load(Ordering::SeqCst) && remaining > Duration::ZERO {
            let slice = remaining.min(Duration::from_millis(250));
            std::thread::sleep(slice);
            remaining = remaining.saturating_sub(slice);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreachable_collector_emits_no_signal() {
        let running = Arc::new(AtomicBool::new(true));
        let config = CollectorConfig::new("http://127.0.0.1:9", None);
        let watcher =
            ConnectivityWatcher::spawn(config, Duration::from_millis(10), running.clone()).unwrap();

        std::thread::sleep(Duration::from_millis(100));
        assert!(watcher.receiver().try_recv().is_err());

        running.store(false, Ordering::SeqCst);
        watcher.join();
    }
}
