//! Background cache refresh
//!
//! Periodically revalidates a fixed set of keys against the origin so they
//! stay warm, reporting what happened over a tokio channel. A key whose fetch
//! is already running is skipped for that cycle rather than queued.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::cache::{CacheStatus, ResponseCache};
use crate::fetch::SharedFetcher;

/// Messages sent from the background refresher
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshMessage {
    /// A refresh cycle started
    CycleStarted,
    /// A key was revalidated; `status` tells whether the payload changed
    Refreshed { key: String, status: CacheStatus },
    /// A fetch for the key was already in flight
    Skipped { key: String },
    /// Refreshing the key failed and nothing was cached to fall back on
    Failed { key: String, error: String },
    /// A refresh cycle finished
    CycleCompleted,
}

/// Configuration for the background refresher
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Time between refresh cycles
    pub interval: Duration,
    /// Keys revalidated on every cycle
    pub keys: Vec<String>,
    /// Whether auto-refresh is enabled
    pub enabled: bool,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300), // 5 minutes
            keys: Vec::new(),
            enabled: true,
        }
    }
}

impl RefreshConfig {
    pub fn new(interval: Duration, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            interval,
            keys: keys.into_iter().map(Into::into).collect(),
            enabled: true,
        }
    }
}

/// Handle for controlling the background refresher
///
/// Dropping the handle stops the refresher after its current cycle.
pub struct RefreshHandle {
    /// Channel for receiving refresh messages
    pub receiver: mpsc::Receiver<RefreshMessage>,
    trigger_tx: mpsc::Sender<()>,
    /// Flag to signal shutdown
    shutdown_tx: mpsc::Sender<()>,
}

impl RefreshHandle {
    /// Creates a RefreshHandle and spawns the refresh task
    ///
    /// The first cycle runs one `interval` after spawning. With refresh
    /// disabled no task is spawned and the receiver stays empty.
    pub fn spawn(cache: ResponseCache, config: RefreshConfig, fetcher: SharedFetcher) -> Self {
        let (msg_tx, msg_rx) = mpsc::channel(32);
        let (trigger_tx, mut trigger_rx) = mpsc::channel::<()>(1);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        if config.enabled {
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(config.interval);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                // Skip the first tick (immediate)
                interval.tick().await;

                loop {
                    tokio::select! {
                        _ = interval.tick() => {}
                        Some(()) = trigger_rx.recv() => {
                            interval.reset();
                        }
                        _ = shutdown_rx.recv() => {
                            break;
                        }
                    }

                    if !run_cycle(&cache, &config.keys, &fetcher, &msg_tx).await {
                        break;
                    }
                }
                debug!("Background refresh stopped");
            });
        }

        Self {
            receiver: msg_rx,
            trigger_tx,
            shutdown_tx,
        }
    }

    /// Requests an immediate refresh cycle
    ///
    /// A request made while one is already pending is merged into it.
    pub fn request_refresh(&self) {
        let _ = self.trigger_tx.try_send(());
    }

    /// Shuts down the refresh task
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// Revalidates every key once; returns false when nobody is listening anymore
async fn run_cycle(
    cache: &ResponseCache,
    keys: &[String],
    fetcher: &SharedFetcher,
    tx: &mpsc::Sender<RefreshMessage>,
) -> bool {
    if tx.send(RefreshMessage::CycleStarted).await.is_err() {
        return false;
    }

    for key in keys {
        let message = match cache.refresh(key, fetcher).await {
            None => RefreshMessage::Skipped { key: key.clone() },
            Some(Ok(response)) => RefreshMessage::Refreshed {
                key: key.clone(),
                status: response.status,
            },
            Some(Err(e)) => {
                warn!(key = %key, error = %e, "Background refresh failed");
                RefreshMessage::Failed {
                    key: key.clone(),
                    error: e.to_string(),
                }
            }
        };
        if tx.send(message).await.is_err() {
            return false;
        }
    }

    tx.send(RefreshMessage::CycleCompleted).await.is_ok()
}

/// Checks for pending refresh messages without blocking
///
/// # Returns
/// * `Some(RefreshMessage)` if a message was available
/// * `None` if no messages are pending
pub fn try_recv(handle: &mut RefreshHandle) -> Option<RefreshMessage> {
    handle.receiver.try_recv().ok()
}
