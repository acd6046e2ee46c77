use std::collections::VecDeque;
use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::broadcast;

/// Receives progress while an operation runs. Purely informational: nothing
/// may depend on a sink having been called.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, percent: u8, detail: &str);
}

/// Receives the single end-of-run summary of an upgrade.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str);
}

/// Discards everything.
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn on_progress(&self, _percent: u8, _detail: &str) {}
}

impl Notifier for NullProgress {
    fn notify(&self, _message: &str) {}
}

/// Message types sent to subscribers during an upgrade.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum UpgradeMessage {
    /// Progress of the currently running operation.
    Progress { percent: u8, detail: String },
    /// The end-of-run summary.
    Notice { message: String },
}

/// Number of past messages kept for late subscribers.
pub const HISTORY_LIMIT: usize = 512;

/// Broadcasts progress and notices to any number of subscribers.
///
/// Keeps the most recent [`HISTORY_LIMIT`] messages so a subscriber that
/// connects late (a UI opened mid-upgrade) can replay what it missed.
pub struct UpgradeEvents {
    tx: broadcast::Sender<UpgradeMessage>,
    history: Mutex<VecDeque<UpgradeMessage>>,
}

impl UpgradeEvents {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel::<UpgradeMessage>(256);
        Self {
            tx,
            history: Mutex::new(VecDeque::with_capacity(HISTORY_LIMIT)),
        }
    }

    /// Returns the history of past messages and a receiver for future ones.
    pub fn subscribe(&self) -> (Vec<UpgradeMessage>, broadcast::Receiver<UpgradeMessage>) {
        // Subscribe first, then read history: a message sent in between shows up
        // twice at worst, never zero times.
        let rx = self.tx.subscribe();
        (self.history(), rx)
    }

    pub fn history(&self) -> Vec<UpgradeMessage> {
        self.history.lock().unwrap().iter().cloned().collect()
    }

    fn broadcast(&self, msg: UpgradeMessage) {
        {
            let mut history = self.history.lock().unwrap();
            if history.len() == HISTORY_LIMIT {
                history.pop_front();
            }
            history.push_back(msg.clone());
        }
        // No receivers is fine
        let _ = self.tx.send(msg);
    }
}

impl Default for UpgradeEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for UpgradeEvents {
    fn on_progress(&self, percent: u8, detail: &str) {
        self.broadcast(UpgradeMessage::Progress {
            percent: percent.min(100),
            detail: detail.to_owned(),
        });
    }
}

impl Notifier for UpgradeEvents {
    fn notify(&self, message: &str) {
        self.broadcast(UpgradeMessage::Notice {
            message: message.to_owned(),
        });
    }
}
