use crate::output::IndexOutputRef;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SyncPhase {
    Initializing = 0,
    Indexing = 1,
    Synced = 2,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatus {
    pub phase: SyncPhase,

    // Watermark: last block committed to the ledger
    pub current: u64,

    // Chain tip observed by the last pass
    pub total: u64,

    pub message: Option<String>,
}

pub struct SyncStatusManager {
    status: Mutex<SyncStatus>,
}

impl SyncStatusManager {
    pub fn new() -> Self {
        let status = SyncStatus {
            phase: SyncPhase::Initializing,
            current: 0,
            total: 0,
            message: None,
        };

        Self {
            status: Mutex::new(status),
        }
    }

    pub fn update_phase(&self, phase: SyncPhase, msg: Option<String>) {
        let mut status = self.status.lock().unwrap();
        status.phase = phase;
        if msg.is_some() {
            status.message = msg;
        }
    }

    pub fn update_total(&self, total: u64, msg: Option<String>) {
        let mut status = self.status.lock().unwrap();
        status.total = total;
        if msg.is_some() {
            status.message = msg;
        }
    }

    pub fn update_current(&self, current: u64, msg: Option<String>) {
        let mut status = self.status.lock().unwrap();
        status.current = current;
        if msg.is_some() {
            status.message = msg;
        }
    }

    pub fn update_message(&self, message: Option<String>) {
        let mut status = self.status.lock().unwrap();
        status.message = message;
    }

    pub fn get_status(&self) -> SyncStatus {
        let status = self.status.lock().unwrap();
        status.clone()
    }

    /// Mirror the status into the console progress bars once a second.
    pub fn run_monitor(self: &Arc<Self>, output: IndexOutputRef) -> tokio::task::JoinHandle<()> {
        let status_manager = self.clone();
        tokio::spawn(async move {
            let mut last_message = None;
            loop {
                let status = status_manager.get_status();
                output.update_total_block_height(status.total);
                output.update_current_height(status.current);

                if status.message != last_message {
                    if let Some(msg) = &status.message {
                        output.set_message(msg);
                    }
                    last_message = status.message;
                }

                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        })
    }
}

pub type SyncStatusManagerRef = Arc<SyncStatusManager>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_updates() {
        let manager = SyncStatusManager::new();
        assert_eq!(manager.get_status().phase, SyncPhase::Initializing);

        manager.update_total(120, Some("Tip at 120".to_string()));
        manager.update_current(100, None);
        manager.update_phase(SyncPhase::Indexing, None);

        let status = manager.get_status();
        assert_eq!(status.phase, SyncPhase::Indexing);
        assert_eq!(status.current, 100);
        assert_eq!(status.total, 120);
        assert_eq!(status.message.as_deref(), Some("Tip at 120"));

        manager.update_message(None);
        assert!(manager.get_status().message.is_none());
    }
}
