use super::block::{BlockApplyReport, BlockProcessor};
use crate::btc::ChainClientRef;
use crate::config::SyncConfig;
use crate::error::{ErrorKind, IndexError};
use crate::status::{SyncPhase, SyncStatusManagerRef};
use crate::storage::LedgerStoreRef;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// What a single sync pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    // Another pass was still running
    Skipped,

    UpToDate {
        height: u64,
    },

    // Blocks [from, to] were committed
    Completed {
        from: u64,
        to: u64,
    },

    // Shutdown was requested, blocks up to the watermark are committed
    Stopped {
        watermark: u64,
    },

    Failed {
        watermark: Option<u64>,
        failed_height: Option<u64>,
        kind: ErrorKind,
        message: String,
    },
}

// Holds the single-flight flag for the lifetime of a pass
struct SyncFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> SyncFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for SyncFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Walks the chain from the ledger watermark to the node tip, committing
/// one block per ledger transaction.
pub struct SyncCoordinator {
    config: SyncConfig,
    chain: ChainClientRef,
    store: LedgerStoreRef,
    processor: BlockProcessor,
    status: SyncStatusManagerRef,

    syncing: AtomicBool,
    stopping: AtomicBool,
}

impl SyncCoordinator {
    pub fn new(
        config: SyncConfig,
        chain: ChainClientRef,
        store: LedgerStoreRef,
        status: SyncStatusManagerRef,
    ) -> Self {
        let processor = BlockProcessor::new(chain.clone());

        Self {
            config,
            chain,
            store,
            processor,
            status,
            syncing: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    /// Ask the running pass, and every later one, to stop before the next
    /// block. The block being written is still committed or rolled back as
    /// a whole.
    pub fn request_stop(&self) {
        self.stopping.store(true, Ordering::Release);
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    /// Run one catch-up pass. Returns immediately with `Skipped` if a pass is
    /// already in flight. Failures never escape: they are logged and reported
    /// in the outcome, and the next pass retries from the same watermark.
    pub fn run_sync_pass(&self) -> PassOutcome {
        let Some(_guard) = SyncFlightGuard::acquire(&self.syncing) else {
            debug!("Sync pass still in flight, skipping this tick");
            return PassOutcome::Skipped;
        };

        let watermark = match self.store.ensure_indexer_state() {
            Ok(height) => height,
            Err(e) => return self.fail(None, None, e),
        };
        self.status.update_current(watermark, None);

        let tip = match self.chain.get_block_count() {
            Ok(height) => height,
            Err(e) => return self.fail(Some(watermark), None, e.into()),
        };
        self.status.update_total(tip, None);

        if tip <= watermark {
            if tip < watermark {
                // No reorg handling: a node behind the ledger is only reported
                warn!(
                    "Chain tip {} is behind the ledger watermark {}",
                    tip, watermark
                );
            }

            self.status.update_phase(
                SyncPhase::Synced,
                Some(format!("Synced up to block height {}", watermark)),
            );
            return PassOutcome::UpToDate { height: watermark };
        }

        let from = watermark + 1;
        info!("Syncing blocks [{}, {}]", from, tip);
        self.status.update_phase(
            SyncPhase::Indexing,
            Some(format!("Syncing blocks [{}, {}]", from, tip)),
        );

        for height in from..=tip {
            if self.is_stopping() {
                let watermark = height - 1;
                info!("Sync pass stopped before block {}", height);
                self.status
                    .update_message(Some(format!("Stopped after block height {}", watermark)));
                return PassOutcome::Stopped { watermark };
            }

            match self.sync_block(height) {
                Ok(report) => {
                    debug!("Block {} applied: {:?}", height, report);
                    self.status.update_current(height, None);
                }
                Err(e) => return self.fail(Some(height - 1), Some(height), e),
            }
        }

        info!("Synced blocks [{}, {}]", from, tip);
        self.status.update_phase(
            SyncPhase::Synced,
            Some(format!("Synced up to block height {}", tip)),
        );

        PassOutcome::Completed { from, to: tip }
    }

    /// Fetch one block and commit its effects together with the watermark
    /// advance to `height`. The indexer state must already exist with the
    /// watermark at `height - 1`, see `LedgerStore::ensure_indexer_state`.
    pub fn sync_block(&self, height: u64) -> Result<BlockApplyReport, IndexError> {
        let hash = self.chain.get_block_hash(height)?;
        let block = self.chain.get_block(&hash)?;
        if block.height != height {
            let e = IndexError::InvalidBlock {
                height,
                reason: format!("node returned block {} at height {}", hash, block.height),
            };
            error!("{}", e);
            return Err(e);
        }

        let report = self
            .store
            .run_in_transaction(self.config.transaction_timeout(), |tx| {
                let report = self.processor.apply_block(&block, tx)?;

                // Last write of the block
                tx.advance_watermark(height)?;
                Ok(report)
            })?;

        if !report.warnings.is_empty() {
            info!(
                "Block {} committed with {} unattributed inputs/outputs",
                height,
                report.warnings.len()
            );
        }

        Ok(report)
    }

    fn fail(
        &self,
        watermark: Option<u64>,
        failed_height: Option<u64>,
        e: IndexError,
    ) -> PassOutcome {
        let message = match failed_height {
            Some(height) => format!("Sync failed at block {}: {}", height, e),
            None => format!("Sync failed: {}", e),
        };
        error!("{} ({:?}), retry on next tick", message, e.kind());
        self.status.update_message(Some(message.clone()));

        PassOutcome::Failed {
            watermark,
            failed_height,
            kind: e.kind(),
            message,
        }
    }

    /// Drive sync passes on the configured timer until `shutdown` fires. A
    /// tick that lands while a pass is running is dropped by the
    /// single-flight guard.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<()>) {
        info!(
            "Sync coordinator starting in {:?}, interval {:?}",
            self.config.start_delay(),
            self.config.interval()
        );

        tokio::select! {
            _ = tokio::time::sleep(self.config.start_delay()) => {}
            _ = shutdown.changed() => {
                info!("Sync coordinator stopped before first pass");
                return;
            }
        }

        let mut interval = tokio::time::interval(self.config.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let coordinator = self.clone();
                    tokio::task::spawn_blocking(move || {
                        coordinator.run_sync_pass();
                    });
                }
                _ = shutdown.changed() => {
                    info!("Sync coordinator received shutdown signal");
                    self.request_stop();
                    break;
                }
            }
        }

        // A pass in flight stops once its current block is committed
        while self.is_syncing() {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        info!("Sync coordinator stopped");
    }
}

pub type SyncCoordinatorRef = Arc<SyncCoordinator>;
