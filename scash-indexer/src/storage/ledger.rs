use crate::constants::{INDEXER_STATE_KEY, LEDGER_DB_FILE, TXID_LOOKUP_CHUNK_SIZE};
use crate::error::IndexError;
use bitcoincore_rpc::bitcoin::{Amount, BlockHash, Txid};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub(crate) fn storage_error(context: &str, e: rusqlite::Error) -> IndexError {
    let msg = format!("{}: {}", context, e);
    error!("{}", msg);
    IndexError::Storage(msg)
}

// Read a TEXT column and parse it, reporting parse failures as conversion errors
pub(crate) fn get_parsed<T>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let s: String = row.get(idx)?;
    s.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// SQLite backed store for the address index: indexer state, unspent
/// outputs, addresses and transactions.
pub struct LedgerStore {
    db_path: PathBuf,
    pub(super) conn: Mutex<Connection>,
}

impl LedgerStore {
    pub fn new(data_dir: &Path) -> Result<Self, IndexError> {
        let db_path = data_dir.join(LEDGER_DB_FILE);

        let conn = Connection::open(&db_path).map_err(|e| {
            storage_error(
                &format!("Failed to open ledger database at {}", db_path.display()),
                e,
            )
        })?;

        let store = Self {
            db_path,
            conn: Mutex::new(conn),
        };
        store.init_db()?;

        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn init_db(&self) -> Result<(), IndexError> {
        let conn = self.conn.lock().unwrap();

        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(|e| storage_error("Failed to enable WAL journal", e))?;
        conn.pragma_update(None, "foreign_keys", true)
            .map_err(|e| storage_error("Failed to enable foreign keys", e))?;
        conn.busy_timeout(Duration::from_secs(30))
            .map_err(|e| storage_error("Failed to set busy timeout", e))?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS indexer_state (
                singleton TEXT NOT NULL PRIMARY KEY,
                last_processed_block INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS addresses (
                address TEXT NOT NULL PRIMARY KEY,
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS utxos (
                id INTEGER PRIMARY KEY AUTOINCREMENT,

                txid TEXT NOT NULL,
                output_index INTEGER NOT NULL,
                address TEXT NOT NULL,
                amount INTEGER NOT NULL,
                script_data TEXT NOT NULL,
                is_spent INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,

                FOREIGN KEY(address) REFERENCES addresses(address),
                UNIQUE(txid, output_index)
            );

            CREATE INDEX IF NOT EXISTS idx_utxos_address_spent
            ON utxos (address, is_spent);

            CREATE TABLE IF NOT EXISTS transactions (
                txid TEXT NOT NULL PRIMARY KEY,
                block_height INTEGER NOT NULL,
                block_hash TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_transactions_timestamp
            ON transactions (timestamp);

            CREATE TABLE IF NOT EXISTS transaction_addresses (
                txid TEXT NOT NULL,
                address TEXT NOT NULL,

                PRIMARY KEY(txid, address),
                FOREIGN KEY(txid) REFERENCES transactions(txid),
                FOREIGN KEY(address) REFERENCES addresses(address)
            );

            CREATE INDEX IF NOT EXISTS idx_transaction_addresses_address
            ON transaction_addresses (address);

            -- A spent output never becomes unspent again
            CREATE TRIGGER IF NOT EXISTS trig_utxo_spent_is_final
            BEFORE UPDATE OF is_spent ON utxos
            FOR EACH ROW
            WHEN OLD.is_spent = 1 AND NEW.is_spent = 0
            BEGIN
                SELECT RAISE(ABORT, 'spent utxo cannot be marked unspent');
            END;
            ",
        )
        .map_err(|e| storage_error("Failed to initialize ledger database", e))?;

        Ok(())
    }

    /// Return the last processed block height, creating the state row with
    /// height 0 on first run.
    pub fn ensure_indexer_state(&self) -> Result<u64, IndexError> {
        let conn = self.conn.lock().unwrap();

        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO indexer_state (singleton, last_processed_block) VALUES (?1, 0)",
                [INDEXER_STATE_KEY],
            )
            .map_err(|e| storage_error("Failed to create indexer state", e))?;
        if inserted > 0 {
            info!("Created indexer state at block height 0");
        }

        let height: i64 = conn
            .query_row(
                "SELECT last_processed_block FROM indexer_state WHERE singleton = ?1",
                [INDEXER_STATE_KEY],
                |row| row.get(0),
            )
            .map_err(|e| storage_error("Failed to read indexer state", e))?;

        Ok(height as u64)
    }

    pub fn last_processed_block(&self) -> Result<Option<u64>, IndexError> {
        let conn = self.conn.lock().unwrap();

        let height: Option<i64> = conn
            .query_row(
                "SELECT last_processed_block FROM indexer_state WHERE singleton = ?1",
                [INDEXER_STATE_KEY],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| storage_error("Failed to read indexer state", e))?;

        Ok(height.map(|h| h as u64))
    }

    /// Run `f` inside one immediate SQLite transaction. The transaction
    /// commits only if `f` succeeds within `budget`; otherwise every write
    /// made by `f` is rolled back.
    pub fn run_in_transaction<T, F>(&self, budget: Duration, f: F) -> Result<T, IndexError>
    where
        F: FnOnce(&LedgerTransaction<'_>) -> Result<T, IndexError>,
    {
        let mut conn = self.conn.lock().unwrap();
        let begin = Instant::now();

        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| storage_error("Failed to begin ledger transaction", e))?;
        let ledger_tx = LedgerTransaction { tx };

        // Dropping ledger_tx on any early return rolls the transaction back
        let ret = f(&ledger_tx)?;

        let elapsed = begin.elapsed();
        if elapsed > budget {
            let e = IndexError::StorageTimeout {
                budget_secs: budget.as_secs(),
                elapsed_ms: elapsed.as_millis(),
            };
            error!("Rolling back ledger transaction: {}", e);
            return Err(e);
        }

        ledger_tx
            .tx
            .commit()
            .map_err(|e| storage_error("Failed to commit ledger transaction", e))?;

        Ok(ret)
    }
}

pub type LedgerStoreRef = Arc<LedgerStore>;

/// Write access to the ledger inside a single atomic transaction. Every
/// write is keyed so that replaying the same block is a no-op.
pub struct LedgerTransaction<'conn> {
    tx: rusqlite::Transaction<'conn>,
}

impl LedgerTransaction<'_> {
    /// Return the subset of `txids` that already have a transaction record.
    pub fn existing_txids(&self, txids: &[Txid]) -> Result<HashSet<Txid>, IndexError> {
        let mut existing = HashSet::new();

        for chunk in txids.chunks(TXID_LOOKUP_CHUNK_SIZE) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql = format!(
                "SELECT txid FROM transactions WHERE txid IN ({})",
                placeholders
            );

            let mut stmt = self
                .tx
                .prepare(&sql)
                .map_err(|e| storage_error("Failed to prepare existing txid lookup", e))?;

            let params = chunk.iter().map(|t| t.to_string());
            let rows = stmt
                .query_map(rusqlite::params_from_iter(params), |row| get_parsed::<Txid>(row, 0))
                .map_err(|e| storage_error("Failed to query existing txids", e))?;

            for row in rows {
                existing.insert(row.map_err(|e| storage_error("Failed to read existing txid", e))?);
            }
        }

        Ok(existing)
    }

    /// Mark an output spent. Returns false when no unspent row matched, which
    /// is the case for outputs created before indexing began.
    pub fn mark_spent(&self, txid: &Txid, output_index: u32) -> Result<bool, IndexError> {
        let affected = self
            .tx
            .execute(
                "UPDATE utxos SET is_spent = 1 WHERE txid = ?1 AND output_index = ?2 AND is_spent = 0",
                rusqlite::params![txid.to_string(), output_index as i64],
            )
            .map_err(|e| {
                storage_error(&format!("Failed to mark utxo {}:{} spent", txid, output_index), e)
            })?;

        Ok(affected > 0)
    }

    pub fn upsert_address(&self, address: &str) -> Result<(), IndexError> {
        self.tx
            .execute("INSERT OR IGNORE INTO addresses (address) VALUES (?1)", [address])
            .map_err(|e| storage_error(&format!("Failed to upsert address {}", address), e))?;

        Ok(())
    }

    /// Create an unspent output record. Returns false if the record existed.
    pub fn insert_utxo(
        &self,
        txid: &Txid,
        output_index: u32,
        address: &str,
        amount: Amount,
        script_data: &str,
    ) -> Result<bool, IndexError> {
        let inserted = self
            .tx
            .execute(
                "
                INSERT INTO utxos (txid, output_index, address, amount, script_data, is_spent)
                VALUES (?1, ?2, ?3, ?4, ?5, 0)
                ON CONFLICT(txid, output_index) DO NOTHING
                ",
                rusqlite::params![
                    txid.to_string(),
                    output_index as i64,
                    address,
                    amount.to_sat() as i64,
                    script_data,
                ],
            )
            .map_err(|e| {
                storage_error(&format!("Failed to insert utxo {}:{}", txid, output_index), e)
            })?;

        Ok(inserted > 0)
    }

    /// Create a transaction record linked to its participant addresses. The
    /// addresses must already exist.
    pub fn create_transaction(
        &self,
        txid: &Txid,
        block_height: u64,
        block_hash: &BlockHash,
        timestamp: u64,
        addresses: &BTreeSet<String>,
    ) -> Result<(), IndexError> {
        if addresses.is_empty() {
            let msg = format!("Transaction {} has no participant address", txid);
            error!("{}", msg);
            return Err(IndexError::Storage(msg));
        }

        self.tx
            .execute(
                "
                INSERT INTO transactions (txid, block_height, block_hash, timestamp)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(txid) DO NOTHING
                ",
                rusqlite::params![
                    txid.to_string(),
                    block_height as i64,
                    block_hash.to_string(),
                    timestamp as i64,
                ],
            )
            .map_err(|e| storage_error(&format!("Failed to create transaction {}", txid), e))?;

        let mut stmt = self
            .tx
            .prepare_cached(
                "INSERT OR IGNORE INTO transaction_addresses (txid, address) VALUES (?1, ?2)",
            )
            .map_err(|e| storage_error("Failed to prepare transaction address link", e))?;

        let txid_str = txid.to_string();
        for address in addresses {
            stmt.execute(rusqlite::params![txid_str, address])
                .map_err(|e| {
                    storage_error(
                        &format!("Failed to link transaction {} to {}", txid, address),
                        e,
                    )
                })?;
        }

        Ok(())
    }

    /// Advance the watermark to `height`, which must be exactly one above the
    /// stored value.
    pub fn advance_watermark(&self, height: u64) -> Result<(), IndexError> {
        let affected = self
            .tx
            .execute(
                "
                UPDATE indexer_state SET last_processed_block = ?1
                WHERE singleton = ?2 AND last_processed_block = ?1 - 1
                ",
                rusqlite::params![height as i64, INDEXER_STATE_KEY],
            )
            .map_err(|e| storage_error("Failed to advance indexer watermark", e))?;

        if affected == 0 {
            let msg = format!(
                "Watermark can not advance to {}: stored height is not {}",
                height,
                height.saturating_sub(1)
            );
            error!("{}", msg);
            return Err(IndexError::Storage(msg));
        }

        Ok(())
    }
}
