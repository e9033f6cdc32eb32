// Ledger database file in the service data directory
pub const LEDGER_DB_FILE: &str = "ledger.db";

// Primary key of the single indexer_state row
pub const INDEXER_STATE_KEY: &str = "indexer";

// Max number of bound parameters used by a single IN (...) lookup
pub const TXID_LOOKUP_CHUNK_SIZE: usize = 500;
