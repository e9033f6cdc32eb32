use crate::constants::LEDGER_DB_FILE;
use std::path::Path;

// SQLite keeps the write-ahead log and shared memory index next to the database
const LEDGER_DB_SUFFIXES: &[&str] = &["", "-wal", "-shm"];

/// Delete the ledger database files under `data_dir`. The next start
/// re-indexes from block 1.
pub fn clear_db_files(data_dir: &Path) -> Result<(), String> {
    for suffix in LEDGER_DB_SUFFIXES {
        let path = data_dir.join(format!("{}{}", LEDGER_DB_FILE, suffix));
        if !path.exists() {
            continue;
        }

        std::fs::remove_file(&path).map_err(|e| {
            let msg = format!("Could not delete database file at {}: {}", path.display(), e);
            error!("{}", msg);
            msg
        })?;
        info!("Deleted database file at {}", path.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LedgerStore;

    #[test]
    fn test_clear_db_files() {
        let dir = std::env::temp_dir().join("scash_indexer_test").join("tool_clear_db");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();

        {
            let store = LedgerStore::new(&dir).unwrap();
            store.ensure_indexer_state().unwrap();
            assert!(store.db_path().exists());
        }

        clear_db_files(&dir).unwrap();
        assert!(!dir.join(LEDGER_DB_FILE).exists());

        // Nothing left to delete is fine
        clear_db_files(&dir).unwrap();
    }
}
