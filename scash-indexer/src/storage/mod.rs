mod ledger;
mod query;

pub use ledger::*;
pub use query::*;

#[cfg(test)]
pub(crate) fn test_store(name: &str) -> LedgerStore {
    let dir = std::env::temp_dir().join("scash_indexer_test").join(name);
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();

    LedgerStore::new(&dir).unwrap()
}
