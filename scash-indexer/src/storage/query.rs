use super::ledger::{LedgerStore, get_parsed, storage_error};
use crate::btc::amount_string;
use crate::error::IndexError;
use bitcoincore_rpc::bitcoin::{Amount, BlockHash, Txid};
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoRecord {
    pub txid: Txid,
    pub output_index: u32,
    pub address: String,
    #[serde(with = "amount_string")]
    pub amount: Amount,
    pub script_data: String,
    pub is_spent: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub txid: Txid,
    pub block_height: u64,
    pub block_hash: BlockHash,
    // Unix seconds of the containing block
    pub timestamp: u64,
}

/// An unspent output of an address, with the height of the transaction
/// that created it when that transaction is indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressUtxo {
    pub txid: Txid,
    pub output_index: u32,
    #[serde(with = "amount_string")]
    pub amount: Amount,
    pub script_data: String,
    pub height: Option<u64>,
}

fn row_to_transaction(row: &rusqlite::Row) -> rusqlite::Result<TransactionRecord> {
    Ok(TransactionRecord {
        txid: get_parsed(row, 0)?,
        block_height: row.get::<_, i64>(1)? as u64,
        block_hash: get_parsed(row, 2)?,
        timestamp: row.get::<_, i64>(3)? as u64,
    })
}

impl LedgerStore {
    /// Sum of all unspent outputs owned by `address`.
    pub fn get_address_balance(&self, address: &str) -> Result<Amount, IndexError> {
        let conn = self.conn.lock().unwrap();

        let sat: i64 = conn
            .query_row(
                "SELECT COALESCE(SUM(amount), 0) FROM utxos WHERE address = ?1 AND is_spent = 0",
                [address],
                |row| row.get(0),
            )
            .map_err(|e| storage_error(&format!("Failed to sum balance of {}", address), e))?;

        Ok(Amount::from_sat(sat as u64))
    }

    pub fn count_address_transactions(&self, address: &str) -> Result<u64, IndexError> {
        let conn = self.conn.lock().unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM transaction_addresses WHERE address = ?1",
                [address],
                |row| row.get(0),
            )
            .map_err(|e| {
                storage_error(&format!("Failed to count transactions of {}", address), e)
            })?;

        Ok(count as u64)
    }

    /// Unspent outputs of `address`, newest first.
    pub fn get_address_unspent(&self, address: &str) -> Result<Vec<AddressUtxo>, IndexError> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(
                "
                SELECT u.txid, u.output_index, u.amount, u.script_data, t.block_height
                FROM utxos u
                LEFT JOIN transactions t ON t.txid = u.txid
                WHERE u.address = ?1 AND u.is_spent = 0
                ORDER BY u.created_at DESC, u.id DESC
                ",
            )
            .map_err(|e| storage_error("Failed to prepare unspent query", e))?;

        let rows = stmt
            .query_map([address], |row| {
                Ok(AddressUtxo {
                    txid: get_parsed(row, 0)?,
                    output_index: row.get::<_, i64>(1)? as u32,
                    amount: Amount::from_sat(row.get::<_, i64>(2)? as u64),
                    script_data: row.get(3)?,
                    height: row.get::<_, Option<i64>>(4)?.map(|h| h as u64),
                })
            })
            .map_err(|e| storage_error(&format!("Failed to query unspent of {}", address), e))?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| storage_error(&format!("Failed to read unspent of {}", address), e))
    }

    /// One page of the transactions `address` took part in, most recent first.
    pub fn get_address_transactions(
        &self,
        address: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<TransactionRecord>, IndexError> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(
                "
                SELECT t.txid, t.block_height, t.block_hash, t.timestamp
                FROM transactions t
                JOIN transaction_addresses ta ON ta.txid = t.txid
                WHERE ta.address = ?1
                ORDER BY t.timestamp DESC, t.block_height DESC, t.txid ASC
                LIMIT ?2 OFFSET ?3
                ",
            )
            .map_err(|e| storage_error("Failed to prepare address transactions query", e))?;

        let rows = stmt
            .query_map(
                rusqlite::params![address, limit as i64, offset as i64],
                row_to_transaction,
            )
            .map_err(|e| {
                storage_error(&format!("Failed to query transactions of {}", address), e)
            })?;

        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(|e| {
            storage_error(&format!("Failed to read transactions of {}", address), e)
        })
    }

    pub fn get_transaction(&self, txid: &Txid) -> Result<Option<TransactionRecord>, IndexError> {
        let conn = self.conn.lock().unwrap();

        conn.query_row(
            "SELECT txid, block_height, block_hash, timestamp FROM transactions WHERE txid = ?1",
            [txid.to_string()],
            row_to_transaction,
        )
        .optional()
        .map_err(|e| storage_error(&format!("Failed to get transaction {}", txid), e))
    }

    pub fn get_transaction_addresses(&self, txid: &Txid) -> Result<Vec<String>, IndexError> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare("SELECT address FROM transaction_addresses WHERE txid = ?1 ORDER BY address")
            .map_err(|e| storage_error("Failed to prepare transaction addresses query", e))?;

        let rows = stmt
            .query_map([txid.to_string()], |row| row.get::<_, String>(0))
            .map_err(|e| storage_error(&format!("Failed to query addresses of {}", txid), e))?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| storage_error(&format!("Failed to read addresses of {}", txid), e))
    }

    pub fn get_utxo(&self, txid: &Txid, output_index: u32) -> Result<Option<UtxoRecord>, IndexError> {
        let conn = self.conn.lock().unwrap();

        conn.query_row(
            "
            SELECT txid, output_index, address, amount, script_data, is_spent, created_at
            FROM utxos WHERE txid = ?1 AND output_index = ?2
            ",
            rusqlite::params![txid.to_string(), output_index as i64],
            |row| {
                Ok(UtxoRecord {
                    txid: get_parsed(row, 0)?,
                    output_index: row.get::<_, i64>(1)? as u32,
                    address: row.get(2)?,
                    amount: Amount::from_sat(row.get::<_, i64>(3)? as u64),
                    script_data: row.get(4)?,
                    is_spent: row.get(5)?,
                    created_at: row.get(6)?,
                })
            },
        )
        .optional()
        .map_err(|e| storage_error(&format!("Failed to get utxo {}:{}", txid, output_index), e))
    }

    pub fn count_transactions(&self) -> Result<u64, IndexError> {
        self.count_rows("transactions")
    }

    pub fn count_utxos(&self) -> Result<u64, IndexError> {
        self.count_rows("utxos")
    }

    pub fn count_addresses(&self) -> Result<u64, IndexError> {
        self.count_rows("addresses")
    }

    fn count_rows(&self, table: &str) -> Result<u64, IndexError> {
        let conn = self.conn.lock().unwrap();

        let count: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
            .map_err(|e| storage_error(&format!("Failed to count rows of {}", table), e))?;

        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btc::mock::{block_hash, txid};
    use crate::storage::test_store;
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn addresses(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn test_address_queries() {
        let store = test_store("query_address");
        let budget = Duration::from_secs(10);

        store
            .run_in_transaction(budget, |tx| {
                for a in ["alice", "bob"] {
                    tx.upsert_address(a)?;
                }
                tx.insert_utxo(&txid(1), 0, "alice", Amount::from_sat(3000), "a0")?;
                tx.insert_utxo(&txid(1), 1, "bob", Amount::from_sat(500), "b1")?;
                tx.create_transaction(&txid(1), 1, &block_hash(1), 100, &addresses(&["alice", "bob"]))?;

                tx.insert_utxo(&txid(2), 0, "alice", Amount::from_sat(1200), "a2")?;
                tx.mark_spent(&txid(1), 0)?;
                tx.create_transaction(&txid(2), 2, &block_hash(2), 200, &addresses(&["alice"]))?;
                Ok(())
            })
            .unwrap();

        assert_eq!(store.get_address_balance("alice").unwrap(), Amount::from_sat(1200));
        assert_eq!(store.get_address_balance("bob").unwrap(), Amount::from_sat(500));
        assert_eq!(store.get_address_balance("nobody").unwrap(), Amount::ZERO);

        assert_eq!(store.count_address_transactions("alice").unwrap(), 2);
        assert_eq!(store.count_address_transactions("bob").unwrap(), 1);

        let unspent = store.get_address_unspent("alice").unwrap();
        assert_eq!(unspent.len(), 1);
        assert_eq!(unspent[0].txid, txid(2));
        assert_eq!(unspent[0].height, Some(2));

        let page = store.get_address_transactions("alice", 0, 10).unwrap();
        assert_eq!(
            page.iter().map(|t| t.txid).collect::<Vec<_>>(),
            vec![txid(2), txid(1)]
        );
        assert_eq!(page[0].timestamp, 200);
        assert_eq!(page[0].block_hash, block_hash(2));

        let page = store.get_address_transactions("alice", 1, 10).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].txid, txid(1));

        assert_eq!(store.count_addresses().unwrap(), 2);
        assert_eq!(store.count_utxos().unwrap(), 3);
    }

    #[test]
    fn test_unspent_newest_first() {
        let store = test_store("query_unspent_order");
        let budget = Duration::from_secs(10);

        store
            .run_in_transaction(budget, |tx| {
                tx.upsert_address("erin")?;
                for n in 1..=3u8 {
                    tx.insert_utxo(&txid(n), 0, "erin", Amount::from_sat(n as u64), "00")?;
                }
                Ok(())
            })
            .unwrap();

        let unspent = store.get_address_unspent("erin").unwrap();
        assert_eq!(
            unspent.iter().map(|u| u.txid).collect::<Vec<_>>(),
            vec![txid(3), txid(2), txid(1)]
        );
        // Outputs of transactions without a record have no height
        assert!(unspent.iter().all(|u| u.height.is_none()));
    }
}
