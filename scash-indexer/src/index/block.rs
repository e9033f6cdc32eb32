use crate::btc::{ChainClientRef, RpcBlock, RpcTransaction};
use crate::error::{DecodeSide, DecodeWarning, IndexError};
use crate::storage::LedgerTransaction;
use bitcoincore_rpc::bitcoin::Txid;
use std::collections::BTreeSet;

/// What applying one block changed in the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockApplyReport {
    pub height: u64,
    pub new_transactions: usize,

    // Transactions already indexed by an earlier attempt
    pub skipped_transactions: usize,

    // New transactions that got a transaction record
    pub indexed_transactions: usize,

    pub spent_outputs: usize,
    pub created_outputs: usize,
    pub warnings: Vec<DecodeWarning>,
}

/// Applies the spend/receive effects of a block to the ledger inside the
/// caller's transaction.
#[derive(Clone)]
pub struct BlockProcessor {
    chain: ChainClientRef,
}

impl BlockProcessor {
    pub fn new(chain: ChainClientRef) -> Self {
        Self { chain }
    }

    pub fn apply_block(
        &self,
        block: &RpcBlock,
        tx: &LedgerTransaction<'_>,
    ) -> Result<BlockApplyReport, IndexError> {
        let txids: Vec<Txid> = block.tx.iter().map(|item| item.txid).collect();
        let existing = tx.existing_txids(&txids)?;

        let mut report = BlockApplyReport {
            height: block.height,
            new_transactions: block.tx.len().saturating_sub(existing.len()),
            skipped_transactions: existing.len(),
            ..Default::default()
        };

        info!(
            "Block {} has {} new transactions of {}",
            block.height,
            report.new_transactions,
            block.tx.len()
        );

        for item in block.tx.iter().filter(|item| !existing.contains(&item.txid)) {
            self.apply_transaction(block, item, tx, &mut report)?;
        }

        Ok(report)
    }

    fn apply_transaction(
        &self,
        block: &RpcBlock,
        item: &RpcTransaction,
        tx: &LedgerTransaction<'_>,
        report: &mut BlockApplyReport,
    ) -> Result<(), IndexError> {
        let mut participants = BTreeSet::new();

        // Inputs: collect the spent outputs' owners, then consume the outputs
        for (index, vin) in item.vin.iter().enumerate() {
            if vin.is_coinbase() {
                continue;
            }

            let Some((prev_txid, prev_vout)) = vin.previous_output() else {
                let warning = DecodeWarning {
                    txid: item.txid,
                    side: DecodeSide::Input,
                    index: index as u32,
                    reason: "input has neither coinbase nor previous outpoint".to_string(),
                };
                warn!("{}", warning);
                report.warnings.push(warning);
                continue;
            };

            match self.resolve_spent_addresses(&prev_txid, prev_vout) {
                Ok(addresses) => participants.extend(addresses),
                Err(reason) => {
                    let warning = DecodeWarning {
                        txid: item.txid,
                        side: DecodeSide::Input,
                        index: index as u32,
                        reason,
                    };
                    warn!("{}", warning);
                    report.warnings.push(warning);
                }
            }

            if tx.mark_spent(&prev_txid, prev_vout)? {
                report.spent_outputs += 1;
            } else {
                debug!(
                    "Spent output {}:{} is not indexed, nothing to mark",
                    prev_txid, prev_vout
                );
            }
        }

        // Outputs: every output with an address becomes an unspent record
        for vout in &item.vout {
            let addresses = vout.script_pub_key.decodable_addresses();
            let Some(owner) = addresses.first() else {
                let warning = DecodeWarning {
                    txid: item.txid,
                    side: DecodeSide::Output,
                    index: vout.n,
                    reason: format!(
                        "script {} has no address",
                        vout.script_pub_key.script_type.as_deref().unwrap_or("unknown")
                    ),
                };
                debug!("{}", warning);
                report.warnings.push(warning);
                continue;
            };

            for address in &addresses {
                tx.upsert_address(address)?;
            }

            if tx.insert_utxo(
                &item.txid,
                vout.n,
                owner,
                vout.value,
                &vout.script_pub_key.hex,
            )? {
                report.created_outputs += 1;
            }

            participants.extend(addresses);
        }

        if participants.is_empty() {
            debug!(
                "Transaction {} at block {} has no address, not indexed",
                item.txid, block.height
            );
            return Ok(());
        }

        // Input owners may not have been seen as output owners yet
        for address in &participants {
            tx.upsert_address(address)?;
        }

        tx.create_transaction(&item.txid, block.height, &block.hash, block.time, &participants)?;
        report.indexed_transactions += 1;

        Ok(())
    }

    // Addresses owning the output spent by an input. Errors are reasons for a
    // decode warning, not failures of the block.
    fn resolve_spent_addresses(&self, prev_txid: &Txid, prev_vout: u32) -> Result<Vec<String>, String> {
        let prev_tx = self.chain.get_raw_transaction(prev_txid).map_err(|e| {
            format!("failed to resolve previous transaction {}: {}", prev_txid, e)
        })?;

        let output = prev_tx.output(prev_vout).ok_or_else(|| {
            format!("previous transaction {} has no output {}", prev_txid, prev_vout)
        })?;

        let addresses = output.script_pub_key.decodable_addresses();
        if addresses.is_empty() {
            return Err(format!("spent output {}:{} has no address", prev_txid, prev_vout));
        }

        Ok(addresses)
    }
}
