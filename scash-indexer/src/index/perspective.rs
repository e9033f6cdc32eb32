use crate::btc::{ChainClientRef, RpcScriptPubKey, RpcTransaction, amount_string};
use crate::error::{AnalyzeError, ChainError};
use bitcoincore_rpc::bitcoin::{Amount, Txid};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerspectiveKind {
    Send,
    Receive,
    #[serde(rename = "self")]
    SelfTransfer,
}

/// A transaction as seen from one address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionPerspective {
    pub txid: Txid,
    pub timestamp: Option<u64>,
    pub block_height: Option<u64>,

    #[serde(rename = "type")]
    pub kind: PerspectiveKind,

    // Absolute value of the net effect on the observing address
    #[serde(with = "amount_string")]
    pub amount: Amount,

    pub counterparties: Vec<String>,
    pub confirmations: u64,
}

#[derive(Debug, Default)]
struct SideTotals {
    total: Amount,
    counterparties: BTreeSet<String>,
}

impl SideTotals {
    fn add(&mut self, observing: &str, script: &RpcScriptPubKey, value: Amount) {
        if script.pays_to(observing) {
            self.total += value;
        } else {
            self.counterparties.extend(script.decodable_addresses());
        }
    }
}

pub fn classify(
    total_in: Amount,
    total_out: Amount,
    input_counterparties: BTreeSet<String>,
    output_counterparties: BTreeSet<String>,
) -> (PerspectiveKind, Amount, Vec<String>) {
    match total_out.cmp(&total_in) {
        Ordering::Greater => (
            PerspectiveKind::Receive,
            total_out - total_in,
            input_counterparties.into_iter().collect(),
        ),
        Ordering::Less => (
            PerspectiveKind::Send,
            total_in - total_out,
            output_counterparties.into_iter().collect(),
        ),
        // Zero net reports the output side
        Ordering::Equal => (
            PerspectiveKind::SelfTransfer,
            Amount::ZERO,
            output_counterparties.into_iter().collect(),
        ),
    }
}

/// Confirmations reported by the node, else derived from the block height,
/// else 0.
pub fn confirmations(tx: &RpcTransaction, latest_height: u64) -> u64 {
    if let Some(confirmations) = tx.confirmations {
        return confirmations;
    }

    match tx.blockheight {
        Some(height) if latest_height >= height => latest_height - height + 1,
        _ => 0,
    }
}

/// Derives per-address semantics of a transaction. Every non-coinbase input
/// costs one getrawtransaction call, so this is meant for on-demand detail,
/// not bulk history.
#[derive(Clone)]
pub struct PerspectiveAnalyzer {
    chain: ChainClientRef,
}

impl PerspectiveAnalyzer {
    pub fn new(chain: ChainClientRef) -> Self {
        Self { chain }
    }

    pub fn analyze(
        &self,
        txid: &Txid,
        observing_address: &str,
        latest_height: u64,
    ) -> Result<TransactionPerspective, AnalyzeError> {
        let tx = self.fetch(txid)?;

        let mut outputs = SideTotals::default();
        for vout in &tx.vout {
            outputs.add(observing_address, &vout.script_pub_key, vout.value);
        }

        let mut inputs = SideTotals::default();
        for vin in &tx.vin {
            let Some((prev_txid, prev_vout)) = vin.previous_output() else {
                continue;
            };

            let prev_tx = self.fetch(&prev_txid)?;
            let spent = prev_tx.output(prev_vout).ok_or_else(|| {
                let msg = format!("transaction {} has no output {}", prev_txid, prev_vout);
                error!("{}", msg);
                AnalyzeError::TransactionUnavailable {
                    txid: prev_txid,
                    source: ChainError::Malformed(msg),
                }
            })?;

            inputs.add(observing_address, &spent.script_pub_key, spent.value);
        }

        let (kind, amount, counterparties) = classify(
            inputs.total,
            outputs.total,
            inputs.counterparties,
            outputs.counterparties,
        );

        Ok(TransactionPerspective {
            txid: tx.txid,
            timestamp: tx.blocktime.or(tx.time),
            block_height: tx.blockheight,
            kind,
            amount,
            counterparties,
            confirmations: confirmations(&tx, latest_height),
        })
    }

    fn fetch(&self, txid: &Txid) -> Result<RpcTransaction, AnalyzeError> {
        self.chain.get_raw_transaction(txid).map_err(|e| {
            warn!("Failed to get transaction {} for analysis: {}", txid, e);
            AnalyzeError::TransactionUnavailable {
                txid: *txid,
                source: e,
            }
        })
    }
}
