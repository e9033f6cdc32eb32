use crate::btc::{ChainClientRef, RawTxInput, RpcBlockchainInfo, amount_string};
use crate::error::{ChainError, IndexError};
use crate::index::{PerspectiveAnalyzer, TransactionPerspective};
use crate::storage::{AddressUtxo, LedgerStoreRef, TransactionRecord};
use bitcoincore_rpc::bitcoin::{Amount, Txid};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const DEFAULT_PAGE_LIMIT: u64 = 10;

// Confirmation target in blocks used when the caller gives none
pub const DEFAULT_FEE_CONF_TARGET: u16 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressSummary {
    pub address: String,

    #[serde(with = "amount_string")]
    pub balance: Amount,

    pub transaction_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressUtxos {
    pub unspents: Vec<AddressUtxo>,

    // Chain tip reported by the node
    pub height: u64,

    #[serde(with = "amount_string")]
    pub total_amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransactionPageData {
    Records(Vec<TransactionRecord>),
    Details(Vec<TransactionPerspective>),
}

impl TransactionPageData {
    pub fn len(&self) -> usize {
        match self {
            TransactionPageData::Records(records) => records.len(),
            TransactionPageData::Details(details) => details.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionPage {
    pub page: u64,
    pub limit: u64,

    // All indexed transactions of the address, not only this page
    pub total: u64,

    pub data: TransactionPageData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeEstimate {
    pub conf_target: u16,

    // Per 1000 virtual bytes, none when the node has too little data
    #[serde(with = "amount_string::opt")]
    pub fee_rate: Option<Amount>,

    // Target the estimate is actually valid for
    pub blocks: u64,

    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTransaction {
    pub raw_tx_hex: String,
}

/// Read path over the ledger: balances, unspent outputs and history of an
/// address, plus raw transaction broadcast.
#[derive(Clone)]
pub struct WalletService {
    store: LedgerStoreRef,
    chain: ChainClientRef,
    analyzer: PerspectiveAnalyzer,
}

impl WalletService {
    pub fn new(store: LedgerStoreRef, chain: ChainClientRef) -> Self {
        let analyzer = PerspectiveAnalyzer::new(chain.clone());

        Self {
            store,
            chain,
            analyzer,
        }
    }

    pub fn get_address_summary(&self, address: &str) -> Result<AddressSummary, IndexError> {
        let balance = self.store.get_address_balance(address)?;
        let transaction_count = self.store.count_address_transactions(address)?;

        Ok(AddressSummary {
            address: address.to_string(),
            balance,
            transaction_count,
        })
    }

    pub fn get_address_utxos(&self, address: &str) -> Result<AddressUtxos, IndexError> {
        let unspents = self.store.get_address_unspent(address)?;
        let height = self.chain.get_block_count()?;

        let total_amount = unspents
            .iter()
            .try_fold(Amount::ZERO, |total, utxo| total.checked_add(utxo.amount))
            .ok_or_else(|| {
                let msg = format!("Unspent total of {} overflows", address);
                error!("{}", msg);
                IndexError::Storage(msg)
            })?;

        Ok(AddressUtxos {
            unspents,
            height,
            total_amount,
        })
    }

    /// One page of the address history, newest first. Pages start at 1. With
    /// `show_details` every record is expanded from the address's point of
    /// view; records whose analysis fails are left out of the page.
    pub fn get_address_transactions(
        &self,
        address: &str,
        page: u64,
        limit: u64,
        show_details: bool,
        latest_height: u64,
    ) -> Result<TransactionPage, IndexError> {
        let page = page.max(1);
        let offset = (page - 1).saturating_mul(limit);

        let total = self.store.count_address_transactions(address)?;
        let records = self.store.get_address_transactions(address, offset, limit)?;

        let data = if show_details {
            let details = records
                .iter()
                .filter_map(|record| self.expand_record(record, address, latest_height))
                .collect();
            TransactionPageData::Details(details)
        } else {
            TransactionPageData::Records(records)
        };

        Ok(TransactionPage {
            page,
            limit,
            total,
            data,
        })
    }

    fn expand_record(
        &self,
        record: &TransactionRecord,
        address: &str,
        latest_height: u64,
    ) -> Option<TransactionPerspective> {
        match self.analyzer.analyze(&record.txid, address, latest_height) {
            Ok(mut detail) => {
                // The ledger is the source of truth for placement
                detail.timestamp = Some(record.timestamp);
                detail.block_height = Some(record.block_height);
                Some(detail)
            }
            Err(e) => {
                warn!("Skip transaction {} in history of {}: {}", record.txid, address, e);
                None
            }
        }
    }

    pub fn broadcast_transaction(&self, tx_hex: &str) -> Result<Txid, ChainError> {
        let tx_hex = tx_hex.trim();
        if tx_hex.is_empty() {
            let msg = "Empty raw transaction".to_string();
            error!("{}", msg);
            return Err(ChainError::Malformed(msg));
        }

        self.chain.send_raw_transaction(tx_hex)
    }

    /// Build an unsigned transaction on the node. Signing stays with the
    /// caller.
    pub fn create_raw_transaction(
        &self,
        inputs: &[RawTxInput],
        outputs: &BTreeMap<String, Amount>,
    ) -> Result<RawTransaction, ChainError> {
        if inputs.is_empty() || outputs.is_empty() {
            let msg = format!(
                "Raw transaction needs inputs and outputs, got {} inputs and {} outputs",
                inputs.len(),
                outputs.len()
            );
            error!("{}", msg);
            return Err(ChainError::Malformed(msg));
        }

        if let Some((address, _)) = outputs.iter().find(|(_, amount)| **amount == Amount::ZERO) {
            let msg = format!("Raw transaction output to {} has zero amount", address);
            error!("{}", msg);
            return Err(ChainError::Malformed(msg));
        }

        let raw_tx_hex = self.chain.create_raw_transaction(inputs, outputs)?;
        info!(
            "Created raw transaction with {} inputs and {} outputs",
            inputs.len(),
            outputs.len()
        );

        Ok(RawTransaction { raw_tx_hex })
    }

    pub fn estimate_smart_fee(&self, conf_target: u16) -> Result<FeeEstimate, ChainError> {
        if conf_target == 0 {
            let msg = "Fee confirmation target must be at least 1 block".to_string();
            error!("{}", msg);
            return Err(ChainError::Malformed(msg));
        }

        let estimate = self.chain.estimate_smart_fee(conf_target)?;
        if estimate.feerate.is_none() {
            warn!(
                "Node has no fee estimate for {} blocks: {:?}",
                conf_target, estimate.errors
            );
        }

        Ok(FeeEstimate {
            conf_target,
            fee_rate: estimate.feerate,
            blocks: estimate.blocks,
            errors: estimate.errors,
        })
    }

    pub fn get_chain_info(&self) -> Result<RpcBlockchainInfo, ChainError> {
        self.chain.get_blockchain_info()
    }
}

pub type WalletServiceRef = Arc<WalletService>;
