use super::types::{RawTxInput, RpcBlock, RpcBlockchainInfo, RpcFeeEstimate, RpcTransaction};
use crate::error::ChainError;
use bitcoincore_rpc::bitcoin::{Amount, BlockHash, Txid};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Request/response gateway to the node's json-rpc surface. Calls block the
/// current thread; async callers go through `spawn_blocking`.
pub trait ChainClient: Send + Sync {
    fn get_block_count(&self) -> Result<u64, ChainError>;
    fn get_block_hash(&self, block_height: u64) -> Result<BlockHash, ChainError>;
    fn get_block(&self, block_hash: &BlockHash) -> Result<RpcBlock, ChainError>;
    fn get_raw_transaction(&self, txid: &Txid) -> Result<RpcTransaction, ChainError>;
    fn send_raw_transaction(&self, tx_hex: &str) -> Result<Txid, ChainError>;

    fn get_blockchain_info(&self) -> Result<RpcBlockchainInfo, ChainError>;
    fn estimate_smart_fee(&self, conf_target: u16) -> Result<RpcFeeEstimate, ChainError>;

    // Returns the unsigned transaction as hex
    fn create_raw_transaction(
        &self,
        inputs: &[RawTxInput],
        outputs: &BTreeMap<String, Amount>,
    ) -> Result<String, ChainError>;
}

pub type ChainClientRef = Arc<Box<dyn ChainClient>>;
