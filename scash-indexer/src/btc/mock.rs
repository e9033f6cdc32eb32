// In-memory chain used by the unit tests
use super::client::{ChainClient, ChainClientRef};
use super::types::{
    RawTxInput, RpcBlock, RpcBlockchainInfo, RpcFeeEstimate, RpcScriptPubKey, RpcTransaction,
    RpcVin, RpcVout,
};
use crate::error::ChainError;
use bitcoincore_rpc::bitcoin::hashes::Hash;
use bitcoincore_rpc::bitcoin::{Amount, BlockHash, Txid};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};

pub fn txid(n: u8) -> Txid {
    Txid::from_byte_array([n; 32])
}

pub fn block_hash(height: u64) -> BlockHash {
    let mut bytes = [0xbb; 32];
    bytes[..8].copy_from_slice(&height.to_be_bytes());
    BlockHash::from_byte_array(bytes)
}

pub fn coinbase_input() -> RpcVin {
    RpcVin {
        coinbase: Some("03a0bb0d".to_string()),
        txid: None,
        vout: None,
    }
}

pub fn spend_input(prev: Txid, vout: u32) -> RpcVin {
    RpcVin {
        coinbase: None,
        txid: Some(prev),
        vout: Some(vout),
    }
}

pub fn pay(n: u32, address: &str, sat: u64) -> RpcVout {
    RpcVout {
        value: Amount::from_sat(sat),
        n,
        script_pub_key: RpcScriptPubKey {
            hex: format!("76a914{:02x}88ac", n),
            script_type: Some("pubkeyhash".to_string()),
            addresses: Some(vec![address.to_string()]),
            address: None,
        },
    }
}

pub fn data_output(n: u32) -> RpcVout {
    RpcVout {
        value: Amount::ZERO,
        n,
        script_pub_key: RpcScriptPubKey {
            hex: "6a0401020304".to_string(),
            script_type: Some("nulldata".to_string()),
            addresses: None,
            address: None,
        },
    }
}

pub fn tx(id: Txid, vin: Vec<RpcVin>, vout: Vec<RpcVout>) -> RpcTransaction {
    RpcTransaction {
        txid: id,
        vin,
        vout,
        blockhash: None,
        blockheight: None,
        confirmations: None,
        time: None,
        blocktime: None,
    }
}

pub fn block(height: u64, txs: Vec<RpcTransaction>) -> RpcBlock {
    RpcBlock {
        hash: block_hash(height),
        height,
        time: 1_700_000_000 + height * 600,
        previousblockhash: None,
        tx: txs,
    }
}

#[derive(Default)]
struct MockState {
    blocks: HashMap<u64, RpcBlock>,
    txs: HashMap<Txid, RpcTransaction>,
    tip: u64,
    fail_block_fetch: HashSet<u64>,
    missing_txs: HashSet<Txid>,
    tip_unreachable: bool,
    broadcast: Vec<String>,
    created_raw: Vec<(Vec<RawTxInput>, BTreeMap<String, Amount>)>,
    raw_tx_calls: usize,
}

// Fee rate per kvB the mock node estimates for any target
pub const MOCK_FEE_RATE_SAT: u64 = 12_000;

#[derive(Default)]
pub struct MockChainClient {
    state: Mutex<MockState>,

    // When set, get_block_count reports entry and then waits for a release
    hold: Mutex<Option<(Sender<()>, Receiver<()>)>>,
}

impl MockChainClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_ref(self: Arc<Self>) -> ChainClientRef {
        Arc::new(Box::new(SharedMock(self)) as Box<dyn ChainClient>)
    }

    /// Add a block on top of the chain; its transactions become resolvable
    /// through getrawtransaction with block metadata filled in.
    pub fn push_block(&self, mut block: RpcBlock) {
        let mut state = self.state.lock().unwrap();
        for tx in block.tx.iter_mut() {
            tx.blockhash = Some(block.hash);
            tx.blockheight = Some(block.height);
            tx.time = Some(block.time);
            tx.blocktime = Some(block.time);
        }
        for tx in &block.tx {
            state.txs.insert(tx.txid, tx.clone());
        }
        state.tip = state.tip.max(block.height);
        state.blocks.insert(block.height, block);
    }

    /// Register a transaction that is known to the node but not part of any
    /// mocked block, e.g. outputs created before indexing began.
    pub fn add_transaction(&self, tx: RpcTransaction) {
        self.state.lock().unwrap().txs.insert(tx.txid, tx);
    }

    pub fn set_fail_block_fetch(&self, height: u64, fail: bool) {
        let mut state = self.state.lock().unwrap();
        if fail {
            state.fail_block_fetch.insert(height);
        } else {
            state.fail_block_fetch.remove(&height);
        }
    }

    pub fn set_missing_transaction(&self, txid: Txid) {
        self.state.lock().unwrap().missing_txs.insert(txid);
    }

    pub fn set_tip_unreachable(&self, unreachable: bool) {
        self.state.lock().unwrap().tip_unreachable = unreachable;
    }

    pub fn raw_tx_calls(&self) -> usize {
        self.state.lock().unwrap().raw_tx_calls
    }

    pub fn broadcast_log(&self) -> Vec<String> {
        self.state.lock().unwrap().broadcast.clone()
    }

    pub fn created_raw_log(&self) -> Vec<(Vec<RawTxInput>, BTreeMap<String, Amount>)> {
        self.state.lock().unwrap().created_raw.clone()
    }

    /// Make the next get_block_count call signal `entered` and block until
    /// `release` receives a value.
    pub fn hold_next_tip_query(&self, entered: Sender<()>, release: Receiver<()>) {
        *self.hold.lock().unwrap() = Some((entered, release));
    }

    fn wait_if_held(&self) {
        let hold = self.hold.lock().unwrap().take();
        if let Some((entered, release)) = hold {
            let _ = entered.send(());
            let _ = release.recv();
        }
    }
}

impl ChainClient for MockChainClient {
    fn get_block_count(&self) -> Result<u64, ChainError> {
        self.wait_if_held();

        let state = self.state.lock().unwrap();
        if state.tip_unreachable {
            return Err(ChainError::Transport("connection refused".to_string()));
        }
        Ok(state.tip)
    }

    fn get_block_hash(&self, block_height: u64) -> Result<BlockHash, ChainError> {
        let state = self.state.lock().unwrap();
        state
            .blocks
            .get(&block_height)
            .map(|b| b.hash)
            .ok_or_else(|| ChainError::Rpc {
                code: -8,
                message: "Block height out of range".to_string(),
            })
    }

    fn get_block(&self, block_hash: &BlockHash) -> Result<RpcBlock, ChainError> {
        let state = self.state.lock().unwrap();
        let block = state
            .blocks
            .values()
            .find(|b| b.hash == *block_hash)
            .ok_or_else(|| ChainError::Rpc {
                code: -5,
                message: "Block not found".to_string(),
            })?;

        if state.fail_block_fetch.contains(&block.height) {
            return Err(ChainError::Transport("connection reset by peer".to_string()));
        }
        Ok(block.clone())
    }

    fn get_raw_transaction(&self, txid: &Txid) -> Result<RpcTransaction, ChainError> {
        let mut state = self.state.lock().unwrap();
        state.raw_tx_calls += 1;

        if state.missing_txs.contains(txid) {
            return Err(ChainError::Rpc {
                code: -5,
                message: "No such mempool or blockchain transaction".to_string(),
            });
        }

        let mut tx = state.txs.get(txid).cloned().ok_or_else(|| ChainError::Rpc {
            code: -5,
            message: "No such mempool or blockchain transaction".to_string(),
        })?;

        if let Some(height) = tx.blockheight {
            tx.confirmations = Some(state.tip + 1 - height);
        }
        Ok(tx)
    }

    fn send_raw_transaction(&self, tx_hex: &str) -> Result<Txid, ChainError> {
        let mut state = self.state.lock().unwrap();
        state.broadcast.push(tx_hex.to_string());
        Ok(txid(0xee))
    }

    fn get_blockchain_info(&self) -> Result<RpcBlockchainInfo, ChainError> {
        let state = self.state.lock().unwrap();
        if state.tip_unreachable {
            return Err(ChainError::Transport("connection refused".to_string()));
        }

        Ok(RpcBlockchainInfo {
            chain: "main".to_string(),
            blocks: state.tip,
            headers: state.tip,
            bestblockhash: block_hash(state.tip),
            initialblockdownload: false,
            verificationprogress: 1.0,
        })
    }

    fn estimate_smart_fee(&self, conf_target: u16) -> Result<RpcFeeEstimate, ChainError> {
        Ok(RpcFeeEstimate {
            feerate: Some(Amount::from_sat(MOCK_FEE_RATE_SAT)),
            errors: Vec::new(),
            blocks: conf_target as u64,
        })
    }

    fn create_raw_transaction(
        &self,
        inputs: &[RawTxInput],
        outputs: &BTreeMap<String, Amount>,
    ) -> Result<String, ChainError> {
        let mut state = self.state.lock().unwrap();
        state.created_raw.push((inputs.to_vec(), outputs.clone()));
        Ok(format!("02000000{:02x}{:02x}", inputs.len(), outputs.len()))
    }
}

// Lets a test keep its own Arc to the mock while the indexer holds a ChainClientRef
struct SharedMock(Arc<MockChainClient>);

impl ChainClient for SharedMock {
    fn get_block_count(&self) -> Result<u64, ChainError> {
        self.0.get_block_count()
    }

    fn get_block_hash(&self, block_height: u64) -> Result<BlockHash, ChainError> {
        self.0.get_block_hash(block_height)
    }

    fn get_block(&self, block_hash: &BlockHash) -> Result<RpcBlock, ChainError> {
        self.0.get_block(block_hash)
    }

    fn get_raw_transaction(&self, txid: &Txid) -> Result<RpcTransaction, ChainError> {
        self.0.get_raw_transaction(txid)
    }

    fn send_raw_transaction(&self, tx_hex: &str) -> Result<Txid, ChainError> {
        self.0.send_raw_transaction(tx_hex)
    }

    fn get_blockchain_info(&self) -> Result<RpcBlockchainInfo, ChainError> {
        self.0.get_blockchain_info()
    }

    fn estimate_smart_fee(&self, conf_target: u16) -> Result<RpcFeeEstimate, ChainError> {
        self.0.estimate_smart_fee(conf_target)
    }

    fn create_raw_transaction(
        &self,
        inputs: &[RawTxInput],
        outputs: &BTreeMap<String, Amount>,
    ) -> Result<String, ChainError> {
        self.0.create_raw_transaction(inputs, outputs)
    }
}
