use super::client::ChainClient;
use super::types::{RawTxInput, RpcBlock, RpcBlockchainInfo, RpcFeeEstimate, RpcTransaction};
use crate::error::ChainError;
use bitcoincore_rpc::bitcoin::{Amount, BlockHash, Txid};
use bitcoincore_rpc::jsonrpc;
use bitcoincore_rpc::{Auth, Client, RpcApi};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

// Verbosity for getblock that returns every transaction decoded
const BLOCK_VERBOSITY_DECODED_TX: u8 = 2;

pub struct ChainRpcClient {
    rpc_url: String,
    auth: Auth,
    client: RwLock<Option<Arc<Client>>>,
}

impl ChainRpcClient {
    pub fn new(rpc_url: String, auth: Auth) -> Self {
        // The client is created on demand: with cookie auth the cookie file
        // may not exist until the node has started
        Self {
            rpc_url,
            auth,
            client: RwLock::new(None),
        }
    }

    fn update_client(&self) -> Result<Arc<Client>, ChainError> {
        let new_client = Client::new(&self.rpc_url, self.auth.clone()).map_err(|e| {
            let msg = format!("Failed to create chain RPC client for {}: {}", self.rpc_url, e);
            error!("{}", msg);
            ChainError::Transport(msg)
        })?;

        let arc_client = Arc::new(new_client);
        *self.client.write().unwrap() = Some(arc_client.clone());

        info!("Chain RPC client connected to {}", self.rpc_url);
        Ok(arc_client)
    }

    fn client(&self) -> Result<Arc<Client>, ChainError> {
        if let Some(client) = &*self.client.read().unwrap() {
            return Ok(client.clone());
        }

        self.update_client()
    }

    fn is_auth_cookie(&self) -> bool {
        matches!(self.auth, Auth::CookieFile(_))
    }

    fn on_error(&self, error: &bitcoincore_rpc::Error) {
        if let bitcoincore_rpc::Error::JsonRpc(jsonrpc::Error::Transport(_)) = error {
            // The node may have restarted with a fresh cookie file
            if self.is_auth_cookie() {
                let _ = self.update_client();
            }
        }
    }

    fn call<T: DeserializeOwned>(&self, method: &str, args: &[Value]) -> Result<T, ChainError> {
        self.client()?.call::<T>(method, args).map_err(|error| {
            self.on_error(&error);

            let e = classify_rpc_error(error);
            error!("RPC call {} failed: {}", method, e);
            e
        })
    }
}

pub fn classify_rpc_error(error: bitcoincore_rpc::Error) -> ChainError {
    match error {
        bitcoincore_rpc::Error::JsonRpc(jsonrpc::Error::Rpc(e)) => ChainError::Rpc {
            code: e.code,
            message: e.message,
        },
        bitcoincore_rpc::Error::JsonRpc(jsonrpc::Error::Transport(e)) => {
            ChainError::Transport(e.to_string())
        }
        bitcoincore_rpc::Error::Io(e) => ChainError::Transport(e.to_string()),
        bitcoincore_rpc::Error::InvalidCookieFile => {
            ChainError::Transport("invalid cookie file".to_string())
        }
        other => ChainError::Malformed(other.to_string()),
    }
}

impl ChainClient for ChainRpcClient {
    fn get_block_count(&self) -> Result<u64, ChainError> {
        self.call("getblockcount", &[])
    }

    fn get_block_hash(&self, block_height: u64) -> Result<BlockHash, ChainError> {
        self.call("getblockhash", &[json!(block_height)])
    }

    fn get_block(&self, block_hash: &BlockHash) -> Result<RpcBlock, ChainError> {
        self.call(
            "getblock",
            &[json!(block_hash.to_string()), json!(BLOCK_VERBOSITY_DECODED_TX)],
        )
    }

    fn get_raw_transaction(&self, txid: &Txid) -> Result<RpcTransaction, ChainError> {
        self.call("getrawtransaction", &[json!(txid.to_string()), json!(true)])
    }

    fn send_raw_transaction(&self, tx_hex: &str) -> Result<Txid, ChainError> {
        let txid: Txid = self.call("sendrawtransaction", &[json!(tx_hex)])?;
        info!("Broadcast transaction {}", txid);
        Ok(txid)
    }

    fn get_blockchain_info(&self) -> Result<RpcBlockchainInfo, ChainError> {
        self.call("getblockchaininfo", &[])
    }

    fn estimate_smart_fee(&self, conf_target: u16) -> Result<RpcFeeEstimate, ChainError> {
        self.call("estimatesmartfee", &[json!(conf_target)])
    }

    fn create_raw_transaction(
        &self,
        inputs: &[RawTxInput],
        outputs: &BTreeMap<String, Amount>,
    ) -> Result<String, ChainError> {
        self.call(
            "createrawtransaction",
            &[json!(inputs), raw_tx_outputs_param(outputs)],
        )
    }
}

// The node takes output amounts as coin values keyed by address
fn raw_tx_outputs_param(outputs: &BTreeMap<String, Amount>) -> Value {
    let map: Map<String, Value> = outputs
        .iter()
        .map(|(address, amount)| (address.clone(), json!(amount.to_btc())))
        .collect();
    Value::Object(map)
}
