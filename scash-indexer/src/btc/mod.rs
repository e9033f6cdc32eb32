mod client;
#[cfg(test)]
pub mod mock;
mod rpc;
mod types;

pub use client::*;
pub use rpc::*;
pub use types::*;

use std::sync::Arc;
use scash_util::ChainRpcConfig;

pub fn create_chain_rpc_client(config: &ChainRpcConfig) -> ChainClientRef {
    let client = ChainRpcClient::new(config.rpc_url(), config.auth());
    Arc::new(Box::new(client) as Box<dyn ChainClient>)
}
