use bitcoincore_rpc::bitcoin::amount::serde::as_btc;
use bitcoincore_rpc::bitcoin::{Amount, BlockHash, Txid};
use serde::{Deserialize, Serialize};

/// `scriptPubKey` object of a verbose transaction output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RpcScriptPubKey {
    #[serde(default)]
    pub hex: String,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub script_type: Option<String>,

    // Legacy nodes report every address of the script here
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addresses: Option<Vec<String>>,

    // Newer nodes only report the single standard address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl RpcScriptPubKey {
    /// Addresses this script pays to, empty for data carriers and
    /// non-standard scripts.
    pub fn decodable_addresses(&self) -> Vec<String> {
        if let Some(addresses) = &self.addresses {
            if !addresses.is_empty() {
                return addresses.clone();
            }
        }

        match &self.address {
            Some(address) => vec![address.clone()],
            None => Vec::new(),
        }
    }

    pub fn pays_to(&self, address: &str) -> bool {
        self.decodable_addresses().iter().any(|a| a == address)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcVin {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coinbase: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txid: Option<Txid>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vout: Option<u32>,
}

impl RpcVin {
    pub fn is_coinbase(&self) -> bool {
        self.coinbase.is_some()
    }

    /// The previous output this input spends, `None` for coinbase inputs.
    pub fn previous_output(&self) -> Option<(Txid, u32)> {
        if self.is_coinbase() {
            return None;
        }

        match (self.txid, self.vout) {
            (Some(txid), Some(vout)) => Some((txid, vout)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcVout {
    #[serde(with = "as_btc")]
    pub value: Amount,

    pub n: u32,

    #[serde(rename = "scriptPubKey", default)]
    pub script_pub_key: RpcScriptPubKey,
}

/// A decoded transaction as returned by `getrawtransaction <txid> true` or
/// embedded in `getblock <hash> 2`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcTransaction {
    pub txid: Txid,

    #[serde(default)]
    pub vin: Vec<RpcVin>,

    #[serde(default)]
    pub vout: Vec<RpcVout>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blockhash: Option<BlockHash>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blockheight: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmations: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocktime: Option<u64>,
}

impl RpcTransaction {
    pub fn output(&self, index: u32) -> Option<&RpcVout> {
        // vout is ordered by n, but look it up by n to be safe against sparse lists
        self.vout
            .get(index as usize)
            .filter(|v| v.n == index)
            .or_else(|| self.vout.iter().find(|v| v.n == index))
    }
}

/// A block fetched with verbosity 2, transactions fully decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcBlock {
    pub hash: BlockHash,
    pub height: u64,
    pub time: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previousblockhash: Option<BlockHash>,

    #[serde(default)]
    pub tx: Vec<RpcTransaction>,
}

/// The part of `getblockchaininfo` the indexer reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcBlockchainInfo {
    pub chain: String,
    pub blocks: u64,
    pub headers: u64,
    pub bestblockhash: BlockHash,

    #[serde(default)]
    pub initialblockdownload: bool,

    #[serde(default)]
    pub verificationprogress: f64,
}

/// Answer of `estimatesmartfee`. The fee rate is per 1000 virtual bytes and
/// is missing when the node has too little data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcFeeEstimate {
    #[serde(default, with = "as_btc::opt", skip_serializing_if = "Option::is_none")]
    pub feerate: Option<Amount>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,

    pub blocks: u64,
}

/// An outpoint handed to `createrawtransaction`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTxInput {
    pub txid: Txid,
    pub vout: u32,
}

/// Serialize an [`Amount`] as a decimal coin string such as `"12.5"`, so
/// clients never see a float.
pub mod amount_string {
    use bitcoincore_rpc::bitcoin::{Amount, Denomination};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(amount: &Amount, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&amount.to_string_in(Denomination::Bitcoin))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Amount, D::Error> {
        let s = String::deserialize(d)?;
        Amount::from_str_in(&s, Denomination::Bitcoin).map_err(serde::de::Error::custom)
    }

    pub mod opt {
        use bitcoincore_rpc::bitcoin::{Amount, Denomination};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(amount: &Option<Amount>, s: S) -> Result<S::Ok, S::Error> {
            match amount {
                Some(amount) => s.serialize_some(&amount.to_string_in(Denomination::Bitcoin)),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Amount>, D::Error> {
            match Option::<String>::deserialize(d)? {
                Some(s) => Amount::from_str_in(&s, Denomination::Bitcoin)
                    .map(Some)
                    .map_err(serde::de::Error::custom),
                None => Ok(None),
            }
        }
    }
}
