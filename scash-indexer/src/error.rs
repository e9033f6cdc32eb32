use bitcoincore_rpc::bitcoin::Txid;
use thiserror::Error;

/// Coarse classification used by the sync loop to decide how a failure is
/// reported. Every kind is retried on the next tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    TransientChain,
    RpcProtocol,
    StorageTransaction,
    PartialDecode,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
    /// Connection refused, timeout, HTTP 401 and other transport level failures
    #[error("chain transport failure: {0}")]
    Transport(String),

    /// The node answered with a non-null error envelope
    #[error("rpc error {code}: {message}")]
    Rpc { code: i32, message: String },

    #[error("malformed rpc response: {0}")]
    Malformed(String),
}

impl ChainError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChainError::Transport(_) => ErrorKind::TransientChain,
            ChainError::Rpc { .. } | ChainError::Malformed(_) => ErrorKind::RpcProtocol,
        }
    }
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("storage transaction exceeded budget of {budget_secs}s (took {elapsed_ms}ms)")]
    StorageTimeout { budget_secs: u64, elapsed_ms: u128 },

    #[error("invalid block at height {height}: {reason}")]
    InvalidBlock { height: u64, reason: String },
}

impl IndexError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IndexError::Chain(e) => e.kind(),
            IndexError::Storage(_) | IndexError::StorageTimeout { .. } => {
                ErrorKind::StorageTransaction
            }
            IndexError::InvalidBlock { .. } => ErrorKind::RpcProtocol,
        }
    }
}

/// Which side of a transaction lost its address attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeSide {
    Input,
    Output,
}

/// An input or output that could not be attributed to an address. Not an
/// error: the entry is left out of the address index and processing goes on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeWarning {
    pub txid: Txid,
    pub side: DecodeSide,
    pub index: u32,
    pub reason: String,
}

impl DecodeWarning {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::PartialDecode
    }
}

impl std::fmt::Display for DecodeWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let side = match self.side {
            DecodeSide::Input => "input",
            DecodeSide::Output => "output",
        };
        write!(f, "{} {}:{} not attributed: {}", side, self.txid, self.index, self.reason)
    }
}

#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error("transaction {txid} unavailable: {source}")]
    TransactionUnavailable {
        txid: Txid,
        #[source]
        source: ChainError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_classification() {
        let transport = IndexError::from(ChainError::Transport("connection refused".into()));
        assert_eq!(transport.kind(), ErrorKind::TransientChain);

        let rpc = IndexError::from(ChainError::Rpc {
            code: -5,
            message: "No such mempool or blockchain transaction".into(),
        });
        assert_eq!(rpc.kind(), ErrorKind::RpcProtocol);
        assert_eq!(
            rpc.to_string(),
            "rpc error -5: No such mempool or blockchain transaction"
        );

        let timeout = IndexError::StorageTimeout {
            budget_secs: 180,
            elapsed_ms: 181_000,
        };
        assert_eq!(timeout.kind(), ErrorKind::StorageTransaction);
        assert_eq!(
            IndexError::Storage("disk I/O error".into()).kind(),
            ErrorKind::StorageTransaction
        );
    }
}
