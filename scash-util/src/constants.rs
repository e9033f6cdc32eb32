// Service name
pub const SCASH_INDEXER_SERVICE_NAME: &str = "scash-indexer";

// Directory constants
pub const SCASH_ROOT_DIR: &str = ".scash";

// Default node rpc port
pub const SCASH_NODE_DEFAULT_RPC_PORT: u16 = 8342;

// Environment variable that replaces ~/.scash as the root directory
pub const SCASH_ROOT_ENV: &str = "SCASH_ROOT";
