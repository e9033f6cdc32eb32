#[macro_use]
extern crate log;

use bitcoincore_rpc::bitcoin::{Amount, Denomination, Txid};
use clap::{Parser, Subcommand};
use scash_indexer::btc::{RawTxInput, create_chain_rpc_client};
use scash_indexer::config::{ConfigManager, ConfigManagerRef};
use scash_indexer::index::SyncCoordinator;
use scash_indexer::output::IndexOutput;
use scash_indexer::service::{DEFAULT_FEE_CONF_TARGET, DEFAULT_PAGE_LIMIT, WalletService};
use scash_indexer::status::SyncStatusManager;
use scash_indexer::storage::LedgerStore;
use scash_util::{LogConfig, SCASH_INDEXER_SERVICE_NAME};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "scash-indexer")]
#[command(version = "0.1.0")]
#[command(about = "SCASH address ledger indexer", long_about = None)]
struct IndexerCli {
    #[command(subcommand)]
    command: Option<IndexerCommands>,

    /// Log level of the file log, e.g. info, debug, or a flexi_logger spec
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug, Clone)]
#[command(rename_all = "kebab-case")]
enum IndexerCommands {
    /// Delete the ledger database, DANGEROUS: This will remove all indexed data!
    /// The next start re-indexes from block 1.
    ClearDb {},

    /// Print balance and transaction count of an address
    Summary { address: String },

    /// Print the unspent outputs of an address
    Utxos { address: String },

    /// Print one page of the transaction history of an address
    History {
        address: String,

        #[arg(long, default_value_t = 1)]
        page: u64,

        #[arg(long, default_value_t = DEFAULT_PAGE_LIMIT)]
        limit: u64,

        /// Expand every transaction from the address's point of view
        #[arg(long)]
        details: bool,
    },

    /// Broadcast a raw transaction given as hex
    Broadcast { tx_hex: String },

    /// Build an unsigned raw transaction on the node
    CreateRawTx {
        /// Outpoint to spend as <txid>:<vout>, repeatable
        #[arg(long = "input", required = true, value_parser = parse_raw_tx_input)]
        inputs: Vec<RawTxInput>,

        /// Payment as <address>=<amount in coins>, repeatable
        #[arg(long = "output", required = true, value_parser = parse_raw_tx_output)]
        outputs: Vec<(String, Amount)>,
    },

    /// Print the node's fee rate estimate
    Fee {
        /// Confirmation target in blocks
        #[arg(long, default_value_t = DEFAULT_FEE_CONF_TARGET)]
        target: u16,
    },

    /// Print chain name, height and sync state reported by the node
    ChainInfo {},
}

fn parse_raw_tx_input(s: &str) -> Result<RawTxInput, String> {
    let (txid, vout) = s
        .split_once(':')
        .ok_or_else(|| format!("Invalid input {}, expected <txid>:<vout>", s))?;

    let txid = txid
        .parse::<Txid>()
        .map_err(|e| format!("Invalid txid {}: {}", txid, e))?;
    let vout = vout
        .parse::<u32>()
        .map_err(|e| format!("Invalid output index {}: {}", vout, e))?;

    Ok(RawTxInput { txid, vout })
}

fn parse_raw_tx_output(s: &str) -> Result<(String, Amount), String> {
    let (address, amount) = s
        .split_once('=')
        .ok_or_else(|| format!("Invalid output {}, expected <address>=<amount>", s))?;
    if address.is_empty() {
        return Err(format!("Invalid output {}, address is empty", s));
    }

    let amount = Amount::from_str_in(amount, Denomination::Bitcoin)
        .map_err(|e| format!("Invalid amount {}: {}", amount, e))?;

    Ok((address.to_string(), amount))
}

fn init_tool_log(suffix: &str, level: &str) {
    let file_name = format!("{}_{}", SCASH_INDEXER_SERVICE_NAME, suffix);
    let config = LogConfig::new(SCASH_INDEXER_SERVICE_NAME)
        .with_file_name(&file_name)
        .with_level(level);
    if let Err(e) = scash_util::init_log(config) {
        eprintln!("Failed to init log: {}", e);
        std::process::exit(1);
    }
}

fn load_config() -> ConfigManagerRef {
    let root_dir = scash_util::get_service_dir(SCASH_INDEXER_SERVICE_NAME);
    match ConfigManager::load(&root_dir) {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            error!("Failed to load config: {}", e);
            println!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    }
}

fn open_store(config: &ConfigManager) -> Result<LedgerStore, String> {
    let data_dir = config.data_dir()?;
    LedgerStore::new(&data_dir).map_err(|e| e.to_string())
}

async fn main_run(log_level: &str) {
    // Only one indexer may write to the ledger
    let (_lock, _guard) = scash_util::init_process_lock(SCASH_INDEXER_SERVICE_NAME);

    // Init file logging
    let log_config = LogConfig::new(SCASH_INDEXER_SERVICE_NAME)
        .with_level(log_level)
        .enable_console(false);
    if let Err(e) = scash_util::init_log(log_config) {
        eprintln!("Failed to init log: {}", e);
        std::process::exit(1);
    }

    let output = Arc::new(IndexOutput::new());

    let config = load_config();
    output.println(&format!(
        "Using service directory: {}",
        config.root_dir().display()
    ));

    let store = match open_store(&config) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to open ledger database: {}", e);
            output.println(&format!("Failed to open ledger database: {}", e));
            std::process::exit(1);
        }
    };
    output.println(&format!("Ledger database: {}", store.db_path().display()));

    let status = Arc::new(SyncStatusManager::new());
    match store.ensure_indexer_state() {
        Ok(height) => {
            status.update_current(height, Some(format!("Resuming after block {}", height)));
        }
        Err(e) => {
            error!("Failed to read indexer state: {}", e);
            output.println(&format!("Failed to read indexer state: {}", e));
            std::process::exit(1);
        }
    }
    let monitor = status.run_monitor(output.clone());

    let chain = create_chain_rpc_client(&config.config().rpc);

    // Check the node once; an unreachable node is retried by every sync pass
    let node = chain.clone();
    match tokio::task::spawn_blocking(move || node.get_blockchain_info()).await {
        Ok(Ok(info)) => {
            output.println(&format!(
                "Connected to node: chain {}, block height {}",
                info.chain, info.blocks
            ));
        }
        Ok(Err(e)) => {
            error!("Failed to connect to node: {}", e);
            output.println(&format!(
                "Failed to connect to node, check rpc settings and node state: {}",
                e
            ));
        }
        Err(e) => {
            error!("Node check task failed: {}", e);
        }
    }

    let coordinator = Arc::new(SyncCoordinator::new(
        config.config().sync.clone(),
        chain,
        store.clone(),
        status.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(());
    let sync_handle = tokio::spawn(coordinator.clone().run(shutdown_rx));
    output.println("Indexer started.");

    // Create a Future to wait for Ctrl+C (SIGINT) signal
    use tokio::signal;
    let sigint = signal::ctrl_c();

    // Create a Future to wait for SIGTERM signal (sent by kill command by default)
    #[cfg(unix)]
    let sigterm = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to create SIGTERM signal handler")
            .recv()
            .await;
    };

    // On non-Unix systems, we only rely on Ctrl+C
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = sigint => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = sigterm => {
            info!("Received SIGTERM, shutting down...");
        }
    }

    output.println("Shutting down indexer...");
    let _ = shutdown_tx.send(());
    if let Err(e) = sync_handle.await {
        error!("Sync coordinator task failed: {}", e);
    }
    monitor.abort();
    output.finish();

    println!("Shutdown complete.");

    // Sleep a moment to ensure all logs are flushed
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
}

// Runs a read-path command against the local ledger and the node
fn run_query(config: &ConfigManager, command: IndexerCommands) -> Result<serde_json::Value, String> {
    let store = Arc::new(open_store(config)?);
    let chain = create_chain_rpc_client(&config.config().rpc);
    let service = WalletService::new(store.clone(), chain.clone());

    let ret = match command {
        IndexerCommands::Summary { address } => {
            let summary = service
                .get_address_summary(&address)
                .map_err(|e| e.to_string())?;
            serde_json::to_value(summary)
        }
        IndexerCommands::Utxos { address } => {
            let utxos = service
                .get_address_utxos(&address)
                .map_err(|e| e.to_string())?;
            serde_json::to_value(utxos)
        }
        IndexerCommands::History {
            address,
            page,
            limit,
            details,
        } => {
            let latest_height = match chain.get_block_count() {
                Ok(height) => height,
                Err(e) => {
                    warn!("Failed to get chain tip, using ledger watermark: {}", e);
                    store
                        .last_processed_block()
                        .map_err(|e| e.to_string())?
                        .unwrap_or(0)
                }
            };

            let page = service
                .get_address_transactions(&address, page, limit, details, latest_height)
                .map_err(|e| e.to_string())?;
            serde_json::to_value(page)
        }
        IndexerCommands::Broadcast { tx_hex } => {
            let txid = service
                .broadcast_transaction(&tx_hex)
                .map_err(|e| e.to_string())?;
            Ok(serde_json::json!({ "txid": txid }))
        }
        IndexerCommands::CreateRawTx { inputs, outputs } => {
            let mut payments = BTreeMap::new();
            for (address, amount) in outputs {
                if payments.insert(address.clone(), amount).is_some() {
                    return Err(format!("Address {} is paid more than once", address));
                }
            }

            let raw = service
                .create_raw_transaction(&inputs, &payments)
                .map_err(|e| e.to_string())?;
            serde_json::to_value(raw)
        }
        IndexerCommands::Fee { target } => {
            let fee = service
                .estimate_smart_fee(target)
                .map_err(|e| e.to_string())?;
            serde_json::to_value(fee)
        }
        IndexerCommands::ChainInfo {} => {
            let info = service.get_chain_info().map_err(|e| e.to_string())?;
            serde_json::to_value(info)
        }
        IndexerCommands::ClearDb {} => return Err("clear-db is not a query".to_string()),
    };

    ret.map_err(|e| format!("Failed to serialize result: {}", e))
}

#[tokio::main]
async fn main() {
    let cli = IndexerCli::parse();

    match cli.command {
        Some(IndexerCommands::ClearDb {}) => {
            // The service must not be running while its database is removed
            let (_lock, _guard) = scash_util::init_process_lock(SCASH_INDEXER_SERVICE_NAME);
            init_tool_log("clear_db", &cli.log_level);

            let config = load_config();
            let data_dir = match config.data_dir() {
                Ok(dir) => dir,
                Err(e) => {
                    println!("{}", e);
                    std::process::exit(1);
                }
            };

            if let Err(e) = scash_indexer::tool::clear_db_files(&data_dir) {
                error!("Failed to clear database files: {}", e);
                println!("Failed to clear database files: {}", e);
                std::process::exit(1);
            }
            println!("Database files cleared at {}", data_dir.display());
        }
        Some(command) => {
            init_tool_log("query", &cli.log_level);
            let config = load_config();

            let ret = tokio::task::spawn_blocking(move || run_query(&config, command)).await;
            match ret {
                Ok(Ok(value)) => match serde_json::to_string_pretty(&value) {
                    Ok(s) => println!("{}", s),
                    Err(e) => {
                        println!("Failed to format result: {}", e);
                        std::process::exit(1);
                    }
                },
                Ok(Err(e)) => {
                    error!("Query failed: {}", e);
                    println!("Query failed: {}", e);
                    std::process::exit(1);
                }
                Err(e) => {
                    error!("Query task failed: {}", e);
                    println!("Query task failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        None => main_run(&cli.log_level).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_raw_tx_args() {
        let input = parse_raw_tx_input(
            "1111111111111111111111111111111111111111111111111111111111111111:3",
        )
        .unwrap();
        assert_eq!(input.vout, 3);
        assert!(parse_raw_tx_input("1111:x").is_err());
        assert!(parse_raw_tx_input("no-separator").is_err());

        let (address, amount) = parse_raw_tx_output("scash1qbob=1.25").unwrap();
        assert_eq!(address, "scash1qbob");
        assert_eq!(amount, Amount::from_sat(125_000_000));
        assert!(parse_raw_tx_output("=1").is_err());
        assert!(parse_raw_tx_output("scash1qbob=lots").is_err());
    }
}
