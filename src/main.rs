use clap::Parser;
use ledgerd::config::SettlementConfig;
use ledgerd::domain::ports::SharedStore;
use ledgerd::infrastructure::in_memory::InMemoryLedgerStore;
#[cfg(feature = "storage-rocksdb")]
use ledgerd::infrastructure::rocksdb::RocksDBStore;
use ledgerd::interfaces::csv::event_reader::EventReader;
use ledgerd::interfaces::csv::wallet_writer::WalletWriter;
use ledgerd::interfaces::replay::Replayer;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input events CSV file
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// JSON settlement config; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Secret the sandbox gateway signs payments and webhooks with.
    #[arg(long, env = "LEDGERD_GATEWAY_SECRET", default_value = "sandbox-secret")]
    gateway_secret: String,
}

fn open_store(db_path: Option<PathBuf>) -> Result<SharedStore> {
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => {
            let store = RocksDBStore::open(path).into_diagnostic()?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(_) => {
            eprintln!(
                "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
            );
            Ok(Arc::new(InMemoryLedgerStore::new()))
        }
        None => Ok(Arc::new(InMemoryLedgerStore::new())),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => SettlementConfig::from_file(path).into_diagnostic()?,
        None => SettlementConfig::default(),
    };
    let store = open_store(cli.db_path)?;
    let mut replayer = Replayer::new(store, config, &cli.gateway_secret);

    let file = File::open(cli.input).into_diagnostic()?;
    let reader = EventReader::new(file);
    for event in reader.events() {
        match event {
            Ok(event) => {
                if let Err(e) = replayer.apply(event).await {
                    tracing::error!(error = %e, "Error processing event");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Error reading event");
            }
        }
    }

    let rows = replayer.wallet_rows().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = WalletWriter::new(stdout.lock());
    writer.write_wallets(rows).into_diagnostic()?;

    Ok(())
}
