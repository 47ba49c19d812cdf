mod constants;
mod routes;

use anyhow::Context;
use blockseal_core::constants::DEFAULT_DIFFICULTY;
use blockseal_core::{CancellationToken, Ledger, LedgerConfig, Storage};
use blockseal_storage::{JsonFileStore, SledStore};
use clap::{ArgAction, Parser};
use constants::DEFAULT_LISTEN;
use routes::{router, AppState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Args {
    /// Address to listen on, e.g. 127.0.0.1:5000
    #[arg(long, default_value = DEFAULT_LISTEN)]
    listen: String,

    /// JSON file holding the chain and the pending pool
    #[arg(long, default_value = "chain.json")]
    chain_file: PathBuf,

    /// Keep the chain in a sled database in this directory instead of the JSON file
    #[arg(long)]
    sled_dir: Option<PathBuf>,

    /// Required leading hex zeros of every block hash
    #[arg(long, default_value_t = DEFAULT_DIFFICULTY)]
    difficulty: u32,

    /// Search nonces on all cores
    #[arg(long)]
    parallel: bool,

    /// Give up on a seal after this many seconds
    #[arg(long)]
    seal_timeout_secs: Option<u64>,

    /// Hold the genesis block to its proof of work during integrity scans
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    verify_genesis: bool,
}

impl Args {
    fn config(&self) -> LedgerConfig {
        LedgerConfig {
            difficulty: self.difficulty,
            parallel_sealing: self.parallel,
            seal_timeout: self.seal_timeout_secs.map(Duration::from_secs),
            verify_genesis: self.verify_genesis,
        }
    }

    fn store(&self) -> anyhow::Result<Box<dyn Storage>> {
        Ok(match &self.sled_dir {
            Some(dir) => Box::new(
                SledStore::open(dir).with_context(|| format!("opening {}", dir.display()))?,
            ),
            None => Box::new(JsonFileStore::new(&self.chain_file)),
        })
    }
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(%err, "failed to listen for ctrl-c");
    }
    info!("shutting down, abandoning in-flight seals");
    shutdown.cancel();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let ledger = Arc::new(Ledger::open(Arc::new(args.store()?), args.config())?);

    if ledger.height().is_none() {
        let ledger = Arc::clone(&ledger);
        tokio::task::spawn_blocking(move || ledger.create_genesis()).await??;
    }
    info!(
        height = ledger.height(),
        pending = ledger.pending().len(),
        difficulty = ledger.config().difficulty,
        "ledger ready"
    );

    let shutdown = CancellationToken::new();
    let app = router(AppState {
        ledger,
        shutdown: shutdown.clone(),
    });

    let addr: SocketAddr = args
        .listen
        .parse()
        .with_context(|| format!("invalid listen address {}", args.listen))?;
    info!(%addr, "node listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;
    Ok(())
}
