mod client;
mod local;

use anyhow::{bail, Result};
use blockseal_core::constants::DEFAULT_DIFFICULTY;
use blockseal_core::{ChainError, Ledger, LedgerConfig, StorageError};
use blockseal_storage::JsonFileStore;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "blockseal")]
#[command(about = "Manage a local proof-of-work ledger or act as a client of a ledger node")]
struct Cli {
    /// JSON file holding the chain and the pending pool
    #[arg(long, global = true, default_value = "chain.json")]
    chain_file: PathBuf,

    /// Required leading hex zeros of every block hash
    #[arg(long, global = true, default_value_t = DEFAULT_DIFFICULTY)]
    difficulty: u32,

    /// Search nonces on all cores
    #[arg(long, global = true)]
    parallel: bool,

    /// Give up on a seal after this many seconds
    #[arg(long, global = true)]
    seal_timeout_secs: Option<u64>,

    /// Hold the genesis block to its proof of work during integrity scans
    #[arg(long, global = true, default_value_t = true, action = ArgAction::Set)]
    verify_genesis: bool,

    /// Directory holding one sub-directory of keys per client
    #[arg(long, global = true, default_value = "clients")]
    clients_dir: PathBuf,

    /// Node base URL
    #[arg(long, global = true, default_value = "http://127.0.0.1:5000")]
    node: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Discard the chain file and start over from a new genesis block
    Reset,
    /// Append an unsigned transaction to the local pending pool
    AddPendingTransaction {
        #[arg(long)]
        sender: String,
        #[arg(long)]
        receiver: String,
        #[arg(long, value_parser = parse_amount)]
        amount: f64,
    },
    /// Seal the local pending pool into a block
    CreateBlock,
    /// Check every block of the local chain
    VerifyIntegrity,
    /// Check one block of the local chain against its predecessor
    VerifyIntegrityOfBlock {
        #[arg(long)]
        index: u64,
    },
    /// Print the local chain as JSON
    Show,
    /// Generate a key pair for a new client
    CreateClient {
        #[arg(long)]
        name: String,
    },
    /// Sign a transaction with the sender's keys and submit it to the node
    CreateTransaction {
        #[arg(long)]
        sender: String,
        #[arg(long)]
        receiver: String,
        #[arg(long, value_parser = parse_amount)]
        amount: f64,
    },
    /// Ask the node to seal its pending pool
    RequestBlock,
}

fn parse_amount(value: &str) -> Result<f64, String> {
    let amount: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("{value:?} is not a number"))?;
    if !amount.is_finite() {
        return Err(format!("{value:?} is not a finite amount"));
    }
    Ok(amount)
}

impl Cli {
    fn config(&self) -> LedgerConfig {
        LedgerConfig {
            difficulty: self.difficulty,
            parallel_sealing: self.parallel,
            seal_timeout: self.seal_timeout_secs.map(Duration::from_secs),
            verify_genesis: self.verify_genesis,
        }
    }

    /// Only `reset` may start from a missing chain file.
    fn open_ledger(&self) -> Result<Ledger<JsonFileStore>> {
        let store = Arc::new(JsonFileStore::new(&self.chain_file));
        let opened = match self.cmd {
            Command::Reset => Ledger::open(store, self.config()),
            _ => Ledger::open_existing(store, self.config()),
        };
        match opened {
            Err(ChainError::Storage(StorageError::Missing(_))) => bail!(
                "No chain at {}, run `blockseal reset` to create one",
                self.chain_file.display()
            ),
            opened => Ok(opened?),
        }
    }

    /// Local commands seal and hash synchronously.
    fn run_local(self) -> Result<String> {
        let ledger = self.open_ledger()?;
        Ok(match self.cmd {
            Command::Reset => local::reset(&ledger)?,
            Command::AddPendingTransaction {
                sender,
                receiver,
                amount,
            } => local::add_pending(&ledger, sender, receiver, amount)?,
            Command::CreateBlock => local::create_block(&ledger)?,
            Command::VerifyIntegrity => local::verify_integrity(&ledger),
            Command::VerifyIntegrityOfBlock { index } => local::verify_block(&ledger, index),
            Command::Show => local::show(&ledger)?,
            other => bail!("{other:?} needs a node"),
        })
    }

    async fn run_client(&self) -> Result<String> {
        let http = reqwest::Client::new();
        Ok(match &self.cmd {
            Command::CreateClient { name } => {
                let dir = client::create_client(&self.clients_dir, name, client::CLIENT_KEY_BITS)?;
                format!("Client {name} created in {}", dir.display())
            }
            Command::CreateTransaction {
                sender,
                receiver,
                amount,
            } => {
                let keys = client::load_client(&self.clients_dir, sender)?;
                client::create_transaction(&http, &self.node, &keys, sender, receiver, *amount)
                    .await?
            }
            Command::RequestBlock => client::request_block(&http, &self.node).await?,
            other => bail!("{other:?} is a local command"),
        })
    }
}

impl Command {
    fn is_local(&self) -> bool {
        !matches!(
            self,
            Command::CreateClient { .. } | Command::CreateTransaction { .. } | Command::RequestBlock
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .pretty()
        .init();

    let cli = Cli::parse();
    let output = if cli.cmd.is_local() {
        tokio::task::spawn_blocking(move || cli.run_local()).await??
    } else {
        cli.run_client().await?
    };
    println!("{output}");
    Ok(())
}
