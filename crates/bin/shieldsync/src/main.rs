//! shieldsync CLI - confidential pool bookkeeping
//!
//! Commands:
//! - sync: rebuild the commitment tree, check the on-chain root, update notes
//! - note new / import / list / history: manage the owner's private notes
//! - prove-input deposit / transfer / withdraw: emit the prover witness bundle

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::OsRng;
use serde_json::json;
use tracing::{info, warn};

use shieldsync_core::field::{fr_from_decimal, fr_from_hex, fr_to_hex, Fr};
use shieldsync_core::history;
use shieldsync_core::{
    Amount, CancelToken, LogSource, Note, NoteRegistry, NoteStore, OwnerId, PoseidonHasher, ProofAssembler,
    ProverInput, Reconciler, RootSource, RpcSource, SledBackend, SyncConfig, VerifiedSnapshot,
};

#[derive(Parser, Debug)]
#[command(name = "shieldsync")]
#[command(about = "confidential token pool bookkeeping", long_about = None)]
struct Cli {
    /// primary JSON-RPC endpoint
    #[arg(long, env = "SHIELDSYNC_RPC", default_value = "http://127.0.0.1:8545")]
    rpc: String,

    /// fallback JSON-RPC endpoint, walked in chunks when the primary fails
    #[arg(long, env = "SHIELDSYNC_FALLBACK_RPC")]
    fallback_rpc: Option<String>,

    /// pool contract address
    #[arg(long, env = "SHIELDSYNC_CONTRACT")]
    contract: Option<String>,

    /// block the pool contract was deployed at
    #[arg(long, env = "SHIELDSYNC_GENESIS_BLOCK", default_value_t = 0)]
    genesis_block: u64,

    /// merkle tree depth of the pool
    #[arg(long, env = "SHIELDSYNC_DEPTH", default_value_t = shieldsync_core::DEFAULT_TREE_DEPTH)]
    depth: usize,

    /// blocks per fallback request
    #[arg(long, env = "SHIELDSYNC_CHUNK_SIZE", default_value_t = 100)]
    chunk_size: u64,

    /// stay this many blocks behind head
    #[arg(long, env = "SHIELDSYNC_CONFIRMATIONS", default_value_t = 0)]
    confirmations: u64,

    /// note database path
    #[arg(long, env = "SHIELDSYNC_DB", default_value = "./shieldsync.db")]
    db: PathBuf,

    /// owner namespace (wallet address)
    #[arg(long, env = "SHIELDSYNC_OWNER", default_value = "default")]
    owner: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reconcile the commitment tree and update local notes
    Sync,

    /// Manage private notes
    Note {
        #[command(subcommand)]
        action: NoteAction,
    },

    /// Assemble a prover input bundle
    ProveInput {
        /// write the bundle here instead of stdout
        #[arg(long, global = true)]
        out: Option<PathBuf>,

        #[command(subcommand)]
        circuit: CircuitAction,
    },
}

#[derive(Subcommand, Debug)]
enum NoteAction {
    /// Create a fresh random note and print its commitment
    New {
        #[arg(short, long)]
        amount: Amount,
    },
    /// Add a note received out of band
    Import {
        #[arg(short, long)]
        amount: Amount,
        /// secret (0x hex or decimal)
        #[arg(long)]
        secret: String,
        /// nullifier (0x hex or decimal)
        #[arg(long)]
        nullifier: String,
    },
    /// List notes and balance
    List,
    /// Activity totals and the most recent deposits, transfers and withdrawals
    History {
        /// entries to show, newest first
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(Subcommand, Debug)]
enum CircuitAction {
    /// Deposit a fresh note
    Deposit {
        #[arg(short, long)]
        amount: Amount,
    },
    /// Pay into a new note, keeping the change
    Transfer {
        #[arg(short, long)]
        amount: Amount,
    },
    /// Withdraw a whole note of exactly this amount
    Withdraw {
        #[arg(short, long)]
        amount: Amount,
    },
}

struct Session {
    hasher: Arc<PoseidonHasher>,
    backend: Arc<SledBackend>,
    owner: OwnerId,
    store: Arc<Mutex<NoteStore<SledBackend>>>,
}

impl Session {
    fn open(cli: &Cli) -> Result<Self> {
        let hasher = Arc::new(PoseidonHasher::new()?);
        let backend = Arc::new(SledBackend::open(&cli.db)?);
        let owner = OwnerId::new(&cli.owner)?;
        let registry = NoteRegistry::new(backend.clone(), hasher.clone());
        let store = registry.open(&owner)?;
        Ok(Self {
            hasher,
            backend,
            owner,
            store,
        })
    }

    fn notes(&self) -> Result<MutexGuard<'_, NoteStore<SledBackend>>> {
        self.store.lock().map_err(|_| anyhow!("note store lock poisoned"))
    }

    /// reconcile up to head, then commit spent flags and positions
    async fn sync(&self, cli: &Cli) -> Result<VerifiedSnapshot> {
        let reconciler = build_reconciler(cli, self.hasher.clone())?;

        let cancel = CancelToken::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, cancelling sync");
                on_signal.cancel();
            }
        });

        let snapshot = reconciler.sync(&cancel).await?;
        let summary = snapshot.commit_notes(&mut *self.notes()?)?;
        self.backend.set_last_sync_height(&self.owner, snapshot.height())?;
        info!(
            "synced to block {}: {} spent, {} positioned, {} new activity",
            snapshot.height(),
            summary.newly_spent,
            summary.positioned,
            summary.recorded
        );
        Ok(snapshot)
    }
}

fn build_reconciler(cli: &Cli, hasher: Arc<PoseidonHasher>) -> Result<Reconciler> {
    let contract = cli
        .contract
        .clone()
        .context("--contract (or SHIELDSYNC_CONTRACT) is required")?;
    let config = SyncConfig {
        depth: cli.depth,
        chunk_size: cli.chunk_size,
        confirmations: cli.confirmations,
        ..SyncConfig::new(&contract, cli.genesis_block)
    };

    let primary = RpcSource::new("primary", &cli.rpc);
    let roots: Arc<dyn RootSource> = Arc::new(primary.root_reader(&contract));
    let primary: Arc<dyn LogSource> = Arc::new(primary);
    let mut reconciler = Reconciler::new(config, hasher, primary, roots)?;
    if let Some(url) = &cli.fallback_rpc {
        reconciler = reconciler.with_fallback(Arc::new(RpcSource::new("fallback", url)));
    }
    Ok(reconciler)
}

/// 0x-prefixed hex or base-10
fn parse_field(value: &str) -> Result<Fr> {
    let parsed = if value.starts_with("0x") {
        fr_from_hex(value)
    } else {
        fr_from_decimal(value)
    };
    parsed.with_context(|| format!("invalid field element {:?}", value))
}

fn emit(out: Option<&PathBuf>, value: &serde_json::Value) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    match out {
        Some(path) => {
            std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
            info!("wrote {}", path.display());
        }
        None => println!("{}", text),
    }
    Ok(())
}

fn bundle_json(input: &ProverInput) -> Result<serde_json::Value> {
    Ok(json!({
        "circuit": input.shape,
        "input": input.to_json()?,
        "public": serde_json::to_value(&input.public)?,
    }))
}

#[tokio::main]
async fn main() -> Result<()> {
    // initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shieldsync=info,shieldsync_core=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let session = Session::open(&cli)?;
    info!("owner {} at {}", session.owner, cli.db.display());

    match &cli.command {
        Commands::Sync => {
            let snapshot = session.sync(&cli).await?;
            let notes = session.notes()?;
            emit(
                None,
                &json!({
                    "root": fr_to_hex(&snapshot.root()),
                    "height": snapshot.height(),
                    "leaves": snapshot.tree().len(),
                    "nextIndex": snapshot.tree().next_index(),
                    "balance": notes.balance().to_string(),
                }),
            )?;
        }

        Commands::Note { action } => match action {
            NoteAction::New { amount } => {
                let note = Note::random(&session.hasher, *amount, &mut OsRng)?;
                session.notes()?.add_note(note.clone())?;
                info!("created note {}", note.commitment_hex());
                emit(None, &json!({ "commitment": note.commitment_hex(), "amount": amount.to_string() }))?;
            }
            NoteAction::Import {
                amount,
                secret,
                nullifier,
            } => {
                let note = Note::new(&session.hasher, *amount, parse_field(secret)?, parse_field(nullifier)?)?;
                let added = session.notes()?.add_note(note.clone())?;
                if !added {
                    warn!("note {} already known", note.commitment_hex());
                }
                emit(None, &json!({ "commitment": note.commitment_hex(), "added": added }))?;
            }
            NoteAction::List => {
                let notes = session.notes()?;
                let list: Vec<_> = notes
                    .notes()
                    .iter()
                    .map(|n| {
                        json!({
                            "commitment": n.commitment_hex(),
                            "amount": n.amount.to_string(),
                            "spent": n.spent,
                            "leafIndex": n.leaf_index,
                        })
                    })
                    .collect();
                let last_sync = session.backend.last_sync_height(&session.owner)?;
                emit(
                    None,
                    &json!({
                        "owner": session.owner.as_str(),
                        "notes": list,
                        "balance": notes.balance().to_string(),
                        "lastSyncHeight": last_sync,
                    }),
                )?;
            }
            NoteAction::History { limit } => {
                let notes = session.notes()?;
                let recent: Vec<_> = notes.history().iter().rev().take(*limit).collect();
                emit(
                    None,
                    &json!({
                        "owner": session.owner.as_str(),
                        "stats": history::stats(notes.history()),
                        "recent": recent,
                        "lastSyncHeight": session.backend.last_sync_height(&session.owner)?,
                    }),
                )?;
            }
        },

        Commands::ProveInput { out, circuit } => {
            let snapshot = session.sync(&cli).await?;
            let assembler = ProofAssembler::new(&snapshot);
            let mut notes = session.notes()?;

            let output = match circuit {
                CircuitAction::Deposit { amount } => {
                    let note = Note::random(&session.hasher, *amount, &mut OsRng)?;
                    let input = assembler.deposit(&*notes, note.clone())?;
                    // keep the note: the deposit is worthless without its secret
                    notes.add_note(note)?;
                    bundle_json(&input)?
                }
                CircuitAction::Transfer { amount } => {
                    let (input, payment, change) = assembler.transfer(&*notes, *amount, &mut OsRng)?;
                    notes.add_note(change.clone())?;
                    let mut bundle = bundle_json(&input)?;
                    bundle["payment"] = serde_json::to_value(&payment)?;
                    bundle["change"] = json!(change.commitment_hex());
                    bundle
                }
                CircuitAction::Withdraw { amount } => bundle_json(&assembler.withdraw(&*notes, *amount)?)?,
            };
            emit(out.as_ref(), &output)?;
        }
    }

    Ok(())
}
