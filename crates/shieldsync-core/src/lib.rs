//! shieldsync core - off-chain bookkeeping for a confidential token pool
//!
//! keeps the owner's private notes, rebuilds the pool's commitment tree from
//! the contract's event log, checks it against the on-chain root, and lays out
//! witness bundles for the deposit / transfer / withdraw circuits.
//!
//! Key pieces:
//! - circom-compatible poseidon over bn254 (`hasher`)
//! - sparse fixed-depth commitment tree with inclusion proofs (`tree`)
//! - versioned per-owner note store with activity history (`store`, `storage`, `history`)
//! - pull-based, cancellable event reconciliation with root check (`reconcile`)
//! - prover input assembly and prover/submitter seams (`assemble`, `prover`)

pub mod assemble;
pub mod config;
pub mod error;
pub mod event;
pub mod field;
pub mod hasher;
pub mod history;
pub mod note;
pub mod prover;
pub mod reconcile;
pub mod source;
pub mod store;
pub mod tree;

#[cfg(feature = "sled-store")]
pub mod storage;

pub use assemble::{CircuitShape, ProofAssembler, ProverInput, PublicSignals, SpendRequest};
pub use config::SyncConfig;
pub use error::{LedgerError, Result};
pub use field::Fr;
pub use hasher::{MerkleHasher, PoseidonHasher};
pub use history::{Activity, ActivityKind, ActivityStats, Flow};
pub use note::{Amount, Note};
pub use prover::{ProofTriple, Prover, SubmissionBundle, Submitter};
pub use reconcile::{FetchWindow, IndexPolicy, Reconciler, VerifiedSnapshot};
pub use source::{CancelToken, LogSource, RetryPolicy, RootSource, SourceError};
pub use store::{MemoryBackend, NoteBackend, NoteRegistry, NoteStore, OwnerId};
pub use tree::{CommitmentTree, LeafInput, MerkleProof};

#[cfg(feature = "sled-store")]
pub use storage::SledBackend;

#[cfg(feature = "rpc")]
pub use source::rpc::RpcSource;

/// tree depth the pool contract is deployed with
pub const DEFAULT_TREE_DEPTH: usize = 20;

/// schema version of the persisted note record
pub const NOTES_SCHEMA_VERSION: u32 = 1;
