//! event reconciliation
//!
//! pulls the pool's event history up to a cutoff block, orders and
//! de-duplicates it, assigns leaf indices, rebuilds the commitment tree and
//! checks the result against the contract's own root at the cutoff. only a
//! tree that passed that check leaves this module, as a
//! [`VerifiedSnapshot`].
//!
//! sources are tried in order: the primary for the whole window, then the
//! fallback in fixed block chunks from wherever the primary gave up. a
//! mismatch on a window that did not start at genesis triggers one full
//! refetch; a mismatch on a full window is an integrity error.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::event::{describe, normalize, split, CommitmentEvent, EventFilter, LedgerEvent, NullifierEvent};
use crate::field::{fr_to_hex, Fr};
use crate::hasher::PoseidonHasher;
use crate::source::{CancelToken, EventPager, LogSource, RootSource};
use crate::store::{CommitSummary, NoteBackend, NoteStore};
use crate::tree::{CommitmentTree, LeafInput};
use crate::{LedgerError, Result};

/// inclusive block range to reconcile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub from_block: u64,
    pub cutoff: u64,
}

impl FetchWindow {
    pub fn new(from_block: u64, cutoff: u64) -> Self {
        Self { from_block, cutoff }
    }

    pub fn is_empty(&self) -> bool {
        self.from_block > self.cutoff
    }

    /// number of blocks covered
    pub fn len(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            self.cutoff - self.from_block + 1
        }
    }

    pub fn starts_at_genesis(&self, genesis_block: u64) -> bool {
        self.from_block <= genesis_block
    }
}

/// how leaf indices are derived from commitment events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexPolicy {
    /// every event must carry the contract's index
    ExplicitOnly,
    /// events without an index take their canonical position; only sound
    /// when the window covers the whole history
    InferFromGenesis,
}

impl IndexPolicy {
    pub fn for_window(window: &FetchWindow, genesis_block: u64) -> Self {
        if window.starts_at_genesis(genesis_block) {
            IndexPolicy::InferFromGenesis
        } else {
            IndexPolicy::ExplicitOnly
        }
    }
}

/// turn canonically ordered commitment events into tree input
pub fn assign_indices(commitments: &[CommitmentEvent], policy: IndexPolicy) -> Result<Vec<LeafInput>> {
    let mut leaves = Vec::with_capacity(commitments.len());
    let mut gaps = 0usize;
    for (position, event) in commitments.iter().enumerate() {
        let position = position as u64;
        let index = match (event.index, policy) {
            (Some(index), IndexPolicy::InferFromGenesis) => {
                if index != position {
                    gaps += 1;
                    debug!("commitment at {} has index {} but canonical position {}", event.key, index, position);
                }
                index
            }
            (Some(index), IndexPolicy::ExplicitOnly) => index,
            (None, IndexPolicy::InferFromGenesis) => position,
            (None, IndexPolicy::ExplicitOnly) => {
                return Err(LedgerError::UnsoundIndex(format!(
                    "commitment {} at {} has no index and the window does not start at genesis",
                    fr_to_hex(&event.commitment),
                    event.key
                )))
            }
        };
        leaves.push(LeafInput {
            index,
            commitment: event.commitment,
        });
    }
    if gaps > 0 {
        warn!("{} commitment indices disagree with event order (gap in history?)", gaps);
    }
    Ok(leaves)
}

/// a tree whose root matched the contract at `height`
pub struct VerifiedSnapshot {
    tree: CommitmentTree<PoseidonHasher>,
    root: Fr,
    height: u64,
    window: FetchWindow,
    commitments: Vec<CommitmentEvent>,
    spends: Vec<NullifierEvent>,
    nullifiers: Vec<Fr>,
    spent: HashSet<Fr>,
    refetched: bool,
}

impl VerifiedSnapshot {
    pub fn tree(&self) -> &CommitmentTree<PoseidonHasher> {
        &self.tree
    }

    pub fn root(&self) -> Fr {
        self.root
    }

    /// block the root was read at
    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn window(&self) -> FetchWindow {
        self.window
    }

    pub fn commitments(&self) -> &[CommitmentEvent] {
        &self.commitments
    }

    /// nullifiers revealed within the window, in event order
    pub fn nullifiers(&self) -> &[Fr] {
        &self.nullifiers
    }

    /// spend events within the window, in event order
    pub fn spends(&self) -> &[NullifierEvent] {
        &self.spends
    }

    pub fn is_spent(&self, nullifier: &Fr) -> bool {
        self.spent.contains(nullifier)
    }

    /// whether the first window failed and history was refetched from genesis
    pub fn refetched(&self) -> bool {
        self.refetched
    }

    /// apply spent flags, leaf positions and history entries to the owner's
    /// notes in one persist
    pub fn commit_notes<B: NoteBackend>(&self, store: &mut NoteStore<B>) -> Result<CommitSummary> {
        let summary = store.apply_events(&self.commitments, &self.spends, |c| self.tree.position_of(c))?;
        info!(
            "committed snapshot at {} to {}: {} spent, {} positioned, {} history entries",
            self.height,
            store.owner(),
            summary.newly_spent,
            summary.positioned,
            summary.recorded
        );
        Ok(summary)
    }
}

/// tree built from one window, not yet checked
struct Candidate {
    window: FetchWindow,
    tree: CommitmentTree<PoseidonHasher>,
    commitments: Vec<CommitmentEvent>,
    nullifiers: Vec<NullifierEvent>,
}

pub struct Reconciler {
    config: SyncConfig,
    filter: EventFilter,
    hasher: Arc<PoseidonHasher>,
    primary: Arc<dyn LogSource>,
    fallback: Option<Arc<dyn LogSource>>,
    roots: Arc<dyn RootSource>,
}

impl Reconciler {
    pub fn new(
        config: SyncConfig,
        hasher: Arc<PoseidonHasher>,
        primary: Arc<dyn LogSource>,
        roots: Arc<dyn RootSource>,
    ) -> Result<Self> {
        config.validate()?;
        let filter = EventFilter::new(&config.contract)?;
        Ok(Self {
            config,
            filter,
            hasher,
            primary,
            fallback: None,
            roots,
        })
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn LogSource>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// latest block to reconcile to: source head minus confirmations
    pub async fn cutoff(&self) -> Result<u64> {
        let retry = self.config.retry_policy();
        let primary = self.primary.as_ref();
        let head = match retry.run("primary head", || primary.head()).await {
            Ok(head) => head,
            Err(e) => {
                let fallback = self
                    .fallback
                    .as_deref()
                    .ok_or_else(|| LedgerError::SourceUnavailable(format!("{}: {}", primary.name(), e)))?;
                warn!("{} head failed ({}), asking {}", primary.name(), e, fallback.name());
                retry
                    .run("fallback head", || fallback.head())
                    .await
                    .map_err(|e2| {
                        LedgerError::SourceUnavailable(format!(
                            "{}: {}; {}: {}",
                            primary.name(),
                            e,
                            fallback.name(),
                            e2
                        ))
                    })?
            }
        };
        Ok(head.saturating_sub(self.config.confirmations))
    }

    /// reconcile the full history up to the current head
    pub async fn sync(&self, cancel: &CancelToken) -> Result<VerifiedSnapshot> {
        let cutoff = self.cutoff().await?;
        self.reconcile(FetchWindow::new(self.config.genesis_block, cutoff), cancel)
            .await
    }

    /// reconcile `window` and verify it against the contract root at its
    /// cutoff
    pub async fn reconcile(&self, window: FetchWindow, cancel: &CancelToken) -> Result<VerifiedSnapshot> {
        let genesis = self.config.genesis_block;
        let window = FetchWindow::new(window.from_block.max(genesis), window.cutoff);
        info!(
            "reconciling blocks {}..={} (genesis {})",
            window.from_block, window.cutoff, genesis
        );

        let onchain = self.onchain_root(window.cutoff).await?;
        let candidate = self.build_candidate(window, cancel).await?;
        let computed = candidate.tree.root();
        if computed == onchain {
            return Ok(self.finish(candidate, onchain, false));
        }

        if !window.starts_at_genesis(genesis) {
            warn!(
                "root mismatch on partial window {}..={} ({} != {}), refetching from genesis",
                window.from_block,
                window.cutoff,
                fr_to_hex(&computed),
                fr_to_hex(&onchain)
            );
            let full = FetchWindow::new(genesis, window.cutoff);
            let candidate = self.build_candidate(full, cancel).await?;
            let computed = candidate.tree.root();
            if computed == onchain {
                return Ok(self.finish(candidate, onchain, true));
            }
            return Err(integrity(computed, onchain, window.cutoff));
        }

        Err(integrity(computed, onchain, window.cutoff))
    }

    async fn onchain_root(&self, height: u64) -> Result<Fr> {
        let roots = self.roots.as_ref();
        self.config
            .retry_policy()
            .run("onchain root", || roots.onchain_root(height))
            .await
            .map_err(|e| LedgerError::SourceUnavailable(format!("root at {}: {}", height, e)))
    }

    async fn build_candidate(&self, window: FetchWindow, cancel: &CancelToken) -> Result<Candidate> {
        let events = self.fetch_events(window, cancel).await?;
        cancel.check()?;

        let (commitments, nullifiers) = split(events);
        let policy = IndexPolicy::for_window(&window, self.config.genesis_block);
        let leaves = assign_indices(&commitments, policy)?;
        let tree = CommitmentTree::build(self.hasher.clone(), self.config.depth, leaves)?;
        debug!(
            "window {}..={}: {} commitments, {} nullifiers, root {}",
            window.from_block,
            window.cutoff,
            commitments.len(),
            nullifiers.len(),
            fr_to_hex(&tree.root())
        );
        Ok(Candidate {
            window,
            tree,
            commitments,
            nullifiers,
        })
    }

    /// primary first, then the fallback from where the primary stopped.
    /// both result sets go through the same merge.
    async fn fetch_events(&self, window: FetchWindow, cancel: &CancelToken) -> Result<Vec<LedgerEvent>> {
        let retry = self.config.retry_policy();
        let primary_chunk = self.config.primary_chunk.unwrap_or_else(|| window.len().max(1));
        let mut logs = Vec::new();

        let mut pager = EventPager::new(
            self.primary.as_ref(),
            &self.filter,
            window.from_block,
            window.cutoff,
            primary_chunk,
            retry,
            cancel.clone(),
        );
        let mut stopped = None;
        loop {
            match pager.next_page().await {
                Ok(Some(page)) => logs.extend(page.logs),
                Ok(None) => break,
                Err(LedgerError::SourceUnavailable(reason)) => {
                    stopped = Some((pager.position(), reason));
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        if let Some((resume, primary_reason)) = stopped {
            let fallback = self
                .fallback
                .as_deref()
                .ok_or_else(|| LedgerError::SourceUnavailable(primary_reason.clone()))?;
            warn!(
                "primary failed ({}), walking {} from block {} in chunks of {}",
                primary_reason,
                fallback.name(),
                resume,
                self.config.chunk_size
            );

            let mut pager = EventPager::new(
                fallback,
                &self.filter,
                resume,
                window.cutoff,
                self.config.chunk_size,
                retry,
                cancel.clone(),
            );
            loop {
                match pager.next_page().await {
                    Ok(Some(page)) => logs.extend(page.logs),
                    Ok(None) => break,
                    Err(LedgerError::SourceUnavailable(reason)) => {
                        return Err(LedgerError::SourceUnavailable(format!("{}; {}", primary_reason, reason)))
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        let events = normalize(self.filter.parse_all(&logs)?)?;
        for event in &events {
            debug!("{}", describe(event));
        }
        Ok(events)
    }

    fn finish(&self, candidate: Candidate, root: Fr, refetched: bool) -> VerifiedSnapshot {
        let nullifiers: Vec<Fr> = candidate.nullifiers.iter().map(|n| n.nullifier).collect();
        let spent = nullifiers.iter().copied().collect();
        info!(
            "verified root {} at block {} ({} leaves)",
            fr_to_hex(&root),
            candidate.window.cutoff,
            candidate.tree.len()
        );
        VerifiedSnapshot {
            tree: candidate.tree,
            root,
            height: candidate.window.cutoff,
            window: candidate.window,
            commitments: candidate.commitments,
            spends: candidate.nullifiers,
            nullifiers,
            spent,
            refetched,
        }
    }
}

fn integrity(computed: Fr, onchain: Fr, height: u64) -> LedgerError {
    LedgerError::Integrity {
        computed: fr_to_hex(&computed),
        onchain: fr_to_hex(&onchain),
        height,
    }
}
