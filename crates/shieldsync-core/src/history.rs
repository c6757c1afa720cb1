//! owner activity history
//!
//! every pool event that touches one of the owner's notes becomes an
//! [`Activity`] entry: a commitment we hold arriving in the tree, or one of
//! our nullifiers being revealed. the transaction kind is read off the mix
//! of events the transaction emitted.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::event::{CommitmentEvent, EventKey, NullifierEvent};
use crate::field::{hex_fr, Fr};
use crate::note::{amount_string, Amount, Note};

/// what a pool transaction did, judged by the events it emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    /// commitments only
    Deposit,
    /// nullifiers and commitments
    Transfer,
    /// nullifiers only
    Withdraw,
}

/// direction of value for the owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flow {
    Received,
    Spent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub block_number: u64,
    pub log_index: u64,
    /// 0x-prefixed transaction hash
    pub tx_hash: String,
    pub kind: ActivityKind,
    pub flow: Flow,
    #[serde(with = "hex_fr")]
    pub commitment: Fr,
    #[serde(with = "amount_string")]
    pub amount: Amount,
    /// sealed payload published with a received note, hex
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_note: Option<String>,
}

impl Activity {
    pub fn key(&self) -> EventKey {
        EventKey {
            block_number: self.block_number,
            log_index: self.log_index,
        }
    }

    /// (block, log, tx) identity of the underlying event
    pub fn id(&self) -> (EventKey, &str) {
        (self.key(), self.tx_hash.as_str())
    }
}

/// canonical order: block, log index, then tx hash
pub fn sort(history: &mut [Activity]) {
    history.sort_by(|a, b| a.key().cmp(&b.key()).then_with(|| a.tx_hash.cmp(&b.tx_hash)));
}

/// kind of every transaction in the window
pub fn classify(commitments: &[CommitmentEvent], spends: &[NullifierEvent]) -> HashMap<[u8; 32], ActivityKind> {
    let minted: HashSet<[u8; 32]> = commitments.iter().map(|c| c.tx_hash).collect();
    let burned: HashSet<[u8; 32]> = spends.iter().map(|s| s.tx_hash).collect();
    minted
        .union(&burned)
        .map(|tx| {
            let kind = match (minted.contains(tx), burned.contains(tx)) {
                (true, true) => ActivityKind::Transfer,
                (false, true) => ActivityKind::Withdraw,
                _ => ActivityKind::Deposit,
            };
            (*tx, kind)
        })
        .collect()
}

/// entries for the events in a window that touch `notes`, in canonical order.
/// nullifiers match by exact equality only.
pub fn observe(notes: &[Note], commitments: &[CommitmentEvent], spends: &[NullifierEvent]) -> Vec<Activity> {
    let kinds = classify(commitments, spends);
    let by_commitment: HashMap<&Fr, &Note> = notes.iter().map(|n| (&n.commitment, n)).collect();
    let by_nullifier: HashMap<&Fr, &Note> = notes.iter().map(|n| (&n.nullifier, n)).collect();
    let kind_of = |tx: &[u8; 32]| kinds.get(tx).copied().unwrap_or(ActivityKind::Deposit);

    let mut out = Vec::new();
    for event in commitments {
        if let Some(note) = by_commitment.get(&event.commitment) {
            out.push(Activity {
                block_number: event.key.block_number,
                log_index: event.key.log_index,
                tx_hash: format!("0x{}", hex::encode(event.tx_hash)),
                kind: kind_of(&event.tx_hash),
                flow: Flow::Received,
                commitment: note.commitment,
                amount: note.amount,
                encrypted_note: (!event.encrypted_note.is_empty())
                    .then(|| format!("0x{}", hex::encode(&event.encrypted_note))),
            });
        }
    }
    for event in spends {
        if let Some(note) = by_nullifier.get(&event.nullifier) {
            out.push(Activity {
                block_number: event.key.block_number,
                log_index: event.key.log_index,
                tx_hash: format!("0x{}", hex::encode(event.tx_hash)),
                kind: kind_of(&event.tx_hash),
                flow: Flow::Spent,
                commitment: note.commitment,
                amount: note.amount,
                encrypted_note: None,
            });
        }
    }
    sort(&mut out);
    out
}

/// dashboard totals over a history
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityStats {
    /// distinct transactions per kind
    pub deposits: usize,
    pub transfers: usize,
    pub withdrawals: usize,
    #[serde(with = "amount_string")]
    pub received: Amount,
    #[serde(with = "amount_string")]
    pub spent: Amount,
}

pub fn stats(history: &[Activity]) -> ActivityStats {
    let mut stats = ActivityStats::default();
    let mut seen = HashSet::new();
    for entry in history {
        if seen.insert((entry.tx_hash.as_str(), entry.kind)) {
            match entry.kind {
                ActivityKind::Deposit => stats.deposits += 1,
                ActivityKind::Transfer => stats.transfers += 1,
                ActivityKind::Withdraw => stats.withdrawals += 1,
            }
        }
        match entry.flow {
            Flow::Received => stats.received = stats.received.saturating_add(entry.amount),
            Flow::Spent => stats.spent = stats.spent.saturating_add(entry.amount),
        }
    }
    stats
}
