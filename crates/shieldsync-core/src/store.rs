//! versioned, per-owner note store
//!
//! notes live behind an injected [`NoteBackend`] that only knows how to load
//! and save one opaque record per owner. the record is a json envelope
//! carrying an explicit schema version; anything we do not recognise is
//! dropped rather than guessed at. alongside the notes the record keeps the
//! owner's [`Activity`] history.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::event::{CommitmentEvent, NullifierEvent};
use crate::field::{fr_to_hex, Fr};
use crate::hasher::PoseidonHasher;
use crate::history::{self, Activity};
use crate::note::{Amount, Note};
use crate::{LedgerError, Result, NOTES_SCHEMA_VERSION};

/// owner namespace (wallet address or any stable identity), lower-cased
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(raw: &str) -> Result<Self> {
        let owner = raw.trim().to_ascii_lowercase();
        if owner.is_empty() || owner.chars().any(|c| c.is_whitespace() || c == ':') {
            return Err(LedgerError::InvalidConfig(format!("bad owner id: {:?}", raw)));
        }
        Ok(Self(owner))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// storage key for this owner's note record
    pub fn storage_key(&self) -> String {
        format!("notes:{}", self.0)
    }
}

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// persistence seam: one opaque record per owner
pub trait NoteBackend: Send + Sync {
    fn load(&self, owner: &OwnerId) -> Result<Option<Vec<u8>>>;
    fn save(&self, owner: &OwnerId, record: &[u8]) -> Result<()>;
}

/// in-process backend (tests, ephemeral sessions)
#[derive(Default)]
pub struct MemoryBackend {
    records: Mutex<HashMap<OwnerId, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// overwrite the raw record (used to simulate foreign or stale data)
    pub fn put_raw(&self, owner: &OwnerId, record: Vec<u8>) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(owner.clone(), record);
    }
}

impl NoteBackend for MemoryBackend {
    fn load(&self, owner: &OwnerId) -> Result<Option<Vec<u8>>> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(owner)
            .cloned())
    }

    fn save(&self, owner: &OwnerId, record: &[u8]) -> Result<()> {
        self.put_raw(owner, record.to_vec());
        Ok(())
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    version: u32,
    owner: &'a str,
    notes: &'a [Note],
    activity: &'a [Activity],
}

/// what a reconciliation commit changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub newly_spent: usize,
    pub positioned: usize,
    /// new history entries
    pub recorded: usize,
}

/// the owner's notes, loaded from and saved to a backend
pub struct NoteStore<B: NoteBackend> {
    backend: Arc<B>,
    owner: OwnerId,
    hasher: Arc<PoseidonHasher>,
    notes: Vec<Note>,
    activity: Vec<Activity>,
}

impl<B: NoteBackend> NoteStore<B> {
    /// load the owner's record; unknown schema versions start empty
    pub fn open(backend: Arc<B>, owner: OwnerId, hasher: Arc<PoseidonHasher>) -> Result<Self> {
        let (notes, activity) = match backend.load(&owner)? {
            Some(bytes) => decode_record(&owner, &hasher, &bytes),
            None => (Vec::new(), Vec::new()),
        };
        info!(
            "opened note store for {}: {} notes, {} history entries",
            owner,
            notes.len(),
            activity.len()
        );
        Ok(Self {
            backend,
            owner,
            hasher,
            notes,
            activity,
        })
    }

    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    pub fn hasher(&self) -> &PoseidonHasher {
        &self.hasher
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    /// activity touching our notes, oldest first
    pub fn history(&self) -> &[Activity] {
        &self.activity
    }

    pub fn get(&self, commitment: &Fr) -> Option<&Note> {
        self.notes.iter().find(|n| n.commitment == *commitment)
    }

    pub fn unspent(&self) -> impl Iterator<Item = &Note> {
        self.notes.iter().filter(|n| !n.spent)
    }

    /// sum of unspent amounts (saturating)
    pub fn balance(&self) -> Amount {
        self.unspent().fold(0, |acc: Amount, n| acc.saturating_add(n.amount))
    }

    /// add a note keyed by its commitment. returns false if the identical note
    /// was already present. a different payload under a commitment we already
    /// hold is a conflict; an unknown commitment must match its payload.
    pub fn add_note(&mut self, note: Note) -> Result<bool> {
        if let Some(existing) = self.get(&note.commitment) {
            if existing.same_payload(&note) {
                return Ok(false);
            }
            return Err(LedgerError::ConflictingNote(note.commitment_hex()));
        }
        note.check_commitment(&self.hasher)?;

        let mut next = self.notes.clone();
        next.push(note);
        let activity = self.activity.clone();
        self.persist(next, activity)?;
        Ok(true)
    }

    /// mark the note carrying `nullifier` as spent. a nullifier we have no
    /// note for is not an error: it belongs to someone else.
    pub fn mark_spent(&mut self, nullifier: &Fr) -> Result<bool> {
        Ok(self.apply_spent(std::slice::from_ref(nullifier))? == 1)
    }

    /// mark a batch of nullifiers spent with a single persist
    pub fn apply_spent(&mut self, nullifiers: &[Fr]) -> Result<usize> {
        let summary = self.apply_reconciliation(nullifiers, |_| None)?;
        Ok(summary.newly_spent)
    }

    /// stamp leaf indices found by `position_of`
    pub fn record_positions<F>(&mut self, position_of: F) -> Result<usize>
    where
        F: Fn(&Fr) -> Option<u64>,
    {
        let summary = self.apply_reconciliation(&[], position_of)?;
        Ok(summary.positioned)
    }

    /// apply the outcome of a reconciliation pass. either every change is
    /// persisted or the in-memory notes stay as they were.
    pub fn apply_reconciliation<F>(&mut self, nullifiers: &[Fr], position_of: F) -> Result<CommitSummary>
    where
        F: Fn(&Fr) -> Option<u64>,
    {
        self.commit(nullifiers, position_of, Vec::new())
    }

    /// apply a verified window's events: spent flags, leaf positions and the
    /// history entries for our notes, in one persist
    pub fn apply_events<F>(
        &mut self,
        commitments: &[CommitmentEvent],
        spends: &[NullifierEvent],
        position_of: F,
    ) -> Result<CommitSummary>
    where
        F: Fn(&Fr) -> Option<u64>,
    {
        let nullifiers: Vec<Fr> = spends.iter().map(|s| s.nullifier).collect();
        let observed = history::observe(&self.notes, commitments, spends);
        self.commit(&nullifiers, position_of, observed)
    }

    fn commit<F>(&mut self, nullifiers: &[Fr], position_of: F, observed: Vec<Activity>) -> Result<CommitSummary>
    where
        F: Fn(&Fr) -> Option<u64>,
    {
        let revealed: HashSet<&Fr> = nullifiers.iter().collect();
        let mut next = self.notes.clone();
        let mut summary = CommitSummary::default();

        for note in next.iter_mut() {
            if !note.spent && revealed.contains(&note.nullifier) {
                note.spent = true;
                summary.newly_spent += 1;
                debug!("note {} spent", note.commitment_hex());
            }
            if let Some(index) = position_of(&note.commitment) {
                if note.leaf_index != Some(index) {
                    note.leaf_index = Some(index);
                    summary.positioned += 1;
                }
            }
        }

        let mut activity = self.activity.clone();
        let known: HashSet<_> = self.activity.iter().map(Activity::id).collect();
        for entry in observed {
            if !known.contains(&entry.id()) {
                debug!("{:?} {} at {}", entry.flow, entry.amount, entry.key());
                activity.push(entry);
                summary.recorded += 1;
            }
        }
        history::sort(&mut activity);

        if summary != CommitSummary::default() {
            self.persist(next, activity)?;
        }
        Ok(summary)
    }

    /// pick exactly `count` unspent notes, largest first (ties by commitment)
    pub fn select_spendable(&self, count: usize, target: Amount) -> Result<Vec<Note>> {
        self.select_spendable_where(count, target, |_| true)
    }

    /// same as [`Self::select_spendable`], restricted to notes `eligible`
    /// accepts (e.g. notes already present in a verified tree)
    pub fn select_spendable_where<F>(&self, count: usize, target: Amount, eligible: F) -> Result<Vec<Note>>
    where
        F: Fn(&Note) -> bool,
    {
        let mut candidates: Vec<&Note> = self.unspent().filter(|n| eligible(n)).collect();
        if candidates.len() < count {
            return Err(LedgerError::InsufficientNotes {
                required: count,
                available: candidates.len(),
            });
        }

        candidates.sort_by(|a, b| {
            b.amount
                .cmp(&a.amount)
                .then_with(|| a.commitment.cmp(&b.commitment))
        });
        let chosen: Vec<Note> = candidates.into_iter().take(count).cloned().collect();

        let available = chosen.iter().fold(0, |acc: Amount, n| acc.saturating_add(n.amount));
        if available < target {
            return Err(LedgerError::InsufficientBalance {
                required: target,
                available,
            });
        }
        Ok(chosen)
    }

    /// write the current notes back (explicit save)
    pub fn save(&self) -> Result<()> {
        let bytes = encode_record(&self.owner, &self.notes, &self.activity)?;
        self.backend.save(&self.owner, &bytes)
    }

    fn persist(&mut self, notes: Vec<Note>, activity: Vec<Activity>) -> Result<()> {
        let bytes = encode_record(&self.owner, &notes, &activity)?;
        self.backend.save(&self.owner, &bytes)?;
        self.notes = notes;
        self.activity = activity;
        Ok(())
    }
}

fn encode_record(owner: &OwnerId, notes: &[Note], activity: &[Activity]) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&Envelope {
        version: NOTES_SCHEMA_VERSION,
        owner: owner.as_str(),
        notes,
        activity,
    })?)
}

/// strict decode: wrong version, wrong owner, or unparsable envelope yields
/// nothing; individual bad entries are skipped. a record without an activity
/// array just has no history yet.
fn decode_record(owner: &OwnerId, hasher: &PoseidonHasher, bytes: &[u8]) -> (Vec<Note>, Vec<Activity>) {
    let value: Value = match serde_json::from_slice(bytes) {
        Ok(v) => v,
        Err(e) => {
            warn!("discarding unreadable note record for {}: {}", owner, e);
            return (Vec::new(), Vec::new());
        }
    };

    let version = value.get("version").and_then(Value::as_u64);
    if version != Some(NOTES_SCHEMA_VERSION as u64) {
        warn!(
            "discarding note record for {}: schema version {:?}, expected {}",
            owner, version, NOTES_SCHEMA_VERSION
        );
        return (Vec::new(), Vec::new());
    }

    if value.get("owner").and_then(Value::as_str) != Some(owner.as_str()) {
        warn!("discarding note record for {}: owner namespace mismatch", owner);
        return (Vec::new(), Vec::new());
    }

    let entries = match value.get("notes").and_then(Value::as_array) {
        Some(entries) => entries,
        None => {
            warn!("discarding note record for {}: no notes array", owner);
            return (Vec::new(), Vec::new());
        }
    };

    let mut seen = HashSet::new();
    let mut notes = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        let note: Note = match serde_json::from_value(entry.clone()) {
            Ok(n) => n,
            Err(e) => {
                warn!("dropping malformed note #{} for {}: {}", i, owner, e);
                continue;
            }
        };
        if let Err(e) = note.check_commitment(hasher) {
            warn!("dropping note #{} for {}: {}", i, owner, e);
            continue;
        }
        if !seen.insert(note.commitment) {
            warn!("dropping duplicate note {} for {}", fr_to_hex(&note.commitment), owner);
            continue;
        }
        notes.push(note);
    }

    let mut activity: Vec<Activity> = Vec::new();
    let mut ids = HashSet::new();
    let entries = value.get("activity").and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[]);
    for (i, entry) in entries.iter().enumerate() {
        match serde_json::from_value::<Activity>(entry.clone()) {
            Ok(a) if ids.insert((a.key(), a.tx_hash.clone())) => activity.push(a),
            Ok(_) => warn!("dropping duplicate history entry #{} for {}", i, owner),
            Err(e) => warn!("dropping malformed history entry #{} for {}: {}", i, owner, e),
        }
    }
    history::sort(&mut activity);
    (notes, activity)
}

/// hands out one shared store per owner so every session for that owner
/// goes through the same lock
pub struct NoteRegistry<B: NoteBackend> {
    backend: Arc<B>,
    hasher: Arc<PoseidonHasher>,
    open: Mutex<HashMap<OwnerId, Weak<Mutex<NoteStore<B>>>>>,
}

impl<B: NoteBackend> NoteRegistry<B> {
    pub fn new(backend: Arc<B>, hasher: Arc<PoseidonHasher>) -> Self {
        Self {
            backend,
            hasher,
            open: Mutex::new(HashMap::new()),
        }
    }

    pub fn open(&self, owner: &OwnerId) -> Result<Arc<Mutex<NoteStore<B>>>> {
        let mut open = self.open.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(store) = open.get(owner).and_then(Weak::upgrade) {
            return Ok(store);
        }
        let store = Arc::new(Mutex::new(NoteStore::open(
            self.backend.clone(),
            owner.clone(),
            self.hasher.clone(),
        )?));
        open.insert(owner.clone(), Arc::downgrade(&store));
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::Flow;

    struct Fixture {
        backend: Arc<MemoryBackend>,
        hasher: Arc<PoseidonHasher>,
        owner: OwnerId,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                backend: Arc::new(MemoryBackend::new()),
                hasher: Arc::new(PoseidonHasher::new().unwrap()),
                owner: OwnerId::new("0xAbC0000000000000000000000000000000000001").unwrap(),
            }
        }

        fn store(&self) -> NoteStore<MemoryBackend> {
            NoteStore::open(self.backend.clone(), self.owner.clone(), self.hasher.clone()).unwrap()
        }

        fn note(&self, amount: Amount, seed: u64) -> Note {
            Note::new(&self.hasher, amount, Fr::from(seed), Fr::from(seed + 1_000_000)).unwrap()
        }
    }

    #[test]
    fn test_add_and_reload() {
        let fx = Fixture::new();
        let mut store = fx.store();
        assert!(store.add_note(fx.note(10, 1)).unwrap());
        assert!(!store.add_note(fx.note(10, 1)).unwrap());
        assert_eq!(store.notes().len(), 1);

        let reloaded = fx.store();
        assert_eq!(reloaded.notes(), store.notes());
        assert_eq!(reloaded.balance(), 10);
    }

    #[test]
    fn test_conflicting_note() {
        let fx = Fixture::new();
        let mut store = fx.store();
        let note = fx.note(10, 1);
        store.add_note(note.clone()).unwrap();

        // a different payload claiming a commitment we already hold
        let mut forged = note.clone();
        forged.amount = 11;
        assert!(matches!(store.add_note(forged.clone()), Err(LedgerError::ConflictingNote(_))));
        assert_eq!(store.get(&note.commitment).unwrap().amount, 10);

        // the same payload under a commitment we do not hold yet
        forged.commitment = Fr::from(77u64);
        assert!(matches!(store.add_note(forged), Err(LedgerError::InvalidNote(_))));

        // a spent copy of the same note is still the same payload
        let mut spent = note;
        spent.spent = true;
        assert!(!store.add_note(spent).unwrap());
    }

    #[test]
    fn test_mark_spent() {
        let fx = Fixture::new();
        let mut store = fx.store();
        let note = fx.note(10, 1);
        store.add_note(note.clone()).unwrap();

        assert!(!store.mark_spent(&Fr::from(424242u64)).unwrap());
        assert!(store.mark_spent(&note.nullifier).unwrap());
        assert!(!store.mark_spent(&note.nullifier).unwrap());
        assert_eq!(store.balance(), 0);
        assert!(fx.store().get(&note.commitment).unwrap().spent);
    }

    #[test]
    fn test_select_requires_note_count() {
        let fx = Fixture::new();
        let mut store = fx.store();
        store.add_note(fx.note(1_000, 1)).unwrap();

        // one note would cover the value, but the circuit needs two inputs
        let err = store.select_spendable(2, 5).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientNotes { required: 2, available: 1 }));
        assert!(err.is_user_correctable());
    }

    #[test]
    fn test_select_balance_and_determinism() {
        let fx = Fixture::new();
        let mut store = fx.store();
        for (amount, seed) in [(5, 1), (30, 2), (20, 3), (30, 4)] {
            store.add_note(fx.note(amount, seed)).unwrap();
        }

        let picked = store.select_spendable(2, 60).unwrap();
        assert_eq!(picked.iter().map(|n| n.amount).collect::<Vec<_>>(), vec![30, 30]);
        assert_eq!(picked, store.select_spendable(2, 60).unwrap());

        assert!(matches!(
            store.select_spendable(2, 61),
            Err(LedgerError::InsufficientBalance { required: 61, available: 60 })
        ));

        // spent notes never come back
        store.mark_spent(&picked[0].nullifier).unwrap();
        let next = store.select_spendable(2, 0).unwrap();
        assert!(next.iter().all(|n| n.commitment != picked[0].commitment));
    }

    #[test]
    fn test_unknown_version_discarded() {
        let fx = Fixture::new();
        let mut store = fx.store();
        store.add_note(fx.note(10, 1)).unwrap();

        let mut record: Value = serde_json::from_slice(&fx.backend.load(&fx.owner).unwrap().unwrap()).unwrap();
        record["version"] = Value::from(99);
        fx.backend.put_raw(&fx.owner, serde_json::to_vec(&record).unwrap());
        assert!(fx.store().notes().is_empty());

        fx.backend.put_raw(&fx.owner, b"[1,2,3".to_vec());
        assert!(fx.store().notes().is_empty());
    }

    #[test]
    fn test_malformed_entries_dropped() {
        let fx = Fixture::new();
        let good = fx.note(10, 1);
        let mut forged = serde_json::to_value(fx.note(20, 2)).unwrap();
        forged["amount"] = Value::from("21");
        let record = serde_json::json!({
            "version": NOTES_SCHEMA_VERSION,
            "owner": fx.owner.as_str(),
            "notes": [
                serde_json::to_value(&good).unwrap(),
                {"amount": "5", "secret": "0x01"},
                forged,
                serde_json::to_value(&good).unwrap(),
            ],
        });
        fx.backend.put_raw(&fx.owner, serde_json::to_vec(&record).unwrap());

        let store = fx.store();
        assert_eq!(store.notes(), &[good]);
    }

    #[test]
    fn test_namespaces_are_separate() {
        let fx = Fixture::new();
        let mut store = fx.store();
        store.add_note(fx.note(10, 1)).unwrap();

        let other = OwnerId::new("0xdef").unwrap();
        let foreign = NoteStore::open(fx.backend.clone(), other.clone(), fx.hasher.clone()).unwrap();
        assert!(foreign.notes().is_empty());

        // a record saved under another owner's key is not adopted
        let raw = fx.backend.load(&fx.owner).unwrap().unwrap();
        fx.backend.put_raw(&other, raw);
        let foreign = NoteStore::open(fx.backend.clone(), other, fx.hasher.clone()).unwrap();
        assert!(foreign.notes().is_empty());
    }

    fn commitment_event(block: u64, log: u64, tx: u8, commitment: Fr) -> CommitmentEvent {
        CommitmentEvent {
            key: crate::event::EventKey {
                block_number: block,
                log_index: log,
            },
            tx_hash: [tx; 32],
            commitment,
            index: None,
            encrypted_note: Vec::new(),
        }
    }

    fn spend_event(block: u64, log: u64, tx: u8, nullifier: Fr) -> NullifierEvent {
        NullifierEvent {
            key: crate::event::EventKey {
                block_number: block,
                log_index: log,
            },
            tx_hash: [tx; 32],
            nullifier,
        }
    }

    #[test]
    fn test_history_recorded_once_and_reloaded() {
        let fx = Fixture::new();
        let mut store = fx.store();
        let a = fx.note(10, 1);
        let b = fx.note(20, 2);
        store.add_note(a.clone()).unwrap();
        store.add_note(b.clone()).unwrap();

        let commitments = [
            commitment_event(3, 0, 1, a.commitment),
            commitment_event(3, 1, 9, Fr::from(5u64)),
            commitment_event(8, 1, 2, b.commitment),
        ];
        let spends = [spend_event(8, 0, 2, a.nullifier)];
        let summary = store.apply_events(&commitments, &spends, |_| None).unwrap();
        assert_eq!(summary.recorded, 3);
        assert_eq!(summary.newly_spent, 1);

        let order: Vec<(u64, u64, Flow)> = store
            .history()
            .iter()
            .map(|h| (h.block_number, h.log_index, h.flow))
            .collect();
        assert_eq!(order, vec![(3, 0, Flow::Received), (8, 0, Flow::Spent), (8, 1, Flow::Received)]);

        // replaying the same window adds nothing
        assert_eq!(
            store.apply_events(&commitments, &spends, |_| None).unwrap(),
            CommitSummary::default()
        );
        assert_eq!(fx.store().history(), store.history());
    }

    #[test]
    fn test_history_entries_salvaged() {
        let fx = Fixture::new();
        let mut store = fx.store();
        let note = fx.note(10, 1);
        store.add_note(note.clone()).unwrap();
        store
            .apply_events(&[commitment_event(3, 0, 1, note.commitment)], &[], |_| None)
            .unwrap();

        let mut record: Value = serde_json::from_slice(&fx.backend.load(&fx.owner).unwrap().unwrap()).unwrap();
        let good = record["activity"][0].clone();
        record["activity"] = serde_json::json!([{"blockNumber": 1}, good.clone(), good]);
        fx.backend.put_raw(&fx.owner, serde_json::to_vec(&record).unwrap());
        assert_eq!(fx.store().history(), store.history());

        // records written before history existed still load their notes
        record.as_object_mut().unwrap().remove("activity");
        fx.backend.put_raw(&fx.owner, serde_json::to_vec(&record).unwrap());
        let reloaded = fx.store();
        assert_eq!(reloaded.notes().len(), 1);
        assert!(reloaded.history().is_empty());
    }

    struct FailingBackend;

    impl NoteBackend for FailingBackend {
        fn load(&self, _owner: &OwnerId) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }

        fn save(&self, _owner: &OwnerId, _record: &[u8]) -> Result<()> {
            Err(LedgerError::Storage("disk full".into()))
        }
    }

    #[test]
    fn test_failed_persist_leaves_state() {
        let hasher = Arc::new(PoseidonHasher::new().unwrap());
        let owner = OwnerId::new("alice").unwrap();
        let mut store = NoteStore::open(Arc::new(FailingBackend), owner, hasher.clone()).unwrap();
        let note = Note::new(&hasher, 1, Fr::from(1u64), Fr::from(2u64)).unwrap();
        assert!(store.add_note(note).is_err());
        assert!(store.notes().is_empty());
    }

    #[test]
    fn test_registry_shares_store() {
        let fx = Fixture::new();
        let registry = NoteRegistry::new(fx.backend.clone(), fx.hasher.clone());
        let a = registry.open(&fx.owner).unwrap();
        let b = registry.open(&fx.owner).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        a.lock().unwrap().add_note(fx.note(3, 9)).unwrap();
        assert_eq!(b.lock().unwrap().balance(), 3);

        drop(a);
        drop(b);
        let c = registry.open(&fx.owner).unwrap();
        assert_eq!(c.lock().unwrap().balance(), 3);
    }

    #[test]
    fn test_owner_id() {
        assert_eq!(OwnerId::new(" 0xAB ").unwrap().as_str(), "0xab");
        assert!(matches!(OwnerId::new(""), Err(LedgerError::InvalidConfig(_))));
        assert!(OwnerId::new("a b").is_err());
        assert!(OwnerId::new("a:b").is_err());
        assert_eq!(OwnerId::new("0xab").unwrap().storage_key(), "notes:0xab");
    }
}
