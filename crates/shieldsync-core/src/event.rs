//! pool contract events
//!
//! raw json-rpc logs are parsed into typed events the moment they arrive.
//! nothing downstream ever looks at a topic string or a data blob.
//!
//! ```text
//! NoteCommitted(bytes32 indexed commitment, uint256 index, bytes encryptedNote)
//!   topics[0] = keccak256(signature), topics[1] = commitment
//!   data      = index (word 0) | offset (word 1) | len | encryptedNote
//!
//! NullifierSpent(bytes32 indexed nullifier)
//!   topics[0] = keccak256(signature), topics[1] = nullifier
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use tracing::{debug, warn};

use crate::field::{fr_from_be_bytes, fr_to_hex, Fr};
use crate::{LedgerError, Result};

pub const NOTE_COMMITTED_SIGNATURE: &str = "NoteCommitted(bytes32,uint256,bytes)";
pub const NULLIFIER_SPENT_SIGNATURE: &str = "NullifierSpent(bytes32)";

/// keccak256 of an event signature (topic 0) or a function signature
pub fn keccak256(input: &[u8]) -> [u8; 32] {
    Keccak256::digest(input).into()
}

/// `0x`-prefixed topic for an event signature
pub fn event_topic(signature: &str) -> String {
    format!("0x{}", hex::encode(keccak256(signature.as_bytes())))
}

/// log as returned by `eth_getLogs`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(default)]
    pub block_number: Option<String>,
    #[serde(default)]
    pub log_index: Option<String>,
    #[serde(default)]
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub removed: bool,
}

/// canonical order: block number, then log index within the block
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventKey {
    pub block_number: u64,
    pub log_index: u64,
}

impl std::fmt::Display for EventKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.block_number, self.log_index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitmentEvent {
    pub key: EventKey,
    pub tx_hash: [u8; 32],
    pub commitment: Fr,
    /// append index as emitted by the contract; absent when the source
    /// stripped the data payload
    pub index: Option<u64>,
    pub encrypted_note: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NullifierEvent {
    pub key: EventKey,
    pub tx_hash: [u8; 32],
    pub nullifier: Fr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    Commitment(CommitmentEvent),
    Nullifier(NullifierEvent),
}

impl LedgerEvent {
    pub fn key(&self) -> EventKey {
        match self {
            LedgerEvent::Commitment(e) => e.key,
            LedgerEvent::Nullifier(e) => e.key,
        }
    }

    pub fn tx_hash(&self) -> &[u8; 32] {
        match self {
            LedgerEvent::Commitment(e) => &e.tx_hash,
            LedgerEvent::Nullifier(e) => &e.tx_hash,
        }
    }
}

/// which logs belong to the pool, and how to read them
#[derive(Debug, Clone)]
pub struct EventFilter {
    contract: String,
    commitment_topic: String,
    nullifier_topic: String,
}

impl EventFilter {
    pub fn new(contract: &str) -> Result<Self> {
        let contract = contract.trim().to_ascii_lowercase();
        let digits = contract.strip_prefix("0x").unwrap_or("");
        if digits.len() != 40 || hex::decode(digits).is_err() {
            return Err(LedgerError::MalformedEvent(format!("bad contract address {:?}", contract)));
        }
        Ok(Self {
            contract,
            commitment_topic: event_topic(NOTE_COMMITTED_SIGNATURE),
            nullifier_topic: event_topic(NULLIFIER_SPENT_SIGNATURE),
        })
    }

    pub fn contract(&self) -> &str {
        &self.contract
    }

    /// topic0 values to ask the source for
    pub fn topics(&self) -> [&str; 2] {
        [&self.commitment_topic, &self.nullifier_topic]
    }

    /// parse one log. removed logs, other contracts and unrelated topics
    /// yield `None`; a log that claims to be ours but does not parse is an
    /// error.
    pub fn parse(&self, log: &RawLog) -> Result<Option<LedgerEvent>> {
        if log.removed {
            debug!("dropping removed log {:?}", log.transaction_hash);
            return Ok(None);
        }
        if !log.address.eq_ignore_ascii_case(&self.contract) {
            return Ok(None);
        }
        let topic0 = match log.topics.first() {
            Some(t) => t.to_ascii_lowercase(),
            None => return Ok(None),
        };

        let is_commitment = topic0 == self.commitment_topic;
        if !is_commitment && topic0 != self.nullifier_topic {
            return Ok(None);
        }

        let key = EventKey {
            block_number: parse_quantity(log.block_number.as_deref(), "blockNumber")?,
            log_index: parse_quantity(log.log_index.as_deref(), "logIndex")?,
        };
        let tx_hash = parse_word(
            log.transaction_hash
                .as_deref()
                .ok_or_else(|| malformed(key, "missing transactionHash"))?,
        )
        .map_err(|e| malformed(key, &format!("transactionHash: {}", e)))?;

        if log.topics.len() != 2 {
            return Err(malformed(key, &format!("expected 2 topics, got {}", log.topics.len())));
        }
        let value = parse_word(&log.topics[1])
            .and_then(|w| fr_from_be_bytes(&w))
            .map_err(|e| malformed(key, &format!("topic1: {}", e)))?;

        if !is_commitment {
            return Ok(Some(LedgerEvent::Nullifier(NullifierEvent {
                key,
                tx_hash,
                nullifier: value,
            })));
        }

        let data = decode_hex(&log.data).map_err(|e| malformed(key, &format!("data: {}", e)))?;
        let (index, encrypted_note) = decode_commitment_data(&data).map_err(|e| malformed(key, &e))?;
        Ok(Some(LedgerEvent::Commitment(CommitmentEvent {
            key,
            tx_hash,
            commitment: value,
            index,
            encrypted_note,
        })))
    }

    /// parse a batch, skipping logs that are not ours
    pub fn parse_all(&self, logs: &[RawLog]) -> Result<Vec<LedgerEvent>> {
        let mut events = Vec::with_capacity(logs.len());
        for log in logs {
            if let Some(event) = self.parse(log)? {
                events.push(event);
            }
        }
        Ok(events)
    }
}

/// merge duplicates by (transactionHash, logIndex) and sort canonically.
/// identical copies collapse; divergent copies, or two different logs
/// claiming the same (block, logIndex) slot, are a conflict.
pub fn normalize(events: Vec<LedgerEvent>) -> Result<Vec<LedgerEvent>> {
    let mut seen: HashMap<([u8; 32], u64), LedgerEvent> = HashMap::with_capacity(events.len());
    let mut merged = 0usize;
    for event in events {
        let id = (*event.tx_hash(), event.key().log_index);
        match seen.get(&id) {
            Some(existing) if *existing == event => merged += 1,
            Some(_) => {
                return Err(LedgerError::ConflictingEvent {
                    tx: format!("0x{}", hex::encode(id.0)),
                    log_index: id.1,
                })
            }
            None => {
                seen.insert(id, event);
            }
        }
    }
    if merged > 0 {
        debug!("merged {} duplicate events", merged);
    }

    let mut ordered: Vec<LedgerEvent> = seen.into_values().collect();
    ordered.sort_by_key(|e| e.key());
    for pair in ordered.windows(2) {
        if pair[0].key() == pair[1].key() {
            warn!("two different logs at {}", pair[0].key());
            return Err(LedgerError::ConflictingEvent {
                tx: format!("0x{}", hex::encode(pair[1].tx_hash())),
                log_index: pair[1].key().log_index,
            });
        }
    }
    Ok(ordered)
}

/// split an ordered stream into commitments and nullifiers (order kept)
pub fn split(events: Vec<LedgerEvent>) -> (Vec<CommitmentEvent>, Vec<NullifierEvent>) {
    let mut commitments = Vec::new();
    let mut nullifiers = Vec::new();
    for event in events {
        match event {
            LedgerEvent::Commitment(c) => commitments.push(c),
            LedgerEvent::Nullifier(n) => nullifiers.push(n),
        }
    }
    (commitments, nullifiers)
}

fn malformed(key: EventKey, reason: &str) -> LedgerError {
    LedgerError::MalformedEvent(format!("log {}: {}", key, reason))
}

/// `0x`-prefixed hex quantity
pub fn parse_quantity(value: Option<&str>, field: &str) -> Result<u64> {
    let value = value.ok_or_else(|| LedgerError::MalformedEvent(format!("missing {}", field)))?;
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| LedgerError::MalformedEvent(format!("{} {:?} is not 0x-prefixed", field, value)))?;
    u64::from_str_radix(digits, 16)
        .map_err(|e| LedgerError::MalformedEvent(format!("{} {:?}: {}", field, value, e)))
}

fn decode_hex(value: &str) -> Result<Vec<u8>> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| LedgerError::MalformedEvent(format!("{:?} is not 0x-prefixed", value)))?;
    hex::decode(digits).map_err(|e| LedgerError::MalformedEvent(e.to_string()))
}

/// exactly 32 bytes of hex
fn parse_word(value: &str) -> Result<[u8; 32]> {
    let bytes = decode_hex(value)?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| LedgerError::MalformedEvent(format!("expected 32 bytes, got {}", b.len())))
}

/// big-endian uint256 word that must fit in a u64
fn word_to_u64(word: &[u8]) -> std::result::Result<u64, String> {
    if word[..24].iter().any(|b| *b != 0) {
        return Err(format!("uint256 0x{} does not fit in u64", hex::encode(word)));
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&word[24..32]);
    Ok(u64::from_be_bytes(buf))
}

/// abi-decode `(uint256 index, bytes encryptedNote)`. empty data means the
/// source did not deliver the payload; anything else must be well formed.
fn decode_commitment_data(data: &[u8]) -> std::result::Result<(Option<u64>, Vec<u8>), String> {
    if data.is_empty() {
        return Ok((None, Vec::new()));
    }
    if data.len() < 64 || data.len() % 32 != 0 {
        return Err(format!("data length {} is not a valid abi payload", data.len()));
    }

    let index = word_to_u64(&data[0..32])?;
    let offset = word_to_u64(&data[32..64])? as usize;
    if offset % 32 != 0 || offset.checked_add(32).map_or(true, |end| end > data.len()) {
        return Err(format!("bytes offset {} out of range", offset));
    }
    let len = word_to_u64(&data[offset..offset + 32])? as usize;
    let start = offset + 32;
    let end = start
        .checked_add(len)
        .filter(|end| *end <= data.len())
        .ok_or_else(|| format!("bytes length {} out of range", len))?;
    Ok((Some(index), data[start..end].to_vec()))
}

/// short form for logs
pub fn describe(event: &LedgerEvent) -> String {
    match event {
        LedgerEvent::Commitment(c) => format!(
            "commit {} idx {:?} @ {}",
            fr_to_hex(&c.commitment),
            c.index,
            c.key
        ),
        LedgerEvent::Nullifier(n) => format!("spend {} @ {}", fr_to_hex(&n.nullifier), n.key),
    }
}

/// encode a NoteCommitted log (fixtures and mock sources)
pub fn encode_commitment_log(
    contract: &str,
    key: EventKey,
    tx_hash: [u8; 32],
    commitment: &Fr,
    index: u64,
    encrypted_note: &[u8],
) -> RawLog {
    let mut data = Vec::with_capacity(96 + encrypted_note.len() + 32);
    data.extend_from_slice(&u64_word(index));
    data.extend_from_slice(&u64_word(64));
    data.extend_from_slice(&u64_word(encrypted_note.len() as u64));
    data.extend_from_slice(encrypted_note);
    let pad = (32 - encrypted_note.len() % 32) % 32;
    data.extend(std::iter::repeat(0u8).take(pad));

    RawLog {
        address: contract.to_string(),
        topics: vec![event_topic(NOTE_COMMITTED_SIGNATURE), fr_to_hex(commitment)],
        data: format!("0x{}", hex::encode(data)),
        block_number: Some(format!("0x{:x}", key.block_number)),
        log_index: Some(format!("0x{:x}", key.log_index)),
        transaction_hash: Some(format!("0x{}", hex::encode(tx_hash))),
        removed: false,
    }
}

/// encode a NullifierSpent log (fixtures and mock sources)
pub fn encode_nullifier_log(contract: &str, key: EventKey, tx_hash: [u8; 32], nullifier: &Fr) -> RawLog {
    RawLog {
        address: contract.to_string(),
        topics: vec![event_topic(NULLIFIER_SPENT_SIGNATURE), fr_to_hex(nullifier)],
        data: "0x".to_string(),
        block_number: Some(format!("0x{:x}", key.block_number)),
        log_index: Some(format!("0x{:x}", key.log_index)),
        transaction_hash: Some(format!("0x{}", hex::encode(tx_hash))),
        removed: false,
    }
}

fn u64_word(value: u64) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}
