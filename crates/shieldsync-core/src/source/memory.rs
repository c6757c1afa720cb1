//! in-memory sources for fixtures and offline replays

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{LogSource, RootSource, SourceError, SourceResult};
use crate::event::{parse_quantity, EventFilter, RawLog};
use crate::field::Fr;

/// serves a fixed log set, with switchable failure modes
pub struct MemoryLogSource {
    name: String,
    head: AtomicU64,
    logs: Mutex<Vec<RawLog>>,
    fail_from: Mutex<Option<u64>>,
    rate_limits: AtomicU32,
    calls: AtomicU32,
}

impl MemoryLogSource {
    pub fn new(name: &str, head: u64) -> Self {
        Self {
            name: name.to_string(),
            head: AtomicU64::new(head),
            logs: Mutex::new(Vec::new()),
            fail_from: Mutex::new(None),
            rate_limits: AtomicU32::new(0),
            calls: AtomicU32::new(0),
        }
    }

    pub fn with_logs(name: &str, head: u64, logs: Vec<RawLog>) -> Self {
        let source = Self::new(name, head);
        source.extend(logs);
        source
    }

    pub fn extend(&self, logs: impl IntoIterator<Item = RawLog>) {
        self.logs.lock().unwrap_or_else(|e| e.into_inner()).extend(logs);
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    /// every request touching `block` or later fails
    pub fn fail_from_block(&self, block: u64) {
        *self.fail_from.lock().unwrap_or_else(|e| e.into_inner()) = Some(block);
    }

    /// answer the next `n` requests with a rate-limit error
    pub fn rate_limit_next(&self, n: u32) {
        self.rate_limits.store(n, Ordering::SeqCst);
    }

    /// fetch_logs calls served or refused so far
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LogSource for MemoryLogSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn head(&self) -> SourceResult<u64> {
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn fetch_logs(&self, filter: &EventFilter, from: u64, to: u64) -> SourceResult<Vec<RawLog>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let limited = self
            .rate_limits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if limited {
            return Err(SourceError::RateLimited(format!("{}: too many requests", self.name)));
        }
        if let Some(block) = *self.fail_from.lock().unwrap_or_else(|e| e.into_inner()) {
            if to >= block {
                return Err(SourceError::Unavailable(format!("{}: range {}..={} refused", self.name, from, to)));
            }
        }

        let topics = filter.topics();
        let logs = self.logs.lock().unwrap_or_else(|e| e.into_inner());
        Ok(logs
            .iter()
            .filter(|log| log.address.eq_ignore_ascii_case(filter.contract()))
            .filter(|log| {
                log.topics
                    .first()
                    .map_or(false, |t| topics.iter().any(|want| t.eq_ignore_ascii_case(want)))
            })
            .filter(|log| match parse_quantity(log.block_number.as_deref(), "blockNumber") {
                Ok(block) => block >= from && block <= to,
                // unparsable logs are passed through for the parser to reject
                Err(_) => true,
            })
            .cloned()
            .collect())
    }
}

/// root history keyed by the block it took effect at
#[derive(Default)]
pub struct MemoryRootSource {
    roots: Mutex<BTreeMap<u64, Fr>>,
}

impl MemoryRootSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// single root valid from block 0
    pub fn fixed(root: Fr) -> Self {
        let source = Self::new();
        source.set(0, root);
        source
    }

    pub fn set(&self, from_block: u64, root: Fr) {
        self.roots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(from_block, root);
    }
}

#[async_trait]
impl RootSource for MemoryRootSource {
    async fn onchain_root(&self, at_block: u64) -> SourceResult<Fr> {
        self.roots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .range(..=at_block)
            .next_back()
            .map(|(_, root)| *root)
            .ok_or_else(|| SourceError::Unavailable(format!("no root known at block {}", at_block)))
    }
}
