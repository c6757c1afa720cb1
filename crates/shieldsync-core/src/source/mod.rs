//! pull sources for pool events and the authoritative root
//!
//! a source is anything that can answer "logs for the pool between blocks a
//! and b" and "what is the contract's root at block h". the json-rpc adapter
//! lives in [`rpc`]; [`memory`] serves fixtures.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::event::{EventFilter, RawLog};
use crate::field::Fr;
use crate::{LedgerError, Result};

pub mod memory;
#[cfg(feature = "rpc")]
pub mod rpc;

/// source-level failure, before it is folded into [`LedgerError`]
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl SourceError {
    /// worth another attempt against the same source
    pub fn is_retryable(&self) -> bool {
        matches!(self, SourceError::RateLimited(_) | SourceError::Unavailable(_))
    }
}

pub type SourceResult<T> = std::result::Result<T, SourceError>;

#[async_trait]
pub trait LogSource: Send + Sync {
    /// short label for logs and errors
    fn name(&self) -> &str;

    /// latest block the source can serve
    async fn head(&self) -> SourceResult<u64>;

    /// pool logs in the inclusive block range
    async fn fetch_logs(&self, filter: &EventFilter, from: u64, to: u64) -> SourceResult<Vec<RawLog>>;
}

#[async_trait]
pub trait RootSource: Send + Sync {
    /// contract root as of `at_block`
    async fn onchain_root(&self, at_block: u64) -> SourceResult<Fr>;
}

#[async_trait]
impl<S: LogSource + ?Sized> LogSource for Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn head(&self) -> SourceResult<u64> {
        (**self).head().await
    }

    async fn fetch_logs(&self, filter: &EventFilter, from: u64, to: u64) -> SourceResult<Vec<RawLog>> {
        (**self).fetch_logs(filter, from, to).await
    }
}

#[async_trait]
impl<S: RootSource + ?Sized> RootSource for Arc<S> {
    async fn onchain_root(&self, at_block: u64) -> SourceResult<Fr> {
        (**self).onchain_root(at_block).await
    }
}

/// bounded retry with exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// no waiting between attempts (tests)
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
        }
    }

    /// base, 2*base, 4*base, ...
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(16))
    }

    /// run `op` until it succeeds, fails permanently, or attempts run out
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> SourceResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SourceResult<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                    let delay = self.delay(attempt);
                    warn!(
                        "{} failed (attempt {}/{}): {}, retrying in {:?}",
                        what,
                        attempt + 1,
                        attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// shared cancellation flag, checked between pages
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(LedgerError::Cancelled);
        }
        Ok(())
    }
}

/// one fetched block range
#[derive(Debug, Clone)]
pub struct Page {
    pub from: u64,
    pub to: u64,
    pub logs: Vec<RawLog>,
}

/// walks `[from, cutoff]` in fixed-size block ranges, one page per call
pub struct EventPager<'a> {
    source: &'a dyn LogSource,
    filter: &'a EventFilter,
    next: u64,
    cutoff: u64,
    chunk: u64,
    retry: RetryPolicy,
    cancel: CancelToken,
    done: bool,
}

impl<'a> EventPager<'a> {
    pub fn new(
        source: &'a dyn LogSource,
        filter: &'a EventFilter,
        from: u64,
        cutoff: u64,
        chunk: u64,
        retry: RetryPolicy,
        cancel: CancelToken,
    ) -> Self {
        Self {
            source,
            filter,
            next: from,
            cutoff,
            chunk: chunk.max(1),
            retry,
            cancel,
            done: from > cutoff,
        }
    }

    /// first block not yet fetched
    pub fn position(&self) -> u64 {
        self.next
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// fetch the next range. `Ok(None)` once the cutoff has been reached.
    /// a failed page leaves the pager positioned on that page.
    pub async fn next_page(&mut self) -> Result<Option<Page>> {
        if self.done {
            return Ok(None);
        }
        self.cancel.check()?;

        let from = self.next;
        let to = from.saturating_add(self.chunk - 1).min(self.cutoff);
        let source = self.source;
        let filter = self.filter;
        let what = format!("{} logs {}..={}", source.name(), from, to);
        let logs = self
            .retry
            .run(&what, || source.fetch_logs(filter, from, to))
            .await
            .map_err(|e| LedgerError::SourceUnavailable(format!("{}: {}", what, e)))?;

        debug!("{}: {} logs", what, logs.len());
        if to >= self.cutoff {
            self.done = true;
        } else {
            self.next = to + 1;
        }
        Ok(Some(Page { from, to, logs }))
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryLogSource;
    use super::*;
    use std::sync::atomic::AtomicU32;

    const POOL: &str = "0x00000000000000000000000000000000000000aa";

    #[tokio::test]
    async fn test_retry_recovers() {
        let calls = AtomicU32::new(0);
        let out = RetryPolicy::immediate(3)
            .run("flaky", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(SourceError::RateLimited("slow down".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(out, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let calls = AtomicU32::new(0);
        let out: SourceResult<()> = RetryPolicy::immediate(2)
            .run("down", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SourceError::Unavailable("refused".into())) }
            })
            .await;
        assert!(out.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // malformed answers are not retried
        let calls = AtomicU32::new(0);
        let out: SourceResult<()> = RetryPolicy::immediate(5)
            .run("garbage", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SourceError::Malformed("not json".into())) }
            })
            .await;
        assert!(out.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_pager_ranges() {
        let source = MemoryLogSource::new("mem", 100);
        let filter = EventFilter::new(POOL).unwrap();
        let mut pager = EventPager::new(&source, &filter, 10, 34, 10, RetryPolicy::immediate(1), CancelToken::new());

        let mut ranges = Vec::new();
        while let Some(page) = pager.next_page().await.unwrap() {
            ranges.push((page.from, page.to));
        }
        assert_eq!(ranges, vec![(10, 19), (20, 29), (30, 34)]);
        assert!(pager.is_done());
        assert!(pager.next_page().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pager_cancel() {
        let source = MemoryLogSource::new("mem", 100);
        let filter = EventFilter::new(POOL).unwrap();
        let cancel = CancelToken::new();
        let mut pager = EventPager::new(&source, &filter, 0, 99, 10, RetryPolicy::immediate(1), cancel.clone());

        assert!(pager.next_page().await.unwrap().is_some());
        cancel.cancel();
        assert!(matches!(pager.next_page().await, Err(LedgerError::Cancelled)));
        assert_eq!(pager.position(), 10);
    }

    #[tokio::test]
    async fn test_pager_failure_keeps_position() {
        let source = MemoryLogSource::new("mem", 100);
        source.fail_from_block(20);
        let filter = EventFilter::new(POOL).unwrap();
        let mut pager = EventPager::new(&source, &filter, 0, 49, 10, RetryPolicy::immediate(2), CancelToken::new());

        assert!(pager.next_page().await.unwrap().is_some());
        assert!(pager.next_page().await.unwrap().is_some());
        assert!(matches!(pager.next_page().await, Err(LedgerError::SourceUnavailable(_))));
        assert_eq!(pager.position(), 20);
    }
}
