//! Bandwidth governance.
//!
//! Token bucket per group plus a global bucket per direction. Buckets
//! refill continuously at the configured bytes-per-second rate with
//! capacity equal to one second of rate; grants are clipped to whatever
//! both buckets can cover, so partial reads are the norm near the limit.
//! The global bucket is the final cap.

use crate::transfer::state::TransferDirection;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, ReadBuf};

/// Bucket granularity: admission checks and starved readers re-poll at this
/// cadence.
pub const GOVERNOR_TICK: Duration = Duration::from_millis(250);

/// Default chunk a governed reader asks for per grant.
const READ_CHUNK: usize = 64 * 1024;

/// Continuous-refill token bucket.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(rate_bytes_per_sec: u64) -> Self {
        let rate = rate_bytes_per_sec as f64;
        TokenBucket {
            tokens: rate,
            capacity: rate,
            rate,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + self.rate * elapsed).min(self.capacity);
        self.last_refill = now;
    }

    fn available(&mut self) -> f64 {
        self.refill();
        self.tokens
    }

    fn consume(&mut self, amount: f64) {
        self.tokens = (self.tokens - amount).max(0.0);
    }
}

/// Per-group and per-direction bandwidth governor.
///
/// Groups or directions without a configured rate are unlimited.
pub struct RateGovernor {
    groups: DashMap<String, Mutex<TokenBucket>>,
    global: [Mutex<Option<TokenBucket>>; 2],
}

impl Default for RateGovernor {
    fn default() -> Self {
        RateGovernor {
            groups: DashMap::new(),
            global: [Mutex::new(None), Mutex::new(None)],
        }
    }
}

impl RateGovernor {
    /// Set or clear a group's rate. `None` means unlimited.
    pub fn set_group_rate(&self, group: &str, rate_bytes_per_sec: Option<u64>) {
        match rate_bytes_per_sec {
            Some(rate) if rate > 0 => {
                self.groups
                    .insert(group.to_string(), Mutex::new(TokenBucket::new(rate)));
            }
            _ => {
                self.groups.remove(group);
            }
        }
    }

    /// Set or clear the global per-direction rate. `None` means unlimited.
    pub fn set_global_rate(&self, direction: TransferDirection, rate_bytes_per_sec: Option<u64>) {
        let mut guard = self.global[direction.index()].lock();
        *guard = match rate_bytes_per_sec {
            Some(rate) if rate > 0 => Some(TokenBucket::new(rate)),
            _ => None,
        };
    }

    /// Take up to `want` bytes of budget right now. Zero means starved.
    pub fn try_acquire(&self, direction: TransferDirection, group: &str, want: usize) -> usize {
        let mut granted = want as f64;

        let group_entry = self.groups.get(group);
        let mut group_guard = group_entry.as_ref().map(|entry| entry.value().lock());
        if let Some(bucket) = group_guard.as_deref_mut() {
            granted = granted.min(bucket.available());
        }

        let mut global_guard = self.global[direction.index()].lock();
        if let Some(bucket) = global_guard.as_mut() {
            granted = granted.min(bucket.available());
        }

        let granted = granted.floor();
        if granted < 1.0 {
            return 0;
        }

        if let Some(bucket) = group_guard.as_deref_mut() {
            bucket.consume(granted);
        }
        if let Some(bucket) = global_guard.as_mut() {
            bucket.consume(granted);
        }
        granted as usize
    }

    /// Suspend until at least one byte of budget is available, then take up
    /// to `want`.
    pub async fn acquire(&self, direction: TransferDirection, group: &str, want: usize) -> usize {
        loop {
            let granted = self.try_acquire(direction, group, want);
            if granted > 0 {
                return granted;
            }
            tokio::time::sleep(GOVERNOR_TICK).await;
        }
    }

    /// True when the group has a positive remainder in the current bucket
    /// under the global cap; the scheduler's admission predicate.
    #[must_use]
    pub fn has_budget(&self, direction: TransferDirection, group: &str) -> bool {
        if let Some(entry) = self.groups.get(group) {
            if entry.value().lock().available() < 1.0 {
                return false;
            }
        }
        if let Some(bucket) = self.global[direction.index()].lock().as_mut() {
            if bucket.available() < 1.0 {
                return false;
            }
        }
        true
    }
}

/// An [`AsyncRead`] adapter that blocks reads until the governor grants
/// budget, counting bytes into a shared progress counter.
pub struct GovernedReader<R> {
    inner: R,
    governor: Arc<RateGovernor>,
    direction: TransferDirection,
    group: Arc<str>,
    progress: Arc<AtomicU64>,
    permit: usize,
    pending: Option<Pin<Box<dyn Future<Output = usize> + Send>>>,
}

impl<R> GovernedReader<R> {
    /// Wrap a reader.
    pub fn new(
        inner: R,
        governor: Arc<RateGovernor>,
        direction: TransferDirection,
        group: &str,
        progress: Arc<AtomicU64>,
    ) -> Self {
        GovernedReader {
            inner,
            governor,
            direction,
            group: Arc::from(group),
            progress,
            permit: 0,
            pending: None,
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for GovernedReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();

        if this.permit == 0 {
            let fut = this.pending.get_or_insert_with(|| {
                let governor = Arc::clone(&this.governor);
                let direction = this.direction;
                let group = Arc::clone(&this.group);
                Box::pin(async move { governor.acquire(direction, &group, READ_CHUNK).await })
            });
            match fut.as_mut().poll(cx) {
                Poll::Ready(granted) => {
                    this.pending = None;
                    this.permit = granted;
                }
                Poll::Pending => return Poll::Pending,
            }
        }

        let want = this.permit.min(buf.remaining());
        let mut limited = buf.take(want);
        match Pin::new(&mut this.inner).poll_read(cx, &mut limited) {
            Poll::Ready(Ok(())) => {
                let n = limited.filled().len();
                // The inner read initialized n bytes of the taken window.
                unsafe { buf.assume_init(n) };
                buf.advance(n);
                this.permit -= n;
                this.progress.fetch_add(n as u64, Ordering::Relaxed);
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}
