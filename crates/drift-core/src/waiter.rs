//! Keyed, typed, time-limited promises.
//!
//! The agent fabric correlates asynchronous RPC responses with this
//! registry: the requester registers a waiter under
//! `(operation, counterparty, request id)` and suspends; the response path
//! completes it. Expiry and counterparty disconnect fail waiters cleanly.

use crate::error::{CoreError, Result};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// The operation a waiter belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitOp {
    /// A file-info inquiry pushed to an agent.
    FileInfo,
    /// A file-upload request pushed to an agent.
    FileUpload,
    /// A share-catalog upload expected from an agent.
    ShareUpload,
}

/// Full waiter key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WaitKey {
    /// Operation kind.
    pub op: WaitOp,
    /// Counterparty (agent name), lowercased.
    pub party: String,
    /// Request identifier.
    pub id: Uuid,
}

impl WaitKey {
    /// Build a key, normalising the counterparty name.
    #[must_use]
    pub fn new(op: WaitOp, party: &str, id: Uuid) -> Self {
        WaitKey {
            op,
            party: party.to_lowercase(),
            id,
        }
    }
}

/// A registry of in-flight waiters producing values of type `T`.
pub struct WaitRegistry<T> {
    inner: Arc<DashMap<WaitKey, oneshot::Sender<Result<T>>>>,
}

impl<T> Clone for WaitRegistry<T> {
    fn clone(&self) -> Self {
        WaitRegistry {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for WaitRegistry<T> {
    fn default() -> Self {
        WaitRegistry {
            inner: Arc::new(DashMap::new()),
        }
    }
}

/// A waiter already present in the registry; completions can land from the
/// moment [`WaitRegistry::register`] returned, before anyone awaits.
pub struct RegisteredWait<T> {
    registry: WaitRegistry<T>,
    key: WaitKey,
    rx: oneshot::Receiver<Result<T>>,
}

impl<T: Send + 'static> RegisteredWait<T> {
    /// Suspend until completion, expiry, or cancellation. The registry
    /// entry is removed on every exit path; a completion that races the
    /// timeout is dropped harmlessly.
    pub async fn wait(self, timeout: Duration, cancel: &CancellationToken) -> Result<T> {
        let RegisteredWait { registry, key, rx } = self;

        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(CoreError::Cancelled),
            result = tokio::time::timeout(timeout, rx) => match result {
                Ok(Ok(value)) => value,
                // Sender dropped without completing: registry was torn down.
                Ok(Err(_)) => Err(CoreError::internal("waiter abandoned")),
                Err(_) => Err(CoreError::timeout("waiter expired")),
            },
        };

        registry.inner.remove(&key);
        outcome
    }
}

impl<T: Send + 'static> WaitRegistry<T> {
    /// Insert a waiter immediately; the returned handle is awaited later.
    ///
    /// Register before sending the request whose reply completes the
    /// waiter, so an arbitrarily fast reply still finds it.
    #[must_use]
    pub fn register(&self, key: WaitKey) -> RegisteredWait<T> {
        let (tx, rx) = oneshot::channel();
        if self.inner.insert(key.clone(), tx).is_some() {
            tracing::warn!(?key, "replaced an existing waiter with the same key");
        }
        RegisteredWait {
            registry: self.clone(),
            key,
            rx,
        }
    }

    /// Register and immediately await; convenience for callers with no
    /// request/registration ordering concern.
    pub async fn wait(
        &self,
        key: WaitKey,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<T> {
        self.register(key).wait(timeout, cancel).await
    }

    /// Complete a waiter with a value. Returns `false` when no waiter with
    /// that key is registered (it expired, or the reply was unsolicited).
    pub fn complete(&self, key: &WaitKey, value: T) -> bool {
        match self.inner.remove(key) {
            Some((_, tx)) => tx.send(Ok(value)).is_ok(),
            None => false,
        }
    }

    /// Fail a waiter with an error.
    pub fn fail(&self, key: &WaitKey, error: CoreError) -> bool {
        match self.inner.remove(key) {
            Some((_, tx)) => tx.send(Err(error)).is_ok(),
            None => false,
        }
    }

    /// Fail every outstanding waiter for a counterparty; used when an agent
    /// disconnects with requests in flight.
    pub fn fail_all_for(&self, party: &str, error: impl Fn() -> CoreError) {
        let party = party.to_lowercase();
        let keys: Vec<WaitKey> = self
            .inner
            .iter()
            .filter(|entry| entry.key().party == party)
            .map(|entry| entry.key().clone())
            .collect();
        for key in keys {
            if let Some((_, tx)) = self.inner.remove(&key) {
                let _ = tx.send(Err(error()));
            }
        }
    }

    /// Number of outstanding waiters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// True when nothing is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(op: WaitOp, party: &str) -> WaitKey {
        WaitKey::new(op, party, Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_complete_delivers_value() {
        let registry: WaitRegistry<u64> = WaitRegistry::default();
        let k = key(WaitOp::FileInfo, "agent-1");
        let cancel = CancellationToken::new();

        let waiter = {
            let registry = registry.clone();
            let k = k.clone();
            tokio::spawn(async move { registry.wait(k, Duration::from_secs(5), &cancel).await })
        };

        // Let the waiter register.
        tokio::task::yield_now().await;
        assert!(registry.complete(&k, 42));

        assert_eq!(waiter.await.unwrap().unwrap(), 42);
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails_cleanly() {
        let registry: WaitRegistry<u64> = WaitRegistry::default();
        let cancel = CancellationToken::new();

        let result = registry
            .wait(
                key(WaitOp::FileInfo, "agent-1"),
                Duration::from_millis(50),
                &cancel,
            )
            .await;

        assert!(matches!(result, Err(CoreError::Timeout(_))));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_fails_waiter() {
        let registry: WaitRegistry<u64> = WaitRegistry::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = registry
            .wait(
                key(WaitOp::FileUpload, "agent-1"),
                Duration::from_secs(5),
                &cancel,
            )
            .await;

        assert!(matches!(result, Err(CoreError::Cancelled)));
    }

    #[tokio::test]
    async fn test_complete_unknown_key_is_false() {
        let registry: WaitRegistry<u64> = WaitRegistry::default();
        assert!(!registry.complete(&key(WaitOp::FileInfo, "nobody"), 1));
    }

    #[tokio::test]
    async fn test_fail_all_for_party() {
        let registry: WaitRegistry<u64> = WaitRegistry::default();
        let cancel = CancellationToken::new();

        let k1 = key(WaitOp::FileInfo, "Agent-1");
        let k2 = key(WaitOp::FileUpload, "agent-1");
        let k3 = key(WaitOp::FileInfo, "agent-2");

        let mut handles = Vec::new();
        for k in [k1, k2, k3.clone()] {
            let registry = registry.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                registry.wait(k, Duration::from_secs(5), &cancel).await
            }));
        }
        tokio::task::yield_now().await;
        assert_eq!(registry.len(), 3);

        // Party matching is case-insensitive; agent-2 is untouched.
        registry.fail_all_for(
            "AGENT-1",
            || CoreError::AgentDisconnected("agent-1".into()),
        );

        let r1 = handles.remove(0).await.unwrap();
        let r2 = handles.remove(0).await.unwrap();
        assert!(matches!(r1, Err(CoreError::AgentDisconnected(_))));
        assert!(matches!(r2, Err(CoreError::AgentDisconnected(_))));

        assert_eq!(registry.len(), 1);
        assert!(registry.complete(&k3, 7));
        assert_eq!(handles.remove(0).await.unwrap().unwrap(), 7);
    }
}
