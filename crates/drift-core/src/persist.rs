//! Transfer persistence seam.
//!
//! The engine persists every state transition synchronously before
//! observers are notified, and periodic snapshots while bytes move. The
//! durable implementation lives in its own crate; tests and ephemeral runs
//! use the in-memory store here.

use crate::error::Result;
use crate::transfer::Transfer;
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

/// Durable table of transfer snapshots keyed by identifier.
pub trait TransferStore: Send + Sync {
    /// Insert or replace a transfer snapshot.
    fn upsert(&self, transfer: &Transfer) -> Result<()>;

    /// Remove a transfer permanently.
    fn remove(&self, id: Uuid) -> Result<()>;

    /// All transfers whose persisted state is non-terminal; consumed by
    /// startup recovery.
    fn load_unfinished(&self) -> Result<Vec<Transfer>>;

    /// Every retained transfer.
    fn load_all(&self) -> Result<Vec<Transfer>>;
}

/// In-memory [`TransferStore`].
#[derive(Default)]
pub struct MemoryTransferStore {
    inner: Mutex<HashMap<Uuid, Transfer>>,
}

impl MemoryTransferStore {
    /// Number of stored transfers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// True when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Fetch one stored snapshot.
    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<Transfer> {
        self.inner.lock().get(&id).cloned()
    }
}

impl TransferStore for MemoryTransferStore {
    fn upsert(&self, transfer: &Transfer) -> Result<()> {
        self.inner.lock().insert(transfer.id, transfer.clone());
        Ok(())
    }

    fn remove(&self, id: Uuid) -> Result<()> {
        self.inner.lock().remove(&id);
        Ok(())
    }

    fn load_unfinished(&self) -> Result<Vec<Transfer>> {
        Ok(self
            .inner
            .lock()
            .values()
            .filter(|t| !t.is_terminal())
            .cloned()
            .collect())
    }

    fn load_all(&self) -> Result<Vec<Transfer>> {
        Ok(self.inner.lock().values().cloned().collect())
    }
}
