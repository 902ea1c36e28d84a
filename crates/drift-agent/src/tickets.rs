//! Pending upload tickets.
//!
//! A ticket is the pair of one-shot promises the controller holds while an
//! agent opens its data channel: the stream promise resolves when the HTTP
//! body arrives, and the completion promise (inside
//! [`drift_core::UploadCompletion`]) resolves when the transfer engine has
//! finished consuming the stream. Each ticket is consumed exactly once; the
//! concurrent map's atomic remove is the compare-and-swap that enforces it.

use dashmap::DashMap;
use drift_core::{CoreError, Result, UploadCompletion};
use drift_proto::ByteSource;
use tokio::sync::oneshot;
use uuid::Uuid;

type StreamPromise = oneshot::Sender<Result<(ByteSource, UploadCompletion)>>;

struct PendingTicket {
    agent: String,
    filename: String,
    stream: StreamPromise,
}

/// Table of pending upload tickets keyed by one-shot token.
#[derive(Default)]
pub struct TicketTable {
    inner: DashMap<Uuid, PendingTicket>,
}

impl TicketTable {
    /// Open a ticket; the returned receiver resolves when the agent's data
    /// channel arrives or the ticket fails.
    pub fn open(
        &self,
        token: Uuid,
        agent: &str,
        filename: &str,
    ) -> oneshot::Receiver<Result<(ByteSource, UploadCompletion)>> {
        let (tx, rx) = oneshot::channel();
        self.inner.insert(
            token,
            PendingTicket {
                agent: agent.to_lowercase(),
                filename: filename.to_string(),
                stream: tx,
            },
        );
        rx
    }

    /// Consume a ticket with the arrived stream. `false` when the ticket is
    /// gone (expired, failed, or already consumed).
    pub fn resolve(&self, token: Uuid, source: ByteSource, completion: UploadCompletion) -> bool {
        match self.inner.remove(&token) {
            Some((_, ticket)) => {
                tracing::debug!(agent = %ticket.agent, file = %ticket.filename, "ticket stream arrived");
                ticket.stream.send(Ok((source, completion))).is_ok()
            }
            None => false,
        }
    }

    /// Fail a ticket with an agent-reported error.
    pub fn fail(&self, token: Uuid, error: CoreError) -> bool {
        match self.inner.remove(&token) {
            Some((_, ticket)) => {
                tracing::debug!(agent = %ticket.agent, file = %ticket.filename, %error, "ticket failed");
                ticket.stream.send(Err(error)).is_ok()
            }
            None => false,
        }
    }

    /// Remove a ticket without resolving it; used when the waiter timed
    /// out. The receiver observes the drop.
    pub fn discard(&self, token: Uuid) -> bool {
        self.inner.remove(&token).is_some()
    }

    /// Fail every ticket held for an agent; called on agent disconnect.
    pub fn fail_all_for(&self, agent: &str) {
        let lowered = agent.to_lowercase();
        let tokens: Vec<Uuid> = self
            .inner
            .iter()
            .filter(|entry| entry.value().agent == lowered)
            .map(|entry| *entry.key())
            .collect();
        for token in tokens {
            self.fail(
                token,
                CoreError::AgentDisconnected(lowered.clone().into()),
            );
        }
    }

    /// Number of pending tickets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// True when no tickets are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
