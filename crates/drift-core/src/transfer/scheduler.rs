//! Per-direction scheduling loops.
//!
//! One loop per direction, woken on enqueue, slot release, and the
//! bandwidth tick. Each pass walks groups in descending priority and admits
//! transfers while global slots, group slots, and group bandwidth all have
//! headroom. Admission hands the transfer to a worker task.

use crate::groups::{GroupPolicy, QueueStrategy};
use crate::transfer::engine::{EngineInner, TransferKey};
use crate::transfer::governor::GOVERNOR_TICK;
use crate::transfer::state::{TransferDirection, TransferState};
use crate::transfer::worker;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

/// One admission candidate.
#[derive(Debug, Clone)]
struct Candidate {
    key: TransferKey,
    enqueued_at: SystemTime,
}

/// Run a direction's scheduler until shutdown.
pub(crate) async fn run(inner: Arc<EngineInner>, direction: TransferDirection) {
    tracing::debug!(%direction, "scheduler started");
    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            _ = inner.sched[direction.index()].notify.notified() => {}
            _ = tokio::time::sleep(GOVERNOR_TICK) => {}
        }

        while let Some((key, group)) = pick_next(&inner, direction) {
            admit(&inner, key, group, direction);
        }
    }
    tracing::debug!(%direction, "scheduler stopped");
}

/// Locally-queued candidates in a direction.
fn candidates(inner: &EngineInner, direction: TransferDirection) -> Vec<Candidate> {
    inner
        .registry
        .iter()
        .filter(|entry| entry.key().direction == direction)
        .filter_map(|entry| {
            let transfer = entry.value().transfer.read();
            (transfer.state == TransferState::QueuedLocally).then(|| Candidate {
                key: entry.key().clone(),
                enqueued_at: transfer.enqueued_at,
            })
        })
        .collect()
}

/// Choose the next admissible transfer, or `None` when nothing can go.
fn pick_next(
    inner: &EngineInner,
    direction: TransferDirection,
) -> Option<(TransferKey, String)> {
    let cands = candidates(inner, direction);
    if cands.is_empty() {
        return None;
    }

    let groups = inner.groups.load();
    let global_limit = {
        let options = inner.options.read();
        match direction {
            TransferDirection::Upload => options.upload_slots,
            TransferDirection::Download => options.download_slots,
        }
    };

    let slots = inner.sched[direction.index()].slots.lock();
    if slots.global_used >= global_limit {
        return None;
    }

    for policy in groups.by_priority() {
        let members: Vec<&Candidate> = cands
            .iter()
            .filter(|c| groups.group_for(&c.key.username).name == policy.name)
            .collect();
        if members.is_empty() {
            continue;
        }

        let used = slots.group_used.get(&policy.name).copied().unwrap_or(0);
        if used >= policy.slots {
            continue;
        }
        if !inner.governor.has_budget(direction, &policy.name) {
            continue;
        }

        let choice = select_within(policy, &members, &slots.last_served);
        return Some((choice.key.clone(), policy.name.clone()));
    }
    None
}

/// Apply the group's strategy to its queued members.
fn select_within<'a>(
    policy: &GroupPolicy,
    members: &[&'a Candidate],
    last_served: &HashMap<String, u64>,
) -> &'a Candidate {
    match policy.strategy {
        QueueStrategy::FirstInFirstOut => members
            .iter()
            .min_by(|a, b| {
                a.enqueued_at
                    .cmp(&b.enqueued_at)
                    .then(a.key.id.cmp(&b.key.id))
            })
            .copied()
            .unwrap_or(members[0]),
        QueueStrategy::RoundRobin => {
            // Least-recently-served user first; ties break on name so the
            // order is deterministic. FIFO among that user's transfers.
            let user = members
                .iter()
                .map(|c| c.key.username.as_str())
                .min_by_key(|name| (last_served.get(*name).copied().unwrap_or(0), *name))
                .unwrap_or(&members[0].key.username);
            members
                .iter()
                .filter(|c| c.key.username == user)
                .min_by(|a, b| {
                    a.enqueued_at
                        .cmp(&b.enqueued_at)
                        .then(a.key.id.cmp(&b.key.id))
                })
                .copied()
                .unwrap_or(members[0])
        }
    }
}

/// Take slots, advance the state, and spawn the worker.
fn admit(
    inner: &Arc<EngineInner>,
    key: TransferKey,
    group: String,
    direction: TransferDirection,
) {
    {
        let mut slots = inner.sched[direction.index()].slots.lock();
        slots.global_used += 1;
        *slots.group_used.entry(group.clone()).or_insert(0) += 1;
        slots.serve_seq += 1;
        let seq = slots.serve_seq;
        slots.last_served.insert(key.username.clone(), seq);
    }

    // Uploads start opening streams immediately; downloads first sit in the
    // remote peer's queue.
    let admitted_state = match direction {
        TransferDirection::Upload => TransferState::Initializing,
        TransferDirection::Download => TransferState::QueuedRemotely,
    };

    match inner.transition(&key, admitted_state, None) {
        Ok(_) => {
            tracing::debug!(id = %key.id, user = %key.username, %group, %direction, "transfer admitted");
            worker::spawn(Arc::clone(inner), key, group, direction);
        }
        Err(err) => {
            // Lost a race with cancellation; hand the slots back.
            tracing::debug!(id = %key.id, error = %err, "admission aborted");
            inner.release_slots(direction, &group);
        }
    }
}

/// The order every queued transfer would be admitted in if slots and
/// bandwidth were infinite; used for place-in-queue reporting.
pub(crate) fn queue_order(inner: &EngineInner, direction: TransferDirection) -> Vec<TransferKey> {
    let mut cands = candidates(inner, direction);
    let groups = inner.groups.load();
    let mut sim_last: HashMap<String, u64> = inner.sched[direction.index()]
        .slots
        .lock()
        .last_served
        .clone();
    let mut sim_seq = sim_last.values().copied().max().unwrap_or(0);

    let mut order = Vec::with_capacity(cands.len());
    while !cands.is_empty() {
        let mut picked: Option<usize> = None;
        for policy in groups.by_priority() {
            let members: Vec<&Candidate> = cands
                .iter()
                .filter(|c| groups.group_for(&c.key.username).name == policy.name)
                .collect();
            if members.is_empty() {
                continue;
            }
            let choice = select_within(policy, &members, &sim_last);
            picked = cands.iter().position(|c| c.key == choice.key);
            break;
        }

        // Every candidate belongs to some group, so a pick always exists.
        let Some(idx) = picked else { break };
        let candidate = cands.swap_remove(idx);
        sim_seq += 1;
        sim_last.insert(candidate.key.username.clone(), sim_seq);
        order.push(candidate.key);
    }
    order
}
