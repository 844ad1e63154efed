//! The store-and-forward outbox.
//!
//! Messages whose destination is unreachable wait here, ordered by
//! priority then enqueue time. Retry pacing is per destination (one flaky
//! peer backs off as a unit instead of each message probing separately);
//! the backoff is exponential with jitter. The engine mirrors every
//! mutation to `weft-db` so the queue survives restarts.

use std::collections::HashMap;

use rand::Rng;

use weft_types::queue::{Priority, QueuedMessage};
use weft_types::{MessageId, PeerId};

/// Why an enqueue was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnqueueRejected {
    /// The queue is full of equal-or-higher-priority traffic.
    QueueFull,
}

/// Result of a successful enqueue.
#[derive(Debug, Default, PartialEq)]
pub struct Enqueued {
    /// An entry evicted to make room, if any.
    pub evicted: Option<QueuedMessage>,
}

#[derive(Clone, Copy, Debug, Default)]
struct DestinationBackoff {
    attempts: u32,
    next_attempt_ms: u64,
}

/// Priority-ordered outbox with per-destination retry pacing.
pub struct SendQueue {
    entries: Vec<QueuedMessage>,
    backoff: HashMap<PeerId, DestinationBackoff>,
    max_size: usize,
    base_backoff_ms: u64,
    cap_backoff_ms: u64,
}

impl SendQueue {
    /// Create a queue bounded at `max_size` entries.
    pub fn new(max_size: usize, base_backoff_ms: u64, cap_backoff_ms: u64) -> Self {
        Self {
            entries: Vec::new(),
            backoff: HashMap::new(),
            max_size: max_size.max(1),
            base_backoff_ms: base_backoff_ms.max(1),
            cap_backoff_ms,
        }
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Seed the queue from persisted entries (restart path).
    pub fn load(&mut self, entries: Vec<QueuedMessage>) {
        self.entries = entries;
        self.entries
            .sort_by_key(|e| (std::cmp::Reverse(e.priority), e.created_at_ms));
        self.entries.truncate(self.max_size);
    }

    /// Park a message. When full, the lowest-priority, oldest entry is
    /// evicted to make room; a message below everything already queued is
    /// refused instead.
    pub fn enqueue(&mut self, msg: QueuedMessage) -> Result<Enqueued, EnqueueRejected> {
        let mut result = Enqueued::default();
        if self.entries.len() >= self.max_size {
            let victim_index = self
                .entries
                .iter()
                .enumerate()
                .min_by_key(|(_, e)| (e.priority, e.created_at_ms))
                .map(|(i, _)| i)
                .ok_or(EnqueueRejected::QueueFull)?;
            if self.entries[victim_index].priority > msg.priority {
                return Err(EnqueueRejected::QueueFull);
            }
            result.evicted = Some(self.entries.remove(victim_index));
        }
        self.entries.push(msg);
        Ok(result)
    }

    /// Messages ready to try now: destination reachable, destination not
    /// backing off, entry not expired. Ordered by priority, then enqueue
    /// time.
    pub fn ready(
        &self,
        now_ms: u64,
        reachable: impl Fn(&PeerId) -> bool,
    ) -> Vec<QueuedMessage> {
        let mut ready: Vec<QueuedMessage> = self
            .entries
            .iter()
            .filter(|e| !e.is_expired(now_ms))
            .filter(|e| {
                self.backoff
                    .get(&e.destination)
                    .map(|b| now_ms >= b.next_attempt_ms)
                    .unwrap_or(true)
            })
            .filter(|e| reachable(&e.destination))
            .cloned()
            .collect();
        ready.sort_by_key(|e| (std::cmp::Reverse(e.priority), e.created_at_ms));
        ready
    }

    /// Record a delivery success: the entry leaves the queue and the
    /// destination's backoff resets.
    pub fn delivered(&mut self, id: &MessageId) -> Option<QueuedMessage> {
        let index = self.entries.iter().position(|e| e.id == *id)?;
        let msg = self.entries.remove(index);
        self.backoff.remove(&msg.destination);
        Some(msg)
    }

    /// Record a delivery failure: the entry's attempt counters move and
    /// the whole destination backs off exponentially with jitter.
    pub fn failed_attempt(&mut self, id: &MessageId, now_ms: u64) {
        let Some(entry) = self.entries.iter_mut().find(|e| e.id == *id) else {
            return;
        };
        entry.attempts += 1;
        entry.last_attempt_at_ms = Some(now_ms);
        let destination = entry.destination;

        let backoff = self.backoff.entry(destination).or_default();
        backoff.attempts += 1;
        let exp = self
            .base_backoff_ms
            .saturating_mul(1u64 << backoff.attempts.min(20))
            .min(self.cap_backoff_ms);
        let jitter = rand::thread_rng().gen_range(0..self.base_backoff_ms);
        backoff.next_attempt_ms = now_ms + exp + jitter;
    }

    /// Remove and return entries past their TTL or attempt budget.
    pub fn take_expired(&mut self, now_ms: u64, max_attempts: u32) -> Vec<QueuedMessage> {
        let mut expired = Vec::new();
        let mut index = 0;
        while index < self.entries.len() {
            let e = &self.entries[index];
            if e.is_expired(now_ms) || e.attempts > max_attempts {
                expired.push(self.entries.remove(index));
            } else {
                index += 1;
            }
        }
        expired
    }

    /// Cancel a queued message before delivery.
    pub fn cancel(&mut self, id: &MessageId) -> Option<QueuedMessage> {
        let index = self.entries.iter().position(|e| e.id == *id)?;
        Some(self.entries.remove(index))
    }

    /// Destinations with at least one queued entry.
    pub fn destinations(&self) -> Vec<PeerId> {
        let mut seen = Vec::new();
        for e in &self.entries {
            if !seen.contains(&e.destination) {
                seen.push(e.destination);
            }
        }
        seen
    }

    /// Look up an entry by ID.
    pub fn get(&self, id: &MessageId) -> Option<&QueuedMessage> {
        self.entries.iter().find(|e| e.id == *id)
    }
}
