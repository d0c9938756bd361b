use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Duration;

use hashbrown::HashMap;
use tokio::time::Instant;

use crate::types::{OperationId, Phase, Target};

/// Identity of one scheduled retry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RetryKey {
    pub operation_id: OperationId,
    pub target: Target,
    pub phase: Phase,
}

/// Cooperative timer queue polled by the coordinator loop.
///
/// Never blocks: the loop asks for [`RetryScheduler::next_due`], sleeps on its
/// own, then calls [`RetryScheduler::drain`]. Rescheduling a key supersedes the
/// earlier deadline; cancelled keys are dropped silently when drained.
#[derive(Debug, Default)]
pub struct RetryScheduler {
    heap: BinaryHeap<Reverse<(Instant, u64)>>,
    tokens: HashMap<u64, RetryKey>,
    live: HashMap<RetryKey, u64>,
    next_token: u64,
}

impl RetryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `key` to become due `delay` after `now`.
    pub fn schedule(&mut self, key: RetryKey, delay: Duration, now: Instant) {
        let token = self.next_token;
        self.next_token += 1;
        if let Some(old) = self.live.insert(key.clone(), token) {
            self.tokens.remove(&old);
        }
        self.tokens.insert(token, key);
        self.heap.push(Reverse((now + delay, token)));
    }

    /// Removes and returns every live key due at or before `now`, earliest first.
    pub fn drain(&mut self, now: Instant) -> Vec<RetryKey> {
        let mut due = Vec::new();
        while let Some(Reverse((at, token))) = self.heap.peek().copied() {
            if at > now {
                break;
            }
            self.heap.pop();
            let Some(key) = self.tokens.remove(&token) else {
                continue;
            };
            if self.live.get(&key) == Some(&token) {
                self.live.remove(&key);
                due.push(key);
            }
        }
        due
    }

    pub fn next_due(&mut self) -> Option<Instant> {
        while let Some(Reverse((at, token))) = self.heap.peek().copied() {
            if self.tokens.contains_key(&token) {
                return Some(at);
            }
            self.heap.pop();
        }
        None
    }

    /// Cancels every pending retry of `operation_id` in `phase`.
    pub fn cancel_operation(&mut self, operation_id: &OperationId, phase: Phase) -> usize {
        let doomed: Vec<RetryKey> = self
            .live
            .keys()
            .filter(|k| &k.operation_id == operation_id && k.phase == phase)
            .cloned()
            .collect();
        for key in &doomed {
            if let Some(token) = self.live.remove(key) {
                self.tokens.remove(&token);
            }
        }
        doomed.len()
    }

    pub fn is_scheduled(&self, key: &RetryKey) -> bool {
        self.live.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}
