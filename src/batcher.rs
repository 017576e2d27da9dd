//! Per-session signal buffer shared by the frame loop and the upload worker.

use crate::signal::Signal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// What `append` does when the buffer is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest pending signal to make room
    #[default]
    DropOldest,
    /// Keep what is queued and discard the incoming signal
    RejectNew,
}

/// Result of a single append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Queued,
    DroppedOldest,
    Rejected,
}

/// Ordered copy of the pending signals, tagged for later acknowledgement
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Sequence number of the last signal included
    pub last_seq: u64,
    pub signals: Vec<Signal>,
}

#[derive(Debug, Default)]
struct Inner {
    pending: VecDeque<(u64, Signal)>,
    next_seq: u64,
    dropped: u64,
}

/// Bounded FIFO of signals awaiting delivery
#[derive(Debug)]
pub struct SignalBatcher {
    inner: Mutex<Inner>,
    capacity: usize,
    policy: OverflowPolicy,
}

impl SignalBatcher {
    #[must_use]
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity: capacity.max(1),
            policy,
        }
    }

    // A panic elsewhere must not take the frame loop down with it
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Queue a signal in arrival order
    pub fn append(&self, signal: Signal) -> AppendOutcome {
        let mut inner = self.lock();
        let mut outcome = AppendOutcome::Queued;
        if inner.pending.len() >= self.capacity {
            match self.policy {
                OverflowPolicy::DropOldest => {
                    inner.pending.pop_front();
                    outcome = AppendOutcome::DroppedOldest;
                }
                OverflowPolicy::RejectNew => {
                    inner.dropped += 1;
                    return AppendOutcome::Rejected;
                }
            }
            inner.dropped += 1;
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.pending.push_back((seq, signal));
        outcome
    }

    /// Take every pending signal and leave the buffer empty
    pub fn drain(&self) -> Vec<Signal> {
        let mut inner = self.lock();
        inner.pending.drain(..).map(|(_, s)| s).collect()
    }

    /// Copy of the pending signals; `None` when there is nothing to send
    pub fn snapshot(&self) -> Option<Snapshot> {
        let inner = self.lock();
        let (last_seq, _) = inner.pending.back()?;
        Some(Snapshot {
            last_seq: *last_seq,
            signals: inner.pending.iter().map(|(_, s)| s.clone()).collect(),
        })
    }

    /// Remove signals up to and including `last_seq`. Signals appended after the
    /// snapshot was taken stay queued. Returns how many were removed.
    pub fn acknowledge(&self, last_seq: u64) -> usize {
        let mut inner = self.lock();
        let before = inner.pending.len();
        while inner.pending.front().is_some_and(|(seq, _)| *seq <= last_seq) {
            inner.pending.pop_front();
        }
        before - inner.pending.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().pending.is_empty()
    }

    /// Signals lost to the overflow policy since creation
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(ts: f64) -> Signal {
        Signal::new(ts, "all")
    }

    fn timestamps(signals: &[Signal]) -> Vec<f64> {
        signals.iter().map(|s| s.timestamp).collect()
    }

    #[test]
    fn test_append_and_drain_preserve_order() {
        let batcher = SignalBatcher::new(10, OverflowPolicy::DropOldest);
        for i in 0..3 {
            assert_eq!(batcher.append(signal(f64::from(i))), AppendOutcome::Queued);
        }
        assert_eq!(timestamps(&batcher.drain()), vec![0.0, 1.0, 2.0]);
        assert!(batcher.is_empty());
        assert!(batcher.snapshot().is_none());
    }

    #[test]
    fn test_acknowledge_keeps_late_arrivals() {
        let batcher = SignalBatcher::new(10, OverflowPolicy::DropOldest);
        batcher.append(signal(1.0));
        batcher.append(signal(2.0));
        let snapshot = batcher.snapshot().unwrap();
        batcher.append(signal(3.0));

        assert_eq!(batcher.acknowledge(snapshot.last_seq), 2);
        assert_eq!(timestamps(&batcher.drain()), vec![3.0]);
    }

    #[test]
    fn test_drop_oldest_policy() {
        let batcher = SignalBatcher::new(2, OverflowPolicy::DropOldest);
        batcher.append(signal(1.0));
        batcher.append(signal(2.0));
        assert_eq!(batcher.append(signal(3.0)), AppendOutcome::DroppedOldest);
        assert_eq!(batcher.dropped(), 1);
        assert_eq!(timestamps(&batcher.drain()), vec![2.0, 3.0]);
    }

    #[test]
    fn test_reject_new_policy() {
        let batcher = SignalBatcher::new(2, OverflowPolicy::RejectNew);
        batcher.append(signal(1.0));
        batcher.append(signal(2.0));
        assert_eq!(batcher.append(signal(3.0)), AppendOutcome::Rejected);
        assert_eq!(batcher.dropped(), 1);
        assert_eq!(timestamps(&batcher.drain()), vec![1.0, 2.0]);
    }

    #[test]
    fn test_acknowledge_after_eviction() {
        let batcher = SignalBatcher::new(2, OverflowPolicy::DropOldest);
        batcher.append(signal(1.0));
        batcher.append(signal(2.0));
        let snapshot = batcher.snapshot().unwrap();
        // Evicts 1.0 while the snapshot is in flight
        batcher.append(signal(3.0));

        assert_eq!(batcher.acknowledge(snapshot.last_seq), 1);
        assert_eq!(timestamps(&batcher.drain()), vec![3.0]);
    }
}
