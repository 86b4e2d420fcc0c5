//! One-shot timed events.
//!
//! The scheduler's only runtime dispatch is by event kind. Every event
//! carries the thread or sequence number it was created for and is
//! liveness-checked at dispatch by its handler; there is no scheduler-level
//! cancellation.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::common::{Cycle, InstSeqNum, ThreadId};
use crate::core::mem::Packet;

/// Event payload, dispatched at its scheduled tick.
#[derive(Clone, Debug)]
pub enum EventKind {
    /// Trap squash for a thread, scheduled `trap_latency` after commit
    /// observed the fault. Aborts if the thread left runahead state the
    /// event was created under.
    Trap { tid: ThreadId, in_runahead: bool },
    /// Forced runahead exit. Aborts if runahead already exited or a
    /// different period is active (the cause sequence number mismatches).
    RunaheadDeadline { tid: ThreadId, cause_seq: InstSeqNum },
    /// Delayed load writeback carrying forged or forwarded data.
    LoadWriteback { seq: InstSeqNum, pkt: Packet },
}

#[derive(Clone, Debug)]
pub struct Event {
    pub tick: Cycle,
    /// Monotone id, keeps dispatch order stable among same-tick events.
    id: u64,
    pub kind: EventKind,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.tick == other.tick && self.id == other.id
    }
}

impl Eq for Event {}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap: earliest tick first, then insertion order.
        other
            .tick
            .cmp(&self.tick)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Tick-ordered one-shot event queue.
#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<Event>,
    next_id: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, tick: Cycle, kind: EventKind) {
        let id = self.next_id;
        self.next_id += 1;
        self.heap.push(Event { tick, id, kind });
    }

    /// Pop the next event due at or before `now`.
    pub fn pop_due(&mut self, now: Cycle) -> Option<Event> {
        if self.heap.peek().map(|e| e.tick <= now).unwrap_or(false) {
            self.heap.pop()
        } else {
            None
        }
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
