//! Reorder buffer.
//!
//! Per-thread FIFO of in-flight instructions between dispatch and
//! retirement. Provides:
//! 1. **Insertion** at the tail, bounded by capacity.
//! 2. **Head service** for commit (readiness check, retirement).
//! 3. **Age-bounded squashing:** at most `squash_width` entries marked per
//!    cycle, walking tail → head until the target sequence number.
//!
//! Instructions are owned by the `InstPool`; the ROB holds sequence numbers.

use std::collections::VecDeque;

use crate::common::{Cycle, InstSeqNum, ThreadId, MAX_THREADS};
use crate::core::inst::{DynInst, InstPool};
use crate::stats::SimStats;

/// Reorder buffer over pooled instructions.
#[derive(Debug)]
pub struct Rob {
    lists: Vec<VecDeque<InstSeqNum>>,
    num_entries: usize,
    squash_width: usize,
    /// Squash target per thread; entries with seq > target are squashed.
    squashed_seq_num: Vec<InstSeqNum>,
    done_squashing: Vec<bool>,
    num_in_rob: usize,
}

impl Rob {
    pub fn new(num_entries: usize, squash_width: usize) -> Self {
        Self {
            lists: (0..MAX_THREADS).map(|_| VecDeque::new()).collect(),
            num_entries,
            squash_width,
            squashed_seq_num: vec![0; MAX_THREADS],
            done_squashing: vec![true; MAX_THREADS],
            num_in_rob: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.num_entries
    }

    pub fn num_free_entries(&self) -> usize {
        self.num_entries - self.num_in_rob
    }

    pub fn is_full(&self) -> bool {
        self.num_in_rob == self.num_entries
    }

    pub fn is_empty(&self, tid: ThreadId) -> bool {
        self.lists[tid].is_empty()
    }

    pub fn count_insts(&self, tid: ThreadId) -> usize {
        self.lists[tid].len()
    }

    /// Append an instruction at the tail. The caller has already checked
    /// capacity; dispatch stalls rather than overflows.
    pub fn insert(&mut self, inst: &mut DynInst) {
        assert!(self.num_in_rob < self.num_entries, "ROB overflow");
        self.lists[inst.tid].push_back(inst.seq);
        inst.status.in_rob = true;
        self.num_in_rob += 1;
    }

    pub fn read_head(&self, tid: ThreadId) -> Option<InstSeqNum> {
        self.lists[tid].front().copied()
    }

    pub fn read_tail(&self, tid: ThreadId) -> Option<InstSeqNum> {
        self.lists[tid].back().copied()
    }

    /// The oldest head across all threads, by sequence number. Sequence
    /// numbers are unique, so ties are impossible.
    pub fn oldest_head(&self) -> Option<(ThreadId, InstSeqNum)> {
        self.lists
            .iter()
            .enumerate()
            .filter_map(|(tid, list)| list.front().map(|&seq| (tid, seq)))
            .min_by_key(|&(_, seq)| seq)
    }

    pub fn is_head_ready(&self, tid: ThreadId, pool: &InstPool) -> bool {
        self.read_head(tid)
            .and_then(|seq| pool.get(seq))
            .map(|inst| inst.ready_to_commit())
            .unwrap_or(false)
    }

    /// Remove the head. Exactly one of {squashed, committed} holds on the
    /// removed instruction. The instruction leaves the pool after a
    /// one-cycle grace.
    pub fn retire_head(&mut self, tid: ThreadId, pool: &mut InstPool, now: Cycle) {
        let seq = self.lists[tid].pop_front().expect("retire from empty ROB");
        self.num_in_rob -= 1;

        let inst = pool.get_mut(seq).expect("retired inst not in pool");
        assert!(inst.ready_to_commit());
        inst.status.in_rob = false;
        if !inst.status.squashed {
            inst.status.committed = true;
        }
        pool.retire(seq, now);
    }

    /// Begin squashing every entry younger than `squash_seq`.
    pub fn squash(&mut self, squash_seq: InstSeqNum, tid: ThreadId) {
        if self.lists[tid].is_empty() {
            return;
        }
        self.squashed_seq_num[tid] = squash_seq;
        self.done_squashing[tid] = false;
    }

    pub fn is_done_squashing(&self, tid: ThreadId) -> bool {
        self.done_squashing[tid]
    }

    /// One cycle of squash work: mark up to `squash_width` entries from the
    /// tail as squashed and committable so they can drain through commit.
    pub fn do_squash(&mut self, tid: ThreadId, pool: &mut InstPool, stats: &mut SimStats) {
        debug_assert!(!self.done_squashing[tid]);
        let target = self.squashed_seq_num[tid];

        let mut remaining = self.squash_width;
        for &seq in self.lists[tid].iter().rev() {
            if seq <= target {
                break;
            }
            let inst = pool.get_mut(seq).expect("squash target not in pool");
            // Marked on a previous cycle; costs no bandwidth.
            if inst.status.squashed {
                continue;
            }
            if remaining == 0 {
                // More work remains next cycle.
                return;
            }
            inst.status.squashed = true;
            inst.status.can_commit = true;
            stats.insts_squashed += 1;
            remaining -= 1;
        }

        // Every entry younger than the target is marked.
        self.done_squashing[tid] = true;
    }

    /// Linear scan for an entry, used to attach squash metadata for the
    /// fetch redirect.
    pub fn find_inst(&self, tid: ThreadId, seq: InstSeqNum) -> Option<InstSeqNum> {
        self.lists[tid].iter().copied().find(|&s| s == seq)
    }

    /// The restore precondition: the ROB is empty, still squashing, or
    /// holds only squashed instructions.
    pub fn arch_restore_sanity_check(&self, tid: ThreadId, pool: &InstPool) {
        let all_squashed = self.lists[tid]
            .iter()
            .all(|&seq| pool.get(seq).map(|i| i.status.squashed).unwrap_or(true));
        assert!(
            !self.done_squashing[tid] || self.lists[tid].is_empty() || all_squashed,
            "arch restore with live instructions in the ROB"
        );
    }
}
