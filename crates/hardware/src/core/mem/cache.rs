//! Memory-hierarchy timing model.
//!
//! A deliberately small stand-in for a coherent cache hierarchy. Each block
//! lives at some depth (0 = innermost cache, last = main memory); an access
//! completes after the latency of the level that holds the block and then
//! promotes the block to depth 0. Backing data is a flat byte array.
//!
//! The model exposes the two things the runahead core actually needs from a
//! memory system: per-request *access depth* (the LLL trigger) and timing
//! responses with back-pressure.

use std::collections::HashMap;
use std::collections::VecDeque;

use crate::common::{Addr, Cycle};
use crate::config::MemoryConfig;

use super::packet::{HtmCacheFailure, Packet};
use super::port::MemPort;

/// Block size used for depth bookkeeping.
const DEPTH_BLOCK_SIZE: u64 = 64;

/// A response waiting for its completion tick.
#[derive(Debug)]
struct PendingResp {
    ready_at: Cycle,
    pkt: Packet,
}

/// Fixed-latency multi-level memory model with depth reporting.
#[derive(Debug)]
pub struct MemoryHierarchy {
    /// Latency per level, innermost first; the last level is memory.
    level_latencies: Vec<u64>,
    /// Current depth of each block. Absent means resident in memory only.
    block_depth: HashMap<u64, usize>,
    /// Forced depth overrides, used by tests to stage LLLs.
    forced_depth: HashMap<u64, usize>,
    /// Addresses whose transactional accesses fail, with the cache code.
    htm_fail: HashMap<u64, HtmCacheFailure>,
    backing: Vec<u8>,
    /// Responses in flight.
    pending: VecDeque<PendingResp>,
    /// Occupied port slots; sends block when full.
    slots: usize,
    in_flight: usize,
    /// A send was refused while blocked; a retry is owed when a slot frees.
    retry_pending: bool,
}

impl MemoryHierarchy {
    pub fn new(config: &MemoryConfig) -> Self {
        assert!(!config.level_latencies.is_empty());
        Self {
            level_latencies: config.level_latencies.clone(),
            block_depth: HashMap::new(),
            forced_depth: HashMap::new(),
            htm_fail: HashMap::new(),
            backing: vec![0; config.mem_size as usize],
            pending: VecDeque::new(),
            slots: config.port_slots,
            in_flight: 0,
            retry_pending: false,
        }
    }

    fn block_of(addr: Addr) -> u64 {
        addr / DEPTH_BLOCK_SIZE
    }

    /// Depth the hierarchy would service this address at.
    pub fn depth_of(&self, addr: Addr) -> usize {
        let block = Self::block_of(addr);
        if let Some(&d) = self.forced_depth.get(&block) {
            return d;
        }
        self.block_depth
            .get(&block)
            .copied()
            .unwrap_or(self.level_latencies.len() - 1)
    }

    /// Pin the depth of the block containing `addr`. Test hook for staging
    /// long-latency loads.
    pub fn force_depth(&mut self, addr: Addr, depth: usize) {
        assert!(depth < self.level_latencies.len());
        self.forced_depth.insert(Self::block_of(addr), depth);
    }

    /// Make transactional accesses to `addr` fail with the given cache code.
    pub fn force_htm_failure(&mut self, addr: Addr, code: HtmCacheFailure) {
        self.htm_fail.insert(Self::block_of(addr), code);
    }

    /// Whether an address is backed by modeled memory.
    pub fn in_range(&self, addr: Addr, size: usize) -> bool {
        (addr as usize).saturating_add(size) <= self.backing.len()
    }

    /// Direct backing-store read, bypassing timing. Used by tests and the
    /// loader.
    pub fn peek(&self, addr: Addr, size: usize) -> &[u8] {
        &self.backing[addr as usize..addr as usize + size]
    }

    /// Direct backing-store write, bypassing timing.
    pub fn poke(&mut self, addr: Addr, data: &[u8]) {
        self.backing[addr as usize..addr as usize + data.len()].copy_from_slice(data);
    }

    /// Responses whose completion tick has arrived.
    pub fn take_due(&mut self, now: Cycle) -> Vec<Packet> {
        let mut due = Vec::new();
        let mut rest = VecDeque::new();
        while let Some(resp) = self.pending.pop_front() {
            if resp.ready_at <= now {
                self.in_flight -= 1;
                due.push(resp.pkt);
            } else {
                rest.push_back(resp);
            }
        }
        self.pending = rest;
        due
    }

    /// A retry is owed and a slot is now free.
    pub fn should_retry(&mut self) -> bool {
        if self.retry_pending && self.in_flight < self.slots {
            self.retry_pending = false;
            true
        } else {
            false
        }
    }
}

impl MemPort for MemoryHierarchy {
    fn send_timing_req(&mut self, pkt: &Packet, now: Cycle) -> bool {
        if self.in_flight >= self.slots {
            self.retry_pending = true;
            return false;
        }

        let depth = self.depth_of(pkt.addr);
        let latency = self.level_latencies[depth];

        let mut resp = pkt.clone();
        if resp.htm_uid.is_some() {
            if let Some(&code) = self.htm_fail.get(&Self::block_of(pkt.addr)) {
                resp.htm_failure = Some(code);
            }
        }

        if pkt.is_write() {
            let base = pkt.addr as usize;
            self.backing[base..base + pkt.size].copy_from_slice(&pkt.data);
        } else {
            let base = pkt.addr as usize;
            resp.data = self.backing[base..base + pkt.size].to_vec();
        }
        resp.make_response();

        // Servicing promotes the block to the innermost level.
        self.block_depth.insert(Self::block_of(pkt.addr), 0);
        self.forced_depth.remove(&Self::block_of(pkt.addr));

        self.in_flight += 1;
        self.pending.push_back(PendingResp { ready_at: now + latency, pkt: resp });
        true
    }

    fn access_depth(&self, pkt: &Packet) -> usize {
        self.depth_of(pkt.addr)
    }
}
