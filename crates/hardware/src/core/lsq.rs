//! Load/store queue unit.
//!
//! Tracks every in-flight memory instruction between dispatch and
//! retirement. Provides:
//! 1. **Dual-path dispatch in runahead:** stores go only to the runahead
//!    cache; loads probe the runahead cache and the data cache in parallel,
//!    with the runahead cache preferred.
//! 2. **Store-to-load forwarding** with poison inheritance and a strict ban
//!    on forwarding runahead store data to non-runahead loads.
//! 3. **Response forging** so a long-latency load can drain out of the
//!    pipeline during runahead.
//! 4. **Memory-ordering checks** when stores and atomics execute.
//! 5. **HTM nesting counters** and uid recovery across squashes.

use crate::common::{Addr, Cycle, Fault, HtmFailureCause, InstSeqNum};
use crate::core::inst::InstPool;
use crate::core::mem::{HtmCacheFailure, MemPort, Packet};
use crate::core::rcache::RunaheadCache;
use crate::sim::events::{EventKind, EventQueue};
use crate::stats::SimStats;

/// Maximum bytes a single access may touch.
pub const MAX_DATA_BYTES: usize = 8;

/// Lifecycle of an LSQ request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestState {
    NotIssued,
    Issued,
    Complete,
    Discarded,
}

/// A memory request bundle: one or more sub-ranges (split accesses), the
/// runahead provenance flags, and poison picked up from the runahead cache.
#[derive(Clone, Debug)]
pub struct LsqRequest {
    pub seq: InstSeqNum,
    pub addr: Addr,
    pub size: usize,
    /// Sub-ranges the access splits into at runahead-cache block
    /// boundaries.
    pub sub_ranges: Vec<(Addr, usize)>,
    /// Copied from the instruction at issue.
    pub runahead: bool,
    /// The runahead cache answered (or will answer) this request; data
    /// cache replies must be ignored.
    pub rcache_expected: bool,
    /// Poison propagated from runahead cache blocks.
    pub poisoned: bool,
    /// Deepest memory-hierarchy level any sub-range would hit.
    pub depth: usize,
    pub state: RequestState,
}

impl LsqRequest {
    fn new(seq: InstSeqNum, addr: Addr, size: usize, runahead: bool, block: u64) -> Self {
        Self {
            seq,
            addr,
            size,
            sub_ranges: split_ranges(addr, size, block),
            runahead,
            rcache_expected: false,
            poisoned: false,
            depth: 0,
            state: RequestState::NotIssued,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state == RequestState::Complete
    }
}

/// Split `[addr, addr+size)` at `block`-byte boundaries.
fn split_ranges(addr: Addr, size: usize, block: u64) -> Vec<(Addr, usize)> {
    let mut ranges = Vec::new();
    let mut cur = addr;
    let end = addr + size as u64;
    while cur < end {
        let next_boundary = (cur / block + 1) * block;
        let stop = next_boundary.min(end);
        ranges.push((cur, (stop - cur) as usize));
        cur = stop;
    }
    ranges
}

/// Store queue entry.
///
/// Carries its own runahead/poison flags, derived from the instruction at
/// dispatch and execute: the entry can outlive the instruction record (a
/// store drains after retirement) and must still route correctly.
#[derive(Clone, Debug, Default)]
struct SqEntry {
    valid: bool,
    seq: InstSeqNum,
    size: usize,
    data: [u8; MAX_DATA_BYTES],
    addr: Option<Addr>,
    /// Committed by the ROB; eligible for writeback.
    can_wb: bool,
    /// Writeback handed to the memory system (or runahead cache).
    committed: bool,
    completed: bool,
    atomic: bool,
    runahead: bool,
    poisoned: bool,
}

/// Load queue entry.
#[derive(Clone, Debug, Default)]
struct LqEntry {
    valid: bool,
    seq: InstSeqNum,
    request: Option<LsqRequest>,
}

/// How a store's address range covers a load's.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AddrRangeCoverage {
    No,
    Partial,
    Full,
}

/// Outcome of executing a load.
#[derive(Debug)]
pub enum LoadOutcome {
    /// A writeback event is on its way (forwarding or cache response).
    Issued,
    /// Partial store overlap: the load stalled and will be replayed when
    /// the blocking store completes.
    Stalled,
    /// The data port refused the request; replay on retry.
    Blocked,
}

/// Action the CPU must take after a memory response.
#[derive(Debug, Default)]
pub struct RespAction {
    /// The instruction that caused runahead got its real response; commit
    /// should be signalled that runahead may exit.
    pub lll_returned: bool,
    /// The response completed this instruction's writeback.
    pub writeback: Option<InstSeqNum>,
}

/// The load/store queue unit.
#[derive(Debug)]
pub struct LsqUnit {
    loads: Vec<LqEntry>,
    stores: Vec<SqEntry>,
    lq_head: usize,
    lq_tail: usize,
    lq_count: usize,
    sq_head: usize,
    sq_tail: usize,
    sq_count: usize,
    /// Next store to write back (logical offset from the queue head).
    store_wb_offset: usize,
    stores_to_wb: usize,

    /// Runahead-cache block size, the split granularity.
    rcache_block: u64,

    /// Partial-forwarding stall bookkeeping.
    stalled: bool,
    stalling_store_sn: InstSeqNum,
    stalling_load_idx: usize,
    /// Loads to hand back to IEW for replay.
    pub pending_replays: Vec<InstSeqNum>,
    /// Loads refused by a blocked port, replayed on retry.
    pub blocked_insts: Vec<InstSeqNum>,

    /// Youngest load that must re-execute after an ordering violation.
    pub mem_dep_violator: Option<InstSeqNum>,

    /// TSO: only one store may be in flight.
    needs_tso: bool,
    store_in_flight: bool,

    /// HTM nesting counters, clamped at zero when squashed.
    pub htm_starts: usize,
    pub htm_stops: usize,
    last_retired_htm_uid: u64,
    next_htm_uid: u64,
}

impl LsqUnit {
    pub fn new(lq_entries: usize, sq_entries: usize, rcache_block: u64, needs_tso: bool) -> Self {
        Self {
            loads: vec![LqEntry::default(); lq_entries],
            stores: vec![SqEntry::default(); sq_entries],
            lq_head: 0,
            lq_tail: 0,
            lq_count: 0,
            sq_head: 0,
            sq_tail: 0,
            sq_count: 0,
            store_wb_offset: 0,
            stores_to_wb: 0,
            rcache_block,
            stalled: false,
            stalling_store_sn: 0,
            stalling_load_idx: 0,
            pending_replays: Vec::new(),
            blocked_insts: Vec::new(),
            mem_dep_violator: None,
            needs_tso,
            store_in_flight: false,
            htm_starts: 0,
            htm_stops: 0,
            last_retired_htm_uid: 0,
            next_htm_uid: 1,
        }
    }

    pub fn lq_full(&self) -> bool {
        self.lq_count == self.loads.len()
    }

    pub fn sq_full(&self) -> bool {
        self.sq_count == self.stores.len()
    }

    pub fn num_loads(&self) -> usize {
        self.lq_count
    }

    pub fn num_stores(&self) -> usize {
        self.sq_count
    }

    pub fn has_stores_to_wb(&self) -> bool {
        self.stores_to_wb > 0
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    /// Any store older than `seq` still in the queue. Strictly-ordered
    /// loads wait until this clears.
    pub fn has_older_stores(&self, seq: InstSeqNum) -> bool {
        (0..self.sq_count).any(|off| {
            let entry = &self.stores[(self.sq_head + off) % self.stores.len()];
            entry.valid && entry.seq < seq
        })
    }

    /// The uid for a new transactional access: the most recent valid
    /// HtmStart in flight, else the last retired uid.
    pub fn current_htm_uid(&self, pool: &InstPool) -> u64 {
        let mut uid = self.last_retired_htm_uid;
        for off in 0..self.lq_count {
            let entry = &self.loads[(self.lq_head + off) % self.loads.len()];
            if !entry.valid {
                continue;
            }
            if let Some(inst) = pool.get(entry.seq) {
                if inst.op.is_htm_start() && !inst.is_squashed() {
                    uid = inst.htm_uid.unwrap_or(uid);
                }
            }
        }
        uid
    }

    /// Dispatch a load (or HTM marker) into the load queue.
    pub fn insert_load(&mut self, pool: &mut InstPool, seq: InstSeqNum) {
        assert!(!self.lq_full(), "load queue overflow");
        let idx = self.lq_tail;
        self.loads[idx] = LqEntry { valid: true, seq, request: None };
        self.lq_tail = (self.lq_tail + 1) % self.loads.len();
        self.lq_count += 1;

        let inst = pool.get_mut(seq).expect("dispatched inst not in pool");
        inst.lq_idx = Some(idx);
        if inst.op.is_htm_start() {
            inst.htm_uid = Some(self.next_htm_uid);
            self.next_htm_uid += 1;
            self.htm_starts += 1;
        }
        if inst.op.is_htm_stop() {
            self.htm_stops += 1;
        }
    }

    /// Nesting depth of the current transaction, if any.
    pub fn in_htm_transaction(&self) -> bool {
        self.htm_starts > self.htm_stops
    }

    /// Dispatch a store or atomic into the store queue.
    pub fn insert_store(&mut self, pool: &mut InstPool, seq: InstSeqNum) {
        assert!(!self.sq_full(), "store queue overflow");
        let idx = self.sq_tail;
        let (atomic, runahead) = pool
            .get(seq)
            .map(|inst| (inst.op.is_atomic(), inst.is_runahead()))
            .unwrap_or((false, false));
        self.stores[idx] = SqEntry {
            valid: true,
            seq,
            size: 0,
            data: [0; MAX_DATA_BYTES],
            addr: None,
            can_wb: false,
            committed: false,
            completed: false,
            atomic,
            runahead,
            poisoned: false,
        };
        self.sq_tail = (self.sq_tail + 1) % self.stores.len();
        self.sq_count += 1;

        let inst = pool.get_mut(seq).expect("dispatched inst not in pool");
        inst.sq_idx = Some(idx);
    }

    /// Record a store's resolved address and data (store execute).
    ///
    /// Returns the ordering fault to attach to a conflicting younger load,
    /// if the scan found one.
    pub fn execute_store(
        &mut self,
        pool: &mut InstPool,
        seq: InstSeqNum,
        addr: Addr,
        data: &[u8],
    ) -> Option<InstSeqNum> {
        let (idx, runahead, poisoned) = {
            let inst = pool.get(seq).expect("store executed without pool entry");
            (
                inst.sq_idx.expect("store executed without an SQ slot"),
                inst.is_runahead(),
                inst.is_poisoned(),
            )
        };

        let entry = &mut self.stores[idx];
        debug_assert!(entry.valid && entry.seq == seq);
        entry.addr = Some(addr);
        entry.size = data.len();
        entry.data[..data.len()].copy_from_slice(data);
        entry.runahead = runahead;
        entry.poisoned = poisoned;

        self.check_violations(pool, seq, addr, data.len())
    }

    /// Mark an executed store eligible for writeback once committed
    /// (store-conditionals and atomics writeback before commit in the
    /// original; here everything drains at commit).
    fn mark_can_wb(&mut self, idx: usize) {
        if !self.stores[idx].can_wb {
            self.stores[idx].can_wb = true;
            self.stores_to_wb += 1;
        }
    }

    /// Scan loads younger than an executing store/atomic for address
    /// overlap. The oldest intersecting load that has already executed (or
    /// any overlapping load under TSO) takes a ReExec fault and is recorded
    /// as the memory-dependence violator.
    fn check_violations(
        &mut self,
        pool: &mut InstPool,
        store_seq: InstSeqNum,
        addr: Addr,
        size: usize,
    ) -> Option<InstSeqNum> {
        let store_start = addr;
        let store_end = addr + size as u64;

        let mut violator: Option<InstSeqNum> = None;
        for off in 0..self.lq_count {
            let entry = &self.loads[(self.lq_head + off) % self.loads.len()];
            if !entry.valid || entry.seq <= store_seq {
                continue;
            }
            let Some(inst) = pool.get(entry.seq) else { continue };
            if inst.is_squashed() || inst.op.is_strictly_ordered() {
                continue;
            }
            let Some(ld_addr) = inst.eff_addr else { continue };
            let ld_start = ld_addr;
            let ld_end = ld_addr + inst.eff_size as u64;

            let overlap = store_end > ld_start && store_start < ld_end;
            if !overlap {
                continue;
            }
            if inst.is_executed() || self.needs_tso {
                match violator {
                    Some(v) if v <= entry.seq => {}
                    _ => violator = Some(entry.seq),
                }
            }
        }

        if let Some(v) = violator {
            match self.mem_dep_violator {
                Some(existing) if existing <= v => {}
                _ => {
                    self.mem_dep_violator = Some(v);
                    if let Some(inst) = pool.get_mut(v) {
                        inst.fault = Some(Fault::ReExec);
                    }
                }
            }
        }
        self.mem_dep_violator
    }

    /// Classify how an SQ entry covers a load's byte range.
    fn coverage(entry: &SqEntry, ld_addr: Addr, ld_size: usize, llsc: bool) -> AddrRangeCoverage {
        let Some(st_addr) = entry.addr else {
            return AddrRangeCoverage::No;
        };
        if entry.size == 0 {
            return AddrRangeCoverage::No;
        }
        let req_s = ld_addr;
        let req_e = ld_addr + ld_size as u64;
        let st_s = st_addr;
        let st_e = st_addr + entry.size as u64;

        let store_has_lower = req_s >= st_s;
        let store_has_upper = req_e <= st_e;
        let lower_overlaps = req_s < st_e;
        let upper_overlaps = req_e > st_s;

        if !entry.atomic && store_has_lower && store_has_upper && !llsc {
            AddrRangeCoverage::Full
        } else if (store_has_lower && lower_overlaps)
            || (store_has_upper && upper_overlaps)
            || (lower_overlaps && upper_overlaps)
        {
            AddrRangeCoverage::Partial
        } else {
            AddrRangeCoverage::No
        }
    }

    /// Execute a load: forward from the store queue if possible, otherwise
    /// probe the runahead cache (runahead loads) and the data cache.
    #[allow(clippy::too_many_arguments)]
    pub fn execute_load(
        &mut self,
        pool: &mut InstPool,
        rcache: &mut RunaheadCache,
        port: &mut dyn MemPort,
        events: &mut EventQueue,
        stats: &mut SimStats,
        seq: InstSeqNum,
        now: Cycle,
    ) -> LoadOutcome {
        let (lq_idx, addr, size, ld_runahead, htm_uid) = {
            let inst = pool.get(seq).expect("load executed without pool entry");
            debug_assert!(!inst.is_squashed());
            // Poisoned loads never execute; IEW drains them directly.
            debug_assert!(!inst.is_poisoned());
            (
                inst.lq_idx.expect("load without an LQ slot"),
                inst.eff_addr.expect("load executed without an address"),
                inst.eff_size,
                inst.is_runahead(),
                inst.htm_uid,
            )
        };

        let mut request = LsqRequest::new(seq, addr, size, ld_runahead, self.rcache_block);

        // Store-to-load forwarding: scan newest-to-oldest between the
        // load's position and the writeback pointer.
        let lq_seq = seq;
        let mut scan = self.sq_count;
        while scan > self.store_wb_offset {
            scan -= 1;
            let idx = (self.sq_head + scan) % self.stores.len();
            let entry = &self.stores[idx];
            if !entry.valid || entry.seq >= lq_seq {
                continue;
            }
            let store_runahead = entry.runahead;
            let store_poisoned = entry.poisoned;

            // Runahead stores must never feed normal loads; skip them
            // entirely.
            if store_runahead && !ld_runahead {
                continue;
            }

            match Self::coverage(entry, addr, size, false) {
                AddrRangeCoverage::Full => {
                    let shift = (addr - entry.addr.unwrap()) as usize;
                    let mut data = vec![0u8; size];
                    data.copy_from_slice(&entry.data[shift..shift + size]);

                    if store_poisoned {
                        pool.get_mut(seq).unwrap().set_poisoned();
                        stats.forwarded_poisons += 1;
                    }
                    if store_runahead && ld_runahead {
                        stats.forwarded_runahead_loads += 1;
                    }

                    let mut pkt = Packet::read_req(seq, addr, size);
                    pkt.data = data;
                    pkt.make_response();
                    events.schedule(now + 1, EventKind::LoadWriteback { seq, pkt });

                    request.state = RequestState::Complete;
                    self.loads[lq_idx].request = Some(request);
                    stats.forwarded_loads += 1;
                    return LoadOutcome::Issued;
                }
                AddrRangeCoverage::Partial => {
                    // Poison forwards even on partial coverage.
                    if store_poisoned {
                        pool.get_mut(seq).unwrap().set_poisoned();
                        stats.forwarded_poisons += 1;
                    }

                    // Stall until the blocking store completes, if this is
                    // the oldest load to do so.
                    if !self.stalled
                        || lq_seq < self.loads[self.stalling_load_idx].seq
                    {
                        self.stalled = true;
                        self.stalling_store_sn = entry.seq;
                        self.stalling_load_idx = lq_idx;
                    }

                    let inst = pool.get_mut(seq).unwrap();
                    inst.status.issued = false;
                    inst.eff_addr = None;
                    stats.rescheduled_loads += 1;

                    request.state = RequestState::Discarded;
                    self.loads[lq_idx].request = None;
                    return LoadOutcome::Stalled;
                }
                AddrRangeCoverage::No => {}
            }
        }

        // Runahead loads probe the runahead cache first.
        if ld_runahead {
            let mut hit_all = true;
            let mut poisoned = false;
            let mut data = vec![0u8; size];
            for &(sub_addr, sub_size) in &request.sub_ranges {
                let mut pkt = Packet::read_req(seq, sub_addr, sub_size);
                match rcache.read(&mut pkt, stats) {
                    Some(block_poisoned) => {
                        let off = (sub_addr - addr) as usize;
                        data[off..off + sub_size].copy_from_slice(&pkt.data);
                        poisoned |= block_poisoned;
                    }
                    None => {
                        hit_all = false;
                        break;
                    }
                }
            }

            if hit_all {
                request.rcache_expected = true;
                request.poisoned = poisoned;
                if poisoned {
                    pool.get_mut(seq).unwrap().set_poisoned();
                }

                let mut pkt = Packet::read_req(seq, addr, size);
                pkt.data = data;
                pkt.from_rcache = true;
                pkt.make_response();
                events.schedule(now + 1, EventKind::LoadWriteback { seq, pkt });
            }
        }

        // Issue to the data cache. For runahead loads this happens in
        // parallel with the runahead-cache probe; a data-cache reply is
        // ignored when the runahead cache answered.
        let mut pkt = Packet::read_req(seq, addr, size);
        pkt.htm_uid = htm_uid;
        request.depth = request
            .sub_ranges
            .iter()
            .map(|&(a, s)| {
                let sub = Packet::read_req(seq, a, s);
                port.access_depth(&sub)
            })
            .max()
            .unwrap_or(0);

        if !port.send_timing_req(&pkt, now) {
            if request.rcache_expected {
                // The runahead cache already answered; nothing to retry.
                request.state = RequestState::Issued;
                self.loads[lq_idx].request = Some(request);
                return LoadOutcome::Issued;
            }
            request.state = RequestState::NotIssued;
            self.loads[lq_idx].request = Some(request);
            self.blocked_insts.push(seq);
            return LoadOutcome::Blocked;
        }

        request.state = RequestState::Issued;
        let first_issue = pool.get(seq).unwrap().first_issue;
        if first_issue.is_none() {
            pool.get_mut(seq).unwrap().first_issue = Some(now);
        }
        self.loads[lq_idx].request = Some(request);
        LoadOutcome::Issued
    }

    /// Depth of the in-flight request of a load, if any. Commit reads this
    /// to detect long-latency loads at the ROB head.
    pub fn request_depth(&self, pool: &InstPool, seq: InstSeqNum) -> Option<usize> {
        let idx = pool.get(seq)?.lq_idx?;
        let entry = &self.loads[idx];
        if !entry.valid || entry.seq != seq {
            return None;
        }
        let req = entry.request.as_ref()?;
        if req.is_complete() {
            None
        } else {
            Some(req.depth)
        }
    }

    /// Forge a response for a long-latency load so it can drain: zeroed
    /// data, written back next cycle. Real responses arriving later are
    /// dropped via the forged-response flag.
    pub fn forge_response(
        &mut self,
        pool: &mut InstPool,
        events: &mut EventQueue,
        stats: &mut SimStats,
        seq: InstSeqNum,
        now: Cycle,
    ) {
        let inst = pool.get_mut(seq).expect("forging for unknown inst");
        debug_assert!(inst.op.is_load() && inst.has_request());

        let size = inst.eff_size.max(1);
        let addr = inst.eff_addr.unwrap_or(0);
        inst.mem_data = vec![0; size];
        inst.status.forged_response = true;

        let mut pkt = Packet::read_req(seq, addr, size);
        pkt.make_response();
        events.schedule(now + 1, EventKind::LoadWriteback { seq, pkt });
        stats.load_responses_forged += 1;
    }

    /// Handle a data-cache response. Returns what the CPU must do next.
    pub fn recv_timing_resp(
        &mut self,
        pool: &mut InstPool,
        stats: &mut SimStats,
        pkt: Packet,
        in_runahead: bool,
        runahead_cause: Option<InstSeqNum>,
    ) -> RespAction {
        let mut action = RespAction::default();
        let seq = pkt.seq;

        let Some(inst) = pool.get(seq) else {
            // Squashed and cleaned up before the reply arrived.
            stats.stale_squashed_packets += 1;
            return action;
        };

        // The runahead-causing load's real response is the exit signal,
        // regardless of what happens to the packet below.
        if inst.is_runahead() && runahead_cause == Some(seq) {
            action.lll_returned = true;
        }

        if inst.is_squashed() {
            stats.stale_squashed_packets += 1;
            return action;
        }

        // A forged response already wrote this instruction back.
        if inst.has_forged_response() {
            stats.dropped_forged_responses += 1;
            return action;
        }

        let lq_idx = inst.lq_idx;
        let sq_idx = inst.sq_idx;

        if let Some(idx) = lq_idx {
            let entry = &mut self.loads[idx];
            if entry.valid && entry.seq == seq {
                if let Some(req) = entry.request.as_mut() {
                    // The runahead cache answered; data-cache replies are
                    // ignored.
                    if req.rcache_expected && !pkt.from_rcache {
                        return action;
                    }
                    // A runahead request that outlived its period.
                    if req.runahead && !in_runahead {
                        stats.stale_runahead_packets += 1;
                        return action;
                    }
                    if req.state == RequestState::Discarded {
                        return action;
                    }
                    req.state = RequestState::Complete;
                }
            }

            let inst = pool.get_mut(seq).unwrap();
            if let Some(failure) = pkt.htm_failure {
                inst.fault = Some(Fault::HtmFailure(match failure {
                    HtmCacheFailure::FailSelf => HtmFailureCause::Size,
                    HtmCacheFailure::FailRemote => HtmFailureCause::Memory,
                    HtmCacheFailure::FailOther => HtmFailureCause::Other,
                }));
            }
            inst.mem_data = pkt.data.clone();
            action.writeback = Some(seq);
        } else if let Some(idx) = sq_idx {
            // Store writeback acknowledgment.
            if self.stores[idx].valid && self.stores[idx].seq == seq {
                if let Some(replay) = self.complete_store(idx) {
                    self.pending_replays.push(replay);
                }
            }
        }

        action
    }

    /// Apply a load writeback event (forged, forwarded, or runahead-cache
    /// data). Marks the instruction executed.
    pub fn writeback_load(&mut self, pool: &mut InstPool, pkt: &Packet) -> Option<InstSeqNum> {
        let inst = pool.get_mut(pkt.seq)?;
        if inst.is_squashed() {
            return None;
        }
        if !inst.status.forged_response || inst.mem_data.is_empty() {
            inst.mem_data = pkt.data.clone();
        }
        inst.set_executed();

        if let Some(idx) = inst.lq_idx {
            if self.loads[idx].valid && self.loads[idx].seq == pkt.seq {
                if let Some(req) = self.loads[idx].request.as_mut() {
                    req.state = RequestState::Complete;
                }
            }
        }
        Some(pkt.seq)
    }

    /// Writeback committed stores from the head of the queue. Runahead
    /// stores go only to the runahead cache; they ignore port availability
    /// and TSO gating entirely.
    pub fn writeback_stores(
        &mut self,
        rcache: &mut RunaheadCache,
        port: &mut dyn MemPort,
        stats: &mut SimStats,
        now: Cycle,
    ) {
        while self.stores_to_wb > 0 && self.store_wb_offset < self.sq_count {
            let idx = (self.sq_head + self.store_wb_offset) % self.stores.len();
            let (seq, can_wb, committed, size, runahead, poisoned) = {
                let e = &self.stores[idx];
                (e.seq, e.can_wb, e.committed, e.size, e.runahead, e.poisoned)
            };
            if !can_wb || committed {
                break;
            }

            if self.needs_tso && self.store_in_flight && !runahead {
                break;
            }

            // Zero-size stores (HTM markers routed down the store path in
            // the original) complete without touching memory.
            if size == 0 {
                self.stores[idx].committed = true;
                if let Some(replay) = self.complete_store(idx) {
                    self.pending_replays.push(replay);
                }
                self.store_wb_offset += 1;
                continue;
            }

            let addr = self.stores[idx].addr.expect("writeback of unresolved store");
            let data = self.stores[idx].data[..size].to_vec();

            if runahead {
                // Split at block boundaries and absorb into the runahead
                // cache. Never reaches the data cache.
                for (sub_addr, sub_size) in split_ranges(addr, size, self.rcache_block) {
                    let off = (sub_addr - addr) as usize;
                    let sub = Packet::write_req(seq, sub_addr, data[off..off + sub_size].to_vec());
                    rcache.handle_packet(&sub, poisoned, stats);
                }
                self.stores[idx].committed = true;
                if let Some(replay) = self.complete_store(idx) {
                    self.pending_replays.push(replay);
                }
                self.store_wb_offset += 1;
                continue;
            }

            debug_assert!(!poisoned, "non-runahead store is poisoned");
            let pkt = Packet::write_req(seq, addr, data);
            if !port.send_timing_req(&pkt, now) {
                // Port blocked; retry next cycle.
                break;
            }

            self.stores[idx].committed = true;
            if self.needs_tso {
                self.store_in_flight = true;
            }
            self.store_wb_offset += 1;
        }
    }

    /// A store finished. Clears the TSO in-flight bit and releases a load
    /// stalled on this store, returning it for replay.
    fn complete_store(&mut self, idx: usize) -> Option<InstSeqNum> {
        let entry = &mut self.stores[idx];
        entry.completed = true;
        if entry.can_wb {
            self.stores_to_wb -= 1;
        }
        // Runahead stores never occupied the port, so they cannot release
        // the TSO slot.
        if !entry.runahead {
            self.store_in_flight = false;
        }

        let seq = entry.seq;
        if self.stalled && self.stalling_store_sn == seq {
            self.stalled = false;
            self.stalling_store_sn = 0;
            let load_idx = self.stalling_load_idx;
            self.stalling_load_idx = 0;
            if self.loads[load_idx].valid {
                return Some(self.loads[load_idx].seq);
            }
        }
        None
    }

    /// Retire loads up to and including `seq` from the head of the queue.
    pub fn commit_loads(&mut self, pool: &InstPool, seq: InstSeqNum) {
        while self.lq_count > 0 {
            let head = &self.loads[self.lq_head];
            if !head.valid || head.seq > seq {
                break;
            }
            if let Some(inst) = pool.get(head.seq) {
                if inst.op.is_htm_start() {
                    self.last_retired_htm_uid = inst.htm_uid.unwrap_or(self.last_retired_htm_uid);
                }
            }
            self.loads[self.lq_head].valid = false;
            self.lq_head = (self.lq_head + 1) % self.loads.len();
            self.lq_count -= 1;
        }
    }

    /// Mark stores up to and including `seq` as committed by the ROB,
    /// making them eligible for writeback.
    pub fn commit_stores(&mut self, seq: InstSeqNum) {
        for off in 0..self.sq_count {
            let idx = (self.sq_head + off) % self.stores.len();
            let entry = &self.stores[idx];
            if entry.valid && entry.seq <= seq && !entry.can_wb {
                self.mark_can_wb(idx);
            }
        }
    }

    /// Pop completed stores off the head of the queue.
    pub fn drain_completed_stores(&mut self) {
        while self.sq_count > 0 {
            let head = &self.stores[self.sq_head];
            if !head.valid || !head.completed {
                break;
            }
            self.stores[self.sq_head].valid = false;
            self.sq_head = (self.sq_head + 1) % self.stores.len();
            self.sq_count -= 1;
            self.store_wb_offset = self.store_wb_offset.saturating_sub(1);
        }
    }

    /// Squash every entry younger than `squash_seq` from both queue tails.
    pub fn squash(&mut self, pool: &mut InstPool, stats: &mut SimStats, squash_seq: InstSeqNum) {
        while self.lq_count > 0 {
            let tail = (self.lq_tail + self.loads.len() - 1) % self.loads.len();
            let entry = &self.loads[tail];
            if !entry.valid || entry.seq <= squash_seq {
                break;
            }

            if self.stalled && self.stalling_load_idx == tail {
                self.stalled = false;
                self.stalling_store_sn = 0;
                self.stalling_load_idx = 0;
            }

            // Squashing can change the transaction nesting depth; clamp at
            // zero so fetch resumes with a sane count.
            if let Some(inst) = pool.get_mut(entry.seq) {
                if inst.op.is_htm_start() {
                    self.htm_starts = self.htm_starts.saturating_sub(1);
                }
                if inst.op.is_htm_stop() {
                    self.htm_stops = self.htm_stops.saturating_sub(1);
                }
                inst.lq_idx = None;
            }

            self.loads[tail].valid = false;
            self.loads[tail].request = None;
            self.lq_tail = tail;
            self.lq_count -= 1;
            stats.squashed_loads += 1;
        }

        if let Some(violator) = self.mem_dep_violator {
            if squash_seq < violator {
                self.mem_dep_violator = None;
            }
        }

        while self.sq_count > 0 {
            let tail = (self.sq_tail + self.stores.len() - 1) % self.stores.len();
            let entry = &self.stores[tail];
            if !entry.valid || entry.seq <= squash_seq {
                break;
            }
            // Stores already marked committable are past the point of no
            // return.
            if entry.can_wb {
                break;
            }

            if let Some(inst) = pool.get_mut(entry.seq) {
                inst.sq_idx = None;
            }
            self.stores[tail].valid = false;
            self.sq_tail = tail;
            self.sq_count -= 1;
            stats.squashed_stores += 1;
        }

        self.blocked_insts.retain(|&s| s <= squash_seq);
        self.pending_replays.retain(|&s| s <= squash_seq);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::inst::{DynInst, MicroOp};
    use crate::core::mem::MemoryHierarchy;
    use crate::config::MemoryConfig;

    fn mem() -> MemoryHierarchy {
        MemoryHierarchy::new(&MemoryConfig {
            level_latencies: vec![1, 10, 100],
            mem_size: 1 << 16,
            port_slots: 4,
        })
    }

    fn lsq() -> LsqUnit {
        LsqUnit::new(8, 8, 16, false)
    }

    fn add_load(
        lsq: &mut LsqUnit,
        pool: &mut InstPool,
        seq: InstSeqNum,
        addr: Addr,
        size: usize,
        runahead: bool,
    ) {
        let mut inst = DynInst::new(seq, seq, 0, MicroOp::Load { rd: 1, base: 2, offset: 0, size: size as u8 });
        inst.eff_addr = Some(addr);
        inst.eff_size = size;
        if runahead {
            inst.set_runahead();
        }
        pool.insert(inst);
        lsq.insert_load(pool, seq);
    }

    fn add_store(
        lsq: &mut LsqUnit,
        pool: &mut InstPool,
        seq: InstSeqNum,
        addr: Addr,
        data: &[u8],
        runahead: bool,
        poisoned: bool,
    ) -> Option<InstSeqNum> {
        let mut inst = DynInst::new(
            seq,
            seq,
            0,
            MicroOp::Store { src: 1, base: 2, offset: 0, size: data.len() as u8 },
        );
        inst.eff_addr = Some(addr);
        inst.eff_size = data.len();
        if runahead {
            inst.set_runahead();
        }
        if poisoned {
            inst.set_poisoned();
        }
        pool.insert(inst);
        lsq.insert_store(pool, seq);
        lsq.execute_store(pool, seq, addr, data)
    }

    #[test]
    fn test_split_ranges() {
        assert_eq!(split_ranges(0x10, 8, 16), vec![(0x10, 8)]);
        assert_eq!(split_ranges(0x1c, 8, 16), vec![(0x1c, 4), (0x20, 4)]);
    }

    #[test]
    fn test_full_forwarding_delivers_store_data() {
        let mut lsq = lsq();
        let mut pool = InstPool::new();
        let mut rc = RunaheadCache::new(64, 16);
        let mut port = mem();
        let mut events = EventQueue::new();
        let mut stats = SimStats::default();

        add_store(&mut lsq, &mut pool, 1, 0x100, &[0xaa; 8], false, false);
        add_load(&mut lsq, &mut pool, 2, 0x100, 8, false);

        let outcome = lsq.execute_load(
            &mut pool, &mut rc, &mut port, &mut events, &mut stats, 2, 0,
        );
        assert!(matches!(outcome, LoadOutcome::Issued));
        assert_eq!(stats.forwarded_loads, 1);

        // The writeback event carries the forwarded bytes.
        let ev = events.pop_due(1).unwrap();
        match ev.kind {
            EventKind::LoadWriteback { seq, pkt } => {
                assert_eq!(seq, 2);
                assert_eq!(pkt.data, vec![0xaa; 8]);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_poisoned_store_taints_forwarded_load() {
        let mut lsq = lsq();
        let mut pool = InstPool::new();
        let mut rc = RunaheadCache::new(64, 16);
        let mut port = mem();
        let mut events = EventQueue::new();
        let mut stats = SimStats::default();

        add_store(&mut lsq, &mut pool, 1, 0x100, &[0xaa; 8], true, true);
        add_load(&mut lsq, &mut pool, 2, 0x100, 8, true);

        lsq.execute_load(&mut pool, &mut rc, &mut port, &mut events, &mut stats, 2, 0);
        assert!(pool.get(2).unwrap().is_poisoned());
        assert_eq!(stats.forwarded_poisons, 1);
    }

    #[test]
    fn test_runahead_store_never_feeds_normal_load() {
        let mut lsq = lsq();
        let mut pool = InstPool::new();
        let mut rc = RunaheadCache::new(64, 16);
        let mut port = mem();
        let mut events = EventQueue::new();
        let mut stats = SimStats::default();

        add_store(&mut lsq, &mut pool, 1, 0x100, &[0xaa; 8], true, false);
        add_load(&mut lsq, &mut pool, 2, 0x100, 8, false);

        lsq.execute_load(&mut pool, &mut rc, &mut port, &mut events, &mut stats, 2, 0);
        // No forwarding; the load went to memory instead.
        assert_eq!(stats.forwarded_loads, 0);
        assert!(!pool.get(2).unwrap().is_poisoned());
    }

    #[test]
    fn test_partial_overlap_stalls_load() {
        let mut lsq = lsq();
        let mut pool = InstPool::new();
        let mut rc = RunaheadCache::new(64, 16);
        let mut port = mem();
        let mut events = EventQueue::new();
        let mut stats = SimStats::default();

        add_store(&mut lsq, &mut pool, 1, 0x100, &[0xbb; 4], false, false);
        add_load(&mut lsq, &mut pool, 2, 0x100, 8, false);

        let outcome = lsq.execute_load(
            &mut pool, &mut rc, &mut port, &mut events, &mut stats, 2, 0,
        );
        assert!(matches!(outcome, LoadOutcome::Stalled));
        assert!(lsq.is_stalled());
        assert_eq!(stats.rescheduled_loads, 1);

        // Completing the store releases the load for replay.
        lsq.commit_stores(1);
        lsq.writeback_stores(&mut rc, &mut port, &mut stats, 0);
        let resp = port.take_due(1000).into_iter().find(|p| p.seq == 1).unwrap();
        lsq.recv_timing_resp(&mut pool, &mut stats, resp, false, None);
        assert!(!lsq.is_stalled());
        assert_eq!(lsq.pending_replays, vec![2]);
    }

    #[test]
    fn test_violation_detected_on_store_execute() {
        let mut lsq = lsq();
        let mut pool = InstPool::new();

        // Store dispatched older than the load, but the load executed
        // first with an overlapping address.
        let mut st = DynInst::new(1, 0, 0, MicroOp::Store { src: 1, base: 2, offset: 0, size: 8 });
        st.eff_addr = Some(0x200);
        st.eff_size = 8;
        pool.insert(st);
        lsq.insert_store(&mut pool, 1);

        add_load(&mut lsq, &mut pool, 2, 0x200, 8, false);
        pool.get_mut(2).unwrap().set_executed();

        let violator = lsq.execute_store(&mut pool, 1, 0x200, &[1; 8]);
        assert_eq!(violator, Some(2));
        assert_eq!(pool.get(2).unwrap().fault, Some(Fault::ReExec));
        assert_eq!(lsq.mem_dep_violator, Some(2));
    }

    #[test]
    fn test_runahead_store_writes_only_rcache() {
        let mut lsq = LsqUnit::new(8, 8, 16, false);
        let mut pool = InstPool::new();
        let mut rc = RunaheadCache::new(64, 16);
        let mut port = mem();
        let mut events = EventQueue::new();
        let mut stats = SimStats::default();

        add_store(&mut lsq, &mut pool, 1, 0x100, &[0xcc; 8], true, false);
        lsq.commit_stores(1);
        lsq.writeback_stores(&mut rc, &mut port, &mut stats, 0);

        // Absorbed by the runahead cache, no memory traffic.
        assert!(port.take_due(1000).is_empty());
        assert_eq!(stats.rcache_writes, 1);

        // A runahead load now hits in the runahead cache.
        add_load(&mut lsq, &mut pool, 2, 0x100, 8, true);
        lsq.execute_load(&mut pool, &mut rc, &mut port, &mut events, &mut stats, 2, 0);
        assert_eq!(stats.rcache_read_hits, 1);
        let ev = events.pop_due(1).unwrap();
        match ev.kind {
            EventKind::LoadWriteback { pkt, .. } => assert_eq!(pkt.data, vec![0xcc; 8]),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_forged_response_drops_real_reply() {
        let mut lsq = lsq();
        let mut pool = InstPool::new();
        let mut rc = RunaheadCache::new(64, 16);
        let mut port = mem();
        let mut events = EventQueue::new();
        let mut stats = SimStats::default();

        add_load(&mut lsq, &mut pool, 1, 0x300, 8, true);
        lsq.execute_load(&mut pool, &mut rc, &mut port, &mut events, &mut stats, 1, 0);
        lsq.forge_response(&mut pool, &mut events, &mut stats, 1, 0);
        assert_eq!(stats.load_responses_forged, 1);

        // Real reply arrives later and is discarded.
        let responses = port.take_due(1000);
        let resp = responses.into_iter().find(|p| p.seq == 1).unwrap();
        let action = lsq.recv_timing_resp(&mut pool, &mut stats, resp, true, None);
        assert!(action.writeback.is_none());
        assert_eq!(stats.dropped_forged_responses, 1);
    }

    #[test]
    fn test_lll_return_signals_exit() {
        let mut lsq = lsq();
        let mut pool = InstPool::new();
        let mut rc = RunaheadCache::new(64, 16);
        let mut port = mem();
        let mut events = EventQueue::new();
        let mut stats = SimStats::default();

        add_load(&mut lsq, &mut pool, 1, 0x300, 8, true);
        lsq.execute_load(&mut pool, &mut rc, &mut port, &mut events, &mut stats, 1, 0);
        lsq.forge_response(&mut pool, &mut events, &mut stats, 1, 0);

        let responses = port.take_due(1000);
        let resp = responses.into_iter().find(|p| p.seq == 1).unwrap();
        let action = lsq.recv_timing_resp(&mut pool, &mut stats, resp, true, Some(1));
        assert!(action.lll_returned);
    }

    #[test]
    fn test_stale_runahead_response_dropped() {
        let mut lsq = lsq();
        let mut pool = InstPool::new();
        let mut rc = RunaheadCache::new(64, 16);
        let mut port = mem();
        let mut events = EventQueue::new();
        let mut stats = SimStats::default();

        add_load(&mut lsq, &mut pool, 1, 0x300, 8, true);
        lsq.execute_load(&mut pool, &mut rc, &mut port, &mut events, &mut stats, 1, 0);

        // Runahead exited before the reply came back.
        let responses = port.take_due(1000);
        let resp = responses.into_iter().find(|p| p.seq == 1).unwrap();
        let action = lsq.recv_timing_resp(&mut pool, &mut stats, resp, false, None);
        assert!(action.writeback.is_none());
        assert_eq!(stats.stale_runahead_packets, 1);
    }

    #[test]
    fn test_squash_clamps_htm_counters() {
        let mut lsq = lsq();
        let mut pool = InstPool::new();
        let mut stats = SimStats::default();

        let mut start = DynInst::new(5, 0, 0, MicroOp::HtmStart);
        start.set_runahead();
        pool.insert(start);
        lsq.insert_load(&mut pool, 5);
        assert_eq!(lsq.htm_starts, 1);
        assert!(lsq.in_htm_transaction());

        lsq.squash(&mut pool, &mut stats, 4);
        assert_eq!(lsq.htm_starts, 0);
        assert_eq!(lsq.num_loads(), 0);
        assert_eq!(stats.squashed_loads, 1);

        // Clamped at zero even if squashed again.
        lsq.squash(&mut pool, &mut stats, 0);
        assert_eq!(lsq.htm_starts, 0);
    }

    #[test]
    fn test_htm_uid_recovery() {
        let mut lsq = lsq();
        let mut pool = InstPool::new();

        let mut start = DynInst::new(3, 0, 0, MicroOp::HtmStart);
        start.htm_uid = None;
        pool.insert(start);
        lsq.insert_load(&mut pool, 3);
        let uid = pool.get(3).unwrap().htm_uid.unwrap();
        assert_eq!(lsq.current_htm_uid(&pool), uid);

        // After retirement the last retired uid takes over.
        lsq.commit_loads(&pool, 3);
        assert_eq!(lsq.current_htm_uid(&pool), uid);
    }

    #[test]
    fn test_atomic_store_never_forwards() {
        let mut lsq = lsq();
        let mut pool = InstPool::new();
        let mut rc = RunaheadCache::new(64, 16);
        let mut port = mem();
        let mut events = EventQueue::new();
        let mut stats = SimStats::default();

        // An atomic with full overlap still classifies as partial, stalling
        // the load instead of forwarding stale data.
        let mut amo = DynInst::new(1, 0, 0, MicroOp::AtomicAdd { rd: 3, src: 1, base: 2, size: 8 });
        amo.eff_addr = Some(0x100);
        amo.eff_size = 8;
        pool.insert(amo);
        lsq.insert_store(&mut pool, 1);
        lsq.execute_store(&mut pool, 1, 0x100, &[9; 8]);

        add_load(&mut lsq, &mut pool, 2, 0x100, 8, false);
        let outcome = lsq.execute_load(
            &mut pool, &mut rc, &mut port, &mut events, &mut stats, 2, 0,
        );
        assert!(matches!(outcome, LoadOutcome::Stalled));
        assert_eq!(stats.forwarded_loads, 0);
    }

    #[test]
    fn test_htm_cache_failure_maps_to_typed_fault() {
        let mut lsq = lsq();
        let mut pool = InstPool::new();
        let mut rc = RunaheadCache::new(64, 16);
        let mut port = mem();
        let mut events = EventQueue::new();
        let mut stats = SimStats::default();

        port.force_htm_failure(0x300, HtmCacheFailure::FailRemote);

        add_load(&mut lsq, &mut pool, 1, 0x300, 8, false);
        pool.get_mut(1).unwrap().htm_uid = Some(7);
        lsq.execute_load(&mut pool, &mut rc, &mut port, &mut events, &mut stats, 1, 0);

        let resp = port.take_due(1000).into_iter().find(|p| p.seq == 1).unwrap();
        lsq.recv_timing_resp(&mut pool, &mut stats, resp, false, None);
        assert_eq!(
            pool.get(1).unwrap().fault,
            Some(Fault::HtmFailure(HtmFailureCause::Memory))
        );
    }

    #[test]
    fn test_tso_single_store_in_flight() {
        let mut lsq = LsqUnit::new(8, 8, 16, true);
        let mut pool = InstPool::new();
        let mut rc = RunaheadCache::new(64, 16);
        let mut port = mem();
        let mut stats = SimStats::default();

        add_store(&mut lsq, &mut pool, 1, 0x100, &[1; 8], false, false);
        add_store(&mut lsq, &mut pool, 2, 0x140, &[2; 8], false, false);
        lsq.commit_stores(2);
        lsq.writeback_stores(&mut rc, &mut port, &mut stats, 0);

        // Only the first store went out.
        let in_flight: Vec<_> = port.take_due(1000);
        assert_eq!(in_flight.len(), 1);
        assert_eq!(in_flight[0].seq, 1);
    }
}
