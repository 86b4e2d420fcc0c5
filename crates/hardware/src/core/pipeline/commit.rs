//! Commit stage and runahead state machine.
//!
//! Each cycle commit, in priority order, resolves pending squashes (trap,
//! thread-context, squash-after, runahead exit, IEW-signalled), inserts
//! renamed instructions into the ROB, and retires up to `commit_width`
//! ready heads. The runahead decisions live here:
//! 1. A load blocking the head with a deep in-flight request triggers entry
//!    into runahead (or a forged response when already in runahead).
//! 2. The triggering load's real response arrives as the exit signal,
//!    resolved against the configured exit policy plus a hard deadline.
//! 3. Exit squashes every runahead instruction and schedules the
//!    architectural restore one cycle later via the self-addressed
//!    time-buffer pulse.

use crate::common::{Addr, Cycle, Fault, InstSeqNum, ThreadId, MAX_THREADS};
use crate::config::RunaheadExitPolicy;
use crate::core::Cpu;
use crate::sim::events::{EventKind, EventQueue};
use crate::stats::SimStats;

use super::Pipeline;

/// Per-thread commit status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CommitStatus {
    #[default]
    Running,
    Idle,
    RobSquashing,
    TrapPending,
    FetchTrapPending,
    SquashAfterPending,
}

/// Commit stage state.
#[derive(Debug)]
pub struct Commit {
    pub status: [CommitStatus; MAX_THREADS],
    /// Commit's PC view: the resume point for squashes.
    pub pc: [Addr; MAX_THREADS],
    /// Monotone upper bound on live sequence numbers; suppresses stale
    /// squash signals from earlier stages.
    pub youngest_seq_num: [InstSeqNum; MAX_THREADS],
    pub last_committed_seq_num: [InstSeqNum; MAX_THREADS],

    pub trap_squash: [bool; MAX_THREADS],
    pub tc_squash: [bool; MAX_THREADS],
    pub trap_in_flight: [bool; MAX_THREADS],
    /// Redirect target after a trap squash; `None` halts the thread.
    trap_redirect: [Option<Addr>; MAX_THREADS],
    squash_after_inst: [Option<InstSeqNum>; MAX_THREADS],
    /// The squash-after was requested while in runahead; stale once
    /// runahead exits.
    was_runahead: [bool; MAX_THREADS],

    /// Runahead exit is pending and will squash next commit cycle.
    pub exit_runahead: [bool; MAX_THREADS],
    /// The triggering load's response has returned; exit is allowed.
    pub runahead_exitable: [bool; MAX_THREADS],
    /// Instructions pseudoretired in the current period.
    pub insts_pseudoretired: [u64; MAX_THREADS],
    /// Instructions retired since the last runahead exit.
    pub insts_between_runahead: [u64; MAX_THREADS],
    /// Cycles since runahead exit, until the next real commit. -1 when not
    /// counting.
    runahead_exit_cycles: i64,

    committed_stores: [bool; MAX_THREADS],
}

impl Default for Commit {
    fn default() -> Self {
        Self {
            status: [CommitStatus::Running; MAX_THREADS],
            pc: [0; MAX_THREADS],
            youngest_seq_num: [0; MAX_THREADS],
            last_committed_seq_num: [0; MAX_THREADS],
            trap_squash: [false; MAX_THREADS],
            tc_squash: [false; MAX_THREADS],
            trap_in_flight: [false; MAX_THREADS],
            trap_redirect: [None; MAX_THREADS],
            squash_after_inst: [None; MAX_THREADS],
            was_runahead: [false; MAX_THREADS],
            exit_runahead: [false; MAX_THREADS],
            runahead_exitable: [false; MAX_THREADS],
            insts_pseudoretired: [0; MAX_THREADS],
            insts_between_runahead: [0; MAX_THREADS],
            runahead_exit_cycles: -1,
            committed_stores: [false; MAX_THREADS],
        }
    }
}

impl Commit {
    pub fn new() -> Self {
        Self::default()
    }

    /// External thread-context change (e.g. a debugger write): squash
    /// everything next cycle without a trap.
    pub fn generate_tc_event(&mut self, tid: ThreadId) {
        assert!(!self.trap_in_flight[tid]);
        self.tc_squash[tid] = true;
    }

    /// The triggering load's real memory response arrived: decide when to
    /// exit according to the policy, and always arm the deadline if not
    /// exiting immediately.
    pub fn signal_exit_runahead(
        &mut self,
        tid: ThreadId,
        cause_seq: InstSeqNum,
        now: Cycle,
        policy: RunaheadExitPolicy,
        min_work: u64,
        deadline: Cycle,
        events: &mut EventQueue,
        stats: &mut SimStats,
    ) {
        self.runahead_exitable[tid] = true;

        match policy {
            RunaheadExitPolicy::Eager => {
                self.exit_runahead[tid] = true;
                stats.exit_cause_eager += 1;
            }
            RunaheadExitPolicy::MinimumWork => {
                if self.insts_pseudoretired[tid] >= min_work {
                    self.exit_runahead[tid] = true;
                    stats.exit_cause_min_work += 1;
                }
            }
            RunaheadExitPolicy::DynamicDelayed => {
                unimplemented!("dynamic delayed runahead exit")
            }
        }

        if !self.exit_runahead[tid] {
            events.schedule(now + deadline, EventKind::RunaheadDeadline { tid, cause_seq });
        }
    }
}

pub fn tick(cpu: &mut Cpu, pl: &mut Pipeline) {
    let tid: ThreadId = 0;

    if pl.commit.runahead_exit_cycles >= 0 {
        pl.commit.runahead_exit_cycles += 1;
    }
    pl.commit.committed_stores[tid] = false;

    // Advance an in-progress ROB squash.
    if pl.commit.status[tid] == CommitStatus::RobSquashing {
        if pl.rob.is_done_squashing(tid) {
            pl.commit.status[tid] = CommitStatus::Running;
        } else {
            pl.rob.do_squash(tid, &mut pl.pool, &mut cpu.stats);
            pl.buf.now().commit_info[tid].rob_squashing = true;
            cpu.stats.squash_cycles += 1;
        }
    }

    commit_phase(cpu, pl, tid);
    mark_completed_insts(cpu, pl, tid);

    // Track whether there is anything to do at all.
    if pl.commit.status[tid] == CommitStatus::Running && pl.rob.is_empty(tid) {
        pl.commit.status[tid] = CommitStatus::Idle;
    }

    // Occupancy wires, written every cycle for dispatch flow control.
    let free = pl.rob.num_free_entries();
    let empty = pl.rob.is_empty(tid);
    let stores_pending = pl.lsq.has_stores_to_wb();
    let committed_stores = pl.commit.committed_stores[tid];
    let ci = &mut pl.buf.now().commit_info[tid];
    ci.free_rob_entries = free;
    ci.used_rob = true;
    if empty && !stores_pending && !committed_stores {
        ci.empty_rob = true;
    }
}

fn commit_phase(cpu: &mut Cpu, pl: &mut Pipeline, tid: ThreadId) {
    // Interrupts are handled at retirement boundaries, outside runahead.
    if cpu.pending_interrupt.is_some()
        && !cpu.in_runahead[tid]
        && !pl.commit.trap_in_flight[tid]
        && matches!(
            pl.commit.status[tid],
            CommitStatus::Running | CommitStatus::Idle
        )
    {
        cpu.pending_interrupt = None;
        pl.commit.status[tid] = CommitStatus::FetchTrapPending;
        pl.buf.now().commit_info[tid].interrupt_pending = true;
        pl.buf.now().commit_info[tid].clear_interrupt = true;
        let redirect = cpu.trap_vector;
        generate_trap_event(cpu, pl, tid, redirect);
    }

    // Squash checks, in priority order.
    if pl.commit.trap_squash[tid] {
        assert!(!pl.commit.tc_squash[tid]);
        squash_from_trap(cpu, pl, tid);
    } else if pl.commit.tc_squash[tid] {
        assert!(pl.commit.status[tid] != CommitStatus::TrapPending);
        squash_from_tc(cpu, pl, tid);
    } else if pl.commit.status[tid] == CommitStatus::SquashAfterPending {
        // Ignore a squash-after initiated by a stale runahead instruction.
        if pl.commit.was_runahead[tid] && !cpu.in_runahead[tid] {
            pl.commit.status[tid] = CommitStatus::Running;
            pl.commit.squash_after_inst[tid] = None;
        } else {
            squash_from_squash_after(cpu, pl, tid);
        }
    } else if pl.commit.exit_runahead[tid] {
        squash_from_runahead_exit(cpu, pl, tid);
    }

    // IEW-signalled squash, suppressed when stale (younger than an already
    // applied squash).
    let iew = pl.buf.read(cpu.config.pipeline.iew_to_commit_delay).iew_info.clone();
    if iew.squash
        && pl.commit.status[tid] != CommitStatus::TrapPending
        && iew.squashed_seq_num <= pl.commit.youngest_seq_num[tid]
    {
        let mut squash_seq = iew.squashed_seq_num;
        if iew.include_squash_inst {
            squash_seq -= 1;
        }
        pl.commit.youngest_seq_num[tid] = squash_seq;
        pl.commit.status[tid] = CommitStatus::RobSquashing;
        pl.rob.squash(squash_seq, tid);

        if let Some(mp) = iew.mispredict_inst {
            let runahead = pl.pool.get(mp).map(|i| i.is_runahead()).unwrap_or(false);
            if runahead {
                cpu.stats.runahead_branch_mispredicts += 1;
            } else {
                cpu.stats.real_branch_mispredicts += 1;
            }
        }

        let squash_tail = pl.rob.read_tail(tid).unwrap_or(squash_seq);
        let squash_inst = pl.rob.find_inst(tid, squash_seq);
        let ci = &mut pl.buf.now().commit_info[tid];
        ci.squash = true;
        ci.rob_squashing = true;
        ci.done_seq_num = squash_seq;
        ci.squash_tail = squash_tail;
        ci.mispredict_inst = iew.mispredict_inst;
        ci.branch_taken = iew.branch_taken;
        ci.squash_inst = squash_inst;
        ci.pc = iew.pc;

        if cpu.trace {
            eprintln!("CM  squash from IEW at sn={} redirect={:#x}", squash_seq, iew.pc);
        }
    }

    if pl.commit.status[tid] != CommitStatus::RobSquashing {
        get_insts(cpu, pl, tid);
        commit_insts(cpu, pl, tid);
    }
}

/// Insert renamed instructions into the ROB after the rename-to-ROB delay.
fn get_insts(cpu: &mut Cpu, pl: &mut Pipeline, tid: ThreadId) {
    let group = pl
        .buf
        .read(cpu.config.pipeline.rename_to_rob_delay)
        .rename_to_iew
        .clone();
    for seq in group {
        let Some(inst) = pl.pool.get_mut(seq) else { continue };
        if inst.tid != tid {
            continue;
        }
        if inst.is_squashed()
            || pl.commit.status[tid] == CommitStatus::RobSquashing
            || pl.commit.status[tid] == CommitStatus::TrapPending
        {
            // Never reached the ROB; it drains nowhere else.
            inst.set_squashed();
            continue;
        }
        pl.rob.insert(inst);
        pl.commit.youngest_seq_num[tid] = seq;
        if pl.commit.status[tid] == CommitStatus::Idle {
            pl.commit.status[tid] = CommitStatus::Running;
        }
        if cpu.trace {
            eprintln!("CM  pc={:#x} sn={} into ROB", inst.pc, seq);
        }
    }
}

/// Mark IEW-completed instructions ready to commit.
fn mark_completed_insts(cpu: &mut Cpu, pl: &mut Pipeline, _tid: ThreadId) {
    let completed = pl
        .buf
        .read(cpu.config.pipeline.iew_to_commit_delay)
        .iew_info
        .completed
        .clone();
    for seq in completed {
        if let Some(inst) = pl.pool.get_mut(seq) {
            if !inst.is_squashed() {
                inst.status.can_commit = true;
            }
        }
    }
}

fn commit_insts(cpu: &mut Cpu, pl: &mut Pipeline, tid: ThreadId) {
    let width = cpu.config.pipeline.commit_width;
    let mut num_committed = 0;

    while num_committed < width {
        let Some(head_seq) = pl.rob.read_head(tid) else {
            break;
        };

        if !pl.rob.is_head_ready(tid, &pl.pool) {
            probe_blocking_load(cpu, pl, tid, head_seq);
            break;
        }

        let (squashed, fault, runahead, poisoned, op, pc) = {
            let inst = pl.pool.get(head_seq).expect("ROB head not in pool");
            (
                inst.is_squashed(),
                inst.fault.clone(),
                inst.is_runahead(),
                inst.is_poisoned(),
                inst.op,
                inst.pc,
            )
        };

        if squashed {
            pl.rob.retire_head(tid, &mut pl.pool, cpu.cycle);
            continue;
        }

        // Halt quiesces: committed stores must drain first.
        if op.is_halt() && !runahead && pl.lsq.has_stores_to_wb() {
            break;
        }

        pl.commit.pc[tid] = pc;

        if pl.commit.trap_in_flight[tid] {
            break;
        }

        if let Some(fault) = fault {
            if num_committed > 0 || pl.lsq.has_stores_to_wb() {
                // Stores outstanding; the fault must wait.
                break;
            }
            if runahead {
                // Runahead faults are silently discarded: the state is about
                // to be restored, so no trap may execute and no trap event is
                // scheduled.
                if cpu.trace {
                    eprintln!("CM  sn={} {} fault ignored (runahead)", head_seq, fault);
                }
                pl.pool.get_mut(head_seq).unwrap().fault = None;
            } else {
                let redirect = match fault {
                    // Replay: refetch the faulting instruction itself.
                    Fault::ReExec => Some(pc),
                    _ => cpu.trap_vector,
                };
                if cpu.trace {
                    eprintln!("CM  sn={} fault {} -> trap", head_seq, fault);
                }
                generate_trap_event(cpu, pl, tid, redirect);
                break;
            }
        }

        retire_head_inst(cpu, pl, tid, head_seq, runahead, poisoned, op, pc);
        num_committed += 1;

        if op.is_squash_after() {
            pl.commit.status[tid] = CommitStatus::SquashAfterPending;
            pl.commit.squash_after_inst[tid] = Some(head_seq);
            pl.commit.was_runahead[tid] = cpu.in_runahead[tid];
            break;
        }
    }
}

/// The ROB head is not ready: if it is a load whose in-flight request has
/// reached the LLL depth threshold, enter runahead or forge its response.
fn probe_blocking_load(cpu: &mut Cpu, pl: &mut Pipeline, tid: ThreadId, head_seq: InstSeqNum) {
    let (is_load, has_request, poisoned) = {
        let Some(inst) = pl.pool.get(head_seq) else { return };
        (inst.op.is_load(), inst.has_request(), inst.is_poisoned())
    };
    if !is_load || !has_request {
        return;
    }
    cpu.stats.loads_at_rob_head += 1;

    let Some(depth) = pl.lsq.request_depth(&pl.pool, head_seq) else {
        return;
    };
    if depth < cpu.config.runahead.lll_depth_threshold {
        return;
    }
    cpu.stats.lll_at_rob_head += 1;

    if !cpu.in_runahead[tid] {
        cpu.enter_runahead(pl, tid);
    } else if !poisoned {
        // A runahead LLL: complete it immediately so it stops blocking.
        cpu.handle_runahead_lll(pl, head_seq);
    }
}

#[allow(clippy::too_many_arguments)]
fn retire_head_inst(
    cpu: &mut Cpu,
    pl: &mut Pipeline,
    tid: ThreadId,
    head_seq: InstSeqNum,
    runahead: bool,
    poisoned: bool,
    op: crate::core::inst::MicroOp,
    pc: Addr,
) {
    // Misc-register writes apply architecturally at commit. During
    // runahead the restore undoes them.
    if let Some(idx) = op.misc_dest() {
        let val = pl.pool.get(head_seq).unwrap().result;
        cpu.misc_regs[idx] = val;
    }

    if !runahead {
        // Update the commit rename map and refresh the checkpoint for every
        // destination. Runahead retirements touch neither: the CPU is
        // pseudoretiring, not committing.
        let dests: Vec<_> = {
            let inst = pl.pool.get(head_seq).unwrap();
            inst.dest_arch.iter().copied().zip(inst.dest_phys.iter().copied()).collect()
        };
        for (arch, phys) in dests {
            cpu.commit_rename_map.set_entry(arch, phys);
            if cpu.config.runahead.enable_runahead {
                cpu.checkpoint
                    .update_reg(arch, &cpu.regfile, &cpu.commit_rename_map, &cpu.misc_regs);
            }
        }
        if cpu.config.runahead.enable_runahead {
            if let Some(idx) = op.misc_dest() {
                cpu.checkpoint.update_reg(
                    crate::common::RegId::new(crate::common::RegClass::Misc, idx),
                    &cpu.regfile,
                    &cpu.commit_rename_map,
                    &cpu.misc_regs,
                );
            }
        }
    } else if poisoned {
        // Every destination of a poisoned pseudoretiree must be poisoned.
        let inst = pl.pool.get(head_seq).unwrap();
        for &phys in &inst.dest_phys {
            debug_assert!(cpu.regfile.is_poisoned(phys));
        }
    }

    if cpu.trace {
        eprintln!(
            "CM  pc={:#x} sn={} {}",
            pc,
            head_seq,
            if runahead { "PSEUDORETIRE" } else { "COMMIT" }
        );
    }

    pl.rob.retire_head(tid, &mut pl.pool, cpu.cycle);

    // Retirement statistics.
    if runahead {
        pl.commit.insts_pseudoretired[tid] += 1;
        cpu.stats.insts_pseudoretired += 1;
        if poisoned {
            cpu.stats.commit_poisoned_insts += 1;
        }
    } else {
        cpu.stats.insts_committed += 1;
        pl.commit.insts_between_runahead[tid] += 1;
        if pl.commit.runahead_exit_cycles >= 0 {
            cpu.stats.total_runahead_overhead += pl.commit.runahead_exit_cycles as u64;
            pl.commit.runahead_exit_cycles = -1;
        }
    }
    pl.commit.last_committed_seq_num[tid] = head_seq;

    // LSQ retirement.
    if op.is_load() || op.is_htm_start() || op.is_htm_stop() {
        pl.lsq.commit_loads(&pl.pool, head_seq);
    }
    if op.is_store() {
        pl.lsq.commit_stores(head_seq);
        pl.commit.committed_stores[tid] = true;
    }

    if op.is_halt() && !runahead {
        cpu.halted = true;
    }

    let ci = &mut pl.buf.now().commit_info[tid];
    ci.done_seq_num = head_seq;
    ci.squash_tail = head_seq;

    // MinimumWork: the exit signal may already have arrived; leave as soon
    // as the work target is met.
    if cpu.config.runahead.runahead_exit_policy == RunaheadExitPolicy::MinimumWork
        && pl.commit.runahead_exitable[tid]
        && pl.commit.insts_pseudoretired[tid] >= cpu.config.runahead.min_runahead_work
        && !pl.commit.exit_runahead[tid]
    {
        pl.commit.exit_runahead[tid] = true;
        cpu.stats.exit_cause_min_work += 1;
    }
}

/// Squash every in-flight instruction of the thread.
fn squash_all(cpu: &mut Cpu, pl: &mut Pipeline, tid: ThreadId) {
    let squash_seq = match pl.rob.read_head(tid) {
        Some(head) => head - 1,
        None => pl.commit.last_committed_seq_num[tid],
    };
    pl.commit.youngest_seq_num[tid] = pl.commit.last_committed_seq_num[tid];

    pl.rob.squash(squash_seq, tid);

    let squash_tail = pl.rob.read_tail(tid).unwrap_or(squash_seq);
    let pc = pl.commit.pc[tid];
    let ci = &mut pl.buf.now().commit_info[tid];
    ci.squash = true;
    ci.rob_squashing = true;
    ci.done_seq_num = squash_seq;
    ci.squash_tail = squash_tail;
    ci.mispredict_inst = None;
    ci.squash_inst = None;
    ci.pc = pc;

    if cpu.trace {
        eprintln!("CM  squash all until sn={} restart pc={:#x}", squash_seq, pc);
    }
}

fn squash_from_trap(cpu: &mut Cpu, pl: &mut Pipeline, tid: ThreadId) {
    match pl.commit.trap_redirect[tid] {
        Some(target) => pl.commit.pc[tid] = target,
        None => cpu.halted = true,
    }
    squash_all(cpu, pl, tid);

    if cpu.trace {
        eprintln!("CM  trap squash, restart pc={:#x}", pl.commit.pc[tid]);
    }

    pl.commit.trap_squash[tid] = false;
    pl.commit.trap_in_flight[tid] = false;
    pl.commit.trap_redirect[tid] = None;
    pl.commit.status[tid] = CommitStatus::RobSquashing;
}

fn squash_from_tc(cpu: &mut Cpu, pl: &mut Pipeline, tid: ThreadId) {
    squash_all(cpu, pl, tid);
    pl.commit.tc_squash[tid] = false;
    pl.commit.status[tid] = CommitStatus::RobSquashing;
}

fn squash_from_squash_after(cpu: &mut Cpu, pl: &mut Pipeline, tid: ThreadId) {
    squash_all(cpu, pl, tid);
    // Tell fetch which instruction caused the squash so it refetches the
    // next one rather than replaying it.
    let inst = pl.commit.squash_after_inst[tid].take();
    pl.buf.now().commit_info[tid].squash_inst = inst;
    pl.buf.now().commit_info[tid].pc = pl.commit.pc[tid] + 1;
    pl.commit.status[tid] = CommitStatus::RobSquashing;
}

/// Leave runahead: squash everything younger than the instruction before
/// the triggering load, arm the one-cycle-delayed architectural restore,
/// and resume fetch at the load's PC.
fn squash_from_runahead_exit(cpu: &mut Cpu, pl: &mut Pipeline, tid: ThreadId) {
    pl.commit.exit_runahead[tid] = false;
    pl.commit.runahead_exit_cycles = 0;

    let lll_seq = cpu.runahead_cause[tid].expect("runahead exit without a cause");
    let squash_seq = lll_seq - 1;

    if cpu.trace {
        eprintln!("CM  runahead exit squash at sn={}", lll_seq);
    }

    pl.commit.youngest_seq_num[tid] = squash_seq;
    pl.commit.status[tid] = CommitStatus::RobSquashing;
    pl.rob.squash(squash_seq, tid);

    // Resume fetch at the load that caused entry.
    pl.commit.pc[tid] = cpu.runahead_resume_pc[tid];

    let squash_tail = pl.rob.read_tail(tid).unwrap_or(squash_seq);
    let squash_inst = pl.rob.find_inst(tid, squash_seq);
    let pc = pl.commit.pc[tid];
    let ci = &mut pl.buf.now().commit_info[tid];
    ci.squash = true;
    ci.rob_squashing = true;
    ci.done_seq_num = squash_seq;
    ci.squash_tail = squash_tail;
    ci.mispredict_inst = None;
    ci.squash_inst = squash_inst;
    ci.pc = pc;
    // The CPU observes this pulse next cycle and restores the checkpoint.
    ci.arch_restore = true;

    // Clear any trap the speculative path may have raised.
    pl.commit.trap_in_flight[tid] = false;
    pl.commit.trap_squash[tid] = false;
    pl.commit.trap_redirect[tid] = None;

    cpu.exit_runahead(pl, tid);
    pl.commit.runahead_exitable[tid] = false;
}

/// Schedule the trap squash after the configured latency. The event
/// re-checks liveness at dispatch: traps raised in runahead abort if the
/// thread has since left runahead.
fn generate_trap_event(cpu: &mut Cpu, pl: &mut Pipeline, tid: ThreadId, redirect: Option<Addr>) {
    assert!(!pl.commit.trap_in_flight[tid]);
    pl.commit.trap_redirect[tid] = redirect;
    pl.commit.trap_in_flight[tid] = true;
    if pl.commit.status[tid] != CommitStatus::FetchTrapPending {
        pl.commit.status[tid] = CommitStatus::TrapPending;
    }

    let latency = cpu.config.pipeline.trap_latency;
    cpu.events.schedule(
        cpu.cycle + latency,
        EventKind::Trap { tid, in_runahead: cpu.in_runahead[tid] },
    );
}
