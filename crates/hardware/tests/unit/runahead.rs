//! Runahead period scenarios, end to end.
//!
//! Each test drives the full simulator: fetch through commit, the memory
//! hierarchy, runahead entry guards, poison propagation, exit policies, and
//! the architectural restore.

use runahead_core::common::RegId;
use runahead_core::config::{Config, RunaheadExitPolicy};

use crate::common::harness::TestContext;

const BASE: u64 = 0x100;

/// li r1, BASE; a cold load that becomes the LLL; halt.
const SIMPLE_LLL: &str = "\
    li   r1, 0x100
    ld   r2, 0(r1), 8
    halt";

/// A runahead period with a dependent poison chain and speculative store
/// traffic behind the LLL.
const POISON_CHAIN: &str = "\
    li   r1, 0x100
    ld   r2, 0(r1), 8
    add  r3, r2, r1
    add  r4, r3, r3
    st   r4, 8(r1), 8
    ld   r5, 8(r1), 8
    halt";

#[test]
fn test_entry_by_depth_threshold() {
    // Boundary scenario: depth 3 >= threshold 2 while blocking the head.
    let mut config = Config::default();
    config.runahead.lll_depth_threshold = 2;
    config.runahead.enable_runahead = true;

    let mut ctx = TestContext::with_config(SIMPLE_LLL, config);
    ctx.poke_mem(BASE, &0x1234u64.to_le_bytes());
    ctx.force_depth(BASE, 3);

    ctx.run_until(1000, |sim| sim.cpu.in_runahead[0]);

    // Exactly one entry, nothing pseudoretired yet, cache invalidated.
    assert_eq!(ctx.sim.cpu.stats.runahead_periods, 1);
    assert_eq!(ctx.sim.pipeline.commit.insts_pseudoretired[0], 0);
    assert_eq!(ctx.sim.cpu.stats.rcache_invalidations, 1);
}

#[test]
fn test_entry_refused_when_in_flight_too_long() {
    // The load issues out of order long before it reaches the ROB head, so
    // by the time commit sees it blocking, the response is expected soon.
    let mut config = Config::default();
    config.runahead.lll_depth_threshold = 2;
    config.runahead.runahead_in_flight_threshold = 2;

    let program = "\
        li   r1, 0x100
        li   r4, 3
        mul  r4, r4, r4
        mul  r4, r4, r4
        mul  r4, r4, r4
        mul  r4, r4, r4
        mul  r4, r4, r4
        mul  r4, r4, r4
        ld   r2, 0(r1), 8
        halt";

    let mut ctx = TestContext::with_config(program, config);
    ctx.force_depth(BASE, 3);
    ctx.run_to_halt(5000);

    assert_eq!(ctx.sim.cpu.stats.runahead_periods, 0);
    assert!(ctx.sim.cpu.stats.refused_entries_return_soon >= 1);
}

#[test]
fn test_eager_exit_resumes_correctly() {
    // Boundary scenario: exit follows the real response within a cycle,
    // restore one cycle later, and execution resumes at the load's PC with
    // the correct architectural result.
    let mut config = Config::default();
    config.runahead.lll_depth_threshold = 2;
    config.runahead.runahead_exit_policy = RunaheadExitPolicy::Eager;

    let mut ctx = TestContext::with_config(POISON_CHAIN, config);
    ctx.poke_mem(BASE, &0x40u64.to_le_bytes());
    ctx.force_depth(BASE, 3);

    ctx.run_until(1000, |sim| sim.cpu.in_runahead[0]);
    let entered_at = ctx.sim.cpu.cycle;
    ctx.run_until(5000, |sim| !sim.cpu.in_runahead[0]);
    assert!(ctx.sim.cpu.cycle > entered_at);
    assert_eq!(ctx.sim.cpu.stats.exit_cause_eager, 1);

    ctx.run_to_halt(10_000);

    // Architectural results are those of normal execution.
    assert_eq!(ctx.sim.cpu.stats.runahead_periods, 1);
    assert_eq!(ctx.int_reg(2), 0x40);
    assert_eq!(ctx.int_reg(3), 0x40 + BASE);
    assert_eq!(ctx.int_reg(4), 2 * (0x40 + BASE));
    assert_eq!(ctx.int_reg(5), ctx.int_reg(4));
    assert_eq!(ctx.peek_u64(BASE + 8), ctx.int_reg(4));
}

#[test]
fn test_minimum_work_defers_then_deadline_fires() {
    // Boundary scenario: the work target is unreachable, so the response
    // alone does not exit; the deadline does.
    let mut config = Config::default();
    config.runahead.lll_depth_threshold = 2;
    config.runahead.runahead_exit_policy = RunaheadExitPolicy::MinimumWork;
    config.runahead.min_runahead_work = 1_000_000_000;
    config.runahead.runahead_exit_deadline = 50;
    config.memory.level_latencies = vec![1, 5, 10, 100];

    let mut ctx = TestContext::with_config(SIMPLE_LLL, config);
    ctx.force_depth(BASE, 2); // latency 10, depth at the threshold

    ctx.run_until(1000, |sim| sim.cpu.in_runahead[0]);
    let entered_at = ctx.sim.cpu.cycle;

    // The response arrives ~10 cycles in; exit may only happen via the
    // deadline, bounded by signal + deadline (+ squash slack).
    let exited_at = ctx.run_until(entered_at + 200, |sim| !sim.cpu.in_runahead[0]);
    assert!(exited_at >= entered_at + 50, "exit before the deadline could fire");
    assert!(exited_at <= entered_at + 10 + 50 + 2, "deadline overshot");
    assert_eq!(ctx.sim.cpu.stats.exit_cause_deadline, 1);
    assert_eq!(ctx.sim.cpu.stats.exit_cause_eager, 0);

    ctx.run_to_halt(10_000);
}

#[test]
fn test_minimum_work_exits_once_target_met() {
    let mut config = Config::default();
    config.runahead.lll_depth_threshold = 2;
    config.runahead.runahead_exit_policy = RunaheadExitPolicy::MinimumWork;
    config.runahead.min_runahead_work = 2;
    config.runahead.runahead_exit_deadline = 500;

    let mut ctx = TestContext::with_config(POISON_CHAIN, config);
    ctx.force_depth(BASE, 3);

    ctx.run_until(1000, |sim| sim.cpu.in_runahead[0]);
    ctx.run_until(5000, |sim| !sim.cpu.in_runahead[0]);
    assert_eq!(ctx.sim.cpu.stats.exit_cause_min_work, 1);
    assert!(ctx.sim.cpu.stats.insts_pseudoretired >= 2);

    ctx.run_to_halt(10_000);
}

#[test]
fn test_poison_propagates_and_is_cured_on_exit() {
    // Invariants: a runahead instruction reading a poisoned source poisons
    // every destination; the restore cures all poison.
    let mut config = Config::default();
    config.runahead.lll_depth_threshold = 2;

    let mut ctx = TestContext::with_config(POISON_CHAIN, config);
    ctx.force_depth(BASE, 3);

    ctx.run_until(1000, |sim| sim.cpu.in_runahead[0]);

    // Wait for the dependent chain to write back; its destinations must be
    // poisoned through the frontend map.
    ctx.run_until(1000, |sim| {
        let phys = sim.cpu.rename_map.lookup(RegId::int(4));
        sim.cpu.regfile.is_poisoned(phys)
    });
    assert!(ctx.sim.cpu.regfile.poison_count() > 0);
    assert!(ctx.sim.cpu.stats.int_reg_poisoned > 0);

    // After the period, no poison survives anywhere.
    ctx.run_until(5000, |sim| !sim.cpu.in_runahead[0]);
    ctx.run_until(5100, |sim| sim.cpu.regfile.poison_count() == 0);
    ctx.run_to_halt(10_000);
    assert_eq!(ctx.sim.cpu.regfile.poison_count(), 0);
}

#[test]
fn test_pseudoretire_never_touches_commit_map() {
    let mut config = Config::default();
    config.runahead.lll_depth_threshold = 2;

    let mut ctx = TestContext::with_config(POISON_CHAIN, config);
    ctx.force_depth(BASE, 3);

    ctx.run_until(1000, |sim| sim.cpu.in_runahead[0]);
    let r3_before = ctx.sim.cpu.commit_rename_map.lookup(RegId::int(3));
    let r4_before = ctx.sim.cpu.commit_rename_map.lookup(RegId::int(4));

    // Let the chain pseudoretire.
    ctx.run_until(2000, |sim| sim.cpu.stats.insts_pseudoretired >= 3);
    assert!(ctx.sim.cpu.in_runahead[0]);
    assert_eq!(ctx.sim.cpu.commit_rename_map.lookup(RegId::int(3)), r3_before);
    assert_eq!(ctx.sim.cpu.commit_rename_map.lookup(RegId::int(4)), r4_before);

    ctx.run_to_halt(10_000);
}

#[test]
fn test_at_most_one_period_per_lll() {
    // After the restore the refetched load hits the promoted block; the
    // same trigger never re-enters.
    let mut config = Config::default();
    config.runahead.lll_depth_threshold = 2;

    let mut ctx = TestContext::with_config(SIMPLE_LLL, config);
    ctx.force_depth(BASE, 3);
    ctx.run_to_halt(10_000);

    assert_eq!(ctx.sim.cpu.stats.runahead_periods, 1);
}

#[test]
fn test_restore_follows_squash_by_one_cycle() {
    let mut config = Config::default();
    config.runahead.lll_depth_threshold = 2;

    let mut ctx = TestContext::with_config(POISON_CHAIN, config);
    ctx.force_depth(BASE, 3);

    ctx.run_until(1000, |sim| sim.cpu.in_runahead[0]);
    ctx.run_until(1000, |sim| sim.cpu.regfile.poison_count() > 0);

    // The exit squash cycle ends with poison still set; the restore on the
    // following cycle cures it.
    ctx.run_until(5000, |sim| !sim.cpu.in_runahead[0]);
    assert!(ctx.sim.cpu.regfile.poison_count() > 0);
    ctx.sim.tick();
    assert_eq!(ctx.sim.cpu.regfile.poison_count(), 0);

    ctx.run_to_halt(10_000);
}

#[test]
fn test_disabled_runahead_is_conventional_ooo() {
    let mut config = Config::default();
    config.runahead.enable_runahead = false;

    let mut ctx = TestContext::with_config(POISON_CHAIN, config);
    ctx.poke_mem(BASE, &0x40u64.to_le_bytes());
    ctx.force_depth(BASE, 3);
    ctx.run_to_halt(10_000);

    assert_eq!(ctx.sim.cpu.stats.runahead_periods, 0);
    assert_eq!(ctx.int_reg(2), 0x40);
    assert_eq!(ctx.peek_u64(BASE + 8), ctx.int_reg(4));
}

#[test]
fn test_runahead_fault_is_discarded() {
    // A faulting instruction on the speculative path must not trap: the
    // program still completes normally after the period.
    let mut config = Config::default();
    config.runahead.lll_depth_threshold = 2;

    // The trap op sits behind the LLL, so it only executes in runahead
    // before being squashed; after the restore it executes for real. Give
    // the real path a handler so the run still halts.
    let program = "\
        li   r1, 0x100
        ld   r2, 0(r1), 8
        trap 7
        halt";

    let mut ctx = TestContext::with_config(program, config);
    ctx.force_depth(BASE, 3);
    ctx.sim.cpu.trap_vector = Some(3); // the halt

    ctx.run_until(1000, |sim| sim.cpu.in_runahead[0]);
    // The pseudoretired trap must not end the program or redirect fetch.
    ctx.run_until(2000, |sim| sim.cpu.stats.insts_pseudoretired >= 2);
    assert!(!ctx.sim.cpu.halted);
    assert!(ctx.sim.cpu.in_runahead[0]);

    ctx.run_to_halt(10_000);
    assert_eq!(ctx.sim.cpu.stats.runahead_periods, 1);
}

/// Pointer chase: the second load's address comes from the first, so it is
/// poisoned during the period and stays cold for afterwards.
const POINTER_CHASE: &str = "\
    li   r1, 0x100
    ld   r2, 0(r1), 8
    ld   r3, 0(r2), 8
    halt";

#[test]
fn test_entry_refused_when_periods_would_overlap() {
    let mut config = Config::default();
    config.runahead.lll_depth_threshold = 2;
    config.runahead.allow_overlapping_runahead = false;

    let mut ctx = TestContext::with_config(POINTER_CHASE, config);
    ctx.poke_mem(BASE, &0x4000u64.to_le_bytes());
    ctx.force_depth(BASE, 3);
    ctx.run_to_halt(10_000);

    // Only one commit separates the periods, far less than the first
    // period's pseudoretired work: the second entry is refused.
    assert_eq!(ctx.sim.cpu.stats.runahead_periods, 1);
    assert!(ctx.sim.cpu.stats.refused_entries_overlap >= 1);
    assert_eq!(ctx.int_reg(3), ctx.peek_u64(0x4000));
}

#[test]
fn test_overlapping_periods_allowed_when_configured() {
    let mut config = Config::default();
    config.runahead.lll_depth_threshold = 2;
    config.runahead.allow_overlapping_runahead = true;

    let mut ctx = TestContext::with_config(POINTER_CHASE, config);
    ctx.poke_mem(BASE, &0x4000u64.to_le_bytes());
    ctx.force_depth(BASE, 3);
    ctx.run_to_halt(10_000);

    assert_eq!(ctx.sim.cpu.stats.runahead_periods, 2);
    assert_eq!(ctx.sim.cpu.stats.refused_entries_overlap, 0);
    assert_eq!(ctx.int_reg(3), ctx.peek_u64(0x4000));
}

#[test]
fn test_strictly_ordered_load_waits_for_stores() {
    // The ordered load must observe the older store's data, which means it
    // only issued after the store drained to memory.
    let program = "\
        li   r1, 0x100
        li   r2, 77
        st   r2, 0(r1), 8
        ldo  r3, 0(r1), 8
        halt";

    let mut ctx = TestContext::new(program);
    ctx.run_to_halt(10_000);

    assert_eq!(ctx.int_reg(3), 77);
    assert_eq!(ctx.peek_u64(BASE), 77);
    // No forwarding happened; the data came from memory.
    assert_eq!(ctx.sim.cpu.stats.forwarded_loads, 0);
}

#[test]
fn test_interrupt_redirects_at_boundary() {
    // nops loop forever at pc 0..2; the interrupt redirects to the handler
    // at the trap vector.
    let program = "\
        nop
        nop
        jmp  0
        halt";

    let mut ctx = TestContext::new(program);
    ctx.sim.cpu.trap_vector = Some(3); // the halt
    ctx.run_until(100, |sim| sim.cpu.stats.insts_committed >= 5);

    ctx.sim.cpu.pending_interrupt = Some(1);
    ctx.run_to_halt(1000);
}

#[test]
fn test_branch_mispredict_inside_runahead() {
    // A taken branch on the speculative path squashes younger runahead
    // work without disturbing the period itself.
    let mut config = Config::default();
    config.runahead.lll_depth_threshold = 2;

    // The mul chain delays the branch until well after runahead entry, so
    // it resolves as a runahead instruction.
    let program = "\
        li   r1, 0x100
        li   r3, 1
        ld   r2, 0(r1), 8
        mul  r6, r3, r3
        mul  r6, r6, r6
        mul  r6, r6, r6
        mul  r6, r6, r6
        mul  r6, r6, r6
        mul  r6, r6, r6
        bne  r3, r0, 11
        add  r4, r3, r3
        halt";

    let mut ctx = TestContext::with_config(program, config);
    ctx.force_depth(BASE, 3);
    ctx.run_to_halt(10_000);

    assert!(ctx.sim.cpu.stats.runahead_branch_mispredicts >= 1);
    assert_eq!(ctx.sim.cpu.stats.runahead_periods, 1);
    // The not-taken-path add never commits.
    assert_eq!(ctx.int_reg(4), 0);
}
