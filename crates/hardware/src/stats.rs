//! Simulation statistics collection and reporting.
//!
//! This module tracks performance metrics for the runahead simulator. It
//! provides:
//! 1. **Cycle and IPC:** Total cycles, retired instructions, derived CPI.
//! 2. **Runahead:** Periods, pseudoretired instructions, refused entries,
//!    exit causes, overhead cycles.
//! 3. **Poison:** Per-class register poison/cure counts and forwarded poison.
//! 4. **Runahead cache:** Lookups, writes, conflicts, cleanses, hits, misses.
//! 5. **LSQ:** Forwarding, forged responses, violations, stale packets.

/// Simulation statistics structure tracking all performance metrics.
#[derive(Clone, Debug, Default)]
pub struct SimStats {
    /// Total simulator cycles elapsed.
    pub cycles: u64,
    /// Instructions committed outside runahead.
    pub insts_committed: u64,
    /// Instructions pseudoretired while in runahead.
    pub insts_pseudoretired: u64,
    /// Squashed instructions drained through commit.
    pub insts_squashed: u64,
    /// Poisoned instructions that pseudoretired.
    pub commit_poisoned_insts: u64,
    /// Cycles commit spent draining a squash.
    pub squash_cycles: u64,

    /// Branch mispredicts resolved against real (non-runahead) instructions.
    pub real_branch_mispredicts: u64,
    /// Branch mispredicts resolved against runahead instructions.
    pub runahead_branch_mispredicts: u64,

    /// Loads observed blocking at the ROB head.
    pub loads_at_rob_head: u64,
    /// Loads at the ROB head whose request depth crossed the LLL threshold.
    pub lll_at_rob_head: u64,

    /// Completed runahead periods.
    pub runahead_periods: u64,
    /// Cycles spent in runahead, summed over periods.
    pub runahead_cycles: u64,
    /// Entry refusals: the load had been in-flight too long.
    pub refused_entries_return_soon: u64,
    /// Entry refusals: the period would overlap the previous one.
    pub refused_entries_overlap: u64,
    /// Exits taken immediately under the Eager policy.
    pub exit_cause_eager: u64,
    /// Exits taken once the MinimumWork target was met.
    pub exit_cause_min_work: u64,
    /// Exits forced by the deadline timer.
    pub exit_cause_deadline: u64,
    /// Cycles from runahead exit until the next real commit.
    pub total_runahead_overhead: u64,

    /// Load responses forged so an LLL could drain.
    pub load_responses_forged: u64,
    /// Memory responses dropped because a forged response already wrote back.
    pub dropped_forged_responses: u64,
    /// Responses that arrived for runahead requests after runahead exited.
    pub stale_runahead_packets: u64,
    /// Responses dropped because the instruction was squashed.
    pub stale_squashed_packets: u64,

    /// Loads satisfied by store-to-load forwarding.
    pub forwarded_loads: u64,
    /// Poisoned stores forwarded to loads.
    pub forwarded_poisons: u64,
    /// Runahead stores forwarded to runahead loads.
    pub forwarded_runahead_loads: u64,
    /// Loads stalled on a partial store overlap and rescheduled.
    pub rescheduled_loads: u64,
    /// Memory-ordering violations detected.
    pub mem_order_violations: u64,
    /// Loads squashed by LSQ squash.
    pub squashed_loads: u64,
    /// Stores squashed by LSQ squash.
    pub squashed_stores: u64,

    /// Integer registers marked poisoned.
    pub int_reg_poisoned: u64,
    /// Integer registers cured of poison.
    pub int_reg_cured: u64,
    /// Float registers marked poisoned.
    pub float_reg_poisoned: u64,
    /// Float registers cured of poison.
    pub float_reg_cured: u64,
    /// Condition-code registers marked poisoned.
    pub cc_reg_poisoned: u64,
    /// Condition-code registers cured of poison.
    pub cc_reg_cured: u64,

    /// Runahead cache block lookups.
    pub rcache_lookups: u64,
    /// Runahead cache writes.
    pub rcache_writes: u64,
    /// Runahead cache writes that overwrote a conflicting valid block.
    pub rcache_write_conflicts: u64,
    /// Runahead cache writes carrying poisoned data.
    pub rcache_poisoned_writes: u64,
    /// Clean writes that cured a previously poisoned block.
    pub rcache_write_cleanses: u64,
    /// Runahead cache read hits.
    pub rcache_read_hits: u64,
    /// Runahead cache read misses.
    pub rcache_read_misses: u64,
    /// Blocks poisoned in place.
    pub rcache_poisons: u64,
    /// Whole-cache invalidations.
    pub rcache_invalidations: u64,
    /// Packets served by the runahead cache.
    pub rcache_packets_handled: u64,
}

impl SimStats {
    /// Cycles per committed instruction.
    pub fn cpi(&self) -> f64 {
        if self.insts_committed == 0 {
            0.0
        } else {
            self.cycles as f64 / self.insts_committed as f64
        }
    }

    /// Print a human-readable summary to stdout.
    pub fn print(&self) {
        println!("==== Simulation statistics ====");
        println!("cycles                     {}", self.cycles);
        println!("insts committed            {}", self.insts_committed);
        println!("insts pseudoretired        {}", self.insts_pseudoretired);
        println!("CPI                        {:.3}", self.cpi());
        println!("runahead periods           {}", self.runahead_periods);
        println!("runahead cycles            {}", self.runahead_cycles);
        println!(
            "refused entries            return_soon={} overlap={}",
            self.refused_entries_return_soon, self.refused_entries_overlap
        );
        println!(
            "exit causes                eager={} min_work={} deadline={}",
            self.exit_cause_eager, self.exit_cause_min_work, self.exit_cause_deadline
        );
        println!("runahead overhead cycles   {}", self.total_runahead_overhead);
        println!("load responses forged      {}", self.load_responses_forged);
        println!("forwarded loads            {}", self.forwarded_loads);
        println!("forwarded poisons          {}", self.forwarded_poisons);
        println!("mem order violations       {}", self.mem_order_violations);
        println!(
            "rcache                     hits={} misses={} writes={} conflicts={}",
            self.rcache_read_hits,
            self.rcache_read_misses,
            self.rcache_writes,
            self.rcache_write_conflicts
        );
    }
}
