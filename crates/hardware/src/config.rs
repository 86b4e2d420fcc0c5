//! Configuration system for the runahead simulator.
//!
//! This module defines all configuration structures and enums used to
//! parameterize the simulator. It provides:
//! 1. **Defaults:** Baseline hardware constants (pipeline widths, queue
//!    depths, runahead thresholds, memory timing).
//! 2. **Structures:** Hierarchical config for pipeline, runahead, and memory.
//! 3. **Enums:** Runahead exit policy selection.
//!
//! Configuration is supplied as JSON through the CLI or built with
//! `Config::default()` in tests.

use serde::Deserialize;

/// Default configuration constants for the simulator.
///
/// These values define the baseline hardware configuration when not
/// explicitly overridden.
mod defaults {
    /// Reorder buffer capacity in instructions.
    pub const ROB_ENTRIES: usize = 192;

    /// Load queue capacity.
    pub const LQ_ENTRIES: usize = 32;

    /// Store queue capacity.
    pub const SQ_ENTRIES: usize = 32;

    /// Physical registers per renamed register class.
    ///
    /// Must cover two full architectural sets (frontend + commit maps agree
    /// on a fresh pairing after an architectural restore) plus rename slack.
    pub const PHYS_REGS_PER_CLASS: usize = 128;

    /// Architectural integer registers.
    pub const NUM_INT_REGS: usize = 32;

    /// Architectural floating-point registers.
    pub const NUM_FLOAT_REGS: usize = 32;

    /// Architectural condition-code registers.
    pub const NUM_CC_REGS: usize = 4;

    /// Miscellaneous registers (not renamed).
    pub const NUM_MISC_REGS: usize = 8;

    /// Instructions fetched per cycle.
    pub const FETCH_WIDTH: usize = 4;

    /// Instructions decoded per cycle.
    pub const DECODE_WIDTH: usize = 4;

    /// Instructions renamed per cycle.
    pub const RENAME_WIDTH: usize = 4;

    /// Instructions issued per cycle.
    pub const ISSUE_WIDTH: usize = 4;

    /// Instructions committed per cycle.
    pub const COMMIT_WIDTH: usize = 4;

    /// ROB entries squashed per cycle while draining a squash.
    pub const SQUASH_WIDTH: usize = 8;

    /// Cycles from IEW writeback to commit visibility.
    pub const IEW_TO_COMMIT_DELAY: usize = 1;

    /// Cycles from commit signals back to IEW.
    pub const COMMIT_TO_IEW_DELAY: usize = 1;

    /// Cycles from rename dispatch to ROB insertion.
    pub const RENAME_TO_ROB_DELAY: usize = 1;

    /// Cycles from commit redirects back to fetch.
    pub const COMMIT_TO_FETCH_DELAY: usize = 1;

    /// Cycles from trap detection at commit to the trap squash.
    pub const TRAP_LATENCY: u64 = 13;

    /// Cycles before a failed syscall is retried.
    pub const SYSCALL_RETRY_LATENCY: u64 = 10000;

    /// Memory-hierarchy depth at which a pending load becomes an LLL.
    pub const LLL_DEPTH_THRESHOLD: usize = 2;

    /// Maximum cycles a load may already have been in-flight for a runahead
    /// entry to still be worthwhile.
    pub const RUNAHEAD_IN_FLIGHT_THRESHOLD: u64 = 50;

    /// Hard deadline (cycles) from the exit signal to a forced runahead exit.
    pub const RUNAHEAD_EXIT_DEADLINE: u64 = 200;

    /// Minimum pseudoretired instructions for the MinimumWork exit policy.
    pub const MIN_RUNAHEAD_WORK: u64 = 50;

    /// Runahead cache size in bytes.
    pub const RUNAHEAD_CACHE_SIZE: u64 = 2048;

    /// Runahead cache block size in bytes.
    pub const RUNAHEAD_CACHE_BLOCK_SIZE: u64 = 64;

    /// Access latency (cycles) of each memory-hierarchy level, innermost
    /// first. The last entry models main memory.
    pub const MEM_LEVEL_LATENCIES: [u64; 4] = [2, 12, 40, 180];

    /// Modeled memory size in bytes. Accesses beyond this fault.
    pub const MEM_SIZE: u64 = 1 << 20;
}

/// Runahead exit policy: what commit does when the triggering load's real
/// memory response returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum RunaheadExitPolicy {
    /// Exit as soon as the response arrives.
    #[default]
    Eager,
    /// Exit once at least `min_runahead_work` instructions pseudoretired.
    MinimumWork,
    /// Reserved. Accepted by the config but rejected at use.
    DynamicDelayed,
}

/// Pipeline widths and inter-stage latencies.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Instructions fetched per cycle.
    pub fetch_width: usize,
    /// Instructions decoded per cycle.
    pub decode_width: usize,
    /// Instructions renamed per cycle.
    pub rename_width: usize,
    /// Instructions issued per cycle.
    pub issue_width: usize,
    /// Instructions committed per cycle.
    pub commit_width: usize,
    /// ROB entries squashed per cycle.
    pub squash_width: usize,
    /// Cycles from IEW writeback to commit visibility.
    pub iew_to_commit_delay: usize,
    /// Cycles from commit signals back to IEW.
    pub commit_to_iew_delay: usize,
    /// Cycles from rename dispatch to ROB insertion.
    pub rename_to_rob_delay: usize,
    /// Cycles from commit redirects back to fetch.
    pub commit_to_fetch_delay: usize,
    /// Reorder buffer capacity.
    pub rob_entries: usize,
    /// Load queue capacity.
    pub lq_entries: usize,
    /// Store queue capacity.
    pub sq_entries: usize,
    /// Physical registers per renamed class.
    pub phys_regs_per_class: usize,
    /// Cycles from trap detection to the trap squash.
    pub trap_latency: u64,
    /// Cycles before a failed syscall retries.
    pub syscall_retry_latency: u64,
    /// Enforce TSO store ordering (at most one in-flight store).
    pub needs_tso: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fetch_width: defaults::FETCH_WIDTH,
            decode_width: defaults::DECODE_WIDTH,
            rename_width: defaults::RENAME_WIDTH,
            issue_width: defaults::ISSUE_WIDTH,
            commit_width: defaults::COMMIT_WIDTH,
            squash_width: defaults::SQUASH_WIDTH,
            iew_to_commit_delay: defaults::IEW_TO_COMMIT_DELAY,
            commit_to_iew_delay: defaults::COMMIT_TO_IEW_DELAY,
            rename_to_rob_delay: defaults::RENAME_TO_ROB_DELAY,
            commit_to_fetch_delay: defaults::COMMIT_TO_FETCH_DELAY,
            rob_entries: defaults::ROB_ENTRIES,
            lq_entries: defaults::LQ_ENTRIES,
            sq_entries: defaults::SQ_ENTRIES,
            phys_regs_per_class: defaults::PHYS_REGS_PER_CLASS,
            trap_latency: defaults::TRAP_LATENCY,
            syscall_retry_latency: defaults::SYSCALL_RETRY_LATENCY,
            needs_tso: false,
        }
    }
}

/// Runahead execution parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunaheadConfig {
    /// Master switch. When false the core behaves as a conventional
    /// out-of-order CPU.
    pub enable_runahead: bool,
    /// Memory-hierarchy depth at which a pending load becomes an LLL.
    pub lll_depth_threshold: usize,
    /// Maximum cycles a load may already have been in-flight to still
    /// justify entering runahead.
    pub runahead_in_flight_threshold: u64,
    /// Allow a new period before the pipeline has caught up with the work of
    /// the previous one.
    pub allow_overlapping_runahead: bool,
    /// Exit rule applied when the triggering load's response returns.
    pub runahead_exit_policy: RunaheadExitPolicy,
    /// `k` for the MinimumWork policy.
    pub min_runahead_work: u64,
    /// Hard deadline (cycles) after the exit signal.
    pub runahead_exit_deadline: u64,
    /// Runahead cache size in bytes.
    pub runahead_cache_size: u64,
    /// Runahead cache block size in bytes.
    pub runahead_cache_block_size: u64,
}

impl Default for RunaheadConfig {
    fn default() -> Self {
        Self {
            enable_runahead: true,
            lll_depth_threshold: defaults::LLL_DEPTH_THRESHOLD,
            runahead_in_flight_threshold: defaults::RUNAHEAD_IN_FLIGHT_THRESHOLD,
            allow_overlapping_runahead: false,
            runahead_exit_policy: RunaheadExitPolicy::Eager,
            min_runahead_work: defaults::MIN_RUNAHEAD_WORK,
            runahead_exit_deadline: defaults::RUNAHEAD_EXIT_DEADLINE,
            runahead_cache_size: defaults::RUNAHEAD_CACHE_SIZE,
            runahead_cache_block_size: defaults::RUNAHEAD_CACHE_BLOCK_SIZE,
        }
    }
}

/// Memory-hierarchy timing model.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Access latency of each hierarchy level, innermost first. A request
    /// that hits at depth `d` completes after `level_latencies[d]` cycles.
    pub level_latencies: Vec<u64>,
    /// Modeled memory size in bytes.
    pub mem_size: u64,
    /// Maximum requests the data port accepts before it blocks.
    pub port_slots: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            level_latencies: defaults::MEM_LEVEL_LATENCIES.to_vec(),
            mem_size: defaults::MEM_SIZE,
            port_slots: 8,
        }
    }
}

/// Architectural register counts.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegisterConfig {
    /// Architectural integer registers.
    pub num_int_regs: usize,
    /// Architectural floating-point registers.
    pub num_float_regs: usize,
    /// Architectural condition-code registers.
    pub num_cc_regs: usize,
    /// Miscellaneous registers.
    pub num_misc_regs: usize,
}

impl Default for RegisterConfig {
    fn default() -> Self {
        Self {
            num_int_regs: defaults::NUM_INT_REGS,
            num_float_regs: defaults::NUM_FLOAT_REGS,
            num_cc_regs: defaults::NUM_CC_REGS,
            num_misc_regs: defaults::NUM_MISC_REGS,
        }
    }
}

/// Root configuration type.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Pipeline widths, depths and latencies.
    pub pipeline: PipelineConfig,
    /// Runahead execution parameters.
    pub runahead: RunaheadConfig,
    /// Memory-hierarchy timing.
    pub memory: MemoryConfig,
    /// Architectural register counts.
    pub registers: RegisterConfig,
    /// Emit per-stage trace lines to stderr.
    pub trace: bool,
}

impl Config {
    /// Number of architectural registers in a renamed class.
    pub fn arch_regs(&self, class: crate::common::RegClass) -> usize {
        use crate::common::RegClass;
        match class {
            RegClass::Int => self.registers.num_int_regs,
            RegClass::Float => self.registers.num_float_regs,
            RegClass::Cc => self.registers.num_cc_regs,
            RegClass::Misc => self.registers.num_misc_regs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_sane() {
        let config = Config::default();
        assert!(config.runahead.enable_runahead);
        assert_eq!(config.runahead.lll_depth_threshold, 2);
        assert_eq!(config.runahead.runahead_exit_policy, RunaheadExitPolicy::Eager);
        // Two full architectural sets must fit in the physical file.
        assert!(
            config.pipeline.phys_regs_per_class >= 2 * config.registers.num_int_regs
        );
    }
}
