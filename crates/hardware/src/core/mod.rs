//! CPU core.
//!
//! The `Cpu` owns the architectural machinery (register file, rename maps,
//! free list, scoreboard, checkpoint, misc registers), the memory model,
//! the event queue and statistics, and drives runahead mode: entry guards,
//! entry, the long-latency-load poisoning, exit bookkeeping, and the
//! architectural restore with its self-validation hook.

pub mod arch;
pub mod inst;
pub mod lsq;
pub mod mem;
pub mod pipeline;
pub mod rcache;

use crate::common::{
    Addr, Cycle, InstSeqNum, RegClass, RegId, RegVal, ThreadId, MAX_THREADS,
};
use crate::config::Config;
use crate::sim::events::EventQueue;
use crate::stats::SimStats;

use arch::{ArchCheckpoint, FreeList, PhysRegFile, RenameMap};
use mem::MemoryHierarchy;
use pipeline::{Pipeline, Scoreboard};

/// Plain copy of the architectural state, used to validate the checkpoint
/// machinery across a runahead period.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ValidationSnapshot {
    int: Vec<RegVal>,
    float: Vec<RegVal>,
    cc: Vec<RegVal>,
    misc: Vec<RegVal>,
}

/// The CPU: architectural state plus runahead mode control.
#[derive(Debug)]
pub struct Cpu {
    pub config: Config,
    pub trace: bool,
    pub cycle: Cycle,
    next_seq: InstSeqNum,

    pub regfile: PhysRegFile,
    /// Frontend map, speculatively updated at rename.
    pub rename_map: RenameMap,
    /// Commit map, reflecting the last non-runahead retirement.
    pub commit_rename_map: RenameMap,
    pub free_list: FreeList,
    pub scoreboard: Scoreboard,
    pub checkpoint: ArchCheckpoint,
    pub misc_regs: Vec<RegVal>,

    pub mem: MemoryHierarchy,
    pub events: EventQueue,
    pub stats: SimStats,

    pub in_runahead: [bool; MAX_THREADS],
    pub runahead_cause: [Option<InstSeqNum>; MAX_THREADS],
    /// PC fetch resumes at after the exit squash: the triggering load's PC.
    pub runahead_resume_pc: [Addr; MAX_THREADS],
    runahead_entered_cycle: Cycle,
    /// Set while vector-class state could have diverged (never in this
    /// model; kept clear by the restore).
    pub possibly_diverging: [bool; MAX_THREADS],
    validation: [Option<ValidationSnapshot>; MAX_THREADS],

    /// A Halt instruction committed.
    pub halted: bool,
    /// External interrupt line, polled by commit at retirement boundaries.
    pub pending_interrupt: Option<u64>,
    /// Architectural trap redirect target; `None` halts on a real fault.
    pub trap_vector: Option<Addr>,
}

impl Cpu {
    pub fn new(config: &Config) -> Self {
        let regs = config.pipeline.phys_regs_per_class;
        let regfile = PhysRegFile::new(regs);
        let mut free_list = FreeList::new(regs);
        let mut rename_map = RenameMap::new(
            config.arch_regs(RegClass::Int),
            config.arch_regs(RegClass::Float),
            config.arch_regs(RegClass::Cc),
        );
        let mut commit_rename_map = rename_map.clone();

        // Initial pairing: both maps agree on one physical register per
        // architectural register.
        for class in RegClass::RENAMED {
            for idx in 0..rename_map.num_regs(class) {
                let arch = RegId::new(class, idx);
                let phys = free_list.get_reg(class).expect("physical file too small");
                rename_map.set_entry(arch, phys);
                commit_rename_map.set_entry(arch, phys);
            }
        }

        Self {
            trace: config.trace,
            cycle: 0,
            next_seq: 1,
            regfile,
            rename_map,
            commit_rename_map,
            free_list,
            scoreboard: Scoreboard::new(regs),
            checkpoint: ArchCheckpoint::new(
                config.arch_regs(RegClass::Int),
                config.arch_regs(RegClass::Float),
                config.arch_regs(RegClass::Cc),
                config.arch_regs(RegClass::Misc),
            ),
            misc_regs: vec![0; config.arch_regs(RegClass::Misc)],
            mem: MemoryHierarchy::new(&config.memory),
            events: EventQueue::new(),
            stats: SimStats::default(),
            in_runahead: [false; MAX_THREADS],
            runahead_cause: [None; MAX_THREADS],
            runahead_resume_pc: [0; MAX_THREADS],
            runahead_entered_cycle: 0,
            possibly_diverging: [false; MAX_THREADS],
            validation: std::array::from_fn(|_| None),
            halted: false,
            pending_interrupt: None,
            trap_vector: None,
            config: config.clone(),
        }
    }

    pub fn next_seq_num(&mut self) -> InstSeqNum {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Committed architectural value of a register.
    pub fn get_arch_reg(&self, arch: RegId) -> RegVal {
        if arch.class == RegClass::Misc {
            self.misc_regs[arch.index]
        } else {
            self.regfile.read(self.commit_rename_map.lookup(arch))
        }
    }

    /// Set an architectural register. Only meaningful while no instructions
    /// are in flight (both maps agree), e.g. harness setup.
    pub fn set_arch_reg(&mut self, arch: RegId, val: RegVal) {
        if arch.class == RegClass::Misc {
            self.misc_regs[arch.index] = val;
        } else {
            self.regfile.write(self.commit_rename_map.lookup(arch), val);
            self.regfile.write(self.rename_map.lookup(arch), val);
        }
    }

    /// Set or clear a physical register's poison, with per-class counting.
    pub fn set_reg_poisoned(&mut self, reg: crate::common::PhysRegId, poisoned: bool) {
        if self.regfile.is_poisoned(reg) == poisoned {
            return;
        }
        self.regfile.set_poisoned(reg, poisoned);
        match (reg.class, poisoned) {
            (RegClass::Int, true) => self.stats.int_reg_poisoned += 1,
            (RegClass::Int, false) => self.stats.int_reg_cured += 1,
            (RegClass::Float, true) => self.stats.float_reg_poisoned += 1,
            (RegClass::Float, false) => self.stats.float_reg_cured += 1,
            (RegClass::Cc, true) => self.stats.cc_reg_poisoned += 1,
            (RegClass::Cc, false) => self.stats.cc_reg_cured += 1,
            _ => {}
        }
    }

    /// Whether this instruction is the one whose miss triggered the current
    /// runahead period.
    pub fn inst_caused_runahead(&self, tid: ThreadId, seq: InstSeqNum) -> bool {
        self.in_runahead[tid] && self.runahead_cause[tid] == Some(seq)
    }

    /// Entry guards. Refusals are counted by cause.
    fn can_enter_runahead(&mut self, pl: &Pipeline, tid: ThreadId, seq: InstSeqNum) -> bool {
        if !self.config.runahead.enable_runahead {
            return false;
        }
        if self.in_runahead[tid] {
            return false;
        }

        // A load that has been in flight a long time should return soon;
        // the period would be too short to be worth the overhead.
        let first_issue = pl
            .pool
            .get(seq)
            .and_then(|inst| inst.first_issue)
            .unwrap_or(self.cycle);
        let in_flight_cycles = self.cycle.saturating_sub(first_issue);
        if in_flight_cycles > self.config.runahead.runahead_in_flight_threshold {
            self.stats.refused_entries_return_soon += 1;
            return false;
        }

        // The pipeline must have caught up with the previous period's work,
        // or the periods would overlap.
        if !self.config.runahead.allow_overlapping_runahead
            && pl.commit.insts_between_runahead[tid] < pl.commit.insts_pseudoretired[tid]
        {
            self.stats.refused_entries_overlap += 1;
            return false;
        }

        true
    }

    /// Enter runahead: checkpoint, mode switch, window poisoning.
    pub fn enter_runahead(&mut self, pl: &mut Pipeline, tid: ThreadId) {
        let head_seq = pl.rob.read_head(tid).expect("runahead entry with empty ROB");
        {
            let head = pl.pool.get(head_seq).expect("ROB head not in pool");
            assert!(head.op.is_load() && !head.is_squashed() && !head.is_runahead());
        }

        if !self.can_enter_runahead(pl, tid, head_seq) {
            return;
        }

        let lll_pc = pl.pool.get(head_seq).unwrap().pc;
        if self.trace {
            eprintln!("RA  enter, cause sn={} pc={:#x}", head_seq, lll_pc);
        }

        self.save_state_for_validation(tid);
        self.checkpoint
            .full_save(&self.regfile, &self.commit_rename_map, &self.misc_regs, lll_pc);

        self.in_runahead[tid] = true;
        self.runahead_cause[tid] = Some(head_seq);
        self.runahead_resume_pc[tid] = lll_pc;

        // Mark the entire instruction window, not just the ROB: younger
        // instructions may still sit in frontend buffers.
        for inst in pl.pool.iter_mut() {
            if inst.tid == tid && !inst.is_committed() {
                inst.set_runahead();
            }
        }

        pl.rcache.invalidate_cache(&mut self.stats);
        self.handle_runahead_lll(pl, head_seq);

        pl.commit.insts_pseudoretired[tid] = 0;
        self.runahead_entered_cycle = self.cycle;
        self.stats.runahead_periods += 1;
    }

    /// Poison a long-latency load and forge its response so it drains out
    /// of the pipeline with zeroed data.
    pub fn handle_runahead_lll(&mut self, pl: &mut Pipeline, seq: InstSeqNum) {
        {
            let inst = pl.pool.get_mut(seq).expect("LLL not in pool");
            assert!(inst.op.is_load() && inst.has_request());
            inst.set_poisoned();
            inst.set_executed();
        }
        pl.lsq
            .forge_response(&mut pl.pool, &mut self.events, &mut self.stats, seq, self.cycle);
    }

    /// The triggering load's real response arrived; let commit decide when
    /// to exit.
    pub fn runahead_lll_return(&mut self, pl: &mut Pipeline, tid: ThreadId) {
        let cause = self.runahead_cause[tid].expect("LLL return outside runahead");
        if self.trace {
            eprintln!("RA  LLL sn={} returned, signalling exit", cause);
        }
        pl.commit.signal_exit_runahead(
            tid,
            cause,
            self.cycle,
            self.config.runahead.runahead_exit_policy,
            self.config.runahead.min_runahead_work,
            self.config.runahead.runahead_exit_deadline,
            &mut self.events,
            &mut self.stats,
        );
    }

    /// Mode bookkeeping at the exit squash.
    pub fn exit_runahead(&mut self, pl: &mut Pipeline, tid: ThreadId) {
        let period = self.cycle.saturating_sub(self.runahead_entered_cycle);
        if self.trace {
            eprintln!(
                "RA  exit after {} cycles, {} pseudoretired",
                period, pl.commit.insts_pseudoretired[tid]
            );
        }
        self.stats.runahead_cycles += period;
        self.in_runahead[tid] = false;

        pl.fetch.insts_between_runahead = 0;
        pl.commit.insts_between_runahead[tid] = 0;
    }

    /// Architectural restore, one cycle after the exit squash was posted.
    ///
    /// Rebuilds the rename machinery from scratch: every physical register
    /// returns to the free list, both maps are re-paired on fresh registers,
    /// values and misc registers come back from the checkpoint, and all
    /// poison is cured.
    pub fn restore_checkpoint_state(&mut self, pl: &mut Pipeline, tid: ThreadId) {
        if self.trace {
            eprintln!("RA  architectural restore");
        }
        pl.rob.arch_restore_sanity_check(tid, &pl.pool);

        self.free_list.reset();
        self.rename_map.reset();
        self.commit_rename_map.reset();

        // The history buffer should be empty already, but any undo applied
        // on top of the re-pairing would corrupt the maps.
        pl.rename.clear_history();

        for class in RegClass::RENAMED {
            for idx in 0..self.rename_map.num_regs(class) {
                let arch = RegId::new(class, idx);
                let phys = self.free_list.get_reg(class).expect("free list just reset");
                self.rename_map.set_entry(arch, phys);
                self.commit_rename_map.set_entry(arch, phys);
            }
        }
        self.scoreboard.set_all_ready();

        self.checkpoint
            .restore(&mut self.regfile, &self.commit_rename_map, &mut self.misc_regs);
        self.regfile.clear_all_poison();
        self.possibly_diverging[tid] = false;

        self.check_state_for_validation(tid);
        self.runahead_cause[tid] = None;
    }

    fn snapshot_arch_state(&self) -> ValidationSnapshot {
        let grab = |class: RegClass, count: usize| -> Vec<RegVal> {
            (0..count)
                .map(|idx| self.get_arch_reg(RegId::new(class, idx)))
                .collect()
        };
        ValidationSnapshot {
            int: grab(RegClass::Int, self.config.registers.num_int_regs),
            float: grab(RegClass::Float, self.config.registers.num_float_regs),
            cc: grab(RegClass::Cc, self.config.registers.num_cc_regs),
            misc: self.misc_regs.clone(),
        }
    }

    /// Plain snapshot taken at runahead entry, used to validate the
    /// checkpoint restore.
    fn save_state_for_validation(&mut self, tid: ThreadId) {
        self.validation[tid] = Some(self.snapshot_arch_state());
    }

    /// A mismatch after restore means the checkpoint machinery is broken;
    /// continuing would silently corrupt architectural state.
    fn check_state_for_validation(&mut self, tid: ThreadId) {
        let Some(saved) = self.validation[tid].take() else {
            return;
        };
        let live = self.snapshot_arch_state();
        assert_eq!(
            saved, live,
            "architectural state diverged across a runahead period"
        );
    }
}
