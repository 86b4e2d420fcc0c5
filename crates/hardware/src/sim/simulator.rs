//! Top-level simulation loop.
//!
//! One `tick` is one CPU cycle:
//! 1. Apply the architectural-restore pulse posted by commit last cycle.
//! 2. Dispatch due one-shot events (traps, deadline, delayed writebacks).
//! 3. Deliver due memory responses to the LSQ.
//! 4. Run the pipeline stages and rotate the time buffer.
//! 5. Garbage-collect retired and squashed instructions.

use crate::common::{Cycle, ThreadId};
use crate::config::Config;
use crate::core::pipeline::Pipeline;
use crate::core::Cpu;

use super::events::EventKind;
use super::program::Program;

/// The simulator: a CPU plus its pipeline, driven cycle by cycle.
#[derive(Debug)]
pub struct Simulator {
    pub cpu: Cpu,
    pub pipeline: Pipeline,
}

impl Simulator {
    pub fn new(config: &Config, program: Program) -> Self {
        Self {
            cpu: Cpu::new(config),
            pipeline: Pipeline::new(config, program),
        }
    }

    /// Run one cycle.
    pub fn tick(&mut self) {
        let cpu = &mut self.cpu;
        let pl = &mut self.pipeline;
        let now = cpu.cycle;
        let tid: ThreadId = 0;

        // The arch-restore pulse is self-addressed: commit wrote it last
        // cycle, the CPU acts on it now, after every stage has observed the
        // squash.
        if pl.buf.read(1).commit_info[tid].arch_restore {
            cpu.restore_checkpoint_state(pl, tid);
        }

        // One-shot events due this cycle.
        while let Some(event) = cpu.events.pop_due(now) {
            match event.kind {
                EventKind::Trap { tid, in_runahead } => {
                    // A trap raised in runahead is dead once runahead exits.
                    if in_runahead && !cpu.in_runahead[tid] {
                        continue;
                    }
                    pl.commit.trap_squash[tid] = true;
                }
                EventKind::RunaheadDeadline { tid, cause_seq } => {
                    // Liveness: the period may already be over, exiting, or
                    // a different period entirely.
                    if !cpu.in_runahead[tid] || pl.commit.exit_runahead[tid] {
                        continue;
                    }
                    if cpu.runahead_cause[tid] != Some(cause_seq) {
                        continue;
                    }
                    pl.commit.exit_runahead[tid] = true;
                    cpu.stats.exit_cause_deadline += 1;
                }
                EventKind::LoadWriteback { seq, ref pkt } => {
                    if pl.lsq.writeback_load(&mut pl.pool, pkt).is_some() {
                        crate::core::pipeline::iew::writeback_inst(cpu, pl, seq);
                    }
                }
            }
        }

        // Memory responses due this cycle.
        let responses = cpu.mem.take_due(now);
        for pkt in responses {
            // The cause only matters while the period is live; a stale
            // response after exit must not re-signal.
            let live_cause = if cpu.in_runahead[tid] {
                cpu.runahead_cause[tid]
            } else {
                None
            };
            let action = pl.lsq.recv_timing_resp(
                &mut pl.pool,
                &mut cpu.stats,
                pkt.clone(),
                cpu.in_runahead[tid],
                live_cause,
            );
            if action.lll_returned {
                cpu.runahead_lll_return(pl, tid);
            }
            if let Some(seq) = action.writeback {
                if pl.lsq.writeback_load(&mut pl.pool, &pkt).is_some() {
                    crate::core::pipeline::iew::writeback_inst(cpu, pl, seq);
                }
            }
        }

        pl.tick(cpu);

        pl.pool.sweep_squashed(now);
        pl.pool.cleanup(now);

        cpu.cycle += 1;
        cpu.stats.cycles += 1;
    }

    /// Run until the program halts or `max_cycles` elapse. Returns the
    /// cycle count.
    pub fn run(&mut self, max_cycles: Cycle) -> Cycle {
        while !self.cpu.halted && self.cpu.cycle < max_cycles {
            self.tick();
        }
        self.cpu.cycle
    }
}
