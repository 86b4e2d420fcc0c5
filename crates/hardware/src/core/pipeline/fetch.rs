//! Fetch stage.
//!
//! Pulls micro-ops from the stimulus program, creates dynamic instructions,
//! and feeds decode. Branches are statically predicted not-taken; jumps
//! redirect at fetch. Instructions fetched while the CPU is in runahead are
//! born runahead.

use crate::common::{Addr, ThreadId};
use crate::core::inst::{DynInst, MicroOp};
use crate::core::Cpu;
use crate::sim::program::Program;

use super::Pipeline;

/// Fetch stage state.
#[derive(Debug)]
pub struct FetchStage {
    pub pc: Addr,
    pub program: Program,
    /// Fetch ran past a Halt; wait for a redirect before resuming.
    halted: bool,
    /// Instructions fetched since the last runahead exit.
    pub insts_between_runahead: u64,
}

impl FetchStage {
    pub fn new(program: Program) -> Self {
        Self { pc: 0, program, halted: false, insts_between_runahead: 0 }
    }
}

pub fn tick(cpu: &mut Cpu, pl: &mut Pipeline) {
    let tid: ThreadId = 0;
    let delay = cpu.config.pipeline.commit_to_fetch_delay;
    let ci = &pl.buf.read(delay).commit_info[tid];

    if ci.squash {
        pl.fetch.pc = ci.pc;
        pl.fetch.halted = false;
        if cpu.trace {
            eprintln!("FE  redirect pc={:#x}", ci.pc);
        }
        return;
    }
    if ci.rob_squashing {
        return;
    }

    let width = cpu.config.pipeline.fetch_width;
    let skid_limit = 2 * cpu.config.pipeline.decode_width;

    for _ in 0..width {
        if pl.fetch.halted || pl.decode.in_queue.len() >= skid_limit {
            break;
        }
        let Some(op) = pl.fetch.program.op_at(pl.fetch.pc) else {
            break;
        };

        let seq = cpu.next_seq_num();
        let mut inst = DynInst::new(seq, pl.fetch.pc, tid, op);
        if cpu.in_runahead[tid] {
            inst.set_runahead();
        }
        if cpu.trace {
            eprintln!("FE  pc={:#x} sn={} {:?}", pl.fetch.pc, seq, op);
        }
        pl.fetch.insts_between_runahead += 1;

        match op {
            // Jump targets are static; redirect immediately.
            MicroOp::Jump { target } => pl.fetch.pc = target,
            MicroOp::Halt => {
                pl.fetch.halted = true;
                pl.fetch.pc += 1;
            }
            _ => pl.fetch.pc += 1,
        }

        pl.pool.insert(inst);
        pl.decode.in_queue.push_back(seq);
    }
}
