//! Decode stage.
//!
//! The stimulus ISA is already decoded; this stage models the pipeline
//! depth, moving a bounded group per cycle from fetch to rename and
//! discarding squashed instructions.

use std::collections::VecDeque;

use crate::common::InstSeqNum;
use crate::core::Cpu;

use super::Pipeline;

/// Decode stage state.
#[derive(Debug, Default)]
pub struct DecodeStage {
    pub in_queue: VecDeque<InstSeqNum>,
}

pub fn tick(cpu: &mut Cpu, pl: &mut Pipeline) {
    let ci = &pl.buf.read(1).commit_info[0];
    if ci.squash {
        let done = ci.done_seq_num;
        let squashed: Vec<InstSeqNum> =
            pl.decode.in_queue.iter().copied().filter(|&s| s > done).collect();
        for seq in squashed {
            if let Some(inst) = pl.pool.get_mut(seq) {
                inst.set_squashed();
            }
        }
        pl.decode.in_queue.retain(|&s| s <= done);
    }

    let width = cpu.config.pipeline.decode_width;
    let skid_limit = 2 * cpu.config.pipeline.rename_width;

    for _ in 0..width {
        if pl.rename.in_queue.len() >= skid_limit {
            break;
        }
        let Some(seq) = pl.decode.in_queue.pop_front() else {
            break;
        };
        if pl.pool.get(seq).map(|i| i.is_squashed()).unwrap_or(true) {
            continue;
        }
        pl.rename.in_queue.push_back(seq);
    }
}
