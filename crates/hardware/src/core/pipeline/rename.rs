//! Rename stage.
//!
//! Allocates physical destination registers, captures source mappings, and
//! dispatches instructions into the LSQ and toward the ROB/IEW. Keeps the
//! history buffer that makes squashes undoable: each allocation records the
//! previous mapping so a squash can walk the history youngest-first,
//! restoring the map and refilling the free list.

use std::collections::VecDeque;

use crate::common::{InstSeqNum, PhysRegId, RegId, ThreadId};
use crate::core::Cpu;

use super::Pipeline;

/// One rename-history record: enough to undo or to retire an allocation.
#[derive(Clone, Copy, Debug)]
pub struct HistoryEntry {
    pub seq: InstSeqNum,
    pub arch: RegId,
    pub new_phys: PhysRegId,
    pub prev_phys: PhysRegId,
}

/// Rename stage state.
#[derive(Debug, Default)]
pub struct RenameStage {
    pub in_queue: VecDeque<InstSeqNum>,
    /// Undo chain, oldest first.
    pub history: VecDeque<HistoryEntry>,
    /// Dispatch-group sizes from the last `rename_to_rob_delay` cycles, not
    /// yet visible in commit's free-entry wire.
    recent_dispatch: VecDeque<usize>,
}

impl RenameStage {
    /// Drop the whole undo chain without freeing anything. Only valid when
    /// the free list is about to be rebuilt (architectural restore).
    pub fn clear_history(&mut self) {
        self.history.clear();
    }
}

pub fn tick(cpu: &mut Cpu, pl: &mut Pipeline) {
    let tid: ThreadId = 0;
    let ci = pl.buf.read(1).commit_info[tid].clone();

    if ci.squash {
        undo_history(cpu, pl, ci.done_seq_num);
        let squashed: Vec<InstSeqNum> = pl
            .rename
            .in_queue
            .iter()
            .copied()
            .filter(|&s| s > ci.done_seq_num)
            .collect();
        for seq in squashed {
            if let Some(inst) = pl.pool.get_mut(seq) {
                inst.set_squashed();
            }
        }
        pl.rename.in_queue.retain(|&s| s <= ci.done_seq_num);
    } else {
        retire_history(cpu, pl, ci.done_seq_num);
    }

    let delay = cpu.config.pipeline.rename_to_rob_delay;
    let mut dispatched = 0;

    if !ci.rob_squashing {
        let in_transit: usize = pl.rename.recent_dispatch.iter().sum();
        let available_rob = ci.free_rob_entries.saturating_sub(in_transit);
        let width = cpu.config.pipeline.rename_width;

        while dispatched < width {
            let Some(&seq) = pl.rename.in_queue.front() else {
                break;
            };
            let squashed = pl.pool.get(seq).map(|i| i.is_squashed()).unwrap_or(true);
            if squashed {
                pl.rename.in_queue.pop_front();
                continue;
            }
            if dispatched >= available_rob {
                break;
            }

            let (op, dests) = {
                let inst = pl.pool.get(seq).unwrap();
                (inst.op, inst.dest_arch.clone())
            };

            // Structural back-pressure: LSQ slots and free registers.
            let needs_lq = op.is_load() || op.is_htm_start() || op.is_htm_stop();
            let needs_sq = op.is_store();
            if needs_lq && pl.lsq.lq_full() {
                break;
            }
            if needs_sq && pl.lsq.sq_full() {
                break;
            }
            let mut can_rename = true;
            for arch in &dests {
                if !cpu.free_list.has_free(arch.class, 1) {
                    can_rename = false;
                }
            }
            if !can_rename {
                break;
            }

            pl.rename.in_queue.pop_front();

            let inst = pl.pool.get_mut(seq).unwrap();
            for arch in &inst.src_arch {
                inst.src_phys.push(cpu.rename_map.lookup(*arch));
            }
            for arch in &dests {
                let info = cpu
                    .rename_map
                    .rename(*arch, &mut cpu.free_list)
                    .expect("free list checked above");
                inst.dest_phys.push(info.new_phys);
                cpu.scoreboard.unset_ready(info.new_phys);
                pl.rename.history.push_back(HistoryEntry {
                    seq,
                    arch: *arch,
                    new_phys: info.new_phys,
                    prev_phys: info.prev_phys,
                });
            }

            if cpu.trace {
                eprintln!("RN  pc={:#x} sn={}", inst.pc, seq);
            }

            if needs_lq {
                pl.lsq.insert_load(&mut pl.pool, seq);
            } else if needs_sq {
                pl.lsq.insert_store(&mut pl.pool, seq);
            }

            pl.buf.now().rename_to_iew.push(seq);
            dispatched += 1;
        }
    }

    pl.rename.recent_dispatch.push_back(dispatched);
    while pl.rename.recent_dispatch.len() > delay {
        pl.rename.recent_dispatch.pop_front();
    }
}

/// Undo allocations younger than `done_seq_num`, youngest first.
fn undo_history(cpu: &mut Cpu, pl: &mut Pipeline, done_seq_num: InstSeqNum) {
    while let Some(&entry) = pl.rename.history.back() {
        if entry.seq <= done_seq_num {
            break;
        }
        cpu.rename_map.set_entry(entry.arch, entry.prev_phys);
        cpu.free_list.free_reg(entry.new_phys);
        cpu.scoreboard.set_ready(entry.new_phys);
        pl.rename.history.pop_back();
    }
}

/// Release the previous mappings of retired allocations, oldest first.
fn retire_history(cpu: &mut Cpu, pl: &mut Pipeline, done_seq_num: InstSeqNum) {
    while let Some(&entry) = pl.rename.history.front() {
        if entry.seq > done_seq_num {
            break;
        }
        cpu.free_list.free_reg(entry.prev_phys);
        pl.rename.history.pop_front();
    }
}
