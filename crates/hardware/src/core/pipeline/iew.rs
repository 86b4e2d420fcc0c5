//! IEW: issue, execute, writeback.
//!
//! Dispatches renamed instructions into the instruction queue, issues those
//! whose sources are ready, executes them (one-cycle ALU, LSQ-mediated
//! memory ops), and writes results back. Poison is propagated here: a
//! runahead instruction that reads a poisoned source at issue has every
//! destination poisoned at writeback. Branch mispredicts and memory-order
//! violations are signalled to commit, which owns the squash.

use std::collections::HashSet;

use crate::common::{Cycle, Fault, InstSeqNum, ThreadId};
use crate::core::inst::MicroOp;
use crate::core::lsq::LoadOutcome;
use crate::core::Cpu;

use super::Pipeline;

/// A pending squash request raised during execute.
#[derive(Clone, Copy, Debug)]
struct SquashRequest {
    seq: InstSeqNum,
    include_inst: bool,
    mispredict: bool,
    branch_taken: bool,
    pc: u64,
}

/// IEW stage state.
#[derive(Debug, Default)]
pub struct IewStage {
    /// Instruction queue: dispatched, waiting to issue. Kept sorted by age
    /// (sequence numbers arrive in order).
    pub iq: Vec<InstSeqNum>,
    /// In-flight ALU work: (completion cycle, seq).
    exec_pipe: Vec<(Cycle, InstSeqNum)>,
    /// Memory instructions waiting on a stalled store or blocked port.
    blocked_mem: HashSet<InstSeqNum>,
}

impl IewStage {
    /// Hand a load back for re-issue.
    pub fn replay(&mut self, seq: InstSeqNum) {
        self.blocked_mem.remove(&seq);
    }
}

pub fn tick(cpu: &mut Cpu, pl: &mut Pipeline) {
    let tid: ThreadId = 0;
    let ci = pl.buf.read(cpu.config.pipeline.commit_to_iew_delay).commit_info[tid].clone();

    if ci.squash {
        let done = ci.done_seq_num;
        pl.lsq.squash(&mut pl.pool, &mut cpu.stats, done);
        pl.iew.iq.retain(|&s| s <= done);
        pl.iew.exec_pipe.retain(|&(_, s)| s <= done);
        pl.iew.blocked_mem.retain(|&s| s <= done);
    }

    // Release loads whose blocking store completed.
    let replays: Vec<InstSeqNum> = pl.lsq.pending_replays.drain(..).collect();
    for seq in replays {
        pl.iew.replay(seq);
    }
    if cpu.mem.should_retry() {
        let blocked: Vec<InstSeqNum> = pl.lsq.blocked_insts.drain(..).collect();
        for seq in blocked {
            pl.iew.replay(seq);
        }
    }

    dispatch(cpu, pl);
    writeback_due(cpu, pl);
    let squash_req = issue(cpu, pl, tid);

    // Publish the oldest squash request; commit validates and broadcasts.
    if let Some(req) = squash_req {
        let info = &mut pl.buf.now().iew_info;
        info.squash = true;
        info.squashed_seq_num = req.seq;
        info.include_squash_inst = req.include_inst;
        info.mispredict_inst = if req.mispredict { Some(req.seq) } else { None };
        info.branch_taken = req.branch_taken;
        info.pc = req.pc;
    }

    pl.lsq
        .writeback_stores(&mut pl.rcache, &mut cpu.mem, &mut cpu.stats, cpu.cycle);
    pl.lsq.drain_completed_stores();
}

/// Pull the rename group dispatched one cycle ago into the IQ.
fn dispatch(cpu: &mut Cpu, pl: &mut Pipeline) {
    let group = pl.buf.read(1).rename_to_iew.clone();
    for seq in group {
        if pl.pool.get(seq).map(|i| i.is_squashed()).unwrap_or(true) {
            continue;
        }
        if cpu.trace {
            eprintln!("IQ  sn={}", seq);
        }
        pl.iew.iq.push(seq);
    }
}

/// Complete ALU work whose latency expired.
fn writeback_due(cpu: &mut Cpu, pl: &mut Pipeline) {
    let now = cpu.cycle;
    let due: Vec<InstSeqNum> = pl
        .iew
        .exec_pipe
        .iter()
        .filter(|&&(c, _)| c <= now)
        .map(|&(_, s)| s)
        .collect();
    pl.iew.exec_pipe.retain(|&(c, _)| c > now);
    for seq in due {
        writeback_inst(cpu, pl, seq);
    }
}

/// Write an instruction's result to its destinations, propagate poison, and
/// report completion to commit.
///
/// Every destination of a poisoned instruction becomes poisoned; a clean
/// write cures whatever stale poison the recycled register carried.
pub fn writeback_inst(cpu: &mut Cpu, pl: &mut Pipeline, seq: InstSeqNum) {
    let Some(inst) = pl.pool.get_mut(seq) else {
        return;
    };
    if inst.is_squashed() {
        return;
    }

    if inst.op.is_load() && !inst.mem_data.is_empty() {
        let mut bytes = [0u8; 8];
        let n = inst.mem_data.len().min(8);
        bytes[..n].copy_from_slice(&inst.mem_data[..n]);
        inst.result = u64::from_le_bytes(bytes);
    }

    inst.set_executed();
    let poisoned = inst.is_poisoned();
    let result = inst.result;
    let dests = inst.dest_phys.clone();
    let pc = inst.pc;

    for dest in dests {
        cpu.regfile.write(dest, result);
        cpu.set_reg_poisoned(dest, poisoned);
        cpu.scoreboard.set_ready(dest);
    }

    if cpu.trace {
        eprintln!("WB  pc={:#x} sn={} result={:#x} poisoned={}", pc, seq, result, poisoned);
    }

    pl.buf.now().iew_info.completed.push(seq);
}

/// Issue ready instructions, oldest first. Returns the oldest squash
/// request raised this cycle, if any.
fn issue(cpu: &mut Cpu, pl: &mut Pipeline, _tid: ThreadId) -> Option<SquashRequest> {
    let now = cpu.cycle;
    let width = cpu.config.pipeline.issue_width;
    let mut issued_count = 0;
    let mut squash_req: Option<SquashRequest> = None;
    let mut issued_now: Vec<InstSeqNum> = Vec::new();

    let candidates: Vec<InstSeqNum> = pl.iew.iq.clone();
    for seq in candidates {
        if issued_count == width {
            break;
        }
        if pl.iew.blocked_mem.contains(&seq) {
            continue;
        }
        let Some(inst) = pl.pool.get(seq) else {
            issued_now.push(seq);
            continue;
        };
        if inst.is_squashed() {
            issued_now.push(seq);
            continue;
        }
        if inst.status.issued || inst.is_executed() {
            continue;
        }
        let ready = inst.src_phys.iter().all(|&r| cpu.scoreboard.is_ready(r));
        if !ready {
            continue;
        }

        // Strictly-ordered loads issue only from the ROB head with no older
        // stores pending; until then they simply wait for a later cycle.
        if inst.op.is_strictly_ordered()
            && (pl.rob.read_head(inst.tid) != Some(seq) || pl.lsq.has_older_stores(seq))
        {
            continue;
        }

        let srcs: Vec<u64> = inst.src_phys.iter().map(|&r| cpu.regfile.read(r)).collect();
        let src_poisoned = inst.src_phys.iter().any(|&r| cpu.regfile.is_poisoned(r));
        let runahead = inst.is_runahead();
        let op = inst.op;
        let in_txn = pl.lsq.in_htm_transaction();
        let htm_uid = pl.lsq.current_htm_uid(&pl.pool);

        let inst = pl.pool.get_mut(seq).unwrap();
        inst.status.issued = true;
        if runahead && src_poisoned {
            inst.set_poisoned();
        }
        issued_count += 1;

        if cpu.trace {
            eprintln!("EX  pc={:#x} sn={} {:?}", inst.pc, seq, op);
        }

        match op {
            MicroOp::Nop
            | MicroOp::Serialize
            | MicroOp::Halt
            | MicroOp::HtmStart
            | MicroOp::HtmStop => {
                pl.iew.exec_pipe.push((now + 1, seq));
                issued_now.push(seq);
            }
            MicroOp::Trap { code } => {
                inst.fault = Some(Fault::RequestedTrap(code));
                pl.iew.exec_pipe.push((now + 1, seq));
                issued_now.push(seq);
            }
            MicroOp::AluImm { op: alu, imm, .. } => {
                inst.result = alu.apply(srcs[0], imm);
                pl.iew.exec_pipe.push((now + 1, seq));
                issued_now.push(seq);
            }
            MicroOp::Alu { op: alu, .. } => {
                inst.result = alu.apply(srcs[0], srcs[1]);
                pl.iew.exec_pipe.push((now + 1, seq));
                issued_now.push(seq);
            }
            MicroOp::WrMisc { .. } => {
                inst.result = srcs[0];
                pl.iew.exec_pipe.push((now + 1, seq));
                issued_now.push(seq);
            }
            MicroOp::Jump { target } => {
                inst.branch_taken = true;
                inst.branch_target = target;
                pl.iew.exec_pipe.push((now + 1, seq));
                issued_now.push(seq);
            }
            MicroOp::Branch { cond, target, .. } => {
                let taken = cond.eval(srcs[0], srcs[1]);
                inst.branch_taken = taken;
                inst.branch_target = if taken { target } else { inst.pc + 1 };
                // Predicted not-taken; a taken branch is a mispredict.
                if taken {
                    let req = SquashRequest {
                        seq,
                        include_inst: false,
                        mispredict: true,
                        branch_taken: true,
                        pc: target,
                    };
                    squash_req = Some(match squash_req {
                        Some(old) if old.seq <= req.seq => old,
                        _ => req,
                    });
                }
                pl.iew.exec_pipe.push((now + 1, seq));
                issued_now.push(seq);
            }
            MicroOp::Load { offset, size, .. } | MicroOp::LoadOrdered { offset, size, .. } => {
                if runahead && src_poisoned {
                    // Poisoned loads never access memory; drain directly.
                    pl.iew.exec_pipe.push((now + 1, seq));
                    issued_now.push(seq);
                } else {
                    let addr = srcs[0].wrapping_add_signed(offset);
                    inst.eff_addr = Some(addr);
                    inst.eff_size = size as usize;
                    if in_txn {
                        inst.htm_uid = Some(htm_uid);
                    }
                    if !cpu.mem.in_range(addr, size as usize) {
                        inst.fault = Some(Fault::LoadAccessFault(addr));
                        pl.iew.exec_pipe.push((now + 1, seq));
                        issued_now.push(seq);
                    } else {
                        match pl.lsq.execute_load(
                            &mut pl.pool,
                            &mut pl.rcache,
                            &mut cpu.mem,
                            &mut cpu.events,
                            &mut cpu.stats,
                            seq,
                            now,
                        ) {
                            LoadOutcome::Issued => {
                                issued_now.push(seq);
                            }
                            LoadOutcome::Stalled | LoadOutcome::Blocked => {
                                pl.iew.blocked_mem.insert(seq);
                                if let Some(inst) = pl.pool.get_mut(seq) {
                                    inst.status.issued = false;
                                }
                            }
                        }
                    }
                }
            }
            MicroOp::Store { size, offset, .. } => {
                let addr = srcs[1].wrapping_add_signed(offset);
                inst.eff_addr = Some(addr);
                inst.eff_size = size as usize;
                if !cpu.mem.in_range(addr, size as usize) {
                    inst.fault = Some(Fault::StoreAccessFault(addr));
                    pl.iew.exec_pipe.push((now + 1, seq));
                    issued_now.push(seq);
                } else {
                    let data = srcs[0].to_le_bytes()[..size as usize].to_vec();
                    inst.result = 0;
                    if let Some(violator) =
                        pl.lsq.execute_store(&mut pl.pool, seq, addr, &data)
                    {
                        let pc = pl.pool.get(violator).map(|i| i.pc).unwrap_or(0);
                        let req = SquashRequest {
                            seq: violator,
                            include_inst: true,
                            mispredict: false,
                            branch_taken: false,
                            pc,
                        };
                        squash_req = Some(match squash_req {
                            Some(old) if old.seq <= req.seq => old,
                            _ => req,
                        });
                        cpu.stats.mem_order_violations += 1;
                    }
                    // Stores complete at execute; data drains at commit.
                    pl.iew.exec_pipe.push((now + 1, seq));
                    issued_now.push(seq);
                }
            }
            MicroOp::AtomicAdd { size, .. } => {
                let addr = srcs[1];
                inst.eff_addr = Some(addr);
                inst.eff_size = size as usize;
                if !cpu.mem.in_range(addr, size as usize) {
                    inst.fault = Some(Fault::StoreAccessFault(addr));
                    pl.iew.exec_pipe.push((now + 1, seq));
                    issued_now.push(seq);
                } else {
                    // Functional read-modify-write; timing is the SQ drain.
                    let mut bytes = [0u8; 8];
                    let n = size as usize;
                    bytes[..n].copy_from_slice(cpu.mem.peek(addr, n));
                    let old = u64::from_le_bytes(bytes);
                    inst.result = old;
                    let new = old.wrapping_add(srcs[0]);
                    let data = new.to_le_bytes()[..n].to_vec();
                    if let Some(violator) =
                        pl.lsq.execute_store(&mut pl.pool, seq, addr, &data)
                    {
                        let pc = pl.pool.get(violator).map(|i| i.pc).unwrap_or(0);
                        let req = SquashRequest {
                            seq: violator,
                            include_inst: true,
                            mispredict: false,
                            branch_taken: false,
                            pc,
                        };
                        squash_req = Some(match squash_req {
                            Some(old) if old.seq <= req.seq => old,
                            _ => req,
                        });
                        cpu.stats.mem_order_violations += 1;
                    }
                    pl.iew.exec_pipe.push((now + 1, seq));
                    issued_now.push(seq);
                }
            }
        }
    }

    // Issued instructions leave the queue; stalled ones stay for replay.
    pl.iew.iq.retain(|s| !issued_now.contains(s));
    squash_req
}
