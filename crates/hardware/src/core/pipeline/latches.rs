//! Inter-stage communication payloads.
//!
//! Each cycle every stage writes its outgoing wires into the current time
//! slot; consumers read the slot written the configured number of cycles
//! ago. Instructions travel as sequence numbers into the `InstPool`.

use crate::common::{Addr, InstSeqNum, MAX_THREADS};

/// Backwards wires written by commit, consumed by every earlier stage on
/// the following cycle.
#[derive(Clone, Debug, Default)]
pub struct CommitComm {
    /// Squash everything younger than `done_seq_num`.
    pub squash: bool,
    /// The ROB is still draining a squash; dispatch must hold off.
    pub rob_squashing: bool,
    /// Youngest surviving sequence number.
    pub done_seq_num: InstSeqNum,
    /// Tail of the ROB at squash time, for stages trimming their own queues.
    pub squash_tail: InstSeqNum,
    /// Mispredicted branch that caused the squash, if any.
    pub mispredict_inst: Option<InstSeqNum>,
    /// Instruction metadata for the fetch redirect.
    pub squash_inst: Option<InstSeqNum>,
    pub branch_taken: bool,
    /// Redirect target.
    pub pc: Addr,
    /// ROB occupancy for dispatch flow control.
    pub free_rob_entries: usize,
    pub used_rob: bool,
    pub empty_rob: bool,
    /// Self-addressed pulse: the CPU performs the architectural restore on
    /// the cycle after commit raises this.
    pub arch_restore: bool,
    pub interrupt_pending: bool,
    pub clear_interrupt: bool,
}

/// Wires from IEW to commit.
#[derive(Clone, Debug, Default)]
pub struct IewComm {
    /// Instructions that finished execution this cycle.
    pub completed: Vec<InstSeqNum>,
    /// IEW-detected squash (branch mispredict or memory-order violation).
    pub squash: bool,
    pub squashed_seq_num: InstSeqNum,
    /// Squash the signalling instruction itself as well.
    pub include_squash_inst: bool,
    pub mispredict_inst: Option<InstSeqNum>,
    pub branch_taken: bool,
    /// Redirect target for the squash.
    pub pc: Addr,
}

/// One cycle's worth of inter-stage traffic.
#[derive(Clone, Debug, Default)]
pub struct TimeSlot {
    pub fetch_to_decode: Vec<InstSeqNum>,
    pub decode_to_rename: Vec<InstSeqNum>,
    /// Rename's dispatch group, consumed by IEW (issue) and by commit (ROB
    /// insertion) at their respective delays.
    pub rename_to_iew: Vec<InstSeqNum>,
    pub iew_info: IewComm,
    pub commit_info: [CommitComm; MAX_THREADS],
}
