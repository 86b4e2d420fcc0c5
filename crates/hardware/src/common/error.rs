//! Fault definitions.
//!
//! Faults are attached to a dynamic instruction when it executes and are
//! resolved by the commit stage when the instruction reaches the head of the
//! ROB. They provide:
//! 1. **Architectural faults:** Access faults raised by the memory model.
//! 2. **Replay faults:** `ReExec`, which squashes and refetches without being
//!    architecturally visible.
//! 3. **HTM faults:** Transaction failures reported by the cache, mapped to a
//!    typed cause.

use std::fmt;

use super::Addr;

/// Cause of a hardware-transactional-memory failure reported by the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HtmFailureCause {
    /// Transaction exceeded the cache's capacity to track its footprint.
    Size,
    /// A remote agent touched a line in the transaction's read/write set.
    Memory,
    /// Any other cache-reported failure (e.g. an out-of-order speculative
    /// access the cache refused to track).
    Other,
}

impl fmt::Display for HtmFailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HtmFailureCause::Size => write!(f, "SIZE"),
            HtmFailureCause::Memory => write!(f, "MEMORY"),
            HtmFailureCause::Other => write!(f, "OTHER"),
        }
    }
}

/// A fault carried by a dynamic instruction.
///
/// Faults do not propagate as `Err` values through the pipeline; they ride on
/// the instruction (`DynInst::fault`) and are acted on exactly once, at
/// commit. Runahead instructions have their faults discarded there.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fault {
    /// A load touched an address outside the modeled memory.
    LoadAccessFault(Addr),
    /// A store touched an address outside the modeled memory.
    StoreAccessFault(Addr),
    /// The instruction explicitly requested a trap (stimulus `Trap` op).
    RequestedTrap(u64),
    /// Memory-ordering violation: the load must be re-executed. Triggers a
    /// commit-time squash and refetch; never architecturally visible.
    ReExec,
    /// A hardware transaction failed in the cache hierarchy.
    HtmFailure(HtmFailureCause),
}

impl Fault {
    /// True for replay faults that signal a flush rather than an
    /// architectural exception.
    pub fn is_reexec(&self) -> bool {
        matches!(self, Fault::ReExec)
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::LoadAccessFault(addr) => write!(f, "LoadAccessFault({:#x})", addr),
            Fault::StoreAccessFault(addr) => write!(f, "StoreAccessFault({:#x})", addr),
            Fault::RequestedTrap(code) => write!(f, "RequestedTrap({})", code),
            Fault::ReExec => write!(f, "ReExec"),
            Fault::HtmFailure(cause) => write!(f, "HtmFailure({})", cause),
        }
    }
}

impl std::error::Error for Fault {}
