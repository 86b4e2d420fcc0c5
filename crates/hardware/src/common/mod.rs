//! Common types shared across the simulator.
//!
//! This module provides the fundamental building blocks used by every
//! component of the runahead core:
//! 1. **Register Identifiers:** Architectural and physical register ids and classes.
//! 2. **Faults:** The fault taxonomy resolved by the commit stage.
//! 3. **Scalar Types:** Sequence numbers, thread ids, cycle counts, addresses.

/// Fault types resolved at commit.
pub mod error;

/// Register classes and identifiers.
pub mod reg;

pub use error::{Fault, HtmFailureCause};
pub use reg::{PhysRegId, RegClass, RegId, RegVal};

/// Memory address. The simulator does not model address translation, so
/// virtual and physical addresses coincide.
pub type Addr = u64;

/// Simulation cycle count.
pub type Cycle = u64;

/// Global dynamic instruction sequence number, assigned at fetch.
///
/// Monotonically increasing and never reused, so age comparisons between any
/// two in-flight instructions are a single integer compare.
pub type InstSeqNum = u64;

/// Hardware thread id. The core runs a single thread; the id is threaded
/// through the interfaces so per-thread state stays explicit.
pub type ThreadId = usize;

/// Number of hardware thread slots the per-thread arrays are sized for.
pub const MAX_THREADS: usize = 1;
