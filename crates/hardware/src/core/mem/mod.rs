//! Memory-system contract.
//!
//! 1. **Packets** carried between the LSQ, the memory model, and the
//!    runahead cache.
//! 2. **Timing port** with back-pressure and retry.
//! 3. **Hierarchy model** reporting per-access depth, the LLL trigger.

pub mod cache;
pub mod packet;
pub mod port;

pub use cache::MemoryHierarchy;
pub use packet::{HtmCacheFailure, MemCmd, Packet};
pub use port::MemPort;
