//! Timing request port.
//!
//! The LSQ's only window onto the memory system. `send_timing_req` may
//! refuse a packet (port blocked); the sender records the stall and retries
//! when the port signals readiness again.

use crate::common::Cycle;

use super::packet::Packet;

/// A port that accepts timing requests with back-pressure.
pub trait MemPort {
    /// Try to send a request. Returns `false` if the port is blocked; the
    /// packet is left with the caller to retry on `recv_retry`.
    fn send_timing_req(&mut self, pkt: &Packet, now: Cycle) -> bool;

    /// Memory-hierarchy depth at which this request would be serviced.
    /// Recorded on the LSQ request when the packet is accepted.
    fn access_depth(&self, pkt: &Packet) -> usize;
}
