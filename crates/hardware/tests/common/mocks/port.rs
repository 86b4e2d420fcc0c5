//! Mock timing port.
//!
//! Lets LSQ tests pin down exactly what reaches the data cache — e.g. that
//! store-to-load forwarding produces zero memory traffic.

use mockall::mock;

use runahead_core::common::Cycle;
use runahead_core::core::mem::{MemPort, Packet};

mock! {
    pub Port {}

    impl MemPort for Port {
        fn send_timing_req(&mut self, pkt: &Packet, now: Cycle) -> bool;
        fn access_depth(&self, pkt: &Packet) -> usize;
    }
}
