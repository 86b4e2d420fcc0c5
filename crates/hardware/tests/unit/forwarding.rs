//! Store-to-load forwarding against a mocked data port.
//!
//! The mock pins down the memory traffic precisely: a fully forwarded load
//! must generate none.

use runahead_core::core::inst::{DynInst, InstPool, MicroOp};
use runahead_core::core::lsq::LsqUnit;
use runahead_core::core::rcache::RunaheadCache;
use runahead_core::sim::events::{EventKind, EventQueue};
use runahead_core::stats::SimStats;

use crate::common::mocks::port::MockPort;

fn runahead_store(pool: &mut InstPool, lsq: &mut LsqUnit, seq: u64, addr: u64, data: &[u8]) {
    let mut inst = DynInst::new(
        seq,
        seq,
        0,
        MicroOp::Store { src: 1, base: 2, offset: 0, size: data.len() as u8 },
    );
    inst.eff_addr = Some(addr);
    inst.eff_size = data.len();
    inst.set_runahead();
    inst.set_poisoned();
    pool.insert(inst);
    lsq.insert_store(pool, seq);
    lsq.execute_store(pool, seq, addr, data);
}

fn runahead_load(pool: &mut InstPool, lsq: &mut LsqUnit, seq: u64, addr: u64, size: usize) {
    let mut inst = DynInst::new(
        seq,
        seq,
        0,
        MicroOp::Load { rd: 3, base: 2, offset: 0, size: size as u8 },
    );
    inst.eff_addr = Some(addr);
    inst.eff_size = size;
    inst.set_runahead();
    pool.insert(inst);
    lsq.insert_load(pool, seq);
}

#[test]
fn test_forwarded_poisoned_store_generates_no_dcache_traffic() {
    // Boundary scenario: a poisoned 8-byte runahead store at 0x1000, then
    // a load of the same 8 bytes. The load completes from the SQ, inherits
    // the poison, and the data cache sees nothing.
    let mut pool = InstPool::new();
    let mut lsq = LsqUnit::new(8, 8, 64, false);
    let mut rcache = RunaheadCache::new(2048, 64);
    let mut events = EventQueue::new();
    let mut stats = SimStats::default();

    let mut port = MockPort::new();
    port.expect_send_timing_req().never();
    port.expect_access_depth().never();

    runahead_store(&mut pool, &mut lsq, 1, 0x1000, &[0xaa; 8]);
    runahead_load(&mut pool, &mut lsq, 2, 0x1000, 8);

    lsq.execute_load(&mut pool, &mut rcache, &mut port, &mut events, &mut stats, 2, 0);

    assert!(pool.get(2).unwrap().is_poisoned());
    assert_eq!(stats.forwarded_poisons, 1);
    assert_eq!(stats.forwarded_loads, 1);

    // The forwarded writeback carries the store's bytes.
    let event = events.pop_due(1).expect("forwarding writeback scheduled");
    match event.kind {
        EventKind::LoadWriteback { seq, pkt } => {
            assert_eq!(seq, 2);
            assert_eq!(pkt.data, vec![0xaa; 8]);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn test_unrelated_load_still_uses_dcache() {
    // Sanity check on the mock: a load with no overlapping store does reach
    // the port.
    let mut pool = InstPool::new();
    let mut lsq = LsqUnit::new(8, 8, 64, false);
    let mut rcache = RunaheadCache::new(2048, 64);
    let mut events = EventQueue::new();
    let mut stats = SimStats::default();

    let mut port = MockPort::new();
    port.expect_access_depth().return_const(0usize);
    port.expect_send_timing_req().times(1).return_const(true);

    runahead_load(&mut pool, &mut lsq, 1, 0x2000, 8);
    lsq.execute_load(&mut pool, &mut rcache, &mut port, &mut events, &mut stats, 1, 0);

    assert_eq!(stats.forwarded_loads, 0);
}
