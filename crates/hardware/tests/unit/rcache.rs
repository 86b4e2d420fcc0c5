//! Runahead cache geometry.

use runahead_core::core::mem::Packet;
use runahead_core::core::rcache::RunaheadCache;
use runahead_core::stats::SimStats;

#[test]
fn test_direct_mapped_eviction_by_index_collision() {
    // Boundary scenario: S = 64 B, B = 16 B, N = 4. 0x0000 and 0x0040 map
    // to index 0 with different tags; the second write evicts the first by
    // overwrite and the original address misses on read-back.
    let mut rcache = RunaheadCache::new(64, 16);
    let mut stats = SimStats::default();

    rcache.write(&Packet::write_req(1, 0x0000, vec![0x11; 8]), false, &mut stats);
    rcache.write(&Packet::write_req(2, 0x0040, vec![0x22; 8]), false, &mut stats);
    assert_eq!(stats.rcache_write_conflicts, 1);

    let mut rd = Packet::read_req(3, 0x0000, 8);
    assert_eq!(rcache.read(&mut rd, &mut stats), None);
    assert_eq!(stats.rcache_read_misses, 1);

    // The evicting address is the one that hits.
    let mut rd = Packet::read_req(4, 0x0040, 8);
    assert_eq!(rcache.read(&mut rd, &mut stats), Some(false));
    assert_eq!(rd.data, vec![0x22; 8]);
}

#[test]
fn test_invalidate_then_any_read_misses() {
    let mut rcache = RunaheadCache::new(64, 16);
    let mut stats = SimStats::default();

    for addr in [0x00u64, 0x10, 0x20, 0x30] {
        rcache.write(&Packet::write_req(1, addr, vec![0xcc; 8]), false, &mut stats);
    }
    rcache.invalidate_cache(&mut stats);

    for addr in [0x00u64, 0x10, 0x20, 0x30] {
        let mut rd = Packet::read_req(2, addr, 8);
        assert_eq!(rcache.read(&mut rd, &mut stats), None);
    }
}

#[test]
fn test_non_power_of_two_block_count_still_functions() {
    // N = 3 wastes an index slot but reads and writes must stay coherent.
    let mut rcache = RunaheadCache::new(48, 16);
    let mut stats = SimStats::default();

    rcache.write(&Packet::write_req(1, 0x10, vec![0x7f; 8]), false, &mut stats);
    let mut rd = Packet::read_req(2, 0x10, 8);
    assert_eq!(rcache.read(&mut rd, &mut stats), Some(false));
    assert_eq!(rd.data, vec![0x7f; 8]);
}
