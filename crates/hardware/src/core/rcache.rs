//! Runahead cache.
//!
//! A very small direct-mapped cache inside the CPU that absorbs runahead
//! stores, which are speculative even at pseudoretirement and must never
//! write back to real memory. Runahead loads look here before the data
//! cache; a valid block may carry poisoned data, in which case the load is
//! poisoned too. A miss just means the load did not depend on a runahead
//! store and the request falls through to the data cache.

use crate::common::Addr;
use crate::core::mem::Packet;
use crate::stats::SimStats;

fn ceil_log2(x: u64) -> u32 {
    debug_assert!(x > 0);
    if x == 1 { 0 } else { 64 - (x - 1).leading_zeros() }
}

#[derive(Debug)]
struct CacheBlock {
    data: Vec<u8>,
    tag: u64,
    valid: bool,
    poisoned: bool,
}

/// Direct-mapped write-absorbing buffer for runahead store data.
#[derive(Debug)]
pub struct RunaheadCache {
    /// Size in bytes of each cache block.
    block_size: u64,
    /// Blocks, sized to the full 2^⌈log2 N⌉ index space.
    blocks: Vec<CacheBlock>,
    index_shift: u32,
    index_mask: u64,
    tag_shift: u32,
}

impl RunaheadCache {
    /// Sizes are in bytes. A non-power-of-two block count is allowed but
    /// wastes tag bits and index slots.
    pub fn new(size: u64, block_size: u64) -> Self {
        assert!(block_size > 0 && size >= block_size);
        let num_blocks = size / block_size;
        if !num_blocks.is_power_of_two() {
            eprintln!(
                "warning: runahead cache block count ({}) should be a power of 2",
                num_blocks
            );
        }

        let index_bits = ceil_log2(num_blocks);
        let index_slots = 1u64 << index_bits;
        let mut blocks = Vec::with_capacity(index_slots as usize);
        for _ in 0..index_slots {
            blocks.push(CacheBlock {
                data: vec![0; block_size as usize],
                tag: 0,
                valid: false,
                poisoned: false,
            });
        }

        Self {
            block_size,
            blocks,
            index_shift: ceil_log2(block_size),
            index_mask: index_slots - 1,
            tag_shift: ceil_log2(block_size) + index_bits,
        }
    }

    fn index(&self, addr: Addr) -> usize {
        ((addr >> self.index_shift) & self.index_mask) as usize
    }

    fn tag(&self, addr: Addr) -> u64 {
        addr >> self.tag_shift
    }

    fn align(&self, addr: Addr) -> Addr {
        addr - addr % self.block_size
    }

    /// Tag matches and the block is valid.
    fn lookup(&self, addr: Addr, stats: &mut SimStats) -> bool {
        stats.rcache_lookups += 1;
        let block = &self.blocks[self.index(addr)];
        block.valid && block.tag == self.tag(addr)
    }

    /// Write a packet's data into its block.
    ///
    /// Conflicts are resolved by overwrite; there is no associativity and no
    /// writeback, ever. A clean write cures a previously poisoned block; a
    /// poisoned request poisons it.
    pub fn write(&mut self, pkt: &Packet, poisoned: bool, stats: &mut SimStats) {
        debug_assert!(pkt.is_write());
        let addr = pkt.addr;
        let idx = self.index(addr);
        let tag = self.tag(addr);
        let offset = pkt.block_offset(self.block_size);
        debug_assert!(offset + pkt.size <= self.block_size as usize);

        let block = &mut self.blocks[idx];
        if block.valid && block.tag != tag {
            stats.rcache_write_conflicts += 1;
        }
        if block.poisoned && !poisoned {
            stats.rcache_write_cleanses += 1;
        }

        block.tag = tag;
        block.valid = true;
        block.poisoned = poisoned;
        block.data[offset..offset + pkt.size].copy_from_slice(&pkt.data);

        stats.rcache_writes += 1;
        if poisoned {
            stats.rcache_poisoned_writes += 1;
            stats.rcache_poisons += 1;
        }
    }

    /// Read a packet's bytes from its block.
    ///
    /// On a hit, fills `pkt.data` and returns `Some(poisoned)` so the caller
    /// can taint the requesting load. On a miss returns `None` and the
    /// caller falls back to the data cache.
    pub fn read(&mut self, pkt: &mut Packet, stats: &mut SimStats) -> Option<bool> {
        debug_assert!(pkt.is_read());
        let addr = pkt.addr;
        if !self.lookup(addr, stats) {
            stats.rcache_read_misses += 1;
            return None;
        }
        stats.rcache_read_hits += 1;

        let offset = pkt.block_offset(self.block_size);
        debug_assert!(offset + pkt.size <= self.block_size as usize);
        let block = &self.blocks[self.index(addr)];
        pkt.data.copy_from_slice(&block.data[offset..offset + pkt.size]);
        Some(block.poisoned)
    }

    /// Poison the block holding `addr`, iff its tag matches.
    pub fn poison_block(&mut self, addr: Addr, stats: &mut SimStats) {
        let tag = self.tag(addr);
        let idx = self.index(addr);
        let block = &mut self.blocks[idx];
        if block.tag == tag {
            block.poisoned = true;
        }
        stats.rcache_poisons += 1;
    }

    /// Clear valid and poison on every block. Called unconditionally on
    /// each entry into runahead.
    pub fn invalidate_cache(&mut self, stats: &mut SimStats) {
        for block in &mut self.blocks {
            block.valid = false;
            block.poisoned = false;
        }
        stats.rcache_invalidations += 1;
    }

    /// Route a packet to read or write and build the response.
    ///
    /// Returns `Some((response, poisoned))` when the cache served the
    /// packet; `None` on a read miss.
    pub fn handle_packet(
        &mut self,
        pkt: &Packet,
        poisoned: bool,
        stats: &mut SimStats,
    ) -> Option<(Packet, bool)> {
        stats.rcache_packets_handled += 1;

        let mut resp = pkt.clone();
        resp.from_rcache = true;
        let resp_poisoned = if resp.is_write() {
            self.write(&resp, poisoned, stats);
            false
        } else {
            self.read(&mut resp, stats)?
        };
        resp.make_response();
        Some((resp, resp_poisoned))
    }
}
