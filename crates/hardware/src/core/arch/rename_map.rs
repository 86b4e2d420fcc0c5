//! Register rename maps.
//!
//! Two instances exist per thread: the frontend map, speculatively updated at
//! rename, and the commit map, updated only when a non-runahead instruction
//! retires. Each is a total function from architectural register to physical
//! register.

use crate::common::{PhysRegId, RegClass, RegId};

use super::free_list::FreeList;

/// Result of renaming a destination: the newly mapped physical register and
/// the previous mapping (kept for squash undo and eventual freeing).
#[derive(Clone, Copy, Debug)]
pub struct RenameInfo {
    pub new_phys: PhysRegId,
    pub prev_phys: PhysRegId,
}

/// A total arch → phys mapping across all renamed classes.
#[derive(Debug, Clone)]
pub struct RenameMap {
    int_map: Vec<PhysRegId>,
    float_map: Vec<PhysRegId>,
    cc_map: Vec<PhysRegId>,
}

impl RenameMap {
    /// Build an unpaired map; every entry is a placeholder until the caller
    /// assigns real registers (initial pairing or architectural restore).
    pub fn new(int_regs: usize, float_regs: usize, cc_regs: usize) -> Self {
        Self {
            int_map: vec![PhysRegId::new(RegClass::Int, 0); int_regs],
            float_map: vec![PhysRegId::new(RegClass::Float, 0); float_regs],
            cc_map: vec![PhysRegId::new(RegClass::Cc, 0); cc_regs],
        }
    }

    fn map(&self, class: RegClass) -> &Vec<PhysRegId> {
        match class {
            RegClass::Int => &self.int_map,
            RegClass::Float => &self.float_map,
            RegClass::Cc => &self.cc_map,
            RegClass::Misc => panic!("misc registers are never renamed"),
        }
    }

    fn map_mut(&mut self, class: RegClass) -> &mut Vec<PhysRegId> {
        match class {
            RegClass::Int => &mut self.int_map,
            RegClass::Float => &mut self.float_map,
            RegClass::Cc => &mut self.cc_map,
            RegClass::Misc => panic!("misc registers are never renamed"),
        }
    }

    pub fn num_regs(&self, class: RegClass) -> usize {
        self.map(class).len()
    }

    /// Current physical register for an architectural register.
    pub fn lookup(&self, arch: RegId) -> PhysRegId {
        self.map(arch.class)[arch.index]
    }

    /// Pin an architectural register to a physical register. Used by the
    /// commit map at retirement and by the restore re-pairing loop.
    pub fn set_entry(&mut self, arch: RegId, phys: PhysRegId) {
        self.map_mut(arch.class)[arch.index] = phys;
    }

    /// Allocate a fresh mapping for a destination register.
    ///
    /// The new mapping carries no implicit poison; a runahead instruction's
    /// destination is poisoned only after execution, at the writeback
    /// boundary. Returns `None` when the class pool is empty (rename stalls).
    pub fn rename(&mut self, arch: RegId, free_list: &mut FreeList) -> Option<RenameInfo> {
        let prev_phys = self.lookup(arch);
        let new_phys = free_list.get_reg(arch.class)?;
        self.set_entry(arch, new_phys);
        Some(RenameInfo { new_phys, prev_phys })
    }

    /// Clear the map back to placeholders. The caller must re-pair every
    /// architectural register before the map is consulted again.
    pub fn reset(&mut self) {
        for idx in 0..self.int_map.len() {
            self.int_map[idx] = PhysRegId::new(RegClass::Int, 0);
        }
        for idx in 0..self.float_map.len() {
            self.float_map[idx] = PhysRegId::new(RegClass::Float, 0);
        }
        for idx in 0..self.cc_map.len() {
            self.cc_map[idx] = PhysRegId::new(RegClass::Cc, 0);
        }
    }
}
