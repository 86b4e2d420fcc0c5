//! Architectural state checkpoint.
//!
//! Saved on entry into runahead and restored on exit, returning the CPU to
//! its last architecturally committed state. Only architectural registers
//! are checkpointed; every other physical register is reclaimed by the
//! rename-map re-pairing that accompanies the restore.
//!
//! The checkpoint is a shadow file sized to the architectural register count
//! per renamed class, a parallel vector of miscellaneous register values,
//! and the saved PC.

use crate::common::{Addr, RegClass, RegId, RegVal};

use super::regfile::PhysRegFile;
use super::rename_map::RenameMap;

/// Shadow copy of the committed architectural state.
#[derive(Debug)]
pub struct ArchCheckpoint {
    int_regs: Vec<RegVal>,
    float_regs: Vec<RegVal>,
    cc_regs: Vec<RegVal>,
    misc_regs: Vec<RegVal>,
    /// PC of the next instruction after the last committed one.
    pub pc: Addr,
}

impl ArchCheckpoint {
    pub fn new(int_regs: usize, float_regs: usize, cc_regs: usize, misc_regs: usize) -> Self {
        Self {
            int_regs: vec![0; int_regs],
            float_regs: vec![0; float_regs],
            cc_regs: vec![0; cc_regs],
            misc_regs: vec![0; misc_regs],
            pc: 0,
        }
    }

    fn bank_mut(&mut self, class: RegClass) -> &mut Vec<RegVal> {
        match class {
            RegClass::Int => &mut self.int_regs,
            RegClass::Float => &mut self.float_regs,
            RegClass::Cc => &mut self.cc_regs,
            RegClass::Misc => &mut self.misc_regs,
        }
    }

    fn bank(&self, class: RegClass) -> &Vec<RegVal> {
        match class {
            RegClass::Int => &self.int_regs,
            RegClass::Float => &self.float_regs,
            RegClass::Cc => &self.cc_regs,
            RegClass::Misc => &self.misc_regs,
        }
    }

    /// Saved value of one architectural register.
    pub fn get(&self, arch: RegId) -> RegVal {
        self.bank(arch.class)[arch.index]
    }

    /// Copy the full architectural state into the shadow file.
    ///
    /// Must not be called while in runahead; the live state would be
    /// speculative. The commit map defines which physical register holds
    /// each architectural value.
    pub fn full_save(
        &mut self,
        regfile: &PhysRegFile,
        commit_map: &RenameMap,
        misc_regs: &[RegVal],
        pc: Addr,
    ) {
        for class in RegClass::RENAMED {
            for idx in 0..commit_map.num_regs(class) {
                let phys = commit_map.lookup(RegId::new(class, idx));
                self.bank_mut(class)[idx] = regfile.read(phys);
            }
        }
        self.misc_regs.copy_from_slice(misc_regs);
        self.pc = pc;
    }

    /// Refresh the shadow entry for a single architectural register after a
    /// non-runahead retirement.
    pub fn update_reg(
        &mut self,
        arch: RegId,
        regfile: &PhysRegFile,
        commit_map: &RenameMap,
        misc_regs: &[RegVal],
    ) {
        if arch.class == RegClass::Misc {
            self.misc_regs[arch.index] = misc_regs[arch.index];
        } else {
            let phys = commit_map.lookup(arch);
            self.bank_mut(arch.class)[arch.index] = regfile.read(phys);
        }
    }

    /// Overwrite the live architectural values from the shadow.
    ///
    /// The commit map must already be re-paired; values land in whatever
    /// physical registers it now designates. Returns the saved PC.
    pub fn restore(
        &self,
        regfile: &mut PhysRegFile,
        commit_map: &RenameMap,
        misc_regs: &mut [RegVal],
    ) -> Addr {
        for class in RegClass::RENAMED {
            for idx in 0..commit_map.num_regs(class) {
                let phys = commit_map.lookup(RegId::new(class, idx));
                regfile.write(phys, self.bank(class)[idx]);
            }
        }
        misc_regs.copy_from_slice(&self.misc_regs);
        self.pc
    }
}
