//! Free list of unmapped physical registers.
//!
//! One stack per renamed class. A register is free exactly when neither
//! rename map (frontend or commit) maps an architectural register to it and
//! no in-flight instruction still holds it as a previous mapping.

use crate::common::{PhysRegId, RegClass};

/// Per-class free physical register pools.
#[derive(Debug)]
pub struct FreeList {
    int_free: Vec<usize>,
    float_free: Vec<usize>,
    cc_free: Vec<usize>,
    regs_per_class: usize,
}

impl FreeList {
    /// Create a free list holding every physical register of every class.
    pub fn new(regs_per_class: usize) -> Self {
        let mut list = Self {
            int_free: Vec::new(),
            float_free: Vec::new(),
            cc_free: Vec::new(),
            regs_per_class,
        };
        list.reset();
        list
    }

    fn pool_mut(&mut self, class: RegClass) -> &mut Vec<usize> {
        match class {
            RegClass::Int => &mut self.int_free,
            RegClass::Float => &mut self.float_free,
            RegClass::Cc => &mut self.cc_free,
            RegClass::Misc => panic!("misc registers are never renamed"),
        }
    }

    fn pool(&self, class: RegClass) -> &Vec<usize> {
        match class {
            RegClass::Int => &self.int_free,
            RegClass::Float => &self.float_free,
            RegClass::Cc => &self.cc_free,
            RegClass::Misc => panic!("misc registers are never renamed"),
        }
    }

    /// Pop a free register of the given class. `None` means rename must
    /// stall (structural back-pressure, not a fault).
    pub fn get_reg(&mut self, class: RegClass) -> Option<PhysRegId> {
        self.pool_mut(class).pop().map(|flat| PhysRegId::new(class, flat))
    }

    /// Return a register to its class pool.
    pub fn free_reg(&mut self, reg: PhysRegId) {
        debug_assert!(!self.pool(reg.class).contains(&reg.flat));
        self.pool_mut(reg.class).push(reg.flat);
    }

    pub fn num_free(&self, class: RegClass) -> usize {
        self.pool(class).len()
    }

    pub fn has_free(&self, class: RegClass, count: usize) -> bool {
        self.pool(class).len() >= count
    }

    /// Refill every pool with every physical register. Used by the
    /// architectural restore before the rename maps re-pair.
    pub fn reset(&mut self) {
        let n = self.regs_per_class;
        // Popped in ascending order, matching the hardcoded checkpoint maps.
        self.int_free = (0..n).rev().collect();
        self.float_free = (0..n).rev().collect();
        self.cc_free = (0..n).rev().collect();
    }
}
