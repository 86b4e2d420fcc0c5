//! Register classes and identifiers.
//!
//! Architectural registers are identified by (class, index); physical
//! registers by a flat index into the unified physical register file.
//! Miscellaneous (misc) registers are managed separately by the CPU and never
//! renamed, so they have a class value but no physical ids.

use serde::Deserialize;

/// Value held by a scalar register.
pub type RegVal = u64;

/// Register class.
///
/// Vector and vector-predicate classes are not modeled; the architectural
/// checkpoint of the original design skips them, and no stimulus operation
/// touches them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum RegClass {
    /// Integer registers.
    Int,
    /// Floating-point registers.
    Float,
    /// Condition-code registers.
    Cc,
    /// Miscellaneous registers (not renamed, not in the physical file).
    Misc,
}

impl RegClass {
    /// The renamed classes, in flat-index order.
    pub const RENAMED: [RegClass; 3] = [RegClass::Int, RegClass::Float, RegClass::Cc];

    /// Short name used in trace output.
    pub fn name(self) -> &'static str {
        match self {
            RegClass::Int => "int",
            RegClass::Float => "float",
            RegClass::Cc => "cc",
            RegClass::Misc => "misc",
        }
    }
}

/// Architectural register id: (class, index).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RegId {
    pub class: RegClass,
    pub index: usize,
}

impl RegId {
    pub fn new(class: RegClass, index: usize) -> Self {
        Self { class, index }
    }

    /// Integer register shorthand, the common case in the stimulus ISA.
    pub fn int(index: usize) -> Self {
        Self::new(RegClass::Int, index)
    }
}

/// Physical register id: a flat index into the unified physical register
/// file, plus the class it was allocated for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PhysRegId {
    pub class: RegClass,
    pub flat: usize,
}

impl PhysRegId {
    pub fn new(class: RegClass, flat: usize) -> Self {
        Self { class, flat }
    }
}
