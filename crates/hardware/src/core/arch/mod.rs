//! Architectural register machinery.
//!
//! 1. **Physical register file** with per-register poison bits.
//! 2. **Rename maps** (frontend and commit) and the **free list**.
//! 3. **Architectural checkpoint** saved at runahead entry and restored at
//!    exit.

pub mod checkpoint;
pub mod free_list;
pub mod regfile;
pub mod rename_map;

pub use checkpoint::ArchCheckpoint;
pub use free_list::FreeList;
pub use regfile::PhysRegFile;
pub use rename_map::{RenameInfo, RenameMap};
