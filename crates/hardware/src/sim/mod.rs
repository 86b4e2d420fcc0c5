//! Simulation harness: event queue, stimulus programs, top-level loop.

pub mod events;
pub mod program;
pub mod simulator;

pub use program::Program;
pub use simulator::Simulator;
