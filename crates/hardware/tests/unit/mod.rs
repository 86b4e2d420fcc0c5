/// Configuration deserialization.
pub mod config;

/// Runahead entry/exit scenarios and cross-component invariants.
pub mod runahead;

/// Store-to-load forwarding against a mocked data port.
pub mod forwarding;

/// Runahead cache geometry.
pub mod rcache;

/// Program parsing from files.
pub mod loader;
