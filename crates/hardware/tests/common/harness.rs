//! Test harness.
//!
//! `TestContext` wraps a `Simulator` with builder-style setup (program,
//! registers, memory seeding, forced access depths) and bounded run loops
//! so tests fail loudly instead of spinning.

use runahead_core::common::{Addr, RegId, RegVal};
use runahead_core::config::Config;
use runahead_core::sim::{Program, Simulator};

pub struct TestContext {
    pub sim: Simulator,
}

impl TestContext {
    /// Build a context from program text with the default configuration.
    pub fn new(program: &str) -> Self {
        Self::with_config(program, Config::default())
    }

    /// Build a context from program text and an explicit configuration.
    pub fn with_config(program: &str, config: Config) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let program: Program = program.parse().expect("test program parses");
        Self { sim: Simulator::new(&config, program) }
    }

    /// Seed backing memory, bypassing timing.
    pub fn poke_mem(&mut self, addr: Addr, data: &[u8]) -> &mut Self {
        self.sim.cpu.mem.poke(addr, data);
        self
    }

    /// Read backing memory, bypassing timing.
    pub fn peek_u64(&self, addr: Addr) -> u64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(self.sim.cpu.mem.peek(addr, 8));
        u64::from_le_bytes(bytes)
    }

    /// Pin the hierarchy depth of the block containing `addr`.
    pub fn force_depth(&mut self, addr: Addr, depth: usize) -> &mut Self {
        self.sim.cpu.mem.force_depth(addr, depth);
        self
    }

    /// Committed architectural value of an integer register.
    pub fn int_reg(&self, idx: usize) -> RegVal {
        self.sim.cpu.get_arch_reg(RegId::int(idx))
    }

    /// Run until the program halts; panics at the cycle bound.
    pub fn run_to_halt(&mut self, max_cycles: u64) -> u64 {
        let cycles = self.sim.run(max_cycles);
        assert!(self.sim.cpu.halted, "program did not halt within {} cycles", max_cycles);
        cycles
    }

    /// Tick until `pred` holds; panics at the cycle bound.
    pub fn run_until(&mut self, max_cycles: u64, mut pred: impl FnMut(&Simulator) -> bool) -> u64 {
        while !pred(&self.sim) {
            assert!(
                self.sim.cpu.cycle < max_cycles,
                "condition not reached within {} cycles",
                max_cycles
            );
            self.sim.tick();
        }
        self.sim.cpu.cycle
    }
}
