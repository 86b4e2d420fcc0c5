//! Out-of-order pipeline.
//!
//! Stage order per tick: fetch → decode → rename → IEW → commit, then the
//! time buffer advances one slot. Stages are free functions over the CPU's
//! architectural state and the pipeline's queue state; the only cross-stage
//! mutable channel is the time buffer.

pub mod commit;
pub mod decode;
pub mod fetch;
pub mod iew;
pub mod latches;
pub mod rename;
pub mod rob;
pub mod scoreboard;
pub mod timebuffer;

pub use commit::{Commit, CommitStatus};
pub use decode::DecodeStage;
pub use fetch::FetchStage;
pub use iew::IewStage;
pub use rename::RenameStage;
pub use rob::Rob;
pub use scoreboard::Scoreboard;
pub use timebuffer::TimeBuffer;

use crate::config::Config;
use crate::core::inst::InstPool;
use crate::core::lsq::LsqUnit;
use crate::core::rcache::RunaheadCache;
use crate::core::Cpu;
use crate::sim::program::Program;

/// All pipeline-owned state: the instruction pool, the queues, the stages,
/// and the inter-stage time buffer.
#[derive(Debug)]
pub struct Pipeline {
    pub pool: InstPool,
    pub rob: Rob,
    pub lsq: LsqUnit,
    pub rcache: RunaheadCache,
    pub buf: TimeBuffer,
    pub fetch: FetchStage,
    pub decode: DecodeStage,
    pub rename: RenameStage,
    pub iew: IewStage,
    pub commit: Commit,
}

impl Pipeline {
    pub fn new(config: &Config, program: Program) -> Self {
        let p = &config.pipeline;
        let max_delay = p
            .iew_to_commit_delay
            .max(p.commit_to_iew_delay)
            .max(p.rename_to_rob_delay)
            .max(p.commit_to_fetch_delay)
            .max(1);
        Self {
            pool: InstPool::new(),
            rob: Rob::new(p.rob_entries, p.squash_width),
            lsq: LsqUnit::new(
                p.lq_entries,
                p.sq_entries,
                config.runahead.runahead_cache_block_size,
                p.needs_tso,
            ),
            rcache: RunaheadCache::new(
                config.runahead.runahead_cache_size,
                config.runahead.runahead_cache_block_size,
            ),
            buf: TimeBuffer::new(max_delay),
            fetch: FetchStage::new(program),
            decode: DecodeStage::default(),
            rename: RenameStage::default(),
            iew: IewStage::default(),
            commit: Commit::new(),
        }
    }

    /// Run one cycle of every stage, in order, then rotate the time buffer.
    pub fn tick(&mut self, cpu: &mut Cpu) {
        fetch::tick(cpu, self);
        decode::tick(cpu, self);
        rename::tick(cpu, self);
        iew::tick(cpu, self);
        commit::tick(cpu, self);
        self.buf.advance();
    }
}
