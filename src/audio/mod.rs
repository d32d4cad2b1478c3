//! Audio endpoints bridging fixed-size sample blocks and network packets

pub mod block;
pub mod input;
pub mod output;

pub use block::{create_shared_pool, BlockAllocator, BlockPool, SampleBlock, SharedBlockPool};
pub use input::{InputStats, NetInput, Reassembler};
pub use output::{NetOutput, OutputStats};
