mod chain;
mod pool;

pub use chain::BufferChain;
pub use pool::{BufferNode, BufferPool, DEFAULT_MAX_FREE, DEFAULT_NODE_SIZE, PoolStats};
