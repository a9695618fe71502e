pub mod pool;
pub mod region;

pub use pool::{BufferPool, CodecBuffer, PoolStats};
pub use region::{RegionBacking, RegionOrigin, SharedMemoryRegion, MAX_REGION_SIZE};
