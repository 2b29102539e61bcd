pub mod elasticsearch;
pub mod memory;

pub use elasticsearch::ElasticsearchStore;
pub use memory::MemoryIndex;
