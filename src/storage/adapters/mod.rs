pub mod memory;

pub use memory::MemoryStoreAdapter;
