//! Activity source adapters.

pub mod memory;

pub use memory::InMemoryActivitySource;
