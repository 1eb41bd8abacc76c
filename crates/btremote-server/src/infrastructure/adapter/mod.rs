//! Device adapter implementations.

pub mod memory;

pub use memory::InMemoryAdapter;
