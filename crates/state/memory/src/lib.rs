//! In-process counter store backend. Serves as the local tier of the
//! two-tier cache and as the fallback when the shared store is down.

pub mod store;

pub use store::MemoryCounterStore;
