//! # Cadence Store
//!
//! `Store` implementations. SQLite is the production backend — it
//! survives restarts and its single-statement updates give us the
//! compare-and-increment and versioned-transition primitives the
//! driver relies on. The in-memory store backs tests.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
