//! Infrastructure adapters for storage.

pub mod sqlite;
