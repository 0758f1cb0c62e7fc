//! Infrastructure layer — storage adapters implementing the `ports` traits.

pub mod sqlite;

pub use sqlite::SqliteStore;
