//! The knowledge-graph storage layer: the entity/relationship domain model, the
//! four storage ports ([`ports::EntityStore`], [`ports::RelationshipStore`],
//! [`ports::VectorStore`], [`ports::HistoryManager`]), and a SQLite adapter
//! implementing all four.
//!
//! ## Core principles
//!
//! 1. **One table family per concern, not per entity kind.** Entities and
//!    relationships each live in a single table with a JSON payload column, keyed
//!    by deterministic ids — variety in kind is a domain-layer concern, not a
//!    schema one.
//! 2. **Idempotent by construction.** Entity ids are stable across re-parses;
//!    relationship ids are a pure function of their logical identity. Re-running
//!    any pass against unchanged input is always safe to repeat.
//! 3. **No physical delete of edges.** Relationships close (`active=false,
//!    validTo=now`); only entities are ever removed outright.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use memento_storage::infrastructure::SqliteStore;
//! use memento_storage::ports::EntityStore;
//!
//! # async fn run() -> memento_storage::Result<()> {
//! let store = SqliteStore::open("repo.memento.db")?;
//! let entity = store.entities.get("file:src/main.rs").await?;
//! # Ok(())
//! # }
//! ```

pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod ports;

pub use error::{ErrorKind, Result, StorageError};
