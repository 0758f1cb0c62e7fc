//! SQLite adapter: the sole backend for [`crate::ports::EntityStore`],
//! [`crate::ports::RelationshipStore`], [`crate::ports::VectorStore`], and
//! [`crate::ports::HistoryManager`] in this repository.

mod connection;
mod entity_store;
mod history_store;
mod relationship_store;
mod vector_store;

pub use connection::SqliteHandle;
pub use entity_store::SqliteEntityStore;
pub use history_store::SqliteHistoryStore;
pub use relationship_store::SqliteRelationshipStore;
pub use vector_store::SqliteVectorStore;

use crate::error::Result;
use std::path::Path;

/// All four store ports backed by one shared [`SqliteHandle`].
///
/// Built with one constructor call so callers (the Sync Coordinator, tests) never
/// have to wire the four stores to separate connections by hand.
#[derive(Clone)]
pub struct SqliteStore {
    pub entities: std::sync::Arc<SqliteEntityStore>,
    pub relationships: std::sync::Arc<SqliteRelationshipStore>,
    pub vectors: std::sync::Arc<SqliteVectorStore>,
    pub history: std::sync::Arc<SqliteHistoryStore>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "opening sqlite store");
        Ok(Self::from_handle(SqliteHandle::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        tracing::debug!("opening in-memory sqlite store");
        Ok(Self::from_handle(SqliteHandle::open_in_memory()?))
    }

    fn from_handle(handle: SqliteHandle) -> Self {
        Self {
            entities: std::sync::Arc::new(SqliteEntityStore::new(handle.clone())),
            relationships: std::sync::Arc::new(SqliteRelationshipStore::new(handle.clone())),
            vectors: std::sync::Arc::new(SqliteVectorStore::new(handle.clone())),
            history: std::sync::Arc::new(SqliteHistoryStore::new(handle)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Entity, EntityKind, FileEntity};
    use crate::ports::EntityStore;

    #[tokio::test]
    async fn test_sqlite_store_wires_all_four_ports() {
        let store = SqliteStore::open_in_memory().unwrap();
        let entity = Entity::new("file:a.ts", "a.ts", "h1", EntityKind::File(FileEntity::new("ts", 1, 1, false, false)));
        store.entities.upsert(&entity).await.unwrap();
        assert!(store.entities.get("file:a.ts").await.unwrap().is_some());
    }
}
