//! Read façade (§6): the external-facing, read-only surface over the four
//! storage ports. Every method here is a thin delegation — no business logic
//! lives in this file, only the narrowing from "whatever the four ports can do"
//! down to the handful of queries external callers are meant to issue.

use crate::error::Result;
use memento_storage::domain::{Entity, Relationship, VersionEntity};
use memento_storage::infrastructure::SqliteStore;
use memento_storage::ports::{
    EntityStats, EntityStore, HistoryManager, ListEntitiesQuery, PruneReport, RelationshipQuery,
    RelationshipStore, TimelineOptions, VectorMatch, VectorSearchOptions, VectorStore,
};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    pub entities: EntityStats,
    pub vector_count: u64,
    pub vector_dimension: usize,
}

#[derive(Debug, Clone)]
pub struct TimelineEntry {
    pub version: VersionEntity,
    pub modifying_session: Option<String>,
    pub relationships_at_point: Vec<Relationship>,
}

/// Read-only view over a [`SqliteStore`], handed out to consumers that must
/// never be able to mutate the graph directly — only the Sync Coordinator holds
/// write access to the underlying ports.
#[derive(Clone)]
pub struct ReadFacade {
    store: Arc<SqliteStore>,
}

impl ReadFacade {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self { store }
    }

    pub async fn get_entity(&self, id: &str) -> Result<Option<Entity>> {
        Ok(self.store.entities.get(id).await?)
    }

    pub async fn list_entities(&self, query: ListEntitiesQuery) -> Result<Vec<Entity>> {
        Ok(self.store.entities.list(query).await?)
    }

    pub async fn list_relationships(&self, query: RelationshipQuery) -> Result<Vec<Relationship>> {
        Ok(self.store.relationships.query(query).await?)
    }

    pub async fn search_vector(&self, vector: &[f32], opts: VectorSearchOptions) -> Result<Vec<VectorMatch>> {
        Ok(self.store.vectors.search(vector, opts).await?)
    }

    pub async fn find_similar(&self, entity_id: &str, opts: VectorSearchOptions) -> Result<Vec<VectorMatch>> {
        Ok(self.store.vectors.find_similar(entity_id, opts).await?)
    }

    pub async fn timeline(&self, entity_id: &str, opts: TimelineOptions) -> Result<Vec<TimelineEntry>> {
        let entries = self.store.history.timeline_of_entity(entity_id, opts).await?;
        Ok(entries
            .into_iter()
            .map(|e| TimelineEntry {
                version: e.version,
                modifying_session: e.modifying_session,
                relationships_at_point: e.relationships_at_point,
            })
            .collect())
    }

    pub async fn stats(&self) -> Result<SyncStats> {
        let entities = self.store.entities.stats().await?;
        let vectors = self.store.vectors.stats().await?;
        Ok(SyncStats { entities, vector_count: vectors.count, vector_dimension: vectors.dimension })
    }

    /// Delegates to C8's `prune_history`; write-shaped, but exposed here because
    /// §6 names it as part of the same caller-facing contract (retention cleanup
    /// is operational, not a graph mutation a consumer would author by hand).
    pub async fn prune_history(&self, retention_days: i64) -> Result<PruneReport> {
        Ok(self.store.history.prune_history(retention_days).await?)
    }

    pub async fn create_checkpoint(
        &self,
        seeds: &[String],
        reason: memento_storage::domain::CheckpointReason,
        hops: u32,
    ) -> Result<String> {
        Ok(self.store.history.create_checkpoint(seeds, reason, hops).await?)
    }
}
