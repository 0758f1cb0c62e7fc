//! Storage ports (RFC-101-style trait-first design).
//!
//! Four async traits, one per storage concern (§9's "one store interface per
//! concern" redesign flag): [`EntityStore`] (C5), [`RelationshipStore`] (C6),
//! [`VectorStore`] (C7), [`HistoryManager`] (C8). Each trait's doc comment quotes
//! the operation contract it implements; `infrastructure::sqlite` is the sole
//! backend for all four in this repository.
//!
//! Stores do not publish to an event bus themselves — that would require this
//! crate to depend on `memento-sync`, inverting the dependency the workspace is
//! laid out around. Instead each mutating call *returns* which case occurred
//! (e.g. [`UpsertOutcome`]); the Sync Coordinator is the layer that turns a
//! returned outcome into a published event, after the owning transaction commits
//! (§4.9 step 8).

use crate::domain::{Entity, Relationship, RelationshipType, VersionEntity};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

// ───────────────────────────── Entity Store (C5) ─────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

#[derive(Debug, Clone, Copy)]
pub enum BulkUpsertMode {
    SkipExisting,
    UpdateExisting,
}

#[derive(Debug, Clone, Default)]
pub struct BulkUpsertReport {
    pub created: u64,
    pub updated: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityOrderBy {
    Id,
    Path,
    Name,
    LastModified,
}

#[derive(Debug, Clone, Default)]
pub struct ListEntitiesQuery {
    pub kind_label: Option<String>,
    pub path: Option<String>,
    pub name_contains: Option<String>,
    pub limit: usize,
    pub offset: usize,
    pub order_by: Option<EntityOrderBy>,
}

#[derive(Debug, Clone, Default)]
pub struct EntityStats {
    pub total: u64,
    pub by_type: BTreeMap<String, u64>,
    pub recently_modified_7d: u64,
}

/// C5: CRUD and bulk upsert of entities onto the labeled property graph.
///
/// All operations are idempotent by `id` (§4.5).
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Create-or-update; sets `lastModified`; caller translates the returned
    /// outcome into `entityCreated`/`entityUpdated`.
    async fn upsert(&self, entity: &Entity) -> Result<UpsertOutcome>;

    /// Batched upsert. Returns counts rather than failing the whole batch on one
    /// bad record (§4.5 `bulkUpsert`).
    async fn bulk_upsert(&self, entities: &[Entity], mode: BulkUpsertMode) -> Result<BulkUpsertReport>;

    async fn get(&self, id: &str) -> Result<Option<Entity>>;

    async fn list_by_type(&self, kind_label: &str, limit: usize) -> Result<Vec<Entity>>;

    async fn list_by_file(&self, path: &str) -> Result<Vec<Entity>>;

    async fn list(&self, query: ListEntitiesQuery) -> Result<Vec<Entity>>;

    /// Detach-delete: sets `active=false` on incident relationships, then removes
    /// the entity row. Caller emits `entityDeleted`.
    async fn delete(&self, id: &str) -> Result<()>;

    async fn stats(&self) -> Result<EntityStats>;
}

// ────────────────────────── Relationship Store (C6) ──────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct BulkCreateOptions {
    pub merge_evidence: bool,
    pub update_timestamps: bool,
}

impl Default for BulkCreateOptions {
    fn default() -> Self {
        Self { merge_evidence: true, update_timestamps: true }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RelationshipQuery {
    pub from_entity_id: Option<String>,
    pub to_entity_id: Option<String>,
    pub r#type: Option<RelationshipType>,
    pub active: Option<bool>,
    pub confidence_min: Option<f32>,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MergeDuplicatesReport {
    pub groups_merged: u64,
    pub rows_removed: u64,
}

/// C6: CRUD, bulk merge, evidence accumulation, and temporal validity.
#[async_trait]
pub trait RelationshipStore: Send + Sync {
    /// Computes the canonical id. If no row exists yet, or the existing row is
    /// still active, merges onto it (OR evidence, MAX confidence, SUM
    /// occurrences), sets `lastSeenAt=now`, `active=true`, `validTo=null`. If the
    /// existing row is closed, this is a Reopen (§4.6): the closed interval is
    /// archived to history first, then a fresh active interval starts at
    /// `validFrom=now` rather than folding the archived interval's evidence and
    /// occurrence count into the new one. Returns [`UpsertOutcome::Created`] only
    /// on first observation.
    async fn create(&self, relationship: Relationship) -> Result<UpsertOutcome>;

    async fn bulk_create(&self, relationships: Vec<Relationship>, opts: BulkCreateOptions) -> Result<BulkUpsertReport>;

    /// Sets `active=false`, `validTo=now`. Never a physical delete.
    async fn delete(&self, from_entity_id: &str, to_entity_id: &str, r#type: RelationshipType) -> Result<()>;

    async fn query(&self, query: RelationshipQuery) -> Result<Vec<Relationship>>;

    /// For any edge where `lastSeenAt < ts` and currently active, close it.
    /// `from_entity_ids`, when given, restricts the sweep to edges whose
    /// `fromEntityId` is in that set — the form the Sync Coordinator uses after a
    /// single file's pass, since that pass only re-stamped `lastSeenAt` on the
    /// edges *that file* emits (§4.9 step 7). `None` sweeps the whole store and is
    /// reserved for the end of a full reindex, never a single incremental change
    /// (§9 resolved).
    async fn mark_inactive_not_seen_since(&self, ts: DateTime<Utc>, from_entity_ids: Option<&[String]>) -> Result<u64>;

    /// Coalesce edges with identical `(from, type, target-key)`.
    async fn merge_duplicates(&self) -> Result<MergeDuplicatesReport>;
}

// ───────────────────────────── Vector Store (C7) ─────────────────────────────

#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub entity_id: String,
    pub vector: Vec<f32>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct VectorSearchOptions {
    pub limit: usize,
    pub min_score: Option<f32>,
    /// Subset match against a stored record's `metadata`: every key/value pair
    /// here must be present and equal in the candidate's metadata object.
    pub filter: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub entity_id: String,
    pub score: f32,
}

#[derive(Debug, Clone, Default)]
pub struct VectorStoreStats {
    pub count: u64,
    pub dimension: usize,
}

/// C7: upsert and similarity search of embeddings keyed 1-to-1 by entity id.
///
/// This repository's only backend is the in-memory cosine-similarity fallback
/// named in §4.7 — there is no native ANN backend in scope, so the fallback path
/// is the production path, not a placeholder.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, record: VectorRecord) -> Result<()>;

    /// Ordered by score descending, ties broken by `lastModified` descending.
    /// Rejects with `StorageError` (kind `DimensionMismatch`) when `query.len()`
    /// does not match the store's configured dimension (§9 resolved).
    async fn search(&self, query: &[f32], opts: VectorSearchOptions) -> Result<Vec<VectorMatch>>;

    /// Like `search` seeded from a stored vector; excludes the query entity.
    async fn find_similar(&self, entity_id: &str, opts: VectorSearchOptions) -> Result<Vec<VectorMatch>>;

    async fn delete(&self, entity_id: &str) -> Result<()>;

    async fn stats(&self) -> Result<VectorStoreStats>;
}

// ──────────────────────────── History Manager (C8) ───────────────────────────

#[derive(Debug, Clone, Default)]
pub struct PruneReport {
    pub relationships_closed: u64,
    pub versions_deleted: u64,
    pub checkpoints_deleted: u64,
}

#[derive(Debug, Clone)]
pub struct TimelineEntry {
    pub version: VersionEntity,
    pub modifying_session: Option<String>,
    pub relationships_at_point: Vec<Relationship>,
}

#[derive(Debug, Clone, Default)]
pub struct TimelineOptions {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// C8: append-only versions, checkpoints, and edge `validFrom/validTo` closure.
#[async_trait]
pub trait HistoryManager: Send + Sync {
    /// Appends a `Version` and a `PREVIOUS_VERSION` edge. Called whenever an
    /// entity update changes `hash` (§4.8).
    async fn record_version(&self, entity_id: &str, hash: &str, metadata: serde_json::Value) -> Result<()>;

    async fn prune_history(&self, retention_days: i64) -> Result<PruneReport>;

    /// Materializes a `Checkpoint` plus `CHECKPOINT_INCLUDES` edges to every
    /// entity reachable within `hops` edges from the seed set (BFS, bounded).
    async fn create_checkpoint(
        &self,
        seeds: &[String],
        reason: crate::domain::CheckpointReason,
        hops: u32,
    ) -> Result<String>;

    async fn timeline_of_entity(&self, entity_id: &str, opts: TimelineOptions) -> Result<Vec<TimelineEntry>>;
}
