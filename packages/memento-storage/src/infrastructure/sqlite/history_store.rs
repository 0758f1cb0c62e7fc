//! SQLite-backed [`HistoryManager`] (C8): append-only versions, checkpoints
//! materialized as a bounded BFS over active relationships, and retention pruning.

use super::connection::SqliteHandle;
use crate::domain::{canonical_id, CheckpointReason, Relationship, RelationshipType, VersionEntity};
use crate::error::Result;
use crate::ports::{HistoryManager, PruneReport, TimelineEntry, TimelineOptions};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};
use std::collections::{HashSet, VecDeque};

/// The id a version snapshot is referenced by when it's the endpoint of a
/// `PREVIOUS_VERSION` edge. Versions have no independent id of their own in the
/// data model (§3); this is a stable function of the entity and the moment the
/// snapshot was taken, not a new identity scheme.
fn version_node_id(entity_id: &str, timestamp: DateTime<Utc>) -> String {
    format!("version:{entity_id}@{}", timestamp.to_rfc3339())
}

/// A direct, non-evidence-bearing structural edge (mirrors the `CONTAINS` edges
/// the AST Parser emits for directory chains) — `PREVIOUS_VERSION` is asserted by
/// the History Manager itself, not accumulated from multiple observations.
fn previous_version_edge(new_version_id: &str, prior_version_id: &str, at: DateTime<Utc>) -> Relationship {
    let target_key = Relationship::target_key(Some(prior_version_id), None);
    Relationship {
        id: canonical_id(new_version_id, RelationshipType::PreviousVersion, &target_key),
        from_entity_id: new_version_id.to_string(),
        to_entity_id: Some(prior_version_id.to_string()),
        to_ref: None,
        r#type: RelationshipType::PreviousVersion,
        created: at,
        last_modified: at,
        version: 1,
        valid_from: at,
        valid_to: None,
        active: true,
        confidence: Some(1.0),
        evidence: vec![],
        locations: vec![],
        metadata: serde_json::Value::Null,
        occurrences: 1,
        last_seen_at: at,
    }
}

pub struct SqliteHistoryStore {
    handle: SqliteHandle,
}

impl SqliteHistoryStore {
    pub fn new(handle: SqliteHandle) -> Self {
        Self { handle }
    }
}

fn checkpoint_id(seeds: &[String], created: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    for seed in seeds {
        hasher.update(seed.as_bytes());
        hasher.update(b"\0");
    }
    hasher.update(created.to_rfc3339().as_bytes());
    format!("checkpoint:{:x}", hasher.finalize())
}

/// BFS neighbors of `entity_id` across active relationships, either direction.
fn neighbors(conn: &rusqlite::Connection, entity_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT to_entity_id FROM relationships WHERE from_entity_id = ?1 AND active = 1 AND to_entity_id IS NOT NULL
         UNION
         SELECT from_entity_id FROM relationships WHERE to_entity_id = ?1 AND active = 1",
    )?;
    let rows = stmt.query_map(params![entity_id], |r| r.get::<_, String>(0))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

#[async_trait]
impl HistoryManager for SqliteHistoryStore {
    async fn record_version(&self, entity_id: &str, hash: &str, metadata: serde_json::Value) -> Result<()> {
        let entity_id = entity_id.to_string();
        let hash = hash.to_string();
        let now = Utc::now();
        self.handle
            .with_connection(move |conn| {
                let prior_timestamp: Option<String> = conn
                    .query_row(
                        "SELECT timestamp FROM versions WHERE entity_id = ?1 ORDER BY timestamp DESC LIMIT 1",
                        params![entity_id],
                        |r| r.get(0),
                    )
                    .optional()?;

                let metadata_json = serde_json::to_string(&metadata)?;
                conn.execute(
                    "INSERT INTO versions (entity_id, hash, timestamp, metadata) VALUES (?1, ?2, ?3, ?4)",
                    params![entity_id, hash, now.to_rfc3339(), metadata_json],
                )?;

                // §4.8: "append a Version ... and a PREVIOUS_VERSION edge newEntity →
                // priorVersion" — only when an earlier snapshot of this entity exists.
                if let Some(prior_timestamp) = prior_timestamp {
                    let prior_timestamp: DateTime<Utc> = prior_timestamp.parse().map_err(|e| {
                        crate::error::StorageError::serialization(format!("bad version timestamp: {e}"))
                    })?;
                    let new_version_id = version_node_id(&entity_id, now);
                    let prior_version_id = version_node_id(&entity_id, prior_timestamp);
                    let edge = previous_version_edge(&new_version_id, &prior_version_id, now);
                    let data = serde_json::to_string(&edge)?;
                    conn.execute(
                        "INSERT INTO relationships (id, from_entity_id, to_entity_id, type, active, confidence, last_seen_at, data)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                         ON CONFLICT(id) DO NOTHING",
                        params![
                            edge.id,
                            edge.from_entity_id,
                            edge.to_entity_id,
                            edge.r#type.as_str(),
                            edge.active as i64,
                            edge.confidence,
                            edge.last_seen_at.to_rfc3339(),
                            data,
                        ],
                    )?;
                }

                Ok(())
            })
            .await
    }

    async fn prune_history(&self, retention_days: i64) -> Result<PruneReport> {
        let cutoff = Utc::now() - Duration::days(retention_days);
        self.handle
            .with_connection(move |conn| {
                let tx = conn.unchecked_transaction()?;
                let relationships_closed = tx.execute(
                    "UPDATE relationships SET active = 0 WHERE active = 0 AND last_seen_at < ?1",
                    params![cutoff.to_rfc3339()],
                )? as u64;
                let versions_deleted = tx.execute(
                    "DELETE FROM versions WHERE timestamp < ?1",
                    params![cutoff.to_rfc3339()],
                )? as u64;
                let checkpoints_deleted = tx.execute(
                    "DELETE FROM checkpoints WHERE created < ?1",
                    params![cutoff.to_rfc3339()],
                )? as u64;
                tx.execute(
                    "DELETE FROM checkpoint_includes WHERE checkpoint_id NOT IN (SELECT id FROM checkpoints)",
                    [],
                )?;
                tx.commit()?;
                Ok(PruneReport { relationships_closed, versions_deleted, checkpoints_deleted })
            })
            .await
    }

    async fn create_checkpoint(&self, seeds: &[String], reason: CheckpointReason, hops: u32) -> Result<String> {
        let seeds = seeds.to_vec();
        self.handle
            .with_connection(move |conn| {
                let now = Utc::now();
                let id = checkpoint_id(&seeds, now);

                let mut visited: HashSet<String> = seeds.iter().cloned().collect();
                let mut queue: VecDeque<(String, u32)> = seeds.iter().map(|s| (s.clone(), 0)).collect();
                while let Some((current, depth)) = queue.pop_front() {
                    if depth >= hops {
                        continue;
                    }
                    for next in neighbors(conn, &current)? {
                        if visited.insert(next.clone()) {
                            queue.push_back((next, depth + 1));
                        }
                    }
                }

                let reason_str = match reason {
                    CheckpointReason::Daily => "Daily",
                    CheckpointReason::Incident => "Incident",
                    CheckpointReason::Manual => "Manual",
                };
                let seeds_json = serde_json::to_string(&seeds)?;
                let tx = conn.unchecked_transaction()?;
                tx.execute(
                    "INSERT INTO checkpoints (id, reason, hops, seed_entities, created) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![id, reason_str, hops, seeds_json, now.to_rfc3339()],
                )?;
                for entity_id in &visited {
                    tx.execute(
                        "INSERT OR IGNORE INTO checkpoint_includes (checkpoint_id, entity_id) VALUES (?1, ?2)",
                        params![id, entity_id],
                    )?;
                }
                tx.commit()?;
                Ok(id)
            })
            .await
    }

    async fn timeline_of_entity(&self, entity_id: &str, opts: TimelineOptions) -> Result<Vec<TimelineEntry>> {
        let entity_id = entity_id.to_string();
        self.handle
            .with_connection(move |conn| {
                let mut sql = String::from(
                    "SELECT entity_id, hash, timestamp, metadata FROM versions WHERE entity_id = ?1",
                );
                let mut binds: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(entity_id.clone())];
                if let Some(since) = opts.since {
                    sql.push_str(" AND timestamp >= ?");
                    binds.push(Box::new(since.to_rfc3339()));
                }
                if let Some(until) = opts.until {
                    sql.push_str(" AND timestamp <= ?");
                    binds.push(Box::new(until.to_rfc3339()));
                }
                sql.push_str(" ORDER BY timestamp DESC");
                if let Some(limit) = opts.limit {
                    sql.push_str(&format!(" LIMIT {limit}"));
                }

                let mut stmt = conn.prepare(&sql)?;
                let params_ref: Vec<&dyn rusqlite::ToSql> = binds.iter().map(|b| b.as_ref()).collect();
                let rows = stmt.query_map(params_ref.as_slice(), |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, String>(3)?,
                    ))
                })?;

                let mut entries = Vec::new();
                for row in rows {
                    let (eid, hash, timestamp, metadata) = row?;
                    let timestamp: DateTime<Utc> = timestamp.parse().map_err(|e| {
                        crate::error::StorageError::serialization(format!("bad timestamp: {e}"))
                    })?;
                    let metadata: serde_json::Value = serde_json::from_str(&metadata)?;
                    let version = VersionEntity { entity_id: eid, hash, timestamp, metadata };

                    // valid_from/valid_to live inside `data`, not as indexed columns, so the
                    // as-of filter runs in Rust after a broad fetch by entity id. Archived
                    // intervals from `relationship_history` are included alongside the live
                    // `relationships` row so a Reopened edge's earlier closed interval is
                    // still visible to a timestamp that falls inside it (§4.6, §4.8).
                    let mut all_stmt = conn.prepare(
                        "SELECT data FROM relationships WHERE from_entity_id = ?1 OR to_entity_id = ?1
                         UNION ALL
                         SELECT data FROM relationship_history WHERE from_entity_id = ?1 OR to_entity_id = ?1",
                    )?;
                    let rel_rows = all_stmt.query_map(params![entity_id], |r| r.get::<_, String>(0))?;
                    let mut relationships_at_point = Vec::new();
                    for rel_row in rel_rows {
                        let rel: Relationship = serde_json::from_str(&rel_row?)?;
                        if rel.valid_from <= timestamp && rel.valid_to.map(|vt| vt > timestamp).unwrap_or(true) {
                            relationships_at_point.push(rel);
                        }
                    }

                    entries.push(TimelineEntry { version, modifying_session: None, relationships_at_point });
                }
                Ok(entries)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_version_then_timeline() {
        let store = SqliteHistoryStore::new(SqliteHandle::open_in_memory().unwrap());
        store.record_version("file:a.ts", "h1", serde_json::json!({})).await.unwrap();
        store.record_version("file:a.ts", "h2", serde_json::json!({})).await.unwrap();

        let timeline = store.timeline_of_entity("file:a.ts", TimelineOptions::default()).await.unwrap();
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline[0].version.hash, "h2"); // most recent first
    }

    #[tokio::test]
    async fn test_record_version_emits_previous_version_edge() {
        let handle = SqliteHandle::open_in_memory().unwrap();
        let store = SqliteHistoryStore::new(handle.clone());

        // First observation of an entity has no prior snapshot to chain from.
        store.record_version("file:a.ts", "h1", serde_json::json!({})).await.unwrap();
        let count_after_first: i64 = handle
            .with_connection(|conn| {
                conn.query_row("SELECT count(*) FROM relationships WHERE type = 'PREVIOUS_VERSION'", [], |r| r.get(0))
                    .map_err(Into::into)
            })
            .await
            .unwrap();
        assert_eq!(count_after_first, 0);

        store.record_version("file:a.ts", "h2", serde_json::json!({})).await.unwrap();
        let edges: Vec<String> = handle
            .with_connection(|conn| {
                let mut stmt = conn.prepare("SELECT data FROM relationships WHERE type = 'PREVIOUS_VERSION'")?;
                let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok(out)
            })
            .await
            .unwrap();
        assert_eq!(edges.len(), 1);
        let edge: Relationship = serde_json::from_str(&edges[0]).unwrap();
        assert_eq!(edge.r#type, RelationshipType::PreviousVersion);
        assert!(edge.from_entity_id.starts_with("version:file:a.ts@"));
        assert!(edge.to_entity_id.unwrap().starts_with("version:file:a.ts@"));
    }

    #[tokio::test]
    async fn test_timeline_of_entity_includes_archived_relationship_history() {
        let handle = SqliteHandle::open_in_memory().unwrap();
        let store = SqliteHistoryStore::new(handle.clone());

        let version_at = Utc::now() - chrono::Duration::hours(1);
        let valid_from = version_at - chrono::Duration::hours(2);
        let valid_to = version_at + chrono::Duration::hours(1);
        let mut archived = sample_relationship("a", "b", valid_from);
        archived.valid_to = Some(valid_to);
        archived.active = false;
        let data = serde_json::to_string(&archived).unwrap();

        handle
            .with_connection(move |conn| {
                conn.execute(
                    "INSERT INTO versions (entity_id, hash, timestamp, metadata) VALUES ('a', 'h1', ?1, '{}')",
                    params![version_at.to_rfc3339()],
                )?;
                conn.execute(
                    "INSERT INTO relationship_history (history_id, id, from_entity_id, to_entity_id, type, valid_from, valid_to, data)
                     VALUES ('r1@hist', 'r1', 'a', 'b', 'CALLS', ?1, ?2, ?3)",
                    params![valid_from.to_rfc3339(), valid_to.to_rfc3339(), data],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let timeline = store.timeline_of_entity("a", TimelineOptions::default()).await.unwrap();
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline[0].relationships_at_point.len(), 1, "the reopened edge's earlier closed interval should still be visible at a timestamp inside it");
    }

    fn sample_relationship(from: &str, to: &str, valid_from: DateTime<Utc>) -> Relationship {
        Relationship {
            id: "r1".to_string(),
            from_entity_id: from.to_string(),
            to_entity_id: Some(to.to_string()),
            to_ref: None,
            r#type: RelationshipType::Calls,
            created: valid_from,
            last_modified: valid_from,
            version: 1,
            valid_from,
            valid_to: None,
            active: true,
            confidence: Some(1.0),
            evidence: vec![],
            locations: vec![],
            metadata: serde_json::Value::Null,
            occurrences: 1,
            last_seen_at: valid_from,
        }
    }

    #[tokio::test]
    async fn test_create_checkpoint_bfs_includes_neighbors() {
        let handle = SqliteHandle::open_in_memory().unwrap();
        let store = SqliteHistoryStore::new(handle.clone());

        handle
            .with_connection(|conn| {
                conn.execute(
                    "INSERT INTO relationships (id, from_entity_id, to_entity_id, type, active, confidence, last_seen_at, data)
                     VALUES ('r1', 'a', 'b', 'CALLS', 1, 1.0, ?1, '{}')",
                    params![Utc::now().to_rfc3339()],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let id = store
            .create_checkpoint(&["a".to_string()], CheckpointReason::Manual, 1)
            .await
            .unwrap();

        let included: i64 = handle
            .with_connection(move |conn| {
                conn.query_row(
                    "SELECT count(*) FROM checkpoint_includes WHERE checkpoint_id = ?1",
                    params![id],
                    |r| r.get(0),
                )
                .map_err(Into::into)
            })
            .await
            .unwrap();
        assert_eq!(included, 2); // "a" itself and neighbor "b"
    }

    #[tokio::test]
    async fn test_prune_history_deletes_old_versions() {
        let store = SqliteHistoryStore::new(SqliteHandle::open_in_memory().unwrap());
        store.record_version("file:a.ts", "h1", serde_json::json!({})).await.unwrap();
        let report = store.prune_history(-1).await.unwrap(); // cutoff in the future: everything is "old"
        assert_eq!(report.versions_deleted, 1);
    }
}
