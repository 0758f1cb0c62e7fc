//! SQLite-backed [`RelationshipStore`] (C6).
//!
//! Mirrors the entity store's layout: indexed scalar columns (`from_entity_id`,
//! `to_entity_id`, `type`, `active`, `confidence`, `last_seen_at`) plus the full
//! relationship serialized into `data`. `create` merges onto the canonical id
//! rather than inserting a fresh row, so repeated observations of the same edge
//! accumulate evidence instead of duplicating (data-model invariant 3).

use super::connection::SqliteHandle;
use crate::domain::{bound_evidence, combine_confidence, Relationship, RelationshipType};
use crate::error::Result;
use crate::ports::{
    BulkCreateOptions, BulkUpsertReport, MergeDuplicatesReport, RelationshipQuery, RelationshipStore,
    UpsertOutcome,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;

pub struct SqliteRelationshipStore {
    handle: SqliteHandle,
}

impl SqliteRelationshipStore {
    pub fn new(handle: SqliteHandle) -> Self {
        Self { handle }
    }
}

fn load(conn: &rusqlite::Connection, id: &str) -> Result<Option<Relationship>> {
    let data: Option<String> = conn
        .query_row("SELECT data FROM relationships WHERE id = ?1", params![id], |r| r.get(0))
        .optional()?;
    data.map(|d| Ok(serde_json::from_str(&d)?)).transpose()
}

fn store(conn: &rusqlite::Connection, rel: &Relationship) -> Result<()> {
    let data = serde_json::to_string(rel)?;
    conn.execute(
        "INSERT INTO relationships (id, from_entity_id, to_entity_id, type, active, confidence, last_seen_at, data)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(id) DO UPDATE SET
            from_entity_id = excluded.from_entity_id,
            to_entity_id = excluded.to_entity_id,
            type = excluded.type,
            active = excluded.active,
            confidence = excluded.confidence,
            last_seen_at = excluded.last_seen_at,
            data = excluded.data",
        params![
            rel.id,
            rel.from_entity_id,
            rel.to_entity_id,
            rel.r#type.as_str(),
            rel.active as i64,
            rel.confidence,
            rel.last_seen_at.to_rfc3339(),
            data,
        ],
    )?;
    Ok(())
}

/// Persists a closed edge's interval into `relationship_history` before its
/// canonical-id row can be overwritten by a later reopen — §4.6's "the closed
/// row remains in history" and §4.8's as-of reconstruction both depend on that
/// interval surviving past the moment the live row gets reused. Idempotent:
/// re-archiving the same `(id, validFrom)` is a no-op.
fn archive_closed(conn: &rusqlite::Connection, rel: &Relationship) -> Result<()> {
    let Some(valid_to) = rel.valid_to else { return Ok(()) };
    let history_id = format!("{}@{}", rel.id, rel.valid_from.to_rfc3339());
    let data = serde_json::to_string(rel)?;
    conn.execute(
        "INSERT INTO relationship_history (history_id, id, from_entity_id, to_entity_id, type, valid_from, valid_to, data)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(history_id) DO NOTHING",
        params![
            history_id,
            rel.id,
            rel.from_entity_id,
            rel.to_entity_id,
            rel.r#type.as_str(),
            rel.valid_from.to_rfc3339(),
            valid_to.to_rfc3339(),
            data,
        ],
    )?;
    Ok(())
}

/// §4.6's Reopened transition: re-observing a closed edge starts a fresh
/// interval rather than folding the archived interval's evidence and
/// occurrence count into it. `created` (first-ever-seen) carries over;
/// `validFrom` resets to the incoming observation's own timestamp.
fn reopen(existing: Relationship, incoming: Relationship) -> Relationship {
    let evidence = bound_evidence(incoming.evidence);
    let confidences: Vec<f32> = evidence.iter().map(|e| e.confidence).collect();
    let confidence =
        if confidences.is_empty() { incoming.confidence } else { Some(combine_confidence(&confidences)) };

    Relationship {
        id: existing.id,
        from_entity_id: existing.from_entity_id,
        to_entity_id: incoming.to_entity_id,
        to_ref: incoming.to_ref,
        r#type: existing.r#type,
        created: existing.created,
        last_modified: incoming.last_seen_at,
        version: existing.version + 1,
        valid_from: incoming.valid_from,
        valid_to: None,
        active: true,
        confidence,
        evidence,
        locations: incoming.locations,
        metadata: incoming.metadata,
        occurrences: incoming.occurrences,
        last_seen_at: incoming.last_seen_at,
    }
}

/// Merge an incoming observation onto an existing relationship: OR evidence
/// (bounded), MAX confidence, SUM occurrences, refresh `lastSeenAt`/`active` (§4.6).
fn merge(existing: Relationship, incoming: Relationship) -> Relationship {
    let mut evidence = existing.evidence;
    evidence.extend(incoming.evidence);
    let evidence = bound_evidence(evidence);

    let mut locations = existing.locations;
    for loc in incoming.locations {
        if !locations.contains(&loc) {
            locations.push(loc);
        }
    }

    let confidences: Vec<f32> = evidence.iter().map(|e| e.confidence).collect();
    let confidence = if confidences.is_empty() {
        incoming.confidence.or(existing.confidence)
    } else {
        Some(combine_confidence(&confidences))
    };

    Relationship {
        id: existing.id,
        from_entity_id: existing.from_entity_id,
        to_entity_id: incoming.to_entity_id.or(existing.to_entity_id),
        to_ref: incoming.to_ref.or(existing.to_ref),
        r#type: existing.r#type,
        created: existing.created,
        last_modified: incoming.last_seen_at,
        version: existing.version + 1,
        valid_from: existing.valid_from,
        valid_to: None,
        active: true,
        confidence,
        evidence,
        locations,
        metadata: incoming.metadata,
        occurrences: existing.occurrences + incoming.occurrences,
        last_seen_at: incoming.last_seen_at,
    }
}

#[async_trait]
impl RelationshipStore for SqliteRelationshipStore {
    async fn create(&self, relationship: Relationship) -> Result<UpsertOutcome> {
        self.handle
            .with_connection(move |conn| {
                let existing = load(conn, &relationship.id)?;
                let outcome = if existing.is_some() { UpsertOutcome::Updated } else { UpsertOutcome::Created };
                let merged = match existing {
                    Some(existing) if !existing.active && existing.valid_to.is_some() => {
                        archive_closed(conn, &existing)?;
                        reopen(existing, relationship)
                    }
                    Some(existing) => merge(existing, relationship),
                    None => relationship,
                };
                store(conn, &merged)?;
                Ok(outcome)
            })
            .await
    }

    async fn bulk_create(&self, relationships: Vec<Relationship>, opts: BulkCreateOptions) -> Result<BulkUpsertReport> {
        self.handle
            .with_connection(move |conn| {
                let mut report = BulkUpsertReport::default();
                let tx = conn.unchecked_transaction()?;
                for incoming in relationships {
                    let existing = load(&tx, &incoming.id)?;
                    let merged = match existing {
                        Some(existing) if !existing.active && existing.valid_to.is_some() => {
                            report.updated += 1;
                            archive_closed(&tx, &existing)?;
                            reopen(existing, incoming)
                        }
                        Some(existing) if opts.merge_evidence => {
                            report.updated += 1;
                            merge(existing, incoming)
                        }
                        Some(_) if opts.update_timestamps => {
                            report.updated += 1;
                            incoming
                        }
                        Some(existing) => {
                            report.updated += 1;
                            existing
                        }
                        None => {
                            report.created += 1;
                            incoming
                        }
                    };
                    store(&tx, &merged)?;
                }
                tx.commit()?;
                Ok(report)
            })
            .await
    }

    async fn delete(&self, from_entity_id: &str, to_entity_id: &str, r#type: RelationshipType) -> Result<()> {
        let from_entity_id = from_entity_id.to_string();
        let to_entity_id = to_entity_id.to_string();
        let now = Utc::now();
        self.handle
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, data FROM relationships WHERE from_entity_id = ?1 AND to_entity_id = ?2 AND type = ?3",
                )?;
                let rows: Vec<(String, String)> = stmt
                    .query_map(params![from_entity_id, to_entity_id, r#type.as_str()], |r| {
                        Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
                    })?
                    .collect::<rusqlite::Result<_>>()?;
                drop(stmt);
                for (id, data) in rows {
                    let mut rel: Relationship = serde_json::from_str(&data)?;
                    rel.active = false;
                    rel.valid_to = Some(now);
                    archive_closed(conn, &rel)?;
                    let updated = serde_json::to_string(&rel)?;
                    conn.execute(
                        "UPDATE relationships SET active = 0, data = ?1 WHERE id = ?2",
                        params![updated, id],
                    )?;
                }
                Ok(())
            })
            .await
    }

    async fn query(&self, query: RelationshipQuery) -> Result<Vec<Relationship>> {
        self.handle
            .with_connection(move |conn| {
                let mut sql = String::from("SELECT data FROM relationships WHERE 1=1");
                let mut binds: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
                if let Some(from) = &query.from_entity_id {
                    sql.push_str(" AND from_entity_id = ?");
                    binds.push(Box::new(from.clone()));
                }
                if let Some(to) = &query.to_entity_id {
                    sql.push_str(" AND to_entity_id = ?");
                    binds.push(Box::new(to.clone()));
                }
                if let Some(t) = &query.r#type {
                    sql.push_str(" AND type = ?");
                    binds.push(Box::new(t.as_str().to_string()));
                }
                if let Some(active) = query.active {
                    sql.push_str(" AND active = ?");
                    binds.push(Box::new(active as i64));
                }
                if let Some(min) = query.confidence_min {
                    sql.push_str(" AND confidence >= ?");
                    binds.push(Box::new(min));
                }
                sql.push_str(" ORDER BY last_seen_at DESC LIMIT ? OFFSET ?");
                let limit = if query.limit == 0 { 100 } else { query.limit };
                binds.push(Box::new(limit as i64));
                binds.push(Box::new(query.offset as i64));

                let mut stmt = conn.prepare(&sql)?;
                let params_ref: Vec<&dyn rusqlite::ToSql> = binds.iter().map(|b| b.as_ref()).collect();
                let rows = stmt.query_map(params_ref.as_slice(), |r| r.get::<_, String>(0))?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(serde_json::from_str(&row?)?);
                }
                Ok(out)
            })
            .await
    }

    async fn mark_inactive_not_seen_since(&self, ts: DateTime<Utc>, from_entity_ids: Option<&[String]>) -> Result<u64> {
        let scope = from_entity_ids.map(|ids| ids.to_vec());
        self.handle
            .with_connection(move |conn| {
                let rows: Vec<(String, String)> = match &scope {
                    None => {
                        let mut stmt = conn.prepare(
                            "SELECT id, data FROM relationships WHERE active = 1 AND last_seen_at < ?1",
                        )?;
                        let rows = stmt
                            .query_map(params![ts.to_rfc3339()], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
                            .collect::<rusqlite::Result<_>>()?;
                        rows
                    }
                    Some(ids) => {
                        if ids.is_empty() {
                            Vec::new()
                        } else {
                            let placeholders = std::iter::repeat("?").take(ids.len()).collect::<Vec<_>>().join(", ");
                            let sql = format!(
                                "SELECT id, data FROM relationships WHERE active = 1 AND last_seen_at < ? AND from_entity_id IN ({placeholders})"
                            );
                            let mut stmt = conn.prepare(&sql)?;
                            let mut binds: Vec<&dyn rusqlite::ToSql> = Vec::with_capacity(ids.len() + 1);
                            let ts_str = ts.to_rfc3339();
                            binds.push(&ts_str);
                            for id in ids {
                                binds.push(id);
                            }
                            let rows = stmt
                                .query_map(binds.as_slice(), |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
                                .collect::<rusqlite::Result<_>>()?;
                            rows
                        }
                    }
                };
                let count = rows.len() as u64;
                for (id, data) in rows {
                    let mut rel: Relationship = serde_json::from_str(&data)?;
                    rel.active = false;
                    rel.valid_to = Some(ts);
                    archive_closed(conn, &rel)?;
                    let updated = serde_json::to_string(&rel)?;
                    conn.execute(
                        "UPDATE relationships SET active = 0, data = ?1 WHERE id = ?2",
                        params![updated, id],
                    )?;
                }
                Ok(count)
            })
            .await
    }

    async fn merge_duplicates(&self) -> Result<MergeDuplicatesReport> {
        self.handle
            .with_connection(move |conn| {
                let mut stmt = conn.prepare("SELECT id, from_entity_id, type, to_entity_id, data FROM relationships")?;
                let rows: Vec<(String, String, String, Option<String>, String)> = stmt
                    .query_map([], |r| {
                        Ok((
                            r.get::<_, String>(0)?,
                            r.get::<_, String>(1)?,
                            r.get::<_, String>(2)?,
                            r.get::<_, Option<String>>(3)?,
                            r.get::<_, String>(4)?,
                        ))
                    })?
                    .collect::<rusqlite::Result<_>>()?;
                drop(stmt);

                let mut groups: HashMap<(String, String, Option<String>), Vec<(String, Relationship)>> = HashMap::new();
                for (id, from, rel_type, to, data) in rows {
                    let rel: Relationship = serde_json::from_str(&data)?;
                    groups.entry((from, rel_type, to)).or_default().push((id, rel));
                }

                let mut report = MergeDuplicatesReport::default();
                let tx_needed = groups.values().any(|g| g.len() > 1);
                if !tx_needed {
                    return Ok(report);
                }
                let tx = conn.unchecked_transaction()?;
                for (_, mut entries) in groups {
                    if entries.len() <= 1 {
                        continue;
                    }
                    entries.sort_by(|a, b| a.1.created.cmp(&b.1.created));
                    let (keep_id, mut merged) = entries.remove(0);
                    for (dup_id, dup) in entries {
                        merged = merge(merged, dup);
                        tx.execute("DELETE FROM relationships WHERE id = ?1", params![dup_id])?;
                        report.rows_removed += 1;
                    }
                    store(&tx, &merged)?;
                    let _ = keep_id;
                    report.groups_merged += 1;
                }
                tx.commit()?;
                Ok(report)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{canonical_id, Evidence, EvidenceSource};
    use crate::ports::RelationshipQuery;

    fn sample(from: &str, to: &str, confidence: f32) -> Relationship {
        let now = Utc::now();
        Relationship {
            id: canonical_id(from, RelationshipType::Calls, to),
            from_entity_id: from.into(),
            to_entity_id: Some(to.into()),
            to_ref: None,
            r#type: RelationshipType::Calls,
            created: now,
            last_modified: now,
            version: 1,
            valid_from: now,
            valid_to: None,
            active: true,
            confidence: Some(confidence),
            evidence: vec![Evidence {
                source: EvidenceSource::Ast,
                confidence,
                location: None,
                note: None,
                last_seen_at: now,
            }],
            locations: vec![],
            metadata: serde_json::Value::Null,
            occurrences: 1,
            last_seen_at: now,
        }
    }

    #[tokio::test]
    async fn test_create_is_idempotent_by_canonical_id() {
        let store = SqliteRelationshipStore::new(SqliteHandle::open_in_memory().unwrap());
        let rel = sample("a", "b", 1.0);
        assert_eq!(store.create(rel.clone()).await.unwrap(), UpsertOutcome::Created);
        assert_eq!(store.create(rel).await.unwrap(), UpsertOutcome::Updated);

        let found = store
            .query(RelationshipQuery { from_entity_id: Some("a".into()), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].occurrences, 2);
    }

    #[tokio::test]
    async fn test_create_merges_evidence_and_confidence() {
        let store = SqliteRelationshipStore::new(SqliteHandle::open_in_memory().unwrap());
        store.create(sample("a", "b", 0.7)).await.unwrap();
        store.create(sample("a", "b", 0.4)).await.unwrap();

        let found = store
            .query(RelationshipQuery { from_entity_id: Some("a".into()), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(found[0].evidence.len(), 2);
        let expected = combine_confidence(&[0.7, 0.4]);
        assert!((found[0].confidence.unwrap() - expected).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_delete_sets_inactive_not_physical() {
        let store = SqliteRelationshipStore::new(SqliteHandle::open_in_memory().unwrap());
        store.create(sample("a", "b", 1.0)).await.unwrap();
        store.delete("a", "b", RelationshipType::Calls).await.unwrap();

        let found = store
            .query(RelationshipQuery { from_entity_id: Some("a".into()), active: Some(false), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!(!found[0].active);
        assert!(found[0].valid_to.is_some());
    }

    #[tokio::test]
    async fn test_delete_archives_closed_interval_to_history() {
        let handle = SqliteHandle::open_in_memory().unwrap();
        let store = SqliteRelationshipStore::new(handle.clone());
        let rel_id = sample("a", "b", 1.0).id;
        store.create(sample("a", "b", 1.0)).await.unwrap();
        store.delete("a", "b", RelationshipType::Calls).await.unwrap();

        let history_rows: i64 = handle
            .with_connection(move |conn| {
                conn.query_row(
                    "SELECT count(*) FROM relationship_history WHERE id = ?1",
                    params![rel_id],
                    |r| r.get(0),
                )
                .map_err(Into::into)
            })
            .await
            .unwrap();
        assert_eq!(history_rows, 1, "the closed interval must survive in history");
    }

    #[tokio::test]
    async fn test_reopen_creates_fresh_interval_and_preserves_closed_one_in_history() {
        let handle = SqliteHandle::open_in_memory().unwrap();
        let store = SqliteRelationshipStore::new(handle.clone());
        let rel_id = sample("a", "b", 1.0).id;

        store.create(sample("a", "b", 0.7)).await.unwrap();
        store.delete("a", "b", RelationshipType::Calls).await.unwrap();
        let closed_valid_to = store
            .query(RelationshipQuery { from_entity_id: Some("a".into()), active: Some(false), ..Default::default() })
            .await
            .unwrap()[0]
            .valid_to
            .unwrap();

        // Re-observing the same edge after it closed is a Reopen (§4.6): a fresh
        // active interval, not a resurrection of the closed one's evidence.
        store.create(sample("a", "b", 0.9)).await.unwrap();

        let active = store
            .query(RelationshipQuery { from_entity_id: Some("a".into()), active: Some(true), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert!(active[0].valid_to.is_none());
        assert_eq!(active[0].evidence.len(), 1, "reopen starts a fresh interval, not merged evidence");
        assert!(active[0].valid_from > closed_valid_to, "the new interval starts after the old one closed");

        let history_rows: i64 = handle
            .with_connection(move |conn| {
                conn.query_row(
                    "SELECT count(*) FROM relationship_history WHERE id = ?1",
                    params![rel_id],
                    |r| r.get(0),
                )
                .map_err(Into::into)
            })
            .await
            .unwrap();
        assert_eq!(history_rows, 1, "the first, closed interval must still be queryable");
    }

    #[tokio::test]
    async fn test_mark_inactive_not_seen_since() {
        let store = SqliteRelationshipStore::new(SqliteHandle::open_in_memory().unwrap());
        let mut rel = sample("a", "b", 1.0);
        rel.last_seen_at = Utc::now() - chrono::Duration::days(1);
        store.create(rel).await.unwrap();

        let closed = store.mark_inactive_not_seen_since(Utc::now(), None).await.unwrap();
        assert_eq!(closed, 1);
    }

    #[tokio::test]
    async fn test_mark_inactive_not_seen_since_scoped_to_from_entity_ids() {
        let store = SqliteRelationshipStore::new(SqliteHandle::open_in_memory().unwrap());
        let mut stale_in_scope = sample("a", "b", 1.0);
        stale_in_scope.last_seen_at = Utc::now() - chrono::Duration::days(1);
        store.create(stale_in_scope).await.unwrap();

        let mut stale_out_of_scope = sample("x", "y", 1.0);
        stale_out_of_scope.last_seen_at = Utc::now() - chrono::Duration::days(1);
        store.create(stale_out_of_scope).await.unwrap();

        let closed = store
            .mark_inactive_not_seen_since(Utc::now(), Some(&["a".to_string()]))
            .await
            .unwrap();
        assert_eq!(closed, 1, "only the scoped file's own edge should close");

        let still_active = store
            .query(RelationshipQuery { from_entity_id: Some("x".into()), active: Some(true), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(still_active.len(), 1, "an unrelated file's stale edge must survive a scoped sweep");
    }
}
