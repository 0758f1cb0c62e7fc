//! SQLite-backed [`EntityStore`] (C5).
//!
//! Entities are stored as rows in a single `entities` table: the scalar fields
//! used for indexing (`id`, `kind_label`, `path`, `name`, `hash`, `last_modified`)
//! are real columns, and the full entity (including kind-specific fields) is kept
//! as a JSON blob in `data` — the contract's own "complex values serialized to a
//! string field" clause (§4.5) already licenses folding the whole record this way
//! rather than one table per entity kind.

use super::connection::SqliteHandle;
use crate::domain::{Entity, EntityKind};
use crate::error::Result;
use crate::ports::{
    BulkUpsertMode, BulkUpsertReport, EntityOrderBy, EntityStats, EntityStore, ListEntitiesQuery,
    UpsertOutcome,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension};
use std::collections::BTreeMap;

pub struct SqliteEntityStore {
    handle: SqliteHandle,
}

impl SqliteEntityStore {
    pub fn new(handle: SqliteHandle) -> Self {
        Self { handle }
    }
}

fn entity_name(entity: &Entity) -> Option<String> {
    match &entity.kind {
        EntityKind::Symbol(s) => Some(s.name.clone()),
        EntityKind::Module(m) => Some(m.name.clone()),
        EntityKind::Spec(s) => Some(s.title.clone()),
        EntityKind::Documentation(d) => Some(d.title.clone()),
        _ => None,
    }
}

fn row_to_entity(data: String) -> Result<Entity> {
    Ok(serde_json::from_str(&data)?)
}

#[async_trait]
impl EntityStore for SqliteEntityStore {
    async fn upsert(&self, entity: &Entity) -> Result<UpsertOutcome> {
        let entity = entity.clone();
        self.handle
            .with_connection(move |conn| {
                let existing: Option<i64> = conn
                    .query_row("SELECT 1 FROM entities WHERE id = ?1", params![entity.id], |r| r.get(0))
                    .optional()?;
                let name = entity_name(&entity);
                let data = serde_json::to_string(&entity)?;
                conn.execute(
                    "INSERT INTO entities (id, kind_label, path, name, hash, last_modified, data)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(id) DO UPDATE SET
                        kind_label = excluded.kind_label,
                        path = excluded.path,
                        name = excluded.name,
                        hash = excluded.hash,
                        last_modified = excluded.last_modified,
                        data = excluded.data",
                    params![
                        entity.id,
                        entity.kind_label(),
                        entity.path,
                        name,
                        entity.hash,
                        entity.last_modified.to_rfc3339(),
                        data,
                    ],
                )?;
                Ok(if existing.is_some() { UpsertOutcome::Updated } else { UpsertOutcome::Created })
            })
            .await
    }

    async fn bulk_upsert(&self, entities: &[Entity], mode: BulkUpsertMode) -> Result<BulkUpsertReport> {
        let entities = entities.to_vec();
        self.handle
            .with_connection(move |conn| {
                let mut report = BulkUpsertReport::default();
                let tx = conn.unchecked_transaction()?;
                for entity in &entities {
                    let existing: Option<i64> = tx
                        .query_row("SELECT 1 FROM entities WHERE id = ?1", params![entity.id], |r| r.get(0))
                        .optional()?;
                    if existing.is_some() && matches!(mode, BulkUpsertMode::SkipExisting) {
                        continue;
                    }
                    let name = entity_name(entity);
                    let data = match serde_json::to_string(entity) {
                        Ok(d) => d,
                        Err(_) => {
                            report.failed += 1;
                            continue;
                        }
                    };
                    let result = tx.execute(
                        "INSERT INTO entities (id, kind_label, path, name, hash, last_modified, data)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                         ON CONFLICT(id) DO UPDATE SET
                            kind_label = excluded.kind_label,
                            path = excluded.path,
                            name = excluded.name,
                            hash = excluded.hash,
                            last_modified = excluded.last_modified,
                            data = excluded.data",
                        params![
                            entity.id,
                            entity.kind_label(),
                            entity.path,
                            name,
                            entity.hash,
                            entity.last_modified.to_rfc3339(),
                            data,
                        ],
                    );
                    match result {
                        Ok(_) if existing.is_some() => report.updated += 1,
                        Ok(_) => report.created += 1,
                        Err(_) => report.failed += 1,
                    }
                }
                tx.commit()?;
                Ok(report)
            })
            .await
    }

    async fn get(&self, id: &str) -> Result<Option<Entity>> {
        let id = id.to_string();
        self.handle
            .with_connection(move |conn| {
                let data: Option<String> = conn
                    .query_row("SELECT data FROM entities WHERE id = ?1", params![id], |r| r.get(0))
                    .optional()?;
                data.map(row_to_entity).transpose()
            })
            .await
    }

    async fn list_by_type(&self, kind_label: &str, limit: usize) -> Result<Vec<Entity>> {
        let kind_label = kind_label.to_string();
        self.handle
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT data FROM entities WHERE kind_label = ?1 ORDER BY last_modified DESC LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![kind_label, limit as i64], |r| r.get::<_, String>(0))?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row_to_entity(row?)?);
                }
                Ok(out)
            })
            .await
    }

    async fn list_by_file(&self, path: &str) -> Result<Vec<Entity>> {
        let path = path.to_string();
        self.handle
            .with_connection(move |conn| {
                let mut stmt = conn.prepare("SELECT data FROM entities WHERE path = ?1")?;
                let rows = stmt.query_map(params![path], |r| r.get::<_, String>(0))?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row_to_entity(row?)?);
                }
                Ok(out)
            })
            .await
    }

    async fn list(&self, query: ListEntitiesQuery) -> Result<Vec<Entity>> {
        self.handle
            .with_connection(move |conn| {
                let mut sql = String::from("SELECT data FROM entities WHERE 1=1");
                let mut binds: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
                if let Some(kind) = &query.kind_label {
                    sql.push_str(" AND kind_label = ?");
                    binds.push(Box::new(kind.clone()));
                }
                if let Some(path) = &query.path {
                    sql.push_str(" AND path = ?");
                    binds.push(Box::new(path.clone()));
                }
                if let Some(name) = &query.name_contains {
                    sql.push_str(" AND name LIKE ?");
                    binds.push(Box::new(format!("%{name}%")));
                }
                let order_col = match query.order_by.unwrap_or(EntityOrderBy::Id) {
                    EntityOrderBy::Id => "id",
                    EntityOrderBy::Path => "path",
                    EntityOrderBy::Name => "name",
                    EntityOrderBy::LastModified => "last_modified",
                };
                sql.push_str(&format!(" ORDER BY {order_col}"));
                let limit = if query.limit == 0 { 100 } else { query.limit };
                sql.push_str(" LIMIT ? OFFSET ?");
                binds.push(Box::new(limit as i64));
                binds.push(Box::new(query.offset as i64));

                let mut stmt = conn.prepare(&sql)?;
                let params_ref: Vec<&dyn rusqlite::ToSql> = binds.iter().map(|b| b.as_ref()).collect();
                let rows = stmt.query_map(params_ref.as_slice(), |r| r.get::<_, String>(0))?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row_to_entity(row?)?);
                }
                Ok(out)
            })
            .await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        let now = Utc::now();
        self.handle
            .with_connection(move |conn| {
                let tx = conn.unchecked_transaction()?;
                tx.execute(
                    "UPDATE relationships SET active = 0, data = data WHERE (from_entity_id = ?1 OR to_entity_id = ?1) AND active = 1",
                    params![id],
                )?;
                // Close the validTo of incident relationships inside their JSON payload too.
                let mut stmt = tx.prepare(
                    "SELECT id, data FROM relationships WHERE (from_entity_id = ?1 OR to_entity_id = ?1) AND active = 0",
                )?;
                let updated: Vec<(String, String)> = stmt
                    .query_map(params![id], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
                    .collect::<rusqlite::Result<_>>()?;
                drop(stmt);
                for (rel_id, data) in updated {
                    if let Ok(mut rel) = serde_json::from_str::<crate::domain::Relationship>(&data) {
                        if rel.valid_to.is_none() {
                            rel.active = false;
                            rel.valid_to = Some(now);
                            let updated_json = serde_json::to_string(&rel)?;
                            tx.execute("UPDATE relationships SET data = ?1 WHERE id = ?2", params![updated_json, rel_id])?;
                        }
                    }
                }
                tx.execute("DELETE FROM entities WHERE id = ?1", params![id])?;
                tx.commit()?;
                Ok(())
            })
            .await
    }

    async fn stats(&self) -> Result<EntityStats> {
        self.handle
            .with_connection(move |conn| {
                let total: i64 = conn.query_row("SELECT count(*) FROM entities", [], |r| r.get(0))?;
                let mut by_type = BTreeMap::new();
                let mut stmt = conn.prepare("SELECT kind_label, count(*) FROM entities GROUP BY kind_label")?;
                let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
                for row in rows {
                    let (k, v) = row?;
                    by_type.insert(k, v as u64);
                }
                let cutoff: DateTime<Utc> = Utc::now() - Duration::days(7);
                let recently: i64 = conn.query_row(
                    "SELECT count(*) FROM entities WHERE last_modified >= ?1",
                    params![cutoff.to_rfc3339()],
                    |r| r.get(0),
                )?;
                Ok(EntityStats { total: total as u64, by_type, recently_modified_7d: recently as u64 })
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FileEntity;

    fn file_entity(id: &str, path: &str) -> Entity {
        Entity::new(id, path, "h1", EntityKind::File(FileEntity::new("ts", 10, 1, false, false)))
    }

    #[tokio::test]
    async fn test_upsert_then_get() {
        let store = SqliteEntityStore::new(SqliteHandle::open_in_memory().unwrap());
        let entity = file_entity("file:a.ts", "a.ts");
        let outcome = store.upsert(&entity).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Created);

        let fetched = store.get("file:a.ts").await.unwrap().unwrap();
        assert_eq!(fetched.id, "file:a.ts");
    }

    #[tokio::test]
    async fn test_upsert_twice_is_update() {
        let store = SqliteEntityStore::new(SqliteHandle::open_in_memory().unwrap());
        let entity = file_entity("file:a.ts", "a.ts");
        store.upsert(&entity).await.unwrap();
        let second = store.upsert(&entity).await.unwrap();
        assert_eq!(second, UpsertOutcome::Updated);
    }

    #[tokio::test]
    async fn test_delete_then_get_returns_none() {
        let store = SqliteEntityStore::new(SqliteHandle::open_in_memory().unwrap());
        let entity = file_entity("file:a.ts", "a.ts");
        store.upsert(&entity).await.unwrap();
        store.delete("file:a.ts").await.unwrap();
        assert!(store.get("file:a.ts").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_by_file() {
        let store = SqliteEntityStore::new(SqliteHandle::open_in_memory().unwrap());
        store.upsert(&file_entity("file:a.ts", "a.ts")).await.unwrap();
        store.upsert(&file_entity("file:b.ts", "b.ts")).await.unwrap();
        let results = store.list_by_file("a.ts").await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "file:a.ts");
    }

    #[tokio::test]
    async fn test_stats_counts_by_kind() {
        let store = SqliteEntityStore::new(SqliteHandle::open_in_memory().unwrap());
        store.upsert(&file_entity("file:a.ts", "a.ts")).await.unwrap();
        store.upsert(&file_entity("file:b.ts", "b.ts")).await.unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_type.get("File"), Some(&2));
    }

    #[tokio::test]
    async fn test_bulk_upsert_skip_existing() {
        let store = SqliteEntityStore::new(SqliteHandle::open_in_memory().unwrap());
        store.upsert(&file_entity("file:a.ts", "a.ts")).await.unwrap();
        let report = store
            .bulk_upsert(
                &[file_entity("file:a.ts", "a.ts"), file_entity("file:b.ts", "b.ts")],
                BulkUpsertMode::SkipExisting,
            )
            .await
            .unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.updated, 0);
    }
}
