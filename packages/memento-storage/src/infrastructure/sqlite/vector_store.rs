//! SQLite-backed [`VectorStore`] (C7): vectors persisted as BLOBs, similarity
//! search done in-memory by cosine distance — the fallback named in §4.7 is this
//! repository's only backend, not a stand-in for a future ANN index.

use super::connection::SqliteHandle;
use crate::error::{Result, StorageError};
use crate::ports::{VectorMatch, VectorRecord, VectorSearchOptions, VectorStore, VectorStoreStats};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

pub struct SqliteVectorStore {
    handle: SqliteHandle,
}

impl SqliteVectorStore {
    pub fn new(handle: SqliteHandle) -> Self {
        Self { handle }
    }
}

fn encode(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn decode(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// True iff every key/value pair in `filter` is present and equal in `metadata`.
fn matches_filter(metadata: &serde_json::Value, filter: &serde_json::Value) -> bool {
    let (Some(filter_obj), Some(metadata_obj)) = (filter.as_object(), metadata.as_object()) else {
        return false;
    };
    filter_obj.iter().all(|(k, v)| metadata_obj.get(k) == Some(v))
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert(&self, record: VectorRecord) -> Result<()> {
        self.handle
            .with_connection(move |conn| {
                let existing_dim: Option<i64> =
                    conn.query_row("SELECT dimension FROM vectors LIMIT 1", [], |r| r.get(0)).optional()?;
                if let Some(dim) = existing_dim {
                    if dim as usize != record.vector.len() {
                        return Err(StorageError::dimension_mismatch(dim as usize, record.vector.len()));
                    }
                }
                let metadata = serde_json::to_string(&record.metadata)?;
                conn.execute(
                    "INSERT INTO vectors (entity_id, vector, dimension, metadata, last_modified)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(entity_id) DO UPDATE SET
                        vector = excluded.vector,
                        dimension = excluded.dimension,
                        metadata = excluded.metadata,
                        last_modified = excluded.last_modified",
                    params![
                        record.entity_id,
                        encode(&record.vector),
                        record.vector.len() as i64,
                        metadata,
                        Utc::now().to_rfc3339(),
                    ],
                )?;
                Ok(())
            })
            .await
    }

    async fn search(&self, query: &[f32], opts: VectorSearchOptions) -> Result<Vec<VectorMatch>> {
        let query = query.to_vec();
        self.handle
            .with_connection(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT entity_id, vector, dimension, last_modified, metadata FROM vectors")?;
                let rows: Vec<(String, Vec<u8>, i64, String, String)> = stmt
                    .query_map([], |r| {
                        Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?))
                    })?
                    .collect::<rusqlite::Result<_>>()?;
                drop(stmt);

                let mut matches = Vec::new();
                for (entity_id, vector_bytes, dim, last_modified, metadata_json) in rows {
                    if dim as usize != query.len() {
                        return Err(StorageError::dimension_mismatch(dim as usize, query.len()));
                    }
                    if let Some(filter) = &opts.filter {
                        let metadata: serde_json::Value = serde_json::from_str(&metadata_json)?;
                        if !matches_filter(&metadata, filter) {
                            continue;
                        }
                    }
                    let vector = decode(&vector_bytes);
                    let score = cosine_similarity(&query, &vector);
                    if opts.min_score.map(|min| score >= min).unwrap_or(true) {
                        matches.push((VectorMatch { entity_id, score }, last_modified));
                    }
                }
                // Ties broken by `lastModified` descending (§4.7).
                matches.sort_by(|a, b| {
                    b.0.score.partial_cmp(&a.0.score).unwrap_or(std::cmp::Ordering::Equal).then_with(|| b.1.cmp(&a.1))
                });
                let limit = if opts.limit == 0 { matches.len() } else { opts.limit };
                let mut matches: Vec<VectorMatch> = matches.into_iter().map(|(m, _)| m).collect();
                matches.truncate(limit);
                Ok(matches)
            })
            .await
    }

    async fn find_similar(&self, entity_id: &str, opts: VectorSearchOptions) -> Result<Vec<VectorMatch>> {
        let entity_id = entity_id.to_string();
        let seed: Option<Vec<u8>> = self
            .handle
            .with_connection({
                let entity_id = entity_id.clone();
                move |conn| {
                    conn.query_row("SELECT vector FROM vectors WHERE entity_id = ?1", params![entity_id], |r| r.get(0))
                        .optional()
                        .map_err(Into::into)
                }
            })
            .await?;
        let Some(seed_bytes) = seed else {
            return Ok(Vec::new());
        };
        let seed_vector = decode(&seed_bytes);
        let mut matches = self.search(&seed_vector, opts).await?;
        matches.retain(|m| m.entity_id != entity_id);
        Ok(matches)
    }

    async fn delete(&self, entity_id: &str) -> Result<()> {
        let entity_id = entity_id.to_string();
        self.handle
            .with_connection(move |conn| {
                conn.execute("DELETE FROM vectors WHERE entity_id = ?1", params![entity_id])?;
                Ok(())
            })
            .await
    }

    async fn stats(&self) -> Result<VectorStoreStats> {
        self.handle
            .with_connection(move |conn| {
                let count: i64 = conn.query_row("SELECT count(*) FROM vectors", [], |r| r.get(0))?;
                let dimension: Option<i64> =
                    conn.query_row("SELECT dimension FROM vectors LIMIT 1", [], |r| r.get(0)).optional()?;
                Ok(VectorStoreStats { count: count as u64, dimension: dimension.unwrap_or(0) as usize })
            })
            .await
    }
}
