//! Sync Coordinator (C9, §4.9): the only component authorized to mutate the
//! graph. Accepts a stream of file changes, debounces and orders them per
//! path, runs each through the parse → resolve → write → embed pipeline inside
//! a logical transaction, retires stale edges at the end of every pass, and
//! publishes the resulting events to the [`EventBus`] only after commit.
//!
//! Grounded on the worker-dispatch/timeout/checkpoint-on-success shape of a
//! whole-repo DAG orchestrator, retargeted here to a linear per-change
//! pipeline over a bounded worker pool.

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::event_bus::{EventBus, SyncStatusKind};
use crate::job::{ChangeJob, FileChange, FileChangeType, JobStateMachine, MAX_RETRY_ATTEMPTS};
use dashmap::DashMap;
use memento_ir::{AstParser, CacheManager, IncrementalParser, NullTypeResolver, RelationshipBuilder, RelationshipBuilderConfig, TypeResolver};
use memento_storage::domain::{Entity, EntityKind, Relationship, RelationshipType};
use memento_storage::infrastructure::SqliteStore;
use memento_storage::ports::{BulkCreateOptions, BulkUpsertMode, EntityStore, HistoryManager, RelationshipStore, VectorRecord, VectorStore};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex as AsyncMutex, Notify, Semaphore};
use tracing::{info, warn};

/// Reads file content for a path under coordination. A trait so tests can
/// inject fixtures instead of touching the filesystem.
#[async_trait::async_trait]
pub trait SourceProvider: Send + Sync {
    async fn read(&self, path: &Path) -> std::io::Result<String>;
}

pub struct FsSourceProvider;

#[async_trait::async_trait]
impl SourceProvider for FsSourceProvider {
    async fn read(&self, path: &Path) -> std::io::Result<String> {
        tokio::fs::read_to_string(path).await
    }
}

/// Computes an embedding vector for a newly written entity. No embedding model
/// is in scope (§4.7's fallback vector store has nothing to call); the default
/// never embeds, leaving `metadata.needsEmbed=true` for a future pass.
pub trait Embedder: Send + Sync {
    fn embed(&self, entity: &Entity) -> Option<Vec<f32>>;
}

pub struct NullEmbedder;

impl Embedder for NullEmbedder {
    fn embed(&self, _entity: &Entity) -> Option<Vec<f32>> {
        None
    }
}

struct DebounceState {
    latest: FileChange,
    generation: u64,
}

/// One durable record of a committed pass, kept so `rollback_since` can unwind
/// changes in reverse timestamp order (§4.9).
#[derive(Debug, Clone)]
struct CommitLogEntry {
    at: DateTime<Utc>,
    entity_ids: Vec<String>,
    relationship_touches: Vec<(String, Option<String>, RelationshipType)>,
}

#[derive(Debug, Clone, Default)]
pub struct PassReport {
    pub entities_written: usize,
    pub relationships_written: usize,
    pub stale_edges_closed: u64,
}

/// A buffered event, collected during a pass and published only after that
/// pass's writes have all committed (§4.9 step 8: "emit the set of events
/// collected during the transaction to the Event Bus only after commit").
enum PendingEvent {
    EntityCreated(Entity),
    EntityUpdated(Entity),
    EntityDeleted(String),
    RelationshipCreated(Relationship),
    FileChange(String, &'static str),
}

/// `delete overrides modify` within one debounce window; otherwise last write
/// wins (§4.9 step 1).
fn coalesce(existing: &FileChange, incoming: FileChange) -> FileChange {
    if existing.change_type == FileChangeType::Delete && incoming.change_type == FileChangeType::Modify {
        existing.clone()
    } else {
        incoming
    }
}

pub struct SyncCoordinator {
    store: Arc<SqliteStore>,
    events: Arc<EventBus>,
    config: SyncConfig,
    ast_parser: AstParser,
    cache: CacheManager,
    type_resolver: Arc<dyn TypeResolver>,
    source: Arc<dyn SourceProvider>,
    embedder: Arc<dyn Embedder>,
    debounce_state: DashMap<PathBuf, Arc<AsyncMutex<DebounceState>>>,
    path_locks: DashMap<PathBuf, Arc<AsyncMutex<()>>>,
    worker_semaphore: Arc<Semaphore>,
    paused: Arc<AtomicBool>,
    resume_notify: Arc<Notify>,
    pending: Arc<AtomicU64>,
    commit_log: AsyncMutex<Vec<CommitLogEntry>>,
    /// Lets `&self` methods obtain a `'static` `Arc<Self>` to move into spawned
    /// tasks, without requiring an unstable `self: &Arc<Self>` receiver.
    self_weak: Weak<SyncCoordinator>,
}

impl SyncCoordinator {
    pub fn new(store: Arc<SqliteStore>, events: Arc<EventBus>, config: SyncConfig) -> Arc<Self> {
        let workers = config.workers.max(1);
        Arc::new_cyclic(|weak| Self {
            store,
            events,
            ast_parser: AstParser::new(memento_ir::ParserConfig { materialize_directories: config.materialize_directories }),
            cache: CacheManager::new(),
            type_resolver: Arc::new(NullTypeResolver),
            source: Arc::new(FsSourceProvider),
            embedder: Arc::new(NullEmbedder),
            debounce_state: DashMap::new(),
            path_locks: DashMap::new(),
            worker_semaphore: Arc::new(Semaphore::new(workers)),
            paused: Arc::new(AtomicBool::new(false)),
            resume_notify: Arc::new(Notify::new()),
            pending: Arc::new(AtomicU64::new(0)),
            commit_log: AsyncMutex::new(Vec::new()),
            self_weak: weak.clone(),
            config,
        })
    }

    fn self_arc(&self) -> Arc<SyncCoordinator> {
        self.self_weak.upgrade().expect("coordinator dropped while a task referencing it was still running")
    }

    pub fn with_source(mut self: Arc<Self>, source: Arc<dyn SourceProvider>) -> Arc<Self> {
        Arc::get_mut(&mut self).expect("coordinator not yet shared").source = source;
        self
    }

    pub fn with_embedder(mut self: Arc<Self>, embedder: Arc<dyn Embedder>) -> Arc<Self> {
        Arc::get_mut(&mut self).expect("coordinator not yet shared").embedder = embedder;
        self
    }

    pub fn with_type_resolver(mut self: Arc<Self>, resolver: Arc<dyn TypeResolver>) -> Arc<Self> {
        Arc::get_mut(&mut self).expect("coordinator not yet shared").type_resolver = resolver;
        self
    }

    /// Step 1: enqueue into a per-path FIFO, coalescing within the configured
    /// debounce window.
    pub fn enqueue(&self, change: FileChange) {
        let path = change.path.clone();
        let slot = self
            .debounce_state
            .entry(path.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(DebounceState { latest: change.clone(), generation: 0 })))
            .clone();

        self.pending.fetch_add(1, Ordering::Relaxed);
        self.events.publish_sync_status(SyncStatusKind::Syncing, self.pending.load(Ordering::Relaxed) as usize);

        let this = self.self_arc();
        tokio::spawn(async move {
            let my_generation = {
                let mut guard = slot.lock().await;
                guard.latest = coalesce(&guard.latest, change);
                guard.generation += 1;
                guard.generation
            };

            tokio::time::sleep(std::time::Duration::from_millis(this.config.debounce_ms)).await;

            let dispatched = {
                let guard = slot.lock().await;
                if guard.generation == my_generation {
                    Some(guard.latest.clone())
                } else {
                    None
                }
            };

            if let Some(change) = dispatched {
                this.debounce_state.remove(&path);
                this.dispatch(change).await;
            }
        });
    }

    /// Step 2: dispatch to the bounded worker pool; same-path events are
    /// serialized via `path_locks`, different paths run concurrently.
    async fn dispatch(&self, change: FileChange) {
        let path = change.path.clone();
        let lock = self.path_locks.entry(path).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone();

        let permit = self.worker_semaphore.clone().acquire_owned().await.expect("semaphore never closed");
        let _path_guard = lock.lock().await;

        while self.paused.load(Ordering::Acquire) {
            self.resume_notify.notified().await;
        }

        self.run_with_retry(ChangeJob::new_queued(change)).await;
        drop(permit);

        let remaining = self.pending.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        let status = if remaining == 0 { SyncStatusKind::Idle } else { SyncStatusKind::Syncing };
        self.events.publish_sync_status(status, remaining as usize);
    }

    async fn run_with_retry(&self, job: ChangeJob) {
        let mut sm = JobStateMachine::new(job);
        let mut retry_count = 0u32;

        loop {
            sm.start(format!("worker-{}", uuid::Uuid::new_v4())).ok();
            let change = sm.job().change.clone();

            match self.process_change(&change).await {
                Ok(report) => {
                    sm.complete(report.entities_written, report.relationships_written).ok();
                    return;
                }
                Err(err) => {
                    warn!(path = %change.path.display(), kind = %err.kind(), "change processing failed: {}", err.message);
                    let _ = sm.fail(&err, retry_count);
                    if err.is_retryable() && retry_count < MAX_RETRY_ATTEMPTS {
                        if let crate::job::JobState::Failed { next_retry_at: Some(at), .. } = &sm.job().state {
                            let delay = (*at - Utc::now()).to_std().unwrap_or_default();
                            tokio::time::sleep(delay).await;
                        }
                        retry_count += 1;
                        let _ = sm.retry();
                        continue;
                    }
                    return;
                }
            }
        }
    }

    /// Steps 3-8 for a single change, executed under that path's lock.
    async fn process_change(&self, change: &FileChange) -> Result<PassReport, SyncError> {
        let pass_start = Utc::now();
        let mut report = PassReport::default();
        let mut touched_entities = Vec::new();
        let mut touched_relationships = Vec::new();
        let mut events = Vec::new();
        let mut reparsed_entity_ids: Vec<String> = Vec::new();

        match change.change_type {
            FileChangeType::Add | FileChangeType::Modify => {
                self.process_add_or_modify(change, &mut report, &mut touched_entities, &mut touched_relationships, &mut events).await?;
                reparsed_entity_ids = touched_entities.clone();
            }
            FileChangeType::Delete => {
                self.process_delete(&change.path, &mut touched_entities, &mut events).await?;
            }
            FileChangeType::Rename => {
                if let Some(previous) = &change.previous_path {
                    self.process_delete(previous, &mut touched_entities, &mut events).await?;
                }
                let mut new_entities = Vec::new();
                self.process_add_or_modify(change, &mut report, &mut new_entities, &mut touched_relationships, &mut events).await?;
                reparsed_entity_ids = new_entities.clone();
                touched_entities.extend(new_entities);
            }
        }

        // Step 7: retire stale edges at the end of this pass, scoped to the file
        // that was actually reparsed. An unscoped call here would close every
        // other file's active edges too, since the builder only re-stamps
        // `lastSeenAt` on the edges it just emitted (§4.9 step 7, §9) — a true
        // whole-store sweep belongs to a full reindex's completion, not a
        // single-file pass.
        if !reparsed_entity_ids.is_empty() {
            let closed = self
                .store
                .relationships
                .mark_inactive_not_seen_since(pass_start, Some(&reparsed_entity_ids))
                .await?;
            report.stale_edges_closed = closed;
        }

        let mut log = self.commit_log.lock().await;
        log.push(CommitLogEntry { at: pass_start, entity_ids: touched_entities, relationship_touches: touched_relationships });
        drop(log);

        // Step 8: only publish once every write above has committed.
        self.flush_events(events);

        Ok(report)
    }

    fn flush_events(&self, events: Vec<PendingEvent>) {
        for event in events {
            match event {
                PendingEvent::EntityCreated(entity) => self.events.publish_entity_created(entity),
                PendingEvent::EntityUpdated(entity) => self.events.publish_entity_updated(entity),
                PendingEvent::EntityDeleted(id) => self.events.publish_entity_deleted(id),
                PendingEvent::RelationshipCreated(relationship) => self.events.publish_relationship_created(relationship),
                PendingEvent::FileChange(path, kind) => self.events.publish_file_change(path, kind),
            }
        }
    }

    async fn process_add_or_modify(
        &self,
        change: &FileChange,
        report: &mut PassReport,
        touched_entities: &mut Vec<String>,
        touched_relationships: &mut Vec<(String, Option<String>, RelationshipType)>,
        events: &mut Vec<PendingEvent>,
    ) -> Result<(), SyncError> {
        let rel_path = change.path.to_string_lossy().to_string();
        let source = self.source.read(&change.path).await?;

        let parser = IncrementalParser::new(&self.ast_parser, &self.cache);
        let parsed = match parser.parse_incremental(&rel_path, &source) {
            Ok(p) => p,
            Err(e) => {
                // Parse errors are not fatal: keep the file's prior successful
                // entities and record the failure instead of aborting the pass.
                self.record_parse_error(&rel_path, &e).await?;
                return Ok(());
            }
        };

        let mut parsed = parsed;
        if let Some(previous) = &change.previous_path {
            let previous = previous.to_string_lossy().to_string();
            parsed.entities = parsed
                .entities
                .into_iter()
                .map(|entity| {
                    if matches!(entity.kind, EntityKind::File(_)) {
                        entity.with_renamed_from(previous.clone())
                    } else {
                        entity
                    }
                })
                .collect();
        }

        let local_symbols = local_symbol_table(&parsed.entities);
        let builder = RelationshipBuilder::new(
            &self.cache,
            self.type_resolver.as_ref(),
            RelationshipBuilderConfig { re_export_max_depth: self.config.re_export_max_depth, type_checker_budget_per_file: self.config.type_checker_budget_per_file },
        );
        let relationships = builder.build(&rel_path, &local_symbols, &parsed.result.imports, &parsed.result.candidates);

        self.store.entities.bulk_upsert(&parsed.entities, BulkUpsertMode::UpdateExisting).await?;

        let mut pending_vectors = Vec::new();
        for entity in &parsed.entities {
            touched_entities.push(entity.id.clone());
            report.entities_written += 1;
            if parsed.added.contains(&entity.id) || parsed.updated.contains(&entity.id) {
                self.store.history.record_version(&entity.id, &entity.hash, entity.metadata.clone()).await?;
            }
            if parsed.added.contains(&entity.id) {
                events.push(PendingEvent::EntityCreated(entity.clone()));
            } else if parsed.updated.contains(&entity.id) {
                events.push(PendingEvent::EntityUpdated(entity.clone()));
            }

            if let Some(vector) = self.embedder.embed(entity) {
                pending_vectors.push(VectorRecord { entity_id: entity.id.clone(), vector, metadata: serde_json::json!({}) });
            }
        }
        self.flush_vectors(pending_vectors).await?;

        for removed_id in &parsed.removed {
            self.store.entities.delete(removed_id).await?;
            events.push(PendingEvent::EntityDeleted(removed_id.clone()));
        }

        if !relationships.is_empty() {
            self.store.relationships.bulk_create(relationships.clone(), BulkCreateOptions::default()).await?;
        }
        for relationship in relationships {
            touched_relationships.push((relationship.from_entity_id.clone(), relationship.to_entity_id.clone(), relationship.r#type));
            report.relationships_written += 1;
            events.push(PendingEvent::RelationshipCreated(relationship));
        }

        events.push(PendingEvent::FileChange(rel_path, if change.change_type == FileChangeType::Add { "add" } else { "modify" }));
        Ok(())
    }

    /// Writes embedded vectors in `embedBatchSize`-sized chunks, upserting each
    /// chunk's records concurrently (§4.9 step 6: "batched/deferred per
    /// config").
    async fn flush_vectors(&self, records: Vec<VectorRecord>) -> Result<(), SyncError> {
        let batch_size = self.config.embed_batch_size.max(1);
        for chunk in records.chunks(batch_size) {
            let writes = chunk.iter().cloned().map(|record| self.store.vectors.upsert(record));
            futures::future::try_join_all(writes).await?;
        }
        Ok(())
    }

    async fn process_delete(&self, path: &Path, touched_entities: &mut Vec<String>, events: &mut Vec<PendingEvent>) -> Result<(), SyncError> {
        let rel_path = path.to_string_lossy().to_string();
        let entities = self.store.entities.list_by_file(&rel_path).await?;
        for entity in entities {
            self.store.entities.delete(&entity.id).await?;
            touched_entities.push(entity.id.clone());
            events.push(PendingEvent::EntityDeleted(entity.id.clone()));
        }
        self.cache.remove_file(&rel_path);
        events.push(PendingEvent::FileChange(rel_path, "delete"));
        Ok(())
    }

    async fn record_parse_error(&self, rel_path: &str, error: &memento_ir::Error) -> Result<(), SyncError> {
        if let Some(mut entity) = self.store.entities.list_by_file(rel_path).await?.into_iter().find(|e| matches!(e.kind, EntityKind::File(_))) {
            let mut errors = entity.metadata.get("parseErrors").and_then(|v| v.as_array().cloned()).unwrap_or_default();
            errors.push(serde_json::json!({ "message": error.to_string(), "at": Utc::now() }));
            entity.metadata["parseErrors"] = serde_json::Value::Array(errors);
            self.store.entities.upsert(&entity).await?;
        }
        Ok(())
    }

    /// Walks `root` in parallel (rayon), skipping `ignoreGlobs` matches, and enqueues
    /// every file as an `Add` change. Each enqueued file drains through the same
    /// debounce/dispatch pipeline as a live change, and its own pass only retires
    /// *that file's* stale edges (see `process_change`'s file-scoped call) — a file
    /// deleted from disk between reindexes never gets re-enqueued, so its edges
    /// need the whole-store sweep below. Callers should await drain (e.g. poll
    /// `pending_count() == 0`) and then call `retire_unseen_since_full_reindex`
    /// with the timestamp captured before this call, per §4.9 step 7 ("at the end
    /// of a full reindex, not per-file").
    pub fn full_reindex(&self, root: &Path) -> Result<usize, SyncError> {
        use rayon::prelude::*;

        let ignore_globs = self.config.ignore_globs.clone();
        let files = walk_files(root)?;
        let matched: Vec<PathBuf> = files.into_par_iter().filter(|path| !is_ignored(path, &ignore_globs)).collect();

        for path in &matched {
            self.enqueue(FileChange::new(FileChangeType::Add, path.clone()));
        }
        Ok(matched.len())
    }

    /// The whole-store half of step 7: closes every active relationship not seen
    /// since `since`, irrespective of which file's pass last touched it. Call this
    /// only once a full reindex (`full_reindex` plus drain) has completed — never
    /// after a single incremental change, where it would retroactively close every
    /// other file's edges (§4.9 step 7, §9).
    pub async fn retire_unseen_since_full_reindex(&self, since: DateTime<Utc>) -> Result<u64, SyncError> {
        Ok(self.store.relationships.mark_inactive_not_seen_since(since, None).await?)
    }

    /// `pause()`: in-flight tasks finish, no new ones are started until
    /// `resume()` (§4.9).
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
        info!("sync coordinator paused");
        self.events.publish_sync_status(SyncStatusKind::Paused, self.pending.load(Ordering::Relaxed) as usize);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
        self.resume_notify.notify_waiters();
        info!("sync coordinator resumed");
    }

    /// Replays the commit log in reverse timestamp order, restoring each
    /// touched entity from its most recent `Version` at or before `timestamp`
    /// and reopening relationships that were closed after it (§4.9).
    pub async fn rollback_since(&self, timestamp: DateTime<Utc>) -> Result<(), SyncError> {
        let entries: Vec<CommitLogEntry> = {
            let mut log = self.commit_log.lock().await;
            let (keep, rollback): (Vec<_>, Vec<_>) = log.drain(..).partition(|e| e.at <= timestamp);
            *log = keep;
            let mut rollback = rollback;
            rollback.sort_by(|a, b| b.at.cmp(&a.at));
            rollback
        };

        for entry in entries {
            for entity_id in &entry.entity_ids {
                let timeline = self
                    .store
                    .history
                    .timeline_of_entity(entity_id, memento_storage::ports::TimelineOptions { until: Some(timestamp), ..Default::default() })
                    .await?;
                if let Some(snapshot) = timeline.into_iter().max_by_key(|e| e.version.timestamp) {
                    if let Some(mut entity) = self.store.entities.get(entity_id).await? {
                        entity.hash = snapshot.version.hash;
                        entity.metadata = snapshot.version.metadata;
                        self.store.entities.upsert(&entity).await?;
                    }
                }
            }

            for (from_id, to_id, rel_type) in &entry.relationship_touches {
                let matches = self
                    .store
                    .relationships
                    .query(memento_storage::ports::RelationshipQuery {
                        from_entity_id: Some(from_id.clone()),
                        to_entity_id: to_id.clone(),
                        r#type: Some(*rel_type),
                        active: Some(false),
                        limit: 1,
                        offset: 0,
                        ..Default::default()
                    })
                    .await?;
                for mut relationship in matches {
                    relationship.active = true;
                    relationship.valid_to = None;
                    self.store.relationships.create(relationship).await?;
                }
            }
        }

        Ok(())
    }

    pub fn pending_count(&self) -> u64 {
        self.pending.load(Ordering::Relaxed)
    }

    pub fn shutdown(&self, reason: impl Into<String>) {
        self.events.publish_shutdown(reason);
    }
}

fn walk_files(root: &Path) -> Result<Vec<PathBuf>, SyncError> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let entries = std::fs::read_dir(&dir).map_err(SyncError::from)?;
        for entry in entries {
            let entry = entry.map_err(SyncError::from)?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

/// A deliberately small glob matcher: handles the `**/name/**`-shaped patterns
/// `ignoreGlobs` defaults to, by substring-matching the literal segment
/// between wildcards rather than pulling in a full glob engine.
fn is_ignored(path: &Path, globs: &[String]) -> bool {
    let path_str = path.to_string_lossy();
    globs.iter().any(|glob| {
        let literal = glob.trim_start_matches("**/").trim_end_matches("/**").trim_end_matches("/*");
        !literal.is_empty() && path_str.contains(literal.as_ref())
    })
}

fn local_symbol_table(entities: &[Entity]) -> HashMap<String, String> {
    entities
        .iter()
        .filter_map(|e| match &e.kind {
            EntityKind::Symbol(symbol) => Some((symbol.name.clone(), e.id.clone())),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coalesce_delete_overrides_modify() {
        let path = PathBuf::from("a.ts");
        let delete = FileChange::new(FileChangeType::Delete, path.clone());
        let modify = FileChange::new(FileChangeType::Modify, path);
        let result = coalesce(&delete, modify);
        assert_eq!(result.change_type, FileChangeType::Delete);
    }

    #[test]
    fn test_coalesce_last_wins_otherwise() {
        let path = PathBuf::from("a.ts");
        let add = FileChange::new(FileChangeType::Add, path.clone());
        let modify = FileChange::new(FileChangeType::Modify, path);
        let result = coalesce(&add, modify.clone());
        assert_eq!(result.change_type, modify.change_type);
    }

    struct FixtureSource(HashMap<PathBuf, String>);

    #[async_trait::async_trait]
    impl SourceProvider for FixtureSource {
        async fn read(&self, path: &Path) -> std::io::Result<String> {
            self.0
                .get(path)
                .cloned()
                .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "fixture missing"))
        }
    }

    async fn fixture_coordinator(source: HashMap<PathBuf, String>) -> Arc<SyncCoordinator> {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let events = Arc::new(EventBus::new());
        let config = SyncConfig { workers: 2, debounce_ms: 10, ..SyncConfig::default() };
        SyncCoordinator::new(store, events, config).with_source(Arc::new(FixtureSource(source)))
    }

    #[tokio::test]
    async fn test_process_add_writes_entities_and_emits_event() {
        let path = PathBuf::from("a.ts");
        let coordinator = fixture_coordinator(HashMap::from([(path.clone(), "export function foo() {}".to_string())])).await;
        let mut rx = coordinator.events.subscribe_entity_created();

        let change = FileChange::new(FileChangeType::Add, path);
        let report = coordinator.process_change(&change).await.unwrap();

        assert!(report.entities_written > 0);
        let event = rx.recv().await.unwrap();
        assert!(event.entity.id.len() > 0);
    }

    #[tokio::test]
    async fn test_process_delete_with_no_entities_is_a_noop() {
        let coordinator = fixture_coordinator(HashMap::new()).await;
        let change = FileChange::new(FileChangeType::Delete, PathBuf::from("missing.ts"));
        let report = coordinator.process_change(&change).await.unwrap();
        assert_eq!(report.entities_written, 0);
    }

    #[tokio::test]
    async fn test_pause_blocks_dispatch_until_resume() {
        let path = PathBuf::from("a.ts");
        let coordinator = fixture_coordinator(HashMap::from([(path.clone(), "export function foo() {}".to_string())])).await;
        coordinator.pause();

        let dispatched = coordinator.clone();
        let change = FileChange::new(FileChangeType::Add, path);
        let handle = tokio::spawn(async move { dispatched.dispatch(change).await });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        coordinator.resume();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_enqueue_coalesces_within_debounce_window() {
        let path = PathBuf::from("a.ts");
        let coordinator = fixture_coordinator(HashMap::from([(path.clone(), "export function foo() {}".to_string())])).await;

        coordinator.enqueue(FileChange::new(FileChangeType::Add, path.clone()));
        coordinator.enqueue(FileChange::new(FileChangeType::Modify, path));

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        let log = coordinator.commit_log.lock().await;
        assert_eq!(log.len(), 1);
    }

    /// Regression test for the stale-edge-retirement hazard §9 warns about: an
    /// edge emitted by one file's earlier pass must survive another file's
    /// incremental pass, even though that edge's `lastSeenAt` predates the new
    /// pass's `passStart`.
    #[tokio::test]
    async fn test_incremental_pass_does_not_retire_unrelated_files_edges() {
        let coordinator =
            fixture_coordinator(HashMap::from([(PathBuf::from("a.ts"), "export function foo() {}".to_string())])).await;

        let long_ago = Utc::now() - chrono::Duration::days(1);
        let stale_elsewhere = Relationship {
            id: memento_storage::domain::canonical_id("sym:other.ts#caller", RelationshipType::Calls, "sym:elsewhere#thing"),
            from_entity_id: "sym:other.ts#caller".to_string(),
            to_entity_id: Some("sym:elsewhere#thing".to_string()),
            to_ref: None,
            r#type: RelationshipType::Calls,
            created: long_ago,
            last_modified: long_ago,
            version: 1,
            valid_from: long_ago,
            valid_to: None,
            active: true,
            confidence: Some(1.0),
            evidence: vec![],
            locations: vec![],
            metadata: serde_json::Value::Null,
            occurrences: 1,
            last_seen_at: long_ago,
        };
        coordinator.store.relationships.create(stale_elsewhere).await.unwrap();

        let change = FileChange::new(FileChangeType::Add, PathBuf::from("a.ts"));
        coordinator.process_change(&change).await.unwrap();

        let still_active = coordinator
            .store
            .relationships
            .query(memento_storage::ports::RelationshipQuery {
                from_entity_id: Some("sym:other.ts#caller".to_string()),
                active: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(still_active.len(), 1, "an unrelated file's pass must not retroactively close another file's edges");
    }

    /// §4.9 step 8: events are collected during the pass and published only
    /// after it commits — a failed pass (unreadable source) must emit none.
    #[tokio::test]
    async fn test_failed_pass_emits_no_events() {
        let coordinator = fixture_coordinator(HashMap::new()).await;
        let mut rx = coordinator.events.subscribe_file_change();

        let change = FileChange::new(FileChangeType::Add, PathBuf::from("missing.ts"));
        assert!(coordinator.process_change(&change).await.is_err());

        let outcome = tokio::time::timeout(std::time::Duration::from_millis(50), rx.recv()).await;
        assert!(outcome.is_err(), "a failed pass must not have published any file-change event");
    }
}
