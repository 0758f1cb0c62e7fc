//! Cache Manager (C2): per-file parse cache plus the cross-file indices the
//! Relationship Builder (C4) resolves against.
//!
//! Every map here is a [`DashMap`] rather than one `Mutex<HashMap<...>>` (§4.2,
//! §5's shared-resource policy): a write touching one file's entry or one file's
//! symbols must never contend with a read of an unrelated file's.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use memento_storage::domain::{Entity, Relationship};
use std::collections::HashMap;

/// Where an exported name resolves to, for re-export chain walking (§4.2).
#[derive(Debug, Clone, PartialEq)]
pub struct ExportTarget {
    pub file_rel: String,
    pub local_name: String,
    pub depth: u32,
}

/// One file's cached parse result.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub hash: String,
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
    pub last_modified: DateTime<Utc>,
    /// Fully-qualified name → symbol id, for C3's signature diffing without re-walking the tree.
    pub symbol_map: HashMap<String, String>,
}

pub struct CacheManager {
    files: DashMap<String, CacheEntry>,
    /// `"{fileRelPath}:{name}" -> symbol id`.
    global_symbol_index: DashMap<String, String>,
    /// unqualified name -> ordered symbol ids (insertion order: earliest-registered first).
    name_index: DashMap<String, Vec<String>>,
    /// per-module-file export map: exported name -> resolution target.
    export_map: DashMap<String, DashMap<String, ExportTarget>>,
}

impl CacheManager {
    pub fn new() -> Self {
        Self {
            files: DashMap::new(),
            global_symbol_index: DashMap::new(),
            name_index: DashMap::new(),
            export_map: DashMap::new(),
        }
    }

    pub fn get(&self, rel_path: &str) -> Option<CacheEntry> {
        self.files.get(rel_path).map(|e| e.clone())
    }

    pub fn hash_of(&self, rel_path: &str) -> Option<String> {
        self.files.get(rel_path).map(|e| e.hash.clone())
    }

    /// Replace `rel_path`'s cache entry and reindex its symbols. Always removes the
    /// prior entry's index contributions first (§4.2: "`removeFileFromIndexes` must
    /// run before reinsertion to keep index entries consistent").
    pub fn insert(&self, rel_path: &str, entities: Vec<Entity>, relationships: Vec<Relationship>, hash: String) {
        self.remove_file_from_indexes(rel_path);

        let mut symbol_map = HashMap::new();
        for entity in &entities {
            if let memento_storage::domain::EntityKind::Symbol(symbol) = &entity.kind {
                symbol_map.insert(symbol.name.clone(), entity.id.clone());

                let global_key = format!("{rel_path}:{}", symbol.name);
                self.global_symbol_index.insert(global_key, entity.id.clone());

                self.name_index.entry(symbol.name.clone()).or_default().push(entity.id.clone());

                if symbol.is_exported {
                    self.export_map.entry(rel_path.to_string()).or_default().insert(
                        symbol.name.clone(),
                        ExportTarget { file_rel: rel_path.to_string(), local_name: symbol.name.clone(), depth: 0 },
                    );
                }
            }
        }

        self.files.insert(
            rel_path.to_string(),
            CacheEntry { hash, entities, relationships, last_modified: Utc::now(), symbol_map },
        );
    }

    /// Remove `rel_path`'s contribution from every cross-file index without touching
    /// other files' entries (§4.2).
    pub fn remove_file_from_indexes(&self, rel_path: &str) {
        let Some(entry) = self.files.get(rel_path) else { return };
        for entity in &entry.entities {
            if let memento_storage::domain::EntityKind::Symbol(symbol) = &entity.kind {
                let global_key = format!("{rel_path}:{}", symbol.name);
                self.global_symbol_index.remove(&global_key);

                if let Some(mut ids) = self.name_index.get_mut(&symbol.name) {
                    ids.retain(|id| id != &entity.id);
                }
            }
        }
        self.export_map.remove(rel_path);
    }

    pub fn remove_file(&self, rel_path: &str) {
        self.remove_file_from_indexes(rel_path);
        self.files.remove(rel_path);
    }

    pub fn lookup_global_symbol(&self, file_rel: &str, name: &str) -> Option<String> {
        self.global_symbol_index.get(&format!("{file_rel}:{name}")).map(|e| e.clone())
    }

    /// All symbol ids registered under `name`, in insertion order.
    pub fn lookup_by_name(&self, name: &str) -> Vec<String> {
        self.name_index.get(name).map(|ids| ids.clone()).unwrap_or_default()
    }

    /// Walk the export map from `file_rel` looking for `exported_name`, following
    /// re-export chains up to `max_depth` hops (§4.2's "depth-limited resolution
    /// prevents infinite walks").
    pub fn resolve_export(&self, file_rel: &str, exported_name: &str, max_depth: u32) -> Option<ExportTarget> {
        let mut current_file = file_rel.to_string();
        let mut current_name = exported_name.to_string();
        for depth in 0..=max_depth {
            let map = self.export_map.get(&current_file)?;
            let target = map.get(&current_name)?.clone();
            if target.file_rel == current_file {
                return Some(ExportTarget { depth, ..target });
            }
            current_file = target.file_rel.clone();
            current_name = target.local_name.clone();
        }
        None
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new()
    }
}
