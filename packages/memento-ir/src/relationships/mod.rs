//! Relationship Builder (C4): resolves each file's [`ReferenceCandidate`]s to a
//! target entity id using, in order, the local symbol table, the import map, the
//! export map (re-export chains), a budgeted type checker, and a name-index
//! heuristic — falling back to an unresolved reference when nothing matches (§4.4).

use crate::cache::CacheManager;
use crate::parser::{ImportRecord, ReferenceCandidate, ReferenceKind};
use memento_storage::domain::{
    bound_evidence, canonical_id, combine_confidence, Evidence, EvidenceSource, Relationship,
    RelationshipType, UnresolvedRef,
};
use std::sync::atomic::{AtomicU32, Ordering};

/// Budget-gated type-checker port (§4.4 step 4). No real type checker is in scope;
/// this crate ships the budget-gated call site and a deterministic stub for tests.
pub trait TypeResolver: Send + Sync {
    /// Resolve `name`, referenced from `from_file`, to a target entity id.
    fn resolve(&self, from_file: &str, name: &str) -> Option<String>;
}

/// A `TypeResolver` that never resolves anything — the default when no real
/// resolver is injected, so the budget-gated call site still runs (and costs
/// budget) without fabricating results.
pub struct NullTypeResolver;

impl TypeResolver for NullTypeResolver {
    fn resolve(&self, _from_file: &str, _name: &str) -> Option<String> {
        None
    }
}

/// A deterministic stub used in tests: resolves any name present in its fixed map.
pub struct StubTypeResolver {
    entries: std::collections::HashMap<String, String>,
}

impl StubTypeResolver {
    pub fn new(entries: std::collections::HashMap<String, String>) -> Self {
        Self { entries }
    }
}

impl TypeResolver for StubTypeResolver {
    fn resolve(&self, _from_file: &str, name: &str) -> Option<String> {
        self.entries.get(name).cloned()
    }
}

/// Tracks the shared per-pipeline-pass type-checker call budget (default 200/file, §4.4).
pub struct TypeCheckerBudget {
    remaining: AtomicU32,
}

impl TypeCheckerBudget {
    pub fn new(limit: u32) -> Self {
        Self { remaining: AtomicU32::new(limit) }
    }

    /// Attempt to spend one call; returns whether budget remained.
    fn try_spend(&self) -> bool {
        loop {
            let current = self.remaining.load(Ordering::Relaxed);
            if current == 0 {
                return false;
            }
            if self
                .remaining
                .compare_exchange(current, current - 1, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct RelationshipBuilderConfig {
    pub re_export_max_depth: u32,
    pub type_checker_budget_per_file: u32,
}

impl Default for RelationshipBuilderConfig {
    fn default() -> Self {
        Self { re_export_max_depth: 5, type_checker_budget_per_file: 200 }
    }
}

const CANDIDATE_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "py"];

pub struct RelationshipBuilder<'a> {
    cache: &'a CacheManager,
    type_resolver: &'a dyn TypeResolver,
    config: RelationshipBuilderConfig,
}

impl<'a> RelationshipBuilder<'a> {
    pub fn new(cache: &'a CacheManager, type_resolver: &'a dyn TypeResolver, config: RelationshipBuilderConfig) -> Self {
        Self { cache, type_resolver, config }
    }

    /// Resolve every candidate emitted for `from_file`, given its local symbol
    /// table and import map, and fold same-edge observations into merged
    /// relationships (by canonical id) before returning.
    pub fn build(&self, from_file: &str, local_symbols: &std::collections::HashMap<String, String>, imports: &[ImportRecord], candidates: &[ReferenceCandidate]) -> Vec<Relationship> {
        let budget = TypeCheckerBudget::new(self.config.type_checker_budget_per_file);
        let mut by_id: std::collections::HashMap<String, Relationship> = std::collections::HashMap::new();

        for candidate in candidates {
            let resolution = self.resolve_one(from_file, local_symbols, imports, candidate, &budget);
            let rel = self.to_relationship(candidate, resolution);
            merge_into(&mut by_id, rel);
        }

        by_id.into_values().collect()
    }

    fn resolve_one(
        &self,
        from_file: &str,
        local_symbols: &std::collections::HashMap<String, String>,
        imports: &[ImportRecord],
        candidate: &ReferenceCandidate,
        budget: &TypeCheckerBudget,
    ) -> Resolution {
        let mut evidence_sources: Vec<EvidenceSource> = Vec::new();

        // 1. same-file local symbol table.
        if let Some(id) = local_symbols.get(&candidate.target_name) {
            evidence_sources.push(EvidenceSource::Ast);
            return Resolution { entity_id: Some(id.clone()), to_ref: None, sources: evidence_sources, inferred_candidates: 0 };
        }

        // 2 & 3. import map, optionally through re-export chains.
        if let Some(import) = imports.iter().find(|i| !i.is_wildcard && i.alias == candidate.target_name) {
            let imported_name = import.imported_name.as_deref().unwrap_or(&import.alias);
            if let Some(target_file) = resolve_module_path(from_file, &import.source_module, self.cache) {
                if let Some(id) = self.cache.lookup_global_symbol(&target_file, imported_name) {
                    evidence_sources.push(EvidenceSource::Ast);
                    return Resolution { entity_id: Some(id), to_ref: None, sources: evidence_sources, inferred_candidates: 0 };
                }
                if let Some(export) = self.cache.resolve_export(&target_file, imported_name, self.config.re_export_max_depth) {
                    if let Some(id) = self.cache.lookup_global_symbol(&export.file_rel, &export.local_name) {
                        evidence_sources.push(EvidenceSource::Ast);
                        return Resolution { entity_id: Some(id), to_ref: None, sources: evidence_sources, inferred_candidates: 0 };
                    }
                }
            }
        }

        // 4. budgeted type-checker resolution.
        if budget.try_spend() {
            if let Some(id) = self.type_resolver.resolve(from_file, &candidate.target_name) {
                evidence_sources.push(EvidenceSource::TypeChecker);
                return Resolution { entity_id: Some(id), to_ref: None, sources: evidence_sources, inferred_candidates: 0 };
            }
        }

        // 5. name-index heuristic.
        let matches = self.cache.lookup_by_name(&candidate.target_name);
        if matches.len() == 1 {
            evidence_sources.push(EvidenceSource::Heuristic);
            return Resolution { entity_id: Some(matches[0].clone()), to_ref: None, sources: evidence_sources, inferred_candidates: 1 };
        }
        if matches.len() > 1 {
            evidence_sources.push(EvidenceSource::Heuristic);
            return Resolution {
                entity_id: None,
                to_ref: Some(UnresolvedRef::External { name: candidate.target_name.clone() }),
                sources: evidence_sources,
                inferred_candidates: matches.len(),
            };
        }

        // 6. unresolved.
        Resolution {
            entity_id: None,
            to_ref: Some(UnresolvedRef::External { name: candidate.target_name.clone() }),
            sources: Vec::new(),
            inferred_candidates: 0,
        }
    }

    fn to_relationship(&self, candidate: &ReferenceCandidate, resolution: Resolution) -> Relationship {
        let now = chrono::Utc::now();
        let rel_type = reference_kind_to_relationship_type(candidate.kind);
        let target_key = Relationship::target_key(resolution.entity_id.as_deref(), resolution.to_ref.as_ref());
        let id = canonical_id(&candidate.from_symbol_id, rel_type, &target_key);

        let confidences: Vec<f32> = resolution.sources.iter().map(|s| s.base_confidence()).collect();
        let confidence = if confidences.is_empty() { None } else { Some(combine_confidence(&confidences)) };

        let evidence: Vec<Evidence> = resolution
            .sources
            .iter()
            .map(|source| Evidence {
                source: *source,
                confidence: source.base_confidence(),
                location: Some(candidate.location.clone()),
                note: None,
                last_seen_at: now,
            })
            .collect();

        let metadata = if resolution.inferred_candidates > 1 {
            serde_json::json!({ "ambiguousCandidateCount": resolution.inferred_candidates })
        } else {
            serde_json::Value::Null
        };

        Relationship {
            id,
            from_entity_id: candidate.from_symbol_id.clone(),
            to_entity_id: resolution.entity_id,
            to_ref: resolution.to_ref,
            r#type: rel_type,
            created: now,
            last_modified: now,
            version: 1,
            valid_from: now,
            valid_to: None,
            active: true,
            confidence,
            evidence: bound_evidence(evidence),
            locations: vec![candidate.location.clone()],
            metadata,
            occurrences: 1,
            last_seen_at: now,
        }
    }
}

struct Resolution {
    entity_id: Option<String>,
    to_ref: Option<UnresolvedRef>,
    sources: Vec<EvidenceSource>,
    inferred_candidates: usize,
}

fn reference_kind_to_relationship_type(kind: ReferenceKind) -> RelationshipType {
    match kind {
        ReferenceKind::Calls => RelationshipType::Calls,
        ReferenceKind::References => RelationshipType::References,
        ReferenceKind::Implements => RelationshipType::Implements,
        ReferenceKind::Extends => RelationshipType::Extends,
        ReferenceKind::DependsOn => RelationshipType::DependsOn,
        ReferenceKind::ReturnsType => RelationshipType::ReturnsType,
        ReferenceKind::ParamType => RelationshipType::ParamType,
        ReferenceKind::TypeUses => RelationshipType::TypeUses,
        ReferenceKind::Reads => RelationshipType::Reads,
        ReferenceKind::Writes => RelationshipType::Writes,
        ReferenceKind::Throws => RelationshipType::Throws,
        ReferenceKind::Overrides => RelationshipType::Overrides,
    }
}

/// Normalize a relative import specifier against the importing file's directory
/// and probe the cache for a matching indexed file under each supported
/// extension (the cache only knows about files it has parsed, so this is a
/// lookup against what has already been indexed, not a filesystem walk).
fn resolve_module_path(from_file: &str, source_module: &str, cache: &CacheManager) -> Option<String> {
    if !source_module.starts_with('.') {
        return None; // external package — not resolvable within this repo's graph.
    }

    let mut dir_segments: Vec<&str> = from_file.rsplit_once('/').map(|(d, _)| d.split('/').collect()).unwrap_or_default();
    for segment in source_module.split('/') {
        match segment {
            "." | "" => {}
            ".." => {
                dir_segments.pop();
            }
            other => dir_segments.push(other),
        }
    }
    let base = dir_segments.join("/");

    for ext in CANDIDATE_EXTENSIONS {
        let candidate = format!("{base}.{ext}");
        if cache.get(&candidate).is_some() {
            return Some(candidate);
        }
    }
    None
}

/// Fold a freshly-resolved observation into the accumulator, combining evidence,
/// confidence, and occurrence count for edges sharing the same canonical id
/// (§4.6's merge semantics, applied at emission time rather than store time so a
/// single parse pass already converges multiple candidates onto one edge).
fn merge_into(by_id: &mut std::collections::HashMap<String, Relationship>, rel: Relationship) {
    match by_id.get_mut(&rel.id) {
        None => {
            by_id.insert(rel.id.clone(), rel);
        }
        Some(existing) => {
            existing.occurrences += 1;
            existing.locations.extend(rel.locations);
            existing.evidence.extend(rel.evidence);
            existing.evidence = bound_evidence(std::mem::take(&mut existing.evidence));
            let confidences: Vec<f32> = existing.evidence.iter().map(|e| e.confidence).collect();
            existing.confidence = if confidences.is_empty() { None } else { Some(combine_confidence(&confidences)) };
            existing.last_seen_at = rel.last_seen_at;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memento_storage::domain::EvidenceLocation;
    use std::collections::HashMap;

    fn candidate(from: &str, target: &str, kind: ReferenceKind) -> ReferenceCandidate {
        ReferenceCandidate {
            from_symbol_id: from.to_string(),
            kind,
            target_name: target.to_string(),
            location: EvidenceLocation { path: "a.ts".to_string(), line: 1, column: 0 },
        }
    }

    #[test]
    fn test_resolves_via_local_symbol_table() {
        let cache = CacheManager::new();
        let resolver = NullTypeResolver;
        let builder = RelationshipBuilder::new(&cache, &resolver, RelationshipBuilderConfig::default());

        let mut locals = HashMap::new();
        locals.insert("bar".to_string(), "sym:bar".to_string());

        let rels = builder.build("a.ts", &locals, &[], &[candidate("sym:foo", "bar", ReferenceKind::Calls)]);
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].to_entity_id, Some("sym:bar".to_string()));
        assert_eq!(rels[0].confidence, Some(1.0));
    }

    #[test]
    fn test_unresolved_candidate_becomes_external_ref() {
        let cache = CacheManager::new();
        let resolver = NullTypeResolver;
        let builder = RelationshipBuilder::new(&cache, &resolver, RelationshipBuilderConfig::default());

        let rels = builder.build("a.ts", &HashMap::new(), &[], &[candidate("sym:foo", "ghost", ReferenceKind::Calls)]);
        assert_eq!(rels.len(), 1);
        assert!(rels[0].to_entity_id.is_none());
        assert!(matches!(&rels[0].to_ref, Some(UnresolvedRef::External { name }) if name == "ghost"));
    }

    #[test]
    fn test_ambiguous_name_heuristic_marks_inferred() {
        let cache = CacheManager::new();
        cache.insert(
            "b.ts",
            vec![memento_storage::domain::Entity::new("sym:b#dup", "b.ts", "h", memento_storage::domain::EntityKind::Symbol(sample_symbol("dup")))],
            vec![],
            "h1".to_string(),
        );
        cache.insert(
            "c.ts",
            vec![memento_storage::domain::Entity::new("sym:c#dup", "c.ts", "h", memento_storage::domain::EntityKind::Symbol(sample_symbol("dup")))],
            vec![],
            "h2".to_string(),
        );
        let resolver = NullTypeResolver;
        let builder = RelationshipBuilder::new(&cache, &resolver, RelationshipBuilderConfig::default());

        let rels = builder.build("a.ts", &HashMap::new(), &[], &[candidate("sym:foo", "dup", ReferenceKind::Calls)]);
        assert!(rels[0].to_entity_id.is_none());
        assert_eq!(rels[0].metadata["ambiguousCandidateCount"], serde_json::json!(2));
    }

    #[test]
    fn test_single_name_match_resolves_with_reduced_confidence() {
        let cache = CacheManager::new();
        cache.insert(
            "b.ts",
            vec![memento_storage::domain::Entity::new("sym:b#only", "b.ts", "h", memento_storage::domain::EntityKind::Symbol(sample_symbol("only")))],
            vec![],
            "h1".to_string(),
        );
        let resolver = NullTypeResolver;
        let builder = RelationshipBuilder::new(&cache, &resolver, RelationshipBuilderConfig::default());

        let rels = builder.build("a.ts", &HashMap::new(), &[], &[candidate("sym:foo", "only", ReferenceKind::Calls)]);
        assert_eq!(rels[0].to_entity_id, Some("sym:b#only".to_string()));
        assert_eq!(rels[0].confidence, Some(0.4));
        assert!(rels[0].is_inferred());
    }

    #[test]
    fn test_type_checker_budget_exhausts() {
        let cache = CacheManager::new();
        let mut entries = HashMap::new();
        entries.insert("typed".to_string(), "sym:typed".to_string());
        let resolver = StubTypeResolver::new(entries);
        let builder = RelationshipBuilder::new(&cache, &resolver, RelationshipBuilderConfig { re_export_max_depth: 5, type_checker_budget_per_file: 1 });

        let candidates = vec![
            candidate("sym:foo", "typed", ReferenceKind::TypeUses),
            candidate("sym:foo", "typed2", ReferenceKind::TypeUses),
        ];
        let rels = builder.build("a.ts", &HashMap::new(), &[], &candidates);
        let resolved_count = rels.iter().filter(|r| r.to_entity_id.is_some()).count();
        assert_eq!(resolved_count, 1, "only one type-checker call should succeed before the budget is exhausted");
    }

    #[test]
    fn test_import_resolution_via_global_symbol_index() {
        let cache = CacheManager::new();
        cache.insert(
            "a.ts",
            vec![memento_storage::domain::Entity::new("sym:a#foo", "a.ts", "h", memento_storage::domain::EntityKind::Symbol(sample_symbol("foo")))],
            vec![],
            "h1".to_string(),
        );
        let resolver = NullTypeResolver;
        let builder = RelationshipBuilder::new(&cache, &resolver, RelationshipBuilderConfig::default());

        let imports = vec![ImportRecord {
            alias: "foo".to_string(),
            source_module: "./a".to_string(),
            imported_name: Some("foo".to_string()),
            is_wildcard: false,
            location: EvidenceLocation { path: "b.ts".to_string(), line: 1, column: 0 },
        }];
        let rels = builder.build("b.ts", &HashMap::new(), &imports, &[candidate("sym:b#caller", "foo", ReferenceKind::Calls)]);
        assert_eq!(rels[0].to_entity_id, Some("sym:a#foo".to_string()));
    }

    fn sample_symbol(name: &str) -> memento_storage::domain::SymbolEntity {
        memento_storage::domain::SymbolEntity {
            name: name.to_string(),
            signature: "() => void".to_string(),
            docstring: None,
            visibility: memento_storage::domain::Visibility::Public,
            is_exported: true,
            is_deprecated: false,
            location: memento_storage::domain::Location { line: 1, column: 0, start: 0, end: 1 },
            detail: memento_storage::domain::SymbolDetail::Function(memento_storage::domain::FunctionDetail {
                parameters: vec![],
                return_type: None,
                is_async: false,
                is_generator: false,
                complexity: 1,
            }),
        }
    }
}
