//! File-only fallback path (§4.1): every extension without a registered
//! [`super::plugin::LanguagePlugin`] still yields a `File` entity and nothing else.
//! This is a deliberate boundary, not a stub — there is no plugin to "complete" here.

use memento_storage::domain::{DirectoryEntity, Entity, EntityKind, FileEntity, Relationship, RelationshipType};
use std::path::Path;

const TEST_MARKERS: &[&str] = &[".test.", ".spec.", "_test.", "test_"];
const CONFIG_BASENAMES: &[&str] = &[
    "package.json",
    "tsconfig.json",
    "cargo.toml",
    "pyproject.toml",
    "setup.cfg",
    "webpack.config.js",
    ".eslintrc.json",
];

pub fn is_test_path(rel_path: &str) -> bool {
    let lower = rel_path.to_lowercase();
    TEST_MARKERS.iter().any(|m| lower.contains(m)) || lower.split('/').any(|seg| seg == "tests" || seg == "__tests__")
}

pub fn is_config_path(rel_path: &str) -> bool {
    let lower = rel_path.to_lowercase();
    let basename = lower.rsplit('/').next().unwrap_or(&lower);
    CONFIG_BASENAMES.contains(&basename) || basename.starts_with('.') && basename.ends_with("rc")
}

/// Build the one `File` entity every parse produces, regardless of language support.
pub fn build_file_entity(rel_path: &str, hash: &str, size: u64, lines: u32) -> Entity {
    let extension = Path::new(rel_path).extension().and_then(|e| e.to_str()).unwrap_or("").to_string();
    Entity::new(
        super::plugin::file_id(rel_path),
        rel_path,
        hash,
        EntityKind::File(FileEntity::new(extension, size, lines, is_test_path(rel_path), is_config_path(rel_path))),
    )
}

/// Build `Directory` entities and `CONTAINS` edges for every ancestor directory of
/// `rel_path`, parent→child and leaf-dir→file (§4.1, gated by `materializeDirectories`).
pub fn build_directory_chain(rel_path: &str) -> (Vec<Entity>, Vec<Relationship>) {
    let mut entities = Vec::new();
    let mut relationships = Vec::new();
    let segments: Vec<&str> = rel_path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() <= 1 {
        return (entities, relationships);
    }

    let mut prefix = String::new();
    let mut prev_dir_id: Option<String> = None;
    for (depth, segment) in segments[..segments.len() - 1].iter().enumerate() {
        if !prefix.is_empty() {
            prefix.push('/');
        }
        prefix.push_str(segment);
        let dir_id = super::plugin::directory_id(&prefix);
        entities.push(Entity::new(&dir_id, &prefix, "", EntityKind::Directory(DirectoryEntity {
            children: Default::default(),
            depth: depth as u32,
        })));
        if let Some(parent_id) = &prev_dir_id {
            relationships.push(structural_relationship(parent_id, &dir_id));
        }
        prev_dir_id = Some(dir_id);
    }

    if let Some(parent_id) = prev_dir_id {
        relationships.push(structural_relationship(&parent_id, &super::plugin::file_id(rel_path)));
    }

    (entities, relationships)
}

fn structural_relationship(from: &str, to: &str) -> Relationship {
    let now = chrono::Utc::now();
    let target_key = Relationship::target_key(Some(to), None);
    Relationship {
        id: memento_storage::domain::canonical_id(from, RelationshipType::Contains, &target_key),
        from_entity_id: from.to_string(),
        to_entity_id: Some(to.to_string()),
        to_ref: None,
        r#type: RelationshipType::Contains,
        created: now,
        last_modified: now,
        version: 1,
        valid_from: now,
        valid_to: None,
        active: true,
        confidence: Some(1.0),
        evidence: vec![],
        locations: vec![],
        metadata: serde_json::Value::Null,
        occurrences: 1,
        last_seen_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_test_path() {
        assert!(is_test_path("src/foo.test.ts"));
        assert!(is_test_path("tests/bar.py"));
        assert!(!is_test_path("src/foo.ts"));
    }

    #[test]
    fn test_is_config_path() {
        assert!(is_config_path("package.json"));
        assert!(is_config_path("nested/tsconfig.json"));
        assert!(!is_config_path("src/index.ts"));
    }

    #[test]
    fn test_directory_chain_links_ancestors() {
        let (entities, relationships) = build_directory_chain("src/features/a.ts");
        assert_eq!(entities.len(), 2); // src, src/features
        assert_eq!(relationships.len(), 2); // src->features, features->file
    }

    #[test]
    fn test_top_level_file_has_no_chain() {
        let (entities, relationships) = build_directory_chain("a.ts");
        assert!(entities.is_empty());
        assert!(relationships.is_empty());
    }
}
