//! Entity domain model
//!
//! An [`Entity`] is a node in the knowledge graph: a file, a directory, a module, a
//! symbol (function, class, interface, type alias, …), a test, a spec, a piece of
//! documentation, an append-only version snapshot, or a checkpoint. All variants
//! share a common envelope (`id`, `path`, `hash`, `language`, timestamps, `metadata`);
//! kind-specific fields live in [`EntityKind`].
//!
//! # Examples
//!
//! ```rust
//! use memento_storage::domain::{Entity, EntityKind, FileEntity};
//!
//! let entity = Entity::new(
//!     "file:src/a.ts",
//!     "src/a.ts",
//!     "deadbeef",
//!     EntityKind::File(FileEntity::new("ts", 12, 1, false, false)),
//! );
//! assert_eq!(entity.id, "file:src/a.ts");
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A node in the knowledge graph.
///
/// `id` is globally unique and stable across re-parses of unchanged content
/// (data-model invariant 1). `hash` is the content hash driving cache invalidation
/// and version history (C8).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Globally unique, stable id.
    pub id: String,
    /// Repo-relative path this entity is derived from (empty for synthetic entities
    /// such as checkpoints).
    pub path: String,
    /// Content hash (SHA-256 of normalized content for files; derived for symbols).
    pub hash: String,
    /// Source language, when known (`None` for directories, specs, checkpoints).
    pub language: Option<String>,
    pub created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    /// Free-form metadata. Kept as JSON only at this storage-facing boundary;
    /// domain code should not depend on particular keys except the documented
    /// breadcrumbs (`renamedFrom`, `parseErrors`, `needsEmbed`).
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub kind: EntityKind,
}

impl Entity {
    pub fn new(id: impl Into<String>, path: impl Into<String>, hash: impl Into<String>, kind: EntityKind) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            path: path.into(),
            hash: hash.into(),
            language: None,
            created: now,
            last_modified: now,
            metadata: serde_json::Value::Null,
            kind,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Tag this entity as having been produced by a rename: delete the old
    /// entity, add this one with a breadcrumb to where it came from.
    pub fn with_renamed_from(mut self, old_path: impl Into<String>) -> Self {
        let mut obj = match self.metadata {
            serde_json::Value::Object(obj) => obj,
            _ => serde_json::Map::new(),
        };
        obj.insert("renamedFrom".to_string(), serde_json::Value::String(old_path.into()));
        self.metadata = serde_json::Value::Object(obj);
        self
    }

    /// The discriminant string used as the SQLite `kind` column and as the
    /// property-graph secondary label (§4.5).
    pub fn kind_label(&self) -> &'static str {
        self.kind.label()
    }
}

/// Kind-specific payload for an [`Entity`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum EntityKind {
    File(FileEntity),
    Directory(DirectoryEntity),
    Module(ModuleEntity),
    Symbol(SymbolEntity),
    Test(TestEntity),
    Spec(SpecEntity),
    Documentation(DocumentationEntity),
    Version(VersionEntity),
    Checkpoint(CheckpointEntity),
}

impl EntityKind {
    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::File(_) => "File",
            EntityKind::Directory(_) => "Directory",
            EntityKind::Module(_) => "Module",
            EntityKind::Symbol(s) => s.detail.label(),
            EntityKind::Test(_) => "Test",
            EntityKind::Spec(_) => "Spec",
            EntityKind::Documentation(_) => "Documentation",
            EntityKind::Version(_) => "Version",
            EntityKind::Checkpoint(_) => "Checkpoint",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntity {
    pub extension: String,
    pub size: u64,
    pub lines: u32,
    pub is_test: bool,
    pub is_config: bool,
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
}

impl FileEntity {
    pub fn new(extension: impl Into<String>, size: u64, lines: u32, is_test: bool, is_config: bool) -> Self {
        Self {
            extension: extension.into(),
            size,
            lines,
            is_test,
            is_config,
            dependencies: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryEntity {
    #[serde(default)]
    pub children: BTreeSet<String>,
    pub depth: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleEntity {
    pub name: String,
    pub version: Option<String>,
    pub entry_point: Option<String>,
    #[serde(default)]
    pub package_info: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    Public,
    Private,
    Protected,
}

/// Source location of a symbol, 1-indexed line/column (tree-sitter positions
/// are 0-indexed and converted on extraction).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub line: u32,
    pub column: u32,
    pub start: u32,
    pub end: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolEntity {
    pub name: String,
    pub signature: String,
    pub docstring: Option<String>,
    pub visibility: Visibility,
    pub is_exported: bool,
    pub is_deprecated: bool,
    pub location: Location,
    pub detail: SymbolDetail,
}

/// The per-kind payload distinguishing `function | class | interface | typeAlias |
/// variable | property | method` symbols.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "symbolKind")]
pub enum SymbolDetail {
    Function(FunctionDetail),
    Method(FunctionDetail),
    Class(ClassDetail),
    Interface(InterfaceDetail),
    TypeAlias(TypeAliasDetail),
    Variable,
    Property,
}

impl SymbolDetail {
    pub fn label(&self) -> &'static str {
        match self {
            SymbolDetail::Function(_) => "Function",
            SymbolDetail::Method(_) => "Method",
            SymbolDetail::Class(_) => "Class",
            SymbolDetail::Interface(_) => "Interface",
            SymbolDetail::TypeAlias(_) => "TypeAlias",
            SymbolDetail::Variable => "Variable",
            SymbolDetail::Property => "Property",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub r#type: Option<String>,
    pub optional: bool,
    pub default_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDetail {
    pub parameters: Vec<Parameter>,
    pub return_type: Option<String>,
    pub is_async: bool,
    pub is_generator: bool,
    pub complexity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDetail {
    pub extends: Vec<String>,
    pub implements: Vec<String>,
    pub is_abstract: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceDetail {
    pub extends: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeAliasDetail {
    pub aliased_type: String,
    pub is_union: bool,
    pub is_intersection: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestType {
    Unit,
    Integration,
    E2e,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestEntity {
    pub test_type: TestType,
    pub target_symbol: Option<String>,
    pub framework: Option<String>,
    pub status: String,
    pub flaky_score: f32,
    #[serde(default)]
    pub execution_history: Vec<serde_json::Value>,
    #[serde(default)]
    pub performance_metrics: serde_json::Value,
    #[serde(default)]
    pub coverage: serde_json::Value,
}

impl TestEntity {
    pub fn new(test_type: TestType, status: impl Into<String>) -> Self {
        Self {
            test_type,
            target_symbol: None,
            framework: None,
            status: status.into(),
            flaky_score: 0.0,
            execution_history: Vec::new(),
            performance_metrics: serde_json::Value::Null,
            coverage: serde_json::Value::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecEntity {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    pub status: String,
    pub priority: String,
    pub assignee: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentationEntity {
    pub title: String,
    pub content: String,
    pub doc_type: String,
    pub status: String,
    pub doc_hash: String,
    #[serde(default)]
    pub business_domains: Vec<String>,
    #[serde(default)]
    pub stakeholders: Vec<String>,
}

/// Append-only snapshot of an entity's content hash and metadata at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionEntity {
    pub entity_id: String,
    pub hash: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckpointReason {
    Daily,
    Incident,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointEntity {
    pub reason: CheckpointReason,
    pub hops: u32,
    pub seed_entities: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_new_sets_timestamps() {
        let e = Entity::new("file:a.ts", "a.ts", "h1", EntityKind::File(FileEntity::new("ts", 10, 1, false, false)));
        assert_eq!(e.created, e.last_modified);
        assert_eq!(e.kind_label(), "File");
    }

    #[test]
    fn test_symbol_detail_labels() {
        let function = SymbolDetail::Function(FunctionDetail {
            parameters: vec![],
            return_type: None,
            is_async: false,
            is_generator: false,
            complexity: 1,
        });
        assert_eq!(function.label(), "Function");
    }

    #[test]
    fn test_with_renamed_from_sets_breadcrumb() {
        let e = Entity::new("file:b.ts", "b.ts", "h2", EntityKind::File(FileEntity::new("ts", 1, 1, false, false)))
            .with_renamed_from("a.ts");
        assert_eq!(e.metadata["renamedFrom"], serde_json::json!("a.ts"));
    }

    #[test]
    fn test_entity_serde_roundtrip() {
        let e = Entity::new(
            "sym:a.ts#foo@abc123",
            "a.ts",
            "abc123",
            EntityKind::Symbol(SymbolEntity {
                name: "foo".into(),
                signature: "(x: number) => number".into(),
                docstring: None,
                visibility: Visibility::Public,
                is_exported: true,
                is_deprecated: false,
                location: Location { line: 1, column: 0, start: 0, end: 42 },
                detail: SymbolDetail::Function(FunctionDetail {
                    parameters: vec![Parameter {
                        name: "x".into(),
                        r#type: Some("number".into()),
                        optional: false,
                        default_value: None,
                    }],
                    return_type: Some("number".into()),
                    is_async: false,
                    is_generator: false,
                    complexity: 1,
                }),
            }),
        );
        let json = serde_json::to_string(&e).unwrap();
        let back: Entity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }
}
