//! Language Plugin port (C1).
//!
//! Each supported language implements [`LanguagePlugin`] to turn a tree-sitter
//! parse tree into [`Entity`]/[`Relationship`] records. Unlike a general-purpose
//! AST toolkit, this trait is scoped to exactly what the knowledge graph needs:
//! no control-flow or points-to hooks, because nothing downstream consumes a CFG.

use memento_storage::domain::{Entity, EvidenceLocation, Relationship};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tree_sitter::{Language as TSLanguage, Node as TSNode, Tree};

/// Language identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LanguageId {
    TypeScript,
    JavaScript,
    Python,
}

impl LanguageId {
    pub fn name(&self) -> &'static str {
        match self {
            LanguageId::TypeScript => "typescript",
            LanguageId::JavaScript => "javascript",
            LanguageId::Python => "python",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "ts" | "tsx" => Some(LanguageId::TypeScript),
            "js" | "jsx" | "mjs" | "cjs" => Some(LanguageId::JavaScript),
            "py" | "pyi" => Some(LanguageId::Python),
            _ => None,
        }
    }

    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            LanguageId::TypeScript => &["ts", "tsx"],
            LanguageId::JavaScript => &["js", "jsx", "mjs", "cjs"],
            LanguageId::Python => &["py", "pyi"],
        }
    }
}

/// One parse error, carried as data rather than a thrown exception (§4.1: "never
/// throw on malformed input").
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ParseErrorRecord {
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub message: String,
    pub severity: ParseErrorSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ParseErrorSeverity {
    Warning,
    Error,
}

/// Context threaded through one file's extraction.
pub struct ExtractionContext<'a> {
    pub source: &'a str,
    pub file_path: &'a str,
    pub module_path: Option<String>,
    pub language: LanguageId,
    pub scope_stack: Vec<String>,
}

impl<'a> ExtractionContext<'a> {
    pub fn new(source: &'a str, file_path: &'a str, language: LanguageId) -> Self {
        Self { source, file_path, module_path: None, language, scope_stack: Vec::new() }
    }

    /// Dotted-FQN prefix of the current scope, used to disambiguate nested
    /// declarations (methods inside classes, closures inside functions).
    pub fn fqn_prefix(&self) -> String {
        if self.scope_stack.is_empty() {
            self.module_path.clone().unwrap_or_default()
        } else {
            let module = self.module_path.as_deref().unwrap_or("");
            if module.is_empty() {
                self.scope_stack.join(".")
            } else {
                format!("{module}.{}", self.scope_stack.join("."))
            }
        }
    }

    pub fn push_scope(&mut self, name: &str) {
        self.scope_stack.push(name.to_string());
    }

    pub fn pop_scope(&mut self) {
        self.scope_stack.pop();
    }

    pub fn node_text(&self, node: &TSNode) -> &'a str {
        self.source.get(node.byte_range()).unwrap_or("")
    }
}

/// An unresolved use of a name that the Relationship Builder (C4) will attempt
/// to resolve to a target entity using the local symbol table, import map,
/// global symbol/name indices, and (budget permitting) the type checker.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ReferenceCandidate {
    pub from_symbol_id: String,
    pub kind: ReferenceKind,
    pub target_name: String,
    pub location: EvidenceLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ReferenceKind {
    Calls,
    References,
    Implements,
    Extends,
    DependsOn,
    ReturnsType,
    ParamType,
    TypeUses,
    Reads,
    Writes,
    Throws,
    Overrides,
}

/// One `import` statement, kept separate from [`ReferenceCandidate`] because it
/// feeds the Cache Manager's export map rather than a single relationship.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ImportRecord {
    /// Local alias bound by the import.
    pub alias: String,
    /// Module specifier as written (`"./foo"`, `"lodash"`), not yet resolved to a path.
    pub source_module: String,
    /// Name imported from the source module (`None` for a default/namespace import).
    pub imported_name: Option<String>,
    pub is_wildcard: bool,
    pub location: EvidenceLocation,
}

/// Result of extraction from a single file.
#[derive(Debug, Default)]
pub struct ExtractionResult {
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
    pub errors: Vec<ParseErrorRecord>,
    pub candidates: Vec<ReferenceCandidate>,
    pub imports: Vec<ImportRecord>,
}

impl ExtractionResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, other: ExtractionResult) {
        self.entities.extend(other.entities);
        self.relationships.extend(other.relationships);
        self.errors.extend(other.errors);
        self.candidates.extend(other.candidates);
        self.imports.extend(other.imports);
    }
}

/// Short, deterministic content hash used in symbol ids (§4.1: `shortHash(signature)`).
pub fn short_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    format!("{:x}", digest)[..12].to_string()
}

/// Deterministic symbol id: `"sym:{normalizedPath}#{name}@{shortHash(signature)}"` (§4.1,
/// data-model invariant 2: changing signature creates a new id).
pub fn symbol_id(normalized_path: &str, name: &str, signature: &str) -> String {
    format!("sym:{normalized_path}#{name}@{}", short_hash(signature))
}

pub fn file_id(normalized_path: &str) -> String {
    format!("file:{normalized_path}")
}

pub fn directory_id(normalized_path: &str) -> String {
    format!("dir:{normalized_path}")
}

/// Each supported language implements this to extract entities/relationships
/// from one already-parsed tree-sitter tree.
pub trait LanguagePlugin: Send + Sync {
    fn tree_sitter_language(&self) -> TSLanguage;

    fn language_id(&self) -> LanguageId;

    fn extensions(&self) -> &'static [&'static str] {
        self.language_id().extensions()
    }

    fn supports(&self, ext: &str) -> bool {
        self.extensions().iter().any(|e| e.eq_ignore_ascii_case(ext))
    }

    /// Extract entities/relationships from a parsed tree. `local_symbols` is
    /// filled in with `{name -> symbolId}` so the Relationship Builder (C4) can
    /// do same-file resolution without re-walking the tree.
    fn extract(&self, ctx: &mut ExtractionContext, tree: &Tree) -> ExtractionResult;

    /// Whether a name is considered public/exported by this language's default
    /// naming convention (overridden per-language where an explicit `export`
    /// keyword makes this moot).
    fn is_public(&self, name: &str) -> bool {
        !name.starts_with('_')
    }

    fn extract_docstring(&self, _node: &TSNode, _source: &str) -> Option<String> {
        None
    }
}

/// Registry mapping file extensions to the plugin responsible for them.
pub struct LanguageRegistry {
    plugins: HashMap<LanguageId, Box<dyn LanguagePlugin>>,
}

impl LanguageRegistry {
    pub fn new() -> Self {
        Self { plugins: HashMap::new() }
    }

    pub fn register(&mut self, plugin: Box<dyn LanguagePlugin>) {
        self.plugins.insert(plugin.language_id(), plugin);
    }

    pub fn get(&self, lang: LanguageId) -> Option<&dyn LanguagePlugin> {
        self.plugins.get(&lang).map(|p| p.as_ref())
    }

    pub fn get_by_extension(&self, ext: &str) -> Option<&dyn LanguagePlugin> {
        let lang = LanguageId::from_extension(ext)?;
        self.get(lang)
    }

    pub fn supports(&self, ext: &str) -> bool {
        self.get_by_extension(ext).is_some()
    }
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_id_from_extension() {
        assert_eq!(LanguageId::from_extension("ts"), Some(LanguageId::TypeScript));
        assert_eq!(LanguageId::from_extension("tsx"), Some(LanguageId::TypeScript));
        assert_eq!(LanguageId::from_extension("py"), Some(LanguageId::Python));
        assert_eq!(LanguageId::from_extension("rs"), None);
    }

    #[test]
    fn test_extraction_context_fqn() {
        let source = "code";
        let mut ctx = ExtractionContext::new(source, "a.ts", LanguageId::TypeScript);
        ctx.module_path = Some("foo.bar".to_string());
        assert_eq!(ctx.fqn_prefix(), "foo.bar");
        ctx.push_scope("MyClass");
        assert_eq!(ctx.fqn_prefix(), "foo.bar.MyClass");
        ctx.pop_scope();
        assert_eq!(ctx.fqn_prefix(), "foo.bar");
    }

    #[test]
    fn test_symbol_id_changes_with_signature() {
        let a = symbol_id("a.ts", "foo", "(x: number) => number");
        let b = symbol_id("a.ts", "foo", "(x: string) => number");
        assert_ne!(a, b);
    }

    #[test]
    fn test_symbol_id_deterministic() {
        let a = symbol_id("a.ts", "foo", "(x: number) => number");
        let b = symbol_id("a.ts", "foo", "(x: number) => number");
        assert_eq!(a, b);
    }
}
