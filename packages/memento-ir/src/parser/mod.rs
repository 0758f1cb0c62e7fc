//! AST Parser (C1): turns one source file into `{entities, relationships, errors}`.
//!
//! `parse_file` is pure given the same content — no store access happens here.
//! Language is selected purely by extension; an extension with no registered
//! [`plugin::LanguagePlugin`] falls through to [`file_only`] and yields a `File`
//! entity with no symbols, per §4.1.

pub mod file_only;
pub mod plugin;
pub mod python;
pub mod typescript;

pub use plugin::{
    file_id, symbol_id, short_hash, ExtractionContext, ExtractionResult, ImportRecord, LanguageId,
    LanguagePlugin, LanguageRegistry, ParseErrorRecord, ParseErrorSeverity, ReferenceCandidate,
    ReferenceKind,
};

use crate::error::{Error, Result};
use memento_storage::domain::Entity;
use sha2::{Digest, Sha256};
use tree_sitter::Parser as TSParser;

/// Config knobs read by the parser itself (the rest of §6's config surface belongs
/// to the Cache Manager, Relationship Builder, and Sync Coordinator).
#[derive(Debug, Clone)]
pub struct ParserConfig {
    pub materialize_directories: bool,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self { materialize_directories: false }
    }
}

/// The full result of parsing one file: the `File` entity (and, if configured,
/// its directory chain) plus whatever the language plugin extracted.
pub struct ParsedFile {
    pub hash: String,
    pub entities: Vec<Entity>,
    pub result: ExtractionResult,
}

pub struct AstParser {
    registry: LanguageRegistry,
    config: ParserConfig,
}

impl AstParser {
    pub fn new(config: ParserConfig) -> Self {
        let mut registry = LanguageRegistry::new();
        registry.register(Box::new(typescript::TypeScriptPlugin::new()));
        registry.register(Box::new(typescript::TypeScriptPlugin::javascript()));
        registry.register(Box::new(python::PythonPlugin::new()));
        Self { registry, config }
    }

    /// Parse `source`, already read off disk, associated with `rel_path` (repo-relative,
    /// forward-slash normalized — the caller owns filesystem access and normalization so
    /// this function stays pure and testable without a filesystem).
    pub fn parse_source(&self, rel_path: &str, source: &str) -> Result<ParsedFile> {
        let hash = content_hash(source);
        let lines = source.lines().count() as u32;
        let size = source.len() as u64;

        let file_entity = file_only::build_file_entity(rel_path, &hash, size, lines);
        let mut entities = vec![file_entity];

        let mut result = ExtractionResult::new();
        if self.config.materialize_directories {
            let (dir_entities, dir_relationships) = file_only::build_directory_chain(rel_path);
            entities.extend(dir_entities);
            result.relationships.extend(dir_relationships);
        }

        let extension = rel_path.rsplit('.').next().unwrap_or("");
        if let Some(plugin) = self.registry.get_by_extension(extension) {
            let mut parser = TSParser::new();
            parser
                .set_language(&plugin.tree_sitter_language())
                .map_err(|e| Error::parse(format!("failed to load grammar for {extension}: {e}")))?;
            let tree = parser
                .parse(source, None)
                .ok_or_else(|| Error::parse(format!("tree-sitter produced no tree for {rel_path}")))?;

            let language = plugin.language_id();
            let mut ctx = ExtractionContext::new(source, rel_path, language);
            let plugin_result = plugin.extract(&mut ctx, &tree);
            result.merge(plugin_result);
        }

        Ok(ParsedFile { hash, entities, result })
    }
}

impl Default for AstParser {
    fn default() -> Self {
        Self::new(ParserConfig::default())
    }
}

pub fn content_hash(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use memento_storage::domain::EntityKind;

    #[test]
    fn test_parse_source_unsupported_extension_yields_file_only() {
        let parser = AstParser::default();
        let parsed = parser.parse_source("src/README.md", "# hello").unwrap();
        assert_eq!(parsed.entities.len(), 1);
        assert!(matches!(parsed.entities[0].kind, EntityKind::File(_)));
        assert!(parsed.result.entities.is_empty());
    }

    #[test]
    fn test_parse_source_empty_file_has_no_symbols_or_errors() {
        let parser = AstParser::default();
        let parsed = parser.parse_source("src/a.ts", "").unwrap();
        assert_eq!(parsed.entities.len(), 1);
        assert!(parsed.result.entities.is_empty());
        assert!(parsed.result.errors.is_empty());
    }

    #[test]
    fn test_parse_source_typescript_extracts_symbol() {
        let parser = AstParser::default();
        let parsed = parser.parse_source("src/a.ts", "export function foo(x: number): number { return x; }").unwrap();
        assert_eq!(parsed.result.entities.len(), 1);
    }

    #[test]
    fn test_parse_source_is_deterministic() {
        let parser = AstParser::default();
        let source = "export function foo() {}";
        let a = parser.parse_source("src/a.ts", source).unwrap();
        let b = parser.parse_source("src/a.ts", source).unwrap();
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn test_directory_materialization_gated_by_config() {
        let parser = AstParser::new(ParserConfig { materialize_directories: true });
        let parsed = parser.parse_source("src/features/a.ts", "export const x = 1;").unwrap();
        assert!(parsed.entities.len() > 1, "expected directory entities to be materialized");
    }
}
