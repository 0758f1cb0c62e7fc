//! memento-ir: parsing and diffing, pure and store-free.
//!
//! Covers the AST Parser (C1), Cache Manager (C2), Incremental Parser (C3), and
//! Relationship Builder (C4). Everything here takes source text in and typed
//! `Entity`/`Relationship` records out — no store, no filesystem watching, no
//! network. `memento-sync` wires these into a running pipeline.
//!
//! # Example
//!
//! ```rust
//! use memento_ir::parser::AstParser;
//!
//! let parser = AstParser::default();
//! let parsed = parser.parse_source("src/a.ts", "export function add(x: number): number { return x; }").unwrap();
//! assert_eq!(parsed.entities.len(), 1); // the File entity
//! assert_eq!(parsed.result.entities.len(), 1); // the `add` symbol
//! ```

pub mod cache;
pub mod error;
pub mod incremental;
pub mod noise;
pub mod parser;
pub mod relationships;

pub use cache::{CacheEntry, CacheManager, ExportTarget};
pub use error::{Error, ErrorKind, Result};
pub use incremental::{IncrementalParser, IncrementalResult};
pub use noise::NoiseFilter;
pub use parser::{AstParser, LanguageId, LanguageRegistry, ParsedFile, ParserConfig};
pub use relationships::{
    NullTypeResolver, RelationshipBuilder, RelationshipBuilderConfig, StubTypeResolver,
    TypeCheckerBudget, TypeResolver,
};
