//! Domain layer: the knowledge-graph's entity/relationship model.
//!
//! # Core principles
//!
//! 1. **Stable ids**: an entity's id never changes across re-parses of unchanged
//!    content; a relationship's id is a pure function of its logical identity.
//! 2. **Append-only history**: entities are mutated in place, but every change that
//!    touches `hash` appends a [`VersionEntity`] rather than overwriting history.
//! 3. **No physical delete of edges**: relationships close (`active=false,
//!    validTo=now`); they are never removed from the store.
//!
//! # Examples
//!
//! ```rust
//! use memento_storage::domain::{Entity, EntityKind, FileEntity};
//!
//! let file = Entity::new("file:src/a.ts", "src/a.ts", "deadbeef", EntityKind::File(
//!     FileEntity::new("ts", 42, 3, false, false),
//! )).with_language("typescript");
//! assert_eq!(file.language.as_deref(), Some("typescript"));
//! ```

mod entity;
mod relationship;

pub use entity::{
    CheckpointEntity, CheckpointReason, ClassDetail, DirectoryEntity, DocumentationEntity, Entity,
    EntityKind, FileEntity, FunctionDetail, InterfaceDetail, Location, ModuleEntity, Parameter,
    SpecEntity, SymbolDetail, SymbolEntity, TestEntity, TestType, TypeAliasDetail, VersionEntity,
    Visibility,
};
pub use relationship::{
    bound_evidence, canonical_id, combine_confidence, Evidence, EvidenceLocation, EvidenceSource,
    Relationship, RelationshipType, UnresolvedRef, EVIDENCE_RETENTION,
};
