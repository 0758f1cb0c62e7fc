//! Relationship domain model
//!
//! A [`Relationship`] is a typed, directed edge between two entities. Its `id` is a
//! deterministic function of `(fromEntityId, type, targetKey)` (data-model invariant
//! 3) so that repeated observations of the same logical edge always collide onto one
//! row — this is what makes C6's `create`/`markInactiveNotSeenSince` idempotent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The closed set of relationship types (§3). Serialized as the exact spec name so
/// stored rows and wire payloads read the same vocabulary used elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationshipType {
    // structural
    Contains,
    Defines,
    Exports,
    Imports,
    // code
    Calls,
    References,
    Implements,
    Extends,
    DependsOn,
    Overrides,
    Reads,
    Writes,
    Throws,
    ReturnsType,
    ParamType,
    TypeUses,
    // test
    Tests,
    Validates,
    // spec
    Requires,
    Impacts,
    ImplementsSpec,
    // documentation
    DocumentedBy,
    DescribesDomain,
    // temporal
    PreviousVersion,
    ModifiedBy,
    SessionModified,
    BrokeIn,
    FixedIn,
    // checkpoint
    CheckpointIncludes,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::Contains => "CONTAINS",
            RelationshipType::Defines => "DEFINES",
            RelationshipType::Exports => "EXPORTS",
            RelationshipType::Imports => "IMPORTS",
            RelationshipType::Calls => "CALLS",
            RelationshipType::References => "REFERENCES",
            RelationshipType::Implements => "IMPLEMENTS",
            RelationshipType::Extends => "EXTENDS",
            RelationshipType::DependsOn => "DEPENDS_ON",
            RelationshipType::Overrides => "OVERRIDES",
            RelationshipType::Reads => "READS",
            RelationshipType::Writes => "WRITES",
            RelationshipType::Throws => "THROWS",
            RelationshipType::ReturnsType => "RETURNS_TYPE",
            RelationshipType::ParamType => "PARAM_TYPE",
            RelationshipType::TypeUses => "TYPE_USES",
            RelationshipType::Tests => "TESTS",
            RelationshipType::Validates => "VALIDATES",
            RelationshipType::Requires => "REQUIRES",
            RelationshipType::Impacts => "IMPACTS",
            RelationshipType::ImplementsSpec => "IMPLEMENTS_SPEC",
            RelationshipType::DocumentedBy => "DOCUMENTED_BY",
            RelationshipType::DescribesDomain => "DESCRIBES_DOMAIN",
            RelationshipType::PreviousVersion => "PREVIOUS_VERSION",
            RelationshipType::ModifiedBy => "MODIFIED_BY",
            RelationshipType::SessionModified => "SESSION_MODIFIED",
            RelationshipType::BrokeIn => "BROKE_IN",
            RelationshipType::FixedIn => "FIXED_IN",
            RelationshipType::CheckpointIncludes => "CHECKPOINT_INCLUDES",
        }
    }
}

impl std::fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a relationship's evidence was observed (§4.4).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceLocation {
    pub path: String,
    pub line: u32,
    pub column: u32,
}

/// The source of a single observation contributing to a relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvidenceSource {
    Ast,
    TypeChecker,
    Index,
    Heuristic,
}

impl EvidenceSource {
    /// Base confidence per §4.4: `ast:1.0, type-checker:0.95, index:0.7, heuristic:0.4`.
    pub fn base_confidence(&self) -> f32 {
        match self {
            EvidenceSource::Ast => 1.0,
            EvidenceSource::TypeChecker => 0.95,
            EvidenceSource::Index => 0.7,
            EvidenceSource::Heuristic => 0.4,
        }
    }
}

/// One observation supporting a relationship. Bounded to [`EVIDENCE_RETENTION`]
/// entries per relationship (data-model invariant 8); oldest dropped first on merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub source: EvidenceSource,
    pub confidence: f32,
    pub location: Option<EvidenceLocation>,
    pub note: Option<String>,
    pub last_seen_at: DateTime<Utc>,
}

/// Maximum number of evidence/location samples retained on any relationship,
/// everywhere a merge can occur (§9 resolved open question: always ≤ 20).
pub const EVIDENCE_RETENTION: usize = 20;

/// Keep only the most recent [`EVIDENCE_RETENTION`] entries, most-recent-first.
pub fn bound_evidence(mut evidence: Vec<Evidence>) -> Vec<Evidence> {
    evidence.sort_by(|a, b| b.last_seen_at.cmp(&a.last_seen_at));
    evidence.truncate(EVIDENCE_RETENTION);
    evidence
}

/// Combine independently-observed confidences via `1 - ∏(1 - c_i)` (§4.4).
pub fn combine_confidence(confidences: &[f32]) -> f32 {
    let product: f32 = confidences.iter().fold(1.0, |acc, c| acc * (1.0 - c.clamp(0.0, 1.0)));
    (1.0 - product).clamp(0.0, 1.0)
}

/// A typed, directed, versioned edge between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// Canonical id: `canonical(fromEntityId, type, targetKey)` — see [`canonical_id`].
    pub id: String,
    pub from_entity_id: String,
    /// Resolved target entity id, when resolution succeeded (§4.4 step 1-5).
    pub to_entity_id: Option<String>,
    /// Unresolved target reference, present iff `to_entity_id` is `None` (§4.4 step 6).
    pub to_ref: Option<UnresolvedRef>,
    pub r#type: RelationshipType,
    pub created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub version: u32,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
    pub active: bool,
    pub confidence: Option<f32>,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
    #[serde(default)]
    pub locations: Vec<EvidenceLocation>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Occurrence count accumulated across merges (§4.6 `create`).
    pub occurrences: u32,
    /// Pass-scoped staleness stamp driving `markInactiveNotSeenSince` (§4.6, §4.9 step 7).
    pub last_seen_at: DateTime<Utc>,
}

/// A reference to an entity the Relationship Builder could not resolve to an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum UnresolvedRef {
    External { name: String },
    FileSymbol { file: String, symbol: String },
}

impl Relationship {
    /// The normalization key used in the canonical id: `toEntityId` when resolved,
    /// else `"file:{relPath}#{symbol}"`, else `"name:{symbol}"` (§4.4).
    pub fn target_key(to_entity_id: Option<&str>, to_ref: Option<&UnresolvedRef>) -> String {
        if let Some(id) = to_entity_id {
            return id.to_string();
        }
        match to_ref {
            Some(UnresolvedRef::FileSymbol { file, symbol }) => format!("file:{file}#{symbol}"),
            Some(UnresolvedRef::External { name }) => format!("name:{name}"),
            None => String::new(),
        }
    }

    pub fn is_inferred(&self) -> bool {
        self.confidence.map(|c| c < 1.0).unwrap_or(false)
    }
}

/// Compute the canonical, deterministic id for a relationship from its logical
/// identity `(from, type, target-key)` (data-model invariant 3).
pub fn canonical_id(from_entity_id: &str, rel_type: RelationshipType, target_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(from_entity_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(rel_type.as_str().as_bytes());
    hasher.update(b"\0");
    hasher.update(target_key.as_bytes());
    let digest = hasher.finalize();
    format!("rel:{:x}", digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_id_is_deterministic() {
        let a = canonical_id("sym:a.ts#foo@1", RelationshipType::Calls, "sym:b.ts#bar@2");
        let b = canonical_id("sym:a.ts#foo@1", RelationshipType::Calls, "sym:b.ts#bar@2");
        assert_eq!(a, b);
    }

    #[test]
    fn test_canonical_id_distinguishes_type() {
        let calls = canonical_id("a", RelationshipType::Calls, "b");
        let refs = canonical_id("a", RelationshipType::References, "b");
        assert_ne!(calls, refs);
    }

    #[test]
    fn test_combine_confidence_matches_spec_example() {
        // "A CALLS edge with three sources accumulated yields combined confidence
        // 1 − (1−0.95)(1−0.7)(1−0.4) = 0.991" (§8).
        let combined = combine_confidence(&[0.95, 0.7, 0.4]);
        assert!((combined - 0.991).abs() < 1e-6, "got {combined}");
    }

    #[test]
    fn test_bound_evidence_keeps_most_recent() {
        let now = Utc::now();
        let mut evidence = Vec::new();
        for i in 0..30 {
            evidence.push(Evidence {
                source: EvidenceSource::Heuristic,
                confidence: 0.4,
                location: None,
                note: None,
                last_seen_at: now + chrono::Duration::seconds(i),
            });
        }
        let bounded = bound_evidence(evidence);
        assert_eq!(bounded.len(), EVIDENCE_RETENTION);
        // most recent (highest offset) first
        assert_eq!(bounded[0].last_seen_at, now + chrono::Duration::seconds(29));
    }

    #[test]
    fn test_target_key_prefers_resolved_id() {
        let key = Relationship::target_key(Some("sym:a.ts#foo@1"), None);
        assert_eq!(key, "sym:a.ts#foo@1");
    }

    #[test]
    fn test_target_key_falls_back_to_file_symbol() {
        let to_ref = UnresolvedRef::FileSymbol { file: "b.ts".into(), symbol: "bar".into() };
        let key = Relationship::target_key(None, Some(&to_ref));
        assert_eq!(key, "file:b.ts#bar");
    }

    #[test]
    fn test_is_inferred() {
        let mut rel = sample_relationship();
        rel.confidence = Some(1.0);
        assert!(!rel.is_inferred());
        rel.confidence = Some(0.7);
        assert!(rel.is_inferred());
    }

    fn sample_relationship() -> Relationship {
        let now = Utc::now();
        Relationship {
            id: canonical_id("a", RelationshipType::Calls, "b"),
            from_entity_id: "a".into(),
            to_entity_id: Some("b".into()),
            to_ref: None,
            r#type: RelationshipType::Calls,
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
}
