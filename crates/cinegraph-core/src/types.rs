use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Fixed dimension of every vector in the system. The index mapping, the
/// embedding client and the mapping validator all cite this constant; a
/// mismatch anywhere is a fatal configuration error.
pub const EMBEDDING_DIM: usize = 1024;

/// Reserved label for provenance chunk nodes.
pub const CHUNK_LABEL: &str = "__Chunk__";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EntityLabel {
    Movie,
    Reviewer,
    Actor,
    MovieCharacter,
    MovieStaff,
    Other(String),
}

impl EntityLabel {
    pub fn as_str(&self) -> &str {
        match self {
            EntityLabel::Movie => "MOVIE",
            EntityLabel::Reviewer => "REVIEWER",
            EntityLabel::Actor => "ACTOR",
            EntityLabel::MovieCharacter => "MOVIE_CHARACTER",
            EntityLabel::MovieStaff => "MOVIE_STAFF",
            EntityLabel::Other(s) => s.as_str(),
        }
    }

    /// Provenance labels are excluded from summarization and publishing.
    pub fn is_provenance(&self) -> bool {
        matches!(self, EntityLabel::Movie | EntityLabel::Reviewer)
    }

    /// Labels are substituted into query text, so they must stay within a
    /// closed identifier alphabet. `Other` values carrying anything else are
    /// rejected before they reach the store.
    pub fn is_valid_identifier(&self) -> bool {
        let s = self.as_str();
        !s.is_empty()
            && s.chars().next().map_or(false, |c| c.is_ascii_alphabetic() || c == '_')
            && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    }
}

impl fmt::Display for EntityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntityLabel {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.trim() {
            "MOVIE" => EntityLabel::Movie,
            "REVIEWER" => EntityLabel::Reviewer,
            "ACTOR" => EntityLabel::Actor,
            "MOVIE_CHARACTER" => EntityLabel::MovieCharacter,
            "MOVIE_STAFF" => EntityLabel::MovieStaff,
            other => EntityLabel::Other(other.to_string()),
        })
    }
}

impl From<String> for EntityLabel {
    fn from(s: String) -> Self {
        s.parse().expect("infallible")
    }
}

impl From<EntityLabel> for String {
    fn from(l: EntityLabel) -> Self {
        l.as_str().to_string()
    }
}

/// Relationship strength as emitted by the extraction model. Integral values
/// stay integers, other numerics become floats, anything unparseable is kept
/// verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Strength {
    Int(i64),
    Float(f64),
    Raw(String),
}

impl Strength {
    pub fn parse(token: &str) -> Self {
        let token = token.trim();
        match token.parse::<f64>() {
            Ok(v) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => Strength::Int(v as i64),
            Ok(v) => Strength::Float(v),
            Err(_) => Strength::Raw(token.to_string()),
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            Strength::Int(v) => *v as f64,
            Strength::Float(v) => *v,
            Strength::Raw(s) => s.trim().parse().unwrap_or(0.0),
        }
    }
}

impl Default for Strength {
    fn default() -> Self {
        Strength::Int(0)
    }
}

/// An entity record parsed from the extraction model's delimited output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub entity_name: String,
    pub entity_type: EntityLabel,
    pub entity_description: String,
}

/// A relationship record parsed from the extraction model's delimited output.
/// Types may be empty in the legacy five-field form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRelationship {
    pub source_entity: String,
    pub source_type: EntityLabel,
    pub target_entity: String,
    pub target_type: EntityLabel,
    pub relationship_description: String,
    pub relationship_strength: Strength,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    NameExact,
    SynonymExact,
    SynonymPartial,
    NotFound,
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MatchType::NameExact => "name_exact",
            MatchType::SynonymExact => "synonym_exact",
            MatchType::SynonymPartial => "synonym_partial",
            MatchType::NotFound => "not_found",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of resolving one surface name against the canonical registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionOutcome {
    pub resolved_name: String,
    pub matched: bool,
    pub match_type: MatchType,
}

impl ResolutionOutcome {
    pub fn not_found(surface: &str) -> Self {
        Self {
            resolved_name: surface.to_string(),
            matched: false,
            match_type: MatchType::NotFound,
        }
    }
}

/// One entry of a chunk's resolution map, keyed by the original surface name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionEntry {
    pub resolved_name: String,
    pub entity_type: EntityLabel,
    pub matched: bool,
    pub match_type: MatchType,
}

/// surface name -> canonical outcome, persisted with the chunk artifact and
/// consumed by the graph writer to canonicalize endpoints.
pub type ResolutionMap = BTreeMap<String, ResolutionEntry>;

/// Durable per-chunk artifact. One JSON file per chunk under the working
/// directory; later stages append `entities`, `relationships` and
/// `entity_resolution`, which makes the pipeline restartable at any stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkArtifact {
    pub chunk_hash: String,
    pub chunk_id: String,
    pub user_query: String,
    pub movie_id: String,
    pub reviewer: String,
    pub chunk_index: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<ExtractedEntity>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationships: Vec<ExtractedRelationship>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub entity_resolution: ResolutionMap,
}

impl ChunkArtifact {
    /// Canonical name for an extracted surface name, falling back to the
    /// surface form when the resolution map has no entry.
    pub fn canonical_name<'a>(&'a self, surface: &'a str) -> &'a str {
        self.entity_resolution
            .get(surface)
            .map(|e| e.resolved_name.as_str())
            .unwrap_or(surface)
    }
}

/// Result of a node upsert in the graph store.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityUpsert {
    pub canonical_id: String,
    pub was_existing: bool,
}

/// A node needing a summary: non-empty descriptions, no summary yet.
#[derive(Debug, Clone)]
pub struct NodeSummaryCandidate {
    pub name: String,
    pub label: EntityLabel,
    pub descriptions: Vec<String>,
}

/// An edge needing a summary.
#[derive(Debug, Clone)]
pub struct EdgeSummaryCandidate {
    pub source_name: String,
    pub target_name: String,
    pub descriptions: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CanonicalIdAssignment {
    pub canonical_id: String,
    pub created_new: bool,
}

/// An entity ready to publish into the search index.
#[derive(Debug, Clone)]
pub struct SummarizedEntity {
    pub name: String,
    pub label: EntityLabel,
    pub summary: String,
    pub canonical_id: String,
}

/// A provenance chunk node as stored in the graph.
#[derive(Debug, Clone)]
pub struct ChunkNode {
    pub id: String,
    pub text: String,
}

/// An entity reached from a chunk via MENTIONS.
#[derive(Debug, Clone)]
pub struct MentionedEntity {
    pub name: String,
    pub label: EntityLabel,
    pub description: Vec<String>,
    pub canonical_id: Option<String>,
}

/// One row of a neighborhood expansion around an entity.
#[derive(Debug, Clone)]
pub struct NeighborRow {
    pub source: String,
    pub relationship: String,
    pub target: String,
    pub target_label: EntityLabel,
    pub target_description: Vec<String>,
    pub rel_description: Vec<String>,
}

/// Per-node agentic metadata looked up at query time.
#[derive(Debug, Clone)]
pub struct EntityPromptInfo {
    pub label: EntityLabel,
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub total_nodes: u64,
    pub total_relationships: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_round_trips_through_wire_form() {
        for s in ["MOVIE", "REVIEWER", "ACTOR", "MOVIE_CHARACTER", "MOVIE_STAFF"] {
            let label: EntityLabel = s.parse().unwrap();
            assert_eq!(label.as_str(), s);
        }
        let other: EntityLabel = "DIRECTOR".parse().unwrap();
        assert_eq!(other, EntityLabel::Other("DIRECTOR".to_string()));
    }

    #[test]
    fn label_identifier_validation_rejects_injection() {
        let bad: EntityLabel = "ACTOR) DETACH DELETE (n".parse().unwrap();
        assert!(!bad.is_valid_identifier());
        let good: EntityLabel = "MOVIE_STAFF".parse().unwrap();
        assert!(good.is_valid_identifier());
    }

    #[test]
    fn strength_parsing_coerces_like_the_extractor() {
        assert_eq!(Strength::parse("8"), Strength::Int(8));
        assert_eq!(Strength::parse("8.0"), Strength::Int(8));
        assert_eq!(Strength::parse("7.5"), Strength::Float(7.5));
        assert_eq!(Strength::parse("strong"), Strength::Raw("strong".to_string()));
        assert_eq!(Strength::parse("strong").as_f64(), 0.0);
    }

    #[test]
    fn artifact_canonical_name_falls_back_to_surface() {
        let mut artifact = ChunkArtifact {
            chunk_hash: "abc".into(),
            chunk_id: "rev_abc_1".into(),
            user_query: String::new(),
            movie_id: "Inception".into(),
            reviewer: "rev".into(),
            chunk_index: 1,
            entities: Vec::new(),
            relationships: Vec::new(),
            entity_resolution: BTreeMap::new(),
        };
        artifact.entity_resolution.insert(
            "디카프리오".to_string(),
            ResolutionEntry {
                resolved_name: "Leonardo DiCaprio".to_string(),
                entity_type: EntityLabel::Actor,
                matched: true,
                match_type: MatchType::SynonymExact,
            },
        );
        assert_eq!(artifact.canonical_name("디카프리오"), "Leonardo DiCaprio");
        assert_eq!(artifact.canonical_name("Unknown Person"), "Unknown Person");
    }

    #[test]
    fn later_stage_fields_are_omitted_until_populated() {
        let artifact = ChunkArtifact {
            chunk_hash: "abc".into(),
            chunk_id: "rev_abc_1".into(),
            user_query: "text".into(),
            movie_id: "m".into(),
            reviewer: "rev".into(),
            chunk_index: 1,
            entities: Vec::new(),
            relationships: Vec::new(),
            entity_resolution: BTreeMap::new(),
        };
        let json = serde_json::to_string(&artifact).unwrap();
        assert!(!json.contains("entities"));
        assert!(!json.contains("entity_resolution"));
    }
}
