use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use cinegraph_core::{EntityLabel, ExtractedEntity, ExtractedRelationship, Strength};

const END_MARKER: &str = "<END>";

static ENTITY_RECORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\("entity"\|([^)]+)\)"#).expect("static regex"));
static JSON_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```json\s*(.*?)\s*```").expect("static regex"));
static SUMMARY_OBJECT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)\{[^{}]*"entity"[^{}]*"summary"[^{}]*\}"#).expect("static regex")
});
static CYPHER_OBJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)\{[^{}]*"cypher_query"[^{}]*\}"#).expect("static regex"));
static CYPHER_BLOCKS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?si)```cypher\s*(.*?)\s*```").expect("static regex"),
        Regex::new(r"(?si)```\s*(MATCH.*?)\s*```").expect("static regex"),
        Regex::new(r"(?si)(MATCH.*?)(?:\n\n|\z)").expect("static regex"),
    ]
});

fn strip_end_marker(output: &str) -> String {
    output.replace(END_MARKER, "").trim().to_string()
}

/// Parse the extraction model's delimited record stream into entity and
/// relationship lists. Delimiters are inferred from presence when not
/// given: `##`, `|`, newline for records; `|`, `;`, tab for tuples.
/// Malformed records are skipped; order is preserved.
pub fn parse_extraction_output(
    output: &str,
) -> (Vec<ExtractedEntity>, Vec<ExtractedRelationship>) {
    parse_extraction_output_with(output, None, None)
}

pub fn parse_extraction_output_with(
    output: &str,
    record_delimiter: Option<&str>,
    tuple_delimiter: Option<&str>,
) -> (Vec<ExtractedEntity>, Vec<ExtractedRelationship>) {
    let output = strip_end_marker(output);

    let record_delimiter = record_delimiter.unwrap_or_else(|| {
        if output.contains("##") {
            "##"
        } else if output.contains('|') {
            "|"
        } else {
            "\n"
        }
    });
    let tuple_delimiter = tuple_delimiter.unwrap_or_else(|| {
        if output.contains('|') {
            "|"
        } else if output.contains(';') {
            ";"
        } else {
            "\t"
        }
    });

    let mut entities = Vec::new();
    let mut relationships = Vec::new();

    for raw in output.split(record_delimiter) {
        let mut record = raw.trim();
        if record.is_empty() {
            continue;
        }
        if record.starts_with('(') && record.ends_with(')') {
            record = record[1..record.len() - 1].trim();
        }

        let tokens: Vec<&str> = record.split(tuple_delimiter).map(str::trim).collect();
        let Some(first) = tokens.first() else { continue };
        let record_type = first
            .trim_matches(|c| c == ' ' || c == '"' || c == '\'')
            .to_lowercase();

        match (record_type.as_str(), tokens.len()) {
            ("entity", 4) => entities.push(ExtractedEntity {
                entity_name: tokens[1].to_string(),
                entity_type: tokens[2].parse().expect("infallible"),
                entity_description: tokens[3].to_string(),
            }),
            ("relationship", 7) => relationships.push(ExtractedRelationship {
                source_entity: tokens[1].to_string(),
                source_type: tokens[2].parse().expect("infallible"),
                target_entity: tokens[3].to_string(),
                target_type: tokens[4].parse().expect("infallible"),
                relationship_description: tokens[5].to_string(),
                relationship_strength: Strength::parse(tokens[6]),
            }),
            // Legacy five-field form without endpoint types
            ("relationship", 5) => relationships.push(ExtractedRelationship {
                source_entity: tokens[1].to_string(),
                source_type: EntityLabel::Other(String::new()),
                target_entity: tokens[2].to_string(),
                target_type: EntityLabel::Other(String::new()),
                relationship_description: tokens[3].to_string(),
                relationship_strength: Strength::parse(tokens[4]),
            }),
            _ => {}
        }
    }

    (entities, relationships)
}

/// Render records in the canonical wire form. Inverse of
/// [`parse_extraction_output`] for well-formed inputs.
pub fn render_extraction_records(
    entities: &[ExtractedEntity],
    relationships: &[ExtractedRelationship],
) -> String {
    let mut parts = Vec::new();
    for e in entities {
        parts.push(format!(
            "(\"entity\"|{}|{}|{})",
            e.entity_name,
            e.entity_type.as_str(),
            e.entity_description
        ));
    }
    for r in relationships {
        let strength = match &r.relationship_strength {
            Strength::Int(v) => v.to_string(),
            Strength::Float(v) => v.to_string(),
            Strength::Raw(s) => s.clone(),
        };
        parts.push(format!(
            "(\"relationship\"|{}|{}|{}|{}|{}|{})",
            r.source_entity,
            r.source_type.as_str(),
            r.target_entity,
            r.target_type.as_str(),
            r.relationship_description,
            strength
        ));
    }
    format!("{}{}", parts.join("##"), END_MARKER)
}

/// Extract entity surface names from the query-side model output:
/// `##("entity"|코브)##("entity"|멜)##<END>` and the like.
pub fn parse_search_context(output: &str) -> Vec<String> {
    let output = strip_end_marker(output);
    ENTITY_RECORD
        .captures_iter(&output)
        .filter_map(|cap| {
            let name = cap.get(1)?.as_str().trim();
            if name.is_empty() {
                None
            } else {
                Some(name.to_string())
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SummaryOutput {
    #[serde(default)]
    pub entity: String,
    pub summary: String,
}

/// Parse the summarization model's `{"entity": ..., "summary": ...}` JSON,
/// tolerating a fenced ```json block or bare JSON in surrounding prose.
pub fn parse_summary_output(output: &str) -> Option<SummaryOutput> {
    let json_str = if let Some(cap) = JSON_BLOCK.captures(output) {
        cap.get(1)?.as_str().to_string()
    } else {
        SUMMARY_OBJECT.find(output)?.as_str().to_string()
    };
    serde_json::from_str(&json_str).ok()
}

/// Parse a Cypher query out of the model's response: a JSON object with
/// `cypher_query`, a fenced ```cypher block, a fenced block starting with
/// MATCH, or a bare MATCH statement.
pub fn parse_cypher_output(output: &str) -> Option<String> {
    if let Some(cap) = JSON_BLOCK.captures(output) {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(cap.get(1)?.as_str()) {
            if let Some(query) = value.get("cypher_query").and_then(|v| v.as_str()) {
                return Some(query.trim().to_string());
            }
        }
    }

    for pattern in CYPHER_BLOCKS.iter() {
        if let Some(cap) = pattern.captures(output) {
            let query = cap.get(1)?.as_str().trim();
            if !query.is_empty() {
                return Some(query.to_string());
            }
        }
    }

    if let Some(found) = CYPHER_OBJECT.find(output) {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(found.as_str()) {
            if let Some(query) = value.get("cypher_query").and_then(|v| v.as_str()) {
                return Some(query.trim().to_string());
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_entities_and_relationships() {
        let output = "##(\"entity\"|코브|MOVIE_CHARACTER|드림팀의 리더)##\
                      (\"entity\"|멜|MOVIE_CHARACTER|코브의 아내)##\
                      (\"relationship\"|코브|MOVIE_CHARACTER|멜|MOVIE_CHARACTER|부부 관계|9)##<END>";
        let (entities, relationships) = parse_extraction_output(output);
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].entity_name, "코브");
        assert_eq!(entities[0].entity_type, EntityLabel::MovieCharacter);
        assert_eq!(relationships.len(), 1);
        assert_eq!(relationships[0].relationship_strength, Strength::Int(9));
    }

    #[test]
    fn legacy_five_field_relationship_is_accepted() {
        let output = "(\"relationship\"|코브|멜|부부 관계|7.5)";
        let (entities, relationships) = parse_extraction_output(output);
        assert!(entities.is_empty());
        assert_eq!(relationships.len(), 1);
        assert_eq!(relationships[0].source_type, EntityLabel::Other(String::new()));
        assert_eq!(relationships[0].relationship_strength, Strength::Float(7.5));
    }

    #[test]
    fn malformed_records_are_skipped_not_fatal() {
        let output = "##(\"entity\"|only|three)##(\"entity\"|코브|ACTOR|desc)##garbage##";
        let (entities, relationships) = parse_extraction_output(output);
        assert_eq!(entities.len(), 1);
        assert!(relationships.is_empty());
    }

    #[test]
    fn empty_output_yields_nothing() {
        let (entities, relationships) = parse_extraction_output("  <END>  ");
        assert!(entities.is_empty());
        assert!(relationships.is_empty());
    }

    #[test]
    fn render_then_parse_round_trips() {
        let entities = vec![ExtractedEntity {
            entity_name: "Tom Hardy".to_string(),
            entity_type: EntityLabel::Actor,
            entity_description: "played Eames".to_string(),
        }];
        let relationships = vec![ExtractedRelationship {
            source_entity: "Tom Hardy".to_string(),
            source_type: EntityLabel::Actor,
            target_entity: "Eames".to_string(),
            target_type: EntityLabel::MovieCharacter,
            relationship_description: "portrays".to_string(),
            relationship_strength: Strength::Int(8),
        }];
        let rendered = render_extraction_records(&entities, &relationships);
        let (parsed_entities, parsed_relationships) = parse_extraction_output(&rendered);
        assert_eq!(parsed_entities, entities);
        assert_eq!(parsed_relationships, relationships);
    }

    #[test]
    fn search_context_extracts_names() {
        let output = "##(\"entity\"|코브)##(\"entity\"|멜)##<END>";
        assert_eq!(parse_search_context(output), vec!["코브", "멜"]);
        assert!(parse_search_context("no entities here").is_empty());
    }

    #[test]
    fn summary_parses_from_fenced_and_bare_json() {
        let fenced = "Here you go:\n```json\n{\"entity\": \"코브\", \"summary\": \"드림팀 리더\"}\n```";
        let parsed = parse_summary_output(fenced).unwrap();
        assert_eq!(parsed.entity, "코브");
        assert_eq!(parsed.summary, "드림팀 리더");

        let bare = "result {\"entity\": \"멜\", \"summary\": \"코브의 아내\"} done";
        let parsed = parse_summary_output(bare).unwrap();
        assert_eq!(parsed.summary, "코브의 아내");

        assert!(parse_summary_output("no json at all").is_none());
    }

    #[test]
    fn cypher_parses_from_every_supported_shape() {
        let fenced_json = "```json\n{\"cypher_query\": \"MATCH (n) RETURN n\"}\n```";
        assert_eq!(
            parse_cypher_output(fenced_json).as_deref(),
            Some("MATCH (n) RETURN n")
        );

        let fenced_cypher = "```cypher\nMATCH (a:ACTOR) RETURN a.name\n```";
        assert_eq!(
            parse_cypher_output(fenced_cypher).as_deref(),
            Some("MATCH (a:ACTOR) RETURN a.name")
        );

        let bare = "MATCH (m:MOVIE) RETURN m.name\n\nThat query lists movies.";
        assert_eq!(
            parse_cypher_output(bare).as_deref(),
            Some("MATCH (m:MOVIE) RETURN m.name")
        );

        assert!(parse_cypher_output("I cannot answer that").is_none());
    }
}
