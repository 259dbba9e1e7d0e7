use std::collections::HashSet;

use cinegraph_core::{ChunkHit, MentionedEntity, NeighborRow};

use crate::agentic::AgenticOutcome;

const MAX_CHUNK_CHARS: usize = 1000;
const MAX_RELATIONSHIPS: usize = 40;

/// Assemble the single grounded context handed to the answering model:
/// question, top chunks (truncated), entity bullets, relationship bullets
/// (deduped by unordered pair), the structured-graph summary, and agentic
/// outputs grouped by entity.
pub fn build_context(
    question: &str,
    chunks: &[ChunkHit],
    entities: &[MentionedEntity],
    relationships: &[NeighborRow],
    graph_summary: Option<&str>,
    agentic: &[AgenticOutcome],
) -> String {
    let mut context = format!("## 사용자 질문\n{}\n\n", question);

    if !chunks.is_empty() {
        context.push_str("## 관련 텍스트\n");
        for (i, chunk) in chunks.iter().enumerate() {
            let text: String = chunk.context.chars().take(MAX_CHUNK_CHARS).collect();
            context.push_str(&format!("{}. {}\n\n", i + 1, text));
        }
    }

    if !entities.is_empty() {
        context.push_str("## 관련 엔티티\n");
        let mut seen = HashSet::new();
        for entity in entities {
            if !seen.insert(entity.name.clone()) {
                continue;
            }
            let description: String = entity.description.join(", ").chars().take(200).collect();
            if description.is_empty() {
                context.push_str(&format!("- {} ({})\n", entity.name, entity.label));
            } else {
                context.push_str(&format!(
                    "- {} ({}): {}\n",
                    entity.name, entity.label, description
                ));
            }
        }
        context.push('\n');
    }

    if !relationships.is_empty() {
        context.push_str("## 엔티티 관계\n");
        let mut seen = HashSet::new();
        let mut written = 0usize;
        for rel in relationships {
            let mut pair = [rel.source.as_str(), rel.target.as_str()];
            pair.sort_unstable();
            if !seen.insert((pair[0].to_string(), pair[1].to_string(), rel.relationship.clone())) {
                continue;
            }
            let description: String = rel.rel_description.join(", ").chars().take(100).collect();
            if description.is_empty() {
                context.push_str(&format!(
                    "- {} --[{}]--> {} ({})\n",
                    rel.source, rel.relationship, rel.target, rel.target_label
                ));
            } else {
                context.push_str(&format!(
                    "- {} --[{}]--> {} ({}): {}\n",
                    rel.source, rel.relationship, rel.target, rel.target_label, description
                ));
            }
            written += 1;
            if written >= MAX_RELATIONSHIPS {
                break;
            }
        }
        context.push('\n');
    }

    if let Some(summary) = graph_summary.filter(|s| !s.trim().is_empty()) {
        context.push_str(&format!("## 그래프 검색 결과\n{}\n\n", summary));
    }

    let successful: Vec<&AgenticOutcome> = agentic.iter().filter(|a| a.success).collect();
    if !successful.is_empty() {
        context.push_str("## 엔티티 정보 (Agentic)\n");
        for outcome in successful {
            context.push_str(&format!("### {}\n{}\n\n", outcome.entity, outcome.result));
        }
    }

    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinegraph_core::EntityLabel;

    fn rel(source: &str, target: &str) -> NeighborRow {
        NeighborRow {
            source: source.to_string(),
            relationship: "RELATIONSHIP".to_string(),
            target: target.to_string(),
            target_label: EntityLabel::MovieCharacter,
            target_description: Vec::new(),
            rel_description: vec!["부부".to_string()],
        }
    }

    #[test]
    fn relationships_dedup_by_unordered_pair() {
        let context = build_context(
            "질문",
            &[],
            &[],
            &[rel("코브", "멜"), rel("멜", "코브")],
            None,
            &[],
        );
        assert_eq!(context.matches("부부").count(), 1);
    }

    #[test]
    fn long_chunks_are_truncated() {
        let chunks = vec![ChunkHit {
            doc_id: "d".to_string(),
            canonical_id: "c".to_string(),
            context: "가".repeat(5000),
            score: 1.0,
        }];
        let context = build_context("질문", &chunks, &[], &[], None, &[]);
        assert!(context.chars().count() < 1200);
    }

    #[test]
    fn failed_agents_are_omitted() {
        let agentic = vec![
            AgenticOutcome {
                entity: "전지현".to_string(),
                result: "최신 근황".to_string(),
                success: true,
            },
            AgenticOutcome {
                entity: "실패".to_string(),
                result: "오류".to_string(),
                success: false,
            },
        ];
        let context = build_context("질문", &[], &[], &[], Some("그래프 요약"), &agentic);
        assert!(context.contains("전지현"));
        assert!(!context.contains("실패"));
        assert!(context.contains("그래프 요약"));
    }
}
