//! Prompt templates. Callers fully construct every prompt; the providers
//! stay stateless.

/// Extraction prompt: emits `##`-delimited entity / relationship records
/// terminated by `<END>`.
pub fn extraction_prompt(movie_context: &str, chunk_text: &str) -> String {
    format!(
        r#"당신은 영화 리뷰 텍스트에서 엔티티와 관계를 추출하는 전문가입니다.

## 영화 컨텍스트
{movie_context}

## 추출 규칙
1. 아래 텍스트에서 엔티티를 추출하세요. 엔티티 타입: MOVIE, ACTOR, MOVIE_CHARACTER, MOVIE_STAFF, REVIEWER
2. 엔티티 형식: ("entity"|<엔티티 이름>|<엔티티 타입>|<엔티티 설명>)
3. 엔티티 간의 관계를 추출하세요.
4. 관계 형식: ("relationship"|<출발 엔티티>|<출발 타입>|<도착 엔티티>|<도착 타입>|<관계 설명>|<관계 강도 1-10>)
5. 각 레코드는 ## 로 구분하고, 출력 마지막에 <END> 를 붙이세요.
6. 영화 컨텍스트에 있는 공식 명칭을 우선 사용하세요.

## 텍스트
{chunk_text}

## 출력"#
    )
}

/// Summarization prompt: answers with a `{{"entity", "summary"}}` JSON
/// object.
pub fn summarization_prompt(current_time: &str, entity_name: &str, descriptions: &str) -> String {
    format!(
        r#"현재 시간: {current_time}

다음은 '{entity_name}' 엔티티에 대해 수집된 설명들입니다:
{descriptions}

위 설명들을 하나의 일관된 요약으로 정리해주세요.
- 중복된 내용은 한 번만 포함하세요.
- 서로 모순되는 내용이 있으면 더 구체적인 쪽을 선택하세요.
- 3문장 이내로 작성하세요.

다음 JSON 형식으로만 답변하세요:
{{"entity": "{entity_name}", "summary": "<요약>"}}"#
    )
}

/// Edge summarization reuses the same JSON contract with a pair subject.
pub fn relationship_summary_prompt(
    current_time: &str,
    source: &str,
    target: &str,
    descriptions: &str,
) -> String {
    let pair = format!("{} - {}", source, target);
    summarization_prompt(current_time, &pair, descriptions)
}

/// Query-side entity extraction: names only, same record framing as the
/// ingestion extractor.
pub fn query_entity_prompt(user_query: &str) -> String {
    format!(
        r#"다음 질문에서 영화, 배우, 등장인물, 제작진 등의 엔티티 이름을 추출하세요.

형식: ("entity"|<엔티티 이름>) 레코드를 ## 로 구분하고 마지막에 <END> 를 붙이세요.
예시: ##("entity"|코브)##("entity"|인셉션)##<END>

질문: {user_query}

출력:"#
    )
}

/// Natural language -> Cypher over the review graph schema.
pub fn cypher_prompt(user_question: &str) -> String {
    format!(
        r#"당신은 영화 리뷰 그래프 데이터베이스의 Cypher 쿼리 전문가입니다.

## 그래프 스키마
- 노드: MOVIE {{id, name}}, REVIEWER {{id, name}}, ACTOR {{name}}, MOVIE_CHARACTER {{name}}, MOVIE_STAFF {{name}}, __Chunk__ {{id, text}}
- 모든 도메인 노드는 name, description, summary, canonical_id 속성을 가질 수 있습니다.
- 관계: (MOVIE)-[:HAS_CHUNK]->(__Chunk__), (__Chunk__)-[:WRITTEN_BY]->(REVIEWER), (__Chunk__)-[:MENTIONS]->(엔티티), 도메인 엔티티 간 [:RELATIONSHIP {{description, strength}}]
- RELATIONSHIP 은 방향이 없는 것으로 취급하세요: -[r:RELATIONSHIP]- 패턴을 사용하세요.

## 규칙
1. 읽기 전용 MATCH 쿼리만 생성하세요.
2. 결과에 LIMIT 20 을 붙이세요.
3. 다음 JSON 형식으로만 답변하세요: {{"cypher_query": "MATCH ..."}}

질문: {user_question}"#
    )
}

/// Per-entity agent system prompt: the node's own `prompt` property with
/// `{{name}}` substituted, wrapped in the domain-expert framing.
pub fn agent_system_prompt(entity_prompt: &str, entity_name: &str) -> String {
    let filled = entity_prompt.replace("{name}", entity_name);
    format!(
        "당신은 배우 정보 전문가입니다.\n{}\n그래프 검색과 웹 검색 도구를 활용해 정확한 정보를 수집하세요.\n한국어로 답변해주세요.",
        filled
    )
}

pub fn agent_user_prompt(entity_name: &str, user_query: &str) -> String {
    format!(
        "'{}'에 대해 답변해주세요. 유저 질문: {}",
        entity_name, user_query
    )
}

/// System prompt for the final fused answer.
pub fn answer_system_prompt() -> String {
    "당신은 영화 정보 전문가입니다. \
     주어진 컨텍스트를 바탕으로 사용자의 질문에 정확하고 상세하게 답변해주세요. \
     컨텍스트에 없는 정보는 추측하지 마세요. \
     한국어로 답변해주세요."
        .to_string()
}

/// Natural-language summary of rows returned by a Cypher query.
pub fn cypher_summary_prompt(
    current_time: &str,
    user_question: &str,
    cypher_query: &str,
    results_json: &str,
    total_results: usize,
) -> String {
    format!(
        r#"현재 시간: {current_time}

사용자 질문: {user_question}

실행된 Cypher 쿼리:
{cypher_query}

쿼리 결과 ({total_results}개 중 최대 10개):
{results_json}

위의 쿼리 결과를 바탕으로 사용자의 질문에 대한 자연스럽고 이해하기 쉬운 한국어 답변을 작성해주세요.
결과가 없으면 "해당 조건에 맞는 정보를 찾을 수 없습니다"라고 답변하세요."#
    )
}
