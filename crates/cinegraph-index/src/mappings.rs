use serde_json::{json, Value};

use cinegraph_core::EMBEDDING_DIM;

/// Shared index settings: KNN enabled, morphology-aware analysis for the
/// domain language (nori), particles stripped before indexing.
fn index_settings() -> Value {
    json!({
        "index": {
            "knn": true,
            "knn.algo_param.ef_search": 100,
            "number_of_shards": 3,
            "number_of_replicas": 2,
            "analysis": {
                "analyzer": {
                    "nori_analyzer": {
                        "tokenizer": "nori_tokenizer",
                        "filter": ["nori_stop", "lowercase"]
                    }
                },
                "filter": {
                    "nori_stop": {
                        "type": "nori_part_of_speech",
                        "stoptags": ["J", "JKS", "JKB", "JKO", "JKG", "JKC", "JKV", "JKQ", "JX", "JC"]
                    }
                }
            }
        }
    })
}

fn knn_vector_field() -> Value {
    json!({
        "type": "knn_vector",
        "dimension": EMBEDDING_DIM,
        "method": {
            "name": "hnsw",
            "space_type": "l2",
            "engine": "faiss",
            "parameters": {
                "ef_construction": 128,
                "m": 16
            }
        }
    })
}

/// Mapping for the entity index: the synonym directory. `synonym` is a
/// keyword field with an analyzed `.text` subfield so both exact term and
/// morphology-aware matches work against the same data.
pub fn entity_index_body() -> Value {
    json!({
        "settings": index_settings(),
        "mappings": {
            "properties": {
                "entity": {
                    "properties": {
                        "name": {
                            "type": "text",
                            "analyzer": "nori_analyzer",
                            "fields": {
                                "keyword": { "type": "keyword" }
                            }
                        },
                        "synonym": {
                            "type": "keyword",
                            "fields": {
                                "text": {
                                    "type": "text",
                                    "analyzer": "nori_analyzer"
                                }
                            }
                        },
                        "entity_type": { "type": "keyword" },
                        "summary": {
                            "type": "text",
                            "analyzer": "nori_analyzer"
                        },
                        "summary_vec": knn_vector_field(),
                        "canonical_id": { "type": "keyword" }
                    }
                }
            }
        }
    })
}

/// Mapping for the chunk index mirroring graph chunks for vector retrieval.
pub fn chunk_index_body() -> Value {
    json!({
        "settings": index_settings(),
        "mappings": {
            "properties": {
                "chunk": {
                    "properties": {
                        "context": {
                            "type": "keyword",
                            "fields": {
                                "text": {
                                    "type": "text",
                                    "analyzer": "nori_analyzer"
                                }
                            }
                        },
                        "context_vec": knn_vector_field(),
                        "canonical_id": { "type": "keyword" }
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_fields_carry_the_fixed_dimension() {
        let entity = entity_index_body();
        let dim = entity["mappings"]["properties"]["entity"]["properties"]["summary_vec"]
            ["dimension"]
            .as_u64()
            .unwrap();
        assert_eq!(dim as usize, EMBEDDING_DIM);

        let chunk = chunk_index_body();
        let dim = chunk["mappings"]["properties"]["chunk"]["properties"]["context_vec"]
            ["dimension"]
            .as_u64()
            .unwrap();
        assert_eq!(dim as usize, EMBEDDING_DIM);
    }

    #[test]
    fn synonym_field_is_keyword_with_analyzed_subfield() {
        let entity = entity_index_body();
        let synonym = &entity["mappings"]["properties"]["entity"]["properties"]["synonym"];
        assert_eq!(synonym["type"], "keyword");
        assert_eq!(synonym["fields"]["text"]["analyzer"], "nori_analyzer");
    }
}
