use std::sync::Arc;

use tracing::warn;

use cinegraph_core::{EntityLabel, MatchType, ResolutionOutcome, Result, SearchIndex};

use crate::synonym::merge_synonyms;

/// The entity index doubling as a name -> canonical-name directory.
/// Lookup order is fixed: exact name, exact synonym, then (when enabled)
/// partial synonym. An unreachable index degrades to `not_found`; resolution
/// never fails a caller.
pub struct CanonicalRegistry {
    index: Arc<dyn SearchIndex>,
    enable_synonym_partial: bool,
}

impl CanonicalRegistry {
    pub fn new(index: Arc<dyn SearchIndex>, enable_synonym_partial: bool) -> Self {
        Self {
            index,
            enable_synonym_partial,
        }
    }

    /// Resolve a surface name of a given type to its canonical form.
    pub async fn resolve(&self, surface: &str, entity_type: &EntityLabel) -> ResolutionOutcome {
        let surface = surface.trim();
        if surface.is_empty() || entity_type.as_str().trim().is_empty() {
            return ResolutionOutcome::not_found(surface);
        }

        match self.index.search_name_exact(surface, entity_type).await {
            Ok(Some(canonical)) => {
                return ResolutionOutcome {
                    resolved_name: canonical,
                    matched: true,
                    match_type: MatchType::NameExact,
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!("name lookup failed for '{}': {}", surface, e);
                return ResolutionOutcome::not_found(surface);
            }
        }

        match self.index.search_synonym_exact(surface, entity_type).await {
            Ok(Some(canonical)) => {
                return ResolutionOutcome {
                    resolved_name: canonical,
                    matched: true,
                    match_type: MatchType::SynonymExact,
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!("synonym lookup failed for '{}': {}", surface, e);
                return ResolutionOutcome::not_found(surface);
            }
        }

        if self.enable_synonym_partial {
            match self.index.search_synonym_partial(surface, entity_type).await {
                Ok(Some(canonical)) => {
                    return ResolutionOutcome {
                        resolved_name: canonical,
                        matched: true,
                        match_type: MatchType::SynonymPartial,
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("partial synonym lookup failed for '{}': {}", surface, e),
            }
        }

        ResolutionOutcome::not_found(surface)
    }

    /// Fold newly observed surface forms into an entity's synonym set: fetch
    /// the owning document, merge with set semantics, and replace the field
    /// in a single update. Returns the merged set, or None when the entity
    /// has no document yet.
    pub async fn add_synonyms(
        &self,
        name: &str,
        entity_type: &EntityLabel,
        new_synonyms: &[String],
    ) -> Result<Option<Vec<String>>> {
        let Some((doc_id, doc)) = self.index.find_entity_doc(name, Some(entity_type)).await?
        else {
            return Ok(None);
        };
        let merged = merge_synonyms(&doc.synonym, new_synonyms);
        self.index.update_synonyms(&doc_id, &merged).await?;
        Ok(Some(merged))
    }
}
