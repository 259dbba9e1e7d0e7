use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{info, warn};

use cinegraph_core::{EntityDoc, Result};

/// One review transcript with its provenance.
#[derive(Debug, Clone)]
pub struct ReviewItem {
    pub path: PathBuf,
    pub transcript: String,
    pub movie_id: String,
    pub reviewer: String,
}

/// Source of the domain catalog: review transcripts per movie plus the
/// movie context handed to the extraction model. Loading formats other
/// than the JSON layout live behind this seam.
pub trait CatalogSource: Send + Sync {
    fn load_reviews(&self) -> Result<Vec<ReviewItem>>;

    /// Title / director / cast context string for a movie, when known.
    fn movie_context(&self, movie_id: &str) -> Option<String>;
}

/// JSON-directory catalog: one `<movie>.json` per film carrying
/// `movie_title`, a `review` path list, and optionally `director` and a
/// `cast` array of `{actor, character}` pairs. Review files carry
/// `refined_transcript` and `channel_name`.
pub struct JsonCatalog {
    cast_dir: PathBuf,
    /// Base for `./`-relative review paths inside catalog files.
    root_dir: PathBuf,
}

impl JsonCatalog {
    pub fn new(cast_dir: impl Into<PathBuf>) -> Self {
        let cast_dir = cast_dir.into();
        let root_dir = cast_dir
            .parent()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self { cast_dir, root_dir }
    }

    pub fn with_root(cast_dir: impl Into<PathBuf>, root_dir: impl Into<PathBuf>) -> Self {
        Self {
            cast_dir: cast_dir.into(),
            root_dir: root_dir.into(),
        }
    }

    fn catalog_files(&self) -> Result<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = fs::read_dir(&self.cast_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|e| e == "json"))
            .collect();
        files.sort();
        Ok(files)
    }

    fn resolve_review_path(&self, raw: &str) -> PathBuf {
        if let Some(stripped) = raw.strip_prefix("./") {
            self.root_dir.join(stripped)
        } else {
            PathBuf::from(raw)
        }
    }
}

impl CatalogSource for JsonCatalog {
    fn load_reviews(&self) -> Result<Vec<ReviewItem>> {
        let files = self.catalog_files()?;
        info!("found {} catalog files", files.len());

        let mut items = Vec::new();
        for file in &files {
            let data: Value = match fs::read(file).map(|b| serde_json::from_slice(&b)) {
                Ok(Ok(v)) => v,
                _ => {
                    warn!("skipping unreadable catalog file {:?}", file);
                    continue;
                }
            };
            let Some(movie_title) = data["movie_title"].as_str() else {
                warn!("catalog file {:?} has no movie_title", file);
                continue;
            };

            for raw_path in data["review"].as_array().into_iter().flatten() {
                let Some(raw_path) = raw_path.as_str() else { continue };
                let path = self.resolve_review_path(raw_path);
                let review: Value = match fs::read(&path).map(|b| serde_json::from_slice(&b)) {
                    Ok(Ok(v)) => v,
                    _ => {
                        warn!("skipping unreadable review {:?}", path);
                        continue;
                    }
                };
                let transcript = review["refined_transcript"].as_str().unwrap_or_default();
                if transcript.is_empty() {
                    warn!("no refined_transcript in {:?}, skipping", path);
                    continue;
                }
                let reviewer = review["channel_name"]
                    .as_str()
                    .unwrap_or("unknown")
                    .replace(['/', '\\'], "_");
                items.push(ReviewItem {
                    path,
                    transcript: transcript.to_string(),
                    movie_id: movie_title.to_string(),
                    reviewer,
                });
            }
        }
        info!("loaded {} reviews", items.len());
        Ok(items)
    }

    fn movie_context(&self, movie_id: &str) -> Option<String> {
        let files = self.catalog_files().ok()?;
        for file in files {
            let data: Value = serde_json::from_slice(&fs::read(&file).ok()?).ok()?;
            if data["movie_title"].as_str() != Some(movie_id) {
                continue;
            }

            let mut context = format!("영화: {}", movie_id);
            if let Some(director) = data["director"].as_str() {
                context.push_str(&format!("\n감독: {}", director));
            }
            if let Some(cast) = data["cast"].as_array() {
                let members: Vec<String> = cast
                    .iter()
                    .filter_map(|member| {
                        let actor = member["actor"].as_str()?;
                        match member["character"].as_str() {
                            Some(character) => Some(format!("{}({})", actor, character)),
                            None => Some(actor.to_string()),
                        }
                    })
                    .collect();
                if !members.is_empty() {
                    context.push_str(&format!("\n출연: {}", members.join(", ")));
                }
            }
            return Some(context);
        }
        None
    }
}

/// Load per-entity index documents from a directory of `{"entity": ...}`
/// JSON files; the document id is the filename stem.
pub fn load_entity_docs(dir: &Path) -> Result<Vec<(String, EntityDoc)>> {
    let mut docs = Vec::new();
    if !dir.exists() {
        warn!("entity document directory not found: {:?}", dir);
        return Ok(docs);
    }

    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|e| e == "json"))
        .collect();
    files.sort();

    for file in files {
        let doc_id = file
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let value: Value = match fs::read(&file).map(|b| serde_json::from_slice(&b)) {
            Ok(Ok(v)) => v,
            _ => {
                warn!("skipping unreadable entity doc {:?}", file);
                continue;
            }
        };
        match serde_json::from_value::<EntityDoc>(value["entity"].clone()) {
            Ok(doc) => docs.push((doc_id, doc)),
            Err(e) => warn!("skipping malformed entity doc {:?}: {}", file, e),
        }
    }
    Ok(docs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write_json(path: &Path, value: &Value) {
        fs::write(path, serde_json::to_vec_pretty(value).unwrap()).unwrap();
    }

    #[test]
    fn reviews_resolve_relative_paths_and_sanitize_reviewers() {
        let root = tempfile::tempdir().unwrap();
        let cast_dir = root.path().join("data").join("movie_cast");
        let review_dir = root.path().join("data").join("review");
        fs::create_dir_all(&cast_dir).unwrap();
        fs::create_dir_all(&review_dir).unwrap();

        write_json(
            &review_dir.join("r1.json"),
            &json!({
                "refined_transcript": "리뷰 본문입니다.",
                "channel_name": "무비/클립"
            }),
        );
        write_json(
            &cast_dir.join("assassination.json"),
            &json!({
                "movie_title": "암살",
                "review": ["./data/review/r1.json"],
                "director": "최동훈",
                "cast": [{"actor": "전지현", "character": "안옥윤"}]
            }),
        );

        let catalog = JsonCatalog::with_root(&cast_dir, root.path());
        let reviews = catalog.load_reviews().unwrap();
        assert_eq!(reviews.len(), 1);
        assert_eq!(reviews[0].movie_id, "암살");
        assert_eq!(reviews[0].reviewer, "무비_클립");

        let context = catalog.movie_context("암살").unwrap();
        assert!(context.contains("최동훈"));
        assert!(context.contains("전지현(안옥윤)"));
        assert!(catalog.movie_context("없는 영화").is_none());
    }

    #[test]
    fn empty_transcripts_are_skipped() {
        let root = tempfile::tempdir().unwrap();
        let cast_dir = root.path().join("movie_cast");
        fs::create_dir_all(&cast_dir).unwrap();
        let review = root.path().join("empty.json");
        write_json(&review, &json!({"refined_transcript": "", "channel_name": "x"}));
        write_json(
            &cast_dir.join("m.json"),
            &json!({"movie_title": "m", "review": [review.to_str().unwrap()]}),
        );

        let catalog = JsonCatalog::with_root(&cast_dir, root.path());
        assert!(catalog.load_reviews().unwrap().is_empty());
    }

    #[test]
    fn entity_docs_load_with_filename_ids() {
        let dir = tempfile::tempdir().unwrap();
        write_json(
            &dir.path().join("Jun_Ji_hyun_ACTOR_0001.json"),
            &json!({
                "entity": {
                    "name": "전지현",
                    "entity_type": "ACTOR",
                    "summary": "한국 배우",
                    "synonym": ["지안나 전"]
                }
            }),
        );
        write_json(&dir.path().join("broken.json"), &json!({"entity": {"nope": 1}}));

        let docs = load_entity_docs(dir.path()).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].0, "Jun_Ji_hyun_ACTOR_0001");
        assert_eq!(docs[0].1.name, "전지현");
    }
}
