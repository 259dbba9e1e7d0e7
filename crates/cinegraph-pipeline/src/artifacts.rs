use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use cinegraph_core::{ChunkArtifact, Result};

const ALL_CHUNKS_FILE: &str = "all_chunks.json";

/// On-disk store of one JSON file per chunk (filename = `chunk_id.json`).
/// The artifacts are ground truth for re-ingestion: every stage after
/// chunking reads them back and rewrites them in place.
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Remove every artifact file; used before a fresh chunking run.
    pub fn clear(&self) -> Result<()> {
        if self.dir.exists() {
            for entry in fs::read_dir(&self.dir)? {
                let path = entry?.path();
                if path.extension().is_some_and(|e| e == "json") {
                    fs::remove_file(path)?;
                }
            }
            info!("cleared artifact directory {:?}", self.dir);
        }
        Ok(())
    }

    pub fn save(&self, artifact: &ChunkArtifact) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{}.json", artifact.chunk_id));
        fs::write(&path, serde_json::to_vec_pretty(artifact)?)?;
        debug!("saved artifact {:?}", path);
        Ok(path)
    }

    /// Write the aggregate dump for inspection alongside the per-chunk
    /// files. Never read back by the pipeline.
    pub fn save_all(&self, artifacts: &[ChunkArtifact]) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(ALL_CHUNKS_FILE);
        fs::write(&path, serde_json::to_vec_pretty(artifacts)?)?;
        Ok(path)
    }

    /// All per-chunk artifacts in filename order, skipping the aggregate
    /// dump and anything unparseable.
    pub fn load_all(&self) -> Result<Vec<ChunkArtifact>> {
        let mut artifacts = Vec::new();
        if !self.dir.exists() {
            warn!("artifact directory not found: {:?}", self.dir);
            return Ok(artifacts);
        }

        let mut paths: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension().is_some_and(|e| e == "json")
                    && path.file_name().is_some_and(|n| n != ALL_CHUNKS_FILE)
            })
            .collect();
        paths.sort();

        for path in paths {
            let bytes = fs::read(&path)?;
            match serde_json::from_slice::<ChunkArtifact>(&bytes) {
                Ok(artifact) => artifacts.push(artifact),
                Err(e) => warn!("skipping unreadable artifact {:?}: {}", path, e),
            }
        }
        Ok(artifacts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinegraph_core::ids;

    fn artifact(reviewer: &str, text: &str, index: usize) -> ChunkArtifact {
        let hash = ids::chunk_hash(text);
        ChunkArtifact {
            chunk_id: ids::chunk_id(reviewer, &hash),
            chunk_hash: hash,
            user_query: text.to_string(),
            movie_id: "Inception".to_string(),
            reviewer: reviewer.to_string(),
            chunk_index: index,
            entities: Vec::new(),
            relationships: Vec::new(),
            entity_resolution: Default::default(),
        }
    }

    #[test]
    fn save_load_round_trip_skips_the_aggregate_dump() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        let a = artifact("rev", "first chunk text", 1);
        let b = artifact("rev", "second chunk text", 2);
        store.save(&a).unwrap();
        store.save(&b).unwrap();
        store.save_all(&[a.clone(), b.clone()]).unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 2);
        let ids: Vec<&str> = loaded.iter().map(|c| c.chunk_id.as_str()).collect();
        assert!(ids.contains(&a.chunk_id.as_str()));
        assert!(ids.contains(&b.chunk_id.as_str()));
    }

    #[test]
    fn clear_removes_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.save(&artifact("rev", "text", 1)).unwrap();
        store.clear().unwrap();
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn missing_directory_is_empty_not_an_error() {
        let store = ArtifactStore::new("/nonexistent/cinegraph-artifacts");
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn rewriting_an_artifact_in_place_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let mut a = artifact("rev", "text", 1);
        store.save(&a).unwrap();

        a.entities.push(cinegraph_core::ExtractedEntity {
            entity_name: "코브".to_string(),
            entity_type: cinegraph_core::EntityLabel::MovieCharacter,
            entity_description: "드림팀 리더".to_string(),
        });
        store.save(&a).unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].entities.len(), 1);
    }
}
