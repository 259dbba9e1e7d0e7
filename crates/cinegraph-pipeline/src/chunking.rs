use serde::Serialize;
use tracing::info;

use cinegraph_core::{ids, ChunkArtifact, Result};

use crate::artifacts::ArtifactStore;
use crate::catalog::ReviewItem;

/// Recursive separator ladder: paragraphs, lines, words, then characters.
const SEPARATORS: [&str; 3] = ["\n\n", "\n", " "];

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChunkingStats {
    pub reviews: usize,
    pub chunks: usize,
}

/// Character-window splitter with a recursive separator policy. Segments
/// are cut at the coarsest separator that keeps them under `chunk_size`,
/// then greedily merged back into windows; each window starts with up to
/// `chunk_overlap` characters of tail segments from the previous one.
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_overlap: chunk_overlap.min(chunk_size.saturating_sub(1)),
        }
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        let segments = self.segment(text, 0);
        self.merge(segments)
    }

    /// Break `text` into segments no longer than `chunk_size`, preferring
    /// the coarsest separator, falling back to a raw character split.
    fn segment(&self, text: &str, level: usize) -> Vec<String> {
        if text.chars().count() <= self.chunk_size {
            if text.is_empty() {
                return Vec::new();
            }
            return vec![text.to_string()];
        }

        if level >= SEPARATORS.len() {
            // character fallback for unbreakable runs
            let chars: Vec<char> = text.chars().collect();
            return chars
                .chunks(self.chunk_size)
                .map(|c| c.iter().collect())
                .collect();
        }

        let separator = SEPARATORS[level];
        let mut segments = Vec::new();
        for (i, piece) in text.split(separator).enumerate() {
            let piece = if i == 0 {
                piece.to_string()
            } else {
                format!("{}{}", separator, piece)
            };
            if piece.trim().is_empty() {
                continue;
            }
            segments.extend(self.segment(&piece, level + 1));
        }
        segments
    }

    fn merge(&self, segments: Vec<String>) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut window: Vec<String> = Vec::new();
        let mut window_len = 0usize;

        for segment in segments {
            let seg_len = segment.chars().count();
            if window_len + seg_len > self.chunk_size && !window.is_empty() {
                chunks.push(window.concat().trim().to_string());
                // retain tail segments up to the overlap budget
                let mut kept = Vec::new();
                let mut kept_len = 0usize;
                for seg in window.iter().rev() {
                    let len = seg.chars().count();
                    if kept_len + len > self.chunk_overlap {
                        break;
                    }
                    kept_len += len;
                    kept.push(seg.clone());
                }
                kept.reverse();
                window = kept;
                window_len = kept_len;
            }
            window_len += seg_len;
            window.push(segment);
        }

        if !window.is_empty() {
            let last = window.concat().trim().to_string();
            if !last.is_empty() {
                chunks.push(last);
            }
        }
        chunks
    }
}

/// Split every review transcript into overlapping windows and persist one
/// artifact per chunk plus the aggregate dump. Chunks carry a stable
/// content hash and a 1-based reading-order index.
pub fn run_chunking(
    store: &ArtifactStore,
    reviews: &[ReviewItem],
    chunk_size: usize,
    chunk_overlap: usize,
) -> Result<ChunkingStats> {
    store.clear()?;
    let splitter = TextSplitter::new(chunk_size, chunk_overlap);

    let mut stats = ChunkingStats::default();
    let mut all = Vec::new();

    for (i, review) in reviews.iter().enumerate() {
        let chunks = splitter.split_text(&review.transcript);
        info!(
            "[{}/{}] {} ({}): {} chunks",
            i + 1,
            reviews.len(),
            review.movie_id,
            review.reviewer,
            chunks.len()
        );

        for (j, chunk) in chunks.into_iter().enumerate() {
            let chunk_hash = ids::chunk_hash(&chunk);
            let artifact = ChunkArtifact {
                chunk_id: ids::chunk_id(&review.reviewer, &chunk_hash),
                chunk_hash,
                user_query: chunk,
                movie_id: review.movie_id.clone(),
                reviewer: review.reviewer.clone(),
                chunk_index: j + 1,
                entities: Vec::new(),
                relationships: Vec::new(),
                entity_resolution: Default::default(),
            };
            store.save(&artifact)?;
            all.push(artifact);
            stats.chunks += 1;
        }
        stats.reviews += 1;
    }

    store.save_all(&all)?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        let splitter = TextSplitter::new(100, 10);
        let chunks = splitter.split_text("짧은 리뷰 텍스트");
        assert_eq!(chunks, vec!["짧은 리뷰 텍스트".to_string()]);
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        let splitter = TextSplitter::new(100, 10);
        assert!(splitter.split_text("").is_empty());
    }

    #[test]
    fn chunks_respect_the_window_size() {
        let splitter = TextSplitter::new(50, 10);
        let paragraph = "영화 리뷰 문장입니다. ".repeat(30);
        for chunk in splitter.split_text(&paragraph) {
            assert!(chunk.chars().count() <= 50, "chunk too long: {}", chunk.len());
        }
    }

    #[test]
    fn consecutive_chunks_overlap() {
        let splitter = TextSplitter::new(40, 15);
        let text = (0..20)
            .map(|i| format!("sentence{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = splitter.split_text(&text);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let tail_word = pair[0].split_whitespace().last().unwrap();
            assert!(
                pair[1].contains(tail_word),
                "expected overlap between {:?} and {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn unbreakable_runs_fall_back_to_character_splits() {
        let splitter = TextSplitter::new(20, 0);
        let text = "가".repeat(100);
        let chunks = splitter.split_text(&text);
        assert!(chunks.len() >= 5);
        for chunk in chunks {
            assert!(chunk.chars().count() <= 20);
        }
    }

    #[test]
    fn run_chunking_emits_reading_order_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let reviews = vec![ReviewItem {
            path: "review.json".into(),
            transcript: "문단 하나.\n\n문단 둘.\n\n문단 셋.".to_string(),
            movie_id: "암살".to_string(),
            reviewer: "DonghoonChoi".to_string(),
        }];
        let stats = run_chunking(&store, &reviews, 12, 0).unwrap();
        assert_eq!(stats.reviews, 1);
        assert!(stats.chunks >= 2);

        let mut artifacts = store.load_all().unwrap();
        artifacts.sort_by_key(|a| a.chunk_index);
        for (i, artifact) in artifacts.iter().enumerate() {
            assert_eq!(artifact.chunk_index, i + 1);
            assert_eq!(artifact.chunk_hash, ids::chunk_hash(&artifact.user_query));
            assert!(artifact.chunk_id.starts_with("DonghoonChoi_"));
        }
    }
}
