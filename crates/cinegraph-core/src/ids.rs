use md5::{Digest, Md5};
use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

use crate::EntityLabel;

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w]+").expect("static regex"));

/// Stable content hash for a chunk: first 14 hex characters of the MD5
/// digest of the chunk text.
pub fn chunk_hash(text: &str) -> String {
    let digest = Md5::digest(text.as_bytes());
    let hex = format!("{:x}", digest);
    hex[..14].to_string()
}

/// Chunk identifier carrying provenance: `reviewer_hash_rrrrrrrr`.
pub fn chunk_id(reviewer: &str, hash: &str) -> String {
    format!("{}_{}_{}", reviewer, hash, random_suffix())
}

/// Opaque canonical identifier for a graph entity: a slug of the name, the
/// label, and a random suffix. Stable once assigned; never regenerated for an
/// existing node.
pub fn canonical_id(name: &str, label: &EntityLabel) -> String {
    let slug = NON_WORD.replace_all(name, "_");
    let slug = slug.trim_matches('_');
    format!("{}_{}_{}", slug, label.as_str(), random_suffix())
}

fn random_suffix() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}
