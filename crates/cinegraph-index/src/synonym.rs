/// Merge two synonym sets: strip whitespace, drop empties, split
/// comma-joined entries from older catalog exports, dedup, and return the
/// union sorted. The operation is associative and idempotent, so repeated
/// imports converge.
pub fn merge_synonyms(existing: &[String], new: &[String]) -> Vec<String> {
    let mut set = std::collections::BTreeSet::new();
    for raw in existing.iter().chain(new.iter()) {
        for part in raw.split(',') {
            let part = part.trim();
            if !part.is_empty() {
                set.insert(part.to_string());
            }
        }
    }
    set.into_iter().collect()
}
