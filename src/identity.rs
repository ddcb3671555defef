use uuid::Uuid;

/// Derive a stable point id for the chunk at `index` of `source_id`.
///
/// The id is a UUIDv5 in the URL namespace, so re-ingesting the same source overwrites
/// the points written last time instead of adding new ones.
pub fn assign_id(source_id: &str, index: usize) -> String {
    let name = format!("{}:{}", source_id, index);
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string()
}

/// Ids for chunks `0..count` of a source
pub fn assign_ids(source_id: &str, count: usize) -> Vec<String> {
    (0..count).map(|i| assign_id(source_id, i)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_assign_id_is_deterministic() {
        assert_eq!(assign_id("a.pdf", 0), assign_id("a.pdf", 0));
        assert_eq!(assign_id("a.pdf", 0), "c043c58a-fb27-5641-8a2d-c11da12ac6c7");
        assert_eq!(assign_id("a.pdf", 1), "3d24c5be-2b74-5472-a0f4-4fcc57e19247");
    }

    #[test]
    fn test_assign_id_has_no_collisions() {
        let mut seen = HashSet::new();
        for source in 0..100 {
            for index in 0..120 {
                let id = assign_id(&format!("docs/report-{}.pdf", source), index);
                assert!(seen.insert(id), "collision at {} / {}", source, index);
            }
        }
        assert_eq!(seen.len(), 12_000);
    }

    #[test]
    fn test_assign_ids_matches_assign_id() {
        let ids = assign_ids("b.pdf", 3);
        assert_eq!(ids.len(), 3);
        assert_eq!(ids[2], assign_id("b.pdf", 2));
    }
}
