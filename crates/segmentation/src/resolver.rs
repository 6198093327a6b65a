//! Pure (age, sex) → group description lookup against an ordered range table.

use rotator_core::types::GroupTable;
use rotator_core::SegmentKey;
use tracing::debug;

/// Immutable once built; a reload builds a new resolver.
#[derive(Debug, Clone, Default)]
pub struct SegmentResolver {
    table: GroupTable,
}

impl SegmentResolver {
    pub fn new(table: GroupTable) -> Self {
        debug!(
            groups = table.groups.len(),
            default = %table.default_description,
            "Segment resolver built"
        );
        Self { table }
    }

    /// First range containing the visitor wins; otherwise the default group.
    pub fn resolve(&self, user_age: u32, user_sex: &str) -> &str {
        self.table
            .groups
            .iter()
            .find(|g| g.contains(user_age, user_sex))
            .map(|g| g.description.as_str())
            .unwrap_or(&self.table.default_description)
    }

    pub fn segment_key(
        &self,
        page_url: &str,
        slot_id: u32,
        user_age: u32,
        user_sex: &str,
    ) -> SegmentKey {
        SegmentKey::new(page_url, slot_id, self.resolve(user_age, user_sex))
    }

    pub fn table(&self) -> &GroupTable {
        &self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rotator_core::types::Group;

    #[test]
    fn test_default_table() {
        let resolver = SegmentResolver::default();
        assert_eq!(resolver.resolve(31, "man"), "middle-age man");
        assert_eq!(resolver.resolve(30, "man"), "young man");
        assert_eq!(resolver.resolve(0, "woman"), "young woman");
        assert_eq!(resolver.resolve(150, "woman"), "old woman");
    }

    #[test]
    fn test_fallback_to_default() {
        let resolver = SegmentResolver::default();
        assert_eq!(resolver.resolve(151, "man"), "unknown age-sex group");
        assert_eq!(resolver.resolve(25, "robot"), "unknown age-sex group");
        assert_eq!(resolver.resolve(25, ""), "unknown age-sex group");
    }

    #[test]
    fn test_first_matching_range_wins() {
        let resolver = SegmentResolver::new(GroupTable {
            groups: vec![
                Group::new("students", "man", 18, 25),
                Group::new("adults", "man", 18, 65),
            ],
            default_description: "everyone".into(),
        });
        assert_eq!(resolver.resolve(20, "man"), "students");
        assert_eq!(resolver.resolve(40, "man"), "adults");
        assert_eq!(resolver.resolve(10, "man"), "everyone");
    }

    #[test]
    fn test_segment_key() {
        let resolver = SegmentResolver::default();
        let key = resolver.segment_key("site.com", 1, 70, "man");
        assert_eq!(key, SegmentKey::new("site.com", 1, "old man"));
    }
}
