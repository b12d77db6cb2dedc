//! Natural key to surrogate id mappings for a single load run

use std::collections::HashMap;

/// Store-assigned row identity.
pub type SurrogateId = i32;

/// Built while sectors and communities are inserted, used to resolve the
/// foreign keys of the next phase, and dropped when the run ends.
///
/// Keys are matched exactly as they appeared in the CSV: no trimming, no
/// case folding.
#[derive(Debug, Default, Clone)]
pub struct ReferenceResolver {
    sectors: HashMap<String, SurrogateId>,
    communities: HashMap<String, SurrogateId>,
}

impl ReferenceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sector_id(&mut self, name_en: impl Into<String>, id: SurrogateId) {
        self.sectors.insert(name_en.into(), id);
    }

    pub fn lookup_sector_id(&self, name_en: &str) -> Option<SurrogateId> {
        self.sectors.get(name_en).copied()
    }

    pub fn record_community_id(&mut self, code: impl Into<String>, id: SurrogateId) {
        self.communities.insert(code.into(), id);
    }

    pub fn lookup_community_id(&self, code: &str) -> Option<SurrogateId> {
        self.communities.get(code).copied()
    }

    pub fn sector_count(&self) -> usize {
        self.sectors.len()
    }

    pub fn community_count(&self) -> usize {
        self.communities.len()
    }

    /// Forget communities; a community reload invalidates the old ids.
    pub fn clear_communities(&mut self) {
        self.communities.clear();
    }

    /// Forget everything; a sector reload cascades to communities.
    pub fn clear(&mut self) {
        self.sectors.clear();
        self.communities.clear();
    }
}
