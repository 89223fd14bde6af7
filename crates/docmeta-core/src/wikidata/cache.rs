use std::collections::{HashMap, HashSet};

use crate::entity::EntityType;

/// A resolved knowledge-base link and how it was obtained. Verified and
/// exact-label links carry full confidence; best-effort fallbacks less.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLink {
    pub qid: String,
    pub confidence: f64,
}

impl ResolvedLink {
    #[must_use]
    pub fn new(qid: String, confidence: f64) -> Self {
        Self {
            qid,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    name: String,
    entity_type: Option<EntityType>,
}

/// Process-lifetime lookup cache for the entity linker. Stores positive and
/// negative resolutions keyed by name+type, remembers per-key network
/// failures so a known-bad lookup is not retried within the run, and holds a
/// small static table of manual mappings used when the API is unreachable.
///
/// Deliberately an explicit object rather than ambient state: one instance
/// lives for one pipeline run or worker process and could be swapped for a
/// shared cache behind the same get/put/has surface.
#[derive(Debug, Default)]
pub struct LinkCache {
    resolved: HashMap<CacheKey, Option<ResolvedLink>>,
    failures: HashSet<CacheKey>,
    known: HashMap<String, String>,
}

impl LinkCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the manual name → QID table.
    #[must_use]
    pub fn with_known_mappings<I>(mut self, mappings: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.known.extend(mappings);
        self
    }

    #[must_use]
    pub fn has(&self, name: &str, entity_type: Option<EntityType>) -> bool {
        self.resolved.contains_key(&key(name, entity_type))
    }

    #[must_use]
    pub fn get(&self, name: &str, entity_type: Option<EntityType>) -> Option<&Option<ResolvedLink>> {
        self.resolved.get(&key(name, entity_type))
    }

    pub fn put(&mut self, name: &str, entity_type: Option<EntityType>, link: Option<ResolvedLink>) {
        self.resolved.insert(key(name, entity_type), link);
    }

    /// Record a transport failure for this lookup so the run does not retry it.
    pub fn mark_failure(&mut self, name: &str, entity_type: Option<EntityType>) {
        self.failures.insert(key(name, entity_type));
    }

    #[must_use]
    pub fn has_failure(&self, name: &str, entity_type: Option<EntityType>) -> bool {
        self.failures.contains(&key(name, entity_type))
    }

    /// Manual mapping lookup, used when remote search is unavailable.
    #[must_use]
    pub fn known_qid(&self, name: &str) -> Option<&str> {
        self.known.get(name).map(String::as_str)
    }
}

fn key(name: &str, entity_type: Option<EntityType>) -> CacheKey {
    CacheKey {
        name: name.to_string(),
        entity_type,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positive_and_negative_entries() {
        let mut cache = LinkCache::new();

        cache.put(
            "Jane Doe",
            Some(EntityType::Person),
            Some(ResolvedLink::new("Q1".into(), 1.0)),
        );
        cache.put("Nobody", Some(EntityType::Person), None);

        assert!(cache.has("Jane Doe", Some(EntityType::Person)));
        assert!(cache.has("Nobody", Some(EntityType::Person)));
        assert!(!cache.has("Jane Doe", None));

        assert_eq!(
            cache
                .get("Jane Doe", Some(EntityType::Person))
                .unwrap()
                .as_ref()
                .unwrap()
                .qid,
            "Q1"
        );
        assert!(cache
            .get("Nobody", Some(EntityType::Person))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_type_is_part_of_the_key() {
        let mut cache = LinkCache::new();
        cache.put(
            "Mercury",
            Some(EntityType::Concept),
            Some(ResolvedLink::new("Q308".into(), 1.0)),
        );

        assert!(!cache.has("Mercury", Some(EntityType::Person)));
    }

    #[test]
    fn test_failure_tracking() {
        let mut cache = LinkCache::new();
        assert!(!cache.has_failure("X", None));

        cache.mark_failure("X", None);
        assert!(cache.has_failure("X", None));
        assert!(!cache.has_failure("X", Some(EntityType::Person)));
    }

    #[test]
    fn test_known_mappings() {
        let cache = LinkCache::new()
            .with_known_mappings([("Lenin".to_string(), "Q1394".to_string())]);

        assert_eq!(cache.known_qid("Lenin"), Some("Q1394"));
        assert_eq!(cache.known_qid("Unknown"), None);
    }

    #[test]
    fn test_confidence_clamp() {
        let link = ResolvedLink::new("Q1".into(), 2.0);
        assert!((link.confidence - 1.0).abs() < f64::EPSILON);
    }
}
