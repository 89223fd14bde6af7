use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use super::cache::{LinkCache, ResolvedLink};
use super::client::{KnowledgeBase, SearchCandidate};
use crate::entity::EntityType;

/// Confidence assigned when the first search hit is taken without
/// verification or an exact label match.
const FALLBACK_CONFIDENCE: f64 = 0.7;

/// Confidence assigned to entries from the manual mapping table.
const KNOWN_TABLE_CONFIDENCE: f64 = 0.9;

/// Fixed inter-call delay for type-verification queries. The only
/// intentional, non-error-driven delay in the pipeline; tests inject zero.
pub struct RateLimiter {
    delay: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            last_call: Mutex::new(None),
        }
    }

    /// A limiter that never sleeps.
    #[must_use]
    pub fn unthrottled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub async fn wait(&self) {
        if self.delay.is_zero() {
            return;
        }

        let mut last = self.last_call.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.delay {
                tokio::time::sleep(self.delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Resolves metadata values to canonical knowledge-base identifiers.
/// Resilient to partial outages: individual lookup failures degrade to
/// "unlinked" and are remembered for the rest of the run.
pub struct EntityLinker {
    kb: Box<dyn KnowledgeBase>,
    cache: LinkCache,
    limiter: RateLimiter,
    primary_language: String,
    fallback_language: String,
    offline: bool,
}

impl EntityLinker {
    #[must_use]
    pub fn new(kb: Box<dyn KnowledgeBase>, primary_language: String, fallback_language: String) -> Self {
        Self {
            kb,
            cache: LinkCache::new(),
            limiter: RateLimiter::unthrottled(),
            primary_language,
            fallback_language,
            offline: false,
        }
    }

    #[must_use]
    pub fn with_cache(mut self, cache: LinkCache) -> Self {
        self.cache = cache;
        self
    }

    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    /// Probe connectivity once before a batch of lookups. When the probe
    /// fails the linker degrades to cache-only mode for the rest of the run.
    pub async fn self_test(&mut self) -> bool {
        let online = self.kb.ping().await;
        self.offline = !online;
        if self.offline {
            tracing::error!("knowledge base unreachable, degrading to cache-only linking");
        }
        online
    }

    #[must_use]
    pub fn is_offline(&self) -> bool {
        self.offline
    }

    /// Resolve one name to a canonical identifier. Idempotent and cached:
    /// repeated calls with the same name+type perform at most one search.
    pub async fn link(
        &mut self,
        name: &str,
        entity_type: Option<EntityType>,
    ) -> Option<ResolvedLink> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        if let Some(cached) = self.cache.get(name, entity_type) {
            tracing::debug!(name, "link served from cache");
            return cached.clone();
        }

        if let Some(qid) = self.cache.known_qid(name) {
            let link = ResolvedLink::new(qid.to_string(), KNOWN_TABLE_CONFIDENCE);
            self.cache.put(name, entity_type, Some(link.clone()));
            return Some(link);
        }

        if self.cache.has_failure(name, entity_type) {
            tracing::warn!(name, "skipping lookup after earlier network failure");
            return None;
        }

        if self.offline {
            return None;
        }

        let candidates = match self.search_both_languages(name).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::error!(name, error = %e, "knowledge base search failed");
                self.cache.mark_failure(name, entity_type);
                return None;
            }
        };

        if candidates.is_empty() {
            tracing::info!(name, "no knowledge base match");
            self.cache.put(name, entity_type, None);
            return None;
        }

        let link = match self.verify_candidates(name, entity_type, &candidates).await {
            Some(verified) => verified,
            None => best_unverified(name, &candidates),
        };

        tracing::info!(name, qid = %link.qid, confidence = link.confidence, "linked");
        self.cache.put(name, entity_type, Some(link.clone()));
        Some(link)
    }

    /// Detail fetch for persistence, degrading silently when offline or on
    /// transport failure.
    pub async fn fetch_record(&self, qid: &str) -> Option<super::client::EntityRecord> {
        if self.offline {
            return None;
        }
        match self.kb.fetch_entity(qid).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(qid, error = %e, "entity detail fetch failed");
                None
            }
        }
    }

    async fn search_both_languages(
        &self,
        name: &str,
    ) -> Result<Vec<SearchCandidate>, super::client::KbError> {
        let primary = self.kb.search(name, &self.primary_language).await?;
        if !primary.is_empty() {
            return Ok(primary);
        }

        tracing::debug!(name, "no hits in primary language, retrying in fallback");
        self.kb.search(name, &self.fallback_language).await
    }

    /// Type verification: accept the first candidate whose declared
    /// "instance of" set intersects the expected type's accepted set.
    /// Inconclusive verification is not a failure — the caller falls back.
    async fn verify_candidates(
        &self,
        name: &str,
        entity_type: Option<EntityType>,
        candidates: &[SearchCandidate],
    ) -> Option<ResolvedLink> {
        let expected = entity_type?;
        let accepted = expected.accepted_type_qids();

        for candidate in candidates {
            self.limiter.wait().await;

            let declared = match self.kb.instance_of(&candidate.id).await {
                Ok(types) => types,
                Err(e) => {
                    tracing::warn!(
                        name,
                        candidate = %candidate.id,
                        error = %e,
                        "type verification query failed"
                    );
                    continue;
                }
            };

            if declared.iter().any(|t| accepted.contains(&t.as_str())) {
                tracing::debug!(name, candidate = %candidate.id, ?expected, "type verified");
                return Some(ResolvedLink::new(candidate.id.clone(), 1.0));
            }
        }

        None
    }
}

/// Prefer an exact case-insensitive label match; otherwise take the first
/// search result. Linking is never blocked solely because verification was
/// inconclusive.
fn best_unverified(name: &str, candidates: &[SearchCandidate]) -> ResolvedLink {
    if let Some(exact) = candidates
        .iter()
        .find(|c| c.label.eq_ignore_ascii_case(name) || c.label.to_lowercase() == name.to_lowercase())
    {
        return ResolvedLink::new(exact.id.clone(), 1.0);
    }

    ResolvedLink::new(candidates[0].id.clone(), FALLBACK_CONFIDENCE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wikidata::client::{EntityRecord, KbError};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FakeKb {
        candidates: Vec<SearchCandidate>,
        instance_types: HashMap<String, Vec<String>>,
        search_calls: Arc<AtomicUsize>,
        verify_calls: Arc<AtomicUsize>,
        online: bool,
        fail_search: bool,
    }

    impl FakeKb {
        fn new(candidates: Vec<SearchCandidate>) -> Self {
            Self {
                candidates,
                instance_types: HashMap::new(),
                search_calls: Arc::new(AtomicUsize::new(0)),
                verify_calls: Arc::new(AtomicUsize::new(0)),
                online: true,
                fail_search: false,
            }
        }

        fn with_instance(mut self, qid: &str, types: &[&str]) -> Self {
            self.instance_types.insert(
                qid.to_string(),
                types.iter().map(|s| (*s).to_string()).collect(),
            );
            self
        }
    }

    #[async_trait::async_trait]
    impl KnowledgeBase for FakeKb {
        async fn search(&self, _name: &str, _lang: &str) -> Result<Vec<SearchCandidate>, KbError> {
            self.search_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_search {
                return Err(KbError::Transport("scripted outage".into()));
            }
            Ok(self.candidates.clone())
        }

        async fn instance_of(&self, qid: &str) -> Result<Vec<String>, KbError> {
            self.verify_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.instance_types.get(qid).cloned().unwrap_or_default())
        }

        async fn fetch_entity(&self, _qid: &str) -> Result<Option<EntityRecord>, KbError> {
            Ok(None)
        }

        async fn ping(&self) -> bool {
            self.online
        }
    }

    fn candidate(id: &str, label: &str) -> SearchCandidate {
        SearchCandidate {
            id: id.to_string(),
            label: label.to_string(),
            description: None,
        }
    }

    fn linker(kb: FakeKb) -> EntityLinker {
        EntityLinker::new(Box::new(kb), "ru".into(), "en".into())
            .with_rate_limiter(RateLimiter::unthrottled())
    }

    #[tokio::test]
    async fn test_type_verification_picks_human_over_organization() {
        // Two candidates for "Ivan Ivanov": an organization ranked first and
        // a person ranked second. Verification must pick the human.
        let kb = FakeKb::new(vec![
            candidate("Q100", "Ivan Ivanov Group"),
            candidate("Q200", "Ivan Ivanov"),
        ])
        .with_instance("Q100", &["Q43229"])
        .with_instance("Q200", &["Q5"]);

        let mut linker = linker(kb);
        let link = linker
            .link("Ivan Ivanov", Some(EntityType::Person))
            .await
            .unwrap();

        assert_eq!(link.qid, "Q200");
        assert!((link.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_second_call_is_served_from_cache() {
        let kb = FakeKb::new(vec![candidate("Q42", "Douglas Adams")]);
        let search_calls = Arc::clone(&kb.search_calls);

        let mut linker = linker(kb);
        let first = linker.link("Douglas Adams", None).await.unwrap();
        let second = linker.link("Douglas Adams", None).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(search_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exact_label_match_preferred_without_type() {
        let kb = FakeKb::new(vec![
            candidate("Q1", "Mercury (element)"),
            candidate("Q2", "Mercury"),
        ]);

        let mut linker = linker(kb);
        let link = linker.link("mercury", None).await.unwrap();

        assert_eq!(link.qid, "Q2");
        assert!((link.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_first_result_fallback_has_lower_confidence() {
        let kb = FakeKb::new(vec![
            candidate("Q1", "Something Else"),
            candidate("Q2", "Another Thing"),
        ]);

        let mut linker = linker(kb);
        let link = linker.link("obscure term", None).await.unwrap();

        assert_eq!(link.qid, "Q1");
        assert!((link.confidence - FALLBACK_CONFIDENCE).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_inconclusive_verification_falls_back() {
        // Neither candidate verifies as a person, but linking still happens.
        let kb = FakeKb::new(vec![candidate("Q7", "Ivan Ivanov")])
            .with_instance("Q7", &["Q43229"]);

        let mut linker = linker(kb);
        let link = linker
            .link("Ivan Ivanov", Some(EntityType::Person))
            .await
            .unwrap();

        assert_eq!(link.qid, "Q7");
    }

    #[tokio::test]
    async fn test_no_results_cached_negatively() {
        let kb = FakeKb::new(Vec::new());
        let search_calls = Arc::clone(&kb.search_calls);

        let mut linker = linker(kb);
        assert!(linker.link("Nonexistent", None).await.is_none());
        assert!(linker.link("Nonexistent", None).await.is_none());

        // One miss = primary + fallback language, then cached.
        assert_eq!(search_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_search_failure_is_not_retried() {
        let mut kb = FakeKb::new(vec![candidate("Q1", "X")]);
        kb.fail_search = true;
        let search_calls = Arc::clone(&kb.search_calls);

        let mut linker = linker(kb);
        assert!(linker.link("X", None).await.is_none());
        assert!(linker.link("X", None).await.is_none());

        assert_eq!(search_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_known_table_used_when_search_fails() {
        let mut kb = FakeKb::new(Vec::new());
        kb.fail_search = true;

        let mut linker = EntityLinker::new(Box::new(kb), "ru".into(), "en".into())
            .with_cache(
                LinkCache::new().with_known_mappings([("Lenin".to_string(), "Q1394".to_string())]),
            )
            .with_rate_limiter(RateLimiter::unthrottled());

        let link = linker.link("Lenin", Some(EntityType::Person)).await.unwrap();
        assert_eq!(link.qid, "Q1394");
        assert!((link.confidence - KNOWN_TABLE_CONFIDENCE).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_offline_mode_skips_remote_calls() {
        let mut kb = FakeKb::new(vec![candidate("Q1", "X")]);
        kb.online = false;
        let search_calls = Arc::clone(&kb.search_calls);

        let mut linker = linker(kb);
        assert!(!linker.self_test().await);
        assert!(linker.is_offline());
        assert!(linker.link("X", None).await.is_none());
        assert_eq!(search_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_name_is_rejected() {
        let kb = FakeKb::new(vec![candidate("Q1", "X")]);
        let mut linker = linker(kb);

        assert!(linker.link("   ", None).await.is_none());
    }

    #[tokio::test]
    async fn test_rate_limiter_spaces_calls() {
        tokio::time::pause();

        let limiter = RateLimiter::new(Duration::from_millis(500));
        let start = Instant::now();

        limiter.wait().await;
        limiter.wait().await;

        assert!(start.elapsed() >= Duration::from_millis(500));
    }
}
