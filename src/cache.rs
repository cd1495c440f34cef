//! Time-boxed memoization of upstream metadata.
//!
//! Anilibria goes down regularly, so every slot keeps its last good payload
//! and keeps serving it when a refresh fails.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use parking_lot::RwLock;
use tracing::warn;

use crate::upstream::{Title, TitleSource, UpstreamError};

pub const DEFAULT_TTL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub expires_at: Instant,
    pub payload: T,
}

impl<T> CacheEntry<T> {
    fn new(payload: T, ttl: Duration) -> Self {
        Self {
            expires_at: Instant::now() + ttl,
            payload,
        }
    }

    fn is_fresh(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Cache in front of a [`TitleSource`]. Locks are only held for map access,
/// never across an upstream call, so two misses for the same id may both
/// reach the upstream.
pub struct TitleCache<S> {
    source: S,
    ttl: Duration,
    titles: RwLock<HashMap<String, CacheEntry<Title>>>,
    updates: RwLock<Option<CacheEntry<Vec<Title>>>>,
}

impl<S: TitleSource> TitleCache<S> {
    pub fn new(source: S) -> Self {
        Self::with_ttl(source, DEFAULT_TTL)
    }

    pub fn with_ttl(source: S, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            titles: RwLock::new(HashMap::new()),
            updates: RwLock::new(None),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn get_title(&self, id: &str) -> Result<Title, UpstreamError> {
        if let Some(entry) = self.titles.read().get(id) {
            if entry.is_fresh() {
                return Ok(entry.payload.clone());
            }
        }

        match self.source.fetch_title(id) {
            Ok(title) => {
                self.titles
                    .write()
                    .insert(id.to_owned(), CacheEntry::new(title.clone(), self.ttl));
                Ok(title)
            }
            Err(err) => match self.titles.read().get(id) {
                Some(stale) => {
                    warn!(id, error = %err, "title refresh failed, serving stale copy");
                    Ok(stale.payload.clone())
                }
                None => Err(err),
            },
        }
    }

    pub fn recently_updated(&self, use_cache: bool) -> Result<Vec<Title>, UpstreamError> {
        if use_cache {
            if let Some(entry) = self.updates.read().as_ref() {
                if entry.is_fresh() {
                    return Ok(entry.payload.clone());
                }
            }
        }

        match self.source.recently_updated() {
            Ok(list) => {
                self.remember_titles(&list);
                self.updates
                    .write()
                    .replace(CacheEntry::new(list.clone(), self.ttl));
                Ok(list)
            }
            Err(err) => match self.updates.read().as_ref() {
                Some(stale) => {
                    warn!(error = %err, "updates refresh failed, serving stale listing");
                    Ok(stale.payload.clone())
                }
                None => Err(err),
            },
        }
    }

    /// Search results are never cached themselves, but every title they
    /// contain is.
    pub fn search_titles(&self, query: &str) -> Result<Vec<Title>, UpstreamError> {
        let list = self.source.search_titles(query)?;
        self.remember_titles(&list);
        Ok(list)
    }

    /// Forces a refresh of the updates listing, which also seeds the title map.
    pub fn warm_up(&self) -> Result<usize, UpstreamError> {
        self.recently_updated(false).map(|list| list.len())
    }

    fn remember_titles(&self, list: &[Title]) {
        let mut titles = self.titles.write();
        for title in list {
            titles.insert(title.id_string(), CacheEntry::new(title.clone(), self.ttl));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::TitleNames;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn title(id: i64, name: &str) -> Title {
        Title {
            id,
            code: String::new(),
            names: TitleNames {
                ru: name.into(),
                en: None,
            },
            description: None,
            year: None,
            status: None,
            posters: Default::default(),
            franchises: Vec::new(),
            player: Default::default(),
        }
    }

    #[derive(Default)]
    struct MockSource {
        titles: Mutex<HashMap<String, Title>>,
        updates: Mutex<Vec<Title>>,
        search: Mutex<Vec<Title>>,
        failing: AtomicBool,
        fetch_calls: AtomicUsize,
        updates_calls: AtomicUsize,
    }

    impl MockSource {
        fn with_title(title: Title) -> Self {
            let source = Self::default();
            source.titles.lock().insert(title.id_string(), title);
            source
        }

        fn fail(&self) {
            self.failing.store(true, Ordering::SeqCst);
        }

        fn check(&self) -> Result<(), UpstreamError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(UpstreamError::Unavailable("mock is down".into()));
            }
            Ok(())
        }
    }

    impl TitleSource for MockSource {
        fn search_titles(&self, _query: &str) -> Result<Vec<Title>, UpstreamError> {
            self.check()?;
            Ok(self.search.lock().clone())
        }

        fn recently_updated(&self) -> Result<Vec<Title>, UpstreamError> {
            self.updates_calls.fetch_add(1, Ordering::SeqCst);
            self.check()?;
            Ok(self.updates.lock().clone())
        }

        fn fetch_title(&self, id: &str) -> Result<Title, UpstreamError> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            self.check()?;
            self.titles
                .lock()
                .get(id)
                .cloned()
                .ok_or_else(|| UpstreamError::Api(serde_json::json!({"error": "missing"})))
        }
    }

    #[test]
    fn repeated_reads_within_ttl_hit_upstream_once() {
        let cache = TitleCache::new(MockSource::with_title(title(42, "Bebop")));
        let first = cache.get_title("42").unwrap();
        let second = cache.get_title("42").unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.source().fetch_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn expired_entry_is_refreshed() {
        let cache = TitleCache::with_ttl(MockSource::with_title(title(42, "Bebop")), Duration::ZERO);
        cache.get_title("42").unwrap();
        cache.get_title("42").unwrap();
        assert_eq!(cache.source().fetch_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn stale_entry_survives_upstream_failure() {
        let cache = TitleCache::with_ttl(MockSource::with_title(title(42, "Bebop")), Duration::ZERO);
        let cached = cache.get_title("42").unwrap();

        cache.source().fail();
        let served = cache.get_title("42").unwrap();
        assert_eq!(served, cached);
        assert_eq!(cache.source().fetch_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failure_without_entry_propagates() {
        let cache = TitleCache::new(MockSource::default());
        cache.source().fail();
        assert!(matches!(
            cache.get_title("7"),
            Err(UpstreamError::Unavailable(_))
        ));
        assert!(cache.recently_updated(true).is_err());
    }

    #[test]
    fn search_results_are_retrievable_without_network() {
        let source = MockSource::default();
        *source.search.lock() = vec![title(1, "Cowboy Bebop"), title(2, "Bebop Movie")];
        let cache = TitleCache::new(source);

        let found = cache.search_titles("bebop").unwrap();
        assert_eq!(found.len(), 2);

        assert_eq!(cache.get_title("1").unwrap().names.ru, "Cowboy Bebop");
        assert_eq!(cache.get_title("2").unwrap().names.ru, "Bebop Movie");
        assert_eq!(cache.source().fetch_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn updates_listing_is_cached_and_fans_out() {
        let source = MockSource::default();
        *source.updates.lock() = vec![title(5, "Five"), title(6, "Six")];
        let cache = TitleCache::new(source);

        assert_eq!(cache.recently_updated(true).unwrap().len(), 2);
        assert_eq!(cache.recently_updated(true).unwrap().len(), 2);
        assert_eq!(cache.source().updates_calls.load(Ordering::SeqCst), 1);

        assert_eq!(cache.get_title("6").unwrap().names.ru, "Six");
        assert_eq!(cache.source().fetch_calls.load(Ordering::SeqCst), 0);

        // Bypassing the cache always asks the upstream.
        cache.recently_updated(false).unwrap();
        assert_eq!(cache.source().updates_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn updates_listing_serves_stale_on_failure() {
        let source = MockSource::default();
        *source.updates.lock() = vec![title(5, "Five")];
        let cache = TitleCache::with_ttl(source, Duration::ZERO);

        assert_eq!(cache.warm_up().unwrap(), 1);
        cache.source().fail();
        let stale = cache.recently_updated(true).unwrap();
        assert_eq!(stale[0].id, 5);
    }
}
