/// Source registry: the set of crawler sources the service answers for.
///
/// Loaded from the store at startup and replaced wholesale on `reload()`.
/// Readers clone an `Arc` to the current snapshot and keep using it for the
/// rest of their request, so a reload never shows them a half-built set.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, warn};

use crate::model::{NldiError, Source, COMID_SOURCE};
use crate::store::NetworkStore;

/// Immutable view of the registered sources at one point in time.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    sources: Vec<Source>,
    loaded_at: DateTime<Utc>,
}

impl RegistrySnapshot {
    /// Validates and orders a source list.
    ///
    /// Suffixes must be non-empty, unique ignoring case, and must not shadow
    /// the built-in `comid` pseudo-source.
    pub fn build(mut sources: Vec<Source>) -> Result<Self, NldiError> {
        let mut seen = HashSet::new();
        for source in &sources {
            let key = source.source_suffix.trim().to_ascii_lowercase();
            if key.is_empty() {
                return Err(NldiError::InvalidSource(format!(
                    "source {} has an empty suffix",
                    source.crawler_source_id
                )));
            }
            if key == COMID_SOURCE {
                return Err(NldiError::InvalidSource(format!(
                    "suffix '{}' is reserved",
                    source.source_suffix
                )));
            }
            if !seen.insert(key) {
                return Err(NldiError::InvalidSource(format!(
                    "duplicate suffix '{}'",
                    source.source_suffix
                )));
            }
        }
        sources.sort_by_key(|s| s.crawler_source_id);
        Ok(RegistrySnapshot {
            sources,
            loaded_at: Utc::now(),
        })
    }

    /// Sources in ascending `crawler_source_id` order.
    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn by_suffix(&self, suffix: &str) -> Option<&Source> {
        self.sources.iter().find(|s| s.matches_suffix(suffix))
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

pub struct SourceRegistry {
    store: Arc<dyn NetworkStore>,
    current: RwLock<Arc<RegistrySnapshot>>,
}

impl SourceRegistry {
    /// Reads the initial snapshot from the store.
    pub fn load(store: Arc<dyn NetworkStore>) -> Result<Self, NldiError> {
        let snapshot = RegistrySnapshot::build(store.list_sources()?)?;
        info!(sources = snapshot.len(), "source registry loaded");
        Ok(SourceRegistry {
            store,
            current: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// The snapshot in effect right now.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        // The guarded value is a single Arc; a panicking writer cannot
        // leave it half-written.
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    pub fn list_sources(&self) -> Vec<Source> {
        self.snapshot().sources().to_vec()
    }

    /// Case-insensitive lookup.
    pub fn by_suffix(&self, suffix: &str) -> Result<Source, NldiError> {
        self.snapshot()
            .by_suffix(suffix)
            .cloned()
            .ok_or_else(|| NldiError::SourceNotFound(suffix.to_string()))
    }

    /// Fetches a fresh source list and swaps it in. On any failure the
    /// previous snapshot stays in place.
    pub fn reload(&self) -> Result<Arc<RegistrySnapshot>, NldiError> {
        let fresh = match self.store.list_sources() {
            Ok(sources) => RegistrySnapshot::build(sources),
            Err(e) => Err(e.into()),
        };
        let fresh = match fresh {
            Ok(snapshot) => Arc::new(snapshot),
            Err(e) => {
                warn!(error = %e, "registry reload rejected, keeping previous snapshot");
                return Err(e);
            }
        };

        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::clone(&fresh);
        drop(guard);

        info!(sources = fresh.len(), "source registry reloaded");
        Ok(fresh)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{demo_store, sample_source};
    use std::thread;

    fn demo_registry() -> (Arc<crate::store::memory::MemoryStore>, SourceRegistry) {
        let store = Arc::new(demo_store());
        let registry = SourceRegistry::load(store.clone()).unwrap();
        (store, registry)
    }

    #[test]
    fn test_lookup_ignores_case() {
        let (_, registry) = demo_registry();
        assert_eq!(registry.by_suffix("wqp").unwrap().crawler_source_id, 1);
        assert_eq!(registry.by_suffix("HUC12PP").unwrap().crawler_source_id, 2);
    }

    #[test]
    fn test_unknown_suffix_is_source_not_found() {
        let (_, registry) = demo_registry();
        assert_eq!(
            registry.by_suffix("nope"),
            Err(NldiError::SourceNotFound("nope".to_string()))
        );
    }

    #[test]
    fn test_sources_listed_by_id() {
        let (_, registry) = demo_registry();
        let ids: Vec<i32> = registry.list_sources().iter().map(|s| s.crawler_source_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_snapshot_rejects_duplicate_and_reserved_suffixes() {
        let dup = vec![sample_source(10, "gages"), sample_source(11, "GAGES")];
        assert!(matches!(RegistrySnapshot::build(dup), Err(NldiError::InvalidSource(_))));

        let reserved = vec![sample_source(10, "ComID")];
        assert!(matches!(RegistrySnapshot::build(reserved), Err(NldiError::InvalidSource(_))));
    }

    #[test]
    fn test_reload_picks_up_new_source() {
        let (store, registry) = demo_registry();
        let before = registry.snapshot();
        store.upsert_source(&sample_source(10, "gages")).unwrap();

        let after = registry.reload().unwrap();
        assert_eq!(after.len(), before.len() + 1);
        assert!(registry.by_suffix("gages").is_ok());
        // The old Arc is untouched.
        assert!(before.by_suffix("gages").is_none());
        assert!(after.loaded_at() >= before.loaded_at());
    }

    #[test]
    fn test_rejected_reload_keeps_previous_snapshot() {
        let (store, registry) = demo_registry();
        store.upsert_source(&sample_source(10, "wqp")).unwrap();

        assert!(matches!(registry.reload(), Err(NldiError::InvalidSource(_))));
        assert_eq!(registry.list_sources().len(), 3);
        assert_eq!(registry.by_suffix("wqp").unwrap().crawler_source_id, 1);
    }

    #[test]
    fn test_readers_never_see_partial_snapshot() {
        let (store, registry) = demo_registry();
        let registry = Arc::new(registry);
        store.upsert_source(&sample_source(10, "gages")).unwrap();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for _ in 0..200 {
                        let n = registry.snapshot().len();
                        assert!(n == 3 || n == 4, "saw {} sources", n);
                    }
                })
            })
            .collect();
        for _ in 0..50 {
            registry.reload().unwrap();
        }
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
