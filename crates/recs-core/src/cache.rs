//! Shared read-through / write-through cache.
//!
//! Entries are keyed either by entity `(kind, id)` or by an owner-scoped list
//! `(owner, list)`. Writers always replace or append whole values under the
//! lock, so a reader never observes a partially updated entity.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::Result;
use crate::recommendation::{OptionsResult, Recommendation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Recommendation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListName {
    /// The last option batch generated for an owner.
    Options,
    /// The last recommendation produced by a refinement for an owner.
    Regenerated,
    /// The owner's persisted recommendations.
    Recommendations,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Entity { kind: EntityKind, id: i64 },
    List { owner: String, list: ListName },
}

impl CacheKey {
    pub fn recommendation(id: i64) -> Self {
        Self::Entity {
            kind: EntityKind::Recommendation,
            id,
        }
    }

    pub fn list(owner: impl Into<String>, list: ListName) -> Self {
        Self::List {
            owner: owner.into(),
            list,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
    Options(OptionsResult),
    Recommendation(Recommendation),
    Recommendations(Vec<Recommendation>),
}

/// In-memory cache shared by every controller and reader.
#[derive(Debug, Default)]
pub struct RecommendationCache {
    entries: RwLock<HashMap<CacheKey, CachedValue>>,
}

impl RecommendationCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<CacheKey, CachedValue>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<CacheKey, CachedValue>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &CacheKey) -> Option<CachedValue> {
        self.read().get(key).cloned()
    }

    /// Replaces the value stored under `key`.
    pub fn put(&self, key: CacheKey, value: CachedValue) {
        self.write().insert(key, value);
    }

    pub fn invalidate(&self, key: &CacheKey) -> Option<CachedValue> {
        self.write().remove(key)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Returns the cached value, or fetches, stores and returns it.
    ///
    /// The lock is never held while `fetch` runs. Concurrent misses may fetch
    /// twice; the last writer wins with a whole value.
    pub async fn get_or_fetch<F, Fut>(&self, key: CacheKey, fetch: F) -> Result<CachedValue>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CachedValue>>,
    {
        if let Some(hit) = self.get(&key) {
            return Ok(hit);
        }

        let value = fetch().await?;
        self.put(key, value.clone());
        Ok(value)
    }

    // ============================================================================
    // Typed accessors
    // ============================================================================

    pub fn put_options(&self, owner: &str, options: OptionsResult) {
        self.put(
            CacheKey::list(owner, ListName::Options),
            CachedValue::Options(options),
        );
    }

    pub fn options(&self, owner: &str) -> Option<OptionsResult> {
        match self.get(&CacheKey::list(owner, ListName::Options)) {
            Some(CachedValue::Options(options)) => Some(options),
            _ => None,
        }
    }

    pub fn put_regenerated(&self, recommendation: Recommendation) {
        self.put(
            CacheKey::list(recommendation.owner.clone(), ListName::Regenerated),
            CachedValue::Recommendation(recommendation),
        );
    }

    pub fn recommendation(&self, id: i64) -> Option<Recommendation> {
        match self.get(&CacheKey::recommendation(id)) {
            Some(CachedValue::Recommendation(rec)) => Some(rec),
            _ => None,
        }
    }

    pub fn put_recommendations(&self, owner: &str, recommendations: Vec<Recommendation>) {
        self.put(
            CacheKey::list(owner, ListName::Recommendations),
            CachedValue::Recommendations(recommendations),
        );
    }

    pub fn recommendations(&self, owner: &str) -> Option<Vec<Recommendation>> {
        match self.get(&CacheKey::list(owner, ListName::Recommendations)) {
            Some(CachedValue::Recommendations(list)) => Some(list),
            _ => None,
        }
    }

    /// Writes a recommendation everywhere it is visible.
    ///
    /// The entity entry is replaced, every cached list holding the same id has
    /// that element replaced, and the owner's list (when cached) gains the
    /// entity if it was not there yet. Returns the number of list entries that
    /// were patched.
    pub fn upsert_recommendation(&self, recommendation: &Recommendation) -> usize {
        let mut entries = self.write();

        entries.insert(
            CacheKey::recommendation(recommendation.id),
            CachedValue::Recommendation(recommendation.clone()),
        );

        let mut patched = 0;
        for (key, value) in entries.iter_mut() {
            let CachedValue::Recommendations(list) = value else {
                continue;
            };

            let mut found = false;
            for slot in list.iter_mut().filter(|r| r.id == recommendation.id) {
                *slot = recommendation.clone();
                found = true;
                patched += 1;
            }

            let is_owner_list = matches!(
                key,
                CacheKey::List { owner, list: ListName::Recommendations }
                    if owner == &recommendation.owner
            );
            if !found && is_owner_list {
                list.insert(0, recommendation.clone());
            }
        }

        tracing::debug!(
            recommendation_id = recommendation.id,
            patched,
            "cache: recommendation upserted"
        );
        patched
    }
}
