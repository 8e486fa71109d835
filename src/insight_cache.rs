//! Bounded in-process cache for model-generated campaign analysis.
//!
//! Keys are a SHA-256 digest over the campaign id and its summary metrics, so a
//! campaign whose numbers changed misses the cache even inside the TTL.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use sha2::{Digest, Sha256};

use crate::providers::openai::{AiInsights, AnalysisPayload, InsightError, InsightGenerator, OpenAiConfig};

struct CacheEntry {
  insights: AiInsights,
  inserted_at: Instant,
}

pub struct InsightCache {
  store: Arc<DashMap<String, CacheEntry>>,
  ttl: Duration,
  max_entries: usize,
}

pub fn cache_key(payload: &AnalysisPayload) -> String {
  let m = &payload.metrics;
  let mut hasher = Sha256::new();
  hasher.update(payload.campaign_id.as_bytes());
  hasher.update(b"|");
  hasher.update(format!(
    "{}|{}|{:.2}|{:.2}|{:.2}|{}",
    m.impressions, m.clicks, m.spend, m.ctr, m.cpc, m.reach
  ));
  hex::encode(hasher.finalize())
}

impl InsightCache {
  pub fn new(ttl: Duration, max_entries: usize) -> Self {
    let max_entries = max_entries.max(1);
    Self {
      store: Arc::new(DashMap::with_capacity(max_entries)),
      ttl,
      max_entries,
    }
  }

  pub fn from_config(config: &OpenAiConfig) -> Self {
    Self::new(Duration::from_secs(config.cache_ttl_secs), config.cache_max_entries)
  }

  pub fn get(&self, key: &str) -> Option<AiInsights> {
    let entry = self.store.get(key)?;
    if entry.inserted_at.elapsed() > self.ttl {
      drop(entry);
      self.store.remove(key);
      return None;
    }
    Some(entry.insights.clone())
  }

  /// Full cache: expired entries are swept first, then the insert is skipped
  /// if there is still no room.
  pub fn put(&self, key: String, insights: AiInsights) {
    if self.store.len() >= self.max_entries && !self.store.contains_key(&key) {
      self.evict_expired();
      if self.store.len() >= self.max_entries {
        tracing::debug!(max_entries = self.max_entries, "insight cache full, skipping insert");
        return;
      }
    }
    self.store.insert(
      key,
      CacheEntry {
        insights,
        inserted_at: Instant::now(),
      },
    );
  }

  pub fn evict_expired(&self) -> usize {
    let before = self.store.len();
    self
      .store
      .retain(|_, entry| entry.inserted_at.elapsed() <= self.ttl);
    before - self.store.len()
  }

  pub fn len(&self) -> usize {
    self.store.len()
  }

  pub fn is_empty(&self) -> bool {
    self.store.is_empty()
  }
}

/// Wraps any generator with the cache. Hits come back with `cached = true`.
pub struct CachedInsightGenerator<G> {
  inner: G,
  cache: InsightCache,
}

impl<G: InsightGenerator> CachedInsightGenerator<G> {
  pub fn new(inner: G, cache: InsightCache) -> Self {
    Self { inner, cache }
  }

  pub fn cache(&self) -> &InsightCache {
    &self.cache
  }
}

impl<G: InsightGenerator> InsightGenerator for CachedInsightGenerator<G> {
  async fn generate(&self, payload: &AnalysisPayload) -> Result<AiInsights, InsightError> {
    let key = cache_key(payload);
    if let Some(mut hit) = self.cache.get(&key) {
      tracing::debug!(campaign_id = %payload.campaign_id, "insight cache hit");
      hit.cached = true;
      return Ok(hit);
    }

    let mut fresh = self.inner.generate(payload).await?;
    fresh.cached = false;
    self.cache.put(key, fresh.clone());
    Ok(fresh)
  }
}
