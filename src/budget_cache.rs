//! Campaign budget cache.
//!
//! Validity is tracked by a single `last_updated` timestamp for the whole map,
//! not per entry. Once `now - last_updated >= ttl`, every `get` misses until
//! something calls `set` again. Budgets move slowly and the cache only exists
//! to cut call volume against the upstream rate limit, so coarse invalidation
//! is acceptable.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Local, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ReportError;

pub const BUDGET_CACHE_TTL_SECS: i64 = 3600;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetEntry {
  #[serde(default)]
  pub daily_budget: f64,
  #[serde(default)]
  pub lifetime_budget: f64,
  #[serde(default)]
  pub budget_remaining: f64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedBudgetCache {
  #[serde(default)]
  campaigns: BTreeMap<String, BudgetEntry>,
  #[serde(default)]
  last_updated: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BudgetCache {
  campaigns: BTreeMap<String, BudgetEntry>,
  last_updated: Option<DateTime<Utc>>,
  ttl: Duration,
  path: Option<PathBuf>,
}

impl Default for BudgetCache {
  fn default() -> Self {
    Self::in_memory()
  }
}

/// Accepts RFC 3339 as well as the naive `YYYY-MM-DDTHH:MM:SS[.ffffff]` form
/// older cache files were written with. Naive stamps are host local time; a
/// wall time skipped by a DST jump is read as UTC.
fn parse_last_updated(raw: &str) -> Option<DateTime<Utc>> {
  let raw = raw.trim();
  if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
    return Some(dt.with_timezone(&Utc));
  }
  NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
    .ok()
    .map(|naive| {
      naive
        .and_local_timezone(Local)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or_else(|| naive.and_utc())
    })
}

impl BudgetCache {
  pub fn in_memory() -> Self {
    Self {
      campaigns: BTreeMap::new(),
      last_updated: None,
      ttl: Duration::seconds(BUDGET_CACHE_TTL_SECS),
      path: None,
    }
  }

  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  /// Loads the persisted cache. A missing or unreadable file yields an empty,
  /// unavailable cache bound to `path` so the next `save` recreates it.
  pub fn load(path: impl AsRef<Path>) -> Self {
    let path = path.as_ref().to_path_buf();
    let mut cache = Self::in_memory();
    cache.path = Some(path.clone());

    let raw = match std::fs::read(&path) {
      Ok(raw) => raw,
      Err(err) if err.kind() == std::io::ErrorKind::NotFound => return cache,
      Err(err) => {
        tracing::warn!(path = %path.display(), error = %err, "failed to read budget cache");
        return cache;
      }
    };

    match serde_json::from_slice::<PersistedBudgetCache>(&raw) {
      Ok(persisted) => {
        cache.campaigns = persisted.campaigns;
        cache.last_updated = persisted.last_updated.as_deref().and_then(parse_last_updated);
      }
      Err(err) => {
        tracing::warn!(path = %path.display(), error = %err, "ignoring malformed budget cache");
      }
    }
    cache
  }

  pub fn save(&self) -> Result<(), ReportError> {
    let Some(path) = self.path.as_ref() else {
      return Ok(());
    };
    let persisted = PersistedBudgetCache {
      campaigns: self.campaigns.clone(),
      last_updated: self.last_updated.map(|t| t.to_rfc3339()),
    };
    let body = serde_json::to_vec_pretty(&persisted)?;
    std::fs::write(path, body)?;
    Ok(())
  }

  pub fn last_updated(&self) -> Option<DateTime<Utc>> {
    self.last_updated
  }

  pub fn is_available_at(&self, now: DateTime<Utc>) -> bool {
    match self.last_updated {
      Some(t) => now - t < self.ttl,
      None => false,
    }
  }

  pub fn is_available(&self) -> bool {
    self.is_available_at(Utc::now())
  }

  pub fn get_at(&self, campaign_id: &str, now: DateTime<Utc>) -> Option<BudgetEntry> {
    if !self.is_available_at(now) {
      return None;
    }
    self.campaigns.get(campaign_id).copied()
  }

  pub fn get(&self, campaign_id: &str) -> Option<BudgetEntry> {
    self.get_at(campaign_id, Utc::now())
  }

  pub fn get_all_at(&self, now: DateTime<Utc>) -> BTreeMap<String, BudgetEntry> {
    if !self.is_available_at(now) {
      return BTreeMap::new();
    }
    self.campaigns.clone()
  }

  pub fn get_all(&self) -> BTreeMap<String, BudgetEntry> {
    self.get_all_at(Utc::now())
  }

  /// Stores one entry and refreshes the global timestamp. Persisting is best
  /// effort: a failed write is logged and the in-memory value is kept.
  pub fn set_at(&mut self, campaign_id: &str, entry: BudgetEntry, now: DateTime<Utc>) {
    self.campaigns.insert(campaign_id.to_string(), entry);
    self.last_updated = Some(now);
    if let Err(err) = self.save() {
      tracing::warn!(campaign_id, error = %err, "failed to persist budget cache");
    }
  }

  pub fn set(&mut self, campaign_id: &str, entry: BudgetEntry) {
    self.set_at(campaign_id, entry, Utc::now())
  }

  pub fn clear(&mut self) -> Result<(), ReportError> {
    self.campaigns.clear();
    self.last_updated = None;
    if let Some(path) = self.path.as_ref() {
      match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
      }
    }
    Ok(())
  }

  pub fn len(&self) -> usize {
    self.campaigns.len()
  }

  pub fn is_empty(&self) -> bool {
    self.campaigns.is_empty()
  }
}
