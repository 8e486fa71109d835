use std::time::Duration;

use serde::Serialize;

use crate::aggregate::RawInsightRow;
use crate::budget_cache::{BudgetCache, BudgetEntry};
use crate::config::AppConfig;
use crate::error::ReportError;
use crate::providers::meta_graph::{AdsGraph, CampaignRef, GraphApiError};
use crate::providers::meta_insights::{fetch_with_fallback, DateWindow, RowsResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSettings {
  pub item_delay: Duration,
  pub batch_size: usize,
  pub batch_delay: Duration,
}

impl Default for BatchSettings {
  fn default() -> Self {
    Self {
      item_delay: Duration::from_millis(300),
      batch_size: 10,
      batch_delay: Duration::from_secs(2),
    }
  }
}

impl BatchSettings {
  pub fn from_config(cfg: &AppConfig) -> Self {
    Self {
      item_delay: cfg.item_delay,
      batch_size: cfg.batch_size.max(1),
      batch_delay: cfg.batch_delay,
    }
  }

  /// Pause before the item at `index`. Every `batch_size` items the longer
  /// batch pause replaces the per-item one.
  pub fn delay_before(&self, index: usize) -> Duration {
    if index == 0 {
      Duration::ZERO
    } else if index % self.batch_size.max(1) == 0 {
      self.batch_delay
    } else {
      self.item_delay
    }
  }
}

#[derive(Debug, Clone)]
pub struct CampaignRows {
  pub campaign: CampaignRef,
  pub rows: Vec<RawInsightRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedCampaign {
  pub campaign_id: String,
  pub error: String,
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
  pub campaigns: Vec<CampaignRows>,
  pub empty: Vec<String>,
  pub failed: Vec<FailedCampaign>,
  pub token_expired: Option<GraphApiError>,
}

impl BatchOutcome {
  pub fn row_count(&self) -> usize {
    self.campaigns.iter().map(|c| c.rows.len()).sum()
  }

  pub fn into_result(self) -> Result<Self, ReportError> {
    match self.token_expired {
      Some(err) => Err(ReportError::AuthExpired(err)),
      None => Ok(self),
    }
  }
}

async fn pause(delay: Duration) {
  if !delay.is_zero() {
    tokio::time::sleep(delay).await;
  }
}

async fn budget_for<S: AdsGraph>(
  source: &S,
  cache: &mut BudgetCache,
  campaign_id: &str,
) -> Result<BudgetEntry, GraphApiError> {
  if let Some(entry) = cache.get(campaign_id) {
    return Ok(entry);
  }
  let entry = source.fetch_campaign_budget(campaign_id).await?;
  cache.set(campaign_id, entry);
  Ok(entry)
}

fn clear_if_stale(cache: &mut BudgetCache) {
  if cache.is_empty() || cache.is_available() {
    return;
  }
  tracing::info!(entries = cache.len(), "budget cache expired, clearing");
  if let Err(err) = cache.clear() {
    tracing::warn!(error = %err, "failed to clear budget cache");
  }
}

/// Fetches every campaign strictly one after another.
///
/// A failed or empty campaign is recorded and the loop moves on. A rejected
/// token stops the loop since every remaining call would fail the same way.
pub async fn run_batch<S: AdsGraph>(
  source: &S,
  campaigns: &[CampaignRef],
  window: Option<&DateWindow>,
  cache: &mut BudgetCache,
  settings: &BatchSettings,
) -> BatchOutcome {
  let mut outcome = BatchOutcome::default();
  clear_if_stale(cache);

  for (idx, campaign) in campaigns.iter().enumerate() {
    pause(settings.delay_before(idx)).await;

    let campaign_id = campaign.id.as_str();
    match fetch_with_fallback(source, campaign_id, window, &campaign.status).await {
      RowsResult::Rows(mut rows) => {
        let mut token_error = None;
        match budget_for(source, cache, campaign_id).await {
          Ok(entry) => {
            for row in rows.iter_mut() {
              row.budget = Some(entry);
            }
          }
          Err(err) if err.is_token_invalid() => {
            tracing::warn!(campaign_id, error = %err, "token rejected on budget lookup, rows kept unannotated");
            token_error = Some(err);
          }
          Err(err) => {
            tracing::warn!(campaign_id, error = %err, "budget lookup failed, rows left unannotated");
          }
        }
        outcome.campaigns.push(CampaignRows {
          campaign: campaign.clone(),
          rows,
        });
        if let Some(err) = token_error {
          outcome.token_expired = Some(err);
          break;
        }
      }
      RowsResult::Empty => {
        tracing::info!(campaign_id, "no insights in any window");
        outcome.empty.push(campaign.id.clone());
      }
      RowsResult::AuthExpired(err) => {
        outcome.token_expired = Some(err);
        break;
      }
      RowsResult::TransportError(err) => {
        outcome.failed.push(FailedCampaign {
          campaign_id: campaign.id.clone(),
          error: err.to_string(),
        });
      }
    }
  }

  tracing::info!(
    fetched = outcome.campaigns.len(),
    rows = outcome.row_count(),
    empty = outcome.empty.len(),
    failed = outcome.failed.len(),
    token_expired = outcome.token_expired.is_some(),
    "batch finished"
  );
  outcome
}

/// Re-fetches budget fields for every campaign and rewrites the cache.
/// Returns how many entries were stored.
pub async fn refresh_budgets<S: AdsGraph>(
  source: &S,
  campaigns: &[CampaignRef],
  cache: &mut BudgetCache,
  settings: &BatchSettings,
) -> Result<usize, ReportError> {
  let mut stored = 0usize;
  for (idx, campaign) in campaigns.iter().enumerate() {
    pause(settings.delay_before(idx)).await;

    match source.fetch_campaign_budget(&campaign.id).await {
      Ok(entry) => {
        cache.set(&campaign.id, entry);
        stored += 1;
      }
      Err(err) if err.is_token_invalid() => return Err(ReportError::AuthExpired(err)),
      Err(err) => {
        tracing::warn!(campaign_id = %campaign.id, error = %err, "budget refresh failed");
      }
    }
  }
  Ok(stored)
}
