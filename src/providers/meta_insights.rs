//! Resilient insights retrieval.
//!
//! The insights endpoint regularly answers with an empty `data` array for
//! windows that do have spend, so a single request is not enough. A fetch runs a
//! short fixed plan of queries and stops at the first one that returns rows.

use chrono::NaiveDate;

use crate::aggregate::RawInsightRow;
use crate::providers::meta_graph::{is_active_status, AdsGraph, GraphApiError};

const FULL_FIELDS: &str = "campaign_name,impressions,clicks,spend,ctr,cpc,cpm,reach,frequency,actions,conversion_values,inline_link_clicks,video_play_actions,video_3_sec_watched_actions,video_10_sec_watched_actions";
const REDUCED_FIELDS: &str = "campaign_name,impressions,clicks,spend,ctr,cpc,cpm,reach,frequency";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePreset {
  Today,
  Yesterday,
  Last3d,
  Last7d,
  Last14d,
  Last30d,
  Last90d,
  ThisMonth,
  LastMonth,
  Maximum,
  Lifetime,
}

impl DatePreset {
  pub fn as_str(&self) -> &'static str {
    match self {
      DatePreset::Today => "today",
      DatePreset::Yesterday => "yesterday",
      DatePreset::Last3d => "last_3d",
      DatePreset::Last7d => "last_7d",
      DatePreset::Last14d => "last_14d",
      DatePreset::Last30d => "last_30d",
      DatePreset::Last90d => "last_90d",
      DatePreset::ThisMonth => "this_month",
      DatePreset::LastMonth => "last_month",
      DatePreset::Maximum => "maximum",
      DatePreset::Lifetime => "lifetime",
    }
  }
}

impl std::str::FromStr for DatePreset {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "today" => Ok(DatePreset::Today),
      "yesterday" => Ok(DatePreset::Yesterday),
      "last_3d" => Ok(DatePreset::Last3d),
      "last_7d" => Ok(DatePreset::Last7d),
      "last_14d" => Ok(DatePreset::Last14d),
      "last_30d" => Ok(DatePreset::Last30d),
      "last_90d" => Ok(DatePreset::Last90d),
      "this_month" => Ok(DatePreset::ThisMonth),
      "last_month" => Ok(DatePreset::LastMonth),
      "maximum" => Ok(DatePreset::Maximum),
      "lifetime" => Ok(DatePreset::Lifetime),
      other => Err(format!("unknown date preset: {other}")),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateWindow {
  Preset(DatePreset),
  Range { since: NaiveDate, until: NaiveDate },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSet {
  Full,
  Reduced,
}

impl FieldSet {
  pub fn as_csv(&self) -> &'static str {
    match self {
      FieldSet::Full => FULL_FIELDS,
      FieldSet::Reduced => REDUCED_FIELDS,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsightsQuery {
  pub window: DateWindow,
  pub fields: FieldSet,
  pub daily: bool,
}

impl InsightsQuery {
  pub fn new(window: DateWindow, fields: FieldSet, daily: bool) -> Self {
    Self { window, fields, daily }
  }

  pub fn to_params(&self) -> Vec<(&'static str, String)> {
    let mut params = vec![("fields", self.fields.as_csv().to_string())];
    match &self.window {
      DateWindow::Preset(preset) => params.push(("date_preset", preset.as_str().to_string())),
      DateWindow::Range { since, until } => {
        params.push(("since", since.format("%Y-%m-%d").to_string()));
        params.push(("until", until.format("%Y-%m-%d").to_string()));
      }
    }
    if self.daily {
      params.push(("time_increment", "1".to_string()));
    }
    params
  }
}

#[derive(Debug, Clone)]
pub struct FallbackStep {
  pub label: &'static str,
  pub query: InsightsQuery,
  pub accept: fn(&[RawInsightRow]) -> bool,
}

#[derive(Debug)]
pub enum RowsResult {
  Rows(Vec<RawInsightRow>),
  Empty,
  AuthExpired(GraphApiError),
  TransportError(GraphApiError),
}

fn has_rows(rows: &[RawInsightRow]) -> bool {
  !rows.is_empty()
}

pub fn default_preset_for_status(status: &str) -> DatePreset {
  if is_active_status(status) {
    DatePreset::Last7d
  } else {
    DatePreset::Last30d
  }
}

/// The ordered attempts for one campaign. The last step is always the reduced
/// `lifetime` query without per-day increments.
pub fn plan_fallback_steps(window: Option<&DateWindow>, status: &str) -> Vec<FallbackStep> {
  let active = is_active_status(status);
  let requested = window
    .cloned()
    .unwrap_or_else(|| DateWindow::Preset(default_preset_for_status(status)));
  let broadened = if active { DatePreset::Last30d } else { DatePreset::Last90d };

  let daily = |preset: DatePreset| InsightsQuery::new(DateWindow::Preset(preset), FieldSet::Full, true);

  let mut steps = vec![
    FallbackStep {
      label: "requested",
      query: InsightsQuery::new(requested, FieldSet::Full, true),
      accept: has_rows,
    },
    FallbackStep {
      label: "broadened",
      query: daily(broadened),
      accept: has_rows,
    },
  ];

  if active {
    steps.push(FallbackStep {
      label: "yesterday",
      query: daily(DatePreset::Yesterday),
      accept: has_rows,
    });
    steps.push(FallbackStep {
      label: "today",
      query: daily(DatePreset::Today),
      accept: has_rows,
    });
  }

  steps.push(FallbackStep {
    label: "lifetime",
    query: InsightsQuery::new(DateWindow::Preset(DatePreset::Lifetime), FieldSet::Reduced, false),
    accept: has_rows,
  });

  steps
}

/// Runs the steps in order until one is accepted.
///
/// A token error ends the chain at once. Any other error on the requested
/// window skips straight to the final step; errors on later steps only move on
/// to the next one. If nothing is accepted after an error, the last error is
/// reported.
pub async fn run_fallback_steps<S: AdsGraph>(source: &S, campaign_id: &str, steps: &[FallbackStep]) -> RowsResult {
  let Some(last_idx) = steps.len().checked_sub(1) else {
    return RowsResult::Empty;
  };

  let mut last_error: Option<GraphApiError> = None;
  let mut idx = 0;
  while idx <= last_idx {
    let step = &steps[idx];
    match source.fetch_insights(campaign_id, &step.query).await {
      Ok(rows) if (step.accept)(&rows) => {
        tracing::info!(campaign_id, step = step.label, rows = rows.len(), "insights accepted");
        return RowsResult::Rows(rows);
      }
      Ok(_) => {
        tracing::debug!(campaign_id, step = step.label, "insights empty");
        idx += 1;
      }
      Err(err) if err.is_token_invalid() => {
        tracing::warn!(campaign_id, step = step.label, error = %err, "access token rejected");
        return RowsResult::AuthExpired(err);
      }
      Err(err) => {
        tracing::warn!(campaign_id, step = step.label, error = %err, "insights request failed");
        last_error = Some(err);
        idx = if idx == 0 && last_idx > 0 { last_idx } else { idx + 1 };
      }
    }
  }

  match last_error {
    Some(err) => RowsResult::TransportError(err),
    None => RowsResult::Empty,
  }
}

pub async fn fetch_with_fallback<S: AdsGraph>(
  source: &S,
  campaign_id: &str,
  window: Option<&DateWindow>,
  status: &str,
) -> RowsResult {
  let steps = plan_fallback_steps(window, status);
  run_fallback_steps(source, campaign_id, &steps).await
}
