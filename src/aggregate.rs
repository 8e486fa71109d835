use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::budget_cache::BudgetEntry;
use crate::taxonomy::{classify, ActionBucket, ActionSource};

pub const UNKNOWN_DATE_KEY: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
  Day,
  Month,
}

impl std::str::FromStr for Granularity {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "day" | "daily" => Ok(Granularity::Day),
      "month" | "monthly" => Ok(Granularity::Month),
      other => Err(format!("unknown granularity: {other}")),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ActionValue {
  #[serde(default, deserialize_with = "lenient_string")]
  pub action_type: Option<String>,
  #[serde(default)]
  pub value: Value,
}

/// One record of the insights `data` array. Every field is optional and parsed
/// leniently so a garbled field never fails the whole row.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawInsightRow {
  #[serde(default, deserialize_with = "lenient_string")]
  pub date_start: Option<String>,
  #[serde(default, deserialize_with = "lenient_string")]
  pub date: Option<String>,
  #[serde(default, deserialize_with = "lenient_string")]
  pub date_stop: Option<String>,
  #[serde(default, deserialize_with = "lenient_string")]
  pub campaign_id: Option<String>,
  #[serde(default)]
  pub impressions: Value,
  #[serde(default)]
  pub clicks: Value,
  #[serde(default)]
  pub spend: Value,
  #[serde(default)]
  pub reach: Value,
  #[serde(default, deserialize_with = "lenient_actions")]
  pub actions: Vec<ActionValue>,
  #[serde(default, deserialize_with = "lenient_actions")]
  pub conversion_values: Vec<ActionValue>,
  #[serde(default, deserialize_with = "lenient_actions")]
  pub video_play_actions: Vec<ActionValue>,
  #[serde(default, deserialize_with = "lenient_actions")]
  pub video_3_sec_watched_actions: Vec<ActionValue>,
  #[serde(default, deserialize_with = "lenient_actions")]
  pub video_10_sec_watched_actions: Vec<ActionValue>,
  /// Attached by the batch runner from the budget cache, never sent upstream.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub budget: Option<BudgetEntry>,
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
  D: Deserializer<'de>,
{
  let v = Value::deserialize(deserializer)?;
  Ok(match v {
    Value::String(s) => Some(s),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  })
}

fn lenient_actions<'de, D>(deserializer: D) -> Result<Vec<ActionValue>, D::Error>
where
  D: Deserializer<'de>,
{
  let v = Value::deserialize(deserializer)?;
  let items = match v {
    Value::Array(items) => items,
    _ => return Ok(Vec::new()),
  };

  Ok(
    items
      .into_iter()
      .filter_map(|item| serde_json::from_value::<ActionValue>(item).ok())
      .collect(),
  )
}

/// Parses the `data` array of an insights response, skipping entries that are
/// not JSON objects.
pub fn parse_insight_rows(json: &Value) -> Vec<RawInsightRow> {
  let rows = json
    .get("data")
    .and_then(|v| v.as_array())
    .cloned()
    .unwrap_or_default();

  rows
    .into_iter()
    .filter(|row| row.is_object())
    .filter_map(|row| serde_json::from_value::<RawInsightRow>(row).ok())
    .collect()
}

/// Coerces an upstream numeric field. Numbers and numeric strings are accepted,
/// everything else (null, garbage, negatives, non-finite) becomes 0.
pub fn coerce_f64(value: &Value) -> f64 {
  let parsed = match value {
    Value::Number(n) => n.as_f64(),
    Value::String(s) => s.trim().replace(',', "").parse::<f64>().ok(),
    _ => None,
  };
  match parsed {
    Some(v) if v.is_finite() && v > 0.0 => v,
    _ => 0.0,
  }
}

/// Integer metrics arrive as "123" or "123.0"; truncate like the API does.
pub fn coerce_count(value: &Value) -> u64 {
  count_from_f64(coerce_f64(value))
}

fn count_from_f64(value: f64) -> u64 {
  if value.is_finite() && value > 0.0 {
    value.trunc() as u64
  } else {
    0
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalMetricBucket {
  pub impressions: u64,
  pub clicks: u64,
  pub spend: f64,
  pub reach: u64,
  pub link_clicks: u64,
  pub engagement: u64,
  pub photo_views: u64,
  pub video_views: u64,
  pub messaging_contacts: u64,
  pub messaging_new_contacts: u64,
  pub purchases: u64,
  pub purchase_value: f64,
  pub daily_budget: f64,
  pub lifetime_budget: f64,
  pub budget_remaining: f64,
}

impl CanonicalMetricBucket {
  pub fn add(&mut self, other: &CanonicalMetricBucket) {
    self.impressions = self.impressions.saturating_add(other.impressions);
    self.clicks = self.clicks.saturating_add(other.clicks);
    self.spend += other.spend;
    self.reach = self.reach.saturating_add(other.reach);
    self.link_clicks = self.link_clicks.saturating_add(other.link_clicks);
    self.engagement = self.engagement.saturating_add(other.engagement);
    self.photo_views = self.photo_views.saturating_add(other.photo_views);
    self.video_views = self.video_views.saturating_add(other.video_views);
    self.messaging_contacts = self.messaging_contacts.saturating_add(other.messaging_contacts);
    self.messaging_new_contacts = self.messaging_new_contacts.saturating_add(other.messaging_new_contacts);
    self.purchases = self.purchases.saturating_add(other.purchases);
    self.purchase_value += other.purchase_value;
    self.daily_budget += other.daily_budget;
    self.lifetime_budget += other.lifetime_budget;
    self.budget_remaining += other.budget_remaining;
  }

  pub fn fold_row(&mut self, row: &RawInsightRow) {
    self.impressions = self.impressions.saturating_add(coerce_count(&row.impressions));
    self.clicks = self.clicks.saturating_add(coerce_count(&row.clicks));
    self.spend += coerce_f64(&row.spend);
    self.reach = self.reach.saturating_add(coerce_count(&row.reach));

    for action in row.actions.iter() {
      self.apply_action(action, ActionSource::Actions);
    }
    for action in row.conversion_values.iter() {
      self.apply_action(action, ActionSource::ConversionValues);
    }

    for actions in [
      &row.video_play_actions,
      &row.video_3_sec_watched_actions,
      &row.video_10_sec_watched_actions,
    ] {
      self.video_views = self.video_views.saturating_add(sum_action_values(actions));
    }

    if let Some(budget) = row.budget.as_ref() {
      self.daily_budget += non_negative(budget.daily_budget);
      self.lifetime_budget += non_negative(budget.lifetime_budget);
      self.budget_remaining += non_negative(budget.budget_remaining);
    }
  }

  fn apply_action(&mut self, action: &ActionValue, source: ActionSource) {
    let Some(action_type) = action.action_type.as_deref() else {
      return;
    };
    let Some(classified) = classify(action_type, coerce_f64(&action.value)) else {
      return;
    };
    let count = count_from_f64(classified.value);

    match classified.bucket {
      ActionBucket::Engagement => self.engagement = self.engagement.saturating_add(count),
      ActionBucket::PhotoView => self.photo_views = self.photo_views.saturating_add(count),
      ActionBucket::Messaging { new_contact } => {
        self.messaging_contacts = self.messaging_contacts.saturating_add(count);
        if new_contact {
          self.messaging_new_contacts = self.messaging_new_contacts.saturating_add(count);
        }
      }
      ActionBucket::LinkClick => self.link_clicks = self.link_clicks.saturating_add(count),
      ActionBucket::Purchase => {
        self.purchases = self.purchases.saturating_add(count);
        if source == ActionSource::ConversionValues {
          self.purchase_value += classified.value;
        }
      }
    }
  }
}

fn non_negative(v: f64) -> f64 {
  if v.is_finite() && v > 0.0 {
    v
  } else {
    0.0
  }
}

fn sum_action_values(actions: &[ActionValue]) -> u64 {
  actions
    .iter()
    .fold(0u64, |acc, a| acc.saturating_add(coerce_count(&a.value)))
}

pub fn row_date_key(row: &RawInsightRow) -> String {
  [&row.date_start, &row.date, &row.date_stop]
    .into_iter()
    .filter_map(|v| v.as_deref())
    .map(str::trim)
    .find(|v| !v.is_empty())
    .unwrap_or(UNKNOWN_DATE_KEY)
    .to_string()
}

pub fn date_key_for(row: &RawInsightRow, granularity: Granularity) -> String {
  let day_key = row_date_key(row);
  match granularity {
    Granularity::Day => day_key,
    Granularity::Month => day_key.chars().take(7).collect(),
  }
}

pub fn aggregate(rows: &[RawInsightRow], granularity: Granularity) -> BTreeMap<String, CanonicalMetricBucket> {
  let mut out: BTreeMap<String, CanonicalMetricBucket> = BTreeMap::new();
  for row in rows.iter() {
    out
      .entry(date_key_for(row, granularity))
      .or_default()
      .fold_row(row);
  }
  out
}

/// Bucket-wise sum keyed by date.
pub fn merge_aggregates(
  mut left: BTreeMap<String, CanonicalMetricBucket>,
  right: &BTreeMap<String, CanonicalMetricBucket>,
) -> BTreeMap<String, CanonicalMetricBucket> {
  for (key, bucket) in right.iter() {
    left.entry(key.clone()).or_default().add(bucket);
  }
  left
}

pub fn total(rows: &[RawInsightRow]) -> CanonicalMetricBucket {
  let mut out = CanonicalMetricBucket::default();
  for row in rows.iter() {
    out.fold_row(row);
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  fn row(json: &str) -> RawInsightRow {
    serde_json::from_str(json).unwrap()
  }

  fn sample_rows() -> Vec<RawInsightRow> {
    vec![
      row(
        r#"{"date_start":"2025-07-30","impressions":"100","clicks":"10","spend":"1.5","reach":"80",
            "actions":[{"action_type":"post_engagement","value":"12"},{"action_type":"link_click","value":"4"}]}"#,
      ),
      row(
        r#"{"date_start":"2025-07-31","impressions":"50","clicks":"oops","spend":"0.25","reach":null,
            "actions":[{"action_type":"onsite_conversion.messaging_conversation_started_7d","value":"3"}],
            "conversion_values":[{"action_type":"purchase","value":"120.5"}]}"#,
      ),
      row(
        r#"{"date_start":"2025-08-01","impressions":200,"clicks":20,"spend":"2.0","reach":150,
            "actions":[{"action_type":"purchase","value":"2"},{"action_type":"photo_view","value":"7"}],
            "video_play_actions":[{"action_type":"video_view","value":"5"}],
            "video_3_sec_watched_actions":[{"action_type":"video_view","value":"3"}],
            "video_10_sec_watched_actions":[{"action_type":"video_view","value":"1"}]}"#,
      ),
      row(r#"{"date":"2025-08-01","impressions":"10","spend":"0.5"}"#),
      row(r#"{"date_stop":"2025-08-02","clicks":"1"}"#),
      row(r#"{"impressions":"5"}"#),
    ]
  }

  #[test]
  fn date_key_uses_field_precedence() {
    let r = row(r#"{"date_start":"2025-01-02","date":"2025-01-03","date_stop":"2025-01-04"}"#);
    assert_eq!(row_date_key(&r), "2025-01-02");
    let r = row(r#"{"date":"2025-01-03","date_stop":"2025-01-04"}"#);
    assert_eq!(row_date_key(&r), "2025-01-03");
    let r = row(r#"{"date_stop":"2025-01-04"}"#);
    assert_eq!(row_date_key(&r), "2025-01-04");
    let r = row(r#"{"impressions":"1"}"#);
    assert_eq!(row_date_key(&r), UNKNOWN_DATE_KEY);
  }

  #[test]
  fn month_granularity_truncates_keys() {
    let out = aggregate(&sample_rows(), Granularity::Month);
    let keys: Vec<&str> = out.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["2025-07", "2025-08", "unknown"]);
  }

  #[test]
  fn monthly_rollup_sums_day_rows() {
    let rows = vec![
      row(r#"{"date_start":"2025-08-01","impressions":"100","clicks":"10","spend":"1.0"}"#),
      row(r#"{"date_start":"2025-08-15","impressions":"200","clicks":"20","spend":"2.0"}"#),
    ];
    let out = aggregate(&rows, Granularity::Month);
    let bucket = out.get("2025-08").unwrap();
    assert_eq!(bucket.impressions, 300);
    assert_eq!(bucket.clicks, 30);
    assert!((bucket.spend - 3.0).abs() < 1e-9);

    let derived = crate::derived::DerivedMetrics::from_bucket(bucket);
    assert!((derived.ctr - 10.0).abs() < 1e-9);
    assert!((derived.cpm - 10.0).abs() < 1e-9);
  }

  #[test]
  fn malformed_fields_coerce_to_zero_without_dropping_row() {
    let r = row(
      r#"{"date_start":"2025-08-01","impressions":"12x","clicks":{"bad":true},"spend":"2.5","reach":"-4",
          "actions":"not-a-list","conversion_values":[42,{"action_type":"purchase","value":"9.5"}]}"#,
    );
    let out = aggregate(std::slice::from_ref(&r), Granularity::Day);
    let bucket = out.get("2025-08-01").unwrap();
    assert_eq!(bucket.impressions, 0);
    assert_eq!(bucket.clicks, 0);
    assert_eq!(bucket.reach, 0);
    assert!((bucket.spend - 2.5).abs() < 1e-9);
    assert!((bucket.purchase_value - 9.5).abs() < 1e-9);
    assert_eq!(bucket.purchases, 9);
  }

  #[test]
  fn conversion_values_purchase_counts_and_adds_value() {
    let r = row(
      r#"{"date_start":"2025-08-01",
          "conversion_values":[{"action_type":"offsite_conversion.fb_pixel_purchase","value":"3"}]}"#,
    );
    let bucket = total(std::slice::from_ref(&r));
    assert_eq!(bucket.purchases, 3);
    assert!((bucket.purchase_value - 3.0).abs() < 1e-9);
  }

  #[test]
  fn huge_counts_saturate_instead_of_overflowing() {
    let r = row(
      r#"{"date_start":"2025-08-01","impressions":"1e30","clicks":"1e30",
          "actions":[{"action_type":"link_click","value":"1e30"},{"action_type":"link_click","value":"1e30"}],
          "video_play_actions":[{"action_type":"video_view","value":"1e30"}],
          "video_3_sec_watched_actions":[{"action_type":"video_view","value":"1e30"}]}"#,
    );
    let rows = vec![r.clone(), r];
    let t = total(&rows);
    assert_eq!(t.impressions, u64::MAX);
    assert_eq!(t.clicks, u64::MAX);
    assert_eq!(t.link_clicks, u64::MAX);
    assert_eq!(t.video_views, u64::MAX);

    let by_day = aggregate(&rows, Granularity::Day);
    let merged = merge_aggregates(by_day.clone(), &by_day);
    assert_eq!(merged.get("2025-08-01").unwrap().impressions, u64::MAX);
  }

  #[test]
  fn normalizer_contributions_land_in_buckets() {
    let out = aggregate(&sample_rows(), Granularity::Day);

    let d1 = out.get("2025-07-30").unwrap();
    assert_eq!(d1.engagement, 12);
    assert_eq!(d1.link_clicks, 4);

    let d2 = out.get("2025-07-31").unwrap();
    assert_eq!(d2.messaging_contacts, 3);
    assert_eq!(d2.messaging_new_contacts, 3);
    assert_eq!(d2.purchases, 120);
    assert!((d2.purchase_value - 120.5).abs() < 1e-9);

    let d3 = out.get("2025-08-01").unwrap();
    assert_eq!(d3.purchases, 2);
    assert_eq!(d3.photo_views, 7);
    assert_eq!(d3.video_views, 9);
    assert_eq!(d3.impressions, 210);
  }

  #[test]
  fn aggregation_is_additive_over_disjoint_splits() {
    let rows = sample_rows();
    for granularity in [Granularity::Day, Granularity::Month] {
      let whole = aggregate(&rows, granularity);
      for split in 0..=rows.len() {
        let (left, right) = rows.split_at(split);
        let merged = merge_aggregates(aggregate(left, granularity), &aggregate(right, granularity));
        assert_eq!(merged, whole, "split at {split}");
      }
    }
  }

  #[test]
  fn aggregation_ignores_row_order() {
    let rows = sample_rows();
    let mut reversed = rows.clone();
    reversed.reverse();
    assert_eq!(aggregate(&rows, Granularity::Day), aggregate(&reversed, Granularity::Day));
  }

  #[test]
  fn budget_annotation_is_summed() {
    let mut r = row(r#"{"date_start":"2025-08-01","spend":"10"}"#);
    r.budget = Some(BudgetEntry {
      daily_budget: 50.0,
      lifetime_budget: 0.0,
      budget_remaining: 40.0,
    });
    let t = total(&[r.clone(), r]);
    assert!((t.daily_budget - 100.0).abs() < 1e-9);
    assert!((t.budget_remaining - 80.0).abs() < 1e-9);
  }

  #[test]
  fn parse_insight_rows_skips_non_objects() {
    let json: Value = serde_json::from_str(
      r#"{"data":[{"date_start":"2025-08-01","impressions":"3"}, "garbage", 7, null]}"#,
    )
    .unwrap();
    let rows = parse_insight_rows(&json);
    assert_eq!(rows.len(), 1);
    assert_eq!(coerce_count(&rows[0].impressions), 3);
  }

  #[test]
  fn coerce_accepts_thousands_separators() {
    assert_eq!(coerce_count(&Value::String("1,234".into())), 1234);
    assert_eq!(coerce_f64(&Value::String(" 2.50 ".into())), 2.5);
    assert_eq!(coerce_f64(&Value::Null), 0.0);
  }

  #[test]
  fn granularity_parses_from_flags() {
    assert_eq!("monthly".parse::<Granularity>().unwrap(), Granularity::Month);
    assert_eq!("Day".parse::<Granularity>().unwrap(), Granularity::Day);
    assert!("week".parse::<Granularity>().is_err());
  }
}
