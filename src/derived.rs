use serde::Serialize;

use crate::aggregate::CanonicalMetricBucket;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DerivedMetrics {
  pub ctr: f64,
  pub cpc: f64,
  pub cpm: f64,
  pub frequency: f64,
  pub roas: f64,
  pub budget_utilization: f64,
}

impl DerivedMetrics {
  pub fn from_bucket(bucket: &CanonicalMetricBucket) -> Self {
    Self {
      ctr: ctr(bucket),
      cpc: cpc(bucket),
      cpm: cpm(bucket),
      frequency: frequency(bucket),
      roas: roas(bucket),
      budget_utilization: budget_utilization(bucket),
    }
  }
}

fn finite_or_zero(v: f64) -> f64 {
  if v.is_finite() {
    v
  } else {
    0.0
  }
}

pub fn ctr(b: &CanonicalMetricBucket) -> f64 {
  finite_or_zero(b.clicks as f64 / (b.impressions.max(1) as f64) * 100.0)
}

pub fn cpc(b: &CanonicalMetricBucket) -> f64 {
  if b.clicks > 0 {
    finite_or_zero(b.spend / b.clicks as f64)
  } else {
    0.0
  }
}

pub fn cpm(b: &CanonicalMetricBucket) -> f64 {
  if b.impressions == 0 {
    return 0.0;
  }
  finite_or_zero(b.spend / (b.impressions.max(1) as f64) * 1000.0)
}

pub fn frequency(b: &CanonicalMetricBucket) -> f64 {
  if b.reach > 0 {
    finite_or_zero(b.impressions as f64 / b.reach as f64)
  } else {
    0.0
  }
}

pub fn roas(b: &CanonicalMetricBucket) -> f64 {
  if b.spend > 0.0 {
    finite_or_zero(b.purchase_value / b.spend)
  } else {
    0.0
  }
}

pub fn budget_utilization(b: &CanonicalMetricBucket) -> f64 {
  let total_budget = b.daily_budget + b.lifetime_budget;
  if total_budget > 0.0 {
    finite_or_zero(b.spend / total_budget * 100.0)
  } else {
    0.0
  }
}

/// Month-over-month change in percent. A move away from zero reads as +100%.
pub fn delta_pct(curr: f64, prev: f64) -> f64 {
  let curr = finite_or_zero(curr);
  let prev = finite_or_zero(prev);
  if prev == 0.0 {
    return if curr == 0.0 { 0.0 } else { 100.0 };
  }
  finite_or_zero((curr - prev) / prev.abs() * 100.0)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn all_zero_bucket_yields_zeroes() {
    let d = DerivedMetrics::from_bucket(&CanonicalMetricBucket::default());
    assert_eq!(d, DerivedMetrics::default());
  }

  #[test]
  fn extreme_buckets_never_produce_nan_or_infinity() {
    let buckets = [
      CanonicalMetricBucket {
        spend: f64::MAX,
        clicks: 1,
        impressions: 1,
        reach: 1,
        purchase_value: f64::MAX,
        ..Default::default()
      },
      CanonicalMetricBucket {
        spend: f64::MIN_POSITIVE,
        purchase_value: f64::MAX,
        daily_budget: f64::MIN_POSITIVE,
        ..Default::default()
      },
      CanonicalMetricBucket {
        impressions: u64::MAX,
        clicks: u64::MAX,
        reach: 1,
        ..Default::default()
      },
    ];

    for b in buckets.iter() {
      let d = DerivedMetrics::from_bucket(b);
      for v in [d.ctr, d.cpc, d.cpm, d.frequency, d.roas, d.budget_utilization] {
        assert!(v.is_finite(), "{d:?}");
      }
    }
  }

  #[test]
  fn ratios_match_definitions() {
    let b = CanonicalMetricBucket {
      impressions: 1_000,
      clicks: 50,
      spend: 25.0,
      reach: 400,
      purchase_value: 100.0,
      daily_budget: 40.0,
      lifetime_budget: 10.0,
      ..Default::default()
    };
    let d = DerivedMetrics::from_bucket(&b);
    assert!((d.ctr - 5.0).abs() < 1e-9);
    assert!((d.cpc - 0.5).abs() < 1e-9);
    assert!((d.cpm - 25.0).abs() < 1e-9);
    assert!((d.frequency - 2.5).abs() < 1e-9);
    assert!((d.roas - 4.0).abs() < 1e-9);
    assert!((d.budget_utilization - 50.0).abs() < 1e-9);
  }

  #[test]
  fn cpm_is_zero_without_impressions() {
    let b = CanonicalMetricBucket {
      spend: 12.0,
      ..Default::default()
    };
    assert_eq!(cpm(&b), 0.0);
  }

  #[test]
  fn delta_pct_handles_zero_baselines() {
    assert_eq!(delta_pct(0.0, 0.0), 0.0);
    assert_eq!(delta_pct(50.0, 0.0), 100.0);
    assert!((delta_pct(75.0, 50.0) - 50.0).abs() < 1e-9);
    assert!((delta_pct(25.0, 50.0) + 50.0).abs() < 1e-9);
    assert!((delta_pct(-5.0, -10.0) - 50.0).abs() < 1e-9);
    assert_eq!(delta_pct(f64::NAN, 10.0), -100.0);
  }
}
