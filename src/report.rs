use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::aggregate::{aggregate, CanonicalMetricBucket, Granularity};
use crate::batch::CampaignRows;
use crate::derived::{self, DerivedMetrics};
use crate::providers::meta_graph::CampaignRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Brand {
  #[serde(rename = "LS2")]
  Ls2,
  Bulldog,
  #[serde(rename = "EGO")]
  Ego,
  Unknown,
}

impl Brand {
  pub fn as_str(&self) -> &'static str {
    match self {
      Brand::Ls2 => "LS2",
      Brand::Bulldog => "Bulldog",
      Brand::Ego => "EGO",
      Brand::Unknown => "Unknown",
    }
  }
}

/// First match wins, in the order LS2, Bulldog, EGO.
pub fn infer_brand(campaign_name: &str) -> Brand {
  let name = campaign_name.to_lowercase();
  if name.contains("ls2") {
    Brand::Ls2
  } else if name.contains("bulldog") {
    Brand::Bulldog
  } else if name.contains("ego") {
    Brand::Ego
  } else {
    Brand::Unknown
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum ContentFormat {
  Video,
  Image,
  Carousel,
  Unknown,
}

impl ContentFormat {
  pub fn as_str(&self) -> &'static str {
    match self {
      ContentFormat::Video => "Video",
      ContentFormat::Image => "Image",
      ContentFormat::Carousel => "Carousel",
      ContentFormat::Unknown => "Unknown",
    }
  }
}

/// Name keywords take precedence; otherwise the delivered media decides.
pub fn infer_content_format(campaign_name: &str, bucket: &CanonicalMetricBucket) -> ContentFormat {
  let name = campaign_name.to_lowercase();
  if name.contains("carousel") {
    ContentFormat::Carousel
  } else if name.contains("video") || name.contains("reel") {
    ContentFormat::Video
  } else if name.contains("image") || name.contains("photo") || name.contains("banner") {
    ContentFormat::Image
  } else if bucket.video_views > 0 {
    ContentFormat::Video
  } else if bucket.photo_views > 0 {
    ContentFormat::Image
  } else {
    ContentFormat::Unknown
  }
}

#[derive(Debug, Clone, Default)]
pub struct CampaignFilter {
  pub brands: Vec<String>,
  pub statuses: Vec<String>,
}

impl CampaignFilter {
  /// Comma separated values; empty means no restriction.
  pub fn from_csv(brands: Option<&str>, statuses: Option<&str>) -> Self {
    let split = |raw: Option<&str>| -> Vec<String> {
      raw
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
    };
    Self {
      brands: split(brands),
      statuses: split(statuses),
    }
  }

  pub fn matches(&self, campaign: &CampaignRef) -> bool {
    let brand_ok = self.brands.is_empty() || {
      let brand = infer_brand(&campaign.name);
      self.brands.iter().any(|b| b.eq_ignore_ascii_case(brand.as_str()))
    };
    let status_ok = self.statuses.is_empty()
      || self
        .statuses
        .iter()
        .any(|s| s.eq_ignore_ascii_case(campaign.status.trim()));
    brand_ok && status_ok
  }

  pub fn apply(&self, campaigns: Vec<CampaignRef>) -> Vec<CampaignRef> {
    campaigns.into_iter().filter(|c| self.matches(c)).collect()
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsWithDerived {
  #[serde(flatten)]
  pub bucket: CanonicalMetricBucket,
  #[serde(flatten)]
  pub derived: DerivedMetrics,
}

impl MetricsWithDerived {
  pub fn new(bucket: CanonicalMetricBucket) -> Self {
    Self {
      derived: DerivedMetrics::from_bucket(&bucket),
      bucket,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyRow {
  pub date: String,
  pub campaign_count: usize,
  #[serde(flatten)]
  pub bucket: CanonicalMetricBucket,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CampaignTotals {
  pub campaign_id: String,
  pub campaign_name: String,
  pub status: String,
  pub brand: Brand,
  pub content_format: ContentFormat,
  #[serde(flatten)]
  pub metrics: MetricsWithDerived,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TotalsReport {
  pub totals: MetricsWithDerived,
  pub daily: Vec<DailyRow>,
  pub campaigns: Vec<CampaignTotals>,
}

/// Per-key bucket sum across campaigns plus the set of contributing campaigns.
fn rollup(
  campaigns: &[CampaignRows],
  granularity: Granularity,
) -> BTreeMap<String, (CanonicalMetricBucket, BTreeSet<usize>)> {
  let mut out: BTreeMap<String, (CanonicalMetricBucket, BTreeSet<usize>)> = BTreeMap::new();
  for (idx, campaign) in campaigns.iter().enumerate() {
    for (key, bucket) in aggregate(&campaign.rows, granularity) {
      let slot = out.entry(key).or_default();
      slot.0.add(&bucket);
      slot.1.insert(idx);
    }
  }
  out
}

pub fn build_totals_report(campaigns: &[CampaignRows]) -> TotalsReport {
  let mut totals = CanonicalMetricBucket::default();
  let mut per_campaign = Vec::with_capacity(campaigns.len());

  for entry in campaigns.iter() {
    let bucket = crate::aggregate::total(&entry.rows);
    totals.add(&bucket);
    per_campaign.push(CampaignTotals {
      campaign_id: entry.campaign.id.clone(),
      campaign_name: entry.campaign.name.clone(),
      status: entry.campaign.status.clone(),
      brand: infer_brand(&entry.campaign.name),
      content_format: infer_content_format(&entry.campaign.name, &bucket),
      metrics: MetricsWithDerived::new(bucket),
    });
  }

  per_campaign.sort_by(|a, b| {
    b.metrics
      .bucket
      .spend
      .total_cmp(&a.metrics.bucket.spend)
      .then_with(|| a.campaign_id.cmp(&b.campaign_id))
  });

  let daily = rollup(campaigns, Granularity::Day)
    .into_iter()
    .map(|(date, (bucket, members))| DailyRow {
      date,
      campaign_count: members.len(),
      bucket,
    })
    .collect();

  TotalsReport {
    totals: MetricsWithDerived::new(totals),
    daily,
    campaigns: per_campaign,
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyAggregate {
  pub month: String,
  #[serde(flatten)]
  pub bucket: CanonicalMetricBucket,
  pub campaign_count: usize,
  pub brands: Vec<Brand>,
  pub content_formats: Vec<ContentFormat>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyRow {
  #[serde(flatten)]
  pub aggregate: MonthlyAggregate,
  #[serde(flatten)]
  pub derived: DerivedMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKey {
  Impressions,
  Reach,
  Ctr,
  Engagement,
  LinkClicks,
  MessagingStarts,
  Purchases,
  PurchaseValue,
}

impl MetricKey {
  pub fn key(&self) -> &'static str {
    match self {
      MetricKey::Impressions => "impressions",
      MetricKey::Reach => "reach",
      MetricKey::Ctr => "ctr",
      MetricKey::Engagement => "engagement",
      MetricKey::LinkClicks => "link_clicks",
      MetricKey::MessagingStarts => "messaging_starts",
      MetricKey::Purchases => "purchases",
      MetricKey::PurchaseValue => "purchase_value",
    }
  }

  pub fn title(&self) -> &'static str {
    match self {
      MetricKey::Impressions => "Impressions",
      MetricKey::Reach => "Reach",
      MetricKey::Ctr => "CTR (%)",
      MetricKey::Engagement => "Post engagement",
      MetricKey::LinkClicks => "Link clicks",
      MetricKey::MessagingStarts => "Messaging conversations started",
      MetricKey::Purchases => "Purchases",
      MetricKey::PurchaseValue => "Purchase value",
    }
  }

  pub fn value(&self, bucket: &CanonicalMetricBucket) -> f64 {
    match self {
      MetricKey::Impressions => bucket.impressions as f64,
      MetricKey::Reach => bucket.reach as f64,
      MetricKey::Ctr => derived::ctr(bucket),
      MetricKey::Engagement => bucket.engagement as f64,
      MetricKey::LinkClicks => bucket.link_clicks as f64,
      MetricKey::MessagingStarts => bucket.messaging_contacts as f64,
      MetricKey::Purchases => bucket.purchases as f64,
      MetricKey::PurchaseValue => bucket.purchase_value,
    }
  }
}

pub const FUNNEL: [MetricKey; 6] = [
  MetricKey::Impressions,
  MetricKey::Reach,
  MetricKey::Engagement,
  MetricKey::LinkClicks,
  MetricKey::MessagingStarts,
  MetricKey::Purchases,
];

const DISPLAY_GROUP: [MetricKey; 3] = [MetricKey::Impressions, MetricKey::Reach, MetricKey::Ctr];
const ENGAGEMENT_GROUP: [MetricKey; 2] = [MetricKey::Engagement, MetricKey::LinkClicks];
const CONVERSION_GROUP: [MetricKey; 3] = [
  MetricKey::MessagingStarts,
  MetricKey::Purchases,
  MetricKey::PurchaseValue,
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunnelStage {
  pub key: &'static str,
  pub title: &'static str,
  pub total: f64,
  pub delta_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupMetric {
  pub key: &'static str,
  pub title: &'static str,
  pub current: f64,
  pub previous: f64,
  pub delta_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricGroups {
  pub display: Vec<GroupMetric>,
  pub engagement: Vec<GroupMetric>,
  pub conversion: Vec<GroupMetric>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyReport {
  pub monthly_data: Vec<MonthlyRow>,
  pub current_month: Option<String>,
  pub previous_month: Option<String>,
  pub funnel: Vec<FunnelStage>,
  pub groups: MetricGroups,
}

fn parse_month_key(key: &str) -> Option<NaiveDate> {
  NaiveDate::parse_from_str(&format!("{key}-01"), "%Y-%m-%d").ok()
}

/// `2025-01` -> `2024-12`.
pub fn previous_month_key(key: &str) -> Option<String> {
  let first = parse_month_key(key)?;
  let prev = first.pred_opt()?;
  Some(format!("{:04}-{:02}", prev.year(), prev.month()))
}

fn group(keys: &[MetricKey], current: &CanonicalMetricBucket, previous: &CanonicalMetricBucket) -> Vec<GroupMetric> {
  keys
    .iter()
    .map(|k| {
      let curr = k.value(current);
      let prev = k.value(previous);
      GroupMetric {
        key: k.key(),
        title: k.title(),
        current: curr,
        previous: prev,
        delta_pct: derived::delta_pct(curr, prev),
      }
    })
    .collect()
}

/// Month rollup with MoM comparison. The current month defaults to the latest
/// month with data; a missing previous month compares against zero.
pub fn build_monthly_report(campaigns: &[CampaignRows], current_month: Option<&str>) -> MonthlyReport {
  let months = rollup(campaigns, Granularity::Month);

  let monthly_data: Vec<MonthlyRow> = months
    .iter()
    .map(|(month, (bucket, members))| {
      let mut brands = BTreeSet::new();
      let mut content_formats = BTreeSet::new();
      for idx in members.iter() {
        let entry = &campaigns[*idx];
        let name = entry.campaign.name.as_str();
        brands.insert(infer_brand(name));
        let campaign_month: Vec<_> = entry
          .rows
          .iter()
          .filter(|r| crate::aggregate::date_key_for(r, Granularity::Month) == *month)
          .cloned()
          .collect();
        content_formats.insert(infer_content_format(name, &crate::aggregate::total(&campaign_month)));
      }
      MonthlyRow {
        aggregate: MonthlyAggregate {
          month: month.clone(),
          bucket: *bucket,
          campaign_count: members.len(),
          brands: brands.into_iter().collect(),
          content_formats: content_formats.into_iter().collect(),
        },
        derived: DerivedMetrics::from_bucket(bucket),
      }
    })
    .collect();

  let current_month = current_month
    .map(str::to_string)
    .or_else(|| months.keys().rev().find(|k| parse_month_key(k).is_some()).cloned());
  let previous_month = current_month.as_deref().and_then(previous_month_key);

  let lookup = |key: Option<&str>| -> CanonicalMetricBucket {
    key
      .and_then(|k| months.get(k))
      .map(|(bucket, _)| *bucket)
      .unwrap_or_default()
  };
  let current = lookup(current_month.as_deref());
  let previous = lookup(previous_month.as_deref());

  let funnel = FUNNEL
    .iter()
    .map(|k| {
      let total = k.value(&current);
      FunnelStage {
        key: k.key(),
        title: k.title(),
        total,
        delta_pct: derived::delta_pct(total, k.value(&previous)),
      }
    })
    .collect();

  MonthlyReport {
    monthly_data,
    current_month,
    previous_month,
    funnel,
    groups: MetricGroups {
      display: group(&DISPLAY_GROUP, &current, &previous),
      engagement: group(&ENGAGEMENT_GROUP, &current, &previous),
      conversion: group(&CONVERSION_GROUP, &current, &previous),
    },
  }
}
