use chrono::NaiveDate;
use tracing_subscriber::EnvFilter;

use meta_ads_rollup::aggregate::Granularity;
use meta_ads_rollup::batch::{run_batch, BatchSettings};
use meta_ads_rollup::budget_cache::BudgetCache;
use meta_ads_rollup::config::AppConfig;
use meta_ads_rollup::error::ReportError;
use meta_ads_rollup::insight_cache::{CachedInsightGenerator, InsightCache};
use meta_ads_rollup::providers::meta_graph::{CampaignRef, GraphClient};
use meta_ads_rollup::providers::meta_insights::{DatePreset, DateWindow};
use meta_ads_rollup::providers::openai::{AnalysisPayload, InsightGenerator, OpenAiConfig, OpenAiInsightGenerator};
use meta_ads_rollup::report::{build_monthly_report, build_totals_report, CampaignFilter};

fn parse_flag_value(args: &[String], flag: &str) -> Option<String> {
  args
    .iter()
    .position(|a| a == flag)
    .and_then(|idx| args.get(idx + 1))
    .cloned()
}

fn parse_date(raw: &str, flag: &str) -> Result<NaiveDate, ReportError> {
  NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
    .map_err(|_| ReportError::InvalidConfig(format!("{flag} must be YYYY-MM-DD, got {raw:?}")))
}

fn parse_window(args: &[String]) -> Result<Option<DateWindow>, ReportError> {
  let since = parse_flag_value(args, "--since");
  let until = parse_flag_value(args, "--until");
  match (since, until) {
    (Some(since), Some(until)) => {
      let since = parse_date(&since, "--since")?;
      let until = parse_date(&until, "--until")?;
      if since > until {
        return Err(ReportError::InvalidConfig("--since must be <= --until".to_string()));
      }
      return Ok(Some(DateWindow::Range { since, until }));
    }
    (None, None) => {}
    _ => {
      return Err(ReportError::InvalidConfig(
        "--since and --until must be given together".to_string(),
      ))
    }
  }

  parse_flag_value(args, "--preset")
    .map(|raw| {
      raw
        .parse::<DatePreset>()
        .map(DateWindow::Preset)
        .map_err(ReportError::InvalidConfig)
    })
    .transpose()
}

#[tokio::main]
async fn main() -> Result<(), ReportError> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "meta_ads_rollup=info".into()))
    .with_writer(std::io::stderr)
    .init();

  let args: Vec<String> = std::env::args().collect();
  let cfg = AppConfig::from_env()?;

  let granularity = parse_flag_value(&args, "--granularity")
    .unwrap_or_else(|| "day".to_string())
    .parse::<Granularity>()
    .map_err(ReportError::InvalidConfig)?;
  let window = parse_window(&args)?;
  let month = parse_flag_value(&args, "--month");
  let limit = parse_flag_value(&args, "--limit").and_then(|v| v.trim().parse::<usize>().ok());
  let with_ai = args.iter().any(|a| a == "--ai");

  let accounts = match parse_flag_value(&args, "--account") {
    Some(account) => vec![account],
    None => cfg.account_ids.clone(),
  };
  if accounts.is_empty() {
    return Err(ReportError::InvalidConfig(
      "no ad accounts: pass --account or set FACEBOOK_ACCOUNT_IDS".to_string(),
    ));
  }

  let filter = CampaignFilter::from_csv(
    parse_flag_value(&args, "--brand").as_deref(),
    parse_flag_value(&args, "--status").as_deref(),
  );

  let client = GraphClient::from_config(&cfg);
  let mut campaigns: Vec<CampaignRef> = Vec::new();
  for account in accounts.iter() {
    campaigns.extend(filter.apply(client.list_campaigns(account).await?));
  }
  if let Some(limit) = limit {
    campaigns.truncate(limit);
  }

  let mut cache = match cfg.budget_cache_file.as_ref() {
    Some(path) => BudgetCache::load(path),
    None => BudgetCache::in_memory(),
  };

  let outcome = run_batch(
    &client,
    &campaigns,
    window.as_ref(),
    &mut cache,
    &BatchSettings::from_config(&cfg),
  )
  .await
  .into_result()?;

  let mut out = match granularity {
    Granularity::Day => serde_json::to_value(build_totals_report(&outcome.campaigns))?,
    Granularity::Month => serde_json::to_value(build_monthly_report(&outcome.campaigns, month.as_deref()))?,
  };

  if with_ai {
    match OpenAiConfig::from_env_optional() {
      Some(ai_cfg) => {
        let generator = CachedInsightGenerator::new(OpenAiInsightGenerator::new(&ai_cfg), InsightCache::from_config(&ai_cfg));
        let totals = build_totals_report(&outcome.campaigns);
        let daily: Vec<(String, _)> = totals.daily.iter().map(|d| (d.date.clone(), d.bucket)).collect();
        let payload = AnalysisPayload::build(
          "all",
          &totals.totals.bucket,
          daily.iter().map(|(date, bucket)| (date, bucket)),
        );
        match generator.generate(&payload).await {
          Ok(analysis) => out["ai_analysis"] = serde_json::to_value(analysis)?,
          Err(err) => tracing::warn!(error = %err, "ai analysis skipped"),
        }
      }
      None => tracing::warn!("--ai given but OPENAI_API_KEY is not set"),
    }
  }

  out["campaigns_empty"] = serde_json::to_value(&outcome.empty)?;
  out["campaigns_failed"] = serde_json::to_value(&outcome.failed)?;

  println!("{}", serde_json::to_string_pretty(&out)?);
  Ok(())
}
