use meta_ads_rollup::batch::{refresh_budgets, BatchSettings};
use meta_ads_rollup::budget_cache::BudgetCache;
use meta_ads_rollup::config::AppConfig;
use meta_ads_rollup::error::ReportError;
use meta_ads_rollup::providers::meta_graph::{CampaignRef, GraphClient};
use tracing_subscriber::EnvFilter;

fn parse_flag_value(args: &[String], flag: &str) -> Option<String> {
  args
    .iter()
    .position(|a| a == flag)
    .and_then(|idx| args.get(idx + 1))
    .cloned()
}

#[tokio::main]
async fn main() -> Result<(), ReportError> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "meta_ads_rollup=info".into()))
    .with_writer(std::io::stderr)
    .init();

  let args: Vec<String> = std::env::args().collect();
  let cfg = AppConfig::from_env()?;

  let cache_path = parse_flag_value(&args, "--cache-file")
    .map(std::path::PathBuf::from)
    .or_else(|| cfg.budget_cache_file.clone())
    .ok_or_else(|| ReportError::InvalidConfig("budget cache file is disabled".to_string()))?;
  let mut cache = BudgetCache::load(&cache_path);

  let accounts = match parse_flag_value(&args, "--account") {
    Some(account) => vec![account],
    None => cfg.account_ids.clone(),
  };
  if accounts.is_empty() {
    return Err(ReportError::InvalidConfig(
      "no ad accounts: pass --account or set FACEBOOK_ACCOUNT_IDS".to_string(),
    ));
  }

  let client = GraphClient::from_config(&cfg);
  let mut campaigns: Vec<CampaignRef> = Vec::new();
  for account in accounts.iter() {
    campaigns.extend(client.list_campaigns(account).await?);
  }

  let stored = refresh_budgets(&client, &campaigns, &mut cache, &BatchSettings::from_config(&cfg)).await?;
  println!(
    "ok=true campaigns_count={} budgets_stored={} cache_file={}",
    campaigns.len(),
    stored,
    cache_path.display()
  );

  Ok(())
}
