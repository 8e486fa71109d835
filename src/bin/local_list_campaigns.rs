use meta_ads_rollup::config::AppConfig;
use meta_ads_rollup::error::ReportError;
use meta_ads_rollup::providers::meta_graph::GraphClient;
use meta_ads_rollup::report::{infer_brand, CampaignFilter};
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
  let mut total = 0usize;
  for account in accounts.iter() {
    let campaigns = filter.apply(client.list_campaigns(account).await?);
    total += campaigns.len();
    for c in campaigns {
      println!(
        "{}\t{}\t{}\t{}\t{}",
        c.account_id,
        c.id,
        c.status,
        infer_brand(&c.name).as_str(),
        c.name
      );
    }
  }
  println!("ok=true campaigns_count={total}");

  Ok(())
}
