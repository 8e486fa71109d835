use std::path::PathBuf;
use std::time::Duration;

use crate::error::ReportError;

pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.facebook.com/v23.0";

#[derive(Debug, Clone)]
pub struct AppConfig {
  pub access_token: String,
  pub account_ids: Vec<String>,
  pub graph_base_url: String,
  pub request_timeout: Duration,
  pub item_delay: Duration,
  pub batch_size: usize,
  pub batch_delay: Duration,
  pub budget_cache_file: Option<PathBuf>,
}

fn non_empty(value: Option<String>) -> Option<String> {
  value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_u64(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<u64, ReportError> {
  match non_empty(lookup(key)) {
    Some(raw) => raw
      .parse::<u64>()
      .map_err(|_| ReportError::InvalidConfig(format!("{key} must be a non-negative integer, got {raw:?}"))),
    None => Ok(default),
  }
}

impl AppConfig {
  pub fn from_env() -> Result<Self, ReportError> {
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  /// Builds the config from any key lookup. Credentials are the only hard
  /// requirement and are checked before anything else.
  pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ReportError> {
    let access_token = non_empty(lookup("USER_TOKEN"))
      .or_else(|| non_empty(lookup("FACEBOOK_ACCESS_TOKEN")))
      .ok_or(ReportError::MissingCredentials)?;

    let account_ids = lookup("FACEBOOK_ACCOUNT_IDS")
      .unwrap_or_default()
      .split(',')
      .map(str::trim)
      .filter(|v| !v.is_empty())
      .map(str::to_string)
      .collect();

    let graph_base_url = non_empty(lookup("META_GRAPH_BASE_URL"))
      .unwrap_or_else(|| DEFAULT_GRAPH_BASE_URL.to_string())
      .trim_end_matches('/')
      .to_string();

    let request_timeout_secs = parse_u64(&lookup, "META_REQUEST_TIMEOUT_SECS", 30)?.clamp(1, 120);
    let item_delay_ms = parse_u64(&lookup, "META_ITEM_DELAY_MS", 300)?;
    let batch_size = parse_u64(&lookup, "META_BATCH_SIZE", 10)?.max(1);
    let batch_delay_ms = parse_u64(&lookup, "META_BATCH_DELAY_MS", 2_000)?;

    let budget_cache_file = match lookup("BUDGET_CACHE_FILE") {
      Some(v) if v.trim().is_empty() => None,
      Some(v) => Some(PathBuf::from(v.trim())),
      None => Some(PathBuf::from("budget_cache.json")),
    };

    Ok(Self {
      access_token,
      account_ids,
      graph_base_url,
      request_timeout: Duration::from_secs(request_timeout_secs),
      item_delay: Duration::from_millis(item_delay_ms),
      batch_size: batch_size as usize,
      batch_delay: Duration::from_millis(batch_delay_ms),
      budget_cache_file,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect();
    move |key| map.get(key).cloned()
  }

  #[test]
  fn missing_token_is_fatal() {
    let err = AppConfig::from_lookup(lookup_from(&[("FACEBOOK_ACCOUNT_IDS", "act_1")])).unwrap_err();
    assert!(matches!(err, ReportError::MissingCredentials));

    let err = AppConfig::from_lookup(lookup_from(&[("USER_TOKEN", "   ")])).unwrap_err();
    assert!(matches!(err, ReportError::MissingCredentials));
  }

  #[test]
  fn user_token_takes_precedence() {
    let cfg = AppConfig::from_lookup(lookup_from(&[
      ("USER_TOKEN", "user"),
      ("FACEBOOK_ACCESS_TOKEN", "page"),
    ]))
    .unwrap();
    assert_eq!(cfg.access_token, "user");

    let cfg = AppConfig::from_lookup(lookup_from(&[("FACEBOOK_ACCESS_TOKEN", "page")])).unwrap();
    assert_eq!(cfg.access_token, "page");
  }

  #[test]
  fn defaults_apply() {
    let cfg = AppConfig::from_lookup(lookup_from(&[("USER_TOKEN", "t")])).unwrap();
    assert_eq!(cfg.graph_base_url, DEFAULT_GRAPH_BASE_URL);
    assert_eq!(cfg.request_timeout, Duration::from_secs(30));
    assert_eq!(cfg.item_delay, Duration::from_millis(300));
    assert_eq!(cfg.batch_size, 10);
    assert_eq!(cfg.batch_delay, Duration::from_millis(2_000));
    assert!(cfg.account_ids.is_empty());
    assert_eq!(cfg.budget_cache_file, Some(PathBuf::from("budget_cache.json")));
  }

  #[test]
  fn parses_accounts_and_overrides() {
    let cfg = AppConfig::from_lookup(lookup_from(&[
      ("USER_TOKEN", "t"),
      ("FACEBOOK_ACCOUNT_IDS", " act_1, ,act_2 "),
      ("META_GRAPH_BASE_URL", "http://127.0.0.1:9999/"),
      ("META_REQUEST_TIMEOUT_SECS", "500"),
      ("META_BATCH_SIZE", "0"),
      ("BUDGET_CACHE_FILE", ""),
    ]))
    .unwrap();
    assert_eq!(cfg.account_ids, vec!["act_1".to_string(), "act_2".to_string()]);
    assert_eq!(cfg.graph_base_url, "http://127.0.0.1:9999");
    assert_eq!(cfg.request_timeout, Duration::from_secs(120));
    assert_eq!(cfg.batch_size, 1);
    assert_eq!(cfg.budget_cache_file, None);
  }

  #[test]
  fn rejects_garbled_numbers() {
    let err = AppConfig::from_lookup(lookup_from(&[("USER_TOKEN", "t"), ("META_ITEM_DELAY_MS", "fast")])).unwrap_err();
    assert!(matches!(err, ReportError::InvalidConfig(_)));
  }
}
