use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::header::ACCEPT;
use hyper::{Method, Request, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::aggregate::{coerce_f64, parse_insight_rows, RawInsightRow};
use crate::budget_cache::BudgetEntry;
use crate::config::AppConfig;
use crate::http_client::https_client;
use crate::providers::meta_insights::InsightsQuery;

/// Graph API error code for an expired, revoked or otherwise invalid token.
pub const TOKEN_INVALID_CODE: i64 = 190;

const MAX_CAMPAIGN_PAGES: usize = 10;

#[derive(Debug, Clone)]
pub struct GraphApiError {
  pub status: Option<u16>,
  pub code: Option<i64>,
  pub message: String,
}

impl std::fmt::Display for GraphApiError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match (self.status, self.code) {
      (Some(status), Some(code)) => write!(f, "Graph API error (status {status}, code {code}): {}", self.message),
      (Some(status), None) => write!(f, "Graph API error (status {status}): {}", self.message),
      (None, Some(code)) => write!(f, "Graph API error (code {code}): {}", self.message),
      (None, None) => write!(f, "Graph API error: {}", self.message),
    }
  }
}

impl std::error::Error for GraphApiError {}

impl GraphApiError {
  fn transport(message: impl Into<String>) -> Self {
    Self {
      status: None,
      code: None,
      message: message.into(),
    }
  }

  pub fn is_token_invalid(&self) -> bool {
    self.code == Some(TOKEN_INVALID_CODE)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignRef {
  pub id: String,
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub status: String,
  #[serde(default)]
  pub account_id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub objective: Option<String>,
}

impl CampaignRef {
  pub fn is_active(&self) -> bool {
    is_active_status(&self.status)
  }
}

pub fn is_active_status(status: &str) -> bool {
  status.trim().eq_ignore_ascii_case("ACTIVE")
}

/// Ad account ids are addressed as `act_<id>`; bare numeric ids get the prefix.
pub fn normalize_account_id(account_id: &str) -> String {
  let trimmed = account_id.trim();
  if trimmed.starts_with("act_") {
    trimmed.to_string()
  } else {
    format!("act_{trimmed}")
  }
}

/// The two upstream calls the pipeline needs. `GraphClient` talks HTTP; tests
/// substitute canned sources.
#[allow(async_fn_in_trait)]
pub trait AdsGraph {
  async fn fetch_insights(&self, campaign_id: &str, query: &InsightsQuery) -> Result<Vec<RawInsightRow>, GraphApiError>;

  async fn fetch_campaign_budget(&self, campaign_id: &str) -> Result<BudgetEntry, GraphApiError>;
}

#[derive(Debug, Clone)]
pub struct GraphClient {
  base_url: String,
  access_token: String,
  timeout: Duration,
}

fn error_from_envelope(json: &Value) -> Option<(Option<i64>, String)> {
  let err = json.get("error")?;
  let code = err.get("code").and_then(|v| v.as_i64());
  let message = err
    .get("message")
    .and_then(|v| v.as_str())
    .unwrap_or("unknown error")
    .to_string();
  Some((code, message))
}

fn parse_budget(json: &Value) -> BudgetEntry {
  let field = |name: &str| json.get(name).map(coerce_f64).unwrap_or(0.0);
  BudgetEntry {
    daily_budget: field("daily_budget"),
    lifetime_budget: field("lifetime_budget"),
    budget_remaining: field("budget_remaining"),
  }
}

fn parse_campaigns(json: &Value, account_id: &str) -> Vec<CampaignRef> {
  json
    .get("data")
    .and_then(|v| v.as_array())
    .cloned()
    .unwrap_or_default()
    .into_iter()
    .filter_map(|item| serde_json::from_value::<CampaignRef>(item).ok())
    .filter(|c| !c.id.trim().is_empty())
    .map(|mut c| {
      c.account_id = account_id.to_string();
      c
    })
    .collect()
}

fn next_page_cursor(json: &Value) -> Option<String> {
  let paging = json.get("paging")?;
  paging.get("next")?;
  paging
    .get("cursors")
    .and_then(|c| c.get("after"))
    .and_then(|v| v.as_str())
    .map(str::to_string)
}

impl GraphClient {
  pub fn new(base_url: &str, access_token: &str, timeout: Duration) -> Self {
    Self {
      base_url: base_url.trim_end_matches('/').to_string(),
      access_token: access_token.to_string(),
      timeout,
    }
  }

  pub fn from_config(cfg: &AppConfig) -> Self {
    Self::new(&cfg.graph_base_url, &cfg.access_token, cfg.request_timeout)
  }

  fn build_url(&self, path: &str, params: &[(&str, String)]) -> Result<String, GraphApiError> {
    let base = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
    let mut all: Vec<(&str, &str)> = vec![("access_token", self.access_token.as_str())];
    all.extend(params.iter().map(|(k, v)| (*k, v.as_str())));
    url::Url::parse_with_params(&base, all)
      .map(|u| u.to_string())
      .map_err(|e| GraphApiError::transport(format!("invalid url for {path}: {e}")))
  }

  /// One bounded GET. Non-200 responses and 200 responses carrying an `error`
  /// envelope both come back as `GraphApiError` with the upstream code.
  pub async fn get_json(&self, path: &str, params: &[(&str, String)]) -> Result<Value, GraphApiError> {
    let url = self.build_url(path, params)?;
    let client = https_client().map_err(|e| GraphApiError::transport(e.to_string()))?;

    let req = Request::builder()
      .method(Method::GET)
      .uri(url)
      .header(ACCEPT, "application/json")
      .body(Empty::<Bytes>::new())
      .map_err(|e| GraphApiError::transport(e.to_string()))?;

    let call = async {
      let resp = client
        .request(req)
        .await
        .map_err(|e| GraphApiError::transport(e.to_string()))?;
      let status = resp.status();
      let body = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| GraphApiError {
          status: Some(status.as_u16()),
          code: None,
          message: e.to_string(),
        })?
        .to_bytes();
      Ok::<_, GraphApiError>((status, body))
    };

    let (status, body) = tokio::time::timeout(self.timeout, call)
      .await
      .map_err(|_| GraphApiError::transport(format!("request to {path} timed out after {:?}", self.timeout)))??;

    let json = serde_json::from_slice::<Value>(&body);

    if status != StatusCode::OK {
      let (code, message) = match json.as_ref().ok().and_then(error_from_envelope) {
        Some(v) => v,
        None => {
          let snippet = String::from_utf8_lossy(&body).chars().take(400).collect::<String>();
          (None, format!("{snippet} (path: {path})"))
        }
      };
      return Err(GraphApiError {
        status: Some(status.as_u16()),
        code,
        message,
      });
    }

    let json = json.map_err(|e| GraphApiError {
      status: Some(status.as_u16()),
      code: None,
      message: format!("invalid json response: {e}"),
    })?;

    if let Some((code, message)) = error_from_envelope(&json) {
      return Err(GraphApiError {
        status: Some(status.as_u16()),
        code,
        message,
      });
    }

    Ok(json)
  }

  pub async fn list_campaigns(&self, account_id: &str) -> Result<Vec<CampaignRef>, GraphApiError> {
    let account_id = normalize_account_id(account_id);
    let path = format!("{account_id}/campaigns");

    let mut out = Vec::new();
    let mut after: Option<String> = None;
    for _ in 0..MAX_CAMPAIGN_PAGES {
      let mut params = vec![
        ("fields", "id,name,status,objective".to_string()),
        ("limit", "100".to_string()),
      ];
      if let Some(cursor) = after.take() {
        params.push(("after", cursor));
      }

      let json = self.get_json(&path, &params).await?;
      out.extend(parse_campaigns(&json, &account_id));

      match next_page_cursor(&json) {
        Some(cursor) => after = Some(cursor),
        None => break,
      }
    }

    tracing::info!(account_id = %account_id, campaigns = out.len(), "listed campaigns");
    Ok(out)
  }
}

impl AdsGraph for GraphClient {
  async fn fetch_insights(&self, campaign_id: &str, query: &InsightsQuery) -> Result<Vec<RawInsightRow>, GraphApiError> {
    let path = format!("{}/insights", campaign_id.trim());
    let json = self.get_json(&path, &query.to_params()).await?;
    Ok(parse_insight_rows(&json))
  }

  async fn fetch_campaign_budget(&self, campaign_id: &str) -> Result<BudgetEntry, GraphApiError> {
    let params = [("fields", "daily_budget,lifetime_budget,budget_remaining".to_string())];
    let json = self.get_json(campaign_id.trim(), &params).await?;
    Ok(parse_budget(&json))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::providers::meta_insights::{DatePreset, DateWindow, FieldSet};
  use http_body_util::Full;
  use hyper::body::Incoming;
  use hyper::server::conn::http1;
  use hyper::service::service_fn;
  use hyper::Response;
  use hyper_util::rt::TokioIo;
  use std::collections::HashMap;
  use tokio::net::TcpListener;

  type Responder = fn(&str, &HashMap<String, String>) -> (StatusCode, String);

  async fn serve_graph(listener: TcpListener, max_connections: usize, responder: Responder) {
    for _ in 0..max_connections {
      let (stream, _) = listener.accept().await.unwrap();
      let io = TokioIo::new(stream);
      http1::Builder::new()
        .serve_connection(
          io,
          service_fn(move |req: Request<Incoming>| async move {
            let path = req.uri().path().to_string();
            let query: HashMap<String, String> = url::form_urlencoded::parse(req.uri().query().unwrap_or("").as_bytes())
              .into_owned()
              .collect();
            let (status, body) = responder(&path, &query);
            Ok::<_, hyper::Error>(
              Response::builder()
                .status(status)
                .header("content-type", "application/json")
                .body(Full::new(Bytes::from(body)))
                .unwrap(),
            )
          }),
        )
        .await
        .unwrap();
    }
  }

  async fn start(max_connections: usize, responder: Responder) -> (GraphClient, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let base_url = format!("http://{}/v23.0", addr);
    let task = tokio::spawn(serve_graph(listener, max_connections, responder));
    (GraphClient::new(&base_url, "token123", Duration::from_secs(5)), task)
  }

  #[test]
  fn build_url_encodes_params_and_token() {
    let client = GraphClient::new("https://graph.facebook.com/v23.0/", "tok", Duration::from_secs(1));
    let url = client
      .build_url("123/insights", &[("fields", "impressions,clicks".to_string())])
      .unwrap();
    assert!(url.starts_with("https://graph.facebook.com/v23.0/123/insights?"));
    assert!(url.contains("access_token=tok"));
    assert!(url.contains("fields=impressions%2Cclicks"));
  }

  #[test]
  fn normalize_account_id_adds_prefix_once() {
    assert_eq!(normalize_account_id("12345"), "act_12345");
    assert_eq!(normalize_account_id(" act_12345 "), "act_12345");
  }

  #[tokio::test]
  async fn fetches_insight_rows_with_daily_increment() {
    let (client, task) = start(1, |path, query| {
      assert_eq!(path, "/v23.0/120/insights");
      assert_eq!(query.get("access_token").map(String::as_str), Some("token123"));
      assert_eq!(query.get("date_preset").map(String::as_str), Some("last_7d"));
      assert_eq!(query.get("time_increment").map(String::as_str), Some("1"));
      assert!(query.get("fields").unwrap().contains("conversion_values"));
      let body = r#"{"data":[
        {"date_start":"2025-08-01","date_stop":"2025-08-01","impressions":"100","clicks":"3","spend":"1.20"},
        {"date_start":"2025-08-02","date_stop":"2025-08-02","impressions":"90","clicks":"2","spend":"1.00"}
      ]}"#;
      (StatusCode::OK, body.to_string())
    })
    .await;

    let query = InsightsQuery::new(DateWindow::Preset(DatePreset::Last7d), FieldSet::Full, true);
    let rows = client.fetch_insights("120", &query).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].date_start.as_deref(), Some("2025-08-02"));

    task.await.unwrap();
  }

  #[tokio::test]
  async fn surfaces_token_invalid_code() {
    let (client, task) = start(1, |_, _| {
      let body = r#"{"error":{"message":"Error validating access token: Session has expired","type":"OAuthException","code":190,"error_subcode":463}}"#;
      (StatusCode::BAD_REQUEST, body.to_string())
    })
    .await;

    let query = InsightsQuery::new(DateWindow::Preset(DatePreset::Last30d), FieldSet::Full, true);
    let err = client.fetch_insights("120", &query).await.unwrap_err();
    assert!(err.is_token_invalid());
    assert_eq!(err.status, Some(400));
    assert!(err.message.contains("Session has expired"));

    task.await.unwrap();
  }

  #[tokio::test]
  async fn error_envelope_on_200_is_still_an_error() {
    let (client, task) = start(1, |_, _| {
      (StatusCode::OK, r#"{"error":{"message":"(#17) User request limit reached","code":17}}"#.to_string())
    })
    .await;

    let err = client.fetch_campaign_budget("120").await.unwrap_err();
    assert_eq!(err.code, Some(17));
    assert!(!err.is_token_invalid());

    task.await.unwrap();
  }

  #[tokio::test]
  async fn non_json_error_body_keeps_snippet() {
    let (client, task) = start(1, |_, _| (StatusCode::BAD_GATEWAY, "upstream down".to_string())).await;

    let err = client.fetch_campaign_budget("120").await.unwrap_err();
    assert_eq!(err.status, Some(502));
    assert_eq!(err.code, None);
    assert!(err.message.contains("upstream down"));
    assert!(!err.message.contains("token123"));

    task.await.unwrap();
  }

  #[tokio::test]
  async fn parses_budget_fields_leniently() {
    let (client, task) = start(1, |path, query| {
      assert_eq!(path, "/v23.0/120");
      assert_eq!(
        query.get("fields").map(String::as_str),
        Some("daily_budget,lifetime_budget,budget_remaining")
      );
      (
        StatusCode::OK,
        r#"{"id":"120","daily_budget":"50000","budget_remaining":"12500.5"}"#.to_string(),
      )
    })
    .await;

    let budget = client.fetch_campaign_budget("120").await.unwrap();
    assert_eq!(budget.daily_budget, 50000.0);
    assert_eq!(budget.lifetime_budget, 0.0);
    assert_eq!(budget.budget_remaining, 12500.5);

    task.await.unwrap();
  }

  #[tokio::test]
  async fn lists_campaigns_across_pages() {
    let (client, task) = start(2, |path, query| {
      assert_eq!(path, "/v23.0/act_42/campaigns");
      let body = match query.get("after").map(String::as_str) {
        None => r#"{"data":[{"id":"1","name":"LS2 Video Summer","status":"ACTIVE","objective":"OUTCOME_ENGAGEMENT"}],
                   "paging":{"cursors":{"after":"c1"},"next":"https://graph.facebook.com/next"}}"#,
        Some("c1") => r#"{"data":[{"id":"2","name":"EGO Image","status":"PAUSED"},{"name":"missing id"}],
                          "paging":{"cursors":{"after":"c2"}}}"#,
        Some(other) => panic!("unexpected cursor {other}"),
      };
      (StatusCode::OK, body.to_string())
    })
    .await;

    let campaigns = client.list_campaigns("42").await.unwrap();
    assert_eq!(campaigns.len(), 2);
    assert_eq!(campaigns[0].account_id, "act_42");
    assert!(campaigns[0].is_active());
    assert_eq!(campaigns[1].status, "PAUSED");
    assert_eq!(campaigns[1].objective, None);

    task.await.unwrap();
  }

  #[tokio::test]
  async fn slow_upstream_hits_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let task = tokio::spawn(async move {
      let (stream, _) = listener.accept().await.unwrap();
      tokio::time::sleep(Duration::from_secs(2)).await;
      drop(stream);
    });

    let client = GraphClient::new(&format!("http://{}", addr), "t", Duration::from_millis(200));
    let err = client.fetch_campaign_budget("120").await.unwrap_err();
    assert_eq!(err.status, None);
    assert!(err.message.contains("timed out"));

    task.await.unwrap();
  }
}
