use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
  ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
  ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessageArgs,
  ChatCompletionRequestUserMessageContent, CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use serde::{Deserialize, Serialize};

use crate::aggregate::CanonicalMetricBucket;
use crate::derived;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_INSIGHT_CACHE_TTL_SECS: u64 = 2 * 60 * 60;
pub const DEFAULT_INSIGHT_CACHE_MAX_ENTRIES: usize = 256;
const RECENT_TREND_DAYS: usize = 3;
const RAW_FALLBACK_MAX_CHARS: usize = 600;

#[derive(Debug, Clone)]
pub struct InsightError {
  pub message: String,
}

impl InsightError {
  fn new(message: impl Into<String>) -> Self {
    Self { message: message.into() }
  }
}

impl std::fmt::Display for InsightError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "insight generation failed: {}", self.message)
  }
}

impl std::error::Error for InsightError {}

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
  pub api_key: String,
  pub model: String,
  pub cache_ttl_secs: u64,
  pub cache_max_entries: usize,
}

impl OpenAiConfig {
  /// `None` when `OPENAI_API_KEY` is unset; AI analysis is then skipped.
  pub fn from_env_optional() -> Option<Self> {
    Self::from_lookup_optional(|key| std::env::var(key).ok())
  }

  pub fn from_lookup_optional(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
    let api_key = lookup("OPENAI_API_KEY")?.trim().to_string();
    if api_key.is_empty() {
      return None;
    }

    let model = lookup("OPENAI_MODEL")
      .map(|v| v.trim().to_string())
      .filter(|v| !v.is_empty())
      .unwrap_or_else(|| DEFAULT_MODEL.to_string());
    let cache_ttl_secs = lookup("OPENAI_INSIGHT_CACHE_TTL_SECS")
      .and_then(|v| v.trim().parse::<u64>().ok())
      .unwrap_or(DEFAULT_INSIGHT_CACHE_TTL_SECS);
    let cache_max_entries = lookup("OPENAI_INSIGHT_CACHE_MAX_ENTRIES")
      .and_then(|v| v.trim().parse::<usize>().ok())
      .filter(|v| *v > 0)
      .unwrap_or(DEFAULT_INSIGHT_CACHE_MAX_ENTRIES);

    Some(Self {
      api_key,
      model,
      cache_ttl_secs,
      cache_max_entries,
    })
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PayloadMetrics {
  pub impressions: u64,
  pub clicks: u64,
  pub spend: f64,
  pub ctr: f64,
  pub cpc: f64,
  pub reach: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
  pub date: String,
  pub impressions: u64,
  pub clicks: u64,
  pub spend: f64,
}

/// Compact summary handed to the model. Only summary metrics and the last few
/// days are included to keep the prompt small.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisPayload {
  pub campaign_id: String,
  pub metrics: PayloadMetrics,
  pub recent_trend: Vec<TrendPoint>,
}

fn round2(v: f64) -> f64 {
  (v * 100.0).round() / 100.0
}

impl AnalysisPayload {
  pub fn build<'a>(
    campaign_id: &str,
    totals: &CanonicalMetricBucket,
    daily: impl IntoIterator<Item = (&'a String, &'a CanonicalMetricBucket)>,
  ) -> Self {
    let daily: Vec<(&String, &CanonicalMetricBucket)> = daily.into_iter().collect();
    let skip = daily.len().saturating_sub(RECENT_TREND_DAYS);
    let recent_trend = daily
      .into_iter()
      .skip(skip)
      .map(|(date, bucket)| TrendPoint {
        date: date.clone(),
        impressions: bucket.impressions,
        clicks: bucket.clicks,
        spend: round2(bucket.spend),
      })
      .collect();

    Self {
      campaign_id: campaign_id.to_string(),
      metrics: PayloadMetrics {
        impressions: totals.impressions,
        clicks: totals.clicks,
        spend: round2(totals.spend),
        ctr: round2(derived::ctr(totals)),
        cpc: round2(derived::cpc(totals)),
        reach: totals.reach,
      },
      recent_trend,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiInsights {
  pub insights: Vec<String>,
  pub recommendations: Vec<String>,
  #[serde(default)]
  pub cached: bool,
}

#[allow(async_fn_in_trait)]
pub trait InsightGenerator {
  async fn generate(&self, payload: &AnalysisPayload) -> Result<AiInsights, InsightError>;
}

pub fn build_analysis_messages(payload: &AnalysisPayload) -> Result<Vec<ChatCompletionRequestMessage>, InsightError> {
  let system = r#"You are a Meta Ads performance analyst.
Return STRICT JSON only (no markdown, no commentary) with:
{"insights":["..."],"recommendations":["..."]}.
Keep each item to one short, actionable sentence."#;

  let data = serde_json::to_string(payload).map_err(|e| InsightError::new(e.to_string()))?;
  let user = format!("Campaign data:\n{data}\nTask: Summarize performance and suggest next steps.");

  let system_msg = ChatCompletionRequestSystemMessageArgs::default()
    .content(ChatCompletionRequestSystemMessageContent::Text(system.to_string()))
    .build()
    .map_err(|e| InsightError::new(e.to_string()))?;

  let user_msg = ChatCompletionRequestUserMessageArgs::default()
    .content(ChatCompletionRequestUserMessageContent::Text(user))
    .build()
    .map_err(|e| InsightError::new(e.to_string()))?;

  Ok(vec![
    ChatCompletionRequestMessage::System(system_msg),
    ChatCompletionRequestMessage::User(user_msg),
  ])
}

pub fn build_chat_completions_request(
  model: &str,
  messages: Vec<ChatCompletionRequestMessage>,
  max_tokens: u32,
) -> Result<CreateChatCompletionRequest, InsightError> {
  CreateChatCompletionRequestArgs::default()
    .model(model)
    .messages(messages)
    .temperature(0.2)
    .max_completion_tokens(max_tokens)
    .build()
    .map_err(|e| InsightError::new(e.to_string()))
}

fn normalize_model_json_text(raw: &str) -> String {
  let mut text = raw.trim().to_string();
  if !text.starts_with("```") {
    return text;
  }

  if let Some(first_nl) = text.find('\n') {
    text = text[(first_nl + 1)..].to_string();
  }
  if let Some(end_fence) = text.rfind("```") {
    text = text[..end_fence].to_string();
  }
  text.trim().to_string()
}

fn parse_model_json(raw: &str) -> Option<serde_json::Value> {
  let normalized = normalize_model_json_text(raw);
  if normalized.is_empty() {
    return None;
  }

  if let Ok(v) = serde_json::from_str::<serde_json::Value>(&normalized) {
    return Some(v);
  }

  let start = normalized.find('{')?;
  let end = normalized.rfind('}')?;
  if end <= start {
    return None;
  }
  serde_json::from_str::<serde_json::Value>(&normalized[start..=end]).ok()
}

fn string_list(v: Option<&serde_json::Value>) -> Vec<String> {
  match v {
    Some(serde_json::Value::Array(items)) => items
      .iter()
      .filter_map(|item| match item {
        serde_json::Value::String(s) => Some(s.trim().to_string()),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
      })
      .filter(|s| !s.is_empty())
      .collect(),
    Some(serde_json::Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
    _ => Vec::new(),
  }
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
  s.chars().take(max_chars).collect()
}

/// Tolerant reply parsing: strict JSON, fenced JSON, or an embedded object.
/// Anything else becomes a single raw-text insight.
pub fn coerce_analysis_reply(raw_output: &str) -> AiInsights {
  let raw_output = raw_output.trim();
  if let Some(v) = parse_model_json(raw_output) {
    if v.is_object() {
      return AiInsights {
        insights: string_list(v.get("insights")),
        recommendations: string_list(v.get("recommendations")),
        cached: false,
      };
    }
  }

  let snippet = truncate_chars(raw_output, RAW_FALLBACK_MAX_CHARS);
  AiInsights {
    insights: if snippet.is_empty() { Vec::new() } else { vec![snippet] },
    recommendations: Vec::new(),
    cached: false,
  }
}

pub fn openai_client(api_key: &str) -> Client<OpenAIConfig> {
  let config = OpenAIConfig::new().with_api_key(api_key);
  Client::with_config(config)
}

pub struct OpenAiInsightGenerator {
  client: Client<OpenAIConfig>,
  model: String,
  max_tokens: u32,
}

impl OpenAiInsightGenerator {
  pub fn new(config: &OpenAiConfig) -> Self {
    Self {
      client: openai_client(&config.api_key),
      model: config.model.clone(),
      max_tokens: 800,
    }
  }
}

impl InsightGenerator for OpenAiInsightGenerator {
  async fn generate(&self, payload: &AnalysisPayload) -> Result<AiInsights, InsightError> {
    let messages = build_analysis_messages(payload)?;
    let req = build_chat_completions_request(&self.model, messages, self.max_tokens)?;
    let resp = self
      .client
      .chat()
      .create(req)
      .await
      .map_err(|e| InsightError::new(e.to_string()))?;

    let content = resp
      .choices
      .into_iter()
      .next()
      .and_then(|choice| choice.message.content)
      .unwrap_or_default();
    tracing::debug!(campaign_id = %payload.campaign_id, chars = content.len(), "model reply received");

    Ok(coerce_analysis_reply(&content))
  }
}
