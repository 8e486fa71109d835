use crate::providers::meta_graph::GraphApiError;

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
  #[error("missing upstream credentials: set USER_TOKEN or FACEBOOK_ACCESS_TOKEN")]
  MissingCredentials,

  #[error("invalid configuration: {0}")]
  InvalidConfig(String),

  #[error("upstream access token expired or invalid: {0}")]
  AuthExpired(GraphApiError),

  #[error(transparent)]
  Upstream(GraphApiError),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),
}

/// Token rejections keep their own variant so callers can prompt for a new token.
impl From<GraphApiError> for ReportError {
  fn from(err: GraphApiError) -> Self {
    if err.is_token_invalid() {
      ReportError::AuthExpired(err)
    } else {
      ReportError::Upstream(err)
    }
  }
}
