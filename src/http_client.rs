use std::sync::OnceLock;

use bytes::Bytes;
use http_body_util::Empty;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

pub type HttpsClient = Client<HttpsConnector<HttpConnector>, Empty<Bytes>>;

static SHARED_CONNECTOR: OnceLock<HttpsConnector<HttpConnector>> = OnceLock::new();

fn build_connector() -> Result<HttpsConnector<HttpConnector>, std::io::Error> {
  Ok(
    hyper_rustls::HttpsConnectorBuilder::new()
      .with_native_roots()?
      // Plain http stays enabled for loopback mock servers in tests and local dev.
      .https_or_http()
      .enable_http1()
      .build(),
  )
}

/// The TLS connector (and its root store) is built once per process.
fn shared_connector() -> Result<&'static HttpsConnector<HttpConnector>, std::io::Error> {
  if let Some(connector) = SHARED_CONNECTOR.get() {
    return Ok(connector);
  }

  let connector = build_connector()?;
  let _ = SHARED_CONNECTOR.set(connector);
  SHARED_CONNECTOR
    .get()
    .ok_or_else(|| std::io::Error::other("https connector must be initialized"))
}

/// A fresh client per call. Its connections close when it is dropped.
pub fn https_client() -> Result<HttpsClient, std::io::Error> {
  let connector = shared_connector()?.clone();
  Ok(Client::builder(TokioExecutor::new()).build(connector))
}
