//! opslog-alert — outbound alert sinks for opslog.
//!
//! [`WebhookSink`] posts each [`ThresholdAlert`] as JSON to a configured URL
//! using a plain-HTTP hyper client. One request per alert; no retries. A
//! failed or slow webhook surfaces as an [`AlertError`], which the volume
//! guard logs and drops.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use http_body_util::{BodyExt, Full};
use hyper::header::CONTENT_TYPE;
use hyper::{Method, Request, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use opslog_core::config::GuardConfig;
use opslog_core::error::AlertError;
use opslog_core::guard::{AlertSink, ThresholdAlert};

/// Posts alerts to an HTTP webhook.
pub struct WebhookSink {
    uri: Uri,
    timeout: Duration,
    client: Client<HttpConnector, Full<Bytes>>,
}

impl WebhookSink {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, AlertError> {
        let invalid = |reason: String| AlertError::InvalidUrl {
            url: url.to_string(),
            reason,
        };
        let uri = url
            .trim()
            .parse::<Uri>()
            .map_err(|e| invalid(e.to_string()))?;
        match uri.scheme_str() {
            Some("http") => {}
            Some(other) => return Err(invalid(format!("unsupported scheme {other:?}, expected http"))),
            None => return Err(invalid("missing scheme".to_string())),
        }
        if uri.host().is_none() {
            return Err(invalid("missing host".to_string()));
        }

        let client = Client::builder(TokioExecutor::new()).build_http();
        Ok(Self { uri, timeout, client })
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    async fn post(&self, alert: &ThresholdAlert) -> Result<(), AlertError> {
        let body = serde_json::to_vec(alert)?;
        let request = Request::builder()
            .method(Method::POST)
            .uri(self.uri.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| AlertError::Transport(e.to_string()))?;

        let response = tokio::time::timeout(self.timeout, self.client.request(request))
            .await
            .map_err(|_| AlertError::Timeout(self.timeout))?
            .map_err(|e| AlertError::Transport(e.to_string()))?;

        let status = response.status();
        // Drain so the connection can go back to the pool.
        let _ = response.into_body().collect().await;

        if !status.is_success() {
            return Err(AlertError::Status(status.as_u16()));
        }
        tracing::debug!(uri = %self.uri, status = status.as_u16(), "webhook accepted alert");
        Ok(())
    }
}

impl AlertSink for WebhookSink {
    fn dispatch<'a>(&'a self, alert: &'a ThresholdAlert) -> BoxFuture<'a, Result<(), AlertError>> {
        Box::pin(self.post(alert))
    }
}

/// Build the configured sink, if any. An unset or blank `webhook_url`
/// disables alerting.
pub fn sink_from_config(config: &GuardConfig) -> Result<Option<Arc<dyn AlertSink>>, AlertError> {
    match config.webhook_url() {
        Some(url) => {
            let sink = WebhookSink::new(url, config.webhook_timeout())?;
            tracing::info!(uri = %sink.uri(), "log volume alerts enabled");
            Ok(Some(Arc::new(sink)))
        }
        None => {
            tracing::info!("no alert webhook configured; log volume alerts disabled");
            Ok(None)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
