//! Remote status client
//!
//! One `GET /api/orders/{number}` per call. Retrying is the caller's
//! business; this layer only classifies what came back.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{Span, debug, warn};

use super::error::RemoteError;
use super::types::AccrualOrder;
use crate::config::AccrualConfig;

#[async_trait]
pub trait AccrualClient: Send + Sync + 'static {
    /// Current provider view of an order.
    ///
    /// `Ok(None)` means the provider does not know the number yet.
    async fn get_order(&self, number: &str) -> Result<Option<AccrualOrder>, RemoteError>;
}

/// reqwest-backed [`AccrualClient`]
#[derive(Debug, Clone)]
pub struct HttpAccrualClient {
    client: Client,
    base_url: String,
    span: Span,
}

impl HttpAccrualClient {
    pub fn new(config: &AccrualConfig, span: Span) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| RemoteError::Transport(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self::with_client(client, &config.base_url, span))
    }

    pub fn with_client(client: Client, base_url: &str, span: Span) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            span,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// `Retry-After` in its delay-seconds form
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl AccrualClient for HttpAccrualClient {
    async fn get_order(&self, number: &str) -> Result<Option<AccrualOrder>, RemoteError> {
        let url = format!("{}/api/orders/{}", self.base_url, number);
        debug!(parent: &self.span, %url, "GET order status");

        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            debug!(parent: &self.span, order = number, "Order not registered at provider yet");
            return Ok(None);
        }

        if status.is_success() {
            let body = response
                .text()
                .await
                .map_err(|e| RemoteError::Transport(e.to_string()))?;
            let order: AccrualOrder =
                serde_json::from_str(&body).map_err(|e| RemoteError::Decode(e.to_string()))?;
            let order = order.checked(number)?;
            debug!(
                parent: &self.span,
                order = number,
                status = %order.status,
                accrual = ?order.accrual,
                "GetOrder success"
            );
            return Ok(Some(order));
        }

        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        warn!(
            parent: &self.span,
            order = number,
            http_status = status.as_u16(),
            http_body = %body,
            "Provider responded with error"
        );
        Err(RemoteError::Status {
            status: status.as_u16(),
            body,
            retry_after,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_parse_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("3"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_parse_retry_after_ignores_http_date() {
        let mut headers = HeaderMap::new();
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), None);
        assert_eq!(parse_retry_after(&HeaderMap::new()), None);
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = HttpAccrualClient::with_client(Client::new(), "http://localhost:8081/", Span::none());
        assert_eq!(client.base_url(), "http://localhost:8081");
    }
}
