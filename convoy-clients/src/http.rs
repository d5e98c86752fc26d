//! Shared JSON-over-HTTP plumbing for the service clients.

use convoy_core::{ConfigError, ConvoyConfig, ConvoyError, ConvoyResult, Service, TransportError};
use reqwest::{Client, Response, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Error body some services return alongside a non-2xx status.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

pub(crate) fn request_failed(service: Service, status: u16, message: impl Into<String>) -> ConvoyError {
    ConvoyError::Transport(TransportError::RequestFailed {
        service: service.to_string(),
        status,
        message: message.into(),
    })
}

pub(crate) fn invalid_response(service: Service, reason: impl Into<String>) -> ConvoyError {
    ConvoyError::Transport(TransportError::InvalidResponse {
        service: service.to_string(),
        reason: reason.into(),
    })
}

pub(crate) fn unreachable(service: Service, reason: impl Into<String>) -> ConvoyError {
    ConvoyError::Transport(TransportError::Unreachable {
        service: service.to_string(),
        reason: reason.into(),
    })
}

fn invalid_base_url(service: Service, value: &str, reason: impl Into<String>) -> ConvoyError {
    ConvoyError::Config(ConfigError::InvalidValue {
        field: service.field().to_string(),
        value: value.to_string(),
        reason: reason.into(),
    })
}

/// REST client bound to one service's base URL.
///
/// Request paths are given as segments and percent-encoded one by one, so
/// ids coming from remote services can never change the route.
#[derive(Debug, Clone)]
pub struct RestClient {
    client: Client,
    base_url: Url,
    service: Service,
}

impl RestClient {
    pub fn new(service: Service, base_url: &str, timeout: Duration) -> ConvoyResult<Self> {
        let parsed = Url::parse(base_url).map_err(|e| invalid_base_url(service, base_url, e.to_string()))?;
        if parsed.cannot_be_a_base() {
            return Err(invalid_base_url(service, base_url, "not a base URL"));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| unreachable(service, format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: parsed,
            service,
        })
    }

    /// Build a client for `service` from the configured endpoints.
    pub fn from_config(service: Service, config: &ConvoyConfig) -> ConvoyResult<Self> {
        let base_url = config.services.require(service)?;
        Self::new(service, base_url, config.request_timeout)
    }

    /// Base URL with `segments` appended, each one percent-encoded.
    pub fn endpoint(&self, segments: &[&str]) -> ConvoyResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| invalid_base_url(self.service, self.base_url.as_str(), "not a base URL"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub async fn get_json<T, Q>(&self, segments: &[&str], query: Option<&Q>) -> ConvoyResult<T>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let url = self.endpoint(segments)?;
        debug!(service = %self.service, path = url.path(), "GET");
        let mut request = self.client.get(url);
        if let Some(query) = query {
            request = request.query(query);
        }
        let response = request
            .send()
            .await
            .map_err(|e| unreachable(self.service, e.to_string()))?;
        self.parse_response(response).await
    }

    pub async fn post_json<T, B>(&self, segments: &[&str], body: &B) -> ConvoyResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = self.endpoint(segments)?;
        debug!(service = %self.service, path = url.path(), "POST");
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| unreachable(self.service, e.to_string()))?;
        self.parse_response(response).await
    }

    /// POST whose response body is ignored.
    pub async fn post_unit<B>(&self, segments: &[&str], body: Option<&B>) -> ConvoyResult<()>
    where
        B: Serialize + ?Sized,
    {
        let url = self.endpoint(segments)?;
        debug!(service = %self.service, path = url.path(), "POST");
        let mut request = self.client.post(url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| unreachable(self.service, e.to_string()))?;
        self.check_status(response).await
    }

    /// PUT whose response body is ignored.
    pub async fn put_unit<B>(&self, segments: &[&str], body: &B) -> ConvoyResult<()>
    where
        B: Serialize + ?Sized,
    {
        let url = self.endpoint(segments)?;
        debug!(service = %self.service, path = url.path(), "PUT");
        let response = self
            .client
            .put(url)
            .json(body)
            .send()
            .await
            .map_err(|e| unreachable(self.service, e.to_string()))?;
        self.check_status(response).await
    }

    pub async fn delete(&self, segments: &[&str]) -> ConvoyResult<()> {
        let url = self.endpoint(segments)?;
        debug!(service = %self.service, path = url.path(), "DELETE");
        let response = self
            .client
            .delete(url)
            .send()
            .await
            .map_err(|e| unreachable(self.service, e.to_string()))?;
        self.check_status(response).await
    }

    async fn parse_response<T: DeserializeOwned>(&self, response: Response) -> ConvoyResult<T> {
        let status = response.status();
        if status.is_success() {
            response
                .json::<T>()
                .await
                .map_err(|e| invalid_response(self.service, format!("Failed to parse response: {}", e)))
        } else {
            Err(self.error_from(status.as_u16(), response).await)
        }
    }

    async fn check_status(&self, response: Response) -> ConvoyResult<()> {
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(self.error_from(status.as_u16(), response).await)
        }
    }

    async fn error_from(&self, status: u16, response: Response) -> ConvoyError {
        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        request_failed(self.service, status, error_message(&text))
    }
}

/// Human-readable message from an error body: its `message` (prefixed by its
/// `code`) when the body is a JSON error object, the raw text otherwise.
pub(crate) fn error_message(text: &str) -> String {
    match serde_json::from_str::<ErrorBody>(text) {
        Ok(ErrorBody {
            message: Some(message),
            code: Some(code),
        }) => format!("{}: {}", code, message),
        Ok(ErrorBody {
            message: Some(message),
            code: None,
        }) => message,
        _ => text.to_string(),
    }
}
