//! Transport seam
//!
//! The scheduler never touches the network itself; it hands each call to a
//! [`RequestExecutor`].

use crate::error::RestError;
use crate::request::{ApiRequest, ApiResponse};
use async_trait::async_trait;
use chat_common::RestConfig;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use tracing::debug;

/// Performs one HTTP call
#[async_trait]
pub trait RequestExecutor: Send + Sync + 'static {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, RestError>;
}

/// `reqwest` executor against the versioned API root
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: Client,
    base_url: String,
}

impl HttpExecutor {
    /// Build a client that authenticates every call with `token`
    pub fn new(token: &str, config: &RestConfig) -> Result<Self, RestError> {
        let mut headers = HeaderMap::new();
        let authorization = HeaderValue::from_str(&format!("Bot {token}")).map_err(|_| {
            RestError::InvalidHeader {
                name: "Authorization".to_string(),
                value: "<redacted>".to_string(),
            }
        })?;
        headers.insert(header::AUTHORIZATION, authorization);

        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .build()
            .map_err(|e| RestError::Transport(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.versioned_base_url(),
        })
    }

    /// Full URL of a path
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, RestError> {
    HeaderValue::from_str(value).map_err(|_| RestError::InvalidHeader {
        name: name.to_string(),
        value: value.to_string(),
    })
}

#[async_trait]
impl RequestExecutor for HttpExecutor {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, RestError> {
        let url = self.url(&request.path);
        debug!(method = %request.method, url = %url, "Sending request");

        let mut builder = self.client.request(request.method.clone(), &url);

        for (name, value) in &request.headers {
            let value = header_value(name, value)?;
            let name = HeaderName::try_from(name.as_str()).map_err(|_| RestError::InvalidHeader {
                name: name.clone(),
                value: String::new(),
            })?;
            builder = builder.header(name, value);
        }
        if let Some(reason) = &request.reason {
            let value = header_value("X-Audit-Log-Reason", reason)?;
            builder = builder.header("X-Audit-Log-Reason", value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                RestError::Transport(format!("Request timed out: {e}"))
            } else {
                RestError::Transport(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| RestError::Transport(e.to_string()))?;

        Ok(ApiResponse::new(status, headers, body.to_vec()))
    }
}
