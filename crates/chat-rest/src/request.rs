//! Request and response types passed between the scheduler and its executor

use crate::error::RestError;
use crate::route::Route;
use reqwest::header::HeaderMap;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// One outbound API call
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path below the versioned base address, e.g. `/channels/1/messages`
    pub path: String,
    pub body: Option<serde_json::Value>,
    pub headers: Vec<(String, String)>,
    /// Sent as `X-Audit-Log-Reason`
    pub reason: Option<String>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            headers: Vec::new(),
            reason: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Attach a JSON body
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, RestError> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn route(&self) -> Route {
        Route::new(self.method.clone(), self.path.clone())
    }
}

/// Scheduling options for one call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOptions {
    /// Lower is more urgent
    pub priority: u8,
    /// Retry budget for 429 responses; scheduler default when `None`
    pub max_retries: Option<u32>,
    /// Longest allowed wait before dispatch; scheduler default when `None`
    pub max_queue_wait: Option<Duration>,
}

impl RequestOptions {
    pub const PRIORITY_HIGH: u8 = 0;
    pub const PRIORITY_NORMAL: u8 = 5;
    pub const PRIORITY_LOW: u8 = 10;

    pub fn with_priority(priority: u8) -> Self {
        Self {
            priority,
            ..Self::default()
        }
    }
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            priority: Self::PRIORITY_NORMAL,
            max_retries: None,
            max_queue_wait: None,
        }
    }
}

/// Response returned by an executor
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn new(status: u16, headers: HeaderMap, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status == 429
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, RestError> {
        serde_json::from_slice(&self.body).map_err(|e| RestError::Decode(e.to_string()))
    }

    /// Turn a non-success response into [`RestError::Api`]
    pub fn error_for_status(self) -> Result<Self, RestError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(RestError::Api {
                status: self.status,
                body: self.text(),
            })
        }
    }
}
