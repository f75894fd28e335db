//! JSON client over the scheduler

use crate::error::RestError;
use crate::executor::{HttpExecutor, RequestExecutor};
use crate::request::{ApiRequest, ApiResponse, RequestOptions};
use crate::scheduler::RateLimitScheduler;
use chat_common::RestConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// `GET /gateway/bot` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayBot {
    pub url: String,
    /// Recommended shard count
    pub shards: u32,
    pub session_start_limit: SessionStartLimit,
}

/// Identify budget reported by `GET /gateway/bot`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStartLimit {
    pub total: u32,
    pub remaining: u32,
    /// Milliseconds until the budget resets
    pub reset_after: u64,
    pub max_concurrency: u32,
}

impl SessionStartLimit {
    pub fn reset_after(&self) -> Duration {
        Duration::from_millis(self.reset_after)
    }
}

/// Rate-limited API client
#[derive(Debug, Clone)]
pub struct RestClient {
    scheduler: RateLimitScheduler,
}

impl RestClient {
    /// Client backed by [`HttpExecutor`]
    pub fn new(token: &str, config: RestConfig) -> Result<Self, RestError> {
        let executor = HttpExecutor::new(token, &config)?;
        Ok(Self::with_executor(Arc::new(executor), config))
    }

    /// Client backed by any executor
    pub fn with_executor(executor: Arc<dyn RequestExecutor>, config: RestConfig) -> Self {
        Self {
            scheduler: RateLimitScheduler::new(executor, config),
        }
    }

    pub fn scheduler(&self) -> &RateLimitScheduler {
        &self.scheduler
    }

    /// Send a call and return the raw successful response
    pub async fn send(
        &self,
        request: ApiRequest,
        options: RequestOptions,
    ) -> Result<ApiResponse, RestError> {
        self.scheduler.enqueue(request, options).await?.error_for_status()
    }

    /// Send a call and decode the JSON response
    pub async fn request<T: DeserializeOwned>(
        &self,
        request: ApiRequest,
        options: RequestOptions,
    ) -> Result<T, RestError> {
        self.send(request, options).await?.json()
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, RestError> {
        self.request(ApiRequest::get(path), RequestOptions::default())
            .await
    }

    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T, RestError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(ApiRequest::post(path).json(body)?, RequestOptions::default())
            .await
    }

    pub async fn patch<T, B>(&self, path: &str, body: &B) -> Result<T, RestError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(ApiRequest::patch(path).json(body)?, RequestOptions::default())
            .await
    }

    /// Delete a resource; the response body is ignored
    pub async fn delete(&self, path: &str) -> Result<(), RestError> {
        self.send(ApiRequest::delete(path), RequestOptions::default())
            .await
            .map(|_| ())
    }

    /// Recommended shard count and gateway address
    pub async fn gateway_bot(&self) -> Result<GatewayBot, RestError> {
        self.request(
            ApiRequest::get("/gateway/bot"),
            RequestOptions::with_priority(RequestOptions::PRIORITY_HIGH),
        )
        .await
    }

    /// Stop the scheduler; see [`RateLimitScheduler::shutdown`]
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }
}
