//! Pooled JSON-RPC client for domain agents.
//!
//! One `A2aClient` is shared by the whole process. Every attempt — including
//! retries — passes through the endpoint's circuit breaker individually, and
//! only transport failures are recorded against it.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::breaker::BreakerBoard;
use crate::registry::AgentCard;
use crate::rpc::error::RpcError;
use crate::rpc::jsonrpc::{JsonRpcRequest, JsonRpcResponse};

/// Connection pool caps. `max_idle_per_host` and the idle TTL map directly onto
/// the shared pool; the 50-socket process cap is enforced by reqwest's per-host
/// pooling under the per-endpoint in-flight bound.
#[derive(Clone, Copy, Debug)]
pub struct PoolConfig {
    pub max_idle_per_host: usize,
    pub idle_ttl: Duration,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 20,
            idle_ttl: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Retry tuning for transient failures: exponential backoff with jitter.
#[derive(Clone, Copy, Debug)]
pub struct RetryConfig {
    pub attempts: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Backoff before the given retry (0-based), jittered in [delay/2, delay].
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.base.saturating_mul(2u32.saturating_pow(attempt));
        let capped = exp.min(self.cap);
        let half_ms = capped.as_millis() as u64 / 2;
        let jitter_ms = if half_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=half_ms)
        };
        Duration::from_millis(half_ms + jitter_ms)
    }

    /// Zero-delay variant for tests.
    pub fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            base: Duration::ZERO,
            cap: Duration::ZERO,
        }
    }
}

/// One task dispatched to a domain agent. Serialized into `params`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskRequest {
    #[serde(rename = "taskID")]
    pub task_id: String,
    #[serde(rename = "threadID")]
    pub thread_id: String,
    pub instruction: String,
    #[serde(default)]
    pub context: Value,
}

/// Structured agent reply for `process_task`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskResponse {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub output: Value,
}

impl TaskResponse {
    pub const STATUS_COMPLETED: &'static str = "completed";
    pub const STATUS_FAILED: &'static str = "failed";
    pub const STATUS_INPUT_REQUIRED: &'static str = "input_required";
}

/// JSON-RPC 2.0 client with shared pool, retry and circuit breaking.
pub struct A2aClient {
    http: reqwest::Client,
    breakers: Arc<BreakerBoard>,
    retry: RetryConfig,
}

impl A2aClient {
    pub fn new(
        pool: PoolConfig,
        retry: RetryConfig,
        breakers: Arc<BreakerBoard>,
    ) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(pool.max_idle_per_host)
            .pool_idle_timeout(pool.idle_ttl)
            .connect_timeout(pool.connect_timeout)
            .timeout(pool.request_timeout)
            .build()
            .map_err(|e| RpcError::InvalidRequest(format!("client build: {}", e)))?;
        Ok(Self {
            http,
            breakers,
            retry,
        })
    }

    pub fn with_defaults(breakers: Arc<BreakerBoard>) -> Result<Self, RpcError> {
        Self::new(PoolConfig::default(), RetryConfig::default(), breakers)
    }

    pub fn breakers(&self) -> &Arc<BreakerBoard> {
        &self.breakers
    }

    fn join(endpoint: &str, path: &str) -> Result<url::Url, RpcError> {
        let base: url::Url = endpoint
            .parse()
            .map_err(|e| RpcError::InvalidRequest(format!("endpoint {}: {}", endpoint, e)))?;
        let trimmed = format!("{}/{}", base.as_str().trim_end_matches('/'), path);
        trimmed
            .parse()
            .map_err(|e| RpcError::InvalidRequest(format!("endpoint {}: {}", trimmed, e)))
    }

    /// `GET <endpoint>/agent-card`. Single attempt; health polling supplies the cadence.
    pub async fn get_agent_card(&self, endpoint: &str) -> Result<AgentCard, RpcError> {
        let url = Self::join(endpoint, "agent-card")?;
        let breaker = self.breakers.for_endpoint(endpoint);
        breaker.admit().map_err(|_| RpcError::CircuitOpen {
            endpoint: endpoint.to_string(),
        })?;
        let out = self.fetch_card(url).await;
        match &out {
            Ok(_) => breaker.record_success(),
            Err(e) if e.is_transport_failure() => breaker.record_failure(),
            Err(_) => {}
        }
        out
    }

    async fn fetch_card(&self, url: url::Url) -> Result<AgentCard, RpcError> {
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RpcError::from_status(status.as_u16(), body));
        }
        Ok(resp.json::<AgentCard>().await?)
    }

    /// `POST <endpoint>/a2a` with JSON-RPC method `process_task`. Transient
    /// failures retry with backoff; each attempt records against the breaker.
    pub async fn process_task(
        &self,
        endpoint: &str,
        task: &TaskRequest,
    ) -> Result<TaskResponse, RpcError> {
        let url = Self::join(endpoint, "a2a")?;
        let breaker = self.breakers.for_endpoint(endpoint);
        let mut last_err: Option<RpcError> = None;

        for attempt in 0..self.retry.attempts {
            if attempt > 0 {
                tokio::time::sleep(self.retry.backoff(attempt - 1)).await;
            }
            breaker.admit().map_err(|_| RpcError::CircuitOpen {
                endpoint: endpoint.to_string(),
            })?;

            match self.send_once(url.clone(), task).await {
                Ok(resp) => {
                    breaker.record_success();
                    return Self::interpret(resp);
                }
                Err(e) => {
                    if e.is_transport_failure() {
                        breaker.record_failure();
                    }
                    if !e.is_retryable() {
                        return Err(e);
                    }
                    warn!(
                        endpoint = %endpoint,
                        attempt = attempt + 1,
                        error = %e,
                        "process_task attempt failed"
                    );
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| RpcError::Transient("no attempts made".to_string())))
    }

    async fn send_once(
        &self,
        url: url::Url,
        task: &TaskRequest,
    ) -> Result<JsonRpcResponse, RpcError> {
        let request = JsonRpcRequest::new("process_task", serde_json::to_value(task)?);
        debug!(url = %url, task_id = %task.task_id, "process_task send");
        let resp = self.http.post(url).json(&request).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RpcError::from_status(status.as_u16(), body));
        }
        Ok(resp.json::<JsonRpcResponse>().await?)
    }

    /// Maps a JSON-RPC envelope to the structured task response. Application
    /// failures surface as `AgentRejected` and never count as transport errors.
    fn interpret(resp: JsonRpcResponse) -> Result<TaskResponse, RpcError> {
        if let Some(err) = resp.error {
            return Err(RpcError::InvalidRequest(format!(
                "json-rpc error {}: {}",
                err.code, err.message
            )));
        }
        let result = resp
            .result
            .ok_or_else(|| RpcError::Serialization("response has neither result nor error".into()))?;
        let task: TaskResponse = serde_json::from_value(result)?;
        if task.status == TaskResponse::STATUS_FAILED {
            return Err(RpcError::AgentRejected {
                reason: task
                    .message
                    .unwrap_or_else(|| "agent reported failure".to_string()),
            });
        }
        Ok(task)
    }

    /// Streaming variant: the peer answers with Server-Sent Events. Each `data:`
    /// line is decoded as JSON and forwarded; the stream ends when the peer
    /// closes or the receiver is dropped.
    pub async fn process_task_streaming(
        &self,
        endpoint: &str,
        task: &TaskRequest,
        frames: mpsc::Sender<Value>,
    ) -> Result<(), RpcError> {
        let url = Self::join(endpoint, "a2a")?;
        let breaker = self.breakers.for_endpoint(endpoint);
        breaker.admit().map_err(|_| RpcError::CircuitOpen {
            endpoint: endpoint.to_string(),
        })?;

        let request = JsonRpcRequest::new("process_task", serde_json::to_value(task)?);
        let resp = match self
            .http
            .post(url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&request)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                breaker.record_failure();
                return Err(e.into());
            }
        };
        let status = resp.status();
        if !status.is_success() {
            breaker.record_failure();
            let body = resp.text().await.unwrap_or_default();
            return Err(RpcError::from_status(status.as_u16(), body));
        }
        breaker.record_success();

        let mut buf = String::new();
        let mut body = resp.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(RpcError::from)?;
            buf.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(pos) = buf.find('\n') {
                let line: String = buf.drain(..=pos).collect();
                let line = line.trim();
                if let Some(data) = line.strip_prefix("data:") {
                    if let Ok(value) = serde_json::from_str::<Value>(data.trim()) {
                        if frames.send(value).await.is_err() {
                            return Ok(()); // receiver gone; stop reading
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
