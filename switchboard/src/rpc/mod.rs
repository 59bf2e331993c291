//! JSON-RPC 2.0 transport to remote domain agents.
//!
//! Two methods cross this boundary: `get_agent_card` (GET on `/agent-card`) and
//! `process_task` (POST on `/a2a`). The client owns a shared pooled HTTP client,
//! classifies failures into the small [`RpcError`] kind set, retries transient
//! failures with exponential backoff, and consults the per-endpoint circuit
//! breaker before every attempt.

mod client;
mod error;
mod jsonrpc;

pub use client::{A2aClient, PoolConfig, RetryConfig, TaskRequest, TaskResponse};
pub use error::RpcError;
pub use jsonrpc::{code, JsonRpcError, JsonRpcRequest, JsonRpcResponse, JSONRPC_VERSION};
