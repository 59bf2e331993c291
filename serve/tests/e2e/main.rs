//! End-to-end tests for the transport surface: a real listener on
//! `127.0.0.1:0`, scripted planner/driver doubles behind the engine.

mod agent_card;
mod common;
mod invalid_json;
mod mock_agent;
mod ping;
mod process_task;
mod stream;
mod ws_flow;
