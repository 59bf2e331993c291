//! OpenAI Chat Completions adapter for the planner and driver seams.
//!
//! Thin by design: prompts come from [`crate::prompt`], decisions parse from
//! the model's JSON, and nothing provider-specific leaks past this module.
//! Requires `OPENAI_API_KEY` (or explicit config).

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestUserMessage, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{
    AgentDriver, DriverError, DriverOutcome, DriverTask, PlanDecision, PlanRequest, Planner,
    PlannerError, ReplanRequest,
};
use crate::engine::{Plan, Step};
use crate::message::Message;
use crate::prompt;

/// Chat-completions-backed planner/driver.
pub struct OpenAiPlanner {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
}

impl OpenAiPlanner {
    /// API key from `OPENAI_API_KEY`.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            model: model.into(),
            temperature: 0.0,
        }
    }

    /// Custom config (API key, base URL, OpenAI-compatible providers).
    pub fn with_config(config: OpenAIConfig, model: impl Into<String>) -> Self {
        Self {
            client: Client::with_config(config),
            model: model.into(),
            temperature: 0.0,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    async fn complete(
        &self,
        system: &str,
        user: &str,
    ) -> Result<String, PlannerError> {
        let messages = vec![
            ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage::from(
                system,
            )),
            ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage::from(user)),
        ];
        let request = CreateChatCompletionRequestArgs::default()
            .model(self.model.clone())
            .messages(messages)
            .temperature(self.temperature)
            .build()
            .map_err(|e| PlannerError::Provider(format!("request build: {}", e)))?;

        debug!(model = %self.model, "chat completion create");
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| PlannerError::Provider(e.to_string()))?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| PlannerError::Provider("empty completion".to_string()))
    }

    /// Pulls the first JSON value out of a completion that may wrap it in prose
    /// or a code fence.
    fn extract_json(text: &str, open: char, close: char) -> Option<&str> {
        let start = text.find(open)?;
        let end = text.rfind(close)?;
        (end > start).then(|| &text[start..=end])
    }

    fn parse_plan(text: &str) -> Result<Plan, PlannerError> {
        let raw = Self::extract_json(text, '[', ']')
            .ok_or_else(|| PlannerError::InvalidDecision(format!("no JSON array in: {}", text)))?;
        let items: Vec<Value> = serde_json::from_str(raw)
            .map_err(|e| PlannerError::InvalidDecision(e.to_string()))?;
        let mut steps = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Value::String(description) => steps.push(Step::new(description)),
                Value::Object(map) => {
                    let description = map
                        .get("description")
                        .and_then(|v| v.as_str())
                        .ok_or_else(|| {
                            PlannerError::InvalidDecision("step object without description".into())
                        })?;
                    let mut step = Step::new(description);
                    if let Some(agent) = map.get("agent").and_then(|v| v.as_str()) {
                        step = step.with_agent_hint(agent);
                    }
                    if let Some(tool) = map.get("tool").and_then(|v| v.as_str()) {
                        step = step.with_tool_hint(tool);
                    }
                    steps.push(step);
                }
                other => {
                    return Err(PlannerError::InvalidDecision(format!(
                        "unexpected step value: {}",
                        other
                    )))
                }
            }
        }
        Ok(Plan { steps })
    }

    fn parse_decision(text: &str) -> Result<PlanDecision, PlannerError> {
        let raw = Self::extract_json(text, '{', '}')
            .ok_or_else(|| PlannerError::InvalidDecision(format!("no JSON object in: {}", text)))?;
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| PlannerError::InvalidDecision(e.to_string()))?;
        match value.get("action").and_then(|v| v.as_str()) {
            Some("respond") => {
                let response = value
                    .get("response")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        PlannerError::InvalidDecision("respond action without response".into())
                    })?;
                Ok(PlanDecision::Response(response.to_string()))
            }
            Some("plan") => {
                let steps = value.get("steps").ok_or_else(|| {
                    PlannerError::InvalidDecision("plan action without steps".into())
                })?;
                Self::parse_plan(&steps.to_string()).map(PlanDecision::Plan)
            }
            other => Err(PlannerError::InvalidDecision(format!(
                "unknown action: {:?}",
                other
            ))),
        }
    }
}

#[async_trait]
impl Planner for OpenAiPlanner {
    async fn plan(&self, req: &PlanRequest) -> Result<PlanDecision, PlannerError> {
        let user = prompt::render_plan_prompt(req);
        let text = self.complete(prompt::PLAN_SYSTEM, &user).await?;
        Self::parse_plan(&text).map(PlanDecision::Plan)
    }

    async fn replan(&self, req: &ReplanRequest) -> Result<PlanDecision, PlannerError> {
        let user = prompt::render_replan_prompt(req);
        let text = self.complete(prompt::REPLAN_SYSTEM, &user).await?;
        Self::parse_decision(&text)
    }
}

#[async_trait]
impl AgentDriver for OpenAiPlanner {
    async fn execute(
        &self,
        task: &DriverTask,
        cancel: &CancellationToken,
    ) -> Result<DriverOutcome, DriverError> {
        let user = prompt::render_task_prompt(task);
        let conversation_tail = task
            .messages
            .iter()
            .map(Message::text)
            .collect::<Vec<_>>()
            .join("\n");
        let combined = if conversation_tail.is_empty() {
            user
        } else {
            format!("{}\n\nConversation tail:\n{}", user, conversation_tail)
        };

        let completion = tokio::select! {
            _ = cancel.cancelled() => return Err(DriverError::Cancelled),
            out = self.complete(prompt::EXECUTE_SYSTEM, &combined) => out,
        };
        let summary = completion.map_err(|e| DriverError::Provider(e.to_string()))?;
        let payload = Self::extract_json(&summary, '{', '}')
            .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
            .unwrap_or(Value::Null);
        Ok(DriverOutcome::Completed { summary, payload })
    }
}
