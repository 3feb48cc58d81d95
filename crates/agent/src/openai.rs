//! OpenAI-compatible chat completions planner. Ollama exposes the same endpoint, so both
//! providers go through here.

use std::time::Duration;

use async_trait::async_trait;
use cadence_core::config::{PlannerConfig, PlannerProvider};
use cadence_core::domain::session::{Role, Turn};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::llm::{PlannerContext, PlannerError, PlannerOracle, RawPlannerOutput, RawToolCall};

const MAX_ERROR_DETAIL: usize = 300;

pub struct OpenAiPlanner {
    client: Client,
    endpoint: String,
    api_key: Option<SecretString>,
    model: String,
    temperature: f32,
}

impl OpenAiPlanner {
    pub fn new(
        client: Client,
        base_url: &str,
        api_key: Option<SecretString>,
        model: impl Into<String>,
        temperature: f32,
    ) -> Self {
        Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            model: model.into(),
            temperature,
        }
    }

    pub fn from_config(config: &PlannerConfig) -> Result<Self, PlannerError> {
        if config.provider == PlannerProvider::OpenAi && config.api_key.is_none() {
            return Err(PlannerError::NotConfigured(
                "planner.api_key is required for provider openai".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| PlannerError::NotConfigured(format!("http client: {error}")))?;

        Ok(Self::new(
            client,
            config.effective_base_url(),
            config.api_key.clone(),
            config.model.clone(),
            config.temperature,
        ))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn translate(&self, context: &PlannerContext) -> ChatRequest {
        let mut messages = vec![ChatMessage::text("system", context.instructions.clone())];
        for turn in &context.history {
            messages.extend(translate_turn(turn));
        }

        ChatRequest {
            model: self.model.clone(),
            messages,
            tools: context.tools.clone(),
            temperature: self.temperature,
        }
    }
}

#[async_trait]
impl PlannerOracle for OpenAiPlanner {
    async fn plan(&self, context: &PlannerContext) -> Result<RawPlannerOutput, PlannerError> {
        let request = self.translate(context);
        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key.expose_secret());
        }

        let response = builder.send().await.map_err(|error| {
            if error.is_timeout() {
                PlannerError::Transport(format!("request timeout: {error}"))
            } else if error.is_connect() {
                PlannerError::Transport(format!("connection failed: {error}"))
            } else {
                PlannerError::Transport(error.to_string())
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| PlannerError::Transport(format!("reading response body: {error}")))?;
        if !status.is_success() {
            return Err(PlannerError::Status {
                status: status.as_u16(),
                detail: body.chars().take(MAX_ERROR_DETAIL).collect(),
            });
        }

        debug!(
            event_name = "planner.response_received",
            model = %self.model,
            bytes = body.len(),
            "planner responded"
        );
        Ok(normalize_response(&body))
    }
}

/// A body that is not a chat completion is kept verbatim and marked undecodable so the turn
/// still counts.
fn normalize_response(body: &str) -> RawPlannerOutput {
    let parsed = match serde_json::from_str::<ChatResponse>(body) {
        Ok(parsed) => parsed,
        Err(error) => {
            warn!(
                event_name = "planner.response_undecodable",
                error = %error,
                "planner body is not a chat completion"
            );
            return RawPlannerOutput::undecodable(body);
        }
    };
    let Some(choice) = parsed.choices.into_iter().next() else {
        return RawPlannerOutput::undecodable(body);
    };

    RawPlannerOutput {
        undecodable: false,
        text: choice.message.content.unwrap_or_default(),
        tool_calls: choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| RawToolCall {
                id: call.id,
                name: call.function.name,
                arguments: call.function.arguments,
            })
            .collect(),
    }
}

/// The seed turn is the opening user message; executor results go back as one `tool`
/// message per request so the planner can correlate them by id.
fn translate_turn(turn: &Turn) -> Vec<ChatMessage> {
    match turn.role {
        Role::System => vec![ChatMessage::text("user", turn.content.clone())],
        Role::Planner => {
            let tool_calls: Vec<ChatToolCall> = turn
                .requests
                .iter()
                .map(|request| ChatToolCall {
                    id: Some(request.id.0.clone()),
                    kind: "function".to_string(),
                    function: ChatFunctionCall {
                        name: request.action_name.clone(),
                        arguments: match &request.undecodable_arguments {
                            Some(raw) => raw.clone(),
                            None => serde_json::to_string(&request.arguments)
                                .unwrap_or_else(|_| "{}".to_string()),
                        },
                    },
                })
                .collect();
            vec![ChatMessage {
                role: "assistant".to_string(),
                content: (!turn.content.is_empty()).then(|| turn.content.clone()),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                tool_call_id: None,
            }]
        }
        Role::Executor if turn.results.is_empty() => {
            vec![ChatMessage::text("user", turn.content.clone())]
        }
        Role::Executor => turn
            .results
            .iter()
            .map(|result| ChatMessage {
                role: "tool".to_string(),
                content: Some(result.summary()),
                tool_calls: None,
                tool_call_id: Some(result.request_id.0.clone()),
            })
            .collect(),
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    tools: Value,
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct ChatMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ChatToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text(role: &str, content: String) -> Self {
        Self { role: role.to_string(), content: Some(content), tool_calls: None, tool_call_id: None }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct ChatToolCall {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: ChatFunctionCall,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct ChatFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ChatToolCall>>,
}
