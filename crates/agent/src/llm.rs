use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use cadence_core::domain::session::Turn;
use cadence_core::domain::timestamp::ZonedTimestamp;
use serde_json::Value;
use thiserror::Error;

/// Everything the planner sees for one turn.
#[derive(Clone, Debug, PartialEq)]
pub struct PlannerContext {
    pub instructions: String,
    pub reference_time: ZonedTimestamp,
    pub history: Vec<Turn>,
    pub tools: Value,
}

/// One structured call as the oracle emitted it. `arguments` is the raw JSON text and is not
/// trusted until [`crate::planner::PlannerOutput::decode`] has looked at it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawToolCall {
    pub id: Option<String>,
    pub name: String,
    pub arguments: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawPlannerOutput {
    pub text: String,
    pub tool_calls: Vec<RawToolCall>,
    /// Set when the oracle's response as a whole could not be read; `text` then holds the
    /// raw body.
    pub undecodable: bool,
}

impl RawPlannerOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), ..Self::default() }
    }

    pub fn undecodable(body: impl Into<String>) -> Self {
        Self { text: body.into(), tool_calls: Vec::new(), undecodable: true }
    }

    /// Appends a call with JSON arguments and a positional id (`call-1`, `call-2`, ...).
    pub fn with_call(mut self, name: impl Into<String>, arguments: Value) -> Self {
        let id = format!("call-{}", self.tool_calls.len() + 1);
        self.tool_calls.push(RawToolCall {
            id: Some(id),
            name: name.into(),
            arguments: arguments.to_string(),
        });
        self
    }

    pub fn with_raw_call(
        mut self,
        id: Option<&str>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        self.tool_calls.push(RawToolCall {
            id: id.map(str::to_owned),
            name: name.into(),
            arguments: arguments.into(),
        });
        self
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PlannerError {
    #[error("planner request failed: {0}")]
    Transport(String),
    #[error("planner answered with HTTP {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("planner is not configured: {0}")]
    NotConfigured(String),
}

/// The opaque text-to-structured-call oracle.
#[async_trait]
pub trait PlannerOracle: Send + Sync {
    async fn plan(&self, context: &PlannerContext) -> Result<RawPlannerOutput, PlannerError>;
}

/// Replays queued replies in order. Once the queue is drained it keeps answering with the
/// repeat reply if one is set, otherwise with plain text and no calls.
#[derive(Default)]
pub struct ScriptedPlanner {
    replies: Mutex<VecDeque<Result<RawPlannerOutput, PlannerError>>>,
    repeat: Option<RawPlannerOutput>,
    contexts: Mutex<Vec<PlannerContext>>,
}

impl ScriptedPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn repeating(reply: RawPlannerOutput) -> Self {
        Self { repeat: Some(reply), ..Self::default() }
    }

    pub fn reply(self, reply: RawPlannerOutput) -> Self {
        lock(&self.replies).push_back(Ok(reply));
        self
    }

    pub fn fail(self, error: PlannerError) -> Self {
        lock(&self.replies).push_back(Err(error));
        self
    }

    pub fn calls(&self) -> usize {
        lock(&self.contexts).len()
    }

    pub fn contexts(&self) -> Vec<PlannerContext> {
        lock(&self.contexts).clone()
    }
}

#[async_trait]
impl PlannerOracle for ScriptedPlanner {
    async fn plan(&self, context: &PlannerContext) -> Result<RawPlannerOutput, PlannerError> {
        lock(&self.contexts).push(context.clone());
        match lock(&self.replies).pop_front() {
            Some(reply) => reply,
            None => Ok(self
                .repeat
                .clone()
                .unwrap_or_else(|| RawPlannerOutput::text("Nothing further to schedule."))),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use cadence_core::domain::session::Turn;
    use cadence_core::domain::timestamp::{SessionOffset, ZonedTimestamp};
    use serde_json::json;

    use super::{PlannerContext, PlannerError, PlannerOracle, RawPlannerOutput, ScriptedPlanner};

    fn context() -> PlannerContext {
        PlannerContext {
            instructions: "be careful".to_string(),
            reference_time: ZonedTimestamp::parse_in(
                "2025-01-22T09:00:00+05:00",
                SessionOffset::default(),
            )
            .expect("reference"),
            history: vec![Turn::system("transcript")],
            tools: json!([]),
        }
    }

    #[tokio::test]
    async fn scripted_planner_replays_then_goes_quiet() {
        let planner = ScriptedPlanner::new()
            .reply(RawPlannerOutput::text("checking").with_call("cancelMeeting", json!({})))
            .fail(PlannerError::Transport("connection reset".to_string()));

        let first = planner.plan(&context()).await.expect("first reply");
        let second = planner.plan(&context()).await;
        let third = planner.plan(&context()).await.expect("quiet reply");

        assert_eq!(first.tool_calls.len(), 1);
        assert_eq!(first.tool_calls[0].id.as_deref(), Some("call-1"));
        assert!(matches!(second, Err(PlannerError::Transport(_))));
        assert!(third.tool_calls.is_empty());
        assert_eq!(planner.calls(), 3);
    }

    #[tokio::test]
    async fn repeating_planner_never_runs_dry() {
        let reply = RawPlannerOutput::text("again").with_call("cancelMeeting", json!({}));
        let planner = ScriptedPlanner::repeating(reply.clone());

        for _ in 0..5 {
            assert_eq!(planner.plan(&context()).await.expect("reply"), reply);
        }
        assert_eq!(planner.contexts()[4].history.len(), 1);
    }
}
