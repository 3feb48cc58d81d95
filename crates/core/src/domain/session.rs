use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::action::{ActionRequest, ActionResult};
use crate::errors::SessionFault;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn generate() -> Self {
        Self(format!("sess-{}", Uuid::new_v4().simple()))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Synthetic context seeded by the session controller.
    System,
    Planner,
    Executor,
}

/// One exchange step. Requests only appear on planner turns, results only on executor turns.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub requests: Vec<ActionRequest>,
    pub results: Vec<ActionResult>,
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into(), requests: Vec::new(), results: Vec::new() }
    }

    pub fn planner(content: impl Into<String>, requests: Vec<ActionRequest>) -> Self {
        Self { role: Role::Planner, content: content.into(), requests, results: Vec::new() }
    }

    pub fn executor(results: Vec<ActionResult>) -> Self {
        let content = results.iter().map(ActionResult::summary).collect::<Vec<_>>().join("\n");
        Self { role: Role::Executor, content, requests: Vec::new(), results }
    }
}

/// Append-only turn log. Turns cannot be edited once pushed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnHistory {
    turns: Vec<Turn>,
}

impl TurnHistory {
    pub fn seeded(seed: Turn) -> Self {
        Self { turns: vec![seed] }
    }

    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn planner_turns(&self) -> usize {
        self.turns.iter().filter(|turn| turn.role == Role::Planner).count()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionStatus {
    Done,
    Aborted { fault: SessionFault },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionOutcome {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub history: TurnHistory,
}

impl SessionOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self.status, SessionStatus::Done)
    }

    pub fn fault(&self) -> Option<&SessionFault> {
        match &self.status {
            SessionStatus::Aborted { fault } => Some(fault),
            SessionStatus::Done => None,
        }
    }
}
