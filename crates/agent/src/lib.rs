//! Agent Runtime - planner/executor dialogue over a shared calendar
//!
//! This crate drives the conversation between two parties:
//! - the **planner**, an opaque oracle that reads the transcript and proposes calendar
//!   actions as structured calls
//! - the **executor**, which validates those proposals, enforces the ordering policy and
//!   performs what survives against the calendar gateway
//!
//! # Architecture
//!
//! Each session follows a constrained loop:
//! 1. **Planning** (`llm`, `openai`, `prompt`) - build the context, ask the oracle
//! 2. **Decoding** (`planner`) - raw calls become typed `ActionRequest`s or an unparsed turn
//! 3. **Validation and Policy** (`executor`, `guardrails`) - registry checks, then the
//!    "check availability before scheduling" rule
//! 4. **Dispatch** (`executor`) - concurrent gateway calls, results reassembled in order
//! 5. **Turn-taking** (`runtime`) - the session controller feeds results back until the
//!    planner goes quiet, the budget runs out, or the caller cancels
//!
//! # Key Types
//!
//! - `SessionController` - owns a session from seed to `Done`/`Aborted`
//! - `PlannerOracle` - pluggable planner (OpenAI-compatible HTTP or scripted)
//! - `ActionExecutor` - validation, policy and dispatch for one planner turn
//! - `GuardrailPolicy` - the ordering rule
//!
//! # Safety Principle
//!
//! The planner only proposes. Nothing it emits reaches the calendar without passing the
//! registry schema and the ordering policy first.

pub mod executor;
pub mod guardrails;
pub mod llm;
pub mod openai;
pub mod planner;
pub mod prompt;
pub mod runtime;

pub use executor::{ActionExecutor, ValidatedBatch, DEFAULT_GATEWAY_DEADLINE};
pub use guardrails::{CheckedWindow, GuardrailDecision, GuardrailPolicy, TurnEvidence};
pub use llm::{
    PlannerContext, PlannerError, PlannerOracle, RawPlannerOutput, RawToolCall, ScriptedPlanner,
};
pub use openai::OpenAiPlanner;
pub use planner::PlannerOutput;
pub use runtime::SessionController;
