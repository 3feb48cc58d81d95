use std::collections::{BTreeMap, HashSet};

use cadence_core::domain::action::{ActionRequest, ArgumentValue, RequestId};
use serde_json::Value;
use tracing::warn;

use crate::llm::RawPlannerOutput;

/// Planner output after the strict decode step. Nothing downstream sees raw JSON.
#[derive(Clone, Debug, PartialEq)]
pub enum PlannerOutput {
    /// Every call becomes a request. A call whose arguments are not a JSON object is kept as
    /// an undecodable request so the registry rejects it alone.
    Proposed { text: String, requests: Vec<ActionRequest> },
    /// The response as a whole could not be read. Only the raw text survives.
    Unparsed { raw: String },
}

impl PlannerOutput {
    pub fn decode(raw: RawPlannerOutput) -> Self {
        if raw.undecodable {
            warn!(event_name = "planner.output_unparsed", "planner response could not be decoded");
            return Self::Unparsed { raw: raw.text };
        }

        let mut seen = HashSet::new();
        let requests = raw
            .tool_calls
            .iter()
            .map(|call| {
                let id = match call.id.as_deref().map(str::trim) {
                    Some(id) if !id.is_empty() && seen.insert(id.to_owned()) => {
                        RequestId(id.to_owned())
                    }
                    _ => {
                        let generated = RequestId::generate();
                        seen.insert(generated.0.clone());
                        generated
                    }
                };
                match decode_arguments(&call.arguments) {
                    Some(arguments) => ActionRequest::with_id(id, call.name.trim(), arguments),
                    None => {
                        warn!(
                            event_name = "planner.call_arguments_undecodable",
                            request_id = %id,
                            action = %call.name,
                            "planner call arguments are not a JSON object"
                        );
                        ActionRequest::undecodable(id, call.name.trim(), call.arguments.clone())
                    }
                }
            })
            .collect();

        Self::Proposed { text: raw.text, requests }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Proposed { text, .. } => text,
            Self::Unparsed { raw } => raw,
        }
    }

    pub fn requests(&self) -> &[ActionRequest] {
        match self {
            Self::Proposed { requests, .. } => requests,
            Self::Unparsed { .. } => &[],
        }
    }

    pub fn into_parts(self) -> (String, Vec<ActionRequest>) {
        match self {
            Self::Proposed { text, requests } => (text, requests),
            Self::Unparsed { raw } => (raw, Vec::new()),
        }
    }
}

fn decode_arguments(raw: &str) -> Option<BTreeMap<String, ArgumentValue>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Some(BTreeMap::new());
    }

    match serde_json::from_str::<Value>(raw).ok()? {
        Value::Object(fields) => Some(
            fields
                .into_iter()
                .map(|(name, value)| (name, ArgumentValue::from_json(value)))
                .collect(),
        ),
        _ => None,
    }
}
