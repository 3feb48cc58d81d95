//! Fixed catalogue of callable calendar actions and the argument checks applied
//! to every planner proposal before anything reaches the calendar.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::domain::action::{
    ActionName, ActionRequest, ArgumentValue, MeetingDraft, MeetingReference, ValidatedAction,
    ValidatedRequest,
};
use crate::domain::timestamp::{SessionOffset, TimeWindow, ZonedTimestamp};
use crate::errors::ValidationError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Timestamp,
    TextList,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    pub description: &'static str,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActionSchema {
    pub name: ActionName,
    pub description: &'static str,
    pub fields: &'static [FieldSpec],
}

impl ActionSchema {
    pub fn required_fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().filter(|field| field.required).map(|field| field.name)
    }

    pub fn optional_fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().filter(|field| !field.required).map(|field| field.name)
    }

    fn accepts(&self, argument: &str) -> bool {
        self.fields.iter().any(|field| field.name == argument)
    }
}

const fn field(
    name: &'static str,
    kind: FieldKind,
    required: bool,
    description: &'static str,
) -> FieldSpec {
    FieldSpec { name, kind, required, description }
}

const ATTENDEES: FieldSpec =
    field("attendees", FieldKind::TextList, true, "List of attendee email addresses");

static SCHEMAS: [ActionSchema; 4] = [
    ActionSchema {
        name: ActionName::CheckAvailability,
        description: "Check calendar availability for attendees in the specified time window",
        fields: &[
            field("startTime", FieldKind::Timestamp, true, "Start of the window"),
            field("endTime", FieldKind::Timestamp, true, "End of the window"),
            ATTENDEES,
        ],
    },
    ActionSchema {
        name: ActionName::ScheduleMeeting,
        description: "Schedule a new meeting with attendees",
        fields: &[
            field("title", FieldKind::Text, true, "Meeting title"),
            field("description", FieldKind::Text, false, "Meeting description"),
            field("startTime", FieldKind::Timestamp, true, "Meeting start"),
            field("endTime", FieldKind::Timestamp, true, "Meeting end"),
            ATTENDEES,
        ],
    },
    ActionSchema {
        name: ActionName::RescheduleMeeting,
        description: "Move an existing meeting to a new time window",
        fields: &[
            field("eventReference", FieldKind::Text, true, "Reference of the event to move"),
            field("newStartTime", FieldKind::Timestamp, true, "New meeting start"),
            field("newEndTime", FieldKind::Timestamp, true, "New meeting end"),
        ],
    },
    ActionSchema {
        name: ActionName::CancelMeeting,
        description: "Cancel an existing meeting",
        fields: &[field("eventReference", FieldKind::Text, true, "Reference of the event to cancel")],
    },
];

/// Every reason a single request was refused. Never empty.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("action request rejected: {reasons:?}")]
pub struct Rejection {
    pub reasons: Vec<ValidationError>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ActionRegistry {
    offset: SessionOffset,
}

impl ActionRegistry {
    pub fn new(offset: SessionOffset) -> Self {
        Self { offset }
    }

    pub fn offset(&self) -> SessionOffset {
        self.offset
    }

    pub fn schemas(&self) -> &'static [ActionSchema] {
        &SCHEMAS
    }

    pub fn schema(&self, name: ActionName) -> &'static ActionSchema {
        match name {
            ActionName::CheckAvailability => &SCHEMAS[0],
            ActionName::ScheduleMeeting => &SCHEMAS[1],
            ActionName::RescheduleMeeting => &SCHEMAS[2],
            ActionName::CancelMeeting => &SCHEMAS[3],
        }
    }

    /// Checks a proposal against its schema. Pure: the verdict depends only on
    /// the action name, the arguments and the configured offset.
    pub fn validate(&self, request: &ActionRequest) -> Result<ValidatedRequest, Rejection> {
        let Some(name) = ActionName::parse(&request.action_name) else {
            return Err(Rejection {
                reasons: vec![ValidationError::UnknownAction(request.action_name.clone())],
            });
        };
        if let Some(raw) = &request.undecodable_arguments {
            return Err(Rejection { reasons: vec![ValidationError::UndecodableArguments(raw.clone())] });
        }
        let schema = self.schema(name);
        let mut reader = ArgumentReader::new(&request.arguments, self.offset);

        let action = match name {
            ActionName::CheckAvailability => {
                let start = reader.timestamp("startTime");
                let end = reader.timestamp("endTime");
                let attendees = reader.text_list("attendees");
                match (start, end, attendees) {
                    (Some(start), Some(end), Some(attendees)) => Some(
                        ValidatedAction::CheckAvailability {
                            window: TimeWindow::new(start, end),
                            attendees,
                        },
                    ),
                    _ => None,
                }
            }
            ActionName::ScheduleMeeting => {
                let title = reader.text("title");
                let description = reader.optional_text("description");
                let start = reader.timestamp("startTime");
                let end = reader.timestamp("endTime");
                let attendees = reader.text_list("attendees");
                match (title, start, end, attendees) {
                    (Some(title), Some(start), Some(end), Some(attendees)) => {
                        Some(ValidatedAction::ScheduleMeeting(MeetingDraft {
                            title,
                            description,
                            window: TimeWindow::new(start, end),
                            attendees,
                        }))
                    }
                    _ => None,
                }
            }
            ActionName::RescheduleMeeting => {
                let reference = reader.text("eventReference");
                let start = reader.timestamp("newStartTime");
                let end = reader.timestamp("newEndTime");
                match (reference, start, end) {
                    (Some(reference), Some(start), Some(end)) => {
                        Some(ValidatedAction::RescheduleMeeting {
                            reference: MeetingReference(reference),
                            window: TimeWindow::new(start, end),
                        })
                    }
                    _ => None,
                }
            }
            ActionName::CancelMeeting => reader
                .text("eventReference")
                .map(|reference| ValidatedAction::CancelMeeting {
                    reference: MeetingReference(reference),
                }),
        };

        let mut reasons = reader.finish();
        reasons.extend(
            request
                .arguments
                .keys()
                .filter(|argument| !schema.accepts(argument))
                .map(|argument| ValidationError::UnexpectedArgument(argument.clone())),
        );

        match action {
            Some(action) if reasons.is_empty() => {
                Ok(ValidatedRequest { id: request.id.clone(), action })
            }
            _ => Err(Rejection { reasons }),
        }
    }

    /// Renders the catalogue as OpenAI-style function tools.
    pub fn tool_definitions(&self) -> Value {
        let example = format!("2025-01-22T14:00:00{}", self.offset);
        let tools: Vec<Value> = SCHEMAS
            .iter()
            .map(|schema| {
                let mut properties = Map::new();
                for field in schema.fields {
                    let property = match field.kind {
                        FieldKind::Text => {
                            json!({ "type": "string", "description": field.description })
                        }
                        FieldKind::Timestamp => json!({
                            "type": "string",
                            "description": format!(
                                "{} in ISO 8601 format with UTC offset {} (e.g., {example})",
                                field.description, self.offset
                            ),
                        }),
                        FieldKind::TextList => json!({
                            "type": "array",
                            "items": { "type": "string" },
                            "description": field.description,
                        }),
                    };
                    properties.insert(field.name.to_owned(), property);
                }
                let required: Vec<&str> = schema.required_fields().collect();

                json!({
                    "type": "function",
                    "function": {
                        "name": schema.name.as_str(),
                        "description": schema.description,
                        "parameters": {
                            "type": "object",
                            "properties": properties,
                            "required": required,
                        },
                    },
                })
            })
            .collect();

        Value::Array(tools)
    }
}

/// Pulls typed arguments out of a request, collecting every problem instead of
/// stopping at the first one.
struct ArgumentReader<'a> {
    arguments: &'a BTreeMap<String, ArgumentValue>,
    offset: SessionOffset,
    errors: Vec<ValidationError>,
}

impl<'a> ArgumentReader<'a> {
    fn new(arguments: &'a BTreeMap<String, ArgumentValue>, offset: SessionOffset) -> Self {
        Self { arguments, offset, errors: Vec::new() }
    }

    fn present(&self, name: &str) -> Option<&'a ArgumentValue> {
        match self.arguments.get(name) {
            None | Some(ArgumentValue::Other(Value::Null)) => None,
            Some(value) => Some(value),
        }
    }

    fn text(&mut self, name: &str) -> Option<String> {
        match self.present(name) {
            None => {
                self.errors.push(ValidationError::MissingArgument(name.to_owned()));
                None
            }
            Some(value) => self.expect_text(name, value),
        }
    }

    fn optional_text(&mut self, name: &str) -> Option<String> {
        let value = self.present(name)?;
        self.expect_text(name, value)
    }

    fn expect_text(&mut self, name: &str, value: &ArgumentValue) -> Option<String> {
        match value {
            ArgumentValue::Text(text) => Some(text.clone()),
            _ => {
                self.errors.push(ValidationError::TypeMismatch(name.to_owned()));
                None
            }
        }
    }

    fn timestamp(&mut self, name: &str) -> Option<ZonedTimestamp> {
        let raw = self.text(name)?;
        match ZonedTimestamp::parse_in(&raw, self.offset) {
            Ok(timestamp) => Some(timestamp),
            Err(_) => {
                self.errors.push(ValidationError::BadTimestampFormat(name.to_owned()));
                None
            }
        }
    }

    fn text_list(&mut self, name: &str) -> Option<Vec<String>> {
        match self.present(name) {
            None => {
                self.errors.push(ValidationError::MissingArgument(name.to_owned()));
                None
            }
            Some(ArgumentValue::List(items)) => Some(items.clone()),
            Some(_) => {
                self.errors.push(ValidationError::TypeMismatch(name.to_owned()));
                None
            }
        }
    }

    fn finish(self) -> Vec<ValidationError> {
        self.errors
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::domain::action::{ActionName, ActionRequest, ArgumentValue, RequestId, ValidatedAction};
    use crate::domain::timestamp::SessionOffset;
    use crate::errors::ValidationError;
    use crate::registry::ActionRegistry;

    fn request(action: &str, arguments: Vec<(&str, ArgumentValue)>) -> ActionRequest {
        let arguments: BTreeMap<String, ArgumentValue> =
            arguments.into_iter().map(|(name, value)| (name.to_owned(), value)).collect();
        ActionRequest::with_id(RequestId("call-1".to_owned()), action, arguments)
    }

    #[test]
    fn accepts_well_formed_availability_check() {
        let registry = ActionRegistry::default();
        let validated = registry
            .validate(&request(
                "checkAvailability",
                vec![
                    ("startTime", "2025-01-23T16:00:00+05:00".into()),
                    ("endTime", "2025-01-23T17:00:00+05:00".into()),
                    ("attendees", vec!["alice@x.com", "bob@x.com"].into()),
                ],
            ))
            .expect("valid request");

        assert_eq!(validated.id, RequestId("call-1".to_owned()));
        match validated.action {
            ValidatedAction::CheckAvailability { window, attendees } => {
                assert_eq!(window.start.to_rfc3339(), "2025-01-23T16:00:00+05:00");
                assert_eq!(attendees, vec!["alice@x.com".to_owned(), "bob@x.com".to_owned()]);
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn schedule_with_only_title_reports_each_missing_field() {
        let registry = ActionRegistry::default();
        let rejection = registry
            .validate(&request("scheduleMeeting", vec![("title", "Sync".into())]))
            .expect_err("missing fields");

        assert_eq!(
            rejection.reasons,
            vec![
                ValidationError::MissingArgument("startTime".to_owned()),
                ValidationError::MissingArgument("endTime".to_owned()),
                ValidationError::MissingArgument("attendees".to_owned()),
            ]
        );
    }

    #[test]
    fn undecodable_arguments_are_rejected_on_their_own() {
        let registry = ActionRegistry::default();
        let request = ActionRequest::undecodable(
            RequestId("call-2".to_owned()),
            "scheduleMeeting",
            "{\"title\": \"Sync\"",
        );

        let rejection = registry.validate(&request).expect_err("raw text is not an object");

        assert_eq!(
            rejection.reasons,
            vec![ValidationError::UndecodableArguments("{\"title\": \"Sync\"".to_owned())]
        );
        assert_eq!(rejection.reasons[0].code(), "undecodable_arguments");
    }

    #[test]
    fn description_is_optional_for_schedule() {
        let registry = ActionRegistry::default();
        let validated = registry
            .validate(&request(
                "scheduleMeeting",
                vec![
                    ("title", "Sync".into()),
                    ("startTime", "2025-01-23T16:00:00+05:00".into()),
                    ("endTime", "2025-01-23T17:00:00+05:00".into()),
                    ("attendees", vec!["alice@x.com"].into()),
                ],
            ))
            .expect("description may be omitted");

        assert!(matches!(
            validated.action,
            ValidatedAction::ScheduleMeeting(ref draft) if draft.description.is_none()
        ));
    }

    #[test]
    fn rejects_unknown_action_names() {
        let rejection = ActionRegistry::default()
            .validate(&request("bookRoom", Vec::new()))
            .expect_err("unknown action");

        assert_eq!(rejection.reasons, vec![ValidationError::UnknownAction("bookRoom".to_owned())]);
    }

    #[test]
    fn rejects_wrong_types_offsets_and_extra_arguments() {
        let rejection = ActionRegistry::default()
            .validate(&request(
                "checkAvailability",
                vec![
                    ("startTime", "2025-01-23T11:00:00Z".into()),
                    ("endTime", "2025-01-23 17:00".into()),
                    ("attendees", "alice@x.com".into()),
                    ("room", "Everest".into()),
                ],
            ))
            .expect_err("every argument is wrong");

        assert_eq!(
            rejection.reasons,
            vec![
                ValidationError::BadTimestampFormat("startTime".to_owned()),
                ValidationError::BadTimestampFormat("endTime".to_owned()),
                ValidationError::TypeMismatch("attendees".to_owned()),
                ValidationError::UnexpectedArgument("room".to_owned()),
            ]
        );
    }

    #[test]
    fn offset_is_a_parameter_not_a_constant() {
        let utc = ActionRegistry::new("Z".parse::<SessionOffset>().expect("utc offset"));
        let validated = utc.validate(&request(
            "rescheduleMeeting",
            vec![
                ("eventReference", "evt-1".into()),
                ("newStartTime", "2025-01-23T11:00:00Z".into()),
                ("newEndTime", "2025-01-23T12:00:00+00:00".into()),
            ],
        ));
        assert!(validated.is_ok());

        let pkt = ActionRegistry::default().validate(&request(
            "rescheduleMeeting",
            vec![
                ("eventReference", "evt-1".into()),
                ("newStartTime", "2025-01-23T11:00:00Z".into()),
                ("newEndTime", "2025-01-23T12:00:00+00:00".into()),
            ],
        ));
        assert!(pkt.is_err());
    }

    #[test]
    fn validation_is_deterministic() {
        let registry = ActionRegistry::default();
        let proposal = request(
            "cancelMeeting",
            vec![("eventReference", ArgumentValue::Other(serde_json::json!(17)))],
        );

        let first = registry.validate(&proposal);
        let second = registry.validate(&proposal);
        assert_eq!(first, second);
        assert_eq!(
            first.expect_err("numeric reference").reasons,
            vec![ValidationError::TypeMismatch("eventReference".to_owned())]
        );
    }

    #[test]
    fn tool_definitions_cover_every_action() {
        let registry = ActionRegistry::default();
        let tools = registry.tool_definitions();
        let tools = tools.as_array().expect("array of tools");

        assert_eq!(tools.len(), ActionName::ALL.len());
        let schedule = tools
            .iter()
            .find(|tool| tool["function"]["name"] == "scheduleMeeting")
            .expect("schedule tool");
        let required = schedule["function"]["parameters"]["required"]
            .as_array()
            .expect("required list");
        assert!(!required.iter().any(|name| name == "description"));
        assert_eq!(required.len(), 4);
        assert!(schedule["function"]["parameters"]["properties"]["startTime"]["description"]
            .as_str()
            .is_some_and(|text| text.contains("+05:00")));
        assert_eq!(
            registry.schema(ActionName::ScheduleMeeting).optional_fields().collect::<Vec<_>>(),
            vec!["description"]
        );
    }
}
