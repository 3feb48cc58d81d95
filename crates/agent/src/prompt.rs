use cadence_core::domain::session::Turn;
use cadence_core::domain::timestamp::{SessionOffset, ZonedTimestamp};

/// Standing instructions for the planner. Rebuilt for every turn so the reference time the
/// planner sees is always the session's.
pub fn planner_instructions(offset: SessionOffset, reference: &ZonedTimestamp) -> String {
    let example = reference.instant().format("%Y-%m-%dT14:00:00").to_string();
    format!(
        "You are a scheduling assistant operating at UTC offset {offset}.\n\
         Current date and time: {current} ({offset}).\n\
         \n\
         Your responsibilities:\n\
         1. Analyse conversations between people and extract the meetings they agree on.\n\
         2. Keep track of time constraints and attendee availability.\n\
         3. Propose calendar actions as function calls; an executor performs them and reports back.\n\
         \n\
         When proposing actions:\n\
         - Call checkAvailability for the attendees and window before scheduling anything.\n\
         - Give every timestamp as ISO 8601 with the explicit offset {offset} (e.g. {example}{offset}).\n\
         - Wait for the executor's results before proposing the next step.\n\
         - Reply without any function call once nothing is left to do.",
        current = reference.instant().format("%Y-%m-%d %H:%M"),
    )
}

/// The synthetic opening turn carrying the transcript.
pub fn seed_turn(transcript: &str, offset: SessionOffset) -> Turn {
    Turn::system(format!(
        "Please analyse the following conversation and schedule meetings as needed:\n\
         \n\
         {transcript}\n\
         \n\
         Use function calls to check availability, schedule, reschedule or cancel meetings. \
         All times must be ISO 8601 and carry the UTC offset {offset}.",
        transcript = transcript.trim_end(),
    ))
}
