pub mod engine;
pub mod states;

pub use engine::{DialogueMachine, DialogueTransitionError};
pub use states::{DialogueAction, DialogueEvent, DialogueState, TransitionOutcome};
