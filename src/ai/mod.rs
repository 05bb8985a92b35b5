//! Enemy intent selection.

pub mod intent;

pub use intent::{preview_intent, IntentAgent, IntentAlgorithm, IntentDecision, IntentPreview};
