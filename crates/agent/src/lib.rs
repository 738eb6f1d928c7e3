pub mod assistant;
pub mod call_parser;
pub mod intent;
pub mod prompts;

#[cfg(test)]
mod testing;

pub use assistant::{Assistant, AssistantStatus, ChatEvent, EventSink};
pub use call_parser::CallParser;
pub use intent::IntentClassifier;
