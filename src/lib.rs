pub mod broker;
pub mod constants;
pub mod error;
pub mod gemini;
pub mod generator;
pub mod planner;
pub mod templates;

pub use broker::{BrokerConfig, InFlightEviction, RequestBroker};
pub use error::{AttemptError, CompletionError};
pub use gemini::{CompletionReply, CompletionTransport, GeminiConfig, GeminiTransport};
