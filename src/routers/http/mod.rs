//! HTTP forwarding to Ollama instances

pub mod router;
pub mod stream;

pub use router::Router;
pub use stream::{TokenCounter, TrackedStream};
