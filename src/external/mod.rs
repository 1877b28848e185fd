pub mod completion_provider;
pub mod openrouter;
pub mod stream;

pub use completion_provider::{CompletionProvider, CompletionRequest};
pub use openrouter::OpenRouterProvider;
pub use stream::{CompletionStream, StreamEvent};
