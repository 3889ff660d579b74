pub mod chat;
pub mod converter;
pub mod reliable;
pub mod sse;

pub mod mock;

pub use chat::{ChatCompletionsConfig, ChatCompletionsProvider};
pub use mock::{MockProvider, MockResponse};
pub use reliable::{ReliableConfig, ReliableProvider};
