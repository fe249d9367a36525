//! Conversation driver: persona prompt, language model client and the
//! tool-calling loop that answers the user.

pub mod agent;
pub mod model;
pub mod prompt;

pub use agent::{AgentStep, Lurch};
pub use model::{ChatMessage, ChatModel, ModelReply, OpenAiCompatibleModel, TokenCount, ToolCall};
