//! Agent-tool adapter
//!
//! Turns the remote tool catalog into tools the conversation driver can
//! offer to the language model, with arguments checked against each tool's
//! JSON schema before they go over the wire.

pub mod schema;
pub mod toolbox;

pub use toolbox::{RemoteTool, ToolBox};

use crate::bridge::{McpBridge, ToolDescriptor};
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Source of a tool catalog
#[async_trait]
pub trait WithTools: Send + Sync {
    async fn get_tools(&self) -> Result<Vec<ToolDescriptor>>;
}

/// Executor of named tools
#[async_trait]
pub trait CallableTools: Send + Sync {
    async fn call_tool(&self, name: &str, params: Value) -> Result<Value>;
}

#[async_trait]
impl WithTools for McpBridge {
    async fn get_tools(&self) -> Result<Vec<ToolDescriptor>> {
        self.get_tool_list().await
    }
}

#[async_trait]
impl CallableTools for McpBridge {
    async fn call_tool(&self, name: &str, params: Value) -> Result<Value> {
        McpBridge::call_tool(self, name, params).await
    }
}
