//! Remote tools offered to the language model

use super::schema::validate_arguments;
use super::{CallableTools, WithTools};
use crate::bridge::ToolDescriptor;
use crate::error::{Error, Result};
use serde_json::{json, Value};
use std::sync::Arc;

/// One catalog entry bound to the executor that runs it
pub struct RemoteTool {
    descriptor: ToolDescriptor,
    caller: Arc<dyn CallableTools>,
}

impl RemoteTool {
    pub fn new(descriptor: ToolDescriptor, caller: Arc<dyn CallableTools>) -> Self {
        Self { descriptor, caller }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn description(&self) -> &str {
        &self.descriptor.description
    }

    /// OpenAI-style function declaration
    pub fn function_spec(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.descriptor.name,
                "description": self.descriptor.description,
                "parameters": self.descriptor.input_schema,
            }
        })
    }

    /// Run the tool. Failures come back as text for the model, never as an error.
    pub async fn invoke(&self, args: Value) -> String {
        match self.try_invoke(args).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(tool = %self.descriptor.name, "Tool call failed: {}", e);
                format!("Error executing {}: {}", self.descriptor.name, e)
            }
        }
    }

    async fn try_invoke(&self, args: Value) -> Result<String> {
        let params = validate_arguments(&self.descriptor.input_schema, args)?;

        tracing::info!(tool = %self.descriptor.name, "Calling tool");
        tracing::debug!(tool = %self.descriptor.name, params = ?params, "Tool params");

        let result = self
            .caller
            .call_tool(&self.descriptor.name, Value::Object(params))
            .await?;

        tracing::debug!(tool = %self.descriptor.name, result = %result, "Tool result");
        Ok(serde_json::to_string(&result)?)
    }
}

/// Every tool of the remote catalog
#[derive(Default)]
pub struct ToolBox {
    tools: Vec<RemoteTool>,
}

impl ToolBox {
    /// Toolbox without tools
    pub fn empty() -> Self {
        Self::default()
    }

    /// Fetch the catalog from `catalog` and bind each entry to `caller`
    pub async fn build(catalog: &dyn WithTools, caller: Arc<dyn CallableTools>) -> Result<Self> {
        let descriptors = catalog.get_tools().await?;
        tracing::info!(count = descriptors.len(), "Loaded remote tools");
        Ok(Self::from_descriptors(descriptors, caller))
    }

    pub fn from_descriptors(descriptors: Vec<ToolDescriptor>, caller: Arc<dyn CallableTools>) -> Self {
        let tools = descriptors
            .into_iter()
            .map(|descriptor| RemoteTool::new(descriptor, Arc::clone(&caller)))
            .collect();
        Self { tools }
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&RemoteTool> {
        self.tools.iter().find(|tool| tool.name() == name)
    }

    /// Function declarations for every tool, in catalog order
    pub fn function_specs(&self) -> Vec<Value> {
        self.tools.iter().map(RemoteTool::function_spec).collect()
    }

    /// Run a tool by name; unknown names are reported like any other failure
    pub async fn invoke(&self, name: &str, args: Value) -> String {
        match self.get(name) {
            Some(tool) => tool.invoke(args).await,
            None => {
                let err = Error::Tool(format!("unknown tool '{}'", name));
                tracing::warn!(tool = %name, "{}", err);
                format!("Error executing {}: {}", name, err)
            }
        }
    }
}
