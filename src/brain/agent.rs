//! Conversation driver
//!
//! Each turn starts from a fresh context: the persona prompt, the live status
//! of the home, and the user's message. The model then loops through tool
//! calls until it answers or runs out of steps.

use super::model::{ChatMessage, ChatModel, TokenCount};
use super::prompt::LURCH_PROMPT;
use crate::error::{Error, Result};
use crate::storage::UsageStore;
use crate::tools::{CallableTools, ToolBox};
use serde_json::{json, Value};
use std::sync::Arc;

/// Outcome of one model step, as shown to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentStep {
    /// The model asked for tools and said nothing
    Working,
    /// The model produced text
    Reply(String),
}

/// The butler
pub struct Lurch {
    model: Arc<dyn ChatModel>,
    tools: ToolBox,
    live_status: Option<(Arc<dyn CallableTools>, String)>,
    usage: Option<Arc<UsageStore>>,
    max_steps: usize,
}

impl Lurch {
    pub fn new(model: Arc<dyn ChatModel>, tools: ToolBox) -> Self {
        Self {
            model,
            tools,
            live_status: None,
            usage: None,
            max_steps: 8,
        }
    }

    /// Inject the result of `tool_name` as home status at every turn
    pub fn with_live_status(mut self, caller: Arc<dyn CallableTools>, tool_name: impl Into<String>) -> Self {
        self.live_status = Some((caller, tool_name.into()));
        self
    }

    pub fn with_usage_store(mut self, store: Arc<UsageStore>) -> Self {
        self.usage = Some(store);
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    /// Run one turn and return its steps
    pub async fn talk(&self, input: &str) -> Result<Vec<AgentStep>> {
        self.talk_with(input, |_| {}).await
    }

    /// Run one turn, reporting each step as soon as it happens
    pub async fn talk_with<F>(&self, input: &str, mut on_step: F) -> Result<Vec<AgentStep>>
    where
        F: FnMut(&AgentStep) + Send,
    {
        let mut messages = vec![ChatMessage::system(LURCH_PROMPT)];
        if let Some(status) = self.home_status().await {
            tracing::debug!("Status {}", status);
            messages.push(ChatMessage::system(status));
        }
        messages.push(ChatMessage::user(input));

        let specs = self.tools.function_specs();
        let mut steps = Vec::new();

        for step in 0..self.max_steps {
            let reply = self.model.generate(&messages, &specs).await?;
            tracing::debug!(step, finish_reason = %reply.finish_reason, "Model step");

            if let Some(usage) = reply.usage {
                self.record_usage(usage).await;
            }

            let shown = match &reply.content {
                Some(text) => AgentStep::Reply(text.clone()),
                None => AgentStep::Working,
            };
            on_step(&shown);
            steps.push(shown);

            if reply.tool_calls.is_empty() {
                return Ok(steps);
            }

            messages.push(ChatMessage::assistant(reply.content, reply.tool_calls.clone()));
            for call in reply.tool_calls {
                let output = self.tools.invoke(&call.name, call.arguments).await;
                messages.push(ChatMessage::tool(call.id, output));
            }
        }

        Err(Error::Model(format!(
            "No final answer after {} steps",
            self.max_steps
        )))
    }

    /// Live status text; a failing status call only costs the context
    async fn home_status(&self) -> Option<String> {
        let (caller, tool_name) = self.live_status.as_ref()?;
        match caller.call_tool(tool_name, json!({})).await {
            Ok(result) => Some(extract_status(&result)),
            Err(e) => {
                tracing::warn!(tool = %tool_name, "Failed to fetch live status: {}", e);
                None
            }
        }
    }

    async fn record_usage(&self, usage: TokenCount) {
        let Some(store) = &self.usage else {
            return;
        };
        if usage.input_tokens + usage.output_tokens == 0 {
            return;
        }

        let (total_in, total_out) = store.add_tokens(usage.input_tokens, usage.output_tokens).await;
        tracing::info!(
            "Current step LLM usage stats: {}->{}. Total LLM stats: {}->{}",
            usage.input_tokens,
            usage.output_tokens,
            total_in,
            total_out
        );
    }
}

/// `content[0].text` is a JSON document whose `result` holds the status
fn extract_status(result: &Value) -> String {
    let Some(text) = result["content"][0]["text"].as_str() else {
        return result.to_string();
    };

    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(doc)) => match doc.get("result") {
            Some(Value::String(status)) => status.clone(),
            Some(other) => other.to_string(),
            None => text.to_string(),
        },
        _ => text.to_string(),
    }
}
