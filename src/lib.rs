//! LurchHome - Smart butler for Home Assistant
//!
//! LurchHome connects a language model to a Home Assistant instance over two
//! independent, long-lived channels and lets household members talk to it
//! from a terminal.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            LurchHome                              │
//! │                                                                   │
//! │   stdin ──▶ Lurch (brain) ──▶ ChatModel (OpenAI-compatible)       │
//! │               │      ▲                                            │
//! │               ▼      │ tool results                               │
//! │            ToolBox (tools)                                        │
//! │               │                                                   │
//! │  ┌────────────▼─────────────────┐   ┌──────────────────────────┐  │
//! │  │  McpBridge (bridge)          │   │  EventListener (events)  │  │
//! │  │  - ordered command queue     │   │  - auth + subscriptions  │  │
//! │  │  - pending request table     │   │  - normalize events      │  │
//! │  │  - endpoint / ready gates    │   │  - forward to EventSink  │  │
//! │  └──────┬───────────────▲───────┘   └────────────▲─────────────┘  │
//! └─────────┼───────────────┼────────────────────────┼────────────────┘
//!           │ POST          │ SSE                    │ WebSocket
//! ┌─────────▼───────────────┴────────────────────────┴────────────────┐
//! │                          Home Assistant                           │
//! │     /mcp_server/messages/<ID>    /mcp_server/sse    /api/websocket │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`bridge`]: MCP request/response bridge (SSE push stream + POST)
//! - [`events`]: WebSocket event listener and event sinks
//! - [`tools`]: Remote tool catalog exposed to the language model
//! - [`brain`]: Persona prompt, model client and tool-calling loop
//! - [`storage`]: Token usage counters
//! - [`config`]: Configuration management

pub mod brain;
pub mod bridge;
pub mod config;
pub mod error;
pub mod events;
pub mod storage;
pub mod tools;

pub use config::LurchConfig;
pub use error::{Error, Result};
