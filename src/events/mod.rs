//! Events module: Home Assistant event bus listener
//!
//! Keeps a WebSocket session to the instance, subscribes to the configured
//! event types and reduces every change notification to a
//! [`NormalizedEvent`] handed to an [`EventSink`]. Events are persisted as
//! JSON lines under `~/.lurchhome/events.jsonl` by default.

pub mod listener;
pub mod sink;
pub mod types;

pub use listener::EventListener;
pub use sink::{ChannelSink, EventSink, JsonlEventSink};
pub use types::NormalizedEvent;
