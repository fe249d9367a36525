//! Persistence for running counters
//!
//! Directory layout:
//! ```text
//! ~/.lurchhome/
//! ├── usage.json      # language model token counters
//! └── events.jsonl    # normalized Home Assistant events
//! ```

pub mod usage;

pub use usage::{TokenUsage, UsageStore};
