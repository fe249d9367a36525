//! Token usage counters with file-based JSON persistence

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Running totals of language model tokens
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Token counters backed by `<base_dir>/usage.json`
pub struct UsageStore {
    path: PathBuf,
    totals: Mutex<TokenUsage>,
}

impl UsageStore {
    /// Open the store, resuming from the file when present
    pub async fn new(base_dir: &Path) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(base_dir).await?;
        let path = base_dir.join("usage.json");
        let totals = Self::load(&path).await;
        Ok(Self {
            path,
            totals: Mutex::new(totals),
        })
    }

    async fn load(path: &Path) -> TokenUsage {
        let data = match tokio::fs::read_to_string(path).await {
            Ok(data) => data,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to read {}: {}", path.display(), e);
                }
                return TokenUsage::default();
            }
        };

        serde_json::from_str(&data).unwrap_or_else(|e| {
            tracing::warn!("Failed to parse {}: {}", path.display(), e);
            TokenUsage::default()
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current totals
    pub async fn totals(&self) -> TokenUsage {
        *self.totals.lock().await
    }

    /// Add one step's usage and return the new `(input, output)` totals.
    ///
    /// The lock is held until the file is written, so concurrent callers never
    /// lose an increment and the file always holds the latest totals.
    pub async fn add_tokens(&self, input_tokens: u64, output_tokens: u64) -> (u64, u64) {
        let mut totals = self.totals.lock().await;
        totals.input_tokens = totals.input_tokens.saturating_add(input_tokens);
        totals.output_tokens = totals.output_tokens.saturating_add(output_tokens);
        totals.updated_at = Some(Utc::now());

        if let Err(e) = self.persist(&totals).await {
            tracing::warn!("Failed to persist token usage to {}: {}", self.path.display(), e);
        }

        (totals.input_tokens, totals.output_tokens)
    }

    async fn persist(&self, totals: &TokenUsage) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(totals)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await
    }
}
