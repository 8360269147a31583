use anyhow::Context;
use serde::{ Deserialize, Serialize };
use std::path::{ Path, PathBuf };
use tokio::io::AsyncWriteExt;
use tracing::info;

/// One conversation turn, written as a single JSON line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    /// Unix time in seconds (fractional).
    pub timestamp: f64,
    pub scene_id: String,
    pub user_text: String,
    pub gemini_reply: String,
    /// Seconds spent waiting for the LLM.
    pub gemini_response_time: f64,
    /// Seconds spent classifying + selecting; null when skipped.
    pub classifier_time: Option<f64>,
    pub gesture_category: Option<String>,
    pub gesture_selected: Option<String>,
}

pub fn unix_now() -> f64 {
    (chrono::Utc::now().timestamp_micros() as f64) / 1_000_000.0
}

/// Append-only JSONL log, one file per session.
pub struct InteractionLog {
    path: PathBuf,
}

impl InteractionLog {
    /// Create `dir` if needed and pick `interaction_log_<tag><unix>.jsonl`.
    pub fn create(dir: &Path, tag: &str) -> anyhow::Result<Self> {
        std::fs::create_dir_all(dir).with_context(|| format!("creating log dir {}", dir.display()))?;
        let name = format!("interaction_log_{}{}.jsonl", tag, chrono::Utc::now().timestamp());
        let path = dir.join(name);
        let shown = std::path::absolute(&path).unwrap_or_else(|_| path.clone());
        info!(path = %shown.display(), "📝 interaction log");
        Ok(InteractionLog { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, record: &InteractionRecord) -> anyhow::Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions
            ::new()
            .create(true)
            .append(true)
            .open(&self.path).await
            .with_context(|| format!("opening {}", self.path.display()))?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}
