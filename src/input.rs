use async_trait::async_trait;
use std::io::Write;
use tokio::io::{ AsyncBufReadExt, BufReader, Lines, Stdin };
use tokio::sync::Mutex;

/// Source of user utterances.  Speech recognition is out of scope; the
/// desktop build reads typed lines.
#[async_trait]
pub trait UserInput: Send + Sync {
    /// Next line, trimmed.  `Ok(None)` once the input is closed.
    async fn next_line(&self, prompt: &str) -> anyhow::Result<Option<String>>;
}

pub struct StdinInput {
    lines: Mutex<Lines<BufReader<Stdin>>>,
}

impl StdinInput {
    pub fn new() -> Self {
        StdinInput {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }
}

impl Default for StdinInput {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserInput for StdinInput {
    async fn next_line(&self, prompt: &str) -> anyhow::Result<Option<String>> {
        print!("{prompt}");
        std::io::stdout().flush()?;
        let mut lines = self.lines.lock().await;
        Ok(lines.next_line().await?.map(|l| l.trim().to_string()))
    }
}
