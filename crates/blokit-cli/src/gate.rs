//! Terminal prompt standing in for the OS notification permission dialog.

use async_trait::async_trait;
use blokit_core::CapabilityGate;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

pub struct PromptGate {
    assume_yes: bool,
}

impl PromptGate {
    pub fn new(assume_yes: bool) -> Self {
        Self { assume_yes }
    }
}

#[async_trait]
impl CapabilityGate for PromptGate {
    async fn request(&self) -> bool {
        if self.assume_yes {
            return true;
        }

        let mut stderr = tokio::io::stderr();
        let prompt = b"Allow blokit to notify you when the block ends? [y/N] ";
        if stderr.write_all(prompt).await.is_err() || stderr.flush().await.is_err() {
            return false;
        }

        let mut answer = String::new();
        let mut stdin = BufReader::new(tokio::io::stdin());
        match stdin.read_line(&mut answer).await {
            Ok(_) => matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
            Err(e) => {
                tracing::warn!(error = %e, "failed to read permission answer");
                false
            }
        }
    }
}
