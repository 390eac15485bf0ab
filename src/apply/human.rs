//! Asking the operator at the terminal.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::{BufRead, Write};

#[async_trait]
pub trait HumanPrompt: Send + Sync {
    /// Show `prompt` and return the operator's answer, trimmed.
    async fn ask(&self, prompt: &str) -> Result<String>;
}

/// Prompts on stdout and reads one line from stdin.
pub struct StdinPrompt;

#[async_trait]
impl HumanPrompt for StdinPrompt {
    async fn ask(&self, prompt: &str) -> Result<String> {
        let prompt = prompt.to_string();
        tokio::task::spawn_blocking(move || -> Result<String> {
            let mut out = std::io::stdout().lock();
            writeln!(out, "\n{}", prompt)?;
            write!(out, "> ")?;
            out.flush()?;
            drop(out);

            let mut line = String::new();
            let read = std::io::stdin()
                .lock()
                .read_line(&mut line)
                .context("Failed to read answer from stdin")?;
            if read == 0 {
                anyhow::bail!("stdin closed before an answer was given");
            }
            Ok(line.trim().to_string())
        })
        .await
        .context("prompt task panicked")?
    }
}
