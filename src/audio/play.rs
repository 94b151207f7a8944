use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

use super::PlaybackDevice;

/// Plays clips by running an external player, `<command> [args..] <clip>`.
pub struct CommandPlayer {
    program: String,
    args: Vec<String>,
    prepared: Option<PathBuf>,
}

impl CommandPlayer {
    /// `command` is split on whitespace, e.g. `"aplay -q"`.
    pub fn new(command: &str) -> Result<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| anyhow::anyhow!("empty player command"))?;
        Ok(Self {
            program,
            args: parts.collect(),
            prepared: None,
        })
    }
}

#[async_trait]
impl PlaybackDevice for CommandPlayer {
    async fn prepare(&mut self, clip: &Path) -> Result<()> {
        let meta = tokio::fs::metadata(clip)
            .await
            .with_context(|| format!("clip {} not readable", clip.display()))?;
        if !meta.is_file() {
            anyhow::bail!("clip {} is not a file", clip.display());
        }
        self.prepared = Some(clip.to_path_buf());
        Ok(())
    }

    async fn play(&mut self) -> Result<()> {
        let clip = self
            .prepared
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no clip prepared"))?;

        log::debug!("Running player: {} {:?} {}", self.program, self.args, clip.display());
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(clip)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to spawn player {}", self.program))?;

        if output.status.success() {
            Ok(())
        } else {
            let err_str = String::from_utf8_lossy(&output.stderr).to_string();
            anyhow::bail!("Player exited with {}: {}", output.status, err_str.trim())
        }
    }

    fn release(&mut self) {
        self.prepared = None;
    }
}
