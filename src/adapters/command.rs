//! Subprocess agent invoker.
//!
//! Spawns `<program> [args...] <agent_id>`, writes the [`AgentRequest`] as
//! JSON to stdin and parses an [`AgentResponse`] from stdout.

use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{AgentInvoker, AgentRequest, AgentResponse};

/// Agent invoker running a local command per call
pub struct CommandInvoker {
    program: String,
    args: Vec<String>,
}

impl CommandInvoker {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Arguments placed before the agent id
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait]
impl AgentInvoker for CommandInvoker {
    fn name(&self) -> &str {
        "command"
    }

    async fn invoke(&self, request: AgentRequest) -> Result<AgentResponse> {
        let payload = serde_json::to_vec(&request).context("Failed to encode agent request")?;

        debug!(program = %self.program, agent = %request.agent_id, "Spawning agent command");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(&request.agent_id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn '{}' for agent '{}'", self.program, request.agent_id))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .await
                .context("Failed to write agent request to stdin")?;
            // Dropping stdin signals EOF
        }

        let output = child
            .wait_with_output()
            .await
            .with_context(|| format!("Failed to wait for agent '{}'", request.agent_id))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            anyhow::bail!(
                "Agent '{}' exited with code {}: {}",
                request.agent_id,
                exit_code,
                stderr.trim()
            );
        }

        serde_json::from_slice(&output.stdout)
            .with_context(|| format!("Agent '{}' returned an invalid response", request.agent_id))
    }
}
