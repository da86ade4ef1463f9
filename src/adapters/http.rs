//! HTTP agent invoker.
//!
//! Endpoint: POST {base_url}/agents/{agent_id}/invoke
//! Auth: optional Bearer token

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::{AgentInvoker, AgentRequest, AgentResponse};

/// Agent invoker calling a remote agent service
pub struct HttpInvoker {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpInvoker {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            client: reqwest::Client::new(),
        }
    }

    /// Invoke endpoint for an agent
    pub fn endpoint(&self, agent_id: &str) -> String {
        format!("{}/agents/{}/invoke", self.base_url, agent_id)
    }
}

#[async_trait]
impl AgentInvoker for HttpInvoker {
    fn name(&self) -> &str {
        "http"
    }

    async fn invoke(&self, request: AgentRequest) -> Result<AgentResponse> {
        let mut builder = self
            .client
            .post(self.endpoint(&request.agent_id))
            .header("Content-Type", "application/json")
            .timeout(Duration::from_secs(request.timeout_seconds.max(1)))
            .json(&request);

        if let Some(token) = &self.token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }

        let response = builder
            .send()
            .await
            .with_context(|| format!("Failed to reach agent '{}'", request.agent_id))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Agent '{}' error ({}): {}", request.agent_id, status, text)
        }

        response
            .json::<AgentResponse>()
            .await
            .with_context(|| format!("Agent '{}' returned an invalid response", request.agent_id))
    }
}
