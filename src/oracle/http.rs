//! Oracle reached over HTTP: the decision context goes out as JSON, free text
//! (or a JSON envelope around it) comes back.

use super::{parse_candidate, DecisionContext, Oracle, OracleError};
use crate::domain::CandidateDecision;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct HttpOracle {
    client: Client,
    url: String,
    api_key: Option<String>,
    model: Option<String>,
}

impl HttpOracle {
    pub fn new(
        url: impl Into<String>,
        api_key: Option<String>,
        model: Option<String>,
        timeout: Duration,
    ) -> Result<Self, OracleError> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(OracleError::Config("oracle url is empty".to_string()));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OracleError::Config(e.to_string()))?;
        Ok(Self {
            client,
            url,
            api_key,
            model,
        })
    }
}

#[async_trait]
impl Oracle for HttpOracle {
    async fn request_decision(
        &self,
        context: &DecisionContext,
    ) -> Result<CandidateDecision, OracleError> {
        debug!(
            agent = %context.agent_id,
            cycle = context.cycle_number,
            url = %self.url,
            "Requesting decision"
        );

        let mut request = self.client.post(&self.url).json(&json!({
            "model": self.model,
            "context": context,
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| OracleError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| OracleError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(OracleError::Http {
                status: status.as_u16(),
                message: body,
            });
        }

        Ok(parse_candidate(&unwrap_envelope(body)))
    }
}

/// Pull the model text out of a `{"content": "..."}` or `{"text": "..."}`
/// envelope; anything else is treated as the text itself.
fn unwrap_envelope(body: String) -> String {
    if let Ok(serde_json::Value::Object(mut map)) = serde_json::from_str(&body) {
        for key in ["content", "text"] {
            if let Some(serde_json::Value::String(text)) = map.remove(key) {
                return text;
            }
        }
    }
    body
}
