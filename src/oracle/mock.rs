//! Scripted oracle for testing without network calls.

use super::{DecisionContext, Oracle, OracleError};
use crate::domain::CandidateDecision;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Replays scripted answers in order, then answers "no action" forever.
#[derive(Debug, Clone, Default)]
pub struct MockOracle {
    script: Arc<Mutex<VecDeque<Result<CandidateDecision, OracleError>>>>,
    seen: Arc<Mutex<Vec<DecisionContext>>>,
    delay: Option<Duration>,
}

impl MockOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_decision(self, decision: CandidateDecision) -> Self {
        self.push(Ok(decision));
        self
    }

    /// Script raw oracle text, read through the same parser as real answers.
    pub fn with_text(self, text: &str) -> Self {
        self.push(Ok(super::parse_candidate(text)));
        self
    }

    pub fn with_error(self, error: OracleError) -> Self {
        self.push(Err(error));
        self
    }

    /// Sleep before every answer.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Contexts received so far, in call order.
    pub fn requests(&self) -> Vec<DecisionContext> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn push(&self, answer: Result<CandidateDecision, OracleError>) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(answer);
    }
}

#[async_trait]
impl Oracle for MockOracle {
    async fn request_decision(
        &self,
        context: &DecisionContext,
    ) -> Result<CandidateDecision, OracleError> {
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(context.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        next.unwrap_or_else(|| Ok(CandidateDecision::no_action("mock oracle: nothing scripted")))
    }
}
