use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::errors::ModelError;
use crate::models::message::Message;
use crate::models::tool::ToolDefinition;
use crate::providers::base::{ModelGateway, ModelResponse};

/// One scripted reaction of the mock gateway to a `complete` call.
#[derive(Debug, Clone)]
pub enum ScriptedStep {
    Respond(ModelResponse),
    Fail(ModelError),
}

/// A gateway that replays a pre-configured script, for testing the agent
/// loop without a live endpoint. Also counts credential refreshes so tests
/// can assert on the recovery path.
pub struct MockModelGateway {
    steps: Mutex<VecDeque<ScriptedStep>>,
    repeat: Option<ModelResponse>,
    refreshes: Arc<AtomicUsize>,
}

impl MockModelGateway {
    /// Replay `steps` in order; once exhausted, answer with empty text.
    pub fn new(steps: Vec<ScriptedStep>) -> Self {
        MockModelGateway {
            steps: Mutex::new(steps.into()),
            repeat: None,
            refreshes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Return the same response forever. Useful as an adversarial model
    /// that never stops requesting tools.
    pub fn always(response: ModelResponse) -> Self {
        MockModelGateway {
            steps: Mutex::new(VecDeque::new()),
            repeat: Some(response),
            refreshes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    /// Shared handle to the refresh counter, so a test can keep observing
    /// it after the gateway moves into an agent.
    pub fn refresh_counter(&self) -> Arc<AtomicUsize> {
        self.refreshes.clone()
    }
}

#[async_trait]
impl ModelGateway for MockModelGateway {
    async fn complete(
        &self,
        _system: &str,
        _messages: &[Message],
        _tools: &[ToolDefinition],
    ) -> Result<ModelResponse, ModelError> {
        if let Some(step) = self.steps.lock().unwrap().pop_front() {
            return match step {
                ScriptedStep::Respond(response) => Ok(response),
                ScriptedStep::Fail(error) => Err(error),
            };
        }
        if let Some(response) = &self.repeat {
            return Ok(response.clone());
        }
        Ok(ModelResponse::FinalAnswer {
            text: String::new(),
        })
    }

    async fn refresh_auth(&self) -> Result<(), ModelError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
