use std::time::Duration;

use futures::StreamExt;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::catalog::ToolCatalog;
use crate::errors::{AgentError, ModelError, ToolError};
use crate::models::message::Message;
use crate::models::tool::{ToolCallRequest, ToolDefinition};
use crate::providers::base::{ModelGateway, ModelResponse, StreamEvent};
use crate::session::Session;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant with access to tools \
exposed by a remote server. Use them when they can help answer the user's questions or \
complete their tasks. Maintain context from previous messages in the conversation.";

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub system_prompt: String,
    /// Hard bound on model-call rounds per run; prevents a model that keeps
    /// requesting tools from looping forever.
    pub max_turns: usize,
    /// Bounded retries for rate-limited model calls.
    pub rate_limit_retries: u32,
    pub rate_limit_backoff: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_turns: 10,
            rate_limit_retries: 3,
            rate_limit_backoff: Duration::from_millis(500),
        }
    }
}

const RATE_LIMIT_BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Where the loop is between transitions; logged, not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    AwaitingModel,
    DispatchingTools,
    Done,
    Failed,
}

/// The orchestration loop: drives the conversation between the model
/// gateway and the tool catalog until the model produces a plain answer or
/// a limit is hit.
pub struct Agent {
    gateway: Box<dyn ModelGateway>,
    catalog: Box<dyn ToolCatalog>,
    config: AgentConfig,
}

impl Agent {
    pub fn new(
        gateway: Box<dyn ModelGateway>,
        catalog: Box<dyn ToolCatalog>,
        config: AgentConfig,
    ) -> Self {
        Agent {
            gateway,
            catalog,
            config,
        }
    }

    /// Run one user request to completion and return the final answer.
    pub async fn run(
        &self,
        user_input: impl Into<String>,
        session: &mut Session,
    ) -> Result<String, AgentError> {
        self.run_inner(user_input.into(), session, None).await
    }

    /// Like `run`, but streams the assistant's text through `on_delta` as
    /// it is generated. Tool-call requests are never streamed piecemeal,
    /// and nothing is appended to the conversation until a streamed
    /// response has completed.
    pub async fn run_streaming<F>(
        &self,
        user_input: impl Into<String>,
        session: &mut Session,
        mut on_delta: F,
    ) -> Result<String, AgentError>
    where
        F: FnMut(&str) + Send,
    {
        self.run_inner(user_input.into(), session, Some(&mut on_delta))
            .await
    }

    async fn run_inner(
        &self,
        user_input: String,
        session: &mut Session,
        mut on_delta: Option<&mut (dyn FnMut(&str) + Send)>,
    ) -> Result<String, AgentError> {
        session.conversation_mut().append(Message::user(user_input));

        let mut turn = 0usize;
        loop {
            self.ensure_live(session)?;
            if turn >= self.config.max_turns {
                debug!(state = ?LoopState::Failed, turn, "turn limit reached");
                return Err(AgentError::TurnLimitExceeded(self.config.max_turns));
            }
            turn += 1;

            debug!(state = ?LoopState::AwaitingModel, turn, "requesting model completion");
            let response = self.model_call(session, &mut on_delta).await?;

            match response {
                ModelResponse::FinalAnswer { text } => {
                    session
                        .conversation_mut()
                        .append(Message::assistant(text.clone()));
                    debug!(state = ?LoopState::Done, turn, "final answer produced");
                    return Ok(text);
                }
                ModelResponse::ToolCallsRequested { calls } => {
                    session
                        .conversation_mut()
                        .append(Message::assistant_tool_calls(calls.clone()));
                    debug!(
                        state = ?LoopState::DispatchingTools,
                        turn,
                        requested = calls.len(),
                        "dispatching tool calls"
                    );
                    // Dispatched one at a time in request order: a later
                    // call's arguments may depend on an earlier call's
                    // side effect on the remote system.
                    for call in &calls {
                        self.ensure_live(session)?;
                        let content = self.dispatch(call).await;
                        session
                            .conversation_mut()
                            .append(Message::tool_result(call.id.clone(), content));
                    }
                }
            }
        }
    }

    /// One model call with the loop's local recovery policy: a single
    /// transparent credential refresh on the first AuthExpired, bounded
    /// exponential backoff on RateLimited. Everything else is fatal.
    async fn model_call(
        &self,
        session: &Session,
        on_delta: &mut Option<&mut (dyn FnMut(&str) + Send)>,
    ) -> Result<ModelResponse, AgentError> {
        let tools = self.catalog.definitions();
        let mut auth_refreshed = false;
        let mut rate_limit_attempts = 0u32;

        loop {
            let outcome = match on_delta {
                Some(sink) => match self.streamed(session, tools, *sink).await {
                    Ok(response) => Ok(response),
                    Err(AgentError::Model(error)) => Err(error),
                    Err(other) => return Err(other),
                },
                None => {
                    self.gateway
                        .complete(
                            &self.config.system_prompt,
                            session.conversation().messages(),
                            tools,
                        )
                        .await
                }
            };

            match outcome {
                Ok(response) => return Ok(response),
                Err(ModelError::AuthExpired(reason)) if !auth_refreshed => {
                    warn!(%reason, "model credential rejected, refreshing once");
                    self.gateway.refresh_auth().await.map_err(AgentError::Model)?;
                    auth_refreshed = true;
                }
                Err(ModelError::RateLimited(reason))
                    if rate_limit_attempts < self.config.rate_limit_retries =>
                {
                    let delay = (self.config.rate_limit_backoff
                        * 2u32.pow(rate_limit_attempts))
                    .min(RATE_LIMIT_BACKOFF_CAP);
                    rate_limit_attempts += 1;
                    warn!(
                        %reason,
                        attempt = rate_limit_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "model endpoint rate limited, backing off"
                    );
                    sleep(delay).await;
                }
                Err(error) => return Err(AgentError::Model(error)),
            }
        }
    }

    async fn streamed(
        &self,
        session: &Session,
        tools: &[ToolDefinition],
        sink: &mut (dyn FnMut(&str) + Send),
    ) -> Result<ModelResponse, AgentError> {
        let mut stream = self
            .gateway
            .stream(
                &self.config.system_prompt,
                session.conversation().messages(),
                tools,
            )
            .await
            .map_err(AgentError::Model)?;

        let mut completed = None;
        while let Some(event) = stream.next().await {
            if session.cancel_token().is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            match event.map_err(AgentError::Model)? {
                StreamEvent::TextDelta(delta) => sink(&delta),
                StreamEvent::Completed(response) => completed = Some(response),
            }
        }

        completed.ok_or_else(|| {
            AgentError::Model(ModelError::Malformed(
                "stream ended without a completed response".into(),
            ))
        })
    }

    /// Resolve one requested call into tool-message content. Failures come
    /// back as text the model can read and correct, never as a session
    /// abort.
    async fn dispatch(&self, call: &ToolCallRequest) -> String {
        let known = self
            .catalog
            .definitions()
            .iter()
            .any(|definition| definition.name == call.name);

        let result = if known {
            self.catalog.invoke(&call.name, &call.arguments).await
        } else {
            Err(ToolError::UnknownTool(call.name.clone()))
        };

        match result {
            Ok(value) => value.to_string(),
            Err(error) => {
                warn!(tool = %call.name, %error, "tool call failed");
                format!("The tool call returned the following error:\n{error}")
            }
        }
    }

    fn ensure_live(&self, session: &Session) -> Result<(), AgentError> {
        if session.cancel_token().is_cancelled() {
            warn!("session cancelled");
            return Err(AgentError::Cancelled);
        }
        Ok(())
    }
}
