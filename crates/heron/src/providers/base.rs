use async_trait::async_trait;
use futures::stream::{self, BoxStream};

use crate::errors::ModelError;
use crate::models::message::Message;
use crate::models::tool::{ToolCallRequest, ToolDefinition};

/// What the model produced for one turn: either a plain answer or a
/// request to call tools, never both.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelResponse {
    FinalAnswer { text: String },
    /// Carries at least one call; an empty request list is a gateway bug.
    ToolCallsRequested { calls: Vec<ToolCallRequest> },
}

/// One element of a streamed exchange. Text arrives incrementally;
/// tool-call requests are only ever delivered whole in the terminal
/// `Completed` event, since partial JSON arguments are not actionable.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    TextDelta(String),
    Completed(ModelResponse),
}

/// Finite, single-pass, non-restartable sequence of stream events.
/// Consuming it to completion yields the same `ModelResponse` the
/// non-streaming path would have returned.
pub type ModelStream = BoxStream<'static, Result<StreamEvent, ModelError>>;

/// One request/response exchange with the language-model endpoint,
/// credential attachment included.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<ModelResponse, ModelError>;

    /// Streaming variant of `complete`. The default adapts the
    /// non-streaming path into a two-event stream, which is exact for
    /// gateways without native streaming.
    async fn stream(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<ModelStream, ModelError> {
        let response = self.complete(system, messages, tools).await?;
        let mut events = Vec::new();
        if let ModelResponse::FinalAnswer { text } = &response {
            if !text.is_empty() {
                events.push(Ok(StreamEvent::TextDelta(text.clone())));
            }
        }
        events.push(Ok(StreamEvent::Completed(response)));
        Ok(Box::pin(stream::iter(events)))
    }

    /// Invalidate and re-acquire the model-domain credential. Called by the
    /// agent loop exactly once per model call when the endpoint rejects a
    /// token that looked valid locally.
    async fn refresh_auth(&self) -> Result<(), ModelError>;
}
