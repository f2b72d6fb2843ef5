use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use reqwest_eventsource::{Error as EventSourceError, Event, EventSource};
use serde_json::{json, Value};
use tracing::debug;

use crate::credentials::{CredentialProvider, Domain};
use crate::errors::ModelError;
use crate::models::message::Message;
use crate::models::tool::ToolDefinition;
use crate::providers::base::{ModelGateway, ModelResponse, ModelStream, StreamEvent};
use crate::providers::utils::{
    messages_to_chat_spec, parse_chat_response, tools_to_chat_spec, StreamAssembler,
};

#[derive(Debug, Clone)]
pub struct AzureGatewayConfig {
    /// Base URL of the Azure OpenAI resource, e.g. `https://acme.openai.azure.com`.
    pub endpoint: String,
    pub api_version: String,
    pub deployment: String,
    pub timeout: Duration,
}

/// Gateway to an Azure OpenAI chat-completions deployment. The bearer
/// token comes from the model identity domain on every request; the
/// deployment is addressed in the URL, not the payload.
pub struct AzureModelGateway {
    client: Client,
    config: AzureGatewayConfig,
    credentials: Arc<dyn CredentialProvider>,
}

impl AzureModelGateway {
    pub fn new(
        config: AzureGatewayConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, ModelError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ModelError::Unreachable(e.to_string()))?;

        Ok(AzureModelGateway {
            client,
            config,
            credentials,
        })
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.deployment,
            self.config.api_version
        )
    }

    async fn bearer(&self) -> Result<String, ModelError> {
        self.credentials
            .get_token(Domain::Model)
            .await
            .map(|credential| credential.token)
            .map_err(|e| ModelError::AuthExpired(e.to_string()))
    }

    fn build_payload(
        system: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
        stream: bool,
    ) -> Value {
        let mut chat = vec![json!({"role": "system", "content": system})];
        chat.extend(messages_to_chat_spec(messages));

        let mut payload = json!({"messages": chat});
        if !tools.is_empty() {
            payload["tools"] = json!(tools_to_chat_spec(tools));
        }
        if stream {
            payload["stream"] = json!(true);
        }
        payload
    }

    async fn post(&self, payload: Value) -> Result<Value, ModelError> {
        let token = self.bearer().await?;
        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if status == StatusCode::OK {
            return response
                .json()
                .await
                .map_err(|e| ModelError::Malformed(e.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, &body))
    }
}

#[async_trait]
impl ModelGateway for AzureModelGateway {
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<ModelResponse, ModelError> {
        let payload = Self::build_payload(system, messages, tools, false);
        debug!(messages = messages.len(), tools = tools.len(), "requesting completion");
        let response = self.post(payload).await?;

        if let Some(error) = response.get("error") {
            return Err(ModelError::Malformed(error.to_string()));
        }
        parse_chat_response(&response)
    }

    async fn stream(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<ModelStream, ModelError> {
        let token = self.bearer().await?;
        let payload = Self::build_payload(system, messages, tools, true);
        debug!(messages = messages.len(), tools = tools.len(), "opening completion stream");

        let builder = self
            .client
            .post(self.completions_url())
            .bearer_auth(token)
            .json(&payload);
        let source = EventSource::new(builder)
            .map_err(|e| ModelError::Unreachable(format!("could not open event stream: {e}")))?;

        Ok(stream_events(source))
    }

    async fn refresh_auth(&self) -> Result<(), ModelError> {
        self.credentials.invalidate(Domain::Model).await;
        self.bearer().await.map(|_| ())
    }
}

/// Pump server-sent events into stream events. Azure terminates the event
/// sequence with a literal `[DONE]` message; a connection that ends without
/// one never produced a complete response.
fn stream_events(mut source: EventSource) -> ModelStream {
    Box::pin(async_stream::stream! {
        let mut assembler = StreamAssembler::default();
        let mut terminated = false;

        while let Some(event) = source.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(message)) => {
                    if message.data.trim() == "[DONE]" {
                        terminated = true;
                        source.close();
                        break;
                    }
                    match serde_json::from_str::<Value>(&message.data) {
                        Ok(chunk) => {
                            if let Some(delta) = assembler.absorb(&chunk) {
                                yield Ok(StreamEvent::TextDelta(delta));
                            }
                        }
                        Err(e) => {
                            yield Err(ModelError::Malformed(format!(
                                "unparseable stream chunk: {e}"
                            )));
                            return;
                        }
                    }
                }
                Err(EventSourceError::StreamEnded) => break,
                Err(EventSourceError::InvalidStatusCode(status, response)) => {
                    let body = response.text().await.unwrap_or_default();
                    yield Err(status_error(status, &body));
                    return;
                }
                Err(EventSourceError::Transport(e)) => {
                    yield Err(classify_transport(e));
                    return;
                }
                Err(e) => {
                    yield Err(ModelError::Malformed(e.to_string()));
                    return;
                }
            }
        }

        if terminated {
            match assembler.finish() {
                Ok(response) => yield Ok(StreamEvent::Completed(response)),
                Err(e) => yield Err(e),
            }
        } else {
            yield Err(ModelError::Unreachable(
                "event stream ended before completion".into(),
            ));
        }
    })
}

fn classify_transport(error: reqwest::Error) -> ModelError {
    if error.is_timeout() {
        ModelError::Unreachable(format!("request timed out: {error}"))
    } else {
        ModelError::Unreachable(error.to_string())
    }
}

fn status_error(status: StatusCode, body: &str) -> ModelError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ModelError::AuthExpired(format!("endpoint returned {status}: {body}"))
        }
        StatusCode::TOO_MANY_REQUESTS => {
            ModelError::RateLimited(format!("endpoint returned {status}: {body}"))
        }
        _ => ModelError::Unreachable(format!("endpoint returned {status}: {body}")),
    }
}
