//! Tool catalog adapter: discovers the tool definitions the remote server
//! exposes and carries each invocation over the wire. The server speaks
//! JSON-RPC 2.0 over HTTP POST (`tools/list` / `tools/call`) and expects a
//! bearer token scoped to its own resource on every request.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::credentials::{CredentialProvider, Domain};
use crate::errors::{CatalogError, ToolError};
use crate::models::tool::ToolDefinition;

/// Named remote operations the agent loop can dispatch to.
#[async_trait]
pub trait ToolCatalog: Send + Sync {
    fn definitions(&self) -> &[ToolDefinition];

    /// Invoke a tool by name. Arguments are validated against the tool's
    /// declared input schema before anything goes on the wire.
    async fn invoke(&self, name: &str, arguments: &Value) -> Result<Value, ToolError>;
}

/// Transport-level failure of one JSON-RPC exchange, before it is mapped
/// into the caller's error domain.
enum RpcFailure {
    Auth(String),
    Timeout(String),
    Connect(String),
    Status(StatusCode, String),
    Malformed(String),
    Remote { code: i64, message: String },
}

impl RpcFailure {
    fn describe(&self) -> String {
        match self {
            RpcFailure::Auth(m) => format!("authorization failed: {m}"),
            RpcFailure::Timeout(m) => format!("request timed out: {m}"),
            RpcFailure::Connect(m) => format!("connection failed: {m}"),
            RpcFailure::Status(status, body) => format!("server returned {status}: {body}"),
            RpcFailure::Malformed(m) => format!("uninterpretable response: {m}"),
            RpcFailure::Remote { code, message } => format!("server error {code}: {message}"),
        }
    }
}

/// Catalog backed by a live tool server. `connect` performs the one
/// introspection call of the session; the listing is immutable afterwards.
pub struct RemoteToolCatalog {
    client: Client,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
    definitions: Vec<ToolDefinition>,
    request_id: AtomicU64,
}

impl std::fmt::Debug for RemoteToolCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteToolCatalog")
            .field("base_url", &self.base_url)
            .field("definitions", &self.definitions)
            .field("request_id", &self.request_id)
            .finish_non_exhaustive()
    }
}

impl RemoteToolCatalog {
    pub async fn connect<S: Into<String>>(
        base_url: S,
        credentials: Arc<dyn CredentialProvider>,
        timeout: Duration,
    ) -> Result<Self, CatalogError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CatalogError::Unavailable(e.to_string()))?;

        let mut catalog = RemoteToolCatalog {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            definitions: Vec::new(),
            request_id: AtomicU64::new(1),
        };
        catalog.definitions = catalog.fetch_catalog().await?;
        info!(tools = catalog.definitions.len(), "connected to tool server");
        Ok(catalog)
    }

    async fn fetch_catalog(&self) -> Result<Vec<ToolDefinition>, CatalogError> {
        let result = self
            .rpc("tools/list", json!({}))
            .await
            .map_err(|failure| CatalogError::Unavailable(failure.describe()))?;

        let listing = result
            .get("tools")
            .cloned()
            .ok_or_else(|| CatalogError::Unavailable("listing carried no tools array".into()))?;
        let definitions: Vec<ToolDefinition> = serde_json::from_value(listing)
            .map_err(|e| CatalogError::Unavailable(format!("malformed tool listing: {e}")))?;

        let mut seen = HashSet::new();
        for definition in &definitions {
            if !seen.insert(definition.name.as_str()) {
                return Err(CatalogError::Unavailable(format!(
                    "duplicate tool name in listing: {}",
                    definition.name
                )));
            }
        }
        Ok(definitions)
    }

    async fn rpc(&self, rpc_method: &str, params: Value) -> Result<Value, RpcFailure> {
        let token = self
            .credentials
            .get_token(Domain::ToolServer)
            .await
            .map_err(|e| RpcFailure::Auth(e.to_string()))?;

        let body = json!({
            "jsonrpc": "2.0",
            "id": self.request_id.fetch_add(1, Ordering::Relaxed),
            "method": rpc_method,
            "params": params,
        });

        debug!(method = rpc_method, "calling tool server");
        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(token.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RpcFailure::Timeout(e.to_string())
                } else {
                    RpcFailure::Connect(e.to_string())
                }
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(RpcFailure::Auth(format!("server returned {status}: {body}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RpcFailure::Status(status, body));
        }

        let envelope: Value = response
            .json()
            .await
            .map_err(|e| RpcFailure::Malformed(e.to_string()))?;

        if let Some(error) = envelope.get("error") {
            return Err(RpcFailure::Remote {
                code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unspecified error")
                    .to_string(),
            });
        }

        envelope
            .get("result")
            .cloned()
            .ok_or_else(|| RpcFailure::Malformed("response carried neither result nor error".into()))
    }
}

#[async_trait]
impl ToolCatalog for RemoteToolCatalog {
    fn definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    async fn invoke(&self, name: &str, arguments: &Value) -> Result<Value, ToolError> {
        let definition = self
            .definitions
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        validate_arguments(name, &definition.input_schema, arguments)?;

        let result = self
            .rpc("tools/call", json!({"name": name, "arguments": arguments}))
            .await
            .map_err(|failure| match failure {
                // The request may already have reached the server; the call
                // is non-idempotent, so no retry here.
                RpcFailure::Timeout(message) => ToolError::Ambiguous {
                    tool: name.to_string(),
                    message,
                },
                RpcFailure::Remote { code: -32602, message } => ToolError::InvalidArguments {
                    tool: name.to_string(),
                    message,
                },
                other => ToolError::Unreachable(other.describe()),
            })?;

        debug!(tool = name, "tool call completed");
        Ok(result)
    }
}

/// Structural check of an arguments object against the declared input
/// schema: the value must be an object, every `required` member must be
/// present, declared primitive types must match, and unknown members are
/// rejected when the schema says `additionalProperties: false`.
fn validate_arguments(tool: &str, schema: &Value, arguments: &Value) -> Result<(), ToolError> {
    let invalid = |message: String| ToolError::InvalidArguments {
        tool: tool.to_string(),
        message,
    };

    let object = arguments
        .as_object()
        .ok_or_else(|| invalid("arguments must be a JSON object".into()))?;

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if !object.contains_key(name) {
                return Err(invalid(format!("missing required property `{name}`")));
            }
        }
    }

    let properties = schema.get("properties").and_then(Value::as_object);

    if let Some(properties) = properties {
        for (name, value) in object {
            let Some(declared) = properties.get(name) else {
                if schema.get("additionalProperties") == Some(&Value::Bool(false)) {
                    return Err(invalid(format!("unexpected property `{name}`")));
                }
                continue;
            };
            let Some(expected) = declared.get("type").and_then(Value::as_str) else {
                continue;
            };
            if !type_matches(expected, value) {
                return Err(invalid(format!(
                    "property `{name}` must be of type {expected}"
                )));
            }
        }
    }

    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticCredentialProvider;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn add_schema() -> Value {
        json!({
            "type": "object",
            "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
            "required": ["a", "b"],
            "additionalProperties": false
        })
    }

    fn listing_response() -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "tools": [{
                    "name": "add",
                    "description": "Add two numbers",
                    "inputSchema": add_schema(),
                }]
            }
        }))
    }

    async fn connect(server: &MockServer) -> RemoteToolCatalog {
        let credentials = Arc::new(StaticCredentialProvider::new("m", "tool-token"));
        RemoteToolCatalog::connect(server.uri(), credentials, Duration::from_secs(5))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn connect_fetches_the_listing_with_a_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("Authorization", "Bearer tool-token"))
            .and(body_partial_json(json!({"method": "tools/list"})))
            .respond_with(listing_response())
            .expect(1)
            .mount(&server)
            .await;

        let catalog = connect(&server).await;
        assert_eq!(catalog.definitions().len(), 1);
        assert_eq!(catalog.definitions()[0].name, "add");
    }

    #[tokio::test]
    async fn unreachable_server_is_fatal_for_the_session() {
        let credentials = Arc::new(StaticCredentialProvider::new("m", "t"));
        let err = RemoteToolCatalog::connect(
            "http://127.0.0.1:9".to_string(),
            credentials,
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, CatalogError::Unavailable(_)));
    }

    #[tokio::test]
    async fn duplicate_tool_names_make_the_listing_unusable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": {"tools": [
                    {"name": "add", "inputSchema": {}},
                    {"name": "add", "inputSchema": {}}
                ]}
            })))
            .mount(&server)
            .await;

        let credentials = Arc::new(StaticCredentialProvider::new("m", "t"));
        let err = RemoteToolCatalog::connect(server.uri(), credentials, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("duplicate tool name"));
    }

    #[tokio::test]
    async fn invoke_sends_the_call_and_returns_the_result() {
        let server = MockServer::start().await;
        Mock::given(body_partial_json(json!({"method": "tools/list"})))
            .respond_with(listing_response())
            .mount(&server)
            .await;
        Mock::given(body_partial_json(
            json!({"method": "tools/call", "params": {"name": "add", "arguments": {"a": 2, "b": 2}}}),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 2,
            "result": {"content": [{"type": "text", "text": "4"}]}
        })))
        .expect(1)
        .mount(&server)
        .await;

        let catalog = connect(&server).await;
        let result = catalog.invoke("add", &json!({"a": 2, "b": 2})).await.unwrap();
        assert_eq!(result["content"][0]["text"], "4");
    }

    #[tokio::test]
    async fn schema_invalid_arguments_never_reach_the_wire() {
        let server = MockServer::start().await;
        Mock::given(body_partial_json(json!({"method": "tools/list"})))
            .respond_with(listing_response())
            .mount(&server)
            .await;
        Mock::given(body_partial_json(json!({"method": "tools/call"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let catalog = connect(&server).await;

        let err = catalog.invoke("add", &json!({"a": 2})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
        assert!(err.to_string().contains("missing required property `b`"));

        let err = catalog
            .invoke("add", &json!({"a": 2, "b": "two"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("must be of type number"));
    }

    #[tokio::test]
    async fn unknown_tool_never_triggers_a_network_call() {
        let server = MockServer::start().await;
        Mock::given(body_partial_json(json!({"method": "tools/list"})))
            .respond_with(listing_response())
            .mount(&server)
            .await;
        Mock::given(body_partial_json(json!({"method": "tools/call"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let catalog = connect(&server).await;
        let err = catalog.invoke("subtract", &json!({})).await.unwrap_err();
        assert_eq!(err, ToolError::UnknownTool("subtract".into()));
    }

    #[tokio::test]
    async fn invocation_timeout_surfaces_as_ambiguous() {
        let server = MockServer::start().await;
        Mock::given(body_partial_json(json!({"method": "tools/list"})))
            .respond_with(listing_response())
            .mount(&server)
            .await;
        Mock::given(body_partial_json(json!({"method": "tools/call"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"jsonrpc": "2.0", "id": 2, "result": {}}))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let credentials = Arc::new(StaticCredentialProvider::new("m", "t"));
        let catalog =
            RemoteToolCatalog::connect(server.uri(), credentials, Duration::from_millis(200))
                .await
                .unwrap();

        let err = catalog.invoke("add", &json!({"a": 1, "b": 2})).await.unwrap_err();
        assert!(matches!(err, ToolError::Ambiguous { .. }));
    }

    #[tokio::test]
    async fn remote_invalid_params_map_to_invalid_arguments() {
        let server = MockServer::start().await;
        Mock::given(body_partial_json(json!({"method": "tools/list"})))
            .respond_with(listing_response())
            .mount(&server)
            .await;
        Mock::given(body_partial_json(json!({"method": "tools/call"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 2,
                "error": {"code": -32602, "message": "a must be finite"}
            })))
            .mount(&server)
            .await;

        let catalog = connect(&server).await;
        let err = catalog.invoke("add", &json!({"a": 1, "b": 2})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    #[test]
    fn validation_rejects_non_object_arguments() {
        let err = validate_arguments("add", &add_schema(), &json!([1, 2])).unwrap_err();
        assert!(err.to_string().contains("must be a JSON object"));
    }

    #[test]
    fn validation_rejects_undeclared_properties_when_schema_is_closed() {
        let err =
            validate_arguments("add", &add_schema(), &json!({"a": 1, "b": 2, "c": 3})).unwrap_err();
        assert!(err.to_string().contains("unexpected property `c`"));
    }

    #[test]
    fn validation_accepts_a_conforming_object() {
        validate_arguments("add", &add_schema(), &json!({"a": 1, "b": 2.5})).unwrap();
    }

    #[test]
    fn validation_skips_types_it_does_not_model() {
        let schema = json!({
            "type": "object",
            "properties": {"when": {"type": ["string", "null"]}}
        });
        validate_arguments("t", &schema, &json!({"when": "now"})).unwrap();
    }
}
