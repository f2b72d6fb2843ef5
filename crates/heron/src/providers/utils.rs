use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::errors::ModelError;
use crate::models::message::Message;
use crate::models::tool::{ToolCallRequest, ToolDefinition};
use crate::providers::base::ModelResponse;

/// Convert internal messages to the chat-completions message array. The
/// system message is not part of the conversation; the gateway prepends it.
pub fn messages_to_chat_spec(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|message| {
            let mut converted = json!({"role": message.role});
            if message.tool_calls.is_empty() {
                converted["content"] = json!(message.content);
            } else {
                // Tool-call arguments travel string-encoded on this wire.
                let calls: Vec<Value> = message
                    .tool_calls
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": {
                                "name": call.name,
                                "arguments": call.arguments.to_string(),
                            }
                        })
                    })
                    .collect();
                converted["tool_calls"] = json!(calls);
                if !message.content.is_empty() {
                    converted["content"] = json!(message.content);
                }
            }
            if let Some(id) = &message.tool_call_id {
                converted["tool_call_id"] = json!(id);
            }
            converted
        })
        .collect()
}

/// Convert catalog definitions to the function/tool schema the model
/// endpoint expects.
pub fn tools_to_chat_spec(tools: &[ToolDefinition]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.input_schema,
                }
            })
        })
        .collect()
}

/// Interpret a non-streaming chat-completions response body. Exactly one
/// response kind comes out: a response with at least one tool call is a
/// tool-call request, otherwise the assistant text is the final answer, and
/// a body with neither is malformed.
pub fn parse_chat_response(response: &Value) -> Result<ModelResponse, ModelError> {
    let message = response
        .get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"))
        .ok_or_else(|| ModelError::Malformed("response carried no choices".into()))?;

    let mut calls = Vec::new();
    if let Some(raw_calls) = message.get("tool_calls").and_then(Value::as_array) {
        for raw in raw_calls {
            calls.push(parse_tool_call(raw)?);
        }
    }
    if !calls.is_empty() {
        return Ok(ModelResponse::ToolCallsRequested { calls });
    }

    match message.get("content").and_then(Value::as_str) {
        Some(text) => Ok(ModelResponse::FinalAnswer {
            text: text.to_string(),
        }),
        None => Err(ModelError::Malformed(
            "assistant message carried neither text nor tool calls".into(),
        )),
    }
}

fn parse_tool_call(raw: &Value) -> Result<ToolCallRequest, ModelError> {
    let id = raw
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| ModelError::Malformed("tool call is missing its id".into()))?;
    let function = raw
        .get("function")
        .ok_or_else(|| ModelError::Malformed(format!("tool call `{id}` has no function")))?;
    let name = function
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| ModelError::Malformed(format!("tool call `{id}` has no function name")))?;
    let raw_arguments = function
        .get("arguments")
        .and_then(Value::as_str)
        .unwrap_or("{}");
    let arguments: Value = if raw_arguments.trim().is_empty() {
        json!({})
    } else {
        serde_json::from_str(raw_arguments).map_err(|e| {
            ModelError::Malformed(format!("tool call `{id}` has unparseable arguments: {e}"))
        })?
    };

    Ok(ToolCallRequest::new(id, name, arguments))
}

/// Reassembles a streamed exchange: text deltas accumulate as they arrive,
/// tool-call fragments merge by index and only become visible whole once
/// the stream finishes.
#[derive(Debug, Default)]
pub struct StreamAssembler {
    text: String,
    calls: BTreeMap<u64, PartialToolCall>,
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl StreamAssembler {
    /// Absorb one stream chunk, returning the new text fragment if the
    /// chunk carried one.
    pub fn absorb(&mut self, chunk: &Value) -> Option<String> {
        let delta = chunk.get("choices")?.get(0)?.get("delta")?;

        if let Some(raw_calls) = delta.get("tool_calls").and_then(Value::as_array) {
            for raw in raw_calls {
                let index = raw.get("index").and_then(Value::as_u64).unwrap_or(0);
                let entry = self.calls.entry(index).or_default();
                if let Some(id) = raw.get("id").and_then(Value::as_str) {
                    entry.id = Some(id.to_string());
                }
                let function = raw.get("function");
                if let Some(name) = function.and_then(|f| f.get("name")).and_then(Value::as_str) {
                    entry.name = Some(name.to_string());
                }
                if let Some(fragment) = function
                    .and_then(|f| f.get("arguments"))
                    .and_then(Value::as_str)
                {
                    entry.arguments.push_str(fragment);
                }
            }
        }

        let fragment = delta.get("content").and_then(Value::as_str)?;
        if fragment.is_empty() {
            return None;
        }
        self.text.push_str(fragment);
        Some(fragment.to_string())
    }

    /// Build the final response once the stream has terminated.
    pub fn finish(self) -> Result<ModelResponse, ModelError> {
        if self.calls.is_empty() {
            if self.text.is_empty() {
                return Err(ModelError::Malformed(
                    "stream carried neither text nor tool calls".into(),
                ));
            }
            return Ok(ModelResponse::FinalAnswer { text: self.text });
        }

        let mut calls = Vec::with_capacity(self.calls.len());
        for (index, partial) in self.calls {
            let id = partial.id.ok_or_else(|| {
                ModelError::Malformed(format!("streamed tool call at index {index} is missing id"))
            })?;
            let name = partial.name.ok_or_else(|| {
                ModelError::Malformed(format!(
                    "streamed tool call at index {index} is missing a name"
                ))
            })?;
            let arguments: Value = if partial.arguments.trim().is_empty() {
                json!({})
            } else {
                serde_json::from_str(&partial.arguments).map_err(|e| {
                    ModelError::Malformed(format!(
                        "streamed tool call `{id}` has unparseable arguments: {e}"
                    ))
                })?
            };
            calls.push(ToolCallRequest::new(id, name, arguments));
        }
        Ok(ModelResponse::ToolCallsRequested { calls })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::Role;

    #[test]
    fn plain_messages_convert_role_and_content() {
        let spec = messages_to_chat_spec(&[Message::user("Hello")]);
        assert_eq!(spec, vec![json!({"role": "user", "content": "Hello"})]);
    }

    #[test]
    fn assistant_tool_calls_encode_arguments_as_a_string() {
        let message = Message::assistant_tool_calls(vec![ToolCallRequest::new(
            "call_1",
            "add",
            json!({"a": 2, "b": 2}),
        )]);
        let spec = messages_to_chat_spec(&[message]);

        assert_eq!(spec[0]["role"], "assistant");
        assert!(spec[0].get("content").is_none());
        let call = &spec[0]["tool_calls"][0];
        assert_eq!(call["id"], "call_1");
        assert_eq!(call["function"]["name"], "add");
        let arguments: Value =
            serde_json::from_str(call["function"]["arguments"].as_str().unwrap()).unwrap();
        assert_eq!(arguments, json!({"a": 2, "b": 2}));
    }

    #[test]
    fn tool_results_carry_their_call_id() {
        let spec = messages_to_chat_spec(&[Message::tool_result("call_1", "4")]);
        assert_eq!(
            spec,
            vec![json!({"role": "tool", "content": "4", "tool_call_id": "call_1"})]
        );
    }

    #[test]
    fn conversation_round_trips_through_the_wire_shape() {
        let messages = vec![
            Message::user("What is 2+2?"),
            Message::assistant_tool_calls(vec![ToolCallRequest::new(
                "call_1",
                "add",
                json!({"a": 2, "b": 2}),
            )]),
            Message::tool_result("call_1", "4"),
        ];
        let spec = messages_to_chat_spec(&messages);

        assert_eq!(spec.len(), 3);
        assert_eq!(spec[2]["tool_call_id"], spec[1]["tool_calls"][0]["id"]);
        assert!(matches!(messages[1].role, Role::Assistant));
    }

    #[test]
    fn tools_convert_to_the_function_schema() {
        let tool = ToolDefinition::new(
            "add",
            "Add two numbers",
            json!({"type": "object", "properties": {"a": {"type": "number"}}}),
        );
        let spec = tools_to_chat_spec(&[tool]);

        assert_eq!(spec[0]["type"], "function");
        assert_eq!(spec[0]["function"]["name"], "add");
        assert_eq!(spec[0]["function"]["parameters"]["type"], "object");
    }

    #[test]
    fn text_responses_parse_to_a_final_answer() {
        let response = json!({
            "choices": [{"message": {"role": "assistant", "content": "Hello!"}}]
        });
        assert_eq!(
            parse_chat_response(&response).unwrap(),
            ModelResponse::FinalAnswer {
                text: "Hello!".into()
            }
        );
    }

    #[test]
    fn tool_call_responses_parse_whole() {
        let response = json!({
            "choices": [{"message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": "add", "arguments": "{\"a\":2,\"b\":2}"}
                }]
            }}]
        });

        let ModelResponse::ToolCallsRequested { calls } = parse_chat_response(&response).unwrap()
        else {
            panic!("expected a tool-call request");
        };
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].arguments, json!({"a": 2, "b": 2}));
    }

    #[test]
    fn a_response_with_neither_text_nor_calls_is_malformed() {
        let response = json!({"choices": [{"message": {"role": "assistant", "content": null}}]});
        assert!(matches!(
            parse_chat_response(&response),
            Err(ModelError::Malformed(_))
        ));
    }

    #[test]
    fn unparseable_tool_arguments_are_malformed() {
        let response = json!({
            "choices": [{"message": {
                "tool_calls": [{
                    "id": "call_1",
                    "function": {"name": "add", "arguments": "{broken"}
                }]
            }}]
        });
        assert!(matches!(
            parse_chat_response(&response),
            Err(ModelError::Malformed(_))
        ));
    }

    #[test]
    fn assembler_accumulates_text_deltas() {
        let mut assembler = StreamAssembler::default();
        let first = assembler.absorb(&json!({"choices": [{"delta": {"content": "Hel"}}]}));
        let second = assembler.absorb(&json!({"choices": [{"delta": {"content": "lo"}}]}));

        assert_eq!(first.as_deref(), Some("Hel"));
        assert_eq!(second.as_deref(), Some("lo"));
        assert_eq!(
            assembler.finish().unwrap(),
            ModelResponse::FinalAnswer { text: "Hello".into() }
        );
    }

    #[test]
    fn assembler_merges_split_tool_call_arguments() {
        let mut assembler = StreamAssembler::default();
        assembler.absorb(&json!({"choices": [{"delta": {"tool_calls": [{
            "index": 0,
            "id": "call_1",
            "function": {"name": "add", "arguments": "{\"a\":"}
        }]}}]}));
        assembler.absorb(&json!({"choices": [{"delta": {"tool_calls": [{
            "index": 0,
            "function": {"arguments": "2}"}
        }]}}]}));

        let ModelResponse::ToolCallsRequested { calls } = assembler.finish().unwrap() else {
            panic!("expected a tool-call request");
        };
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].arguments, json!({"a": 2}));
    }

    #[test]
    fn assembler_normalizes_empty_streamed_arguments_to_an_object() {
        let mut assembler = StreamAssembler::default();
        assembler.absorb(&json!({"choices": [{"delta": {"tool_calls": [{
            "index": 0,
            "id": "call_1",
            "function": {"name": "noop"}
        }]}}]}));

        let ModelResponse::ToolCallsRequested { calls } = assembler.finish().unwrap() else {
            panic!("expected a tool-call request");
        };
        assert_eq!(calls[0].arguments, json!({}));
    }

    #[test]
    fn assembler_tolerates_chunks_without_choices() {
        let mut assembler = StreamAssembler::default();
        assert_eq!(assembler.absorb(&json!({"choices": []})), None);
        assert_eq!(assembler.absorb(&json!({})), None);
    }
}
