//! Wire protocol: outbound message envelopes and the inbound demultiplexer.
//!
//! One WebSocket message is one independent JSON envelope. Outbound
//! envelopes are camelCase-tagged unions; inbound envelopes are
//! demultiplexed into ordered [`ServerEvent`]s.

use crate::audio::AudioFormat;
use crate::config::{SessionConfig, ToolDefinition};
use crate::error::{LiveError, Result};
use crate::events::{ServerEvent, ToolCall, ToolResponse};
use base64::Engine;
use serde::Serialize;
use serde_json::{Value, json};

/// Outbound client message. Exactly one field is populated per envelope.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    setup: Option<Setup>,
    #[serde(skip_serializing_if = "Option::is_none")]
    realtime_input: Option<RealtimeInput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_content: Option<ClientContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_response: Option<ToolResponseEnvelope>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Setup {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInput {
    media_chunks: Vec<MediaChunk>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct MediaChunk {
    mime_type: String,
    data: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientContent {
    turns: Vec<Turn>,
    turn_complete: bool,
}

#[derive(Debug, Clone, Serialize)]
struct Turn {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolResponseEnvelope {
    function_responses: Vec<FunctionResponse>,
}

#[derive(Debug, Clone, Serialize)]
struct FunctionResponse {
    id: String,
    name: String,
    response: Value,
}

impl ClientMessage {
    fn empty() -> Self {
        Self { setup: None, realtime_input: None, client_content: None, tool_response: None }
    }

    /// The one-time session setup envelope: model identity, response
    /// modalities, voice, system instruction and tool declarations.
    pub fn setup(model: &str, config: &SessionConfig) -> Self {
        let mut generation_config = json!({
            "responseModalities": config
                .modalities
                .clone()
                .unwrap_or_else(|| vec!["AUDIO".to_string()]),
        });
        if let Some(voice) = &config.voice {
            generation_config["speechConfig"] = json!({
                "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": voice } }
            });
        }

        let system_instruction = config
            .instruction
            .clone()
            .map(|text| Content { parts: vec![Part { text: Some(text) }] });

        Self {
            setup: Some(Setup {
                model: model.to_string(),
                generation_config: Some(generation_config),
                system_instruction,
                tools: declare_tools(config.tools.as_deref()),
            }),
            ..Self::empty()
        }
    }

    /// One transport-encoded audio frame, mime-tagged with encoding and
    /// sample rate.
    pub fn realtime_audio(encoded: &str, format: &AudioFormat) -> Self {
        Self {
            realtime_input: Some(RealtimeInput {
                media_chunks: vec![MediaChunk {
                    mime_type: format.mime_type(),
                    data: encoded.to_string(),
                }],
            }),
            ..Self::empty()
        }
    }

    /// A complete user text turn.
    pub fn user_text(text: &str) -> Self {
        Self {
            client_content: Some(ClientContent {
                turns: vec![Turn {
                    role: "user".to_string(),
                    parts: vec![Part { text: Some(text.to_string()) }],
                }],
                turn_complete: true,
            }),
            ..Self::empty()
        }
    }

    /// A tool result, correlated to the originating call by id.
    pub fn tool_response(response: &ToolResponse) -> Self {
        let payload = match &response.result {
            Value::String(s) => json!({ "result": s }),
            other => json!({ "result": other.clone() }),
        };
        Self {
            tool_response: Some(ToolResponseEnvelope {
                function_responses: vec![FunctionResponse {
                    id: response.id.clone(),
                    name: response.name.clone(),
                    response: payload,
                }],
            }),
            ..Self::empty()
        }
    }

    /// Serialize for the wire.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(LiveError::from)
    }
}

fn declare_tools(tools: Option<&[ToolDefinition]>) -> Option<Vec<Value>> {
    tools.filter(|t| !t.is_empty()).map(|defs| {
        let function_declarations: Vec<Value> = defs
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description.clone().unwrap_or_default(),
                    "parameters": t.parameters.clone().unwrap_or_else(
                        || json!({ "type": "object", "properties": {} })),
                })
            })
            .collect();
        vec![json!({ "functionDeclarations": function_declarations })]
    })
}

/// Demultiplex one inbound envelope into ordered events.
///
/// Pure routing: audio and text parts come out in `modelTurn.parts` order,
/// a turn-complete flag is emitted after the parts it accompanies, and
/// every entry of `toolCall.functionCalls` becomes its own event.
/// Envelopes with no recognized shape are forwarded as [`ServerEvent::Unhandled`]
/// rather than dropped. A syntactically invalid envelope is an error; the
/// transport logs and skips it.
pub fn parse_server_events(raw: &str) -> Result<Vec<ServerEvent>> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| LiveError::protocol(format!("parse error: {}", e)))?;

    let mut events = Vec::new();

    if value.get("setupComplete").is_some() {
        events.push(ServerEvent::SetupComplete);
    }

    if let Some(content) = value.get("serverContent") {
        if let Some(parts) = content
            .get("modelTurn")
            .and_then(|t| t.get("parts"))
            .and_then(|p| p.as_array())
        {
            for part in parts {
                if let Some(data) = part
                    .get("inlineData")
                    .and_then(|d| d.get("data"))
                    .and_then(|d| d.as_str())
                {
                    let decoded = base64::engine::general_purpose::STANDARD
                        .decode(data)
                        .map_err(|e| {
                            LiveError::protocol(format!("bad audio payload: {}", e))
                        })?;
                    events.push(ServerEvent::AudioDelta { data: decoded });
                } else if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                    events.push(ServerEvent::TextDelta { text: text.to_string() });
                }
            }
        }
        if content.get("turnComplete").and_then(|t| t.as_bool()).unwrap_or(false) {
            events.push(ServerEvent::TurnComplete);
        }
    }

    if let Some(calls) = value
        .get("toolCall")
        .and_then(|t| t.get("functionCalls"))
        .and_then(|c| c.as_array())
    {
        for call in calls {
            events.push(ServerEvent::ToolCall(ToolCall {
                id: call.get("id").and_then(|i| i.as_str()).unwrap_or_default().to_string(),
                name: call.get("name").and_then(|n| n.as_str()).unwrap_or_default().to_string(),
                args: call.get("args").cloned().unwrap_or_else(|| json!({})),
            }));
        }
    }

    if events.is_empty() {
        events.push(ServerEvent::Unhandled { raw: value });
    }

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declare_tools_defaults() {
        let defs = vec![
            ToolDefinition::new("updateSpec")
                .with_description("Update the product spec")
                .with_parameters(json!({
                    "type": "object",
                    "properties": { "section": { "type": "string" } }
                })),
            ToolDefinition::new("no_params"),
        ];

        let declared = declare_tools(Some(&defs)).unwrap();
        let decls = declared[0]["functionDeclarations"].as_array().unwrap();
        assert_eq!(decls.len(), 2);
        assert_eq!(decls[0]["name"], "updateSpec");
        assert!(decls[0]["parameters"]["properties"]["section"].is_object());
        assert_eq!(decls[1]["description"], "");
        assert_eq!(decls[1]["parameters"]["type"], "object");
    }

    #[test]
    fn test_declare_tools_empty_is_none() {
        assert!(declare_tools(None).is_none());
        assert!(declare_tools(Some(&[])).is_none());
    }

    #[test]
    fn test_parts_demuxed_in_order_then_turn_complete() {
        let raw = json!({
            "serverContent": {
                "modelTurn": { "parts": [
                    { "inlineData": { "mimeType": "audio/pcm", "data": "AAAA" } },
                    { "text": "hello" },
                ]},
                "turnComplete": true
            }
        })
        .to_string();

        let events = parse_server_events(&raw).unwrap();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], ServerEvent::AudioDelta { .. }));
        assert_eq!(events[1], ServerEvent::TextDelta { text: "hello".to_string() });
        assert_eq!(events[2], ServerEvent::TurnComplete);
    }

    #[test]
    fn test_every_function_call_forwarded() {
        let raw = json!({
            "toolCall": { "functionCalls": [
                { "id": "a", "name": "updateSpec", "args": { "x": 1 } },
                { "id": "b", "name": "addQuestion" },
            ]}
        })
        .to_string();

        let events = parse_server_events(&raw).unwrap();
        assert_eq!(events.len(), 2);
        match &events[1] {
            ServerEvent::ToolCall(call) => {
                assert_eq!(call.id, "b");
                assert_eq!(call.args, json!({}));
            }
            other => panic!("expected ToolCall, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_shape_forwarded_not_dropped() {
        let events = parse_server_events(r#"{"usageMetadata":{"tokens":12}}"#).unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ServerEvent::Unhandled { .. }));
    }

    #[test]
    fn test_malformed_envelope_is_error() {
        assert!(parse_server_events("not json").is_err());
    }
}
