//! Wire types for the bidirectional streaming backend.
//!
//! Outbound messages are externally tagged JSON objects (`{"setup": {...}}`,
//! `{"realtimeInput": {...}}`, ...). Inbound messages are decoded once, here,
//! into a [`ServerMessage`] holding a flat list of tagged [`Part`]s so the rest
//! of the crate never probes optional JSON fields.

use crate::audio::types::AudioChunk;
use crate::defaults;
use crate::error::{EvaError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponse),
    ClientContent(ClientContent),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TextPart {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub function_declarations: Vec<FunctionDeclaration>,
}

/// One callable function advertised to the model.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    /// JSON-schema object describing the arguments.
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FunctionResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub response: Value,
}

impl FunctionResponse {
    /// Acknowledgement carrying a short text in `response.content`.
    pub fn ack(call: &FunctionCall, content: impl Into<String>) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            response: serde_json::json!({ "content": content.into() }),
        }
    }

    /// The acknowledgement text, if this response carries one.
    pub fn content(&self) -> Option<&str> {
        self.response.get("content").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

/// Everything the backend needs to open a session.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveSetup {
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
    pub functions: Vec<FunctionDeclaration>,
}

impl LiveSetup {
    pub fn to_message(&self) -> ClientMessage {
        let model = if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        };

        let tools = if self.functions.is_empty() {
            Vec::new()
        } else {
            vec![Tool {
                function_declarations: self.functions.clone(),
            }]
        };

        ClientMessage::Setup(Setup {
            model,
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: self.voice.clone(),
                        },
                    },
                },
            },
            system_instruction: Content {
                role: None,
                parts: vec![TextPart {
                    text: self.system_instruction.clone(),
                }],
            },
            tools,
        })
    }
}

impl ClientMessage {
    /// One microphone chunk as realtime input.
    pub fn audio(chunk: &AudioChunk) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![Blob {
                mime_type: defaults::INPUT_MIME_TYPE.to_string(),
                data: chunk.to_base64(),
            }],
        })
    }

    pub fn function_response(response: FunctionResponse) -> Self {
        ClientMessage::ToolResponse(ToolResponse {
            function_responses: vec![response],
        })
    }

    /// A complete user text turn.
    pub fn text_turn(text: impl Into<String>) -> Self {
        ClientMessage::ClientContent(ClientContent {
            turns: vec![Content {
                role: Some("user".to_string()),
                parts: vec![TextPart { text: text.into() }],
            }],
            turn_complete: true,
        })
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| EvaError::Protocol {
            message: format!("failed to encode message: {}", e),
        })
    }
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// A function call requested by the model.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct FunctionCall {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

/// One decoded part of an inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    /// Base64 16-bit mono PCM at `sample_rate`.
    Audio { data: String, sample_rate: u32 },
    Text(String),
    FunctionCall(FunctionCall),
    /// Anything else (executable code, non-audio blobs, ...).
    Other,
}

/// An inbound message, decoded once at the protocol boundary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerMessage {
    pub setup_complete: bool,
    pub parts: Vec<Part>,
    pub turn_complete: bool,
    /// The user started speaking over the model's reply.
    pub interrupted: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServerMessage {
    #[serde(default)]
    setup_complete: Option<Value>,
    #[serde(default)]
    server_content: Option<RawServerContent>,
    #[serde(default)]
    tool_call: Option<RawToolCall>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServerContent {
    #[serde(default)]
    model_turn: Option<RawContent>,
    #[serde(default)]
    turn_complete: bool,
    #[serde(default)]
    interrupted: bool,
}

#[derive(Debug, Default, Deserialize)]
struct RawContent {
    #[serde(default)]
    parts: Vec<RawPart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    inline_data: Option<Blob>,
    #[serde(default)]
    function_call: Option<FunctionCall>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawToolCall {
    #[serde(default)]
    function_calls: Vec<FunctionCall>,
}

impl From<RawPart> for Part {
    fn from(raw: RawPart) -> Self {
        if let Some(call) = raw.function_call {
            return Part::FunctionCall(call);
        }
        if let Some(blob) = raw.inline_data {
            if blob.mime_type.starts_with("audio/") {
                return Part::Audio {
                    sample_rate: mime_sample_rate(&blob.mime_type)
                        .unwrap_or(defaults::OUTPUT_SAMPLE_RATE),
                    data: blob.data,
                };
            }
            return Part::Other;
        }
        match raw.text {
            Some(text) => Part::Text(text),
            None => Part::Other,
        }
    }
}

/// Extracts `rate=N` from a mime type such as `audio/pcm;rate=24000`.
fn mime_sample_rate(mime: &str) -> Option<u32> {
    mime.split(';')
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|rate| rate.trim().parse().ok())
        .filter(|rate| *rate > 0)
}

impl ServerMessage {
    /// Decode one inbound frame (text or binary JSON).
    ///
    /// # Errors
    /// Returns `EvaError::Protocol` if the payload is not a JSON object of the expected shape.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let raw: RawServerMessage =
            serde_json::from_slice(payload).map_err(|e| EvaError::Protocol {
                message: format!("malformed server message: {}", e),
            })?;

        let mut message = ServerMessage {
            setup_complete: raw.setup_complete.is_some(),
            ..Default::default()
        };

        if let Some(content) = raw.server_content {
            message.turn_complete = content.turn_complete;
            message.interrupted = content.interrupted;
            if let Some(turn) = content.model_turn {
                message.parts.extend(turn.parts.into_iter().map(Part::from));
            }
        }

        if let Some(tool_call) = raw.tool_call {
            message
                .parts
                .extend(tool_call.function_calls.into_iter().map(Part::FunctionCall));
        }

        Ok(message)
    }

    pub fn has_audio(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, Part::Audio { .. }))
    }

    pub fn function_calls(&self) -> impl Iterator<Item = &FunctionCall> {
        self.parts.iter().filter_map(|p| match p {
            Part::FunctionCall(call) => Some(call),
            _ => None,
        })
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|p| match p {
            Part::Text(text) => Some(text.as_str()),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn setup() -> LiveSetup {
        LiveSetup {
            model: "gemini-test".to_string(),
            voice: "Aoede".to_string(),
            system_instruction: "be kind".to_string(),
            functions: vec![FunctionDeclaration {
                name: "registerClient".to_string(),
                description: "register".to_string(),
                parameters: json!({"type": "OBJECT"}),
            }],
        }
    }

    #[test]
    fn setup_message_shape() {
        let value: Value = serde_json::from_str(&setup().to_message().to_json().unwrap()).unwrap();
        let s = &value["setup"];
        assert_eq!(s["model"], "models/gemini-test");
        assert_eq!(s["generationConfig"]["responseModalities"], json!(["AUDIO"]));
        assert_eq!(
            s["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Aoede"
        );
        assert_eq!(s["systemInstruction"]["parts"][0]["text"], "be kind");
        assert!(s["systemInstruction"].get("role").is_none());
        assert_eq!(
            s["tools"][0]["functionDeclarations"][0]["name"],
            "registerClient"
        );
    }

    #[test]
    fn setup_keeps_prefixed_model_and_omits_empty_tools() {
        let mut setup = setup();
        setup.model = "models/already".to_string();
        setup.functions.clear();
        let value: Value = serde_json::from_str(&setup.to_message().to_json().unwrap()).unwrap();
        assert_eq!(value["setup"]["model"], "models/already");
        assert!(value["setup"].get("tools").is_none());
    }

    #[test]
    fn audio_message_shape() {
        let chunk = AudioChunk::new(vec![1, -1], 0);
        let value: Value =
            serde_json::from_str(&ClientMessage::audio(&chunk).to_json().unwrap()).unwrap();
        let blob = &value["realtimeInput"]["mediaChunks"][0];
        assert_eq!(blob["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(blob["data"], "AQD//w==");
    }

    #[test]
    fn function_response_shape() {
        let call = FunctionCall {
            id: Some("call-1".to_string()),
            name: "registerClient".to_string(),
            args: json!({}),
        };
        let response = FunctionResponse::ack(&call, "OK");
        assert_eq!(response.content(), Some("OK"));

        let value: Value = serde_json::from_str(
            &ClientMessage::function_response(response).to_json().unwrap(),
        )
        .unwrap();
        let fr = &value["toolResponse"]["functionResponses"][0];
        assert_eq!(fr["id"], "call-1");
        assert_eq!(fr["name"], "registerClient");
        assert_eq!(fr["response"]["content"], "OK");
    }

    #[test]
    fn text_turn_shape() {
        let value: Value =
            serde_json::from_str(&ClientMessage::text_turn("hello").to_json().unwrap()).unwrap();
        assert_eq!(value["clientContent"]["turns"][0]["role"], "user");
        assert_eq!(value["clientContent"]["turns"][0]["parts"][0]["text"], "hello");
        assert_eq!(value["clientContent"]["turnComplete"], true);
    }

    #[test]
    fn parse_setup_complete() {
        let msg = ServerMessage::parse(br#"{"setupComplete":{}}"#).unwrap();
        assert!(msg.setup_complete);
        assert!(msg.parts.is_empty());
    }

    #[test]
    fn parse_model_turn_into_tagged_parts() {
        let payload = json!({
            "serverContent": {
                "modelTurn": {"parts": [
                    {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAAA"}},
                    {"text": "olá"},
                    {"functionCall": {"name": "registerClient", "args": {"name": "Ana"}}},
                    {"inlineData": {"mimeType": "image/png", "data": "xx"}},
                    {"executableCode": {"code": "1"}}
                ]},
                "turnComplete": true
            }
        });
        let msg = ServerMessage::parse(payload.to_string().as_bytes()).unwrap();

        assert_eq!(msg.parts.len(), 5);
        assert_eq!(
            msg.parts[0],
            Part::Audio {
                data: "AAAA".to_string(),
                sample_rate: 24000
            }
        );
        assert_eq!(msg.parts[1], Part::Text("olá".to_string()));
        assert!(matches!(&msg.parts[2], Part::FunctionCall(c) if c.name == "registerClient"));
        assert_eq!(msg.parts[3], Part::Other);
        assert_eq!(msg.parts[4], Part::Other);
        assert!(msg.turn_complete);
        assert!(!msg.interrupted);
        assert!(msg.has_audio());
        assert_eq!(msg.texts().collect::<Vec<_>>(), vec!["olá"]);
    }

    #[test]
    fn parse_tool_call_folds_into_parts() {
        let payload = json!({
            "toolCall": {"functionCalls": [
                {"id": "a", "name": "alertFamily", "args": {"description": "fell"}}
            ]}
        });
        let msg = ServerMessage::parse(payload.to_string().as_bytes()).unwrap();
        let calls: Vec<_> = msg.function_calls().collect();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id.as_deref(), Some("a"));
        assert_eq!(calls[0].args["description"], "fell");
    }

    #[test]
    fn parse_interrupted() {
        let msg = ServerMessage::parse(br#"{"serverContent":{"interrupted":true}}"#).unwrap();
        assert!(msg.interrupted);
        assert!(!msg.has_audio());
    }

    #[test]
    fn parse_unknown_fields_is_empty_message() {
        let msg = ServerMessage::parse(br#"{"usageMetadata":{"totalTokenCount":3}}"#).unwrap();
        assert_eq!(msg, ServerMessage::default());
    }

    #[test]
    fn parse_rejects_non_json() {
        assert!(matches!(
            ServerMessage::parse(b"not json"),
            Err(EvaError::Protocol { .. })
        ));
    }

    #[test]
    fn mime_rate_extraction() {
        assert_eq!(mime_sample_rate("audio/pcm;rate=24000"), Some(24000));
        assert_eq!(mime_sample_rate("audio/pcm; rate=16000"), Some(16000));
        assert_eq!(mime_sample_rate("audio/pcm"), None);
        assert_eq!(mime_sample_rate("audio/pcm;rate=0"), None);
    }

    #[test]
    fn zero_rate_audio_falls_back_to_output_rate() {
        let payload = json!({
            "serverContent": {"modelTurn": {"parts": [
                {"inlineData": {"mimeType": "audio/pcm;rate=0", "data": "AAAA"}}
            ]}}
        });
        let message = ServerMessage::parse(payload.to_string().as_bytes()).unwrap();
        assert_eq!(
            message.parts,
            vec![Part::Audio {
                data: "AAAA".to_string(),
                sample_rate: defaults::OUTPUT_SAMPLE_RATE,
            }]
        );
    }
}
