//! JSON frames exchanged with the Gemini Live `BidiGenerateContent` socket.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::audio::PcmChunk;

/// Frame sent by the client
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(SetupMessage),
    RealtimeInput(RealtimeInput),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupMessage {
    /// Fully qualified model name, e.g. `models/gemini-...`
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    /// Present (and empty) to request transcription of the user's speech
    pub input_audio_transcription: TranscriptionConfig,
    /// Present (and empty) to request transcription of the model's speech
    pub output_audio_transcription: TranscriptionConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

impl SpeechConfig {
    pub fn prebuilt(voice_name: impl Into<String>) -> Self {
        Self {
            voice_config: VoiceConfig {
                prebuilt_voice_config: PrebuiltVoiceConfig {
                    voice_name: voice_name.into(),
                },
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TranscriptionConfig {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![TextPart { text: text.into() }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextPart {
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

/// Base64 payload tagged with its mime type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    #[serde(default)]
    pub mime_type: String,
    pub data: String,
}

impl Blob {
    pub fn audio(chunk: &PcmChunk) -> Self {
        Self {
            mime_type: chunk.mime_type(),
            data: base64::engine::general_purpose::STANDARD.encode(&chunk.data),
        }
    }

    pub fn jpeg(image: &[u8]) -> Self {
        Self {
            mime_type: "image/jpeg".to_string(),
            data: base64::engine::general_purpose::STANDARD.encode(image),
        }
    }
}

impl ClientMessage {
    pub fn audio(chunk: &PcmChunk) -> Self {
        Self::RealtimeInput(RealtimeInput {
            media_chunks: vec![Blob::audio(chunk)],
        })
    }

    pub fn video_frame(jpeg: &[u8]) -> Self {
        Self::RealtimeInput(RealtimeInput {
            media_chunks: vec![Blob::jpeg(jpeg)],
        })
    }
}

/// Frame received from the server. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub setup_complete: Option<serde_json::Value>,
    pub server_content: Option<ServerContent>,
    pub go_away: Option<serde_json::Value>,
    pub error: Option<ServerError>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    pub input_transcription: Option<Transcription>,
    pub output_transcription: Option<Transcription>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
    pub model_turn: Option<ModelTurn>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Transcription {
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<ModelPart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelPart {
    pub text: Option<String>,
    pub inline_data: Option<Blob>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerError {
    pub code: Option<i64>,
    pub message: Option<String>,
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.code, &self.message) {
            (Some(code), Some(message)) => write!(f, "{} ({})", message, code),
            (None, Some(message)) => write!(f, "{}", message),
            (Some(code), None) => write!(f, "server error {}", code),
            (None, None) => write!(f, "unspecified server error"),
        }
    }
}

/// Everything one server frame asks the session to do, in dispatch order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboundEvent {
    pub input_fragment: Option<String>,
    pub output_fragment: Option<String>,
    pub interrupted: bool,
    pub turn_complete: bool,
    /// Base64 inline audio payloads
    pub audio: Vec<String>,
    /// Text parts that arrived where audio was expected
    pub text: Vec<String>,
}

impl InboundEvent {
    pub fn has_transcript(&self) -> bool {
        self.input_fragment.is_some() || self.output_fragment.is_some()
    }
}

impl ServerMessage {
    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    pub fn into_event(self) -> InboundEvent {
        let Some(content) = self.server_content else {
            return InboundEvent::default();
        };

        let fragment = |t: Option<Transcription>| t.and_then(|t| t.text).filter(|s| !s.is_empty());

        let mut event = InboundEvent {
            input_fragment: fragment(content.input_transcription),
            output_fragment: fragment(content.output_transcription),
            interrupted: content.interrupted,
            turn_complete: content.turn_complete,
            ..Default::default()
        };

        for part in content.model_turn.map(|t| t.parts).unwrap_or_default() {
            if let Some(blob) = part.inline_data {
                if blob.mime_type.starts_with("audio/") || blob.mime_type.is_empty() {
                    event.audio.push(blob.data);
                }
            }
            if let Some(text) = part.text.filter(|t| !t.is_empty()) {
                event.text.push(text);
            }
        }

        event
    }
}
