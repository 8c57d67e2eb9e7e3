use serde::{Deserialize, Serialize};

use super::messages::{
    Content, GenerationConfig, SetupMessage, SpeechConfig, TranscriptionConfig,
};

/// Configuration for one live tutoring session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveSessionConfig {
    /// Unique session identifier (e.g., "live-6f1c...")
    pub session_id: String,

    /// Language the learner already speaks
    pub native_language: String,

    /// Language being practised
    pub target_language: String,

    /// Optional goal the tutor should steer toward
    pub focus_topic: Option<String>,

    /// Model name without the `models/` prefix
    pub model: String,

    /// Prebuilt voice used for the tutor's replies
    pub voice: String,

    /// Rate the microphone is asked for (the endpoint expects 16kHz)
    pub input_sample_rate: u32,

    /// Rate of inline audio sent back by the endpoint
    pub output_sample_rate: u32,

    /// Samples per captured block
    pub block_size: usize,
}

impl Default for LiveSessionConfig {
    fn default() -> Self {
        Self {
            session_id: format!("live-{}", uuid::Uuid::new_v4()),
            native_language: "English".to_string(),
            target_language: "Spanish".to_string(),
            focus_topic: None,
            model: "gemini-2.5-flash-native-audio-preview-09-2025".to_string(),
            voice: "Zephyr".to_string(),
            input_sample_rate: 16000,
            output_sample_rate: 24000,
            block_size: 4096,
        }
    }
}

impl LiveSessionConfig {
    pub fn new(native_language: impl Into<String>, target_language: impl Into<String>) -> Self {
        Self {
            native_language: native_language.into(),
            target_language: target_language.into(),
            ..Default::default()
        }
    }

    pub fn with_focus_topic(mut self, topic: Option<String>) -> Self {
        self.focus_topic = topic
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        self
    }

    /// Tutor persona for the configured language pair
    pub fn system_instruction(&self) -> String {
        let mut prompt = format!(
            "You are a friendly language tutor. The user speaks {native} and is learning {target}. \
             You can see what the user is showing you via their camera. \
             Help them name objects, practice pronunciation, or have a casual conversation in {target}. \
             Keep responses concise and encouraging.",
            native = self.native_language,
            target = self.target_language,
        );

        if let Some(topic) = &self.focus_topic {
            prompt.push_str(&format!(
                " The user wants to focus on: \"{}\". Steer the conversation toward it.",
                topic
            ));
        }

        prompt
    }

    pub fn setup_message(&self) -> SetupMessage {
        let model = if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        };

        SetupMessage {
            model,
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig::prebuilt(&self.voice),
            },
            system_instruction: Content::text(self.system_instruction()),
            input_audio_transcription: TranscriptionConfig::default(),
            output_audio_transcription: TranscriptionConfig::default(),
        }
    }
}
