//! Single-utterance pronunciation through the non-streaming TTS model.

use anyhow::Context;
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

use crate::audio::wrap_in_wav;
use crate::error::SessionError;
use crate::live::messages::{ModelPart, SpeechConfig};

/// Turns text into raw 16-bit mono PCM
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, SessionError>;
}

#[derive(Debug, Clone)]
pub struct SpeechClientConfig {
    /// API root, e.g. `https://generativelanguage.googleapis.com/v1beta`
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub voice: String,
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ModelPart>,
}

/// `generateContent` client for the TTS model
pub struct SpeechClient {
    client: reqwest::Client,
    config: SpeechClientConfig,
}

impl SpeechClient {
    pub fn new(config: SpeechClientConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to build HTTP client for speech synthesis")?;

        Ok(Self { client, config })
    }

    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }
}

#[async_trait]
impl SpeechSynthesizer for SpeechClient {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, SessionError> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.config.endpoint.trim_end_matches('/'),
            self.config.model
        );

        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": text }] }],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": SpeechConfig::prebuilt(&self.config.voice),
            }
        });

        debug!("Requesting speech for {} chars", text.chars().count());

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SessionError::Transport(e.to_string()))?;

        let response: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| SessionError::Transport(format!("invalid TTS response: {}", e)))?;

        let data = response
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .find_map(|p| p.inline_data)
            .map(|blob| blob.data)
            .ok_or_else(|| SessionError::MissingResponse("audio data".to_string()))?;

        base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| SessionError::MissingResponse(format!("decodable audio ({})", e)))
    }
}

/// Synthesized utterances kept for the lifetime of the owner.
///
/// Unbounded; call [`clear`](Self::clear) to drop everything.
#[derive(Debug, Default)]
pub struct SpeechCache {
    entries: Mutex<HashMap<String, Arc<Vec<u8>>>>,
}

impl SpeechCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, text: &str) -> Option<Arc<Vec<u8>>> {
        self.entries.lock().ok()?.get(text).cloned()
    }

    pub fn insert(&self, text: &str, wav: Arc<Vec<u8>>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(text.to_string(), wav);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}

/// Produces playable WAV for a word or sentence, synthesizing each distinct
/// text only once.
pub struct Pronouncer {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    cache: SpeechCache,
    sample_rate: u32,
}

impl Pronouncer {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, sample_rate: u32) -> Self {
        Self {
            synthesizer,
            cache: SpeechCache::new(),
            sample_rate,
        }
    }

    pub async fn pronounce(&self, text: &str) -> Result<Arc<Vec<u8>>, SessionError> {
        let text = text.trim();
        if let Some(wav) = self.cache.get(text) {
            debug!("Pronunciation cache hit");
            return Ok(wav);
        }

        let pcm = self.synthesizer.synthesize(text).await?;
        let wav = wrap_in_wav(&pcm, self.sample_rate)
            .map_err(|e| SessionError::MissingResponse(format!("playable audio ({:#})", e)))?;
        let wav = Arc::new(wav);

        self.cache.insert(text, Arc::clone(&wav));
        info!("Synthesized pronunciation ({} bytes of PCM)", pcm.len());

        Ok(wav)
    }

    pub fn cache(&self) -> &SpeechCache {
        &self.cache
    }
}
