use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::live::{ConnectorConfig, LiveSessionConfig};
use crate::speech::SpeechClientConfig;
use crate::video::VideoSamplerConfig;

/// Default config file, relative to the working directory, without extension
pub const DEFAULT_CONFIG_PATH: &str = "config/lingopop";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub live: LiveConfig,
    pub video: VideoConfig,
    pub speech: SpeechConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LiveConfig {
    /// `wss://` URL of the BidiGenerateContent endpoint
    pub endpoint: String,
    pub model: String,
    pub voice: String,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub block_size: usize,
    pub connect_timeout_secs: u64,
    pub outbound_queue: usize,
    /// Environment variable holding the API key
    pub api_key_env: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VideoConfig {
    pub interval_ms: u64,
    pub max_width: u32,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpeechConfig {
    pub endpoint: String,
    pub model: String,
    pub voice: String,
    pub sample_rate: u32,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Notebook JSON file; `~` is expanded
    pub notebook_path: String,
}

impl Config {
    /// Layered load: built-in defaults, then the file at `path` (any
    /// extension the `config` crate knows), then `LINGOPOP__SECTION__KEY`
    /// environment variables.
    ///
    /// The file is optional unless `required` is set.
    pub fn load(path: &str, required: bool) -> Result<Self> {
        let settings = config::Config::builder()
            .set_default("service.name", "lingopop")?
            .set_default("service.http.bind", "127.0.0.1")?
            .set_default("service.http.port", 8787)?
            .set_default(
                "live.endpoint",
                "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent",
            )?
            .set_default("live.model", "gemini-2.5-flash-native-audio-preview-09-2025")?
            .set_default("live.voice", "Zephyr")?
            .set_default("live.input_sample_rate", 16000)?
            .set_default("live.output_sample_rate", 24000)?
            .set_default("live.block_size", 4096)?
            .set_default("live.connect_timeout_secs", 15)?
            .set_default("live.outbound_queue", 64)?
            .set_default("live.api_key_env", "GEMINI_API_KEY")?
            .set_default("video.interval_ms", 1000)?
            .set_default("video.max_width", 640)?
            .set_default("video.jpeg_quality", 60)?
            .set_default("speech.endpoint", "https://generativelanguage.googleapis.com/v1beta")?
            .set_default("speech.model", "gemini-2.5-flash-preview-tts")?
            .set_default("speech.voice", "Puck")?
            .set_default("speech.sample_rate", 24000)?
            .set_default("speech.timeout_secs", 30)?
            .set_default("storage.notebook_path", "~/.lingopop/notebook.json")?
            .add_source(config::File::with_name(path).required(required))
            .add_source(
                config::Environment::with_prefix("LINGOPOP")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .with_context(|| format!("Failed to load configuration from {}", path))?;

        Ok(settings.try_deserialize()?)
    }

    /// Read the API key from the configured environment variable
    pub fn api_key(&self) -> Result<String> {
        let name = &self.live.api_key_env;
        std::env::var(name)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .with_context(|| format!("Environment variable {} is not set", name))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.service.http.bind, self.service.http.port)
    }

    pub fn notebook_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.storage.notebook_path).into_owned())
    }

    pub fn connector_config(&self, api_key: String) -> ConnectorConfig {
        ConnectorConfig {
            endpoint: self.live.endpoint.clone(),
            api_key,
            connect_timeout: Duration::from_secs(self.live.connect_timeout_secs),
            outbound_capacity: self.live.outbound_queue,
        }
    }

    pub fn speech_client_config(&self, api_key: String) -> SpeechClientConfig {
        SpeechClientConfig {
            endpoint: self.speech.endpoint.clone(),
            api_key,
            model: self.speech.model.clone(),
            voice: self.speech.voice.clone(),
            timeout: Duration::from_secs(self.speech.timeout_secs),
        }
    }

    pub fn video_sampler_config(&self) -> VideoSamplerConfig {
        VideoSamplerConfig {
            interval: Duration::from_millis(self.video.interval_ms),
            max_width: self.video.max_width,
            jpeg_quality: self.video.jpeg_quality,
        }
    }
}

impl LiveConfig {
    /// Session settings for one language pair
    pub fn session_config(
        &self,
        native_language: &str,
        target_language: &str,
        focus_topic: Option<String>,
    ) -> LiveSessionConfig {
        LiveSessionConfig {
            model: self.model.clone(),
            voice: self.voice.clone(),
            input_sample_rate: self.input_sample_rate,
            output_sample_rate: self.output_sample_rate,
            block_size: self.block_size,
            ..LiveSessionConfig::new(native_language, target_language)
        }
        .with_focus_topic(focus_topic)
    }
}
