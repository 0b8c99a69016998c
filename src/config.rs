//! # Configuration Management
//!
//! This module handles loading and managing the client configuration from
//! multiple sources:
//! - TOML configuration file (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: Converts between these structs and TOML/JSON/env values
//! - **derive macros**: `Debug`, `Clone`, `Serialize`, `Deserialize` are generated
//! - **impl blocks**: Small helpers (`websocket_url`, `reconnect_delay`) live next
//!   to the data they read
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST`, `PORT` and `BACKEND_URL` environment variables
//! 2. Environment variables (APP_SERVER__PORT, APP_BACKEND__URL, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! Nested keys are separated by a double underscore so that field names that
//! contain an underscore survive: `APP_BACKEND__RECONNECTION_ATTEMPTS=3`.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::audio::capture::CaptureConstraints;
use crate::error::{VoiceError, VoiceResult};

/// Main client configuration.
///
/// ## Sections:
/// - `server`: the local control API
/// - `backend`: where the realtime voice backend lives and how to reconnect to it
/// - `audio`: capture/playback format and which devices to use
/// - `session`: language defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    pub audio: AudioConfig,
    pub session: SessionConfig,
}

/// Control API bind address.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (default)
/// - `host = "0.0.0.0"`: Accept connections from any IP address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Realtime backend connection settings.
///
/// ## Fields:
/// - `url`: base URL of the backend (`http(s)://` or `ws(s)://`)
/// - `namespace`: Socket.IO namespace the voice events live in
/// - `reconnection_attempts`: how many times a dropped channel is retried
/// - `reconnection_delay_ms` / `reconnection_delay_max_ms`: exponential backoff
///   bounds between attempts
/// - `connect_timeout_ms`: how long call setup waits for the channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub url: String,
    pub namespace: String,
    pub reconnection_attempts: u32,
    pub reconnection_delay_ms: u64,
    pub reconnection_delay_max_ms: u64,
    pub connect_timeout_ms: u64,
}

/// Audio format and device selection.
///
/// ## Device strings:
/// - `input`: `wav:<path>` (stream a file as the microphone), `silence`, or
///   `cpal` (system microphone, needs the `cpal` feature)
/// - `output`: `wav:<path>` (record agent speech to a file), `null`, or `cpal`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub block_size: usize,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    pub capture_timeout_ms: u64,
    pub input: String,
    pub output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub default_language: String,
    pub supported_languages: Vec<String>,
    /// Start a call as soon as the client is up (headless use).
    pub auto_start: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        let (input, output) = if cfg!(feature = "cpal") {
            ("cpal", "cpal")
        } else {
            ("silence", "null")
        };

        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            backend: BackendConfig {
                url: "http://localhost:3001".to_string(),
                namespace: "/voice".to_string(),
                reconnection_attempts: 5,
                reconnection_delay_ms: 1000,
                reconnection_delay_max_ms: 5000,
                connect_timeout_ms: 10_000,
            },
            audio: AudioConfig {
                sample_rate: 24_000,
                channels: 1,
                block_size: 4096, // ~170ms at 24kHz
                echo_cancellation: true,
                noise_suppression: true,
                auto_gain_control: true,
                capture_timeout_ms: 10_000,
                input: input.to_string(),
                output: output.to_string(),
            },
            session: SessionConfig {
                default_language: "en".to_string(),
                supported_languages: ["en", "tr", "de", "ar", "fr", "ru"]
                    .iter()
                    .map(|lang| lang.to_string())
                    .collect(),
                auto_start: false,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override control API port
    /// - `APP_AUDIO__INPUT=wav:./hello.wav`: Use a WAV file as the microphone
    /// - `APP_SESSION__DEFAULT_LANGUAGE=de`: Start calls in German
    /// - `HOST=0.0.0.0` / `PORT=3000`: Special cases for deployment platforms
    /// - `BACKEND_URL=https://voice.example.com`: Backend base URL
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(url) = env::var("BACKEND_URL") {
            settings = settings.set_override("backend.url", url)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Control API port is not 0
    /// - The backend URL can be turned into a WebSocket endpoint
    /// - Reconnection is attempted at least once, with a sane backoff window
    /// - Audio rates, channel counts and block sizes are non-zero
    /// - The default language is one of the supported languages
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        self.backend.websocket_url()?;

        if !self.backend.namespace.starts_with('/') {
            return Err(anyhow::anyhow!(
                "Backend namespace must start with '/', got '{}'",
                self.backend.namespace
            ));
        }

        if self.backend.reconnection_attempts == 0 {
            return Err(anyhow::anyhow!("Reconnection attempts must be greater than 0"));
        }

        if self.backend.reconnection_delay_max_ms < self.backend.reconnection_delay_ms {
            return Err(anyhow::anyhow!(
                "Maximum reconnection delay must not be below the base delay"
            ));
        }

        if self.backend.connect_timeout_ms == 0 || self.audio.capture_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Timeouts must be greater than 0"));
        }

        if self.audio.sample_rate == 0 {
            return Err(anyhow::anyhow!("Audio sample rate must be greater than 0"));
        }

        if self.audio.channels == 0 {
            return Err(anyhow::anyhow!("Audio channel count must be greater than 0"));
        }

        if self.audio.block_size == 0 {
            return Err(anyhow::anyhow!("Audio block size must be greater than 0"));
        }

        if self.session.supported_languages.is_empty() {
            return Err(anyhow::anyhow!("At least one supported language is required"));
        }

        if !self.session.is_supported(&self.session.default_language) {
            return Err(anyhow::anyhow!(
                "Default language '{}' is not in the supported list",
                self.session.default_language
            ));
        }

        Ok(())
    }

    /// Apply a partial JSON update (used by `PUT /api/v1/config`).
    ///
    /// Only the fields present are touched, so `{"backend": {"url": "..."}}`
    /// changes just the backend URL. The result is validated before returning;
    /// on failure the caller should keep its previous copy.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = u16::try_from(port)?;
            }
        }

        if let Some(backend) = partial_config.get("backend") {
            if let Some(url) = backend.get("url").and_then(|v| v.as_str()) {
                self.backend.url = url.to_string();
            }
            if let Some(attempts) = backend.get("reconnection_attempts").and_then(|v| v.as_u64()) {
                self.backend.reconnection_attempts = u32::try_from(attempts)?;
            }
        }

        if let Some(audio) = partial_config.get("audio") {
            if let Some(input) = audio.get("input").and_then(|v| v.as_str()) {
                self.audio.input = input.to_string();
            }
            if let Some(output) = audio.get("output").and_then(|v| v.as_str()) {
                self.audio.output = output.to_string();
            }
        }

        if let Some(session) = partial_config.get("session") {
            if let Some(language) = session.get("default_language").and_then(|v| v.as_str()) {
                self.session.default_language = language.to_string();
            }
        }

        self.validate()?;
        Ok(())
    }
}

impl BackendConfig {
    /// The Engine.IO WebSocket endpoint for this backend.
    ///
    /// `http://host:3001` becomes `ws://host:3001/socket.io/?EIO=4&transport=websocket`.
    pub fn websocket_url(&self) -> VoiceResult<String> {
        let url = self.url.trim().trim_end_matches('/');
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| VoiceError::Transport(format!("backend URL has no scheme: '{}'", self.url)))?;

        let ws_scheme = match scheme {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(VoiceError::Transport(format!(
                    "unsupported backend URL scheme '{}'",
                    other
                )))
            }
        };

        if rest.is_empty() {
            return Err(VoiceError::Transport(format!("backend URL has no host: '{}'", self.url)));
        }

        Ok(format!("{}://{}/socket.io/?EIO=4&transport=websocket", ws_scheme, rest))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Backoff before reconnection `attempt` (1-based): the base delay doubled
    /// per attempt, capped at the maximum.
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.reconnection_delay_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.reconnection_delay_max_ms))
    }
}

impl AudioConfig {
    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }

    pub fn constraints(&self) -> CaptureConstraints {
        CaptureConstraints {
            sample_rate: self.sample_rate,
            channels: self.channels,
            echo_cancellation: self.echo_cancellation,
            noise_suppression: self.noise_suppression,
            auto_gain_control: self.auto_gain_control,
        }
    }
}

impl SessionConfig {
    pub fn is_supported(&self, language: &str) -> bool {
        self.supported_languages.iter().any(|lang| lang == language)
    }
}
