//! Session configuration.

use crate::audio::AudioFormat;
use crate::error::{LiveError, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

/// Live API WebSocket URL (public API-key backend).
pub const LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContent";

/// Default model for live sessions.
pub const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-exp";

/// Available prebuilt voices.
pub const VOICES: &[&str] = &["Puck", "Charon", "Kore", "Fenrir", "Aoede"];

/// Which endpoint to connect to.
#[derive(Clone)]
pub enum LiveBackend {
    /// Public Live API authenticated with an API key.
    Studio {
        /// The API key (kept out of Debug output and logs).
        api_key: SecretString,
    },
    /// A custom endpoint URL (self-hosted proxy, or a test server).
    Endpoint {
        /// Full `ws://`/`wss://` URL.
        url: String,
    },
}

impl LiveBackend {
    /// Create a Studio backend from an API key.
    pub fn studio(api_key: impl Into<String>) -> Self {
        Self::Studio { api_key: SecretString::from(api_key.into()) }
    }

    /// Create a backend pointing at a custom endpoint.
    pub fn endpoint(url: impl Into<String>) -> Self {
        Self::Endpoint { url: url.into() }
    }

    /// Build the connection URL for this backend.
    pub fn build_url(&self) -> Result<String> {
        match self {
            Self::Studio { api_key } => {
                if api_key.expose_secret().is_empty() {
                    return Err(LiveError::config("API key is empty"));
                }
                let mut url = Url::parse(LIVE_URL)
                    .map_err(|e| LiveError::config(format!("invalid live URL: {}", e)))?;
                url.query_pairs_mut().append_pair("key", api_key.expose_secret());
                Ok(url.to_string())
            }
            Self::Endpoint { url } => {
                let parsed = Url::parse(url)
                    .map_err(|e| LiveError::config(format!("invalid endpoint URL: {}", e)))?;
                match parsed.scheme() {
                    "ws" | "wss" => Ok(parsed.to_string()),
                    other => {
                        Err(LiveError::config(format!("unsupported URL scheme: {}", other)))
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for LiveBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Studio { .. } => f.debug_struct("Studio").finish_non_exhaustive(),
            Self::Endpoint { url } => f.debug_struct("Endpoint").field("url", url).finish(),
        }
    }
}

/// Declaration of a client-side tool the model may invoke.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// Tool description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the arguments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

impl ToolDefinition {
    /// Create a new tool definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), description: None, parameters: None }
    }

    /// Set the tool description.
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Set the parameters schema.
    pub fn with_parameters(mut self, schema: Value) -> Self {
        self.parameters = Some(schema);
        self
    }
}

/// Configuration for one live session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// System instruction for the assistant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,

    /// Voice for audio output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    /// Output modalities: ["AUDIO"], ["TEXT"], or both.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,

    /// Declared tools.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,

    /// Microphone capture format. Fixed for the session lifetime.
    pub capture_format: AudioFormat,

    /// Playback format. Fixed for the session lifetime.
    pub playback_format: AudioFormat,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            instruction: None,
            voice: None,
            modalities: None,
            tools: None,
            capture_format: AudioFormat::pcm16_16khz(),
            playback_format: AudioFormat::pcm16_24khz(),
        }
    }
}

impl SessionConfig {
    /// Create a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the system instruction.
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    /// Set the voice.
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    /// Set output modalities.
    pub fn with_modalities(mut self, modalities: Vec<String>) -> Self {
        self.modalities = Some(modalities);
        self
    }

    /// Audio-only output.
    pub fn with_audio_only(mut self) -> Self {
        self.modalities = Some(vec!["AUDIO".to_string()]);
        self
    }

    /// Add a tool declaration.
    pub fn with_tool(mut self, tool: ToolDefinition) -> Self {
        self.tools.get_or_insert_with(Vec::new).push(tool);
        self
    }

    /// Set all tool declarations.
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Set the capture format.
    pub fn with_capture_format(mut self, format: AudioFormat) -> Self {
        self.capture_format = format;
        self
    }

    /// Set the playback format.
    pub fn with_playback_format(mut self, format: AudioFormat) -> Self {
        self.playback_format = format;
        self
    }
}
