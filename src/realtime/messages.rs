use base64::Engine;
use serde::{Deserialize, Serialize};

/// Immutable description of the remote session, sent once after connecting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub modalities: Vec<String>,
    pub voice: String,
    pub instructions: String,
    pub input_audio_format: String,
    pub output_audio_format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<TranscriptionConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_noise_reduction: Option<NoiseReduction>,
    pub turn_detection: TurnDetection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoiseReduction {
    #[serde(rename = "type")]
    pub kind: NoiseReductionMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseReductionMode {
    NearField,
    FarField,
}

impl NoiseReductionMode {
    /// Parse the configured mode. Empty or "off"/"none" disables it.
    pub fn parse(value: &str) -> Result<Option<Self>, String> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "off" | "none" => Ok(None),
            "near_field" => Ok(Some(Self::NearField)),
            "far_field" => Ok(Some(Self::FarField)),
            other => Err(format!("unknown noise reduction mode '{}'", other)),
        }
    }
}

/// Silence-based server VAD parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: String,
    /// Activation threshold, 0.0 to 1.0
    pub threshold: f32,
    /// Audio kept before detected speech
    pub prefix_padding_ms: u32,
    /// Silence that ends the user's turn
    pub silence_duration_ms: u32,
    pub create_response: bool,
    pub interrupt_response: bool,
}

impl TurnDetection {
    pub fn server_vad(threshold: f32, prefix_padding_ms: u32, silence_duration_ms: u32) -> Self {
        Self {
            kind: "server_vad".to_string(),
            threshold,
            prefix_padding_ms,
            silence_duration_ms,
            create_response: true,
            // Half-duplex: the remote is never interrupted by our own capture
            interrupt_response: false,
        }
    }
}

/// Outbound messages the session writes to the link
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },

    #[serde(rename = "input_audio_buffer.append")]
    AudioAppend {
        /// Base64-encoded PCM frame
        audio: String,
    },
}

impl ClientMessage {
    pub fn session_update(session: SessionConfig) -> Self {
        ClientMessage::SessionUpdate { session }
    }

    pub fn audio_append(pcm: &[u8]) -> Self {
        ClientMessage::AudioAppend {
            audio: base64::engine::general_purpose::STANDARD.encode(pcm),
        }
    }

    /// Short label for logging
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::SessionUpdate { .. } => "session.update",
            ClientMessage::AudioAppend { .. } => "input_audio_buffer.append",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> SessionConfig {
        SessionConfig {
            modalities: vec!["audio".to_string(), "text".to_string()],
            voice: "marin".to_string(),
            instructions: "Be brief.".to_string(),
            input_audio_format: "pcm16".to_string(),
            output_audio_format: "pcm16".to_string(),
            input_audio_transcription: None,
            input_audio_noise_reduction: Some(NoiseReduction {
                kind: NoiseReductionMode::NearField,
            }),
            turn_detection: TurnDetection::server_vad(0.5, 300, 800),
        }
    }

    #[test]
    fn test_session_update_shape() {
        let json = serde_json::to_value(ClientMessage::session_update(sample_config())).unwrap();

        assert_eq!(json["type"], "session.update");
        assert_eq!(json["session"]["voice"], "marin");
        assert_eq!(json["session"]["turn_detection"]["type"], "server_vad");
        assert_eq!(json["session"]["turn_detection"]["silence_duration_ms"], 800);
        assert_eq!(json["session"]["turn_detection"]["interrupt_response"], false);
        assert_eq!(json["session"]["input_audio_noise_reduction"]["type"], "near_field");
        assert!(json["session"].get("input_audio_transcription").is_none());
    }

    #[test]
    fn test_audio_append_is_base64() {
        let json = serde_json::to_value(ClientMessage::audio_append(&[0u8, 1, 2])).unwrap();
        assert_eq!(json["type"], "input_audio_buffer.append");
        assert_eq!(json["audio"], "AAEC");
    }

    #[test]
    fn test_noise_reduction_parse() {
        assert_eq!(NoiseReductionMode::parse(""), Ok(None));
        assert_eq!(NoiseReductionMode::parse("off"), Ok(None));
        assert_eq!(NoiseReductionMode::parse("Far_Field"), Ok(Some(NoiseReductionMode::FarField)));
        assert!(NoiseReductionMode::parse("studio").is_err());
    }
}
