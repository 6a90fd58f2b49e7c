//! Inbound event interpretation
//!
//! Only the tags that drive turn-taking and metrics are decoded. Everything
//! else becomes `ServerEvent::Other` and is ignored by the session.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, VoiceError};

/// Audio deltas are decoded leniently: non-zero trailing bits and missing
/// padding are accepted.
const AUDIO_DELTA_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Token counters attached to a completed turn
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Event received from the remote session
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// `session.created` / `session.updated`
    SessionInfo { kind: String },
    /// The remote began producing a response
    TurnStarted,
    /// Decoded PCM to play
    AudioChunk(Vec<u8>),
    /// What the user said
    InputTranscript(String),
    /// What the remote said
    OutputTranscript(String),
    TurnComplete { usage: Usage },
    Error { message: String },
    Other { kind: String },
}

impl ServerEvent {
    /// Event tag for logging
    pub fn kind(&self) -> &str {
        match self {
            ServerEvent::SessionInfo { kind } | ServerEvent::Other { kind } => kind,
            ServerEvent::TurnStarted => "turn-started",
            ServerEvent::AudioChunk(_) => "audio-chunk",
            ServerEvent::InputTranscript(_) => "input-transcript",
            ServerEvent::OutputTranscript(_) => "output-transcript",
            ServerEvent::TurnComplete { .. } => "turn-complete",
            ServerEvent::Error { .. } => "error",
        }
    }
}

/// Parse one JSON text frame.
///
/// Fails with `LinkError` on invalid JSON, a missing `type`, or an audio
/// delta that cannot be decoded.
pub fn parse_server_event(text: &str) -> Result<ServerEvent> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| VoiceError::LinkError(format!("unparseable event: {}", e)))?;

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| VoiceError::LinkError("event without a type tag".to_string()))?;

    let event = match kind {
        "session.created" | "session.updated" => ServerEvent::SessionInfo {
            kind: kind.to_string(),
        },
        "response.created" => ServerEvent::TurnStarted,
        "response.audio.delta" | "response.output_audio.delta" => {
            let delta = value
                .get("delta")
                .and_then(Value::as_str)
                .ok_or_else(|| VoiceError::LinkError("audio delta without payload".to_string()))?;
            let pcm = AUDIO_DELTA_ENGINE
                .decode(delta)
                .map_err(|e| VoiceError::LinkError(format!("bad audio delta: {}", e)))?;
            ServerEvent::AudioChunk(pcm)
        }
        "conversation.item.input_audio_transcription.completed" => {
            ServerEvent::InputTranscript(transcript_of(&value))
        }
        "response.audio_transcript.done" | "response.output_audio_transcript.done" => {
            ServerEvent::OutputTranscript(transcript_of(&value))
        }
        "response.done" => ServerEvent::TurnComplete {
            usage: extract_usage(&value),
        },
        "error" => ServerEvent::Error {
            message: value
                .pointer("/error/message")
                .or_else(|| value.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("unknown remote error")
                .to_string(),
        },
        other => ServerEvent::Other {
            kind: other.to_string(),
        },
    };

    Ok(event)
}

fn transcript_of(value: &Value) -> String {
    value
        .get("transcript")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string()
}

/// Locate usage counters on a turn-complete event.
///
/// The remote has placed them at different depths over time, so the first
/// object found at `usage`, `item.usage`, `response.usage` wins. Absent
/// everywhere means zeroed counters.
pub fn extract_usage(event: &Value) -> Usage {
    let found = ["/usage", "/item/usage", "/response/usage"]
        .iter()
        .filter_map(|path| event.pointer(path))
        .find(|v| v.is_object());

    let Some(usage) = found else {
        return Usage::default();
    };

    let counter = |names: &[&str]| -> Option<u64> {
        names.iter().find_map(|name| usage.get(*name).and_then(Value::as_u64))
    };

    let prompt_tokens = counter(&["prompt_tokens", "input_tokens"]).unwrap_or(0);
    let completion_tokens = counter(&["completion_tokens", "output_tokens"]).unwrap_or(0);
    let total_tokens = counter(&["total_tokens"]).unwrap_or(prompt_tokens.saturating_add(completion_tokens));

    Usage {
        prompt_tokens,
        completion_tokens,
        total_tokens,
    }
}
