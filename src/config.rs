use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

use crate::audio::AudioConfig;
use crate::error::VoiceError;
use crate::realtime::{NoiseReduction, NoiseReductionMode, SessionConfig, TranscriptionConfig, TurnDetection};
use crate::session::SessionFeatures;

/// Process settings, read once at startup and never changed.
///
/// Keys match the environment variable names in lower case
/// (`OPENAI_API_KEY` -> `openai_api_key`).
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub openai_api_key: String,
    #[serde(default = "default_model_url")]
    pub model_url: String,
    /// System prompt file; empty means no instructions
    #[serde(default)]
    pub prompt_file: String,
    /// Prefix of the per-session turn log file
    #[serde(default = "default_log_file")]
    pub log_file: String,

    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default = "default_prefix_padding_ms")]
    pub prefix_padding_ms: u32,
    #[serde(default = "default_silence_duration_ms")]
    pub silence_duration_ms: u32,
    #[serde(default)]
    pub noise_reduction: String,

    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_voice")]
    pub voice: String,
    /// Transcription model; empty disables input transcription
    #[serde(default)]
    pub model_name: String,

    pub mic_index: Option<usize>,
    pub speaker_index: Option<usize>,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_chunk_frames")]
    pub chunk_frames: usize,
}

fn default_model_url() -> String {
    "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview".to_string()
}

fn default_log_file() -> String {
    "logs/log_".to_string()
}

fn default_threshold() -> f32 {
    0.99
}

fn default_prefix_padding_ms() -> u32 {
    300
}

fn default_silence_duration_ms() -> u32 {
    3000
}

fn default_language() -> String {
    "es".to_string()
}

fn default_voice() -> String {
    "marin".to_string()
}

fn default_sample_rate() -> u32 {
    24000
}

fn default_chunk_frames() -> usize {
    2048
}

impl Settings {
    /// Load settings from an optional TOML file overlaid by the environment.
    ///
    /// The caller loads `.env` beforehand so its values are visible here.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        let settings = builder
            .add_source(config::Environment::default().try_parsing(true))
            .build()
            .context("Failed to read configuration")?;

        let settings: Settings = settings
            .try_deserialize()
            .context("Invalid configuration")?;
        settings.validate()?;

        info!(
            "Loaded settings (voice={}, threshold={}, silence={}ms)",
            settings.voice, settings.threshold, settings.silence_duration_ms
        );

        Ok(settings)
    }

    pub fn validate(&self) -> std::result::Result<(), VoiceError> {
        if self.openai_api_key.trim().is_empty() {
            return Err(VoiceError::Config("OPENAI_API_KEY is missing".to_string()));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(VoiceError::Config(format!(
                "THRESHOLD must be between 0 and 1, got {}",
                self.threshold
            )));
        }
        if self.sample_rate == 0 || self.chunk_frames == 0 {
            return Err(VoiceError::Config(
                "SAMPLE_RATE and CHUNK_FRAMES must be positive".to_string(),
            ));
        }
        NoiseReductionMode::parse(&self.noise_reduction).map_err(VoiceError::Config)?;
        Ok(())
    }

    /// Turn log file name, fixed for the whole process:
    /// `<log_file>.<YYYY.MM.DD_HH.MM.SS>.log`
    pub fn log_file_with_timestamp(&self, started: DateTime<Local>) -> String {
        format!("{}.{}.log", self.log_file, started.format("%Y.%m.%d_%H.%M.%S"))
    }

    pub fn audio_config(&self) -> AudioConfig {
        AudioConfig {
            sample_rate: self.sample_rate,
            chunk_frames: self.chunk_frames,
            input_device: self.mic_index,
            output_device: self.speaker_index,
        }
    }

    /// Build the session configuration sent once after connecting
    pub fn session_config(&self, instructions: String, features: SessionFeatures) -> SessionConfig {
        let input_audio_transcription = (features.transcription && !self.model_name.trim().is_empty())
            .then(|| TranscriptionConfig {
                model: self.model_name.trim().to_string(),
                language: Some(self.language.clone()).filter(|l| !l.is_empty()),
            });

        // validate() has already rejected unknown modes
        let input_audio_noise_reduction = NoiseReductionMode::parse(&self.noise_reduction)
            .ok()
            .flatten()
            .map(|kind| NoiseReduction { kind });

        SessionConfig {
            modalities: vec!["audio".to_string(), "text".to_string()],
            voice: self.voice.clone(),
            instructions,
            input_audio_format: "pcm16".to_string(),
            output_audio_format: "pcm16".to_string(),
            input_audio_transcription,
            input_audio_noise_reduction,
            turn_detection: TurnDetection::server_vad(
                self.threshold,
                self.prefix_padding_ms,
                self.silence_duration_ms,
            ),
        }
    }
}

/// Read the system prompt. A missing or unreadable file yields an empty prompt.
pub fn load_prompt(path: &str) -> String {
    if path.trim().is_empty() {
        return String::new();
    }

    match std::fs::read_to_string(Path::new(path)) {
        Ok(prompt) => {
            info!("Loaded system prompt from {} ({} chars)", path, prompt.len());
            prompt
        }
        Err(e) => {
            warn!("Failed to read prompt file {}: {}", path, e);
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn settings() -> Settings {
        Settings {
            openai_api_key: "sk-test".to_string(),
            model_url: default_model_url(),
            prompt_file: String::new(),
            log_file: "logs/log_".to_string(),
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 800,
            noise_reduction: String::new(),
            language: "es".to_string(),
            voice: "marin".to_string(),
            model_name: "whisper-1".to_string(),
            mic_index: Some(2),
            speaker_index: None,
            sample_rate: 24000,
            chunk_frames: 2048,
        }
    }

    #[test]
    fn test_log_file_name() {
        let started = Local.with_ymd_and_hms(2025, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            settings().log_file_with_timestamp(started),
            "logs/log_.2025.03.09_14.05.07.log"
        );
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut s = settings();
        s.openai_api_key = "  ".to_string();
        assert!(matches!(s.validate(), Err(VoiceError::Config(_))));

        let mut s = settings();
        s.threshold = 1.5;
        assert!(s.validate().is_err());

        let mut s = settings();
        s.noise_reduction = "studio".to_string();
        assert!(s.validate().is_err());

        let mut s = settings();
        s.chunk_frames = 0;
        assert!(s.validate().is_err());

        assert!(settings().validate().is_ok());
    }

    #[test]
    fn test_session_config_transcription_toggle() {
        let s = settings();
        let enabled = s.session_config(String::new(), SessionFeatures::default());
        assert_eq!(
            enabled.input_audio_transcription,
            Some(TranscriptionConfig {
                model: "whisper-1".to_string(),
                language: Some("es".to_string()),
            })
        );

        let disabled = s.session_config(
            String::new(),
            SessionFeatures {
                transcription: false,
                measure_latency: true,
            },
        );
        assert!(disabled.input_audio_transcription.is_none());
    }

    #[test]
    fn test_audio_config_carries_devices() {
        let audio = settings().audio_config();
        assert_eq!(audio.input_device, Some(2));
        assert_eq!(audio.output_device, None);
        assert_eq!(audio.frame_bytes(), 4096);
    }

    #[test]
    fn test_missing_prompt_is_empty() {
        assert_eq!(load_prompt("/definitely/not/here.txt"), "");
        assert_eq!(load_prompt(""), "");
    }
}
