use serde::{Deserialize, Serialize};

/// Optional behaviours of a duplex session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFeatures {
    /// Ask the remote to transcribe the user's audio
    pub transcription: bool,

    /// Record time-to-first-audio per turn (otherwise logged as null)
    pub measure_latency: bool,
}

impl Default for SessionFeatures {
    fn default() -> Self {
        Self {
            transcription: true,
            measure_latency: true,
        }
    }
}

/// Configuration for a duplex session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplexSessionConfig {
    /// Unique session identifier used in logs
    pub session_id: String,

    pub features: SessionFeatures,
}

impl Default for DuplexSessionConfig {
    fn default() -> Self {
        Self {
            session_id: format!("session-{}", uuid::Uuid::new_v4()),
            features: SessionFeatures::default(),
        }
    }
}
