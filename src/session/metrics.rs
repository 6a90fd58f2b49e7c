use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::realtime::Usage;

/// Fields accumulated for the turn in flight
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnRecord {
    /// When the user's utterance ended (transcript time), or when the turn began
    pub turn_start: Option<Instant>,
    /// Frozen at the first audio chunk of the turn
    pub time_to_first_audio: Option<Duration>,
    pub first_audio_seen: bool,
    pub user_transcript: Option<String>,
    pub ai_transcript: Option<String>,
}

impl TurnRecord {
    pub fn is_empty(&self) -> bool {
        *self == TurnRecord::default()
    }
}

/// Per-turn payload of a log line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnData {
    pub latency_ms: Option<f64>,
    pub user_transcript: Option<String>,
    pub ai_transcript: Option<String>,
    pub usage: Usage,
}

/// One line of the turn log. Written once, never modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnLogEntry {
    pub timestamp: DateTime<Local>,
    pub turn_data: TurnData,
}

/// Accumulates the single in-flight TurnRecord.
///
/// Owned by the receive loop alone. Every method takes the event time so the
/// loop stamps events as they arrive.
#[derive(Debug)]
pub struct TurnMetricsRecorder {
    record: TurnRecord,
    measure_latency: bool,
}

impl TurnMetricsRecorder {
    pub fn new(measure_latency: bool) -> Self {
        Self {
            record: TurnRecord::default(),
            measure_latency,
        }
    }

    pub fn current(&self) -> &TurnRecord {
        &self.record
    }

    /// The remote started a response. Keeps an earlier transcript stamp.
    pub fn begin_turn(&mut self, at: Instant) {
        if self.record.turn_start.is_none() {
            self.record.turn_start = Some(at);
        }
    }

    /// The user's utterance was transcribed: latency is measured from here.
    pub fn record_user_transcript(&mut self, text: String, at: Instant) {
        self.record.user_transcript = Some(text);
        self.record.turn_start = Some(at);
    }

    pub fn record_ai_transcript(&mut self, text: String) {
        self.record.ai_transcript = Some(text);
    }

    /// Note an audio chunk. Returns true for the first chunk of the turn, which
    /// freezes time-to-first-audio.
    pub fn record_audio(&mut self, at: Instant) -> bool {
        if self.record.first_audio_seen {
            return false;
        }

        self.record.first_audio_seen = true;
        self.record.time_to_first_audio = self
            .record
            .turn_start
            .map(|start| at.saturating_duration_since(start));
        true
    }

    /// Finalize the turn and reset every field.
    ///
    /// Without any audio, latency is measured up to `at` instead.
    pub fn complete_turn(&mut self, usage: Usage, at: Instant) -> TurnData {
        let record = std::mem::take(&mut self.record);

        let latency = if record.first_audio_seen {
            record.time_to_first_audio
        } else {
            record.turn_start.map(|start| at.saturating_duration_since(start))
        };

        TurnData {
            latency_ms: latency.filter(|_| self.measure_latency).map(duration_ms),
            user_transcript: record.user_transcript,
            ai_transcript: record.ai_transcript,
            usage,
        }
    }
}

fn duration_ms(d: Duration) -> f64 {
    d.as_micros() as f64 / 1000.0
}
