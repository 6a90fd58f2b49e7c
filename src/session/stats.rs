use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics about a duplex session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub session_id: String,

    /// When the session started
    pub started_at: DateTime<Utc>,

    /// Total duration in seconds
    pub duration_secs: f64,

    /// Frames forwarded to the remote
    pub frames_sent: u64,

    /// Frames read while the remote was speaking and discarded
    pub frames_suppressed: u64,

    /// Audio chunks handed to playback
    pub audio_chunks_played: u64,

    pub turns_completed: u64,

    /// `error` events reported by the remote
    pub remote_errors: u64,
}

/// Live counters updated by both loops
#[derive(Debug, Default)]
pub(crate) struct SessionCounters {
    pub frames_sent: AtomicU64,
    pub frames_suppressed: AtomicU64,
    pub audio_chunks_played: AtomicU64,
    pub turns_completed: AtomicU64,
    pub remote_errors: AtomicU64,
}

impl SessionCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, session_id: &str, started_at: DateTime<Utc>) -> SessionStats {
        let duration = Utc::now().signed_duration_since(started_at);

        SessionStats {
            session_id: session_id.to_string(),
            started_at,
            duration_secs: duration.num_milliseconds() as f64 / 1000.0,
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_suppressed: self.frames_suppressed.load(Ordering::Relaxed),
            audio_chunks_played: self.audio_chunks_played.load(Ordering::Relaxed),
            turns_completed: self.turns_completed.load(Ordering::Relaxed),
            remote_errors: self.remote_errors.load(Ordering::Relaxed),
        }
    }
}
