//! Duplex session management
//!
//! This module provides the `DuplexSession` abstraction that manages:
//! - Microphone capture streamed to the remote model
//! - Remote audio playback and transcripts
//! - Half-duplex turn-taking between the two
//! - Per-turn latency and usage records

mod config;
mod metrics;
mod orchestrator;
mod stats;
mod turn;

pub use config::{DuplexSessionConfig, SessionFeatures};
pub use metrics::{TurnData, TurnLogEntry, TurnMetricsRecorder, TurnRecord};
pub use orchestrator::DuplexSession;
pub use stats::SessionStats;
pub use turn::{StopSignal, TurnTakingController};
