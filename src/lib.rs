pub mod audio;
pub mod config;
pub mod error;
pub mod realtime;
pub mod session;
pub mod turn_log;

pub use audio::{AudioCaptureSource, AudioConfig, AudioPlaybackSink, CpalCapture, CpalPlayback, Frame};
pub use config::{load_prompt, Settings};
pub use error::{Result, VoiceError};
pub use realtime::{ClientMessage, LinkReceiver, LinkSender, RealtimeClient, ServerEvent, SessionConfig, Usage};
pub use session::{
    DuplexSession, DuplexSessionConfig, SessionFeatures, SessionStats, StopSignal, TurnLogEntry, TurnTakingController,
};
pub use turn_log::{JsonlTurnLog, TurnLog};
