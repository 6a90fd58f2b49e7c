pub mod client;
pub mod events;
pub mod link;
pub mod messages;

pub use client::{RealtimeClient, RealtimeReceiver, RealtimeSender};
pub use events::{extract_usage, parse_server_event, ServerEvent, Usage};
pub use link::{LinkReceiver, LinkSender};
pub use messages::{ClientMessage, NoiseReduction, NoiseReductionMode, SessionConfig, TranscriptionConfig, TurnDetection};
