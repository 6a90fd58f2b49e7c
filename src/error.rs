use thiserror::Error;

/// Errors raised by the duplex session and its collaborators.
///
/// Only `HardwareUnavailable`, `LinkClosed` and `LinkError` ever reach the
/// supervisor. The rest are handled where they occur.
#[derive(Debug, Error)]
pub enum VoiceError {
    /// An audio device could not be opened. The session never starts.
    #[error("audio hardware unavailable: {0}")]
    HardwareUnavailable(String),

    /// The remote ended the connection.
    #[error("link closed by remote")]
    LinkClosed,

    /// Malformed inbound data or a transport fault.
    #[error("link error: {0}")]
    LinkError(String),

    /// An `error` event sent by the remote. Reported, never fatal.
    #[error("remote reported error: {0}")]
    RemoteReported(String),

    /// Capture overflow, read timeout or playback underflow.
    #[error("transient device I/O: {0}")]
    DeviceIoTransient(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl VoiceError {
    /// Whether this error ends the session when it reaches the supervisor.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VoiceError::HardwareUnavailable(_) | VoiceError::LinkClosed | VoiceError::LinkError(_)
        )
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, VoiceError::DeviceIoTransient(_))
    }
}

pub type Result<T> = std::result::Result<T, VoiceError>;
