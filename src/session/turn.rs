use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Half-duplex gate shared by the send and receive loops.
///
/// Two states: Idle and RemoteSpeaking. Only the receive loop transitions it;
/// the send loop only reads. Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct TurnTakingController {
    remote_is_speaking: Arc<AtomicBool>,
}

impl TurnTakingController {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while the remote is producing output. Captured frames are
    /// discarded instead of sent.
    pub fn should_suppress_capture(&self) -> bool {
        self.remote_is_speaking.load(Ordering::SeqCst)
    }

    /// Idle -> RemoteSpeaking.
    ///
    /// Returns true when this call made the transition; a repeat call while
    /// already speaking is a no-op and returns false.
    pub fn mark_remote_speech_started(&self) -> bool {
        !self.remote_is_speaking.swap(true, Ordering::SeqCst)
    }

    /// RemoteSpeaking -> Idle. Returns true when the state changed.
    pub fn mark_remote_speech_ended(&self) -> bool {
        self.remote_is_speaking.swap(false, Ordering::SeqCst)
    }
}

/// Cooperative stop flag observed by both loops.
///
/// Either loop or the supervisor can raise it. Raising is sticky.
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn raise(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_raised(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the signal has been raised.
    pub async fn raised(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in self, so this only ends once the flag is true
        let _ = rx.wait_for(|raised| *raised).await;
    }
}
