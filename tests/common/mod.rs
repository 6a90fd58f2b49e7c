// In-memory doubles for driving a DuplexSession without devices or network

#![allow(dead_code)]

use async_trait::async_trait;
use duplex_voice::realtime::parse_server_event;
use duplex_voice::{
    AudioCaptureSource, AudioPlaybackSink, ClientMessage, Frame, LinkReceiver, LinkSender, ServerEvent, TurnLog,
    TurnLogEntry, VoiceError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub struct ScriptedCapture {
    frames: std_mpsc::Receiver<Vec<u8>>,
    reads: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl AudioCaptureSource for ScriptedCapture {
    fn read_frame(&mut self) -> duplex_voice::Result<Frame> {
        match self.frames.recv_timeout(Duration::from_millis(10)) {
            Ok(bytes) => {
                self.reads.fetch_add(1, Ordering::SeqCst);
                Ok(Frame::new(bytes))
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                Err(VoiceError::DeviceIoTransient("no frame yet".to_string()))
            }
            Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                Err(VoiceError::HardwareUnavailable("microphone unplugged".to_string()))
            }
        }
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn name(&self) -> &str {
        "scripted-mic"
    }
}

/// Speaker double. `write_delay` stands in for a device whose buffer is full,
/// so each write blocks until the previous audio has played.
pub struct RecordingPlayback {
    written: Arc<Mutex<Vec<Vec<u8>>>>,
    closes: Arc<AtomicUsize>,
    fail: bool,
    write_delay: Duration,
}

impl AudioPlaybackSink for RecordingPlayback {
    fn write_frame(&mut self, pcm: &[u8]) -> duplex_voice::Result<()> {
        if self.fail {
            return Err(VoiceError::HardwareUnavailable("speaker gone".to_string()));
        }
        if !self.write_delay.is_zero() {
            std::thread::sleep(self.write_delay);
        }
        self.written.lock().unwrap().push(pcm.to_vec());
        Ok(())
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn name(&self) -> &str {
        "recording-speaker"
    }
}

pub struct RecordingSender {
    sent: Arc<Mutex<Vec<ClientMessage>>>,
    closes: Arc<AtomicUsize>,
    closed: bool,
}

#[async_trait]
impl LinkSender for RecordingSender {
    async fn send(&mut self, message: &ClientMessage) -> duplex_voice::Result<()> {
        if self.closed {
            return Err(VoiceError::LinkClosed);
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn close(&mut self) -> duplex_voice::Result<()> {
        self.closed = true;
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Yields scripted events; a dropped script means the remote closed.
pub struct ScriptedReceiver {
    events: mpsc::UnboundedReceiver<duplex_voice::Result<ServerEvent>>,
}

#[async_trait]
impl LinkReceiver for ScriptedReceiver {
    async fn receive(&mut self) -> duplex_voice::Result<ServerEvent> {
        match self.events.recv().await {
            Some(event) => event,
            None => Err(VoiceError::LinkClosed),
        }
    }
}

pub struct MemoryTurnLog {
    entries: Arc<Mutex<Vec<TurnLogEntry>>>,
}

impl TurnLog for MemoryTurnLog {
    fn append(&mut self, entry: &TurnLogEntry) {
        self.entries.lock().unwrap().push(entry.clone());
    }
}

/// Parts handed to `DuplexSession::run`
pub struct Parts {
    pub capture: Box<dyn AudioCaptureSource>,
    pub playback: Box<dyn AudioPlaybackSink>,
    pub sender: Box<dyn LinkSender>,
    pub receiver: Box<dyn LinkReceiver>,
    pub turn_log: Box<dyn TurnLog>,
}

/// Test-side handles onto the doubles
pub struct Probe {
    pub frame_tx: Option<std_mpsc::Sender<Vec<u8>>>,
    pub event_tx: Option<mpsc::UnboundedSender<duplex_voice::Result<ServerEvent>>>,
    pub reads: Arc<AtomicUsize>,
    pub sent: Arc<Mutex<Vec<ClientMessage>>>,
    pub written: Arc<Mutex<Vec<Vec<u8>>>>,
    pub entries: Arc<Mutex<Vec<TurnLogEntry>>>,
    pub capture_closes: Arc<AtomicUsize>,
    pub playback_closes: Arc<AtomicUsize>,
    pub sender_closes: Arc<AtomicUsize>,
}

impl Probe {
    pub fn push_frame(&self, byte: u8) {
        self.frame_tx.as_ref().unwrap().send(vec![byte; 8]).unwrap();
    }

    /// Queue a raw JSON event as if it came off the wire
    pub fn push_json(&self, json: &str) {
        let event = parse_server_event(json);
        self.event_tx.as_ref().unwrap().send(event).unwrap();
    }

    pub fn push_result(&self, event: duplex_voice::Result<ServerEvent>) {
        self.event_tx.as_ref().unwrap().send(event).unwrap();
    }

    /// Simulate the remote closing the connection
    pub fn close_link(&mut self) {
        self.event_tx.take();
    }

    pub fn audio_frames_sent(&self) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| matches!(m, ClientMessage::AudioAppend { .. }))
            .count()
    }

    pub fn closes(&self) -> (usize, usize, usize) {
        (
            self.capture_closes.load(Ordering::SeqCst),
            self.playback_closes.load(Ordering::SeqCst),
            self.sender_closes.load(Ordering::SeqCst),
        )
    }
}

pub fn doubles(playback_fails: bool) -> (Parts, Probe) {
    build_doubles(playback_fails, Duration::ZERO)
}

/// Doubles whose speaker takes `write_delay` to accept each chunk
pub fn slow_playback_doubles(write_delay: Duration) -> (Parts, Probe) {
    build_doubles(false, write_delay)
}

fn build_doubles(playback_fails: bool, write_delay: Duration) -> (Parts, Probe) {
    let (frame_tx, frame_rx) = std_mpsc::channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let reads = Arc::new(AtomicUsize::new(0));
    let sent = Arc::new(Mutex::new(Vec::new()));
    let written = Arc::new(Mutex::new(Vec::new()));
    let entries = Arc::new(Mutex::new(Vec::new()));
    let capture_closes = Arc::new(AtomicUsize::new(0));
    let playback_closes = Arc::new(AtomicUsize::new(0));
    let sender_closes = Arc::new(AtomicUsize::new(0));

    let parts = Parts {
        capture: Box::new(ScriptedCapture {
            frames: frame_rx,
            reads: Arc::clone(&reads),
            closes: Arc::clone(&capture_closes),
        }),
        playback: Box::new(RecordingPlayback {
            written: Arc::clone(&written),
            closes: Arc::clone(&playback_closes),
            fail: playback_fails,
            write_delay,
        }),
        sender: Box::new(RecordingSender {
            sent: Arc::clone(&sent),
            closes: Arc::clone(&sender_closes),
            closed: false,
        }),
        receiver: Box::new(ScriptedReceiver { events: event_rx }),
        turn_log: Box::new(MemoryTurnLog {
            entries: Arc::clone(&entries),
        }),
    };

    let probe = Probe {
        frame_tx: Some(frame_tx),
        event_tx: Some(event_tx),
        reads,
        sent,
        written,
        entries,
        capture_closes,
        playback_closes,
        sender_closes,
    };

    (parts, probe)
}

/// Poll `condition` until it holds or two seconds pass
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
