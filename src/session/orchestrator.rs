//! Duplex session orchestration
//!
//! Two long-lived tasks share a `TurnTakingController` and a `StopSignal`:
//! - the send loop reads microphone frames on a blocking worker and forwards
//!   them unless the remote is speaking
//! - the receive loop interprets remote events, drives playback and the
//!   turn state, and flushes one log entry per completed turn
//!
//! Whichever loop exits first raises the stop signal. Devices are released
//! after both loops have finished, then the link.

use chrono::{Local, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};

use super::config::DuplexSessionConfig;
use super::metrics::{TurnLogEntry, TurnMetricsRecorder};
use super::stats::{SessionCounters, SessionStats};
use super::turn::{StopSignal, TurnTakingController};
use crate::audio::{AudioCaptureSource, AudioPlaybackSink};
use crate::error::{Result, VoiceError};
use crate::realtime::{ClientMessage, LinkReceiver, LinkSender, ServerEvent};
use crate::turn_log::TurnLog;

/// A voice conversation with a remote realtime model
pub struct DuplexSession {
    config: DuplexSessionConfig,
    controller: TurnTakingController,
    stop: StopSignal,
    counters: Arc<SessionCounters>,
}

impl DuplexSession {
    pub fn new(config: DuplexSessionConfig) -> Self {
        info!("Creating duplex session: {}", config.session_id);

        Self {
            config,
            controller: TurnTakingController::new(),
            stop: StopSignal::new(),
            counters: Arc::new(SessionCounters::default()),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.config.session_id
    }

    /// Handle for stopping the session from outside (e.g. Ctrl-C)
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Read-only view of the turn state
    pub fn controller(&self) -> TurnTakingController {
        self.controller.clone()
    }

    /// Run both loops until the link closes, a fatal error occurs, or the stop
    /// signal is raised.
    ///
    /// Returns the session statistics on a clean end (stop signal or remote
    /// close). Capture, playback and the link are released exactly once on
    /// every path.
    pub async fn run(
        self,
        capture: Box<dyn AudioCaptureSource>,
        playback: Box<dyn AudioPlaybackSink>,
        sender: Box<dyn LinkSender>,
        receiver: Box<dyn LinkReceiver>,
        turn_log: Box<dyn TurnLog>,
    ) -> Result<SessionStats> {
        let started_at = Utc::now();
        info!(
            "Starting duplex session {} (capture: {}, playback: {})",
            self.config.session_id,
            capture.name(),
            playback.name()
        );

        let send_loop = SendLoop {
            capture: Some(capture),
            sender,
            controller: self.controller.clone(),
            stop: self.stop.clone(),
            counters: Arc::clone(&self.counters),
        };

        let receive_loop = ReceiveLoop {
            receiver,
            playback: Some(playback),
            turn_log,
            controller: self.controller.clone(),
            recorder: TurnMetricsRecorder::new(self.config.features.measure_latency),
            stop: self.stop.clone(),
            counters: Arc::clone(&self.counters),
            playback_failed: false,
        };

        let send_task = tokio::spawn(send_loop.run());
        let receive_task = tokio::spawn(receive_loop.run());

        // Either loop ending stops the other, including when it panicked
        let stop_after_send = self.stop.clone();
        let stop_after_receive = self.stop.clone();
        let (send_outcome, receive_outcome) = tokio::join!(
            async move {
                let outcome = send_task.await;
                stop_after_send.raise();
                outcome
            },
            async move {
                let outcome = receive_task.await;
                stop_after_receive.raise();
                outcome
            },
        );

        let (send_result, sender) = match send_outcome {
            Ok(mut finished) => {
                if let Some(mut capture) = finished.capture.take() {
                    capture.close();
                }
                (finished.result, Some(finished.sender))
            }
            Err(e) => (Err(aborted("send", e)), None),
        };

        let receive_result = match receive_outcome {
            Ok(mut finished) => {
                if let Some(mut playback) = finished.playback.take() {
                    playback.close();
                }
                finished.result
            }
            Err(e) => Err(aborted("receive", e)),
        };

        if let Some(mut sender) = sender {
            if let Err(e) = sender.close().await {
                warn!("Failed to close link cleanly: {}", e);
            }
        }

        let stats = self.counters.snapshot(&self.config.session_id, started_at);
        info!(
            "Duplex session {} ended: {} turns, {} frames sent, {} suppressed, {:.1}s",
            stats.session_id, stats.turns_completed, stats.frames_sent, stats.frames_suppressed, stats.duration_secs
        );

        // A remote close is a normal end; anything else fatal is surfaced,
        // the receive side first.
        let failure = [receive_result, send_result]
            .into_iter()
            .filter_map(|result| result.err())
            .find(|e| !matches!(e, VoiceError::LinkClosed));

        match failure {
            None => Ok(stats),
            Some(e) => {
                error!("Duplex session {} failed: {}", self.config.session_id, e);
                Err(e)
            }
        }
    }
}

fn aborted(which: &str, e: JoinError) -> VoiceError {
    error!("{} loop aborted: {}", which, e);
    VoiceError::LinkError(format!("{} loop aborted: {}", which, e))
}

struct SendLoop {
    capture: Option<Box<dyn AudioCaptureSource>>,
    sender: Box<dyn LinkSender>,
    controller: TurnTakingController,
    stop: StopSignal,
    counters: Arc<SessionCounters>,
}

impl SendLoop {
    async fn run(mut self) -> SendLoopOutcome {
        info!("Send loop started");
        let result = self.pump().await;
        if let Err(e) = &result {
            debug!("Send loop ending on: {}", e);
        }
        self.stop.raise();
        info!("Send loop stopped");

        SendLoopOutcome {
            capture: self.capture,
            sender: self.sender,
            result,
        }
    }

    async fn pump(&mut self) -> Result<()> {
        while !self.stop.is_raised() {
            let Some(mut capture) = self.capture.take() else {
                return Ok(());
            };

            // The device read blocks, so it runs off the async workers. The
            // source travels to the worker and back each frame.
            let (capture, read) = tokio::task::spawn_blocking(move || {
                let read = capture.read_frame();
                (capture, read)
            })
            .await
            .map_err(|e| VoiceError::HardwareUnavailable(format!("capture worker failed: {}", e)))?;
            self.capture = Some(capture);

            let frame = match read {
                Ok(frame) => frame,
                Err(e) if e.is_transient() => {
                    debug!("Capture: {}", e);
                    continue;
                }
                Err(e) => {
                    error!("Capture failed: {}", e);
                    return Err(e);
                }
            };

            if self.stop.is_raised() {
                break;
            }

            // Frames are always drained from the device; while the remote
            // speaks they are dropped here.
            if self.controller.should_suppress_capture() {
                SessionCounters::bump(&self.counters.frames_suppressed);
                continue;
            }

            self.sender.send(&ClientMessage::audio_append(frame.as_bytes())).await?;
            SessionCounters::bump(&self.counters.frames_sent);
        }

        Ok(())
    }
}

struct SendLoopOutcome {
    capture: Option<Box<dyn AudioCaptureSource>>,
    sender: Box<dyn LinkSender>,
    result: Result<()>,
}

struct ReceiveLoop {
    receiver: Box<dyn LinkReceiver>,
    playback: Option<Box<dyn AudioPlaybackSink>>,
    turn_log: Box<dyn TurnLog>,
    controller: TurnTakingController,
    recorder: TurnMetricsRecorder,
    stop: StopSignal,
    counters: Arc<SessionCounters>,
    playback_failed: bool,
}

impl ReceiveLoop {
    async fn run(mut self) -> ReceiveLoopOutcome {
        info!("Receive loop started");

        let result = loop {
            let next = tokio::select! {
                _ = self.stop.raised() => break Ok(()),
                next = self.receiver.receive() => next,
            };

            match next {
                Ok(event) => self.handle_event(event, Instant::now()).await,
                Err(VoiceError::LinkClosed) => {
                    println!("Remote closed the session.");
                    break Err(VoiceError::LinkClosed);
                }
                Err(e) => {
                    error!("Receive failed: {}", e);
                    println!("Connection error: {}", e);
                    break Err(e);
                }
            }
        };

        self.stop.raise();
        info!("Receive loop stopped");

        ReceiveLoopOutcome {
            playback: self.playback,
            result,
        }
    }

    /// Apply one event. Events are handled strictly in arrival order.
    async fn handle_event(&mut self, event: ServerEvent, at: Instant) {
        match event {
            ServerEvent::SessionInfo { kind } => {
                info!("Remote session event: {}", kind);
            }

            ServerEvent::TurnStarted => {
                if self.controller.mark_remote_speech_started() {
                    self.recorder.begin_turn(at);
                    println!("Remote speaking - microphone muted.");
                }
            }

            ServerEvent::AudioChunk(pcm) => {
                // Some remotes send audio without announcing the response first
                if self.controller.mark_remote_speech_started() {
                    debug!("Audio arrived before turn start; muting capture");
                    println!("Remote speaking - microphone muted.");
                }

                if self.recorder.record_audio(at) {
                    debug!("First audio of turn: {:?}", self.recorder.current().time_to_first_audio);
                }

                self.play(pcm).await;
            }

            ServerEvent::InputTranscript(text) => {
                println!("You: {}", text);
                self.recorder.record_user_transcript(text, at);
            }

            ServerEvent::OutputTranscript(text) => {
                println!("Remote: {}", text);
                self.recorder.record_ai_transcript(text);
            }

            ServerEvent::TurnComplete { usage } => {
                self.controller.mark_remote_speech_ended();

                let turn_data = self.recorder.complete_turn(usage, at);
                info!(
                    "Turn complete: latency={:?}ms total_tokens={}",
                    turn_data.latency_ms, turn_data.usage.total_tokens
                );

                self.turn_log.append(&TurnLogEntry {
                    timestamp: Local::now(),
                    turn_data,
                });
                SessionCounters::bump(&self.counters.turns_completed);

                println!("Turn finished. You can speak now.");
            }

            ServerEvent::Error { message } => {
                SessionCounters::bump(&self.counters.remote_errors);
                let err = VoiceError::RemoteReported(message);
                warn!("{}", err);
                println!("Error: {}", err);
            }

            ServerEvent::Other { kind } => {
                debug!("Ignoring event: {}", kind);
            }
        }
    }

    /// Hand a chunk to the speaker, waiting while its buffer is full.
    ///
    /// Events queue behind the write, so turn-complete only re-opens the
    /// microphone once the reply is at most one device buffer from finished.
    /// Playback failure disables playback only; turn-taking carries on.
    async fn play(&mut self, pcm: Vec<u8>) {
        if self.playback_failed {
            return;
        }
        let Some(mut playback) = self.playback.take() else {
            return;
        };

        let joined = tokio::task::spawn_blocking(move || {
            let written = playback.write_frame(&pcm);
            (playback, written)
        })
        .await;

        let written = match joined {
            Ok((playback, written)) => {
                self.playback = Some(playback);
                written
            }
            Err(e) => {
                error!("Playback worker failed: {}", e);
                self.playback_failed = true;
                return;
            }
        };

        match written {
            Ok(()) => SessionCounters::bump(&self.counters.audio_chunks_played),
            Err(e) if e.is_transient() => debug!("Playback: {}", e),
            Err(e) => {
                error!("Playback disabled for the rest of the session: {}", e);
                self.playback_failed = true;
            }
        }
    }
}

struct ReceiveLoopOutcome {
    playback: Option<Box<dyn AudioPlaybackSink>>,
    result: Result<()>,
}
