//! Device-backed capture and playback using cpal
//!
//! cpal streams are not Send, so each stream lives on its own worker thread
//! for the lifetime of the session. The thread builds the stream, reports
//! success or failure back to the opener, then parks until close().

use cpal::traits::{DeviceTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender, TrySendError};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::backend::{f32_to_i16, i16_to_f32, pcm_bytes_to_samples, AudioCaptureSource, AudioConfig, AudioPlaybackSink, Frame};
use super::devices::{select_input_device, select_output_device};
use crate::error::{Result, VoiceError};

/// Frames buffered between the device callback and the send loop
const CAPTURE_QUEUE_FRAMES: usize = 32;

/// Minimum time read_frame waits before reporting a transient stall
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(200);

/// Captured frames' worth of samples the playback queue may hold
const PLAYBACK_QUEUE_FRAMES: usize = 2;

/// Minimum time write_frame waits for the speaker to make room
const MIN_PLAYBACK_STALL: Duration = Duration::from_millis(500);

/// Slices device callbacks into fixed-size frames.
///
/// When the consumer falls behind and the queue is full the newest frame is
/// dropped and counted. Continuous draining is the overflow remedy.
#[derive(Clone)]
pub(crate) struct FrameAssembler {
    pending: Vec<u8>,
    frame_bytes: usize,
    tx: SyncSender<Frame>,
    dropped: Arc<AtomicU64>,
}

impl FrameAssembler {
    pub(crate) fn new(frame_bytes: usize, tx: SyncSender<Frame>, dropped: Arc<AtomicU64>) -> Self {
        Self {
            pending: Vec::with_capacity(frame_bytes * 2),
            frame_bytes,
            tx,
            dropped,
        }
    }

    pub(crate) fn push_samples(&mut self, samples: impl Iterator<Item = i16>) {
        for sample in samples {
            self.pending.extend_from_slice(&sample.to_le_bytes());
        }

        while self.pending.len() >= self.frame_bytes {
            let rest = self.pending.split_off(self.frame_bytes);
            let bytes = std::mem::replace(&mut self.pending, rest);

            match self.tx.try_send(Frame::new(bytes)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Disconnected(_)) => {
                    self.pending.clear();
                    return;
                }
            }
        }
    }
}

/// Microphone capture on a cpal input stream (mono, i16 or f32 device format)
pub struct CpalCapture {
    frames: Receiver<Frame>,
    shutdown: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
    read_timeout: Duration,
    dropped: Arc<AtomicU64>,
    reported_dropped: u64,
    lost: Arc<AtomicBool>,
    name: String,
}

impl CpalCapture {
    /// Open the configured input device and start streaming.
    ///
    /// Fails with `HardwareUnavailable` when the device is missing or rejects
    /// the format.
    pub fn open(config: &AudioConfig) -> Result<Self> {
        let (frame_tx, frame_rx) = mpsc::sync_channel(CAPTURE_QUEUE_FRAMES);
        let (ready_tx, ready_rx) = mpsc::channel::<Result<String>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let dropped = Arc::new(AtomicU64::new(0));
        let lost = Arc::new(AtomicBool::new(false));

        let assembler = FrameAssembler::new(config.frame_bytes(), frame_tx, Arc::clone(&dropped));
        let worker_config = config.clone();
        let worker_lost = Arc::clone(&lost);

        let worker = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                let stream = match build_capture_stream(&worker_config, assembler, worker_lost) {
                    Ok((stream, name)) => {
                        let _ = ready_tx.send(Ok(name));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Parked until close() sends or the sender is dropped
                let _ = shutdown_rx.recv();
                drop(stream);
                debug!("Capture stream dropped");
            })
            .map_err(|e| VoiceError::HardwareUnavailable(format!("failed to spawn capture thread: {}", e)))?;

        let name = ready_rx
            .recv()
            .map_err(|_| VoiceError::HardwareUnavailable("capture thread exited during open".to_string()))??;

        info!(
            "Capture opened on {} ({}Hz, {} samples/frame)",
            name, config.sample_rate, config.chunk_frames
        );

        Ok(Self {
            frames: frame_rx,
            shutdown: Some(shutdown_tx),
            worker: Some(worker),
            read_timeout: (config.frame_interval() * 4).max(MIN_READ_TIMEOUT),
            dropped,
            reported_dropped: 0,
            lost,
            name,
        })
    }
}

fn capture_error_handler(lost: Arc<AtomicBool>) -> impl FnMut(cpal::StreamError) + Send + 'static {
    move |err| {
        warn!("Capture stream error: {}", err);
        if matches!(err, cpal::StreamError::DeviceNotAvailable) {
            lost.store(true, Ordering::SeqCst);
        }
    }
}

fn build_capture_stream(
    config: &AudioConfig,
    assembler: FrameAssembler,
    lost: Arc<AtomicBool>,
) -> Result<(cpal::Stream, String)> {
    let device = select_input_device(config.input_device)?;
    let name = device.name().unwrap_or_else(|_| "input".to_string());

    let stream_config = cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    // Try i16 first, then f32 for devices that only expose float formats
    let mut i16_assembler = assembler.clone();
    let stream = match device.build_input_stream(
        &stream_config,
        move |data: &[i16], _: &cpal::InputCallbackInfo| {
            i16_assembler.push_samples(data.iter().copied());
        },
        capture_error_handler(Arc::clone(&lost)),
        None,
    ) {
        Ok(stream) => stream,
        Err(i16_err) => {
            debug!("i16 capture rejected ({}), trying f32", i16_err);
            let mut f32_assembler = assembler;
            device
                .build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        f32_assembler.push_samples(data.iter().map(|&s| f32_to_i16(s)));
                    },
                    capture_error_handler(lost),
                    None,
                )
                .map_err(|e| VoiceError::HardwareUnavailable(format!("{}: {}", name, e)))?
        }
    };

    stream
        .play()
        .map_err(|e| VoiceError::HardwareUnavailable(format!("{}: {}", name, e)))?;

    Ok((stream, name))
}

impl AudioCaptureSource for CpalCapture {
    fn read_frame(&mut self) -> Result<Frame> {
        let dropped = self.dropped.load(Ordering::Relaxed);
        if dropped > self.reported_dropped {
            debug!("Capture overflow: {} frame(s) dropped", dropped - self.reported_dropped);
            self.reported_dropped = dropped;
        }

        match self.frames.recv_timeout(self.read_timeout) {
            Ok(frame) => Ok(frame),
            Err(RecvTimeoutError::Timeout) if self.lost.load(Ordering::SeqCst) => Err(
                VoiceError::HardwareUnavailable(format!("{}: input device disappeared", self.name)),
            ),
            Err(RecvTimeoutError::Timeout) => Err(VoiceError::DeviceIoTransient(format!(
                "no capture data within {}ms",
                self.read_timeout.as_millis()
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(VoiceError::HardwareUnavailable(
                "capture stream is closed".to_string(),
            )),
        }
    }

    fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Capture thread panicked");
            }
            info!("Capture closed: {}", self.name);
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.close();
    }
}

/// Samples waiting for the output callback, bounded to about one device
/// buffer.
///
/// Writers block while the queue is full and the callback wakes them as it
/// drains, so the writer runs at most one buffer ahead of the speaker.
pub(crate) struct PlaybackQueue {
    samples: Mutex<VecDeque<i16>>,
    room: Condvar,
    capacity: usize,
}

impl PlaybackQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            room: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append `samples`, waiting for the callback to make room.
    ///
    /// Fails with `HardwareUnavailable` when the stream reported a failure or
    /// nothing was drained for `stall`.
    pub(crate) fn push_blocking(&self, samples: &[i16], failed: &AtomicBool, stall: Duration) -> Result<()> {
        let poisoned = || VoiceError::HardwareUnavailable("playback queue poisoned".to_string());

        let mut rest = samples;
        let mut queued = self.samples.lock().map_err(|_| poisoned())?;

        while !rest.is_empty() {
            if failed.load(Ordering::SeqCst) {
                return Err(VoiceError::HardwareUnavailable("playback stream failed".to_string()));
            }

            let room = self.capacity.saturating_sub(queued.len());
            if room == 0 {
                let (guard, wait) = self.room.wait_timeout(queued, stall).map_err(|_| poisoned())?;
                queued = guard;
                if wait.timed_out() && queued.len() >= self.capacity {
                    return Err(VoiceError::HardwareUnavailable(format!(
                        "playback stalled for {}ms",
                        stall.as_millis()
                    )));
                }
                continue;
            }

            let take = room.min(rest.len());
            queued.extend(rest[..take].iter().copied());
            rest = &rest[take..];
        }

        Ok(())
    }

    /// Fill `out` from the queue, padding with `silence` on underflow.
    fn drain_into<T>(&self, out: &mut [T], convert: impl Fn(i16) -> T, silence: T)
    where
        T: Copy,
    {
        match self.samples.lock() {
            Ok(mut queued) => {
                for slot in out.iter_mut() {
                    *slot = queued.pop_front().map(&convert).unwrap_or(silence);
                }
            }
            Err(_) => out.fill(silence),
        }
        self.room.notify_all();
    }
}

/// Speaker playback on a cpal output stream.
///
/// Written bytes go into a bounded queue the device callback drains; gaps
/// are filled with silence.
pub struct CpalPlayback {
    queue: Arc<PlaybackQueue>,
    stall: Duration,
    failed: Arc<AtomicBool>,
    shutdown: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
    name: String,
}

impl CpalPlayback {
    pub fn open(config: &AudioConfig) -> Result<Self> {
        let queue = Arc::new(PlaybackQueue::new(config.chunk_frames * PLAYBACK_QUEUE_FRAMES));
        let failed = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel::<Result<String>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let worker_config = config.clone();
        let worker_queue = Arc::clone(&queue);
        let worker_failed = Arc::clone(&failed);

        let worker = thread::Builder::new()
            .name("audio-playback".to_string())
            .spawn(move || {
                let stream = match build_playback_stream(&worker_config, worker_queue, worker_failed) {
                    Ok((stream, name)) => {
                        let _ = ready_tx.send(Ok(name));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let _ = shutdown_rx.recv();
                drop(stream);
                debug!("Playback stream dropped");
            })
            .map_err(|e| VoiceError::HardwareUnavailable(format!("failed to spawn playback thread: {}", e)))?;

        let name = ready_rx
            .recv()
            .map_err(|_| VoiceError::HardwareUnavailable("playback thread exited during open".to_string()))??;

        info!("Playback opened on {} ({}Hz)", name, config.sample_rate);

        Ok(Self {
            queue,
            stall: (config.frame_interval() * 8).max(MIN_PLAYBACK_STALL),
            failed,
            shutdown: Some(shutdown_tx),
            worker: Some(worker),
            name,
        })
    }
}

fn build_playback_stream(
    config: &AudioConfig,
    queue: Arc<PlaybackQueue>,
    failed: Arc<AtomicBool>,
) -> Result<(cpal::Stream, String)> {
    let device = select_output_device(config.output_device)?;
    let name = device.name().unwrap_or_else(|_| "output".to_string());

    let stream_config = cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let i16_queue = Arc::clone(&queue);
    let i16_failed = Arc::clone(&failed);
    let stream = match device.build_output_stream(
        &stream_config,
        move |out: &mut [i16], _: &cpal::OutputCallbackInfo| {
            i16_queue.drain_into(out, |s| s, 0);
        },
        move |err| {
            error!("Playback stream error: {}", err);
            i16_failed.store(true, Ordering::SeqCst);
        },
        None,
    ) {
        Ok(stream) => stream,
        Err(i16_err) => {
            debug!("i16 playback rejected ({}), trying f32", i16_err);
            let f32_failed = Arc::clone(&failed);
            device
                .build_output_stream(
                    &stream_config,
                    move |out: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        queue.drain_into(out, i16_to_f32, 0.0);
                    },
                    move |err| {
                        error!("Playback stream error: {}", err);
                        f32_failed.store(true, Ordering::SeqCst);
                    },
                    None,
                )
                .map_err(|e| VoiceError::HardwareUnavailable(format!("{}: {}", name, e)))?
        }
    };

    stream
        .play()
        .map_err(|e| VoiceError::HardwareUnavailable(format!("{}: {}", name, e)))?;

    Ok((stream, name))
}

impl AudioPlaybackSink for CpalPlayback {
    fn write_frame(&mut self, pcm: &[u8]) -> Result<()> {
        if self.failed.load(Ordering::SeqCst) {
            return Err(VoiceError::HardwareUnavailable(format!("{}: playback stream failed", self.name)));
        }

        self.queue
            .push_blocking(&pcm_bytes_to_samples(pcm), &self.failed, self.stall)
            .map_err(|e| {
                self.failed.store(true, Ordering::SeqCst);
                VoiceError::HardwareUnavailable(format!("{}: {}", self.name, e))
            })
    }

    fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Playback thread panicked");
            }
            info!("Playback closed: {}", self.name);
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assembler_emits_exact_frames() {
        let (tx, rx) = mpsc::sync_channel(4);
        let dropped = Arc::new(AtomicU64::new(0));
        let mut assembler = FrameAssembler::new(4, tx, Arc::clone(&dropped));

        assembler.push_samples([1i16, 2, 3].into_iter());
        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.as_bytes(), &[1, 0, 2, 0]);
        assert!(rx.try_recv().is_err(), "half frame must stay pending");

        assembler.push_samples([4i16].into_iter());
        assert_eq!(rx.try_recv().unwrap().as_bytes(), &[3, 0, 4, 0]);
        assert_eq!(dropped.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_assembler_drops_on_overflow() {
        let (tx, rx) = mpsc::sync_channel(1);
        let dropped = Arc::new(AtomicU64::new(0));
        let mut assembler = FrameAssembler::new(2, tx, Arc::clone(&dropped));

        assembler.push_samples([1i16, 2, 3].into_iter());

        assert_eq!(rx.try_recv().unwrap().as_bytes(), &[1, 0]);
        assert_eq!(dropped.load(Ordering::Relaxed), 2);
    }

    const STALL: Duration = Duration::from_secs(2);

    #[test]
    fn test_drain_fills_silence_on_underflow() {
        let queue = PlaybackQueue::new(8);
        let failed = AtomicBool::new(false);
        queue.push_blocking(&[5, 6], &failed, STALL).unwrap();

        let mut out = [9i16; 4];
        queue.drain_into(&mut out, |s| s, 0);
        assert_eq!(out, [5, 6, 0, 0]);
    }

    #[test]
    fn test_write_waits_for_device_to_drain() {
        let queue = Arc::new(PlaybackQueue::new(4));
        let failed = Arc::new(AtomicBool::new(false));
        queue.push_blocking(&[1, 2, 3, 4], &failed, STALL).unwrap();

        let finished = Arc::new(AtomicBool::new(false));
        let writer = {
            let queue = Arc::clone(&queue);
            let failed = Arc::clone(&failed);
            let finished = Arc::clone(&finished);
            thread::spawn(move || {
                let written = queue.push_blocking(&[5, 6], &failed, STALL);
                finished.store(true, Ordering::SeqCst);
                written
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!finished.load(Ordering::SeqCst), "a full queue must hold the writer back");

        let mut out = [0i16; 2];
        queue.drain_into(&mut out, |s| s, 0);
        assert_eq!(out, [1, 2]);

        writer.join().unwrap().unwrap();
        let mut out = [0i16; 4];
        queue.drain_into(&mut out, |s| s, 0);
        assert_eq!(out, [3, 4, 5, 6]);
    }

    #[test]
    fn test_write_reports_stalled_device() {
        let queue = PlaybackQueue::new(2);
        let failed = AtomicBool::new(false);
        queue.push_blocking(&[1, 2], &failed, STALL).unwrap();

        let err = queue
            .push_blocking(&[3], &failed, Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(err, VoiceError::HardwareUnavailable(_)));
    }

    #[test]
    fn test_write_gives_up_on_failed_stream() {
        let queue = PlaybackQueue::new(2);
        let failed = AtomicBool::new(true);
        let err = queue.push_blocking(&[1], &failed, STALL).unwrap_err();
        assert!(matches!(err, VoiceError::HardwareUnavailable(_)));
    }
}
