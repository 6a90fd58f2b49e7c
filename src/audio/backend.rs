use crate::error::Result;

/// One captured block of 16-bit little-endian mono PCM.
///
/// Always exactly `AudioConfig::frame_bytes()` long. Ownership moves from the
/// capture source to the send loop, which forwards or drops it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
}

impl Frame {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Configuration shared by capture and playback
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Sample rate in Hz, identical on both directions
    pub sample_rate: u32,
    /// Samples per captured frame
    pub chunk_frames: usize,
    /// Input device index in host enumeration order (None = system default)
    pub input_device: Option<usize>,
    /// Output device index in host enumeration order (None = system default)
    pub output_device: Option<usize>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24000,  // realtime pcm16 rate
            chunk_frames: 2048,
            input_device: None,
            output_device: None,
        }
    }
}

impl AudioConfig {
    /// Size of one frame in bytes (mono i16)
    pub fn frame_bytes(&self) -> usize {
        self.chunk_frames * 2
    }

    /// Wall-clock length of one frame
    pub fn frame_interval(&self) -> std::time::Duration {
        std::time::Duration::from_micros(
            self.chunk_frames as u64 * 1_000_000 / self.sample_rate.max(1) as u64,
        )
    }
}

/// Microphone side of the session.
///
/// `read_frame` blocks until a full frame is available, so callers run it on
/// a blocking worker. Transient conditions come back as
/// `VoiceError::DeviceIoTransient` and the caller keeps reading.
pub trait AudioCaptureSource: Send {
    fn read_frame(&mut self) -> Result<Frame>;

    /// Release the device. Safe to call more than once.
    fn close(&mut self);

    /// Name for logging
    fn name(&self) -> &str;
}

/// Speaker side of the session.
///
/// `write_frame` hands bytes to the device and blocks while the device buffer
/// is full, so a caller that has written everything knows the reply is at
/// most one buffer away from finished. Callers run it on a blocking worker.
pub trait AudioPlaybackSink: Send {
    fn write_frame(&mut self, pcm: &[u8]) -> Result<()>;

    /// Release the device. Safe to call more than once.
    fn close(&mut self);

    /// Name for logging
    fn name(&self) -> &str;
}

/// Convert little-endian i16 PCM bytes to samples. A trailing odd byte is dropped.
pub fn pcm_bytes_to_samples(pcm: &[u8]) -> Vec<i16> {
    pcm.chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / i16::MAX as f32
}
