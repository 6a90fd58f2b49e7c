pub mod backend;
pub mod cpal_backend;
pub mod devices;

pub use backend::{AudioCaptureSource, AudioConfig, AudioPlaybackSink, Frame};
pub use cpal_backend::{CpalCapture, CpalPlayback};
pub use devices::{list_input_devices, list_output_devices, DeviceInfo};
