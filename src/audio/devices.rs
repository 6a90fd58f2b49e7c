//! Device enumeration and index-based selection.
//!
//! Indices are positions in the default host's enumeration order. They are the
//! values accepted by `MIC_INDEX` / `SPEAKER_INDEX`.

use cpal::traits::{DeviceTrait, HostTrait};
use tracing::info;

use crate::error::{Result, VoiceError};

/// A device as listed by the `devices` subcommand
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub index: usize,
    pub name: String,
}

pub fn list_input_devices() -> Result<Vec<DeviceInfo>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| VoiceError::HardwareUnavailable(format!("failed to enumerate inputs: {}", e)))?;
    Ok(describe(devices))
}

pub fn list_output_devices() -> Result<Vec<DeviceInfo>> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| VoiceError::HardwareUnavailable(format!("failed to enumerate outputs: {}", e)))?;
    Ok(describe(devices))
}

fn describe(devices: impl Iterator<Item = cpal::Device>) -> Vec<DeviceInfo> {
    devices
        .enumerate()
        .map(|(index, device)| DeviceInfo {
            index,
            name: device.name().unwrap_or_else(|_| "<unnamed>".to_string()),
        })
        .collect()
}

/// Pick the input device at `index`, or the system default when `None`.
pub(crate) fn select_input_device(index: Option<usize>) -> Result<cpal::Device> {
    let host = cpal::default_host();
    let device = match index {
        Some(i) => host
            .input_devices()
            .map_err(|e| VoiceError::HardwareUnavailable(format!("failed to enumerate inputs: {}", e)))?
            .nth(i)
            .ok_or_else(|| VoiceError::HardwareUnavailable(format!("no input device at index {}", i)))?,
        None => host
            .default_input_device()
            .ok_or_else(|| VoiceError::HardwareUnavailable("no default input device".to_string()))?,
    };

    info!(
        "Selected input device: {}",
        device.name().unwrap_or_else(|_| "<unnamed>".to_string())
    );
    Ok(device)
}

/// Pick the output device at `index`, or the system default when `None`.
pub(crate) fn select_output_device(index: Option<usize>) -> Result<cpal::Device> {
    let host = cpal::default_host();
    let device = match index {
        Some(i) => host
            .output_devices()
            .map_err(|e| VoiceError::HardwareUnavailable(format!("failed to enumerate outputs: {}", e)))?
            .nth(i)
            .ok_or_else(|| VoiceError::HardwareUnavailable(format!("no output device at index {}", i)))?,
        None => host
            .default_output_device()
            .ok_or_else(|| VoiceError::HardwareUnavailable("no default output device".to_string()))?,
    };

    info!(
        "Selected output device: {}",
        device.name().unwrap_or_else(|_| "<unnamed>".to_string())
    );
    Ok(device)
}
