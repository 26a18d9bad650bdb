use serde::{Deserialize, Serialize};

use crate::capture::{AllocationMode, PixelFormat};
use crate::driver::AccessMode;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Frame acquisition settings
    pub capture: CaptureConfig,
    /// Simulated device settings
    pub simulation: SimulationConfig,
}

/// Frame acquisition settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Device to open
    pub device_id: String,
    /// Access mode the device is opened with
    pub access_mode: AccessMode,
    /// Buffers cycled while streaming (raised to the device minimum if lower)
    pub buffer_count: u32,
    /// Per-frame wait in synchronous mode
    pub timeout_ms: u64,
    /// Who allocates frame storage
    pub allocation_mode: AllocationMode,
    /// Frames to pull in synchronous mode; unbounded if unset
    pub frame_limit: Option<u64>,
    /// Capacity of the frame channel in streaming mode
    pub channel_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_id: "DEV_SIM".to_string(),
            access_mode: AccessMode::Full,
            buffer_count: 5,
            timeout_ms: 2000,
            allocation_mode: AllocationMode::SelfOwned,
            frame_limit: None,
            channel_capacity: 8,
        }
    }
}

/// Simulated device settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Id the simulated device answers to
    pub device_id: String,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    /// Time between completed frames
    pub frame_interval_ms: u64,
    /// Reported buffer alignment, absent if unset
    pub alignment: Option<usize>,
    /// Reported minimum buffer count, absent if unset
    pub min_buffer_count: Option<u32>,
    /// Chunk data bytes placed in front of the image
    pub chunk_size: u32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            device_id: "DEV_SIM".to_string(),
            width: 640,
            height: 480,
            pixel_format: PixelFormat::MONO8,
            frame_interval_ms: 33,
            alignment: None,
            min_buffer_count: None,
            chunk_size: 0,
        }
    }
}
