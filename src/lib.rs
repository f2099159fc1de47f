pub mod capture;
pub mod error;
pub mod pipeline;
pub mod utils;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

pub use capture::frame::{CapturedFrame, FrameMeta};
pub use capture::session::{CaptureSession, CaptureStats, DropReason};
pub use capture::sink::{FlowStatus, FrameSink, SampleBuffer, SampleCaps, SampleView};
pub use capture::synthetic::SyntheticEngine;
pub use error::CaptureError;
pub use pipeline::ringbuf::{DeviceHandle, RING_DEPTH};

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub synthetic: SyntheticConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Stream location (e.g. an RTSP URL). Empty selects the synthetic
    /// engine in the demo binary.
    pub location: String,
    /// Name of the appsink delivery endpoint inside the launch description.
    pub endpoint: String,
    /// Source jitterbuffer latency in milliseconds.
    pub latency_ms: u32,
    /// Full launch description override; bypasses the built-in template.
    pub custom_launch: Option<String>,
}

/// Frame generation knobs for the engine-free synthetic source.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub width: u32,
    pub height: u32,
    pub bytes_per_pixel: u32,
    /// Delivery rate in frames per second; 0 delivers unpaced.
    pub fps: u32,
    /// Deliver end-of-stream after this many frames.
    pub frame_budget: Option<u64>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            location: String::new(),
            endpoint: "frames".into(),
            latency_ms: 100,
            custom_launch: None,
        }
    }
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            bytes_per_pixel: 3,
            fps: 30,
            frame_budget: None,
        }
    }
}
