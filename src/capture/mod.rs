pub mod frame;
#[cfg(feature = "gstreamer-engine")]
pub mod gst_engine;
pub mod session;
pub mod sink;
pub mod synthetic;

pub use frame::{CapturedFrame, FrameMeta};
pub use session::CaptureSession;
pub use sink::FrameSink;
pub use synthetic::SyntheticEngine;
