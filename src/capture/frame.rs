//! Frame descriptor handed to the application per capture call.

use bytes::Bytes;

use crate::pipeline::ringbuf::DeviceHandle;

/// One captured frame.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// Owned copy of the slot payload, taken at claim time. Valid for as
    /// long as the application keeps it - unlike `device`, it is not
    /// invalidated when the producer wraps around the ring.
    pub data: Bytes,

    /// Frame metadata
    pub meta: FrameMeta,

    /// Device-visible view of the claimed slot. Contents stay valid for at
    /// most `RING_DEPTH - 1` subsequent publishes.
    pub device: DeviceHandle,
}

/// Frame metadata, recomputed from each sample's capability descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMeta {
    pub width: u32,
    pub height: u32,
    /// Derived color depth in bits per pixel: `(size * 8) / (width * height)`.
    pub depth: u32,
    pub size_bytes: usize,
    /// Ring slot the frame was claimed from.
    pub slot: usize,
    /// Monotonic frame number assigned by the producer.
    pub sequence: u64,
}
