pub mod ringbuf;
pub mod sync;

pub use ringbuf::{DeviceHandle, SlotRing, RING_DEPTH};
pub use sync::FrameSignal;
