//! Fatal error taxonomy for capture setup and the slot store.
//!
//! Per-frame recoverable conditions are not errors; they are drop
//! diagnostics (see `capture::session::DropReason`) and never escape the
//! engine callback boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    /// The external stream engine could not be initialized.
    #[error("failed to initialize stream engine: {0}")]
    EngineInit(String),

    /// The pipeline description could not be turned into a running topology.
    #[error("failed to construct pipeline: {0}")]
    PipelineConstruct(String),

    /// The launch description carries no named appsink, or the named element
    /// is missing from the constructed pipeline.
    #[error("named sink endpoint `{0}` not found in pipeline")]
    MissingEndpoint(String),

    /// A pipeline state transition was refused by the engine.
    #[error("pipeline state change failed: {0}")]
    PipelineState(String),

    /// Slot allocation failed. Fatal for the capture object's lifetime: no
    /// partially initialized ring is ever exposed.
    #[error("failed to allocate frame ring ({size} bytes per slot)")]
    RingAllocation {
        size: usize,
        #[source]
        source: std::io::Error,
    },

    /// A first frame with an empty payload cannot establish the slot size.
    #[error("frame ring slot size must be non-zero")]
    ZeroSlotSize,

    /// Payload length differs from the slot size established by the first
    /// frame. The offending frame is dropped; the ring is untouched.
    #[error("frame length {got} does not match established slot size {expected}")]
    SizeMismatch { expected: usize, got: usize },
}
