//! Contract between an external stream engine and the capture core.
//!
//! The engine delivers decoded samples through three entry points; the
//! capture object implements [`FrameSink`] and is registered with the engine
//! by reference (`Arc<dyn FrameSink>`). The engine serializes its own
//! delivery callbacks - the sink does not guard against overlapping
//! producer invocations.

/// Status a sink returns to the engine for each delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStatus {
    /// Delivery handled; the stream continues. Dropped frames still report
    /// `Ok` - per-frame validation failures never escape the callback.
    Ok,
    /// Capture is permanently unable to buffer frames (failed ring
    /// allocation). The engine may tear the stream down.
    Error,
}

/// Integer capability descriptor attached to each sample.
///
/// Attributes are optional because the engine's caps structure may omit
/// them; the sink validates presence per frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleCaps {
    pub width: Option<i32>,
    pub height: Option<i32>,
}

/// Payload of one delivered sample.
#[derive(Debug, Clone, Copy)]
pub enum SampleBuffer<'a> {
    /// Buffer mapped readable.
    Mapped(&'a [u8]),
    /// Buffer present but the readable mapping failed.
    Unmappable,
}

/// Borrowed view of one engine delivery, assembled by the engine adapter.
///
/// Each `Option` layer mirrors one failure point of a real delivery: no
/// buffer attached, mapping failed, caps missing or unparsable.
#[derive(Debug, Clone, Copy)]
pub struct SampleView<'a> {
    pub buffer: Option<SampleBuffer<'a>>,
    pub caps: Option<SampleCaps>,
}

impl<'a> SampleView<'a> {
    /// A well-formed delivery: mapped payload plus full caps.
    pub fn mapped(data: &'a [u8], width: i32, height: i32) -> Self {
        Self {
            buffer: Some(SampleBuffer::Mapped(data)),
            caps: Some(SampleCaps {
                width: Some(width),
                height: Some(height),
            }),
        }
    }
}

/// Receiver side of the engine's delivery callbacks.
pub trait FrameSink: Send + Sync {
    /// The stream reached end-of-stream. No payload.
    fn on_eos(&self);

    /// First sample, delivered before the engine confirms a running state.
    fn on_preroll(&self, sample: SampleView<'_>) -> FlowStatus;

    /// Steady-state sample delivery.
    fn on_sample(&self, sample: SampleView<'_>) -> FlowStatus;
}
