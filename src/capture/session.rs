//! Capture session: receives samples from the engine, owns the frame ring,
//! and serves blocking consumers.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use once_cell::sync::OnceCell;
use tracing::{debug, error, info, warn};

use crate::capture::frame::{CapturedFrame, FrameMeta};
use crate::capture::sink::{FlowStatus, FrameSink, SampleBuffer, SampleView};
use crate::error::CaptureError;
use crate::pipeline::ringbuf::{SlotMeta, SlotRing, RING_DEPTH};
use crate::pipeline::sync::FrameSignal;

/// Why a delivered sample was discarded instead of written to the ring.
///
/// Every variant is recoverable: the frame is dropped, the ring and the
/// consumer cursor are left unchanged, and the stream continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Sample carried no buffer.
    NoBuffer,
    /// Buffer could not be mapped for reading.
    MapFailed,
    /// Mapped payload was empty; an empty frame cannot size the ring.
    EmptyBuffer,
    /// Capability descriptor missing or unparsable.
    NoCaps,
    /// Caps present but width or height attribute missing.
    MissingDimensions,
    /// Width or height below 1.
    DegenerateDimensions,
    /// Payload length differs from the established slot size.
    SizeMismatch,
    /// Ring allocation failed earlier; capture is permanently disabled.
    RingUnavailable,
}

/// Counters exposed to the owning application.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureStats {
    pub frames_written: usize,
    pub frames_read: usize,
    pub frames_dropped: usize,
}

/// Captures decoded frames arriving from an external engine and hands the
/// newest one to the application thread on request.
///
/// The session implements [`FrameSink`]; register it with an engine as
/// `Arc<dyn FrameSink>`. Exactly one producer (the engine's serialized
/// callback dispatch) feeds it; any number of threads may call
/// [`capture`](Self::capture), with exactly one claim succeeding per
/// published frame.
pub struct CaptureSession {
    /// Allocated once, on the first successfully validated frame.
    ring: OnceCell<SlotRing>,
    /// Latched when allocation fails; the session drops every later frame.
    ring_failed: AtomicBool,
    signal: FrameSignal,
    /// Last sequence number assigned to a successfully written frame.
    sequence: AtomicU64,
    dropped: AtomicUsize,
    eos: AtomicBool,
}

impl CaptureSession {
    pub fn new() -> Self {
        Self {
            ring: OnceCell::new(),
            ring_failed: AtomicBool::new(false),
            signal: FrameSignal::new(RING_DEPTH),
            sequence: AtomicU64::new(0),
            dropped: AtomicUsize::new(0),
            eos: AtomicBool::new(false),
        }
    }

    /// Block until an unconsumed frame is available and claim it.
    ///
    /// Repeated calls without an intervening publish block rather than
    /// re-returning stale data.
    pub fn capture(&self) -> CapturedFrame {
        let index = self.signal.claim();
        self.frame_at(index)
    }

    /// Like [`capture`](Self::capture) but gives up after `timeout`.
    pub fn capture_timeout(&self, timeout: Duration) -> Option<CapturedFrame> {
        let index = self.signal.claim_timeout(timeout)?;
        Some(self.frame_at(index))
    }

    /// Whether the engine reported end-of-stream.
    pub fn is_eos(&self) -> bool {
        self.eos.load(Ordering::Acquire)
    }

    /// Whether the ring has been sized and allocated yet.
    pub fn is_allocated(&self) -> bool {
        self.ring.get().is_some()
    }

    pub fn stats(&self) -> CaptureStats {
        let (frames_written, frames_read) =
            self.ring.get().map(SlotRing::stats).unwrap_or_default();
        CaptureStats {
            frames_written,
            frames_read,
            frames_dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    fn frame_at(&self, index: usize) -> CapturedFrame {
        // A claim can only follow a publish, and a publish only follows
        // allocation.
        let ring = self.ring.get().expect("ring allocated before first publish");
        let (data, meta) = ring.read(index);
        CapturedFrame {
            data,
            meta: FrameMeta {
                width: meta.width,
                height: meta.height,
                depth: meta.depth,
                size_bytes: ring.slot_len(),
                slot: index,
                sequence: meta.sequence,
            },
            device: ring.device(index),
        }
    }

    fn drop_frame(&self, reason: DropReason) -> FlowStatus {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        warn!(?reason, "dropping frame");
        // Recoverable drops keep the stream alive; only a dead ring is
        // surfaced to the engine as a failure.
        if reason == DropReason::RingUnavailable {
            FlowStatus::Error
        } else {
            FlowStatus::Ok
        }
    }

    /// Validate one delivery, lazily allocate the ring, copy, publish.
    fn ingest(&self, sample: SampleView<'_>) -> FlowStatus {
        let Some(buffer) = sample.buffer else {
            return self.drop_frame(DropReason::NoBuffer);
        };
        let data = match buffer {
            SampleBuffer::Mapped(data) => data,
            SampleBuffer::Unmappable => return self.drop_frame(DropReason::MapFailed),
        };
        if data.is_empty() {
            return self.drop_frame(DropReason::EmptyBuffer);
        }
        let Some(caps) = sample.caps else {
            return self.drop_frame(DropReason::NoCaps);
        };
        let (Some(width), Some(height)) = (caps.width, caps.height) else {
            return self.drop_frame(DropReason::MissingDimensions);
        };
        if width < 1 || height < 1 {
            return self.drop_frame(DropReason::DegenerateDimensions);
        }

        if self.ring_failed.load(Ordering::Acquire) {
            return self.drop_frame(DropReason::RingUnavailable);
        }
        let ring = match self.ring.get_or_try_init(|| {
            info!(
                slot_len = data.len(),
                depth = RING_DEPTH,
                "allocating frame ring"
            );
            SlotRing::allocate(data.len())
        }) {
            Ok(ring) => ring,
            Err(err) => {
                self.ring_failed.store(true, Ordering::Release);
                error!(%err, "frame ring allocation failed; capture disabled");
                return FlowStatus::Error;
            }
        };

        // The engine serializes deliveries, so load + store is race-free.
        let sequence = self.sequence.load(Ordering::Relaxed) + 1;
        let meta = SlotMeta {
            width: width as u32,
            height: height as u32,
            depth: ((data.len() * 8) / (width as usize * height as usize)) as u32,
            sequence,
        };

        let index = self.signal.next_index();
        match ring.write(index, data, meta) {
            Ok(()) => {}
            Err(CaptureError::SizeMismatch { expected, got }) => {
                warn!(expected, got, "dropping frame: size mismatch");
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return FlowStatus::Ok;
            }
            Err(err) => {
                warn!(%err, "dropping frame");
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return FlowStatus::Ok;
            }
        }
        self.sequence.store(sequence, Ordering::Relaxed);
        self.signal.publish();
        FlowStatus::Ok
    }

    #[cfg(test)]
    fn force_ring_failure(&self) {
        self.ring_failed.store(true, Ordering::Release);
    }
}

impl Default for CaptureSession {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSink for CaptureSession {
    fn on_eos(&self) {
        info!("stream reached end-of-stream");
        self.eos.store(true, Ordering::Release);
    }

    fn on_preroll(&self, _sample: SampleView<'_>) -> FlowStatus {
        // Preroll is acknowledged but not ingested; steady-state delivery
        // redelivers the frame once the stream is running.
        debug!("preroll sample received");
        FlowStatus::Ok
    }

    fn on_sample(&self, sample: SampleView<'_>) -> FlowStatus {
        self.ingest(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::sink::SampleCaps;
    use std::sync::Arc;
    use std::thread;

    const CLAIM_WAIT: Duration = Duration::from_millis(50);

    fn deliver(session: &CaptureSession, data: &[u8], width: i32, height: i32) -> FlowStatus {
        session.on_sample(SampleView::mapped(data, width, height))
    }

    #[test]
    fn valid_sample_allocates_and_publishes() {
        let session = CaptureSession::new();
        assert!(!session.is_allocated());

        let data = vec![7u8; 64 * 48 * 3];
        assert_eq!(deliver(&session, &data, 64, 48), FlowStatus::Ok);
        assert!(session.is_allocated());

        let frame = session.capture_timeout(CLAIM_WAIT).unwrap();
        assert_eq!(frame.meta.width, 64);
        assert_eq!(frame.meta.height, 48);
        assert_eq!(frame.meta.depth, 24);
        assert_eq!(frame.meta.size_bytes, data.len());
        assert_eq!(frame.meta.slot, 0);
        assert_eq!(frame.meta.sequence, 1);
        assert_eq!(&frame.data[..], &data[..]);
        assert_eq!(frame.device.len(), data.len());
    }

    #[test]
    fn no_buffer_is_dropped() {
        let session = CaptureSession::new();
        let view = SampleView {
            buffer: None,
            caps: Some(SampleCaps {
                width: Some(4),
                height: Some(4),
            }),
        };
        assert_eq!(session.on_sample(view), FlowStatus::Ok);
        assert!(!session.is_allocated());
        assert_eq!(session.stats().frames_dropped, 1);
    }

    #[test]
    fn unmappable_buffer_is_dropped() {
        let session = CaptureSession::new();
        let view = SampleView {
            buffer: Some(SampleBuffer::Unmappable),
            caps: Some(SampleCaps {
                width: Some(4),
                height: Some(4),
            }),
        };
        assert_eq!(session.on_sample(view), FlowStatus::Ok);
        assert!(!session.is_allocated());
    }

    #[test]
    fn missing_caps_is_dropped() {
        let session = CaptureSession::new();
        let data = [1u8; 48];
        let view = SampleView {
            buffer: Some(SampleBuffer::Mapped(&data)),
            caps: None,
        };
        assert_eq!(session.on_sample(view), FlowStatus::Ok);
        assert!(!session.is_allocated());
    }

    #[test]
    fn missing_dimension_attribute_is_dropped() {
        let session = CaptureSession::new();
        let data = [1u8; 48];
        let view = SampleView {
            buffer: Some(SampleBuffer::Mapped(&data)),
            caps: Some(SampleCaps {
                width: Some(4),
                height: None,
            }),
        };
        assert_eq!(session.on_sample(view), FlowStatus::Ok);
        assert!(!session.is_allocated());
    }

    #[test]
    fn degenerate_dimensions_do_not_allocate_or_publish() {
        let session = CaptureSession::new();
        let data = [1u8; 48];

        assert_eq!(deliver(&session, &data, 0, 4), FlowStatus::Ok);
        assert_eq!(deliver(&session, &data, 4, -1), FlowStatus::Ok);

        assert!(!session.is_allocated());
        assert_eq!(session.stats().frames_dropped, 2);
        assert!(session.capture_timeout(CLAIM_WAIT).is_none());
    }

    #[test]
    fn empty_payload_is_dropped() {
        let session = CaptureSession::new();
        assert_eq!(deliver(&session, &[], 4, 4), FlowStatus::Ok);
        assert!(!session.is_allocated());
    }

    #[test]
    fn first_frame_establishes_slot_size() {
        let session = CaptureSession::new();

        let first = vec![0xAAu8; 1000];
        assert_eq!(deliver(&session, &first, 25, 10), FlowStatus::Ok);
        let short = vec![0xBBu8; 500];
        assert_eq!(deliver(&session, &short, 25, 10), FlowStatus::Ok);

        assert_eq!(session.stats().frames_dropped, 1);
        // The 1000-byte slot set is intact and still holds the first frame.
        let frame = session.capture_timeout(CLAIM_WAIT).unwrap();
        assert_eq!(frame.meta.size_bytes, 1000);
        assert!(frame.data.iter().all(|&b| b == 0xAA));
        // The rejected frame did not publish.
        assert!(session.capture_timeout(CLAIM_WAIT).is_none());
    }

    #[test]
    fn ring_failure_is_fatal_for_later_frames() {
        let session = CaptureSession::new();
        session.force_ring_failure();

        let data = vec![1u8; 48];
        assert_eq!(deliver(&session, &data, 4, 4), FlowStatus::Error);
        assert_eq!(session.stats().frames_dropped, 1);
        assert!(!session.is_allocated());
    }

    #[test]
    fn preroll_is_acknowledged_but_not_ingested() {
        let session = CaptureSession::new();
        let data = vec![1u8; 48];
        assert_eq!(
            session.on_preroll(SampleView::mapped(&data, 4, 4)),
            FlowStatus::Ok
        );
        assert!(!session.is_allocated());
        assert!(session.capture_timeout(CLAIM_WAIT).is_none());
    }

    #[test]
    fn seventeenth_write_reuses_slot_zero() {
        let session = CaptureSession::new();
        for seq in 1..=17u64 {
            let data = vec![seq as u8; 64];
            assert_eq!(deliver(&session, &data, 8, 8), FlowStatus::Ok);
        }
        let frame = session.capture_timeout(CLAIM_WAIT).unwrap();
        assert_eq!(frame.meta.slot, 0);
        assert_eq!(frame.meta.sequence, 17);
        assert!(frame.data.iter().all(|&b| b == 17));
    }

    #[test]
    fn reader_every_second_write_tracks_the_ring() {
        let session = CaptureSession::new();
        for seq in 1..=20u64 {
            let data = vec![seq as u8; 256];
            assert_eq!(deliver(&session, &data, 16, 16), FlowStatus::Ok);
            if seq % 2 == 0 {
                let frame = session.capture_timeout(CLAIM_WAIT).unwrap();
                assert_eq!(frame.meta.slot, ((seq - 1) % 16) as usize);
                assert_eq!(frame.meta.sequence, seq);
                assert!(frame.data.iter().all(|&b| b == seq as u8));
            }
        }
    }

    #[test]
    fn single_publish_feeds_exactly_one_claim() {
        let session = CaptureSession::new();
        let data = vec![3u8; 64];
        deliver(&session, &data, 8, 8);

        assert!(session.capture_timeout(CLAIM_WAIT).is_some());
        assert!(session.capture_timeout(CLAIM_WAIT).is_none());
    }

    #[test]
    fn concurrent_consumers_never_observe_torn_frames() {
        const FRAME_LEN: usize = 4096;
        const FRAMES: u64 = 400;

        let session = Arc::new(CaptureSession::new());

        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let session = Arc::clone(&session);
                thread::spawn(move || {
                    let mut seen = 0u64;
                    let mut last_sequence = 0u64;
                    loop {
                        let Some(frame) = session.capture_timeout(Duration::from_millis(20))
                        else {
                            if session.is_eos() {
                                break;
                            }
                            continue;
                        };
                        let first = frame.data[0];
                        // Fully the payload of one write - never a mix.
                        assert!(frame.data.iter().all(|&b| b == first));
                        assert_eq!(first, (frame.meta.sequence % 251) as u8);
                        // Claims always move forward to a newer frame.
                        assert!(frame.meta.sequence > last_sequence);
                        last_sequence = frame.meta.sequence;
                        seen += 1;
                    }
                    seen
                })
            })
            .collect();

        for seq in 1..=FRAMES {
            let data = vec![(seq % 251) as u8; FRAME_LEN];
            assert_eq!(deliver(&session, &data, 64, 64), FlowStatus::Ok);
        }
        session.on_eos();

        let total: u64 = consumers.into_iter().map(|h| h.join().unwrap()).sum();
        assert!(total > 0);
        // One claim per publish at most.
        assert!(total <= FRAMES);
    }
}
