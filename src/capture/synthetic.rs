//! In-process stand-in for the external pipeline engine.
//!
//! Delivers deterministically patterned frames to a [`FrameSink`] from a
//! background thread, honoring the engine contract: one preroll before the
//! stream runs, serialized steady-state deliveries, end-of-stream when the
//! optional frame budget is exhausted. Lets the demo and the tests run
//! without the real engine installed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::capture::sink::{FlowStatus, FrameSink, SampleView};
use crate::SyntheticConfig;

/// Fill byte for frame `sequence`; the whole payload carries one sentinel
/// value so a torn write would be visible as a mixed payload.
fn sentinel(sequence: u64) -> u8 {
    (sequence % 251) as u8
}

/// Background engine generating synthetic decoded frames.
pub struct SyntheticEngine {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SyntheticEngine {
    /// Spawn the delivery thread. Frames flow into `sink` until the frame
    /// budget runs out or [`stop`](Self::stop) is called.
    pub fn start(sink: Arc<dyn FrameSink>, config: SyntheticConfig) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let stop = Arc::clone(&stop);
            thread::spawn(move || deliver_loop(sink, config, stop))
        };
        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Stop delivering and join the engine thread.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SyntheticEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn deliver_loop(sink: Arc<dyn FrameSink>, config: SyntheticConfig, stop: Arc<AtomicBool>) {
    let frame_len = (config.width * config.height * config.bytes_per_pixel) as usize;
    let interval = if config.fps == 0 {
        Duration::ZERO
    } else {
        Duration::from_secs(1) / config.fps
    };

    // Preroll: the first frame, delivered before the stream counts as running.
    let preroll = vec![sentinel(0); frame_len];
    sink.on_preroll(SampleView::mapped(
        &preroll,
        config.width as i32,
        config.height as i32,
    ));

    let mut sequence = 0u64;
    loop {
        if stop.load(Ordering::Acquire) {
            break;
        }
        if let Some(budget) = config.frame_budget {
            if sequence >= budget {
                debug!(frames = sequence, "synthetic frame budget exhausted");
                sink.on_eos();
                break;
            }
        }
        sequence += 1;
        let data = vec![sentinel(sequence); frame_len];
        let status = sink.on_sample(SampleView::mapped(
            &data,
            config.width as i32,
            config.height as i32,
        ));
        if status == FlowStatus::Error {
            warn!(sequence, "sink rejected delivery; stopping synthetic engine");
            break;
        }
        if !interval.is_zero() {
            thread::sleep(interval);
        }
    }
}
