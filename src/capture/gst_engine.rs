//! GStreamer-backed pipeline engine: launch, appsink callback wiring, bus drain.
//!
//! Everything here is glue over the external engine. The capture core only
//! sees the [`FrameSink`] trait; this adapter translates the engine's three
//! appsink callbacks into trait calls and its bus messages into logs.

use std::sync::Arc;

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use tracing::{debug, error, info, trace, warn};

use crate::capture::sink::{FlowStatus, FrameSink, SampleBuffer, SampleCaps, SampleView};
use crate::error::CaptureError;
use crate::utils;
use crate::CaptureConfig;

/// GStreamer engine driving a [`FrameSink`] with decoded samples.
pub struct GstEngine {
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
}

impl GstEngine {
    /// Construct the pipeline from `launch` and register `sink` for delivery.
    ///
    /// The launch description must contain a named appsink element; its
    /// absence is a fatal setup error, as is any engine-init or parse
    /// failure. No partially usable engine is returned.
    pub fn new(launch: &str, sink: Arc<dyn FrameSink>) -> Result<Self, CaptureError> {
        gst::init().map_err(|e| CaptureError::EngineInit(e.to_string()))?;

        let (major, minor, micro, nano) = gst::version();
        info!(%major, %minor, %micro, %nano, "initialized stream engine");

        let endpoint = utils::appsink_name(launch)
            .ok_or_else(|| CaptureError::MissingEndpoint("appsink".into()))?;
        info!(launch, endpoint, "launching pipeline");

        let pipeline = gst::parse::launch(launch)
            .map_err(|e| CaptureError::PipelineConstruct(e.to_string()))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| {
                CaptureError::PipelineConstruct("launch did not produce a pipeline".into())
            })?;

        let appsink = pipeline
            .by_name(&endpoint)
            .ok_or_else(|| CaptureError::MissingEndpoint(endpoint.clone()))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| CaptureError::MissingEndpoint(endpoint.clone()))?;

        // Callback dispatch, not signal emission; drop old buffers rather
        // than stalling the engine when the consumer lags.
        appsink.set_property("emit-signals", false);
        appsink.set_property("max-buffers", 4u32);
        appsink.set_property("drop", true);
        appsink.set_property("sync", false);

        let bus = pipeline.bus();
        let callbacks = gst_app::AppSinkCallbacks::builder()
            .eos({
                let sink = Arc::clone(&sink);
                move |_| sink.on_eos()
            })
            .new_preroll({
                let sink = Arc::clone(&sink);
                move |appsink| {
                    let status = match appsink.pull_preroll() {
                        Ok(sample) => deliver(sink.as_ref(), &sample, true),
                        Err(_) => {
                            warn!("appsink returned no preroll sample");
                            FlowStatus::Ok
                        }
                    };
                    flow_result(status)
                }
            })
            .new_sample({
                let sink = Arc::clone(&sink);
                move |appsink| {
                    let status = match appsink.pull_sample() {
                        Ok(sample) => deliver(sink.as_ref(), &sample, false),
                        Err(_) => {
                            warn!("appsink returned no sample");
                            FlowStatus::Ok
                        }
                    };
                    // Drain diagnostics opportunistically on the delivery path.
                    if let Some(bus) = bus.as_ref() {
                        drain_bus(bus, sink.as_ref());
                    }
                    flow_result(status)
                }
            })
            .build();
        appsink.set_callbacks(callbacks);

        Ok(Self { pipeline, appsink })
    }

    /// Start the stream.
    pub fn open(&self) -> Result<(), CaptureError> {
        self.pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| CaptureError::PipelineState(format!("{e:?}")))?;

        // Wait for the pipeline to settle; live sources come up ASYNC.
        let (result, _, _) = self.pipeline.state(Some(gst::ClockTime::from_seconds(5)));
        match result {
            Ok(gst::StateChangeSuccess::Success) => {
                info!("pipeline playing");
                Ok(())
            }
            Ok(gst::StateChangeSuccess::Async) => {
                info!("pipeline starting asynchronously");
                Ok(())
            }
            Ok(other) => {
                debug!(?other, "pipeline state change");
                Ok(())
            }
            Err(e) => Err(CaptureError::PipelineState(format!("{e:?}"))),
        }
    }

    /// Tear the stream down.
    pub fn close(&self) -> Result<(), CaptureError> {
        info!("stopping pipeline");
        self.pipeline
            .set_state(gst::State::Null)
            .map_err(|e| CaptureError::PipelineState(format!("{e:?}")))?;
        Ok(())
    }

    pub fn appsink(&self) -> &gst_app::AppSink {
        &self.appsink
    }
}

impl Drop for GstEngine {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Build the demo launch description for an RTSP camera source.
pub fn build_launch_string(config: &CaptureConfig) -> String {
    if let Some(custom) = &config.custom_launch {
        return custom.clone();
    }
    format!(
        "rtspsrc location={} latency={} ! \
         decodebin ! \
         videoconvert ! \
         video/x-raw,format=RGB ! \
         appsink name={} sync=false max-buffers=4 drop=true",
        config.location, config.latency_ms, config.endpoint
    )
}

/// Translate one pulled sample into a borrowed [`SampleView`] and hand it to
/// the sink. The buffer mapping lives exactly as long as the delivery.
fn deliver(sink: &dyn FrameSink, sample: &gst::Sample, preroll: bool) -> FlowStatus {
    let caps = sample
        .caps()
        .and_then(|caps| caps.structure(0))
        .map(|s| SampleCaps {
            width: s.get::<i32>("width").ok(),
            height: s.get::<i32>("height").ok(),
        });

    let dispatch = |view: SampleView<'_>| {
        if preroll {
            sink.on_preroll(view)
        } else {
            sink.on_sample(view)
        }
    };

    match sample.buffer() {
        None => dispatch(SampleView { buffer: None, caps }),
        Some(buffer) => match buffer.map_readable() {
            // The mapping stays alive for the duration of the dispatch.
            Ok(map) => dispatch(SampleView {
                buffer: Some(SampleBuffer::Mapped(map.as_slice())),
                caps,
            }),
            Err(_) => dispatch(SampleView {
                buffer: Some(SampleBuffer::Unmappable),
                caps,
            }),
        },
    }
}

fn flow_result(status: FlowStatus) -> Result<gst::FlowSuccess, gst::FlowError> {
    match status {
        FlowStatus::Ok => Ok(gst::FlowSuccess::Ok),
        FlowStatus::Error => Err(gst::FlowError::Error),
    }
}

/// Pop every pending bus message. The core depends on this channel only for
/// the end-of-stream lifecycle signal; the rest is diagnostics.
fn drain_bus(bus: &gst::Bus, sink: &dyn FrameSink) {
    use gst::MessageView;
    while let Some(msg) = bus.pop() {
        match msg.view() {
            MessageView::Error(err) => {
                error!(
                    src = ?err.src().map(|s| s.path_string()),
                    error = %err.error(),
                    debug = ?err.debug(),
                    "bus error"
                );
            }
            MessageView::Eos(..) => {
                info!("bus end-of-stream");
                sink.on_eos();
            }
            MessageView::StateChanged(change) => {
                debug!(
                    src = ?msg.src().map(|s| s.path_string()),
                    old = ?change.old(),
                    new = ?change.current(),
                    "state changed"
                );
            }
            MessageView::Tag(..) => {
                debug!(src = ?msg.src().map(|s| s.path_string()), "tag message");
            }
            MessageView::StreamStatus(..) => {
                debug!(src = ?msg.src().map(|s| s.path_string()), "stream status changed");
            }
            _ => {
                trace!(kind = ?msg.type_(), "bus message");
            }
        }
    }
}
