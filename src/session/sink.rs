use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::TryReserveError;
use std::sync::Arc;

use super::backend::FrameSource;
use super::context::SessionContext;
use super::{FrameCallback, Subsession};
use crate::av::{classify_audio, classify_video, MediaRecord, PresentationTime, StreamParams};
use crate::{LiveError, Result};

/// The application callback, shared by every sink of a session.
pub type SharedCallback = Arc<Mutex<FrameCallback>>;

/// Per-subsession frame consumer.
///
/// A sink keeps exactly one frame request outstanding: `continue_pull`
/// issues the first, each `on_frame` issues the next, `on_close` stops.
pub trait MediaSink: Send + Sync {
    /// `medium/codec` of the subsession the sink serves.
    fn label(&self) -> &str;

    fn continue_pull(&mut self, subsession: usize, source: &mut dyn FrameSource);

    /// Handles one frame and re-arms the next pull.
    fn on_frame(
        &mut self,
        subsession: usize,
        data: &[u8],
        presentation_time: PresentationTime,
        source: &mut dyn FrameSource,
    );

    fn on_close(&mut self, subsession: usize, source: &mut dyn FrameSource);
}

/// State every sink kind shares.
struct SinkCore {
    label: String,
    codec: String,
    params: StreamParams,
    buffer: Vec<u8>,
    capacity: usize,
    callback: SharedCallback,
    ctx: Arc<SessionContext>,
}

impl SinkCore {
    fn new(
        sub: &Subsession,
        capacity: usize,
        callback: SharedCallback,
        ctx: Arc<SessionContext>,
    ) -> std::result::Result<Self, TryReserveError> {
        let mut buffer = Vec::new();
        buffer.try_reserve_exact(capacity)?;
        Ok(Self {
            label: sub.label(),
            codec: sub.codec.clone(),
            params: sub.stream_params(),
            buffer,
            capacity,
            callback,
            ctx,
        })
    }

    /// Copies the frame into the receive buffer, truncating oversized ones.
    fn receive(&mut self, data: &[u8]) {
        let len = if data.len() > self.capacity {
            warn!(
                "{}: received frame of {} bytes exceeds the {} byte buffer, truncating",
                self.label,
                data.len(),
                self.capacity
            );
            self.capacity
        } else {
            data.len()
        };
        self.buffer.clear();
        self.buffer.extend_from_slice(&data[..len]);
    }

    fn deliver(&self, record: Option<MediaRecord>) {
        match record {
            Some(record) => {
                let mut callback = self.callback.lock();
                (*callback)(&self.buffer, &record);
            }
            None => debug!("{}: dropping unclassified frame", self.label),
        }
    }

    /// Marks the frame as handled and asks for the next one.
    fn finish_frame(&self, subsession: usize, source: &mut dyn FrameSource) {
        self.ctx.request_shutdown();
        let _guard = self.ctx.loop_lock().lock();
        source.request_next_frame(subsession);
    }
}

/// Sink for `video` subsessions.
pub struct VideoSink {
    core: SinkCore,
}

impl MediaSink for VideoSink {
    fn label(&self) -> &str {
        &self.core.label
    }

    fn continue_pull(&mut self, subsession: usize, source: &mut dyn FrameSource) {
        source.request_next_frame(subsession);
    }

    fn on_frame(
        &mut self,
        subsession: usize,
        data: &[u8],
        presentation_time: PresentationTime,
        source: &mut dyn FrameSource,
    ) {
        self.core.receive(data);
        let core = &self.core;
        let record = classify_video(&core.codec, &core.buffer, presentation_time, &core.params);
        self.core.deliver(record);
        self.core.finish_frame(subsession, source);
    }

    fn on_close(&mut self, subsession: usize, source: &mut dyn FrameSource) {
        source.stop_frames(subsession);
    }
}

/// Sink for `audio` subsessions.
pub struct AudioSink {
    core: SinkCore,
}

impl MediaSink for AudioSink {
    fn label(&self) -> &str {
        &self.core.label
    }

    fn continue_pull(&mut self, subsession: usize, source: &mut dyn FrameSource) {
        source.request_next_frame(subsession);
    }

    fn on_frame(
        &mut self,
        subsession: usize,
        data: &[u8],
        presentation_time: PresentationTime,
        source: &mut dyn FrameSource,
    ) {
        self.core.receive(data);
        let record = classify_audio(&self.core.codec, presentation_time, &self.core.params);
        self.core.deliver(record);
        self.core.finish_frame(subsession, source);
    }

    fn on_close(&mut self, subsession: usize, source: &mut dyn FrameSource) {
        source.stop_frames(subsession);
    }
}

/// Sink for any other medium: frames are pulled and dropped.
pub struct DiscardSink {
    core: SinkCore,
}

impl MediaSink for DiscardSink {
    fn label(&self) -> &str {
        &self.core.label
    }

    fn continue_pull(&mut self, subsession: usize, source: &mut dyn FrameSource) {
        source.request_next_frame(subsession);
    }

    fn on_frame(
        &mut self,
        subsession: usize,
        data: &[u8],
        _presentation_time: PresentationTime,
        source: &mut dyn FrameSource,
    ) {
        self.core.receive(data);
        self.core.deliver(None);
        self.core.finish_frame(subsession, source);
    }

    fn on_close(&mut self, subsession: usize, source: &mut dyn FrameSource) {
        source.stop_frames(subsession);
    }
}

/// Builds the sink for a subsession, picked by its medium.
///
/// Fails with [`LiveError::Resource`] when the receive buffer cannot be
/// allocated.
pub fn create_sink(
    sub: &Subsession,
    buffer_size: usize,
    callback: SharedCallback,
    ctx: Arc<SessionContext>,
) -> Result<Box<dyn MediaSink>> {
    let core = SinkCore::new(sub, buffer_size, callback, ctx).map_err(|e| {
        LiveError::Resource(format!(
            "{} byte receive buffer for {}: {}",
            buffer_size,
            sub.label(),
            e
        ))
    })?;

    let sink: Box<dyn MediaSink> = if sub.medium.eq_ignore_ascii_case("video") {
        Box::new(VideoSink { core })
    } else if sub.is_audio() {
        Box::new(AudioSink { core })
    } else {
        Box::new(DiscardSink { core })
    };
    Ok(sink)
}
