use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::time::Duration;

use super::{PlayRange, Subsession};
use crate::av::PresentationTime;
use crate::Result;

/// Failure reported by the server (or the transport) for one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandError {
    /// RTSP status code, or `0` when the request never got a response.
    pub code: u16,
    pub message: String,
}

impl CommandError {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// A failure with no server status, e.g. a dropped connection.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(0, message)
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.code == 0 {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{} {}", self.code, self.message)
        }
    }
}

impl std::error::Error for CommandError {}

/// Outcome of an asynchronous command; the `Ok` text is the response body
/// (the SDP for DESCRIBE).
pub type CommandResult = std::result::Result<String, CommandError>;

/// Completions and notifications the backend queues for the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    DescribeComplete(CommandResult),
    SetupComplete {
        subsession: usize,
        result: CommandResult,
    },
    PlayComplete(CommandResult),
    /// One frame, delivered only after `request_next_frame` for its subsession.
    Frame {
        subsession: usize,
        data: Bytes,
        presentation_time: PresentationTime,
    },
    /// The subsession's source ended; no more frames follow.
    SourceClosed { subsession: usize },
    /// RTCP BYE received while the handler was armed.
    RtcpBye { subsession: usize },
}

/// Pull side of the per-subsession frame sources.
///
/// Sinks use this to re-arm delivery after each frame.
pub trait FrameSource: Send {
    /// Asks for exactly one more `Frame` (or a `SourceClosed`) event.
    fn request_next_frame(&mut self, subsession: usize);

    /// Stops delivery; outstanding requests are dropped.
    fn stop_frames(&mut self, subsession: usize);
}

/// The media-session library the driver runs on top of.
///
/// Commands return once the request is issued; their results come back
/// through [`MediaBackend::next_events`].
#[async_trait]
pub trait MediaBackend: FrameSource {
    async fn send_describe(&mut self) -> Result<()>;

    /// Prepares receiving for one subsession and returns its client ports
    /// (`None` when the transport needs none, e.g. interleaved TCP).
    async fn initiate(&mut self, subsession: usize, desc: &Subsession) -> Result<Option<(u16, u16)>>;

    async fn send_setup(&mut self, subsession: usize, desc: &Subsession, over_tcp: bool) -> Result<()>;

    async fn send_play(&mut self, range: &PlayRange) -> Result<()>;

    /// Issues TEARDOWN without waiting for a response.
    async fn send_teardown(&mut self) -> Result<()>;

    /// Arms or disarms `RtcpBye` events for a subsession.
    fn watch_bye(&mut self, subsession: usize, armed: bool);

    /// Processes ready work once, waiting at most `max_wait` for the first
    /// event. Must be cancel-safe: dropping the future loses no events.
    async fn next_events(&mut self, max_wait: Duration) -> Vec<BackendEvent>;

    /// Releases the client handle and every background resource.
    async fn close(&mut self);
}
