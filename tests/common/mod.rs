#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use rtsplive::av::PresentationTime;
use rtsplive::session::{
    BackendEvent, CommandError, FrameSource, MediaBackend, PlayRange, Subsession,
};
use rtsplive::{LiveError, Result};

/// Everything the driver asked the backend to do, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Describe,
    Initiate(usize),
    Setup(usize, bool),
    Play(String),
    Teardown,
    WatchBye(usize, bool),
    Pull(usize),
    Stop(usize),
    Close,
}

pub type CallLog = Arc<Mutex<Vec<Call>>>;

/// What the scripted server answers.
#[derive(Debug, Default)]
pub struct Script {
    /// DESCRIBE body; `None` fails DESCRIBE with 404.
    pub sdp: Option<String>,
    pub fail_initiate: HashSet<usize>,
    pub fail_setup: HashSet<usize>,
    pub play_error: Option<CommandError>,
    /// Frames handed out one per pull, by subsession.
    pub frames: HashMap<usize, VecDeque<Vec<u8>>>,
    /// Report `SourceClosed` once a subsession's frames run out.
    pub close_when_drained: bool,
}

impl Script {
    pub fn with_sdp(sdp: &str) -> Self {
        Self {
            sdp: Some(sdp.to_string()),
            ..Self::default()
        }
    }

    pub fn frames(mut self, subsession: usize, frames: &[&[u8]]) -> Self {
        self.frames
            .entry(subsession)
            .or_default()
            .extend(frames.iter().map(|f| f.to_vec()));
        self
    }

    pub fn closing(mut self) -> Self {
        self.close_when_drained = true;
        self
    }
}

/// In-memory [`MediaBackend`] answering from a [`Script`].
pub struct MockBackend {
    script: Script,
    calls: CallLog,
    queue: VecDeque<BackendEvent>,
    delivered: u32,
}

impl MockBackend {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            calls: CallLog::default(),
            queue: VecDeque::new(),
            delivered: 0,
        }
    }

    pub fn calls(&self) -> CallLog {
        self.calls.clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

impl FrameSource for MockBackend {
    fn request_next_frame(&mut self, subsession: usize) {
        self.record(Call::Pull(subsession));
        let next = self
            .script
            .frames
            .get_mut(&subsession)
            .and_then(VecDeque::pop_front);

        match next {
            Some(frame) => {
                self.delivered += 1;
                self.queue.push_back(BackendEvent::Frame {
                    subsession,
                    data: Bytes::from(frame),
                    presentation_time: PresentationTime::new(1_000, self.delivered * 40_000),
                });
            }
            None if self.script.close_when_drained => {
                self.queue.push_back(BackendEvent::SourceClosed { subsession });
            }
            None => {}
        }
    }

    fn stop_frames(&mut self, subsession: usize) {
        self.record(Call::Stop(subsession));
    }
}

#[async_trait]
impl MediaBackend for MockBackend {
    async fn send_describe(&mut self) -> Result<()> {
        self.record(Call::Describe);
        let result = match &self.script.sdp {
            Some(sdp) => Ok(sdp.clone()),
            None => Err(CommandError::new(404, "Not Found")),
        };
        self.queue.push_back(BackendEvent::DescribeComplete(result));
        Ok(())
    }

    async fn initiate(&mut self, subsession: usize, _desc: &Subsession) -> Result<Option<(u16, u16)>> {
        self.record(Call::Initiate(subsession));
        if self.script.fail_initiate.contains(&subsession) {
            return Err(LiveError::Protocol("no payload format".into()));
        }
        let base = 50_000 + subsession as u16 * 2;
        Ok(Some((base, base + 1)))
    }

    async fn send_setup(&mut self, subsession: usize, _desc: &Subsession, over_tcp: bool) -> Result<()> {
        self.record(Call::Setup(subsession, over_tcp));
        let result = if self.script.fail_setup.contains(&subsession) {
            Err(CommandError::new(461, "Unsupported Transport"))
        } else {
            Ok(String::new())
        };
        self.queue
            .push_back(BackendEvent::SetupComplete { subsession, result });
        Ok(())
    }

    async fn send_play(&mut self, range: &PlayRange) -> Result<()> {
        self.record(Call::Play(range.to_header()));
        let result = match self.script.play_error.clone() {
            Some(e) => Err(e),
            None => Ok(String::new()),
        };
        self.queue.push_back(BackendEvent::PlayComplete(result));
        Ok(())
    }

    async fn send_teardown(&mut self) -> Result<()> {
        self.record(Call::Teardown);
        Ok(())
    }

    fn watch_bye(&mut self, subsession: usize, armed: bool) {
        self.record(Call::WatchBye(subsession, armed));
    }

    async fn next_events(&mut self, max_wait: Duration) -> Vec<BackendEvent> {
        if self.queue.is_empty() {
            tokio::time::sleep(max_wait).await;
            return Vec::new();
        }
        self.queue.drain(..).collect()
    }

    async fn close(&mut self) {
        self.record(Call::Close);
    }
}

pub const VIDEO_AUDIO_SDP: &str = "v=0\r
o=- 0 0 IN IP4 127.0.0.1\r
s=camera\r
t=0 0\r
a=control:*\r
m=video 0 RTP/AVP 96\r
a=rtpmap:96 H264/90000\r
a=fmtp:96 packetization-mode=1;sprop-parameter-sets=Z0IAH5WoFAFuQA==,aM48gA==\r
a=control:trackID=0\r
m=audio 0 RTP/AVP 97\r
a=rtpmap:97 MPEG4-GENERIC/44100/2\r
a=fmtp:97 streamtype=5;profile-level-id=15;mode=AAC-hbr;config=1210;sizelength=13;indexlength=3;indexdeltalength=3\r
a=control:trackID=1\r
";

pub const VIDEO_ONLY_SDP: &str = "v=0\r
o=- 0 0 IN IP4 127.0.0.1\r
s=camera\r
t=0 0\r
m=video 0 RTP/AVP 96\r
a=rtpmap:96 H264/90000\r
a=control:trackID=0\r
";

pub const NO_MEDIA_SDP: &str = "v=0\r
o=- 0 0 IN IP4 127.0.0.1\r
s=empty\r
t=0 0\r
";

pub fn count(calls: &CallLog, call: &Call) -> usize {
    calls.lock().iter().filter(|c| *c == call).count()
}
