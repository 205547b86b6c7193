use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::backend::{BackendEvent, CommandResult, MediaBackend};
use super::context::SessionContext;
use super::shutdown::shutdown_session;
use super::sink::{create_sink, SharedCallback};
use super::state::HandshakeState;
use super::{FrameCallback, Session};
use crate::av::PresentationTime;
use crate::config::{ClientConfig, FrameShutdownPolicy};

/// Runs one RTSP session on top of a [`MediaBackend`].
///
/// `open` issues DESCRIBE; every later transition happens inside `step`,
/// which waits for backend events (or the duration timer) for at most one
/// slice and reacts to them.
///
/// ```rust,no_run
/// # use rtsplive::session::{MediaBackend, SessionContext, SessionDriver};
/// # use rtsplive::ClientConfig;
/// # use std::sync::Arc;
/// # async fn drive<B: MediaBackend>(backend: B) {
/// let mut driver = SessionDriver::new(
///     backend,
///     "rtsp://camera.local/live",
///     ClientConfig::default(),
///     Arc::new(SessionContext::new()),
///     Box::new(|data: &[u8], record: &rtsplive::MediaRecord| {
///         println!("{} bytes, pts {}", data.len(), record.pts());
///     }),
/// );
/// driver.open().await;
/// while !driver.is_closed() {
///     driver.step(std::time::Duration::from_millis(50)).await;
/// }
/// # }
/// ```
pub struct SessionDriver<B: MediaBackend> {
    backend: B,
    ctx: Arc<SessionContext>,
    config: ClientConfig,
    callback: SharedCallback,
    log_prefix: String,
    state: HandshakeState,
    session: Option<Session>,
}

enum Wakeup {
    Events(Vec<BackendEvent>),
    DurationElapsed,
}

impl<B: MediaBackend> SessionDriver<B> {
    pub fn new(
        backend: B,
        url: &str,
        config: ClientConfig,
        ctx: Arc<SessionContext>,
        callback: FrameCallback,
    ) -> Self {
        Self {
            backend,
            ctx,
            config,
            callback: Arc::new(Mutex::new(callback)),
            log_prefix: format!("[URL:\"{}\"]: ", url),
            state: HandshakeState::Idle,
            session: None,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.ctx
    }

    /// Issues DESCRIBE. A failure to send shuts the session down.
    pub async fn open(&mut self) {
        if self.state != HandshakeState::Idle {
            return;
        }
        self.state = HandshakeState::AwaitingDescribe;
        if let Err(e) = self.backend.send_describe().await {
            error!("{}Failed to send DESCRIBE: {}", self.log_prefix, e);
            self.shutdown().await;
        }
    }

    /// Runs one bounded slice of the event loop.
    pub async fn step(&mut self, max_wait: Duration) {
        if self.is_closed() {
            return;
        }

        let expiry = self.session.as_ref().and_then(|s| s.expiry);
        let wakeup = match expiry {
            Some(deadline) => tokio::select! {
                events = self.backend.next_events(max_wait) => Wakeup::Events(events),
                _ = tokio::time::sleep_until(deadline) => Wakeup::DurationElapsed,
            },
            None => Wakeup::Events(self.backend.next_events(max_wait).await),
        };

        match wakeup {
            Wakeup::Events(events) => {
                for event in events {
                    self.handle_event(event).await;
                }
            }
            Wakeup::DurationElapsed => {
                info!("{}Stream duration elapsed", self.log_prefix);
                self.shutdown().await;
            }
        }
    }

    /// Steps until the session is closed.
    pub async fn run_until_closed(&mut self) {
        let slice = self.config.loop_slice;
        while !self.is_closed() {
            self.step(slice).await;
        }
    }

    pub async fn handle_event(&mut self, event: BackendEvent) {
        if self.state.is_terminal() {
            debug!("{}Ignoring {:?} after shutdown", self.log_prefix, event);
            return;
        }

        match event {
            BackendEvent::DescribeComplete(result) => self.on_describe_complete(result).await,
            BackendEvent::SetupComplete { subsession, result } => {
                self.on_setup_complete(subsession, result).await
            }
            BackendEvent::PlayComplete(result) => self.on_play_complete(result).await,
            BackendEvent::Frame {
                subsession,
                data,
                presentation_time,
            } => self.on_frame(subsession, &data, presentation_time).await,
            BackendEvent::SourceClosed { subsession } => {
                self.subsession_after_playing(subsession).await
            }
            BackendEvent::RtcpBye { subsession } => self.on_rtcp_bye(subsession).await,
        }
    }

    /// Runs the shutdown orchestrator once; later calls do nothing.
    pub async fn shutdown(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.state = HandshakeState::ShuttingDown;
        shutdown_session(
            &mut self.backend,
            &mut self.session,
            &self.ctx,
            &self.log_prefix,
        )
        .await;
        self.state = HandshakeState::Closed;
    }

    async fn on_describe_complete(&mut self, result: CommandResult) {
        if self.state != HandshakeState::AwaitingDescribe {
            debug!("{}Unexpected DESCRIBE completion in state {}", self.log_prefix, self.state);
            return;
        }

        let sdp = match result {
            Ok(sdp) => sdp,
            Err(e) => {
                error!("{}Failed to get a SDP description: {}", self.log_prefix, e);
                return self.shutdown().await;
            }
        };
        info!("{}Got a SDP description:\n{}", self.log_prefix, sdp);

        let session = match Session::from_sdp(&sdp) {
            Ok(session) => session,
            Err(e) => {
                error!(
                    "{}Failed to create a session from the SDP description: {}",
                    self.log_prefix, e
                );
                return self.shutdown().await;
            }
        };

        if session.subsessions.is_empty() {
            error!(
                "{}This session has no media subsessions (i.e., no \"m=\" lines)",
                self.log_prefix
            );
            self.session = Some(session);
            return self.shutdown().await;
        }

        self.session = Some(session);
        self.setup_next_subsession(0).await;
    }

    /// Initiates subsessions from `start` on until one has its SETUP in
    /// flight; once none are left, PLAY is sent.
    async fn setup_next_subsession(&mut self, start: usize) {
        let mut index = start;

        loop {
            let Some(session) = self.session.as_mut() else {
                return;
            };
            let Some(sub) = session.subsessions.get_mut(index) else {
                break;
            };

            match self.backend.initiate(index, sub).await {
                Err(e) => {
                    error!(
                        "{}Failed to initiate the \"{}\" subsession: {}",
                        self.log_prefix,
                        sub.label(),
                        e
                    );
                }
                Ok(ports) => {
                    sub.client_ports = ports;
                    if sub.is_audio() {
                        self.ctx.mark_audio();
                    }
                    match ports {
                        Some((rtp, rtcp)) => info!(
                            "{}Initiated the \"{}\" subsession (client ports {}-{})",
                            self.log_prefix,
                            sub.label(),
                            rtp,
                            rtcp
                        ),
                        None => info!(
                            "{}Initiated the \"{}\" subsession",
                            self.log_prefix,
                            sub.label()
                        ),
                    }

                    self.state = HandshakeState::AwaitingSetup(index);
                    let over_tcp = self.config.stream_over_tcp;
                    match self.backend.send_setup(index, sub, over_tcp).await {
                        Ok(()) => return,
                        Err(e) => error!(
                            "{}Failed to send SETUP for the \"{}\" subsession: {}",
                            self.log_prefix,
                            sub.label(),
                            e
                        ),
                    }
                }
            }
            index += 1;
        }

        self.start_playing().await;
    }

    async fn on_setup_complete(&mut self, index: usize, result: CommandResult) {
        if self.state != HandshakeState::AwaitingSetup(index) {
            debug!(
                "{}Unexpected SETUP completion for subsession {} in state {}",
                self.log_prefix, index, self.state
            );
            return;
        }

        if let Some(sub) = self
            .session
            .as_mut()
            .and_then(|s| s.subsessions.get_mut(index))
        {
            match result {
                Err(e) => error!(
                    "{}Failed to set up the \"{}\" subsession: {}",
                    self.log_prefix,
                    sub.label(),
                    e
                ),
                Ok(_) => {
                    info!("{}Set up the \"{}\" subsession", self.log_prefix, sub.label());

                    match create_sink(
                        sub,
                        self.config.receive_buffer_size,
                        self.callback.clone(),
                        self.ctx.clone(),
                    ) {
                        Ok(mut sink) => {
                            info!(
                                "{}Created a data sink for the \"{}\" subsession",
                                self.log_prefix,
                                sub.label()
                            );
                            sink.continue_pull(index, &mut self.backend);
                            sub.sink = Some(sink);
                            self.backend.watch_bye(index, true);
                            sub.bye_armed = true;
                        }
                        Err(e) => error!(
                            "{}Failed to create a data sink for the \"{}\" subsession: {}",
                            self.log_prefix,
                            sub.label(),
                            e
                        ),
                    }
                }
            }
        }

        self.setup_next_subsession(index + 1).await;
    }

    async fn start_playing(&mut self) {
        let Some(range) = self.session.as_ref().map(Session::play_range) else {
            return self.shutdown().await;
        };

        self.state = HandshakeState::AwaitingPlay;
        if let Err(e) = self.backend.send_play(&range).await {
            error!("{}Failed to send PLAY: {}", self.log_prefix, e);
            self.shutdown().await;
        }
    }

    async fn on_play_complete(&mut self, result: CommandResult) {
        if self.state != HandshakeState::AwaitingPlay {
            debug!("{}Unexpected PLAY completion in state {}", self.log_prefix, self.state);
            return;
        }

        if let Err(e) = result {
            error!("{}Failed to start playing session: {}", self.log_prefix, e);
            return self.shutdown().await;
        }

        self.state = HandshakeState::Streaming;
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let duration = session.play_range().duration();
        if duration > 0.0 {
            let expiry = Duration::try_from_secs_f64(duration)
                .ok()
                .and_then(|d| d.checked_add(self.config.duration_slop))
                .and_then(|timeout| Instant::now().checked_add(timeout));
            match expiry {
                Some(at) => {
                    session.expiry = Some(at);
                    info!(
                        "{}Started playing session (for up to {} seconds)...",
                        self.log_prefix, duration
                    );
                }
                None => warn!(
                    "{}Started playing session (ignoring unusable duration {} seconds)...",
                    self.log_prefix, duration
                ),
            }
        } else {
            info!("{}Started playing session...", self.log_prefix);
        }
    }

    async fn on_frame(&mut self, index: usize, data: &[u8], presentation_time: PresentationTime) {
        let Some(sub) = self
            .session
            .as_mut()
            .and_then(|s| s.subsessions.get_mut(index))
        else {
            return;
        };
        let Some(sink) = sub.sink.as_mut() else {
            debug!("{}Frame for inactive subsession {} dropped", self.log_prefix, index);
            return;
        };

        sink.on_frame(index, data, presentation_time, &mut self.backend);

        if self.config.shutdown_policy == FrameShutdownPolicy::AfterFirstFrame
            && self.ctx.shutdown_requested()
        {
            info!("{}Frame delivered, ending the session", self.log_prefix);
            self.shutdown().await;
        }
    }

    async fn on_rtcp_bye(&mut self, index: usize) {
        let Some(sub) = self
            .session
            .as_ref()
            .and_then(|s| s.subsessions.get(index))
        else {
            return;
        };
        if !sub.bye_armed {
            return;
        }

        info!(
            "{}Received RTCP \"BYE\" on \"{}\" subsession",
            self.log_prefix,
            sub.label()
        );
        self.subsession_after_playing(index).await;
    }

    /// Ends one subsession; the session shuts down once none is left.
    async fn subsession_after_playing(&mut self, index: usize) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let Some(sub) = session.subsessions.get_mut(index) else {
            return;
        };

        if let Some(mut sink) = sub.sink.take() {
            sink.on_close(index, &mut self.backend);
            debug!("{}Closed the \"{}\" subsession", self.log_prefix, sub.label());
        }
        if sub.bye_armed {
            self.backend.watch_bye(index, false);
            sub.bye_armed = false;
        }

        if session.has_active_sinks() {
            return;
        }
        self.shutdown().await;
    }
}
