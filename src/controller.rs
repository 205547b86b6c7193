use log::{debug, error, info};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use url::Url;

use crate::av::MediaRecord;
use crate::config::ClientConfig;
use crate::format::rtsp::NetworkBackend;
use crate::session::{MediaBackend, SessionContext, SessionDriver};
use crate::{LiveError, Result};

/// Runs one RTSP session at a time on a background thread.
///
/// `run` returns as soon as the session thread is started; frames reach
/// the callback from that thread. `stop` blocks until the session has been
/// torn down, after which the client can be run again.
///
/// ```rust,no_run
/// use rtsplive::{LiveClient, MediaRecord};
///
/// let client = LiveClient::new();
/// client
///     .run("rtsp://camera.local:554/live", |data: &[u8], record: &MediaRecord| {
///         println!("{} bytes at pts {}", data.len(), record.pts());
///     })
///     .unwrap();
///
/// std::thread::sleep(std::time::Duration::from_secs(10));
/// println!("audio: {}", client.has_audio_stream());
/// client.stop();
/// ```
pub struct LiveClient {
    config: ClientConfig,
    ctx: Arc<SessionContext>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl LiveClient {
    /// Creates a client with [`ClientConfig::new`].
    pub fn new() -> Self {
        Self::with_config(ClientConfig::new())
    }

    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            config,
            ctx: Arc::new(SessionContext::new()),
            worker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Starts streaming `url` over the network.
    ///
    /// # Errors
    ///
    /// - [`LiveError::InvalidUrl`] if the URL is not an `rtsp://` URL
    /// - [`LiveError::AlreadyRunning`] while a previous session is active
    /// - [`LiveError::Resource`] if the runtime or thread cannot be created
    pub fn run<F>(&self, url: &str, callback: F) -> Result<()>
    where
        F: FnMut(&[u8], &MediaRecord) + Send + 'static,
    {
        let url = validate_url(url)?;
        let backend = NetworkBackend::new(&url, self.config.clone())?;
        self.run_with_backend(url.as_str(), backend, callback)
    }

    /// Starts a session on any backend.
    pub fn run_with_backend<B, F>(&self, url: &str, backend: B, callback: F) -> Result<()>
    where
        B: MediaBackend + 'static,
        F: FnMut(&[u8], &MediaRecord) + Send + 'static,
    {
        let url = url.trim_end_matches(&['\r', '\n'][..]);
        if !self.ctx.begin(url) {
            return Err(LiveError::AlreadyRunning);
        }

        // reap the previous thread, which has already finished unwinding
        if let Some(previous) = self.worker.lock().take() {
            let _ = previous.join();
        }

        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                self.ctx.finish();
                return Err(LiveError::Resource(format!("event loop: {}", e)));
            }
        };

        let mut driver = SessionDriver::new(
            backend,
            url,
            self.config.clone(),
            self.ctx.clone(),
            Box::new(callback),
        );
        let ctx = self.ctx.clone();
        let slice = self.config.loop_slice;

        let spawned = std::thread::Builder::new()
            .name("rtsplive-session".into())
            .spawn(move || {
                // declared first so it runs after the driver and runtime drop,
                // on unwind as well
                let _finish = FinishOnExit(ctx.clone());
                let runtime = runtime;
                let mut driver = driver;

                ctx.set_loop_thread(std::thread::current().id());
                runtime.block_on(driver.open());

                while !ctx.stop_requested() && !driver.is_closed() {
                    let _guard = ctx.loop_lock().lock();
                    runtime.block_on(driver.step(slice));
                }

                if !driver.is_closed() {
                    debug!("Stop requested, shutting the session down");
                    let _guard = ctx.loop_lock().lock();
                    runtime.block_on(driver.shutdown());
                }

                drop(driver);
                drop(runtime);
            });

        match spawned {
            Ok(handle) => {
                *self.worker.lock() = Some(handle);
                info!("Started session for {}", url);
                Ok(())
            }
            Err(e) => {
                self.ctx.finish();
                Err(LiveError::Resource(format!("session thread: {}", e)))
            }
        }
    }

    /// Stops the running session and waits until it is fully torn down.
    ///
    /// Returns at once when nothing is running. Called from inside the
    /// callback it only requests the stop.
    pub fn stop(&self) {
        self.ctx.stop_and_wait();

        let on_worker = self
            .worker
            .lock()
            .as_ref()
            .map_or(false, |h| h.thread().id() == std::thread::current().id());
        if !on_worker && !self.ctx.is_active() {
            if let Some(handle) = self.worker.lock().take() {
                let _ = handle.join();
            }
        }
    }

    /// True while a session is running and one of its audio subsessions has
    /// been initiated.
    pub fn has_audio_stream(&self) -> bool {
        self.ctx.has_audio()
    }

    pub fn is_running(&self) -> bool {
        self.ctx.is_active()
    }
}

/// Releases the session context when the session thread exits, so `stop`
/// and later `run` calls never wait on a thread that panicked.
struct FinishOnExit(Arc<SessionContext>);

impl Drop for FinishOnExit {
    fn drop(&mut self) {
        if std::thread::panicking() {
            error!("Session thread panicked, releasing the session");
        }
        self.0.finish();
    }
}

impl Default for LiveClient {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LiveClient {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Checks that `url` is an `rtsp://` URL with a host, ignoring a trailing
/// line break.
pub fn validate_url(url: &str) -> Result<Url> {
    let trimmed = url.trim_end_matches(&['\r', '\n'][..]);
    let parsed = Url::parse(trimmed).map_err(|e| LiveError::InvalidUrl(format!("{}: {}", trimmed, e)))?;

    if !parsed.scheme().eq_ignore_ascii_case("rtsp") {
        return Err(LiveError::InvalidUrl(format!(
            "{}: scheme is not 'rtsp'",
            trimmed
        )));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(LiveError::InvalidUrl(format!("{}: no host", trimmed)));
    }
    Ok(parsed)
}
