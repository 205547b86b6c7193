use parking_lot::{Condvar, Mutex, ReentrantMutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::ThreadId;

/// The running client, as published to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHandle {
    pub url: String,
}

impl ClientHandle {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
        }
    }
}

/// Lock-protected part of the lifecycle.
#[derive(Debug, Default)]
pub struct LifecycleState {
    /// Present from `run` until the session is shut down.
    pub handle: Option<ClientHandle>,
    /// True while the background thread has not finished unwinding.
    pub loop_active: bool,
    /// Background thread, so `stop()` from the callback does not wait on itself.
    pub loop_thread: Option<ThreadId>,
}

/// State shared between the controller, the background thread and the sinks.
///
/// One context lives as long as its controller and is reset after every run.
#[derive(Debug, Default)]
pub struct SessionContext {
    stop_requested: AtomicBool,
    shutdown_requested: AtomicBool,
    has_audio: AtomicBool,
    state: Mutex<LifecycleState>,
    stopped: Condvar,
    /// Held for each event-loop slice and each post-frame re-arm.
    loop_lock: ReentrantMutex<()>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn loop_lock(&self) -> &ReentrantMutex<()> {
        &self.loop_lock
    }

    pub fn state(&self) -> &Mutex<LifecycleState> {
        &self.state
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Set by the sinks after every delivered frame.
    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    pub fn mark_audio(&self) {
        self.has_audio.store(true, Ordering::SeqCst);
    }

    /// True while a session is published and one of its audio subsessions
    /// has been initiated.
    pub fn has_audio(&self) -> bool {
        let state = self.state.lock();
        state.handle.is_some() && self.has_audio.load(Ordering::SeqCst)
    }

    /// Marks the loop as starting for `url`. Returns false if one is active.
    pub fn begin(&self, url: &str) -> bool {
        let mut state = self.state.lock();
        if state.loop_active {
            return false;
        }
        self.stop_requested.store(false, Ordering::SeqCst);
        self.shutdown_requested.store(false, Ordering::SeqCst);
        self.has_audio.store(false, Ordering::SeqCst);
        state.handle = Some(ClientHandle::new(url));
        state.loop_active = true;
        state.loop_thread = None;
        true
    }

    pub fn set_loop_thread(&self, id: ThreadId) {
        self.state.lock().loop_thread = Some(id);
    }

    /// Drops the published handle; `has_audio` reads false from here on.
    pub fn release_handle(&self) {
        let mut state = self.state.lock();
        state.handle = None;
        self.has_audio.store(false, Ordering::SeqCst);
    }

    /// Clears every flag and wakes `stop()` waiters.
    pub fn finish(&self) {
        let mut state = self.state.lock();
        state.handle = None;
        state.loop_active = false;
        state.loop_thread = None;
        self.stop_requested.store(false, Ordering::SeqCst);
        self.shutdown_requested.store(false, Ordering::SeqCst);
        self.has_audio.store(false, Ordering::SeqCst);
        self.stopped.notify_all();
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().loop_active
    }

    /// Requests a stop and blocks until the loop has unwound.
    ///
    /// Returns at once when idle, or when called from the loop thread itself
    /// (the stop is then observed after the current slice).
    pub fn stop_and_wait(&self) {
        let mut state = self.state.lock();
        if !state.loop_active {
            return;
        }
        self.stop_requested.store(true, Ordering::SeqCst);
        if state.loop_thread == Some(std::thread::current().id()) {
            return;
        }
        while state.loop_active {
            self.stopped.wait(&mut state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_begin_is_exclusive() {
        let ctx = SessionContext::new();
        assert!(ctx.begin("rtsp://a/"));
        assert!(!ctx.begin("rtsp://b/"));
        ctx.finish();
        assert!(ctx.begin("rtsp://b/"));
    }

    #[test]
    fn test_has_audio_needs_handle() {
        let ctx = SessionContext::new();
        ctx.mark_audio();
        assert!(!ctx.has_audio());

        ctx.begin("rtsp://cam/");
        ctx.mark_audio();
        assert!(ctx.has_audio());

        ctx.release_handle();
        assert!(!ctx.has_audio());
    }

    #[test]
    fn test_stop_waits_for_finish() {
        let ctx = Arc::new(SessionContext::new());
        ctx.begin("rtsp://cam/");

        let worker = {
            let ctx = ctx.clone();
            std::thread::spawn(move || {
                ctx.set_loop_thread(std::thread::current().id());
                while !ctx.stop_requested() {
                    std::thread::sleep(Duration::from_millis(5));
                }
                ctx.finish();
            })
        };

        ctx.stop_and_wait();
        assert!(!ctx.is_active());
        assert!(!ctx.stop_requested());
        worker.join().unwrap();
    }

    #[test]
    fn test_stop_when_idle_returns() {
        let ctx = SessionContext::new();
        ctx.stop_and_wait();
        assert!(!ctx.stop_requested());
    }
}
