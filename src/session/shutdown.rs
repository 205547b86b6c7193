use log::{info, warn};

use super::backend::MediaBackend;
use super::context::SessionContext;
use super::Session;

/// Tears the session down: closes live sinks, disarms BYE handlers, sends
/// TEARDOWN if anything was streaming, releases the backend and the
/// published handle, then drops the session (and with it the expiry timer).
///
/// Returns whether TEARDOWN was sent. The driver calls it at most once per
/// session; a second call finds no session and sends nothing.
pub async fn shutdown_session<B>(
    backend: &mut B,
    session: &mut Option<Session>,
    ctx: &SessionContext,
    log_prefix: &str,
) -> bool
where
    B: MediaBackend,
{
    let mut was_active = false;

    if let Some(session) = session.as_mut() {
        for (index, sub) in session.subsessions.iter_mut().enumerate() {
            if let Some(mut sink) = sub.sink.take() {
                sink.on_close(index, backend);
                was_active = true;
            }
            if sub.bye_armed {
                backend.watch_bye(index, false);
                sub.bye_armed = false;
            }
        }

        if was_active {
            if let Err(e) = backend.send_teardown().await {
                warn!("{}Failed to send TEARDOWN: {}", log_prefix, e);
            }
        }
    }

    info!("{}Closing the stream.", log_prefix);
    backend.close().await;
    *session = None;
    ctx.release_handle();
    was_active
}
