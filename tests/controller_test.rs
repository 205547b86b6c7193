mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{count, Call, MockBackend, Script, VIDEO_AUDIO_SDP, VIDEO_ONLY_SDP};
use rtsplive::{ClientConfig, LiveClient, LiveError, MediaRecord};

const URL: &str = "rtsp://127.0.0.1:8554/live\n";

fn client() -> LiveClient {
    LiveClient::with_config(ClientConfig::default().with_loop_slice(Duration::from_millis(5)))
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn counting_callback() -> (Arc<AtomicUsize>, impl FnMut(&[u8], &MediaRecord) + Send + 'static) {
    let frames = Arc::new(AtomicUsize::new(0));
    let seen = frames.clone();
    (frames, move |_: &[u8], _: &MediaRecord| {
        seen.fetch_add(1, Ordering::SeqCst);
    })
}

#[test]
fn test_run_and_stop() {
    let client = client();
    let backend = MockBackend::new(
        Script::with_sdp(VIDEO_AUDIO_SDP).frames(0, &[&[0x65, 0x88], &[0x41, 0x9a]]),
    );
    let calls = backend.calls();
    let (frames, callback) = counting_callback();

    client.run_with_backend(URL, backend, callback).unwrap();
    assert!(wait_until(|| frames.load(Ordering::SeqCst) == 2 && client.has_audio_stream()));
    assert!(client.is_running());

    let second = client.run_with_backend(URL, MockBackend::new(Script::default()), |_: &[u8], _: &MediaRecord| {});
    assert!(matches!(second, Err(LiveError::AlreadyRunning)));

    client.stop();
    assert!(!client.is_running());
    assert!(!client.has_audio_stream());
    assert_eq!(count(&calls, &Call::Teardown), 1);
    assert_eq!(count(&calls, &Call::Close), 1);

    // stopping again is a no-op
    client.stop();
    assert_eq!(count(&calls, &Call::Close), 1);
}

#[test]
fn test_client_can_run_again() {
    let client = client();

    for _ in 0..2 {
        let backend = MockBackend::new(Script::with_sdp(VIDEO_ONLY_SDP).frames(0, &[&[0x65]]));
        let calls = backend.calls();
        let (frames, callback) = counting_callback();

        client.run_with_backend(URL, backend, callback).unwrap();
        assert!(wait_until(|| frames.load(Ordering::SeqCst) == 1));
        assert!(!client.has_audio_stream());
        client.stop();
        assert_eq!(count(&calls, &Call::Teardown), 1);
    }
}

#[test]
fn test_session_ending_on_its_own() {
    let client = client();
    let backend = MockBackend::new(Script::with_sdp(VIDEO_ONLY_SDP).frames(0, &[&[0x65]]).closing());
    let calls = backend.calls();
    let (frames, callback) = counting_callback();

    client.run_with_backend(URL, backend, callback).unwrap();
    assert!(wait_until(|| !client.is_running()));
    assert_eq!(frames.load(Ordering::SeqCst), 1);
    assert_eq!(count(&calls, &Call::Close), 1);

    client.stop();
    let (_, callback) = counting_callback();
    client
        .run_with_backend(URL, MockBackend::new(Script::with_sdp(VIDEO_ONLY_SDP)), callback)
        .unwrap();
    client.stop();
}

#[test]
fn test_describe_failure_ends_session() {
    let client = client();
    let backend = MockBackend::new(Script::default());
    let calls = backend.calls();

    client
        .run_with_backend(URL, backend, |_: &[u8], _: &MediaRecord| {})
        .unwrap();
    assert!(wait_until(|| !client.is_running()));
    assert_eq!(*calls.lock(), vec![Call::Describe, Call::Close]);
}

#[test]
fn test_stop_from_callback() {
    let client = Arc::new(client());
    let backend = MockBackend::new(
        Script::with_sdp(VIDEO_ONLY_SDP).frames(0, &[&[0x65], &[0x41], &[0x41]]),
    );
    let calls = backend.calls();
    let frames = Arc::new(AtomicUsize::new(0));

    let handle = client.clone();
    let seen = frames.clone();
    client
        .run_with_backend(URL, backend, move |_: &[u8], _: &MediaRecord| {
            seen.fetch_add(1, Ordering::SeqCst);
            // only requests the stop; returns without waiting
            handle.stop();
        })
        .unwrap();

    assert!(wait_until(|| !client.is_running()));
    assert!(frames.load(Ordering::SeqCst) >= 1);
    assert_eq!(count(&calls, &Call::Teardown), 1);
}

#[test]
fn test_panicking_callback_releases_client() {
    let client = client();
    let backend = MockBackend::new(Script::with_sdp(VIDEO_ONLY_SDP).frames(0, &[&[0x65]]));

    client
        .run_with_backend(URL, backend, |_: &[u8], _: &MediaRecord| {
            panic!("callback failure");
        })
        .unwrap();

    assert!(wait_until(|| !client.is_running()));
    // returns instead of waiting on the dead thread
    client.stop();
    assert!(!client.has_audio_stream());

    let backend = MockBackend::new(Script::with_sdp(VIDEO_ONLY_SDP).frames(0, &[&[0x65]]));
    let (frames, callback) = counting_callback();
    client.run_with_backend(URL, backend, callback).unwrap();
    assert!(wait_until(|| frames.load(Ordering::SeqCst) == 1));
    client.stop();
}

#[test]
fn test_huge_stream_duration_keeps_session_alive() {
    let client = client();
    let sdp = format!("{}a=range:npt=0-1e20\r\n", VIDEO_ONLY_SDP);
    let backend = MockBackend::new(Script::with_sdp(&sdp).frames(0, &[&[0x65]]));
    let calls = backend.calls();
    let (frames, callback) = counting_callback();

    client.run_with_backend(URL, backend, callback).unwrap();
    assert!(wait_until(|| frames.load(Ordering::SeqCst) == 1));
    assert!(client.is_running());

    client.stop();
    assert!(!client.is_running());
    assert_eq!(count(&calls, &Call::Teardown), 1);
}
