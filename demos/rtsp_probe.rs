use std::error::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use rtsplive::{ClientConfig, LiveClient, MediaRecord};

fn main() -> Result<(), Box<dyn Error>> {
    // usage: rtsp_probe <url> [seconds] [tcp]
    let mut args = std::env::args().skip(1);
    let url = args
        .next()
        .unwrap_or_else(|| "rtsp://example.com/stream".to_string());
    let seconds: u64 = args.next().map(|s| s.parse()).transpose()?.unwrap_or(10);
    let over_tcp = args.next().map_or(false, |s| s == "tcp");

    let config = ClientConfig::new().with_tcp(over_tcp);
    let client = LiveClient::with_config(config);

    let video_frames = Arc::new(AtomicU64::new(0));
    let audio_frames = Arc::new(AtomicU64::new(0));
    let (video, audio) = (video_frames.clone(), audio_frames.clone());

    println!("Connecting to {}", url);
    client.run(&url, move |data: &[u8], record: &MediaRecord| match record {
        MediaRecord::Video(v) => {
            let n = video.fetch_add(1, Ordering::Relaxed);
            if v.keyframe || n % 100 == 0 {
                println!(
                    "video {:?} #{} {} bytes pts={} key={}",
                    v.encoding,
                    n,
                    data.len(),
                    v.pts,
                    v.keyframe
                );
            }
        }
        MediaRecord::Audio(a) => {
            let n = audio.fetch_add(1, Ordering::Relaxed);
            if n % 100 == 0 {
                println!(
                    "audio {:?} #{} {} bytes pts={} {}ch@{}Hz",
                    a.encoding,
                    n,
                    data.len(),
                    a.pts,
                    a.channels,
                    a.sample_rate
                );
            }
        }
    })?;

    for _ in 0..seconds {
        std::thread::sleep(Duration::from_secs(1));
        if !client.is_running() {
            println!("Session ended by the server");
            break;
        }
    }
    println!("Audio stream present: {}", client.has_audio_stream());

    client.stop();
    println!(
        "Received {} video and {} audio frames",
        video_frames.load(Ordering::Relaxed),
        audio_frames.load(Ordering::Relaxed)
    );
    Ok(())
}
