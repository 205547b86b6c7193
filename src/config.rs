use std::env;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use log::{debug, warn};

use crate::{LiveError, Result};

/// Size of each subsession's receive buffer unless configured otherwise.
pub const DEFAULT_RECEIVE_BUFFER_SIZE: usize = 1024 * 1024;

/// Extra time granted after a stream's declared duration before it is torn down.
pub const DEFAULT_DURATION_SLOP: Duration = Duration::from_secs(2);

/// Upper bound of one event-loop slice; a stop request is observed between slices.
pub const DEFAULT_LOOP_SLICE: Duration = Duration::from_millis(50);

const ENV_PREFIX: &str = "RTSPLIVE_";
const CONFIG_PATHS: [&str; 2] = ["./rtsplive.toml", "./rtsplive_config.toml"];

/// What the frame pump's "shutdown requested" flag means for a running session.
///
/// Every delivered frame raises the flag. With `TeardownOnStop` the flag only
/// records that an orchestrated teardown is owed when the session is stopped;
/// with `AfterFirstFrame` the session is shut down right after the first
/// delivered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameShutdownPolicy {
    #[default]
    TeardownOnStop,
    AfterFirstFrame,
}

impl FromStr for FrameShutdownPolicy {
    type Err = LiveError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "teardown_on_stop" | "on_stop" => Ok(Self::TeardownOnStop),
            "after_first_frame" | "first_frame" => Ok(Self::AfterFirstFrame),
            other => Err(LiveError::Parser(format!(
                "unknown shutdown policy '{}'",
                other
            ))),
        }
    }
}

/// Settings for a [`LiveClient`](crate::LiveClient) and its network backend.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Ask the server for RTP interleaved over the RTSP connection instead of UDP.
    pub stream_over_tcp: bool,
    /// Bytes reserved per subsession for the frame being delivered.
    pub receive_buffer_size: usize,
    /// Added to the stream duration when arming the expiry timer.
    pub duration_slop: Duration,
    /// Longest time the event loop waits for work in one slice.
    pub loop_slice: Duration,
    /// See [`FrameShutdownPolicy`].
    pub shutdown_policy: FrameShutdownPolicy,
    /// Sent in the `User-Agent` header of every request.
    pub user_agent: String,
    /// TCP connect timeout for the RTSP connection.
    pub connect_timeout: Duration,
    /// How long closing waits for the TEARDOWN request to be written.
    pub teardown_timeout: Duration,
    /// Period between RTCP receiver reports.
    pub receiver_report_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            stream_over_tcp: false,
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER_SIZE,
            duration_slop: DEFAULT_DURATION_SLOP,
            loop_slice: DEFAULT_LOOP_SLICE,
            shutdown_policy: FrameShutdownPolicy::default(),
            user_agent: format!("rtsplive/{}", env!("CARGO_PKG_VERSION")),
            connect_timeout: Duration::from_secs(10),
            teardown_timeout: Duration::from_secs(1),
            receiver_report_interval: Duration::from_secs(5),
        }
    }
}

impl ClientConfig {
    /// Defaults, overridden by `RTSPLIVE_*` environment variables and then by
    /// the first readable config file in the working directory.
    pub fn new() -> Self {
        let mut config = Self::default().with_env_overrides();

        for path in &CONFIG_PATHS {
            if Path::new(path).exists() {
                match Self::load(path) {
                    Ok(loaded) => {
                        config = loaded;
                        break;
                    }
                    Err(e) => warn!("Ignoring config file {}: {}", path, e),
                }
            }
        }

        config
    }

    /// Applies every `RTSPLIVE_<KEY>` environment variable that is set.
    pub fn with_env_overrides(mut self) -> Self {
        for key in KEYS {
            let var = format!("{}{}", ENV_PREFIX, key.to_ascii_uppercase());
            if let Ok(value) = env::var(&var) {
                if let Err(e) = self.apply(key, &value) {
                    warn!("Ignoring {}: {}", var, e);
                }
            }
        }
        self
    }

    /// Reads a `key = value` file on top of the current environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut content = String::new();
        File::open(path.as_ref())?.read_to_string(&mut content)?;

        let mut config = Self::default().with_env_overrides();
        config.apply_str(&content)?;
        Ok(config)
    }

    /// Applies the settings found in `content`; unknown keys are skipped.
    pub fn apply_str(&mut self, content: &str) -> Result<()> {
        for line in content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }

            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| LiveError::Parser(format!("expected key = value: {}", line)))?;
            let value = value.trim().trim_matches('"').trim_matches('\'');
            self.apply(key.trim(), value)?;
        }
        Ok(())
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "stream_over_tcp" => self.stream_over_tcp = parse_bool(value)?,
            "receive_buffer_size" => self.receive_buffer_size = value.parse()?,
            "duration_slop_secs" => self.duration_slop = Duration::from_secs(value.parse()?),
            "loop_slice_ms" => self.loop_slice = Duration::from_millis(value.parse()?),
            "shutdown_policy" => self.shutdown_policy = value.parse()?,
            "user_agent" => self.user_agent = value.to_string(),
            "connect_timeout_ms" => self.connect_timeout = Duration::from_millis(value.parse()?),
            "teardown_timeout_ms" => self.teardown_timeout = Duration::from_millis(value.parse()?),
            "receiver_report_interval_secs" => {
                self.receiver_report_interval = Duration::from_secs(value.parse()?)
            }
            _ => debug!("Unknown config key '{}'", key),
        }
        Ok(())
    }

    pub fn with_tcp(mut self, enable: bool) -> Self {
        self.stream_over_tcp = enable;
        self
    }

    pub fn with_receive_buffer_size(mut self, size: usize) -> Self {
        self.receive_buffer_size = size;
        self
    }

    pub fn with_duration_slop(mut self, slop: Duration) -> Self {
        self.duration_slop = slop;
        self
    }

    pub fn with_loop_slice(mut self, slice: Duration) -> Self {
        self.loop_slice = slice;
        self
    }

    pub fn with_shutdown_policy(mut self, policy: FrameShutdownPolicy) -> Self {
        self.shutdown_policy = policy;
        self
    }
}

const KEYS: [&str; 9] = [
    "stream_over_tcp",
    "receive_buffer_size",
    "duration_slop_secs",
    "loop_slice_ms",
    "shutdown_policy",
    "user_agent",
    "connect_timeout_ms",
    "teardown_timeout_ms",
    "receiver_report_interval_secs",
];

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(LiveError::Parser(format!("expected a boolean, got '{}'", other))),
    }
}

/// Creates a default config template file if it doesn't exist
pub fn create_default_config_template<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    if !path.as_ref().exists() {
        std::fs::write(path, TEMPLATE)?;
    }
    Ok(())
}

const TEMPLATE: &str = r#"# rtsplive configuration
# Every key can also be set through an RTSPLIVE_<KEY> environment variable.

stream_over_tcp = false
receive_buffer_size = 1048576
duration_slop_secs = 2
loop_slice_ms = 50
# teardown_on_stop | after_first_frame
shutdown_policy = "teardown_on_stop"
connect_timeout_ms = 10000
teardown_timeout_ms = 1000
receiver_report_interval_secs = 5
"#;
