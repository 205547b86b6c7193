use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

use super::client::RTSPClient;
use super::connection::{RTSPMessage, RTSPReader};
use super::stream::{MediaStream, PacketSource, StreamCommand};
use super::transport::TransportInfo;
use crate::config::ClientConfig;
use crate::format::rtp::Depacketizer;
use crate::session::{BackendEvent, CommandError, FrameSource, MediaBackend, PlayRange, Subsession};
use crate::{LiveError, Result};

/// Interleaved channel → (stream input, carries RTCP).
type Routes = Arc<Mutex<HashMap<u8, (mpsc::UnboundedSender<(bool, Bytes)>, bool)>>>;

/// Per-subsession receive state, from `initiate` until close.
struct StreamSlot {
    label: String,
    codec: String,
    fmtp: Option<String>,
    clock_rate: u32,
    client_ports: Option<(u16, u16)>,
    sockets: Option<(UdpSocket, UdpSocket)>,
    channels: Option<(u8, u8)>,
    /// Transport from the SETUP reply, written by the request task.
    negotiated: Arc<Mutex<Option<TransportInfo>>>,
    commands: Option<mpsc::UnboundedSender<StreamCommand>>,
    task: Option<JoinHandle<()>>,
    bye_armed: bool,
}

impl StreamSlot {
    fn new(desc: &Subsession) -> Self {
        Self {
            label: desc.label(),
            codec: desc.codec.clone(),
            fmtp: desc.fmtp.clone(),
            clock_rate: desc.clock_rate,
            client_ports: None,
            sockets: None,
            channels: None,
            negotiated: Arc::new(Mutex::new(None)),
            commands: None,
            task: None,
            bye_armed: false,
        }
    }
}

/// [`MediaBackend`] speaking RTSP over TCP with RTP over UDP or interleaved.
///
/// Every request runs as its own task and reports through an unbounded
/// event queue; each subsession gets a receive task once its sink first
/// asks for a frame.
pub struct NetworkBackend {
    client: Arc<RTSPClient>,
    config: ClientConfig,
    events_tx: mpsc::UnboundedSender<BackendEvent>,
    events_rx: mpsc::UnboundedReceiver<BackendEvent>,
    slots: HashMap<usize, StreamSlot>,
    routes: Routes,
    requests: Vec<JoinHandle<()>>,
    teardown: Option<JoinHandle<()>>,
    ssrc: u32,
    closed: bool,
}

impl NetworkBackend {
    pub fn new(url: &Url, config: ClientConfig) -> Result<Self> {
        if url.host_str().map_or(true, str::is_empty) {
            return Err(LiveError::InvalidUrl(format!("{}: no host", url)));
        }
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Self {
            client: Arc::new(RTSPClient::new(url, &config)),
            config,
            events_tx,
            events_rx,
            slots: HashMap::new(),
            routes: Arc::default(),
            requests: Vec::new(),
            teardown: None,
            ssrc: local_ssrc(),
            closed: false,
        })
    }

    pub fn client(&self) -> &RTSPClient {
        &self.client
    }

    fn interleaved_channels(subsession: usize) -> Result<(u8, u8)> {
        u8::try_from(subsession * 2)
            .ok()
            .filter(|base| *base < u8::MAX)
            .map(|base| (base, base + 1))
            .ok_or_else(|| LiveError::Resource("out of interleaved channels".into()))
    }

    /// Starts the subsession's receive task on first use.
    fn stream_commands(&mut self, subsession: usize) -> Option<&mpsc::UnboundedSender<StreamCommand>> {
        let slot = self.slots.get_mut(&subsession)?;

        if slot.task.is_none() {
            let negotiated = slot.negotiated.lock().clone();
            let source = if let Some((rtp, rtcp)) = slot.sockets.take() {
                let server_rtcp = match (
                    self.client.peer_ip(),
                    negotiated.as_ref().and_then(|t| t.server_port_rtcp),
                ) {
                    (Some(ip), Some(port)) => Some(SocketAddr::new(ip, port)),
                    _ => None,
                };
                PacketSource::Udp {
                    rtp,
                    rtcp,
                    server_rtcp,
                }
            } else {
                let (rtp_channel, rtcp_channel) = negotiated
                    .as_ref()
                    .and_then(|t| t.interleaved)
                    .or(slot.channels)?;
                let (tx, rx) = mpsc::unbounded_channel();
                let mut routes = self.routes.lock();
                routes.insert(rtp_channel, (tx.clone(), false));
                routes.insert(rtcp_channel, (tx, true));
                PacketSource::Interleaved {
                    packets: rx,
                    client: self.client.clone(),
                    rtcp_channel,
                }
            };

            let (commands, command_rx) = mpsc::unbounded_channel();
            let mut stream = MediaStream::new(
                subsession,
                slot.label.clone(),
                Depacketizer::for_codec(&slot.codec, slot.fmtp.as_deref()),
                slot.clock_rate,
                self.ssrc,
                self.events_tx.clone(),
            );
            stream.set_bye_armed(slot.bye_armed);
            debug!("{}: starting receive task", slot.label);
            slot.task = Some(tokio::spawn(stream.run(
                source,
                command_rx,
                self.config.receiver_report_interval,
            )));
            slot.commands = Some(commands);
        }

        slot.commands.as_ref()
    }
}

impl FrameSource for NetworkBackend {
    fn request_next_frame(&mut self, subsession: usize) {
        let requested = self
            .stream_commands(subsession)
            .map_or(false, |commands| commands.send(StreamCommand::Pull).is_ok());
        if !requested {
            warn!("Subsession {} has no frame source", subsession);
            let _ = self.events_tx.send(BackendEvent::SourceClosed { subsession });
        }
    }

    fn stop_frames(&mut self, subsession: usize) {
        if let Some(commands) = self
            .slots
            .get_mut(&subsession)
            .and_then(|slot| slot.commands.take())
        {
            let _ = commands.send(StreamCommand::Stop);
        }
    }
}

#[async_trait]
impl MediaBackend for NetworkBackend {
    async fn send_describe(&mut self) -> Result<()> {
        let client = self.client.clone();
        let events = self.events_tx.clone();

        self.requests.push(tokio::spawn(async move {
            let result = match client.connect().await {
                Ok(()) => match client.describe().await {
                    Ok(response) => response.into_command_result(),
                    Err(e) => Err(CommandError::transport(e.to_string())),
                },
                Err(e) => Err(CommandError::transport(e.to_string())),
            };
            let _ = events.send(BackendEvent::DescribeComplete(result));
        }));
        Ok(())
    }

    async fn initiate(&mut self, subsession: usize, desc: &Subsession) -> Result<Option<(u16, u16)>> {
        if desc.codec.is_empty() {
            return Err(LiveError::Protocol(format!(
                "{} subsession has no payload format",
                desc.medium
            )));
        }

        let mut slot = StreamSlot::new(desc);
        if self.config.stream_over_tcp {
            slot.channels = Some(Self::interleaved_channels(subsession)?);
        } else {
            let (rtp, rtcp) = bind_port_pair().await?;
            let ports = (rtp.local_addr()?.port(), rtcp.local_addr()?.port());
            slot.client_ports = Some(ports);
            slot.sockets = Some((rtp, rtcp));
        }

        let ports = slot.client_ports;
        self.slots.insert(subsession, slot);
        Ok(ports)
    }

    async fn send_setup(&mut self, subsession: usize, desc: &Subsession, over_tcp: bool) -> Result<()> {
        let slot = self.slots.get_mut(&subsession).ok_or_else(|| {
            LiveError::Protocol(format!("subsession {} was not initiated", subsession))
        })?;

        let transport = match (over_tcp, slot.client_ports) {
            (false, Some(ports)) => TransportInfo::new_rtp_avp(ports),
            _ => {
                let channels = Self::interleaved_channels(subsession)?;
                slot.channels = Some(channels);
                slot.sockets = None;
                TransportInfo::new_interleaved(channels)
            }
        };

        let client = self.client.clone();
        let events = self.events_tx.clone();
        let negotiated = slot.negotiated.clone();
        let control = desc.control.clone();

        self.requests.push(tokio::spawn(async move {
            let result = match client.setup(&control, &transport).await {
                Ok((response, reply)) => {
                    if response.is_success() {
                        *negotiated.lock() = reply;
                    }
                    response.into_command_result()
                }
                Err(e) => Err(CommandError::transport(e.to_string())),
            };
            let _ = events.send(BackendEvent::SetupComplete { subsession, result });
        }));
        Ok(())
    }

    async fn send_play(&mut self, range: &PlayRange) -> Result<()> {
        let client = self.client.clone();
        let events = self.events_tx.clone();
        let routes = self.routes.clone();
        let header = range.to_header();
        let interleaved = self.slots.values().any(|slot| slot.channels.is_some());

        self.requests.push(tokio::spawn(async move {
            let result = match client.play(&header).await {
                Ok(response) => response.into_command_result(),
                Err(e) => Err(CommandError::transport(e.to_string())),
            };
            let playing = result.is_ok();
            let _ = events.send(BackendEvent::PlayComplete(result));

            if playing && interleaved {
                if let Some(reader) = client.take_reader().await {
                    demux_interleaved(reader, routes).await;
                }
            }
        }));
        Ok(())
    }

    async fn send_teardown(&mut self) -> Result<()> {
        let client = self.client.clone();
        self.teardown = Some(tokio::spawn(async move {
            if let Err(e) = client.teardown().await {
                debug!("TEARDOWN not sent: {}", e);
            }
        }));
        Ok(())
    }

    fn watch_bye(&mut self, subsession: usize, armed: bool) {
        if let Some(slot) = self.slots.get_mut(&subsession) {
            slot.bye_armed = armed;
            if let Some(commands) = slot.commands.as_ref() {
                let _ = commands.send(StreamCommand::WatchBye(armed));
            }
        }
    }

    async fn next_events(&mut self, max_wait: Duration) -> Vec<BackendEvent> {
        let mut events = Vec::new();
        match tokio::time::timeout(max_wait, self.events_rx.recv()).await {
            Ok(Some(event)) => events.push(event),
            Ok(None) | Err(_) => return events,
        }
        while let Ok(event) = self.events_rx.try_recv() {
            events.push(event);
        }
        events
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Some(mut teardown) = self.teardown.take() {
            if tokio::time::timeout(self.config.teardown_timeout, &mut teardown)
                .await
                .is_err()
            {
                warn!(
                    "TEARDOWN still pending after {:?}, dropping it",
                    self.config.teardown_timeout
                );
                teardown.abort();
            }
        }

        let mut tasks = Vec::new();
        for slot in self.slots.values_mut() {
            // dropping the command sender ends the receive task
            slot.commands.take();
            tasks.extend(slot.task.take());
        }
        for request in self.requests.drain(..) {
            request.abort();
            tasks.push(request);
        }
        self.routes.lock().clear();

        let finished = join_all(tasks).await;
        trace!("Joined {} backend tasks", finished.len());

        self.client.shutdown().await;
        self.slots.clear();
    }
}

impl Drop for NetworkBackend {
    fn drop(&mut self) {
        for request in &self.requests {
            request.abort();
        }
        for task in self.slots.values().filter_map(|slot| slot.task.as_ref()) {
            task.abort();
        }
    }
}

/// Routes `$`-framed packets to the receive tasks until the connection ends.
async fn demux_interleaved(mut reader: RTSPReader, routes: Routes) {
    loop {
        match reader.read_message().await {
            Ok(RTSPMessage::Interleaved { channel, data }) => {
                let route = routes.lock().get(&channel).cloned();
                match route {
                    Some((input, is_rtcp)) => {
                        let _ = input.send((is_rtcp, data));
                    }
                    None => trace!("No stream on interleaved channel {}", channel),
                }
            }
            Ok(RTSPMessage::Response(raw)) => {
                debug!(
                    "Ignoring response while streaming:\n{}",
                    String::from_utf8_lossy(&raw)
                );
            }
            Err(e) => {
                info!("RTSP connection ended: {}", e);
                break;
            }
        }
    }
    // dropping the inputs lets every stream report its source closed
    routes.lock().clear();
}

/// Binds an even RTP port and the odd RTCP port above it.
async fn bind_port_pair() -> Result<(UdpSocket, UdpSocket)> {
    for _ in 0..32 {
        let rtp = UdpSocket::bind(("0.0.0.0", 0)).await?;
        let port = rtp.local_addr()?.port();
        if port % 2 != 0 {
            continue;
        }
        match UdpSocket::bind(("0.0.0.0", port + 1)).await {
            Ok(rtcp) => return Ok((rtp, rtcp)),
            Err(e) => trace!("RTCP port {} unavailable: {}", port + 1, e),
        }
    }
    Err(LiveError::Resource("no free RTP/RTCP port pair".into()))
}

fn local_ssrc() -> u32 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or_default();
    nanos ^ std::process::id().rotate_left(16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn backend(config: ClientConfig) -> NetworkBackend {
        let url = Url::parse("rtsp://127.0.0.1:8554/live").unwrap();
        NetworkBackend::new(&url, config).unwrap()
    }

    #[test]
    fn test_channels_per_subsession() {
        assert_eq!(NetworkBackend::interleaved_channels(0).unwrap(), (0, 1));
        assert_eq!(NetworkBackend::interleaved_channels(3).unwrap(), (6, 7));
        assert!(NetworkBackend::interleaved_channels(200).is_err());
    }

    #[tokio::test]
    async fn test_initiate_binds_port_pair() {
        let mut backend = backend(ClientConfig::default());
        let sub = Subsession::new("video", "H264");

        let (rtp, rtcp) = backend.initiate(0, &sub).await.unwrap().unwrap();
        assert_eq!(rtp % 2, 0);
        assert_eq!(rtcp, rtp + 1);
    }

    #[tokio::test]
    async fn test_initiate_over_tcp_needs_no_ports() {
        let mut backend = backend(ClientConfig::default().with_tcp(true));
        let sub = Subsession::new("audio", "PCMA");
        assert_eq!(backend.initiate(1, &sub).await.unwrap(), None);
        assert_eq!(backend.slots[&1].channels, Some((2, 3)));
    }

    #[tokio::test]
    async fn test_initiate_rejects_unknown_format() {
        let mut backend = backend(ClientConfig::default());
        let sub = Subsession::new("video", "");
        assert!(backend.initiate(0, &sub).await.is_err());
    }

    #[tokio::test]
    async fn test_uninitiated_subsession_closes_at_once() {
        let mut backend = backend(ClientConfig::default());
        backend.request_next_frame(4);
        let events = backend.next_events(Duration::from_millis(10)).await;
        assert_eq!(events, vec![BackendEvent::SourceClosed { subsession: 4 }]);
    }

    #[tokio::test]
    async fn test_describe_failure_is_reported() {
        // nothing listens on port 1
        let url = Url::parse("rtsp://127.0.0.1:1/live").unwrap();
        let mut backend = NetworkBackend::new(&url, ClientConfig::default()).unwrap();
        backend.send_describe().await.unwrap();

        let events = backend.next_events(Duration::from_secs(5)).await;
        match events.as_slice() {
            [BackendEvent::DescribeComplete(Err(e))] => assert_eq!(e.code, 0),
            other => panic!("unexpected {:?}", other),
        }
        backend.close().await;
        backend.close().await;
    }
}
