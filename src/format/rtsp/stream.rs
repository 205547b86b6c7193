use bytes::Bytes;
use log::{debug, info, trace, warn};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::client::RTSPClient;
use crate::av::PresentationTime;
use crate::format::rtcp::{
    build_compound, ntp_middle_bits, ntp_to_presentation_time, parse_compound, RTCPPacket,
    ReceptionReport, SDES_CNAME,
};
use crate::format::rtp::{Depacketizer, PresentationClock, RTPPacket, RtpFrame};
use crate::session::BackendEvent;

/// Frames kept for a sink that has not asked for the next one yet.
const MAX_QUEUED_FRAMES: usize = 256;

/// Reception statistics of one RTP source (RFC 3550 appendix A.3 and A.8).
#[derive(Debug, Default)]
pub struct StreamStatistics {
    /// Total number of RTP packets received
    pub packets_received: u32,
    /// Total bytes of payload received
    pub bytes_received: u64,
    /// Interarrival jitter, in timestamp units
    pub jitter: f64,
    /// Last received sequence number
    pub last_seq: u16,
    base_seq: u16,
    cycles: u32,
    started: bool,
    last_transit: Option<i64>,
    expected_prior: u32,
    received_prior: u32,
}

impl StreamStatistics {
    /// Records one packet. `arrival` is the arrival time expressed in the
    /// stream's timestamp units.
    pub fn update(&mut self, seq: u16, timestamp: u32, bytes: usize, arrival: u32) {
        if !self.started {
            self.started = true;
            self.base_seq = seq;
            self.last_seq = seq;
        } else if seq.wrapping_sub(self.last_seq) < 0x8000 {
            if seq < self.last_seq {
                self.cycles += 1 << 16;
            }
            self.last_seq = seq;
        }

        self.packets_received += 1;
        self.bytes_received += bytes as u64;

        let transit = arrival as i64 - timestamp as i64;
        if let Some(last) = self.last_transit {
            let d = (transit - last).abs() as f64;
            self.jitter += (d - self.jitter) / 16.0;
        }
        self.last_transit = Some(transit);
    }

    pub fn extended_highest_seq(&self) -> u32 {
        self.cycles + self.last_seq as u32
    }

    pub fn expected(&self) -> u32 {
        if !self.started {
            return 0;
        }
        self.extended_highest_seq() - self.base_seq as u32 + 1
    }

    /// Cumulative loss; duplicates can make this negative, clamped at zero.
    pub fn packets_lost(&self) -> u32 {
        self.expected().saturating_sub(self.packets_received)
    }

    /// Builds a reception report block and starts a new report interval.
    pub fn reception_report(&mut self, ssrc: u32, last_sr: u32, delay_last_sr: u32) -> ReceptionReport {
        let expected = self.expected();
        let expected_interval = expected.wrapping_sub(self.expected_prior);
        let received_interval = self.packets_received.wrapping_sub(self.received_prior);
        self.expected_prior = expected;
        self.received_prior = self.packets_received;

        let lost_interval = expected_interval.saturating_sub(received_interval);
        let fraction_lost = if expected_interval == 0 || lost_interval == 0 {
            0
        } else {
            ((lost_interval << 8) / expected_interval).min(255) as u8
        };

        ReceptionReport {
            ssrc,
            fraction_lost,
            packets_lost: self.packets_lost().min(0x7F_FFFF),
            highest_seq: self.extended_highest_seq(),
            jitter: self.jitter as u32,
            last_sr,
            delay_last_sr,
        }
    }
}

/// Control messages from the backend to a stream task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamCommand {
    Pull,
    WatchBye(bool),
    Stop,
}

/// Where a stream's packets come from.
pub enum PacketSource {
    Udp {
        rtp: UdpSocket,
        rtcp: UdpSocket,
        /// Server RTCP address, when the SETUP reply named one.
        server_rtcp: Option<SocketAddr>,
    },
    /// Demultiplexed packets of the RTSP connection, tagged `true` for RTCP.
    Interleaved {
        packets: mpsc::UnboundedReceiver<(bool, Bytes)>,
        client: Arc<RTSPClient>,
        rtcp_channel: u8,
    },
}

enum Incoming {
    Rtp(Bytes),
    Rtcp(Bytes),
    Closed,
}

impl PacketSource {
    async fn recv(&mut self, rtp_buf: &mut [u8], rtcp_buf: &mut [u8]) -> Incoming {
        match self {
            PacketSource::Udp { rtp, rtcp, .. } => {
                tokio::select! {
                    r = rtp.recv(rtp_buf) => match r {
                        Ok(n) => Incoming::Rtp(Bytes::copy_from_slice(&rtp_buf[..n])),
                        Err(e) => {
                            warn!("RTP socket error: {}", e);
                            Incoming::Closed
                        }
                    },
                    r = rtcp.recv(rtcp_buf) => match r {
                        Ok(n) => Incoming::Rtcp(Bytes::copy_from_slice(&rtcp_buf[..n])),
                        Err(e) => {
                            warn!("RTCP socket error: {}", e);
                            Incoming::Closed
                        }
                    },
                }
            }
            PacketSource::Interleaved { packets, .. } => match packets.recv().await {
                Some((true, data)) => Incoming::Rtcp(data),
                Some((false, data)) => Incoming::Rtp(data),
                None => Incoming::Closed,
            },
        }
    }

    async fn send_rtcp(&self, data: &[u8]) {
        match self {
            PacketSource::Udp {
                rtcp,
                server_rtcp: Some(addr),
                ..
            } => {
                if let Err(e) = rtcp.send_to(data, addr).await {
                    debug!("Failed to send RTCP to {}: {}", addr, e);
                }
            }
            PacketSource::Udp { .. } => {}
            PacketSource::Interleaved {
                client,
                rtcp_channel,
                ..
            } => {
                if let Err(e) = client.write_interleaved(*rtcp_channel, data).await {
                    debug!("Failed to send interleaved RTCP: {}", e);
                }
            }
        }
    }
}

/// Receive side of one subsession: turns RTP into frames and hands them
/// out one per `Pull`.
pub struct MediaStream {
    index: usize,
    label: String,
    depacketizer: Depacketizer,
    clock: PresentationClock,
    pub statistics: StreamStatistics,
    ssrc: u32,
    remote_ssrc: Option<u32>,
    last_sr: Option<(u32, Instant)>,
    started: Instant,
    frames: VecDeque<(Bytes, PresentationTime)>,
    pending: Vec<RtpFrame>,
    wanted: bool,
    closed: bool,
    bye_armed: bool,
    events: mpsc::UnboundedSender<BackendEvent>,
}

impl MediaStream {
    pub fn new(
        index: usize,
        label: String,
        depacketizer: Depacketizer,
        clock_rate: u32,
        ssrc: u32,
        events: mpsc::UnboundedSender<BackendEvent>,
    ) -> Self {
        Self {
            index,
            label,
            depacketizer,
            clock: PresentationClock::new(clock_rate),
            statistics: StreamStatistics::default(),
            ssrc,
            remote_ssrc: None,
            last_sr: None,
            started: Instant::now(),
            frames: VecDeque::new(),
            pending: Vec::new(),
            wanted: false,
            closed: false,
            bye_armed: false,
            events,
        }
    }

    pub fn set_bye_armed(&mut self, armed: bool) {
        self.bye_armed = armed;
    }

    /// Runs until stopped, or until the backend drops its command sender.
    pub async fn run(
        mut self,
        mut source: PacketSource,
        mut commands: mpsc::UnboundedReceiver<StreamCommand>,
        report_interval: Duration,
    ) {
        let mut reports = tokio::time::interval_at(Instant::now() + report_interval, report_interval);
        let mut rtp_buf = vec![0u8; 65536];
        let mut rtcp_buf = vec![0u8; 2048];

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(StreamCommand::Pull) => {
                        self.wanted = true;
                        self.flush();
                    }
                    Some(StreamCommand::WatchBye(armed)) => self.bye_armed = armed,
                    Some(StreamCommand::Stop) | None => break,
                },
                incoming = source.recv(&mut rtp_buf, &mut rtcp_buf), if !self.closed => match incoming {
                    Incoming::Rtp(data) => self.on_rtp(data),
                    Incoming::Rtcp(data) => self.on_rtcp(&data),
                    Incoming::Closed => {
                        info!("{}: source closed", self.label);
                        self.closed = true;
                        self.flush();
                    }
                },
                _ = reports.tick(), if !self.closed => {
                    if let Some(report) = self.receiver_report() {
                        source.send_rtcp(&report).await;
                    }
                }
            }
        }
        trace!("{}: stream task finished", self.label);
    }

    fn on_rtp(&mut self, data: Bytes) {
        // rtcp-mux: RTCP packet types 200-204 share the RTP port
        if data.len() > 1 && (200..=204).contains(&data[1]) {
            self.on_rtcp(&data);
            return;
        }
        let packet = match RTPPacket::parse(&data) {
            Ok(packet) => packet,
            Err(e) => {
                trace!("{}: dropping RTP packet: {}", self.label, e);
                return;
            }
        };

        self.remote_ssrc.get_or_insert(packet.ssrc);
        let arrival = self.arrival_units();
        self.statistics.update(
            packet.sequence_number,
            packet.timestamp,
            packet.payload.len(),
            arrival,
        );

        self.depacketizer.push(&packet, &mut self.pending);
        let now = PresentationTime::now();
        for frame in self.pending.drain(..) {
            let pts = self.clock.presentation_time(frame.rtp_timestamp, now);
            if self.frames.len() >= MAX_QUEUED_FRAMES {
                warn!("{}: sink is behind, dropping oldest frame", self.label);
                self.frames.pop_front();
            }
            self.frames.push_back((frame.data, pts));
        }
        self.flush();
    }

    fn on_rtcp(&mut self, data: &[u8]) {
        for packet in parse_compound(data) {
            match packet {
                RTCPPacket::SenderReport {
                    ssrc,
                    ntp_timestamp,
                    rtp_timestamp,
                    ..
                } => {
                    if self.remote_ssrc.map_or(true, |remote| remote == ssrc) {
                        self.clock
                            .sync(rtp_timestamp, ntp_to_presentation_time(ntp_timestamp));
                        self.last_sr = Some((ntp_middle_bits(ntp_timestamp), Instant::now()));
                    }
                }
                RTCPPacket::Goodbye { reason, .. } => {
                    info!(
                        "{}: received RTCP BYE{}",
                        self.label,
                        reason.map(|r| format!(" ({})", r)).unwrap_or_default()
                    );
                    if self.bye_armed {
                        self.bye_armed = false;
                        let _ = self.events.send(BackendEvent::RtcpBye {
                            subsession: self.index,
                        });
                    }
                }
                _ => {}
            }
        }
    }

    /// Hands out one frame if the sink asked for it.
    fn flush(&mut self) {
        if !self.wanted {
            return;
        }
        let event = match self.frames.pop_front() {
            Some((data, presentation_time)) => BackendEvent::Frame {
                subsession: self.index,
                data,
                presentation_time,
            },
            None if self.closed => BackendEvent::SourceClosed {
                subsession: self.index,
            },
            None => return,
        };
        self.wanted = false;
        let _ = self.events.send(event);
    }

    fn arrival_units(&self) -> u32 {
        let elapsed = self.started.elapsed().as_secs_f64();
        (elapsed * self.clock_rate() as f64) as u64 as u32
    }

    fn clock_rate(&self) -> u32 {
        self.clock.clock_rate()
    }

    /// RR (plus CNAME) for the current interval; nothing before the first packet.
    fn receiver_report(&mut self) -> Option<Bytes> {
        let remote = self.remote_ssrc?;
        let (last_sr, delay) = match self.last_sr {
            Some((middle, at)) => {
                let delay = at.elapsed().as_secs_f64() * 65536.0;
                (middle, delay as u32)
            }
            None => (0, 0),
        };
        let report = self.statistics.reception_report(remote, last_sr, delay);

        Some(build_compound(&[
            RTCPPacket::ReceiverReport {
                ssrc: self.ssrc,
                reports: vec![report],
            },
            RTCPPacket::SourceDescription {
                chunks: vec![(self.ssrc, vec![(SDES_CNAME, cname())])],
            },
        ]))
    }
}

fn cname() -> String {
    format!("rtsplive@{}", std::process::id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_statistics_update() {
        let mut stats = StreamStatistics::default();

        stats.update(1000, 90000, 1000, 0);
        stats.update(1001, 93000, 1000, 3000);

        assert_eq!(stats.packets_received, 2);
        assert_eq!(stats.bytes_received, 2000);
        assert_eq!(stats.packets_lost(), 0);
        assert_eq!(stats.jitter, 0.0);

        stats.update(1003, 99000, 1000, 9160);
        assert_eq!(stats.packets_lost(), 1);
        assert_eq!(stats.jitter, 10.0);
    }

    #[test]
    fn test_sequence_wrap() {
        let mut stats = StreamStatistics::default();
        stats.update(65534, 0, 10, 0);
        stats.update(65535, 0, 10, 0);
        stats.update(0, 0, 10, 0);
        stats.update(1, 0, 10, 0);
        assert_eq!(stats.extended_highest_seq(), 65537);
        assert_eq!(stats.expected(), 4);
        assert_eq!(stats.packets_lost(), 0);

        // late packet does not move the highest sequence back
        stats.update(65535, 0, 10, 0);
        assert_eq!(stats.extended_highest_seq(), 65537);
    }

    #[test]
    fn test_reception_report() {
        let mut stats = StreamStatistics::default();
        stats.update(1000, 0, 100, 0);
        stats.update(1002, 0, 100, 0);

        let report = stats.reception_report(0x12345678, 0xAABBCCDD, 65536);
        assert_eq!(report.ssrc, 0x12345678);
        assert_eq!(report.fraction_lost, 85); // 1 of 3
        assert_eq!(report.packets_lost, 1);
        assert_eq!(report.highest_seq, 1002);
        assert_eq!(report.last_sr, 0xAABBCCDD);
        assert_eq!(report.delay_last_sr, 65536);

        // nothing lost since the previous report
        stats.update(1003, 0, 100, 0);
        assert_eq!(stats.reception_report(0x12345678, 0, 0).fraction_lost, 0);
    }

    fn stream() -> (MediaStream, mpsc::UnboundedReceiver<BackendEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let stream = MediaStream::new(
            2,
            "video/H264".into(),
            Depacketizer::for_codec("H264", None),
            90_000,
            0x1111,
            tx,
        );
        (stream, rx)
    }

    fn rtp(seq: u16, ts: u32, payload: &'static [u8]) -> Bytes {
        RTPPacket::new(96, seq, ts, 0x2222, true, Bytes::from_static(payload)).to_bytes()
    }

    #[tokio::test]
    async fn test_frames_follow_pulls() {
        let (mut stream, mut rx) = stream();

        stream.on_rtp(rtp(1, 0, &[0x65, 1]));
        stream.on_rtp(rtp(2, 3000, &[0x41, 2]));
        assert!(rx.try_recv().is_err());

        stream.wanted = true;
        stream.flush();
        match rx.try_recv().unwrap() {
            BackendEvent::Frame { subsession, data, .. } => {
                assert_eq!(subsession, 2);
                assert_eq!(&data[..], &[0x65, 1]);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(rx.try_recv().is_err());

        stream.closed = true;
        stream.wanted = true;
        stream.flush();
        assert!(matches!(rx.try_recv().unwrap(), BackendEvent::Frame { .. }));
        stream.wanted = true;
        stream.flush();
        assert_eq!(
            rx.try_recv().unwrap(),
            BackendEvent::SourceClosed { subsession: 2 }
        );
    }

    #[tokio::test]
    async fn test_bye_only_when_armed() {
        let (mut stream, mut rx) = stream();
        let bye = RTCPPacket::Goodbye {
            sources: vec![0x2222],
            reason: None,
        }
        .to_bytes();

        stream.on_rtcp(&bye);
        assert!(rx.try_recv().is_err());

        stream.set_bye_armed(true);
        stream.on_rtcp(&bye);
        assert_eq!(rx.try_recv().unwrap(), BackendEvent::RtcpBye { subsession: 2 });

        // one-shot
        stream.on_rtcp(&bye);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_receiver_report_after_first_packet() {
        let (mut stream, _rx) = stream();
        assert!(stream.receiver_report().is_none());

        stream.on_rtp(rtp(10, 0, &[0x65]));
        let report = stream.receiver_report().unwrap();
        let packets = parse_compound(&report);
        assert_eq!(packets.len(), 2);
        match &packets[0] {
            RTCPPacket::ReceiverReport { ssrc, reports } => {
                assert_eq!(*ssrc, 0x1111);
                assert_eq!(reports[0].ssrc, 0x2222);
                assert_eq!(reports[0].highest_seq, 10);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
