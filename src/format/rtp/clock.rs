use crate::av::PresentationTime;

/// Maps RTP timestamps of one subsession onto wall-clock time.
///
/// Until a sender report arrives the first packet is anchored at the local
/// receive time; afterwards the sender's NTP/RTP pair is used, so audio and
/// video from the same sender line up.
#[derive(Debug, Clone)]
pub struct PresentationClock {
    clock_rate: u32,
    anchor: Option<PresentationTime>,
    /// Last timestamp seen and its distance in ticks from the anchor.
    last_ts: u32,
    extended: i64,
    synchronized: bool,
}

impl PresentationClock {
    pub fn new(clock_rate: u32) -> Self {
        Self {
            clock_rate: clock_rate.max(1),
            anchor: None,
            last_ts: 0,
            extended: 0,
            synchronized: false,
        }
    }

    pub fn clock_rate(&self) -> u32 {
        self.clock_rate
    }

    /// True once a sender report has been applied.
    pub fn is_synchronized(&self) -> bool {
        self.synchronized
    }

    /// Applies the NTP/RTP pair from an RTCP sender report.
    pub fn sync(&mut self, rtp_timestamp: u32, wall: PresentationTime) {
        self.anchor = Some(wall);
        self.last_ts = rtp_timestamp;
        self.extended = 0;
        self.synchronized = true;
    }

    /// Presentation time of `rtp_timestamp`, anchoring at `now` on first use.
    pub fn presentation_time(&mut self, rtp_timestamp: u32, now: PresentationTime) -> PresentationTime {
        let anchor_wall = match self.anchor {
            Some(wall) => wall,
            None => {
                self.anchor = Some(now);
                self.last_ts = rtp_timestamp;
                self.extended = 0;
                now
            }
        };
        // signed 32-bit step handles wraparound and slightly late packets;
        // the 64-bit sum keeps long sessions from folding back
        let step = rtp_timestamp.wrapping_sub(self.last_ts) as i32 as i64;
        self.extended += step;
        self.last_ts = rtp_timestamp;
        let delta_micros = self.extended * 1_000_000 / self.clock_rate as i64;
        PresentationTime::from_micros(anchor_wall.as_micros() + delta_micros)
    }
}
