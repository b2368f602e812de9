//! PING-based round-trip-time estimation.
//!
//! Opportunistic: whenever DATA or HEADERS arrive while no measurement
//! ping is in flight, a ping may be sent — an initial burst to converge
//! quickly, then throttled. The running minimum RTT feeds the dynamic
//! stream-window growth decision.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::base::neterror::NetError;

/// Pings sent back-to-back before throttling kicks in.
const INITIAL_BURST: u32 = 4;

/// Minimum spacing between measurement pings after the burst.
const PING_INTERVAL: Duration = Duration::from_secs(2);

struct RttState {
    min_rtt: Option<Duration>,
    /// Outstanding measurement ping: payload and send time.
    in_flight: Option<(u64, Instant)>,
    next_payload: u64,
    sent_count: u32,
    last_sent_at: Option<Instant>,
    /// After GOAWAY a stale ACK may still arrive; tolerate it.
    terminating: bool,
}

pub struct RttEstimator {
    state: Mutex<RttState>,
}

impl RttEstimator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RttState {
                min_rtt: None,
                in_flight: None,
                next_payload: 1,
                sent_count: 0,
                last_sent_at: None,
                terminating: false,
            }),
        }
    }

    pub fn min_rtt(&self) -> Option<Duration> {
        self.state.lock().unwrap().min_rtt
    }

    /// Decide whether to send a measurement ping now. Returns the payload
    /// to put in the PING frame, or `None` when throttled or one is
    /// already outstanding.
    pub fn maybe_start_ping(&self) -> Option<u64> {
        let mut state = self.state.lock().unwrap();
        if state.terminating || state.in_flight.is_some() {
            return None;
        }
        if state.sent_count >= INITIAL_BURST {
            if let Some(last) = state.last_sent_at {
                if last.elapsed() < PING_INTERVAL {
                    return None;
                }
            }
        }
        let payload = state.next_payload;
        state.next_payload += 1;
        state.sent_count += 1;
        let now = Instant::now();
        state.last_sent_at = Some(now);
        state.in_flight = Some((payload, now));
        Some(payload)
    }

    /// Process a PING ACK carrying `payload`. An ACK that matches nothing
    /// is a protocol error, except while terminating after GOAWAY.
    pub fn on_ping_ack(&self, payload: u64) -> Result<(), NetError> {
        let mut state = self.state.lock().unwrap();
        match state.in_flight {
            Some((expected, sent_at)) if expected == payload => {
                let sample = sent_at.elapsed();
                state.in_flight = None;
                state.min_rtt = Some(match state.min_rtt {
                    Some(current) => current.min(sample),
                    None => sample,
                });
                Ok(())
            }
            _ if state.terminating => Ok(()),
            _ => Err(NetError::Http2PingFailed),
        }
    }

    /// A GOAWAY arrived; an outstanding ping may never be ACKed, or its
    /// ACK may race in late.
    pub fn on_goaway(&self) {
        let mut state = self.state.lock().unwrap();
        state.terminating = true;
        state.in_flight = None;
    }
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new()
    }
}
