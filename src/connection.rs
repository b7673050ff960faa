use std::fmt::{Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;

use crate::util::timer::{epoch_millis, Timer};

pub const INITIAL_SMOOTHED_RTT_MILLIS: f64 = 400.0;

const RTT_WEIGHT_OLD: f64 = 0.7;
const RTT_WEIGHT_SAMPLE: f64 = 0.3;

/// exponentially weighted moving average of round trip times
pub fn smooth_rtt(smoothed: f64, sample: f64) -> f64 {
    smoothed * RTT_WEIGHT_OLD + sample * RTT_WEIGHT_SAMPLE
}

/// A logical peer, identified by its socket address (i.e. IP address and port). Connections are
///  shared between the receive loop, the RTT / timeout loop and application code, so all mutable
///  state is synchronized per connection.
///
/// Two connections are equal if they have the same address, regardless of their RTT and timer
///  state.
pub struct Connection {
    addr: SocketAddr,
    smoothed_rtt: Mutex<f64>,
    /// reset on every liveness evidence from the peer
    timeout_timer: Timer,
    /// reset whenever an RTT request is sent to the peer
    rtt_timer: Timer,
}

impl Connection {
    pub fn new(addr: SocketAddr) -> Connection {
        Connection {
            addr,
            smoothed_rtt: Mutex::new(INITIAL_SMOOTHED_RTT_MILLIS),
            timeout_timer: Timer::new(),
            rtt_timer: Timer::new(),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// smoothed RTT in milliseconds
    pub fn smoothed_rtt(&self) -> f64 {
        *self.smoothed_rtt.lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    pub fn smoothed_rtt_duration(&self) -> Duration {
        Duration::from_secs_f64(self.smoothed_rtt().max(0.0) / 1000.0)
    }

    /// time since the last liveness evidence from the peer
    pub fn idle_time(&self) -> Duration {
        self.timeout_timer.elapsed()
    }

    /// feeds the RTT sample for an answer echoing `timestamp`. The timestamp comes off the wire
    ///  unchecked, so the difference saturates instead of overflowing.
    pub(crate) fn on_rtt_answer(&self, timestamp: i64) {
        self.on_rtt_sample(epoch_millis().saturating_sub(timestamp) as f64);
    }

    pub(crate) fn on_rtt_sample(&self, sample_millis: f64) {
        let mut smoothed = self.smoothed_rtt.lock()
            .unwrap_or_else(|e| e.into_inner());
        *smoothed = smooth_rtt(*smoothed, sample_millis.max(0.0));
    }

    pub(crate) fn on_liveness_evidence(&self) {
        self.timeout_timer.reset();
    }

    pub(crate) fn reset_timers(&self) {
        self.timeout_timer.reset();
        self.rtt_timer.reset();
    }

    pub(crate) fn is_timed_out(&self, timeout: Duration) -> bool {
        self.timeout_timer.has_elapsed(timeout, false)
    }

    /// true iff an RTT request is due, resetting the RTT timer in that case
    pub(crate) fn is_rtt_request_due(&self, rtt_interval: Duration) -> bool {
        self.rtt_timer.has_elapsed(rtt_interval, true)
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}
impl Eq for Connection {}

impl Hash for Connection {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr.hash(state);
    }
}

impl Debug for Connection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.addr)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use tokio::time;
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_initial_state() {
        let connection = Connection::new(addr("127.0.0.1:1234"));
        assert_eq!(connection.addr(), addr("127.0.0.1:1234"));
        assert_eq!(connection.smoothed_rtt(), 400.0);
        assert_eq!(connection.smoothed_rtt_duration().as_millis(), 400);
    }

    #[rstest]
    #[case::faster(400.0, 100.0, 310.0)]
    #[case::slower(400.0, 1000.0, 580.0)]
    #[case::same(250.0, 250.0, 250.0)]
    #[case::zero(100.0, 0.0, 70.0)]
    fn test_smooth_rtt(#[case] smoothed: f64, #[case] sample: f64, #[case] expected: f64) {
        assert!((smooth_rtt(smoothed, sample) - expected).abs() < 1e-9);
    }

    #[rstest]
    #[case::down(400.0, 20.0)]
    #[case::up(400.0, 3000.0)]
    fn test_smooth_rtt_converges_monotonically(#[case] initial: f64, #[case] sample: f64) {
        let mut smoothed = initial;
        let mut prev_distance = (initial - sample).abs();
        for _ in 0..100 {
            smoothed = smooth_rtt(smoothed, sample);
            let distance = (smoothed - sample).abs();
            assert!(distance <= prev_distance);
            prev_distance = distance;
        }
        assert!(prev_distance < 1e-6 * sample.max(1.0));
    }

    #[test]
    fn test_on_rtt_sample() {
        let connection = Connection::new(addr("127.0.0.1:1234"));
        connection.on_rtt_sample(100.0);
        assert!((connection.smoothed_rtt() - 310.0).abs() < 1e-9);

        // negative samples are clock glitches and count as zero
        connection.on_rtt_sample(-50.0);
        assert!((connection.smoothed_rtt() - 217.0).abs() < 1e-9);
    }

    #[rstest]
    #[case::min(i64::MIN)]
    #[case::max(i64::MAX)]
    #[case::far_past(-1)]
    fn test_on_rtt_answer_with_extreme_timestamp(#[case] timestamp: i64) {
        let connection = Connection::new(addr("127.0.0.1:1234"));
        connection.on_rtt_answer(timestamp);
        assert!(connection.smoothed_rtt().is_finite());
        assert!(connection.smoothed_rtt() >= 0.0);
    }

    #[test]
    fn test_on_rtt_answer() {
        let connection = Connection::new(addr("127.0.0.1:1234"));
        connection.on_rtt_answer(epoch_millis() - 100);
        // 400 * 0.7 + ~100 * 0.3, allowing for a slow test machine
        let rtt = connection.smoothed_rtt();
        assert!(rtt >= 310.0 && rtt < 320.0, "{}", rtt);
    }

    #[test]
    fn test_equality_by_address() {
        let a = Connection::new(addr("127.0.0.1:1234"));
        a.on_rtt_sample(5.0);

        assert_eq!(a, Connection::new(addr("127.0.0.1:1234")));
        assert_ne!(a, Connection::new(addr("127.0.0.1:1235")));
        assert_ne!(a, Connection::new(addr("127.0.0.2:1234")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timers() {
        let connection = Connection::new(addr("127.0.0.1:1234"));

        time::sleep(Duration::from_millis(100)).await;
        assert!(!connection.is_timed_out(Duration::from_millis(150)));
        assert!(connection.is_rtt_request_due(Duration::from_millis(100)));
        assert!(!connection.is_rtt_request_due(Duration::from_millis(100)));

        time::sleep(Duration::from_millis(50)).await;
        assert!(connection.is_timed_out(Duration::from_millis(150)));
        assert_eq!(connection.idle_time(), Duration::from_millis(150));

        connection.on_liveness_evidence();
        assert!(!connection.is_timed_out(Duration::from_millis(150)));
    }
}
