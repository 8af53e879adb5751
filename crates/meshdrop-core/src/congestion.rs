//! Delay-based AIMD congestion control.
//!
//! Deliberately simple relative to loss-based or bandwidth-probing schemes:
//! congestion is inferred purely from RTT inflation and how much data is
//! sitting in the peer connection's send buffer. There is no bandwidth
//! estimator and no probing phase machine.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Number of RTT samples kept for the rolling mean.
const RTT_WINDOW_SIZE: usize = 20;

/// Initial congestion window.
pub const CWND_INITIAL: u64 = 1024 * 1024;
/// Minimum congestion window.
pub const CWND_MIN: u64 = 256 * 1024;
/// Maximum congestion window.
pub const CWND_MAX: u64 = 16 * 1024 * 1024;
/// Additive-increase step.
const CWND_INCREASE_STEP: u64 = 64 * 1024;
/// Multiplicative-decrease factor.
const CWND_DECREASE_FACTOR: f64 = 0.7;

/// RTT ratio above which the window is cut.
const RTT_RATIO_DECREASE_THRESHOLD: f64 = 2.0;
/// RTT ratio below which the window is allowed to grow.
const RTT_RATIO_INCREASE_THRESHOLD: f64 = 1.2;
/// Fraction of cwnd the send buffer must stay under to grow the window.
const BUFFER_LOW_FRACTION: f64 = 0.8;

/// Interval between control-loop evaluations.
pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// Send-buffer level at which backpressure is signalled to the producer.
pub const HIGH_WATER_MARK: u64 = 12 * 1024 * 1024;
/// Send-buffer level at which backpressure is released.
pub const LOW_WATER_MARK: u64 = 4 * 1024 * 1024;

/// Minimum and maximum adaptive chunk sizes (bytes), per spec §4.3/§4.5.
pub const CHUNK_SIZE_MIN: u32 = 16 * 1024;
/// See [`CHUNK_SIZE_MIN`].
pub const CHUNK_SIZE_MAX: u32 = 4 * 1024 * 1024;

/// Minimum and maximum batch size, in chunks.
const BATCH_SIZE_MIN: u32 = 32;
/// See [`BATCH_SIZE_MIN`].
const BATCH_SIZE_MAX: u32 = 128;

/// Fraction of cwnd used to derive the target batch byte count.
const BATCH_TARGET_FRACTION: f64 = 0.2;

/// Backpressure state transition emitted by a control-loop tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressureSignal {
    /// Producer should stop sending; buffered bytes crossed the high mark.
    Paused,
    /// Producer may resume; buffered bytes fell back below the low mark.
    Resumed,
    /// No change in backpressure state.
    Unchanged,
}

/// Per-peer delay-based AIMD controller.
pub struct CongestionController {
    cwnd: u64,
    min_rtt: Option<Duration>,
    rtt_samples: VecDeque<Duration>,
    paused: bool,
    last_tick: Option<Instant>,
    current_chunk_size: u32,
}

impl Default for CongestionController {
    fn default() -> Self {
        Self::new()
    }
}

impl CongestionController {
    /// Creates a controller at the initial window with no RTT history.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cwnd: CWND_INITIAL,
            min_rtt: None,
            rtt_samples: VecDeque::with_capacity(RTT_WINDOW_SIZE),
            paused: false,
            last_tick: None,
            current_chunk_size: CHUNK_SIZE_MAX,
        }
    }

    /// Current congestion window, in bytes.
    #[must_use]
    pub fn cwnd(&self) -> u64 {
        self.cwnd
    }

    /// Records one RTT sample and updates the never-reset `minRtt` baseline.
    pub fn on_rtt_sample(&mut self, rtt: Duration) {
        self.min_rtt = Some(match self.min_rtt {
            Some(current) => current.min(rtt),
            None => rtt,
        });
        if self.rtt_samples.len() == RTT_WINDOW_SIZE {
            self.rtt_samples.pop_front();
        }
        self.rtt_samples.push_back(rtt);
    }

    /// Mean of the RTT sample ring; zero duration if no samples yet.
    #[must_use]
    pub fn estimated_rtt(&self) -> Duration {
        if self.rtt_samples.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.rtt_samples.iter().sum();
        total / self.rtt_samples.len() as u32
    }

    /// The never-reset minimum RTT baseline observed this session.
    #[must_use]
    pub fn min_rtt(&self) -> Duration {
        self.min_rtt.unwrap_or(Duration::ZERO)
    }

    fn rtt_ratio(&self) -> f64 {
        let min_rtt = self.min_rtt().as_secs_f64().max(0.001);
        self.estimated_rtt().as_secs_f64() / min_rtt
    }

    /// Runs one control-loop evaluation. Callers should invoke this roughly
    /// every [`SAMPLE_INTERVAL`], passing the current send-buffer occupancy.
    pub fn tick(&mut self, buffered_amount: u64) -> BackpressureSignal {
        self.last_tick = Some(Instant::now());
        let rtt_ratio = self.rtt_ratio();

        if rtt_ratio > RTT_RATIO_DECREASE_THRESHOLD || buffered_amount > self.cwnd {
            self.cwnd = ((self.cwnd as f64 * CWND_DECREASE_FACTOR) as u64).max(CWND_MIN);
        } else if rtt_ratio < RTT_RATIO_INCREASE_THRESHOLD
            && (buffered_amount as f64) < BUFFER_LOW_FRACTION * self.cwnd as f64
        {
            self.cwnd = (self.cwnd + CWND_INCREASE_STEP).min(CWND_MAX);
        }

        self.backpressure_signal(buffered_amount)
    }

    fn backpressure_signal(&mut self, buffered_amount: u64) -> BackpressureSignal {
        if !self.paused && buffered_amount > HIGH_WATER_MARK {
            self.paused = true;
            BackpressureSignal::Paused
        } else if self.paused && buffered_amount < LOW_WATER_MARK {
            self.paused = false;
            BackpressureSignal::Resumed
        } else {
            BackpressureSignal::Unchanged
        }
    }

    /// Whether the producer is currently paused by backpressure.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Target bytes for the next batch, derived from the current cwnd.
    #[must_use]
    pub fn batch_target_bytes(&self) -> u64 {
        (self.cwnd as f64 * BATCH_TARGET_FRACTION) as u64
    }

    /// Number of chunks to request in the next batch, clamped to
    /// `[32, 128]`.
    #[must_use]
    pub fn batch_size(&self, chunk_size: u32) -> u32 {
        let chunk_size = chunk_size.max(1);
        let raw = self.batch_target_bytes() / u64::from(chunk_size);
        (raw as u32).clamp(BATCH_SIZE_MIN, BATCH_SIZE_MAX)
    }

    /// Records the chunk producer's most recently reported chunk size, so
    /// `nextBatch` can read it back (spec §4.3: "chunk size is read from the
    /// congestion controller every batch").
    pub fn set_current_chunk_size(&mut self, size: u32) {
        self.current_chunk_size = size.clamp(CHUNK_SIZE_MIN, CHUNK_SIZE_MAX);
    }

    /// The chunk size the producer should use for its next batch.
    #[must_use]
    pub fn current_chunk_size(&self) -> u32 {
        self.current_chunk_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_initial_window() {
        let c = CongestionController::new();
        assert_eq!(c.cwnd(), CWND_INITIAL);
    }

    #[test]
    fn min_rtt_never_resets_within_session() {
        let mut c = CongestionController::new();
        c.on_rtt_sample(Duration::from_millis(20));
        c.on_rtt_sample(Duration::from_millis(200));
        c.on_rtt_sample(Duration::from_millis(15));
        assert_eq!(c.min_rtt(), Duration::from_millis(15));
        c.on_rtt_sample(Duration::from_millis(500));
        assert_eq!(c.min_rtt(), Duration::from_millis(15));
    }

    #[test]
    fn high_rtt_ratio_cuts_window() {
        let mut c = CongestionController::new();
        for _ in 0..5 {
            c.on_rtt_sample(Duration::from_millis(10));
        }
        for _ in 0..5 {
            c.on_rtt_sample(Duration::from_millis(50));
        }
        let before = c.cwnd();
        c.tick(0);
        assert!(c.cwnd() < before);
        assert_eq!(c.cwnd(), ((before as f64 * 0.7) as u64).max(CWND_MIN));
    }

    #[test]
    fn buffered_over_cwnd_cuts_window_even_with_good_rtt() {
        let mut c = CongestionController::new();
        c.on_rtt_sample(Duration::from_millis(10));
        let before = c.cwnd();
        c.tick(before + 1);
        assert!(c.cwnd() < before);
    }

    #[test]
    fn low_rtt_ratio_and_low_buffer_grows_window() {
        let mut c = CongestionController::new();
        for _ in 0..RTT_WINDOW_SIZE {
            c.on_rtt_sample(Duration::from_millis(10));
        }
        let before = c.cwnd();
        c.tick(0);
        assert_eq!(c.cwnd(), (before + CWND_INCREASE_STEP).min(CWND_MAX));
    }

    #[test]
    fn window_never_exceeds_max() {
        let mut c = CongestionController::new();
        c.cwnd = CWND_MAX;
        for _ in 0..RTT_WINDOW_SIZE {
            c.on_rtt_sample(Duration::from_millis(1));
        }
        c.tick(0);
        assert_eq!(c.cwnd(), CWND_MAX);
    }

    #[test]
    fn window_never_drops_below_min() {
        let mut c = CongestionController::new();
        c.cwnd = CWND_MIN;
        for _ in 0..RTT_WINDOW_SIZE {
            c.on_rtt_sample(Duration::from_millis(1000));
        }
        c.tick(0);
        assert_eq!(c.cwnd(), CWND_MIN);
    }

    #[test]
    fn emits_paused_then_resumed_at_watermarks() {
        let mut c = CongestionController::new();
        assert_eq!(
            c.tick(HIGH_WATER_MARK + 1),
            BackpressureSignal::Paused
        );
        assert_eq!(c.tick(HIGH_WATER_MARK), BackpressureSignal::Unchanged);
        assert_eq!(c.tick(LOW_WATER_MARK - 1), BackpressureSignal::Resumed);
    }

    #[test]
    fn batch_size_is_clamped() {
        let mut c = CongestionController::new();
        c.cwnd = CWND_MIN;
        assert!(c.batch_size(CHUNK_SIZE_MAX) >= BATCH_SIZE_MIN);
        c.cwnd = CWND_MAX;
        assert!(c.batch_size(CHUNK_SIZE_MIN) <= BATCH_SIZE_MAX);
    }

    #[test]
    fn current_chunk_size_is_clamped_to_bounds() {
        let mut c = CongestionController::new();
        c.set_current_chunk_size(4);
        assert_eq!(c.current_chunk_size(), CHUNK_SIZE_MIN);
        c.set_current_chunk_size(u32::MAX);
        assert_eq!(c.current_chunk_size(), CHUNK_SIZE_MAX);
    }
}
