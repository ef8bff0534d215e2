//! Transfer progress shared between the I/O thread and observers.
//!
//! The I/O thread only ever does a `fetch_add` per chunk. Everything derived
//! (fraction, speed, ETA) is computed on the reading side, so observers can
//! poll at whatever rate they like without slowing the transfer down.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::session::SessionState;

/// Default trailing window for speed estimates.
pub const DEFAULT_SPEED_WINDOW: Duration = Duration::from_secs(3);

/// Live counters for one session. Created at session start and dropped with it.
pub struct Progress {
    bytes_done: AtomicU64,
    bytes_total: AtomicU64,
    entries_done: AtomicU64,
    entries_total: AtomicU64,
    state: AtomicU8,
    started: Mutex<Option<Instant>>,
    current_entry: Mutex<Option<String>>,
}

impl Progress {
    pub fn new() -> Self {
        Self {
            bytes_done: AtomicU64::new(0),
            bytes_total: AtomicU64::new(0),
            entries_done: AtomicU64::new(0),
            entries_total: AtomicU64::new(0),
            state: AtomicU8::new(SessionState::Idle.as_u8()),
            started: Mutex::new(None),
            current_entry: Mutex::new(None),
        }
    }

    /// Record the totals from the descriptor and start the clock.
    pub fn begin(&self, bytes_total: u64, entries_total: u64) {
        self.bytes_total.store(bytes_total, Ordering::Relaxed);
        self.entries_total.store(entries_total, Ordering::Relaxed);
        *self.started.lock() = Some(Instant::now());
    }

    #[inline]
    pub fn add_bytes(&self, n: u64) {
        self.bytes_done.fetch_add(n, Ordering::Relaxed);
    }

    pub fn finish_entry(&self) {
        self.entries_done.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_current_entry(&self, path: &str) {
        *self.current_entry.lock() = Some(path.to_string());
    }

    pub fn set_state(&self, state: SessionState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn bytes_done(&self) -> u64 {
        self.bytes_done.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let started = *self.started.lock();
        ProgressSnapshot {
            bytes_done: self.bytes_done.load(Ordering::Relaxed),
            bytes_total: self.bytes_total.load(Ordering::Relaxed),
            entries_done: self.entries_done.load(Ordering::Relaxed),
            entries_total: self.entries_total.load(Ordering::Relaxed),
            state: self.state(),
            begun: started.is_some(),
            elapsed: started.map(|s| s.elapsed()).unwrap_or_default(),
            current_entry: self.current_entry.lock().clone(),
            taken_at: Instant::now(),
        }
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`Progress`].
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub bytes_done: u64,
    pub bytes_total: u64,
    pub entries_done: u64,
    pub entries_total: u64,
    pub state: SessionState,
    /// Totals are known: the descriptor has been exchanged.
    pub begun: bool,
    pub elapsed: Duration,
    pub current_entry: Option<String>,
    pub taken_at: Instant,
}

impl ProgressSnapshot {
    /// Fraction 0.0 - 1.0. An empty transfer counts as done once it is
    /// streaming or past it, never when it failed or was cancelled.
    pub fn fraction(&self) -> f64 {
        if self.bytes_total == 0 {
            let done = self.begun
                && matches!(
                    self.state,
                    SessionState::Streaming | SessionState::Verifying | SessionState::Completed
                );
            return if done { 1.0 } else { 0.0 };
        }
        (self.bytes_done as f64 / self.bytes_total as f64).min(1.0)
    }

    pub fn remaining(&self) -> u64 {
        self.bytes_total.saturating_sub(self.bytes_done)
    }
}

/// Trailing-window throughput estimator, owned by one observer.
///
/// Reflects current conditions rather than the since-start average: only
/// samples inside the window contribute.
#[derive(Debug)]
pub struct SpeedWindow {
    window: Duration,
    samples: VecDeque<(Instant, u64)>,
}

impl SpeedWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
        }
    }

    pub fn record(&mut self, snapshot: &ProgressSnapshot) {
        self.record_sample(snapshot.taken_at, snapshot.bytes_done);
    }

    pub fn record_sample(&mut self, at: Instant, bytes_done: u64) {
        // A new session (or a reset) restarts the window.
        if let Some(&(_, last)) = self.samples.back() {
            if bytes_done < last {
                self.samples.clear();
            }
        }
        self.samples.push_back((at, bytes_done));

        // Keep one sample at or beyond the window edge as the baseline.
        while self.samples.len() > 2 {
            let second = self.samples[1].0;
            if at.saturating_duration_since(second) >= self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Bytes per second across the window, 0.0 until two samples exist.
    pub fn speed(&self) -> f64 {
        let (Some(&(t0, b0)), Some(&(t1, b1))) = (self.samples.front(), self.samples.back()) else {
            return 0.0;
        };
        let dt = t1.saturating_duration_since(t0).as_secs_f64();
        if dt <= 0.0 {
            return 0.0;
        }
        b1.saturating_sub(b0) as f64 / dt
    }

    /// `None` while the speed is zero (ETA unknown).
    pub fn eta(&self, snapshot: &ProgressSnapshot) -> Option<Duration> {
        let remaining = snapshot.remaining();
        if remaining == 0 {
            return Some(Duration::ZERO);
        }
        let speed = self.speed();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining as f64 / speed))
    }
}

impl Default for SpeedWindow {
    fn default() -> Self {
        Self::new(DEFAULT_SPEED_WINDOW)
    }
}
