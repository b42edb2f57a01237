//! Watches the reset button and turns debounced presses into resets.

use crate::common::{ResetSource, Timestamp};
use crate::components::input_line::InputLine;
use crate::timer::TimerState;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// How often the input line is sampled.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Minimum spacing between two accepted presses.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(300);

/// The button's state, derived from the last observed level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonState {
    Idle,
    Pressed,
}

impl ButtonState {
    fn from_level(level: bool) -> Self {
        // Active-low: the pull-up holds the line high while released.
        if level {
            ButtonState::Idle
        } else {
            ButtonState::Pressed
        }
    }
}

/// What a sample meant, when it meant anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEdge {
    /// A press that should reset the timer.
    Accepted,
    /// A press inside the debounce window of the last accepted one.
    Suppressed,
    /// The button went back up.
    Released,
}

/// Debounces falling edges on an active-low line.
///
/// The reference point only moves on an accepted press, so contact bounce
/// cannot stretch the window beyond the original press.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    state: Option<ButtonState>,
    last_accepted: Option<Instant>,
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEBOUNCE_WINDOW)
    }
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: None,
            last_accepted: None,
        }
    }

    /// The state after the last sample, or `None` before the first one.
    pub fn state(&self) -> Option<ButtonState> {
        self.state
    }

    /// Feeds one raw sample taken at `now`.
    ///
    /// The first sample only sets the baseline, so a line that is already low
    /// at startup does not count as a press.
    pub fn observe(&mut self, level: bool, now: Instant) -> Option<ButtonEdge> {
        let next = ButtonState::from_level(level);
        let previous = self.state.replace(next);
        match (previous, next) {
            (Some(ButtonState::Idle), ButtonState::Pressed) => {
                if self.accept_press(now) {
                    Some(ButtonEdge::Accepted)
                } else {
                    Some(ButtonEdge::Suppressed)
                }
            }
            (Some(ButtonState::Pressed), ButtonState::Idle) => Some(ButtonEdge::Released),
            _ => None,
        }
    }

    /// Decides whether a press at `now` is far enough from the last accepted
    /// one, and if so makes it the new reference.
    pub fn accept_press(&mut self, now: Instant) -> bool {
        let accepted = match self.last_accepted {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.window,
        };
        if accepted {
            self.last_accepted = Some(now);
        }
        accepted
    }
}

/// Polls an [`InputLine`] and resets the timer on each accepted press.
pub struct InputMonitor {
    line: Box<dyn InputLine>,
    debouncer: Debouncer,
    timer: Arc<TimerState>,
    poll_interval: Duration,
}

impl InputMonitor {
    pub fn new(line: Box<dyn InputLine>, timer: Arc<TimerState>) -> Self {
        Self {
            line,
            debouncer: Debouncer::default(),
            timer,
            poll_interval: POLL_INTERVAL,
        }
    }

    /// Samples the line once. Returns the new origin if this sample reset the
    /// timer. A failed read is logged and treated as no change.
    pub async fn poll_once(&mut self, now: Instant) -> Option<Timestamp> {
        let level = match self.line.read_line() {
            Ok(level) => level,
            Err(e) => {
                error!("Error reading button line: {:#}", e);
                return None;
            }
        };

        match self.debouncer.observe(level, now)? {
            ButtonEdge::Accepted => {
                info!("Button press detected - Resetting counter");
                Some(self.timer.reset(ResetSource::Button).await)
            }
            ButtonEdge::Suppressed => {
                debug!("Button press within debounce window ignored");
                None
            }
            ButtonEdge::Released => {
                debug!("Button released");
                None
            }
        }
    }

    /// Polls until the shutdown signal arrives. Dropping `self` afterwards
    /// releases the input line.
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("Button monitoring started");
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                tick = ticker.tick() => {
                    self.poll_once(tick.into_std()).await;
                }
            }
        }
        info!("Button monitoring stopped");
    }
}
