//! Process-wide counters, exported in the Prometheus text format.

use crate::common::{ResetSource, Timestamp};
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters shared by the reset path, the notifier and the control surface.
#[derive(Debug)]
pub struct ResetMetrics {
    button_resets: AtomicU64,
    web_resets: AtomicU64,
    audio_errors: AtomicU64,
    persist_errors: AtomicU64,
    started: Instant,
}

impl Default for ResetMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ResetMetrics {
    pub fn new() -> Self {
        Self {
            button_resets: AtomicU64::new(0),
            web_resets: AtomicU64::new(0),
            audio_errors: AtomicU64::new(0),
            persist_errors: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    fn resets_for(&self, source: ResetSource) -> &AtomicU64 {
        match source {
            ResetSource::Button => &self.button_resets,
            ResetSource::Web => &self.web_resets,
        }
    }

    pub fn record_reset(&self, source: ResetSource) {
        self.resets_for(source).fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_audio_error(&self) {
        self.audio_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persist_error(&self) {
        self.persist_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn resets(&self, source: ResetSource) -> u64 {
        self.resets_for(source).load(Ordering::Relaxed)
    }

    pub fn audio_errors(&self) -> u64 {
        self.audio_errors.load(Ordering::Relaxed)
    }

    pub fn persist_errors(&self) -> u64 {
        self.persist_errors.load(Ordering::Relaxed)
    }

    /// Renders every metric in the Prometheus text exposition format.
    pub fn render(&self, now: Timestamp, origin: Timestamp) -> String {
        let mut out = String::new();

        out.push_str("# HELP dnsfail_resets_total Total number of timer resets\n");
        out.push_str("# TYPE dnsfail_resets_total counter\n");
        for source in ResetSource::ALL {
            let _ = writeln!(
                out,
                "dnsfail_resets_total{{source=\"{}\"}} {}",
                source,
                self.resets(source)
            );
        }

        let since_reset = now.signed_duration_since(origin).num_seconds().max(0);
        out.push_str("# HELP dnsfail_seconds_since_reset Seconds elapsed since last reset\n");
        out.push_str("# TYPE dnsfail_seconds_since_reset gauge\n");
        let _ = writeln!(out, "dnsfail_seconds_since_reset {}", since_reset);

        out.push_str("# HELP dnsfail_uptime_seconds Seconds since the application started\n");
        out.push_str("# TYPE dnsfail_uptime_seconds gauge\n");
        let _ = writeln!(
            out,
            "dnsfail_uptime_seconds {}",
            self.started.elapsed().as_secs()
        );

        out.push_str("# HELP dnsfail_audio_errors_total Total number of audio playback errors\n");
        out.push_str("# TYPE dnsfail_audio_errors_total counter\n");
        let _ = writeln!(out, "dnsfail_audio_errors_total {}", self.audio_errors());

        out.push_str("# HELP dnsfail_persist_errors_total Total number of failed state saves\n");
        out.push_str("# TYPE dnsfail_persist_errors_total counter\n");
        let _ = writeln!(out, "dnsfail_persist_errors_total {}", self.persist_errors());

        out
    }
}
