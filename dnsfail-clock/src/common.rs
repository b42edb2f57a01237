//! Contains common, primitive types shared across the clock.
//!
//! These are small value types that several modules agree on: who triggered a
//! reset, and the timestamp type used for the timer origin.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The timestamp type used for the timer origin.
///
/// Always UTC so that values written by one process compare correctly with
/// values read by another, regardless of the host's local time zone.
pub type Timestamp = DateTime<Utc>;

/// Identifies what triggered a reset of the timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetSource {
    /// The physical push button wired to the GPIO line.
    Button,
    /// A `POST` to the control surface.
    Web,
}

impl ResetSource {
    /// All sources, in the order they are reported by the metrics endpoint.
    pub const ALL: [ResetSource; 2] = [ResetSource::Button, ResetSource::Web];

    /// The label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResetSource::Button => "button",
            ResetSource::Web => "web",
        }
    }
}

impl fmt::Display for ResetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
