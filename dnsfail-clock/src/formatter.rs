//! Turns an elapsed duration into the two lines shown on the matrix.
//!
//! The decomposition uses 365-day years and 30-day months, computed from the
//! whole-day count independently of the sub-day remainder. It is a coarse
//! display approximation, not calendar arithmetic, and the exact numbers it
//! produces are relied upon.

use crate::common::Timestamp;
use chrono::Duration;

const SECONDS_PER_DAY: i64 = 86_400;
const DAYS_PER_YEAR: i64 = 365;
const DAYS_PER_MONTH: i64 = 30;

/// Formats the time elapsed between `origin` and `now`.
///
/// A negative interval (clock skew, or an origin from the future) is clamped
/// to zero.
pub fn format_elapsed(now: Timestamp, origin: Timestamp) -> (String, String) {
    format_duration(now.signed_duration_since(origin))
}

/// Formats an already computed duration as `("YYy MMmo DDd", "HHh MMm SSs")`.
pub fn format_duration(elapsed: Duration) -> (String, String) {
    let total_seconds = elapsed.num_seconds().max(0);

    let whole_days = total_seconds / SECONDS_PER_DAY;
    let years = whole_days / DAYS_PER_YEAR;
    let months = (whole_days % DAYS_PER_YEAR) / DAYS_PER_MONTH;
    let days = (whole_days % DAYS_PER_YEAR) % DAYS_PER_MONTH;

    let sub_day = total_seconds % SECONDS_PER_DAY;
    let hours = sub_day / 3600;
    let minutes = (sub_day % 3600) / 60;
    let seconds = sub_day % 60;

    (
        format!("{:02}y {:02}mo {:02}d", years, months, days),
        format!("{:02}h {:02}m {:02}s", hours, minutes, seconds),
    )
}
