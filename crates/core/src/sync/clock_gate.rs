//! Clock-integrity state machine.
//!
//! Pure evaluation only. Persisting a verdict and pushing it are done by the
//! gate runner in the cloud-sync crate.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Largest tolerated difference between local and authoritative time, in hours.
pub const MAX_CLOCK_SKEW_HOURS: i64 = 2;

pub fn max_clock_skew() -> Duration {
    Duration::hours(MAX_CLOCK_SKEW_HOURS)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    Clear,
    /// Skew detected against a paid entitlement; must be locked before any push.
    /// The lock itself lives on the entitlement rows, not here.
    Suspect,
}

/// Result of one clock comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockVerdict {
    pub state: GateState,
    /// `remote - local`, when the authority answered.
    pub skew: Option<Duration>,
}

/// Compares local wall-clock time with the authority.
///
/// `remote` is `None` when the authority is unreachable; the gate then fails
/// open. Only a skew strictly above [`max_clock_skew`] against a paid
/// entitlement is suspect.
pub fn evaluate_clock(
    local: DateTime<Utc>,
    remote: Option<DateTime<Utc>>,
    holds_paid_entitlement: bool,
) -> ClockVerdict {
    let Some(remote) = remote else {
        return ClockVerdict {
            state: GateState::Clear,
            skew: None,
        };
    };

    let skew = remote - local;
    let state = if holds_paid_entitlement && skew.abs() > max_clock_skew() {
        GateState::Suspect
    } else {
        GateState::Clear
    };
    ClockVerdict {
        state,
        skew: Some(skew),
    }
}
