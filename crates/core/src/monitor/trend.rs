//! Two-half trend analysis over recorded occurrences.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use vigil_common::duration_millis;
use vigil_common::ErrorKind;

use super::metric::window_start;

/// Relative change between halves below this magnitude is noise.
pub const NOISE_THRESHOLD: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Stable,
    Degrading,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trend::Improving => write!(f, "improving"),
            Trend::Stable => write!(f, "stable"),
            Trend::Degrading => write!(f, "degrading"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendAnalysis {
    pub error_type: ErrorKind,
    #[serde(with = "duration_millis")]
    pub window: Duration,
    pub trend: Trend,
    /// `(second_half - first_half) / first_half`
    pub change_rate: f64,
    /// Projected occurrences in the next half-window.
    pub prediction: u64,
    pub first_half: usize,
    pub second_half: usize,
}

impl TrendAnalysis {
    /// Split `occurrences` into the two halves of the window ending at `now`
    /// and compare them.
    pub fn compute<'a, I>(
        error_type: ErrorKind,
        occurrences: I,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Self
    where
        I: IntoIterator<Item = &'a DateTime<Utc>>,
    {
        let start = window_start(now, window);
        let mid = window_start(now, window / 2);

        let (mut first_half, mut second_half) = (0_usize, 0_usize);
        for at in occurrences {
            if *at < start || *at > now {
                continue;
            }
            if *at < mid {
                first_half += 1;
            } else {
                second_half += 1;
            }
        }

        let change_rate = match (first_half, second_half) {
            (0, 0) => 0.0,
            (0, _) => 1.0,
            (first, second) => (second as f64 - first as f64) / first as f64,
        };

        let trend = if change_rate > NOISE_THRESHOLD {
            Trend::Degrading
        } else if change_rate < -NOISE_THRESHOLD {
            Trend::Improving
        } else {
            Trend::Stable
        };

        let projected = (second_half as f64 * (1.0 + change_rate)).round();
        let prediction = if projected > 0.0 { projected as u64 } else { 0 };

        Self { error_type, window, trend, change_rate, prediction, first_half, second_half }
    }
}
