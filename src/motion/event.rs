use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::signal::alarm::Alarm;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MotionEvent {
    Started {
        timestamp: DateTime<Utc>,
        value: f64,
    },
    Finished {
        success: bool,
        timestamp: DateTime<Utc>,
        value: f64,
    },
}

impl MotionEvent {
    pub fn is_start(&self) -> bool {
        matches!(self, MotionEvent::Started { .. })
    }

    /// `Some(success)` for a completion event.
    pub fn outcome(&self) -> Option<bool> {
        match self {
            MotionEvent::Finished { success, .. } => Some(*success),
            MotionEvent::Started { .. } => None,
        }
    }
}

/// Direction of travel as reported by the motor record (TDIR).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    TowardLow,
    TowardHigh,
    Unknown,
}

impl Direction {
    /// TDIR 0 is toward low and 1 toward high. Any other raw value is
    /// `Unknown` and skips the limit-switch check, where a plain "not zero
    /// means high" reading would still check the high switch.
    pub fn from_raw(raw: f64) -> Self {
        if raw == 0.0 {
            Direction::TowardLow
        } else if raw == 1.0 {
            Direction::TowardHigh
        } else {
            Direction::Unknown
        }
    }
}

/// Signal values sampled when motion stops.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionSnapshot {
    pub direction: Direction,
    pub low_limit: bool,
    pub high_limit: bool,
    pub alarm: Alarm,
}

impl CompletionSnapshot {
    pub fn clear(direction: Direction) -> Self {
        Self {
            direction,
            low_limit: false,
            high_limit: false,
            alarm: Alarm::NONE,
        }
    }

    pub fn with_limits(mut self, low: bool, high: bool) -> Self {
        self.low_limit = low;
        self.high_limit = high;
        self
    }

    pub fn with_alarm(mut self, alarm: Alarm) -> Self {
        self.alarm = alarm;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_from_raw() {
        assert_eq!(Direction::from_raw(0.0), Direction::TowardLow);
        assert_eq!(Direction::from_raw(1.0), Direction::TowardHigh);
        assert_eq!(Direction::from_raw(2.0), Direction::Unknown);
        assert_eq!(Direction::from_raw(f64::NAN), Direction::Unknown);
    }
}
