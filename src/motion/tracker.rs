use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, error};

use super::event::{CompletionSnapshot, Direction, MotionEvent};

/// Done-move value reported by a stationary axis.
pub const DONE_MOVING: f64 = 1.0;

#[derive(Debug, Default)]
struct TrackerState {
    position: Option<f64>,
    moving: bool,
    started: bool,
}

/// Per-axis motion state. Only the two callback entry points and
/// [`MotionTracker::reset_started`] touch it, always under one lock.
#[derive(Debug)]
pub struct MotionTracker {
    name: String,
    state: Mutex<TrackerState>,
}

impl MotionTracker {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(TrackerState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn position(&self) -> Option<f64> {
        self.lock().position
    }

    pub fn is_moving(&self) -> bool {
        self.lock().moving
    }

    /// Arms the tracker for a new move request.
    pub fn reset_started(&self) {
        self.lock().started = false;
    }

    pub fn on_readback(&self, _timestamp: DateTime<Utc>, value: f64) {
        self.lock().position = Some(value);
    }

    /// Feeds a done-move update. `snapshot` is only evaluated on the
    /// moving to not-moving edge and reads whatever the signals hold then.
    pub fn on_done_moving<F>(
        &self,
        timestamp: DateTime<Utc>,
        value: f64,
        snapshot: F,
    ) -> Option<MotionEvent>
    where
        F: FnOnce() -> CompletionSnapshot,
    {
        let (started, stopped) = {
            let mut state = self.lock();
            let was_moving = state.moving;
            state.moving = value != DONE_MOVING;

            let started = !state.started && !was_moving && state.moving;
            if started {
                state.started = true;
            }

            debug!(
                "[ts={}] {} moving: {} (value={})",
                timestamp.format("%H:%M:%S%.6f"),
                self.name,
                state.moving,
                value
            );
            (started, was_moving && !state.moving)
        };

        if started {
            return Some(MotionEvent::Started { timestamp, value });
        }

        if stopped {
            let success = self.completion_success(&snapshot());
            return Some(MotionEvent::Finished {
                success,
                timestamp,
                value,
            });
        }

        None
    }

    fn completion_success(&self, snapshot: &CompletionSnapshot) -> bool {
        let mut success = match snapshot.direction {
            Direction::TowardLow => !snapshot.low_limit,
            Direction::TowardHigh => !snapshot.high_limit,
            Direction::Unknown => true,
        };

        if snapshot.alarm.is_active() {
            error!(
                "Motion failed: {} is in an alarm state status={} severity={}",
                self.name, snapshot.alarm.status, snapshot.alarm.severity
            );
            success = false;
        }

        success
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::alarm::{Alarm, AlarmSeverity, AlarmStatus};
    use std::cell::Cell;

    fn clear() -> CompletionSnapshot {
        CompletionSnapshot::clear(Direction::TowardHigh)
    }

    fn feed(tracker: &MotionTracker, values: &[f64]) -> Vec<MotionEvent> {
        values
            .iter()
            .filter_map(|v| tracker.on_done_moving(Utc::now(), *v, clear))
            .collect()
    }

    fn finish_with(snapshot: CompletionSnapshot) -> Option<bool> {
        let tracker = MotionTracker::new("m1");
        tracker.on_done_moving(Utc::now(), 0.0, clear);
        tracker
            .on_done_moving(Utc::now(), 1.0, || snapshot)
            .and_then(|event| event.outcome())
    }

    #[test]
    fn test_readback_only_updates_position() {
        let tracker = MotionTracker::new("m1");
        assert_eq!(tracker.position(), None);
        tracker.on_readback(Utc::now(), 2.5);
        assert_eq!(tracker.position(), Some(2.5));
        assert!(!tracker.is_moving());
    }

    #[test]
    fn test_start_then_completion_sequence() {
        let tracker = MotionTracker::new("m1");
        let events = feed(&tracker, &[1.0, 1.0, 0.0, 1.0]);

        assert_eq!(events.len(), 2);
        assert!(events[0].is_start());
        assert!(matches!(events[0], MotionEvent::Started { value, .. } if value == 0.0));
        assert_eq!(events[1].outcome(), Some(true));
        assert!(matches!(events[1], MotionEvent::Finished { value, .. } if value == 1.0));
    }

    #[test]
    fn test_duplicate_updates_do_not_retrigger() {
        let tracker = MotionTracker::new("m1");
        let events = feed(&tracker, &[0.0, 0.0, 2.0, 0.0, 1.0, 1.0, 1.0]);
        assert_eq!(events.iter().filter(|e| e.is_start()).count(), 1);
        assert_eq!(events.iter().filter(|e| e.outcome().is_some()).count(), 1);
    }

    #[test]
    fn test_second_run_without_new_request_has_no_start() {
        let tracker = MotionTracker::new("m1");
        let events = feed(&tracker, &[0.0, 1.0, 0.0, 1.0]);
        assert_eq!(events.iter().filter(|e| e.is_start()).count(), 1);
        assert_eq!(events.iter().filter(|e| e.outcome().is_some()).count(), 2);

        tracker.reset_started();
        let events = feed(&tracker, &[0.0, 1.0]);
        assert!(events[0].is_start());
    }

    #[test]
    fn test_one_start_and_one_completion_per_run() {
        // Every sequence of length 6 over {done, moving, other moving value}.
        let alphabet = [1.0, 0.0, 2.0];
        for code in 0..3usize.pow(6) {
            let mut n = code;
            let values: Vec<f64> = (0..6)
                .map(|_| {
                    let v = alphabet[n % 3];
                    n /= 3;
                    v
                })
                .collect();

            let tracker = MotionTracker::new("m1");
            let mut moving = false;
            let (mut runs, mut stops, mut starts, mut completions) = (0, 0, 0, 0);
            for value in &values {
                if !moving {
                    // An idle axis may receive a new move request at any time.
                    tracker.reset_started();
                }
                let now_moving = *value != DONE_MOVING;
                if !moving && now_moving {
                    runs += 1;
                }
                if moving && !now_moving {
                    stops += 1;
                }
                moving = now_moving;

                match tracker.on_done_moving(Utc::now(), *value, clear) {
                    Some(event) if event.is_start() => starts += 1,
                    Some(_) => completions += 1,
                    None => {}
                }
            }

            assert_eq!(starts, runs, "starts for {:?}", values);
            assert_eq!(completions, stops, "completions for {:?}", values);
        }
    }

    #[test]
    fn test_low_limit_fails_move_toward_low() {
        let snapshot = CompletionSnapshot::clear(Direction::TowardLow).with_limits(true, false);
        assert_eq!(finish_with(snapshot), Some(false));
    }

    #[test]
    fn test_high_limit_fails_move_toward_high() {
        let snapshot = CompletionSnapshot::clear(Direction::TowardHigh).with_limits(false, true);
        assert_eq!(finish_with(snapshot), Some(false));
    }

    #[test]
    fn test_opposite_limit_does_not_fail() {
        let snapshot = CompletionSnapshot::clear(Direction::TowardHigh).with_limits(true, false);
        assert_eq!(finish_with(snapshot), Some(true));

        let snapshot = CompletionSnapshot::clear(Direction::TowardLow).with_limits(false, true);
        assert_eq!(finish_with(snapshot), Some(true));
    }

    #[test]
    fn test_alarm_overrides_success() {
        let alarm = Alarm::new(AlarmSeverity::Minor, AlarmStatus::High);
        let snapshot = CompletionSnapshot::clear(Direction::TowardHigh).with_alarm(alarm);
        assert_eq!(finish_with(snapshot), Some(false));
    }

    #[test]
    fn test_unknown_direction_skips_limit_check() {
        let snapshot = CompletionSnapshot::clear(Direction::Unknown).with_limits(true, true);
        assert_eq!(finish_with(snapshot), Some(true));
    }

    #[test]
    fn test_snapshot_sampled_only_at_completion_edge() {
        let tracker = MotionTracker::new("m1");
        let calls = Cell::new(0);
        let sample = || {
            calls.set(calls.get() + 1);
            clear()
        };

        for value in [1.0, 0.0, 0.0, 1.0, 1.0] {
            tracker.on_done_moving(Utc::now(), value, sample);
        }
        assert_eq!(calls.get(), 1);
    }
}
