use chrono::{DateTime, Duration, Utc};

use crate::signal::ClimateReading;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    Idle,
    Recovering { started_at: DateTime<Utc> },
}

/// Measures how long the device takes to get back to its target once
/// setback ends. There is no timeout: a device that never reports reaching
/// its target keeps the tracker recovering.
#[derive(Debug, Clone)]
pub struct RecoveryTracker {
    state: RecoveryState,
    last_recovery_time: Option<f64>,
}

impl Default for RecoveryTracker {
    fn default() -> Self {
        Self::new(None)
    }
}

impl RecoveryTracker {
    pub fn new(last_recovery_time: Option<f64>) -> Self {
        Self {
            state: RecoveryState::Idle,
            last_recovery_time,
        }
    }

    pub fn state(&self) -> RecoveryState {
        self.state
    }

    pub fn is_recovering(&self) -> bool {
        matches!(self.state, RecoveryState::Recovering { .. })
    }

    pub fn recovery_start_time(&self) -> Option<DateTime<Utc>> {
        match self.state {
            RecoveryState::Recovering { started_at } => Some(started_at),
            RecoveryState::Idle => None,
        }
    }

    pub fn last_recovery_time(&self) -> Option<f64> {
        self.last_recovery_time
    }

    /// Setback just ended. Restarts any measurement already pending.
    pub fn start(&mut self, now: DateTime<Utc>) {
        self.state = RecoveryState::Recovering { started_at: now };
    }

    pub fn cancel(&mut self) -> bool {
        let was_recovering = self.is_recovering();
        self.state = RecoveryState::Idle;
        was_recovering
    }

    /// Feeds one device reading. Returns the measured seconds when this
    /// reading completes the recovery. Readings whose target is not yet the
    /// normal temperature are stale echoes and never complete it.
    pub fn observe(
        &mut self,
        is_setback: bool,
        normal_temperature: f32,
        reading: &ClimateReading,
        now: DateTime<Utc>,
    ) -> Option<f64> {
        let RecoveryState::Recovering { started_at } = self.state else {
            return None;
        };
        if is_setback {
            return None;
        }

        let (Some(current), Some(target)) =
            (reading.current_temperature, reading.target_temperature)
        else {
            return None;
        };
        if (target - normal_temperature).abs() > f32::EPSILON || current < target {
            return None;
        }

        let seconds = round_tenths(now.signed_duration_since(started_at));
        self.last_recovery_time = Some(seconds);
        self.state = RecoveryState::Idle;
        Some(seconds)
    }
}

/// Whole seconds with one decimal place. Negative spans (clock stepped
/// backwards) count as zero.
pub fn round_tenths(elapsed: Duration) -> f64 {
    let millis = elapsed.num_milliseconds().max(0) as f64;
    (millis / 100.0).round() / 10.0
}
