use thiserror::Error;
use tracing::{debug, info};

use crate::signals::{Signal, SignalBus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerPhase {
    Idle,
    Running,
    Paused,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum TimerError {
    #[error("timer duration must be a positive finite number of seconds, got {0}")]
    InvalidDuration(f32),
}

/// Warning and expiry fire at most once per run.
#[derive(Debug, Clone)]
pub struct CountdownTimer {
    duration_seconds: f32,
    remaining_seconds: f32,
    warning_threshold_seconds: f32,
    phase: TimerPhase,
    warning_fired: bool,
}

impl CountdownTimer {
    pub fn new(duration_seconds: f32, warning_threshold_seconds: f32) -> Result<Self, TimerError> {
        validate_duration(duration_seconds)?;
        Ok(Self {
            duration_seconds,
            remaining_seconds: duration_seconds,
            warning_threshold_seconds: warning_threshold_seconds.max(0.0),
            phase: TimerPhase::Idle,
            warning_fired: false,
        })
    }

    pub fn phase(&self) -> TimerPhase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.phase == TimerPhase::Running
    }

    pub fn remaining_seconds(&self) -> f32 {
        self.remaining_seconds
    }

    pub fn duration_seconds(&self) -> f32 {
        self.duration_seconds
    }

    pub fn warning_threshold_seconds(&self) -> f32 {
        self.warning_threshold_seconds
    }

    pub fn warning_fired(&self) -> bool {
        self.warning_fired
    }

    pub fn start(&mut self) -> bool {
        if self.phase != TimerPhase::Idle {
            debug!(phase = ?self.phase, "timer_start_ignored");
            return false;
        }
        self.phase = TimerPhase::Running;
        debug!(duration_seconds = self.duration_seconds, "timer_started");
        true
    }

    pub fn pause(&mut self) -> bool {
        if self.phase != TimerPhase::Running {
            return false;
        }
        self.phase = TimerPhase::Paused;
        debug!(remaining_seconds = self.remaining_seconds, "timer_paused");
        true
    }

    pub fn resume(&mut self) -> bool {
        if self.phase != TimerPhase::Paused {
            return false;
        }
        self.phase = TimerPhase::Running;
        debug!(remaining_seconds = self.remaining_seconds, "timer_resumed");
        true
    }

    pub fn reset(&mut self) {
        self.remaining_seconds = self.duration_seconds;
        self.warning_fired = false;
        self.phase = TimerPhase::Idle;
    }

    pub fn restart(&mut self) {
        self.remaining_seconds = self.duration_seconds;
        self.warning_fired = false;
        self.phase = TimerPhase::Running;
        info!(duration_seconds = self.duration_seconds, "timer_restarted");
    }

    /// A running countdown keeps its remaining time; the new duration applies from the
    /// next reset or restart.
    pub fn set_duration(&mut self, duration_seconds: f32) -> Result<(), TimerError> {
        validate_duration(duration_seconds)?;
        self.duration_seconds = duration_seconds;
        if self.phase != TimerPhase::Running {
            self.remaining_seconds = duration_seconds;
            if self.phase == TimerPhase::Expired {
                self.phase = TimerPhase::Idle;
            }
        }
        debug!(duration_seconds, phase = ?self.phase, "timer_duration_set");
        Ok(())
    }

    pub fn tick(&mut self, dt_seconds: f32, bus: &mut SignalBus) {
        if self.phase != TimerPhase::Running || dt_seconds.is_nan() || dt_seconds <= 0.0 {
            return;
        }

        self.remaining_seconds = (self.remaining_seconds - dt_seconds).max(0.0);
        bus.emit(Signal::TimerTick {
            remaining_seconds: self.remaining_seconds,
        });

        if !self.warning_fired && self.remaining_seconds <= self.warning_threshold_seconds {
            self.warning_fired = true;
            info!(remaining_seconds = self.remaining_seconds, "timer_warning");
            bus.emit(Signal::TimerWarning);
        }

        if self.remaining_seconds <= 0.0 {
            self.phase = TimerPhase::Expired;
            info!(duration_seconds = self.duration_seconds, "timer_expired");
            bus.emit(Signal::TimerExpired);
        }
    }

    /// `MM:SS`, seconds floored.
    pub fn formatted(&self) -> String {
        format_clock(self.remaining_seconds)
    }
}

pub fn format_clock(seconds: f32) -> String {
    let total = if seconds.is_finite() {
        seconds.max(0.0).floor() as u64
    } else {
        0
    };
    format!("{:02}:{:02}", total / 60, total % 60)
}

fn validate_duration(duration_seconds: f32) -> Result<(), TimerError> {
    if duration_seconds.is_finite() && duration_seconds > 0.0 {
        Ok(())
    } else {
        Err(TimerError::InvalidDuration(duration_seconds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::SignalKind;

    fn timer(duration: f32, warning: f32) -> CountdownTimer {
        CountdownTimer::new(duration, warning).expect("timer")
    }

    #[test]
    fn new_rejects_non_positive_duration() {
        assert_eq!(
            CountdownTimer::new(0.0, 1.0).unwrap_err(),
            TimerError::InvalidDuration(0.0)
        );
        assert!(CountdownTimer::new(f32::INFINITY, 1.0).is_err());
        assert!(CountdownTimer::new(-5.0, 1.0).is_err());
    }

    #[test]
    fn idle_timer_does_not_advance() {
        let mut bus = SignalBus::default();
        let mut timer = timer(10.0, 2.0);

        timer.tick(1.0, &mut bus);

        assert_eq!(timer.remaining_seconds(), 10.0);
        assert_eq!(bus.current_tick_counts().total(), 0);
    }

    #[test]
    fn running_timer_counts_down_and_emits_tick() {
        let mut bus = SignalBus::default();
        let mut timer = timer(10.0, 2.0);
        assert!(timer.start());

        timer.tick(1.5, &mut bus);

        assert_eq!(timer.remaining_seconds(), 8.5);
        assert_eq!(bus.current_tick_counts().get(SignalKind::TimerTick), 1);
    }

    #[test]
    fn warning_fires_once_per_run() {
        let mut bus = SignalBus::default();
        let mut timer = timer(5.0, 2.0);
        timer.start();

        timer.tick(2.0, &mut bus);
        assert!(!timer.warning_fired());
        timer.tick(1.5, &mut bus);
        assert!(timer.warning_fired());
        timer.tick(0.5, &mut bus);
        assert_eq!(bus.current_tick_counts().get(SignalKind::TimerWarning), 1);

        timer.restart();
        assert!(!timer.warning_fired());
        timer.tick(3.5, &mut bus);
        assert_eq!(bus.current_tick_counts().get(SignalKind::TimerWarning), 2);
    }

    #[test]
    fn expiry_clamps_to_zero_and_fires_once() {
        let mut bus = SignalBus::default();
        let mut timer = timer(3.0, 1.0);
        timer.start();

        timer.tick(10.0, &mut bus);

        assert!(timer.warning_fired());
        assert_eq!(timer.remaining_seconds(), 0.0);
        assert_eq!(timer.phase(), TimerPhase::Expired);
        timer.tick(1.0, &mut bus);
        let counts = bus.current_tick_counts();
        assert_eq!(counts.get(SignalKind::TimerExpired), 1);
        assert_eq!(counts.get(SignalKind::TimerWarning), 1);
        assert_eq!(counts.get(SignalKind::TimerTick), 1);
    }

    #[test]
    fn pause_keeps_remaining_and_resume_continues() {
        let mut bus = SignalBus::default();
        let mut timer = timer(10.0, 1.0);
        timer.start();
        timer.tick(4.0, &mut bus);

        assert!(timer.pause());
        timer.tick(3.0, &mut bus);
        assert_eq!(timer.remaining_seconds(), 6.0);

        assert!(timer.resume());
        timer.tick(1.0, &mut bus);
        assert_eq!(timer.remaining_seconds(), 5.0);
    }

    #[test]
    fn reset_returns_to_idle_with_full_duration() {
        let mut bus = SignalBus::default();
        let mut timer = timer(4.0, 3.0);
        timer.start();
        timer.tick(2.0, &mut bus);

        timer.reset();

        assert_eq!(timer.phase(), TimerPhase::Idle);
        assert_eq!(timer.remaining_seconds(), 4.0);
        assert!(!timer.warning_fired());
    }

    #[test]
    fn start_only_applies_from_idle() {
        let mut timer = timer(4.0, 1.0);
        assert!(timer.start());
        assert!(!timer.start());
        timer.pause();
        assert!(!timer.start());
    }

    #[test]
    fn set_duration_while_running_does_not_truncate_current_run() {
        let mut bus = SignalBus::default();
        let mut timer = timer(120.0, 10.0);
        timer.start();
        timer.tick(10.0, &mut bus);

        timer.set_duration(60.0).expect("duration");

        assert_eq!(timer.remaining_seconds(), 110.0);
        assert_eq!(timer.duration_seconds(), 60.0);
        timer.restart();
        assert_eq!(timer.remaining_seconds(), 60.0);
    }

    #[test]
    fn set_duration_while_stopped_resets_remaining() {
        let mut bus = SignalBus::default();
        let mut timer = timer(2.0, 1.0);
        timer.start();
        timer.tick(5.0, &mut bus);
        assert_eq!(timer.phase(), TimerPhase::Expired);

        timer.set_duration(30.0).expect("duration");

        assert_eq!(timer.remaining_seconds(), 30.0);
        assert_eq!(timer.phase(), TimerPhase::Idle);
        assert!(timer.set_duration(-1.0).is_err());
    }

    #[test]
    fn non_positive_dt_is_ignored() {
        let mut bus = SignalBus::default();
        let mut timer = timer(5.0, 1.0);
        timer.start();

        timer.tick(0.0, &mut bus);
        timer.tick(-1.0, &mut bus);
        timer.tick(f32::NAN, &mut bus);

        assert_eq!(timer.remaining_seconds(), 5.0);
        assert_eq!(bus.current_tick_counts().total(), 0);
    }

    #[test]
    fn formatted_time_is_minutes_and_seconds() {
        assert_eq!(format_clock(120.0), "02:00");
        assert_eq!(format_clock(59.9), "00:59");
        assert_eq!(format_clock(61.5), "01:01");
        assert_eq!(format_clock(-3.0), "00:00");
        assert_eq!(timer(90.0, 1.0).formatted(), "01:30");
    }
}
