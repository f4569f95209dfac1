use std::fmt;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::signals::{Signal, SignalBus};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProtocolSettings {
    pub initial_duration_seconds: f32,
    pub final_act_duration_seconds: f32,
    pub cycles_before_final_act: u32,
    pub final_act_enabled: bool,
    pub hatch_unlock_delay_seconds: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolPhase {
    Active { final_act: bool },
    Suspended,
}

impl Default for ProtocolPhase {
    fn default() -> Self {
        Self::Active { final_act: false }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProtocolState {
    pub cycle_count: u32,
    pub success_count: u32,
    pub failure_count: u32,
    pub phase: ProtocolPhase,
}

impl ProtocolState {
    pub fn is_final_act(&self) -> bool {
        matches!(self.phase, ProtocolPhase::Active { final_act: true })
    }

    pub fn is_suspended(&self) -> bool {
        self.phase == ProtocolPhase::Suspended
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolInput {
    CodeCorrect,
    CodeIncorrect,
    TimerExpired,
}

impl fmt::Display for ProtocolInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CodeCorrect => "code_correct",
            Self::CodeIncorrect => "code_incorrect",
            Self::TimerExpired => "timer_expired",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProtocolEffect {
    SetTimerDuration { duration_seconds: f32 },
    RestartTimer,
    ResetTimer,
    PauseTimer,
    LockInput,
    UnlockInput,
    ClearInput,
    ScheduleHatchUnlock { delay_seconds: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("protocol is suspended; {input} ignored")]
pub struct SignalWhileSuspended {
    pub input: ProtocolInput,
}

#[derive(Debug, Clone)]
pub struct ProtocolStateMachine {
    settings: ProtocolSettings,
    state: ProtocolState,
    hatch_unlocked: bool,
}

impl ProtocolStateMachine {
    pub fn new(settings: ProtocolSettings) -> Self {
        Self {
            settings,
            state: ProtocolState::default(),
            hatch_unlocked: false,
        }
    }

    pub fn settings(&self) -> &ProtocolSettings {
        &self.settings
    }

    pub fn state(&self) -> ProtocolState {
        self.state
    }

    pub fn phase(&self) -> ProtocolPhase {
        self.state.phase
    }

    pub fn is_final_act(&self) -> bool {
        self.state.is_final_act()
    }

    pub fn is_suspended(&self) -> bool {
        self.state.is_suspended()
    }

    pub fn hatch_unlocked(&self) -> bool {
        self.hatch_unlocked
    }

    pub fn start(&mut self, bus: &mut SignalBus) -> Option<Vec<ProtocolEffect>> {
        if self.is_suspended() {
            warn!("protocol_start_ignored_while_suspended");
            return None;
        }
        self.state = ProtocolState::default();
        info!(
            initial_duration_seconds = self.settings.initial_duration_seconds,
            cycles_before_final_act = self.settings.cycles_before_final_act,
            "protocol_started"
        );
        bus.emit(Signal::ProtocolStarted);
        Some(vec![
            ProtocolEffect::SetTimerDuration {
                duration_seconds: self.settings.initial_duration_seconds,
            },
            ProtocolEffect::RestartTimer,
        ])
    }

    pub fn handle(
        &mut self,
        input: ProtocolInput,
        bus: &mut SignalBus,
    ) -> Result<Vec<ProtocolEffect>, SignalWhileSuspended> {
        let ProtocolPhase::Active { final_act } = self.state.phase else {
            return Err(SignalWhileSuspended { input });
        };

        let effects = match input {
            ProtocolInput::CodeCorrect => self.on_code_correct(final_act, bus),
            ProtocolInput::CodeIncorrect => {
                debug!(cycle = self.state.cycle_count, "incorrect_code_no_penalty");
                Vec::new()
            }
            ProtocolInput::TimerExpired => self.on_timer_expired(final_act, bus),
        };
        debug_assert_eq!(
            self.state.success_count + self.state.failure_count,
            self.state.cycle_count
        );
        Ok(effects)
    }

    /// Escalates immediately. No effects when already in the final act.
    pub fn force_final_act(
        &mut self,
        bus: &mut SignalBus,
    ) -> Result<Vec<ProtocolEffect>, SignalWhileSuspended> {
        match self.state.phase {
            ProtocolPhase::Suspended => Err(SignalWhileSuspended {
                input: ProtocolInput::CodeCorrect,
            }),
            ProtocolPhase::Active { final_act: true } => Ok(Vec::new()),
            ProtocolPhase::Active { final_act: false } => Ok(self.trigger_final_act(bus)),
        }
    }

    /// One-shot terminal notification after suspension. Returns whether it fired.
    pub fn unlock_hatch(&mut self, bus: &mut SignalBus) -> bool {
        if !self.is_suspended() || self.hatch_unlocked {
            return false;
        }
        self.hatch_unlocked = true;
        info!("hatch_unlocked");
        bus.emit(Signal::HatchUnlocked);
        true
    }

    pub fn reset(&mut self, bus: &mut SignalBus) -> Vec<ProtocolEffect> {
        self.state = ProtocolState::default();
        self.hatch_unlocked = false;
        info!("protocol_reset");
        bus.emit(Signal::ProtocolReset);
        vec![
            ProtocolEffect::UnlockInput,
            ProtocolEffect::ClearInput,
            ProtocolEffect::SetTimerDuration {
                duration_seconds: self.settings.initial_duration_seconds,
            },
            ProtocolEffect::ResetTimer,
        ]
    }

    pub fn status_line(&self) -> String {
        if self.is_suspended() {
            return "PROTOCOL SUSPENDED".to_string();
        }
        let mut status = format!(
            "Cycle: {} | Success: {} | Failed: {}",
            self.state.cycle_count, self.state.success_count, self.state.failure_count
        );
        if self.is_final_act() {
            status.push_str(" | FINAL ACT");
        }
        status
    }

    fn on_code_correct(&mut self, final_act: bool, bus: &mut SignalBus) -> Vec<ProtocolEffect> {
        self.state.success_count = self.state.success_count.saturating_add(1);
        self.state.cycle_count = self.state.cycle_count.saturating_add(1);
        info!(
            cycle = self.state.cycle_count,
            success_count = self.state.success_count,
            "cycle_completed"
        );
        bus.emit(Signal::CycleCompleted {
            cycle: self.state.cycle_count,
        });

        if self.settings.final_act_enabled
            && !final_act
            && self.state.success_count >= self.settings.cycles_before_final_act
        {
            return self.trigger_final_act(bus);
        }
        Vec::new()
    }

    fn on_timer_expired(&mut self, final_act: bool, bus: &mut SignalBus) -> Vec<ProtocolEffect> {
        self.state.failure_count = self.state.failure_count.saturating_add(1);
        self.state.cycle_count = self.state.cycle_count.saturating_add(1);
        warn!(
            cycle = self.state.cycle_count,
            failure_count = self.state.failure_count,
            "cycle_failed"
        );
        bus.emit(Signal::CycleFailed {
            cycle: self.state.cycle_count,
        });

        if final_act {
            return self.suspend(bus);
        }
        vec![ProtocolEffect::RestartTimer]
    }

    fn trigger_final_act(&mut self, bus: &mut SignalBus) -> Vec<ProtocolEffect> {
        self.state.phase = ProtocolPhase::Active { final_act: true };
        let duration_seconds = self.settings.final_act_duration_seconds;
        warn!(duration_seconds, "final_act_triggered");
        bus.emit(Signal::FinalActTriggered { duration_seconds });
        vec![
            ProtocolEffect::SetTimerDuration { duration_seconds },
            ProtocolEffect::RestartTimer,
        ]
    }

    fn suspend(&mut self, bus: &mut SignalBus) -> Vec<ProtocolEffect> {
        self.state.phase = ProtocolPhase::Suspended;
        warn!(
            cycle = self.state.cycle_count,
            hatch_unlock_delay_seconds = self.settings.hatch_unlock_delay_seconds,
            "protocol_suspended"
        );
        bus.emit(Signal::ProtocolSuspended);
        vec![
            ProtocolEffect::PauseTimer,
            ProtocolEffect::LockInput,
            ProtocolEffect::ScheduleHatchUnlock {
                delay_seconds: self.settings.hatch_unlock_delay_seconds,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::SignalKind;

    fn settings(cycles_before_final_act: u32) -> ProtocolSettings {
        ProtocolSettings {
            initial_duration_seconds: 120.0,
            final_act_duration_seconds: 60.0,
            cycles_before_final_act,
            final_act_enabled: true,
            hatch_unlock_delay_seconds: 2.0,
        }
    }

    fn assert_counters_consistent(machine: &ProtocolStateMachine) {
        let state = machine.state();
        assert_eq!(state.success_count + state.failure_count, state.cycle_count);
    }

    #[test]
    fn starts_active_non_final_with_zero_counters() {
        let machine = ProtocolStateMachine::new(settings(2));

        assert_eq!(machine.state(), ProtocolState::default());
        assert_eq!(machine.phase(), ProtocolPhase::Active { final_act: false });
    }

    #[test]
    fn start_programs_initial_duration_and_restarts_timer() {
        let mut bus = SignalBus::default();
        let mut machine = ProtocolStateMachine::new(settings(2));

        let effects = machine.start(&mut bus).expect("started");

        assert_eq!(
            effects,
            vec![
                ProtocolEffect::SetTimerDuration {
                    duration_seconds: 120.0
                },
                ProtocolEffect::RestartTimer
            ]
        );
        assert_eq!(bus.current_tick_counts().get(SignalKind::ProtocolStarted), 1);
    }

    #[test]
    fn incorrect_codes_never_change_state() {
        let mut bus = SignalBus::default();
        let mut machine = ProtocolStateMachine::new(settings(2));

        for _ in 0..25 {
            let effects = machine
                .handle(ProtocolInput::CodeIncorrect, &mut bus)
                .expect("active");
            assert!(effects.is_empty());
        }

        assert_eq!(machine.state(), ProtocolState::default());
        assert_eq!(bus.current_tick_counts().total(), 0);
    }

    #[test]
    fn success_below_threshold_does_not_restart_timer() {
        let mut bus = SignalBus::default();
        let mut machine = ProtocolStateMachine::new(settings(2));

        let effects = machine
            .handle(ProtocolInput::CodeCorrect, &mut bus)
            .expect("active");

        assert!(effects.is_empty());
        assert_eq!(machine.state().success_count, 1);
        assert_eq!(machine.state().cycle_count, 1);
        assert!(!machine.is_final_act());
        assert_counters_consistent(&machine);
    }

    #[test]
    fn reaching_threshold_escalates_to_final_act() {
        let mut bus = SignalBus::default();
        let mut machine = ProtocolStateMachine::new(settings(2));
        machine
            .handle(ProtocolInput::CodeCorrect, &mut bus)
            .expect("active");

        let effects = machine
            .handle(ProtocolInput::CodeCorrect, &mut bus)
            .expect("active");

        assert!(machine.is_final_act());
        assert_eq!(
            effects,
            vec![
                ProtocolEffect::SetTimerDuration {
                    duration_seconds: 60.0
                },
                ProtocolEffect::RestartTimer
            ]
        );
        assert_eq!(bus.current_tick_counts().get(SignalKind::FinalActTriggered), 1);
    }

    #[test]
    fn successes_in_final_act_do_not_escalate_again() {
        let mut bus = SignalBus::default();
        let mut machine = ProtocolStateMachine::new(settings(1));
        machine
            .handle(ProtocolInput::CodeCorrect, &mut bus)
            .expect("active");

        let effects = machine
            .handle(ProtocolInput::CodeCorrect, &mut bus)
            .expect("active");

        assert!(effects.is_empty());
        assert_eq!(bus.current_tick_counts().get(SignalKind::FinalActTriggered), 1);
        assert_eq!(machine.state().success_count, 2);
    }

    #[test]
    fn disabled_final_act_never_escalates() {
        let mut bus = SignalBus::default();
        let mut machine = ProtocolStateMachine::new(ProtocolSettings {
            final_act_enabled: false,
            ..settings(1)
        });

        for _ in 0..3 {
            machine
                .handle(ProtocolInput::CodeCorrect, &mut bus)
                .expect("active");
        }

        assert_eq!(machine.phase(), ProtocolPhase::Active { final_act: false });
    }

    #[test]
    fn expiry_outside_final_act_restarts_timer() {
        let mut bus = SignalBus::default();
        let mut machine = ProtocolStateMachine::new(settings(2));

        let effects = machine
            .handle(ProtocolInput::TimerExpired, &mut bus)
            .expect("active");

        assert_eq!(effects, vec![ProtocolEffect::RestartTimer]);
        assert_eq!(machine.state().failure_count, 1);
        assert_eq!(machine.state().cycle_count, 1);
        assert_eq!(machine.phase(), ProtocolPhase::Active { final_act: false });
        assert_counters_consistent(&machine);
    }

    #[test]
    fn first_expiry_in_final_act_suspends() {
        let mut bus = SignalBus::default();
        let mut machine = ProtocolStateMachine::new(settings(1));
        machine
            .handle(ProtocolInput::CodeCorrect, &mut bus)
            .expect("active");

        let effects = machine
            .handle(ProtocolInput::TimerExpired, &mut bus)
            .expect("active");

        assert!(machine.is_suspended());
        assert_eq!(
            effects,
            vec![
                ProtocolEffect::PauseTimer,
                ProtocolEffect::LockInput,
                ProtocolEffect::ScheduleHatchUnlock { delay_seconds: 2.0 }
            ]
        );
        assert_eq!(bus.current_tick_counts().get(SignalKind::ProtocolSuspended), 1);
        assert_counters_consistent(&machine);
    }

    #[test]
    fn suspension_is_absorbing() {
        let mut bus = SignalBus::default();
        let mut machine = ProtocolStateMachine::new(settings(1));
        machine
            .handle(ProtocolInput::CodeCorrect, &mut bus)
            .expect("active");
        machine
            .handle(ProtocolInput::TimerExpired, &mut bus)
            .expect("active");
        let frozen = machine.state();
        bus.finish_tick_rollover();

        for input in [
            ProtocolInput::CodeCorrect,
            ProtocolInput::CodeIncorrect,
            ProtocolInput::TimerExpired,
        ] {
            assert_eq!(
                machine.handle(input, &mut bus),
                Err(SignalWhileSuspended { input })
            );
        }

        assert_eq!(machine.state(), frozen);
        assert!(machine.start(&mut bus).is_none());
        assert!(machine.force_final_act(&mut bus).is_err());
        assert_eq!(bus.current_tick_counts().total(), 0);
    }

    #[test]
    fn hatch_unlocks_once_and_only_when_suspended() {
        let mut bus = SignalBus::default();
        let mut machine = ProtocolStateMachine::new(settings(1));
        assert!(!machine.unlock_hatch(&mut bus));

        machine.force_final_act(&mut bus).expect("active");
        machine
            .handle(ProtocolInput::TimerExpired, &mut bus)
            .expect("active");

        assert!(machine.unlock_hatch(&mut bus));
        assert!(!machine.unlock_hatch(&mut bus));
        assert_eq!(bus.current_tick_counts().get(SignalKind::HatchUnlocked), 1);
    }

    #[test]
    fn force_final_act_is_noop_when_already_final() {
        let mut bus = SignalBus::default();
        let mut machine = ProtocolStateMachine::new(settings(5));

        assert_eq!(machine.force_final_act(&mut bus).expect("active").len(), 2);
        assert!(machine.force_final_act(&mut bus).expect("active").is_empty());
        assert_eq!(machine.state().cycle_count, 0);
    }

    #[test]
    fn reset_leaves_suspension_and_zeroes_counters() {
        let mut bus = SignalBus::default();
        let mut machine = ProtocolStateMachine::new(settings(1));
        machine
            .handle(ProtocolInput::CodeCorrect, &mut bus)
            .expect("active");
        machine
            .handle(ProtocolInput::TimerExpired, &mut bus)
            .expect("active");
        machine.unlock_hatch(&mut bus);

        let effects = machine.reset(&mut bus);

        assert_eq!(machine.state(), ProtocolState::default());
        assert!(!machine.hatch_unlocked());
        assert_eq!(effects.last(), Some(&ProtocolEffect::ResetTimer));
        assert!(effects.contains(&ProtocolEffect::UnlockInput));
    }

    #[test]
    fn status_line_reflects_phase() {
        let mut bus = SignalBus::default();
        let mut machine = ProtocolStateMachine::new(settings(1));
        assert_eq!(machine.status_line(), "Cycle: 0 | Success: 0 | Failed: 0");

        machine
            .handle(ProtocolInput::CodeCorrect, &mut bus)
            .expect("active");
        assert_eq!(
            machine.status_line(),
            "Cycle: 1 | Success: 1 | Failed: 0 | FINAL ACT"
        );

        machine
            .handle(ProtocolInput::TimerExpired, &mut bus)
            .expect("active");
        assert_eq!(machine.status_line(), "PROTOCOL SUSPENDED");
    }
}
