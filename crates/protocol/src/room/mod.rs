use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, RoomConfig};
use crate::machine::{
    ProtocolEffect, ProtocolInput, ProtocolPhase, ProtocolState, ProtocolStateMachine,
    SignalWhileSuspended,
};
use crate::schedule::{DeferredAction, DueTask, Scheduler, TaskHandle};
use crate::session::{CodeInputSession, InputRejected, SubmitOutcome, SubmitRejected};
use crate::signals::{Digit, ObserverId, Signal, SignalBus, SignalCounts};
use crate::timer::{CountdownTimer, TimerPhase};
use crate::validator::CodeValidator;
use crate::weight::{ObjectId, ScaleRejected, ScaleRole, WeighableObject, WeightPuzzle};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimerSnapshot {
    pub phase: &'static str,
    pub remaining_seconds: f32,
    pub duration_seconds: f32,
    pub formatted: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputSnapshot {
    pub display: String,
    pub locked: bool,
    pub pending_action: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodeSnapshot {
    pub name: String,
    pub used: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightSnapshot {
    pub reference_kg: f32,
    pub player_kg: f32,
    pub reference_objects: usize,
    pub player_objects: usize,
    pub matched: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomSnapshot {
    pub tick_count: u64,
    pub elapsed_seconds: f64,
    pub phase: &'static str,
    pub cycle_count: u32,
    pub success_count: u32,
    pub failure_count: u32,
    pub hatch_unlocked: bool,
    pub status_line: String,
    pub timer: TimerSnapshot,
    pub input: InputSnapshot,
    pub codes: Vec<CodeSnapshot>,
    pub codes_remaining: usize,
    pub pending_tasks: usize,
    pub weights: Option<WeightSnapshot>,
}

#[derive(Debug)]
pub struct EscapeRoom {
    session: CodeInputSession,
    timer: CountdownTimer,
    machine: ProtocolStateMachine,
    scheduler: Scheduler,
    bus: SignalBus,
    weights: Option<WeightPuzzle>,
    next_cycle_delay_seconds: f32,
    next_cycle: Option<TaskHandle>,
    hatch_unlock: Option<TaskHandle>,
    tick_count: u64,
    elapsed_seconds: f64,
}

impl EscapeRoom {
    pub fn new(config: &RoomConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let protocol = config.protocol_settings();
        let timer = CountdownTimer::new(
            protocol.initial_duration_seconds,
            config.timer.warning_threshold_seconds,
        )?;
        let session = CodeInputSession::new(
            config.session_settings(),
            CodeValidator::new(config.target_codes()),
        );
        info!(
            codes = config.codes.len(),
            arity = config.input.arity,
            cycles_before_final_act = protocol.cycles_before_final_act,
            weight_puzzle = config.weight_puzzle.is_some(),
            "escape_room_created"
        );
        Ok(Self {
            session,
            timer,
            machine: ProtocolStateMachine::new(protocol),
            scheduler: Scheduler::default(),
            bus: SignalBus::default(),
            weights: config
                .weight_puzzle
                .as_ref()
                .map(|weights| WeightPuzzle::new(weights.tolerance_kg)),
            next_cycle_delay_seconds: config.input.next_cycle_delay_seconds,
            next_cycle: None,
            hatch_unlock: None,
            tick_count: 0,
            elapsed_seconds: 0.0,
        })
    }

    pub fn subscribe(&mut self, observer: impl FnMut(&Signal) + 'static) -> ObserverId {
        let id = self.bus.subscribe(observer);
        debug!(observers = self.bus.observer_count(), "observer_subscribed");
        id
    }

    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        self.bus.unsubscribe(id)
    }

    /// Returns false when the protocol is suspended.
    pub fn start_protocol(&mut self) -> bool {
        let Some(effects) = self.machine.start(&mut self.bus) else {
            return false;
        };
        self.cancel_next_cycle();
        self.apply_effects(effects);
        self.route_pending();
        true
    }

    pub fn press_digit(&mut self, digit: Digit) -> Result<(), InputRejected> {
        let result = self
            .session
            .add_digit(digit, &mut self.bus, &mut self.scheduler);
        self.route_pending();
        if let Err(rejected) = &result {
            debug!(digit, error = %rejected, "digit_rejected");
        }
        result
    }

    pub fn submit(&mut self) -> Result<SubmitOutcome, SubmitRejected> {
        let result = self.session.submit(&mut self.bus, &mut self.scheduler);
        self.route_pending();
        if let Err(rejected) = &result {
            debug!(error = %rejected, "submit_rejected");
        }
        result
    }

    pub fn clear_input(&mut self) {
        self.session.clear(&mut self.bus);
        self.route_pending();
    }

    pub fn lock_input(&mut self) {
        self.session.lock(&mut self.bus);
        self.route_pending();
    }

    pub fn unlock_input(&mut self) {
        self.session.unlock(&mut self.bus);
        self.route_pending();
    }

    pub fn tick(&mut self, elapsed_seconds: f32) {
        let dt_seconds = if elapsed_seconds.is_finite() {
            elapsed_seconds.max(0.0)
        } else {
            warn!(elapsed_seconds, "non_finite_tick_ignored");
            0.0
        };

        for task in self.scheduler.advance(dt_seconds) {
            if task.is_cancelled() {
                debug!(task = ?task.action, "cancelled_task_skipped");
                continue;
            }
            self.run_deferred(&task);
            self.route_pending();
        }

        self.timer.tick(dt_seconds, &mut self.bus);
        self.route_pending();

        self.bus.finish_tick_rollover();
        self.tick_count = self.tick_count.saturating_add(1);
        self.elapsed_seconds += f64::from(dt_seconds);
    }

    pub fn force_final_act(&mut self) -> Result<(), SignalWhileSuspended> {
        let effects = self.machine.force_final_act(&mut self.bus)?;
        if !effects.is_empty() {
            self.cancel_next_cycle();
        }
        self.apply_effects(effects);
        self.route_pending();
        Ok(())
    }

    /// Full reinitialization. Consumed target codes stay consumed.
    pub fn reset_protocol(&mut self) {
        self.scheduler.cancel_all();
        self.next_cycle = None;
        self.hatch_unlock = None;
        if let Some(weights) = self.weights.as_mut() {
            weights.reset();
        }
        let effects = self.machine.reset(&mut self.bus);
        self.apply_effects(effects);
        self.route_pending();
    }

    pub fn restart_protocol(&mut self) -> bool {
        self.reset_protocol();
        self.start_protocol()
    }

    /// Restarts the countdown at the current mode's duration without touching the
    /// protocol counters. Ignored once suspended.
    pub fn restart_timer(&mut self) -> bool {
        if self.machine.is_suspended() {
            debug!("timer_restart_ignored");
            return false;
        }
        self.cancel_next_cycle();
        self.timer.restart();
        true
    }

    pub fn reset_weights(&mut self) -> Result<(), ScaleRejected> {
        let weights = self.weights.as_mut().ok_or(ScaleRejected::NoWeightPuzzle)?;
        weights.reset();
        Ok(())
    }

    pub fn place_object(
        &mut self,
        role: ScaleRole,
        object: WeighableObject,
    ) -> Result<(), ScaleRejected> {
        let weights = self.weights.as_mut().ok_or(ScaleRejected::NoWeightPuzzle)?;
        let result = weights.place(role, object, &mut self.bus);
        self.route_pending();
        result
    }

    pub fn remove_object(&mut self, role: ScaleRole, id: ObjectId) -> Result<(), ScaleRejected> {
        let weights = self.weights.as_mut().ok_or(ScaleRejected::NoWeightPuzzle)?;
        let result = weights.remove(role, id, &mut self.bus);
        self.route_pending();
        result
    }

    pub fn set_object_held(
        &mut self,
        role: ScaleRole,
        id: ObjectId,
        held: bool,
    ) -> Result<(), ScaleRejected> {
        let weights = self.weights.as_mut().ok_or(ScaleRejected::NoWeightPuzzle)?;
        let result = weights.set_held(role, id, held, &mut self.bus);
        self.route_pending();
        result
    }

    pub fn session(&self) -> &CodeInputSession {
        &self.session
    }

    pub fn timer(&self) -> &CountdownTimer {
        &self.timer
    }

    pub fn machine(&self) -> &ProtocolStateMachine {
        &self.machine
    }

    pub fn state(&self) -> ProtocolState {
        self.machine.state()
    }

    pub fn weights(&self) -> Option<&WeightPuzzle> {
        self.weights.as_ref()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed_seconds
    }

    pub fn is_next_cycle_pending(&self) -> bool {
        self.next_cycle
            .as_ref()
            .is_some_and(|handle| !handle.is_cancelled())
    }

    pub fn last_tick_counts(&self) -> SignalCounts {
        self.bus.last_tick_counts()
    }

    pub fn status_line(&self) -> String {
        self.machine.status_line()
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        let state = self.machine.state();
        RoomSnapshot {
            tick_count: self.tick_count,
            elapsed_seconds: self.elapsed_seconds,
            phase: match state.phase {
                ProtocolPhase::Active { final_act: false } => "active",
                ProtocolPhase::Active { final_act: true } => "final_act",
                ProtocolPhase::Suspended => "suspended",
            },
            cycle_count: state.cycle_count,
            success_count: state.success_count,
            failure_count: state.failure_count,
            hatch_unlocked: self.machine.hatch_unlocked(),
            status_line: self.status_line(),
            timer: TimerSnapshot {
                phase: match self.timer.phase() {
                    TimerPhase::Idle => "idle",
                    TimerPhase::Running => "running",
                    TimerPhase::Paused => "paused",
                    TimerPhase::Expired => "expired",
                },
                remaining_seconds: self.timer.remaining_seconds(),
                duration_seconds: self.timer.duration_seconds(),
                formatted: self.timer.formatted(),
            },
            input: InputSnapshot {
                display: self.session.display_text(),
                locked: self.session.is_locked(),
                pending_action: self.session.pending_action().map(deferred_action_token),
            },
            codes: self
                .session
                .validator()
                .codes()
                .iter()
                .map(|code| CodeSnapshot {
                    name: code.name().to_string(),
                    used: code.is_used(),
                })
                .collect(),
            codes_remaining: self.session.validator().unused_count(),
            pending_tasks: self.scheduler.pending_count(),
            weights: self.weights.as_ref().map(|weights| {
                let reference = weights.scale(ScaleRole::Reference);
                let player = weights.scale(ScaleRole::Player);
                WeightSnapshot {
                    reference_kg: reference.current_weight_kg(),
                    player_kg: player.current_weight_kg(),
                    reference_objects: reference.object_count(),
                    player_objects: player.object_count(),
                    matched: weights.is_matched(),
                }
            }),
        }
    }

    fn route_pending(&mut self) {
        while let Some(signal) = self.bus.pop_pending() {
            let input = match signal {
                Signal::CodeCorrect { .. } => ProtocolInput::CodeCorrect,
                Signal::CodeIncorrect | Signal::CodeAlreadyUsed { .. } => {
                    ProtocolInput::CodeIncorrect
                }
                Signal::TimerExpired => ProtocolInput::TimerExpired,
                _ => continue,
            };
            match self.machine.handle(input, &mut self.bus) {
                Ok(effects) => {
                    self.apply_effects(effects);
                    if input == ProtocolInput::CodeCorrect {
                        self.begin_next_cycle();
                    }
                }
                Err(ignored) => debug!(error = %ignored, "protocol_input_ignored"),
            }
        }
    }

    fn apply_effects(&mut self, effects: Vec<ProtocolEffect>) {
        for effect in effects {
            debug!(?effect, "protocol_effect");
            match effect {
                ProtocolEffect::SetTimerDuration { duration_seconds } => {
                    if let Err(error) = self.timer.set_duration(duration_seconds) {
                        warn!(error = %error, "timer_duration_rejected");
                    }
                }
                ProtocolEffect::RestartTimer => self.timer.restart(),
                ProtocolEffect::ResetTimer => self.timer.reset(),
                ProtocolEffect::PauseTimer => {
                    self.timer.pause();
                }
                ProtocolEffect::LockInput => self.session.lock(&mut self.bus),
                ProtocolEffect::UnlockInput => self.session.unlock(&mut self.bus),
                ProtocolEffect::ClearInput => self.session.clear(&mut self.bus),
                ProtocolEffect::ScheduleHatchUnlock { delay_seconds } => {
                    if let Some(previous) = self.hatch_unlock.take() {
                        previous.cancel();
                    }
                    self.hatch_unlock = Some(
                        self.scheduler
                            .schedule(DeferredAction::UnlockHatch, delay_seconds),
                    );
                }
            }
        }
    }

    fn begin_next_cycle(&mut self) {
        self.cancel_next_cycle();
        if self.next_cycle_delay_seconds <= 0.0 {
            self.timer.restart();
            return;
        }
        self.timer.pause();
        debug!(
            delay_seconds = self.next_cycle_delay_seconds,
            "next_cycle_scheduled"
        );
        self.next_cycle = Some(
            self.scheduler
                .schedule(DeferredAction::NextCycle, self.next_cycle_delay_seconds),
        );
    }

    fn cancel_next_cycle(&mut self) {
        if let Some(handle) = self.next_cycle.take() {
            handle.cancel();
        }
    }

    fn run_deferred(&mut self, task: &DueTask) {
        match task.action {
            DeferredAction::AutoSubmit | DeferredAction::ClearAfterFeedback => {
                self.session
                    .run_deferred(task, &mut self.bus, &mut self.scheduler);
            }
            DeferredAction::NextCycle => {
                if !is_current(&self.next_cycle, task) {
                    return;
                }
                self.next_cycle = None;
                if self.machine.is_suspended() {
                    return;
                }
                info!(
                    cycle = self.machine.state().cycle_count,
                    duration_seconds = self.timer.duration_seconds(),
                    "next_cycle_started"
                );
                self.timer.restart();
            }
            DeferredAction::UnlockHatch => {
                if !is_current(&self.hatch_unlock, task) {
                    return;
                }
                self.hatch_unlock = None;
                self.machine.unlock_hatch(&mut self.bus);
            }
        }
    }
}

fn is_current(handle: &Option<TaskHandle>, task: &DueTask) -> bool {
    handle
        .as_ref()
        .is_some_and(|handle| handle.id() == task.id && !handle.is_cancelled())
}

fn deferred_action_token(action: DeferredAction) -> &'static str {
    match action {
        DeferredAction::AutoSubmit => "auto_submit",
        DeferredAction::ClearAfterFeedback => "clear_after_feedback",
        DeferredAction::NextCycle => "next_cycle",
        DeferredAction::UnlockHatch => "unlock_hatch",
    }
}
