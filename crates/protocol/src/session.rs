use thiserror::Error;
use tracing::{debug, info};

use crate::schedule::{DeferredAction, DueTask, Scheduler, TaskHandle};
use crate::signals::{Digit, Signal, SignalBus};
use crate::validator::CodeValidator;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AutoSubmit {
    Disabled,
    Immediate,
    Delayed { delay_seconds: f32 },
}

impl AutoSubmit {
    pub fn from_settings(enabled: bool, delay_seconds: f32) -> Self {
        match (enabled, delay_seconds > 0.0) {
            (false, _) => Self::Disabled,
            (true, false) => Self::Immediate,
            (true, true) => Self::Delayed { delay_seconds },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSettings {
    pub arity: usize,
    pub auto_submit: AutoSubmit,
    pub incorrect_clear_delay_seconds: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InputRejected {
    #[error("input is locked")]
    Locked,
    #[error("input buffer already holds {arity} digits")]
    BufferFull { arity: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitRejected {
    #[error("input is locked")]
    Locked,
    #[error("code incomplete: expected {expected} digits, got {actual}")]
    Incomplete { expected: usize, actual: usize },
    #[error("previous code is still showing feedback")]
    FeedbackPending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Correct { index: usize, name: String },
    AlreadyUsed { index: usize, name: String },
    Incorrect,
}

impl SubmitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Correct { .. })
    }
}

#[derive(Debug)]
pub struct CodeInputSession {
    settings: SessionSettings,
    validator: CodeValidator,
    buffer: Vec<Digit>,
    locked: bool,
    pending: Option<TaskHandle>,
}

impl CodeInputSession {
    pub fn new(settings: SessionSettings, validator: CodeValidator) -> Self {
        Self {
            buffer: Vec::with_capacity(settings.arity),
            settings,
            validator,
            locked: false,
            pending: None,
        }
    }

    pub fn add_digit(
        &mut self,
        digit: Digit,
        bus: &mut SignalBus,
        scheduler: &mut Scheduler,
    ) -> Result<(), InputRejected> {
        if self.locked {
            return Err(InputRejected::Locked);
        }
        if self.is_full() {
            return Err(InputRejected::BufferFull {
                arity: self.settings.arity,
            });
        }

        self.buffer.push(digit);
        debug!(digit, len = self.buffer.len(), "digit_entered");
        bus.emit(Signal::DigitEntered { digit });

        if self.is_full() {
            match self.settings.auto_submit {
                AutoSubmit::Disabled => {}
                AutoSubmit::Immediate => {
                    if let Err(rejected) = self.submit(bus, scheduler) {
                        debug!(error = %rejected, "auto_submit_rejected");
                    }
                }
                AutoSubmit::Delayed { delay_seconds } => {
                    self.replace_pending(
                        scheduler.schedule(DeferredAction::AutoSubmit, delay_seconds),
                    );
                }
            }
        }
        Ok(())
    }

    pub fn submit(
        &mut self,
        bus: &mut SignalBus,
        scheduler: &mut Scheduler,
    ) -> Result<SubmitOutcome, SubmitRejected> {
        if self.locked {
            return Err(SubmitRejected::Locked);
        }
        match self.pending_action() {
            Some(DeferredAction::ClearAfterFeedback) => {
                return Err(SubmitRejected::FeedbackPending)
            }
            Some(_) => self.cancel_pending(),
            None => {}
        }
        if self.buffer.len() != self.settings.arity {
            return Err(SubmitRejected::Incomplete {
                expected: self.settings.arity,
                actual: self.buffer.len(),
            });
        }

        let outcome = match self.validator.validate(&self.buffer) {
            Some(matched) if !matched.already_used => {
                self.validator.mark_used(matched.index);
                info!(index = matched.index, name = matched.name.as_str(), "code_correct");
                bus.emit(Signal::CodeCorrect {
                    index: matched.index,
                    name: matched.name.clone(),
                });
                self.clear(bus);
                SubmitOutcome::Correct {
                    index: matched.index,
                    name: matched.name,
                }
            }
            Some(matched) => {
                info!(index = matched.index, name = matched.name.as_str(), "code_already_used");
                bus.emit(Signal::CodeAlreadyUsed {
                    index: matched.index,
                    name: matched.name.clone(),
                });
                self.begin_feedback_clear(bus, scheduler);
                SubmitOutcome::AlreadyUsed {
                    index: matched.index,
                    name: matched.name,
                }
            }
            None => {
                info!(entered = ?self.buffer, "code_incorrect");
                bus.emit(Signal::CodeIncorrect);
                self.begin_feedback_clear(bus, scheduler);
                SubmitOutcome::Incorrect
            }
        };
        Ok(outcome)
    }

    pub fn clear(&mut self, bus: &mut SignalBus) {
        self.cancel_pending();
        self.buffer.clear();
        bus.emit(Signal::CodeCleared);
    }

    pub fn lock(&mut self, bus: &mut SignalBus) {
        self.cancel_pending();
        if self.locked {
            return;
        }
        self.locked = true;
        info!("input_locked");
        bus.emit(Signal::InputLocked);
    }

    pub fn unlock(&mut self, bus: &mut SignalBus) {
        if !self.locked {
            return;
        }
        self.locked = false;
        info!("input_unlocked");
        bus.emit(Signal::InputUnlocked);
    }

    pub fn run_deferred(&mut self, task: &DueTask, bus: &mut SignalBus, scheduler: &mut Scheduler) {
        let is_current = self
            .pending
            .as_ref()
            .is_some_and(|pending| pending.id() == task.id);
        if !is_current || task.is_cancelled() {
            debug!(task = ?task.action, "stale_session_task_skipped");
            return;
        }
        self.pending = None;
        match task.action {
            DeferredAction::AutoSubmit => {
                if let Err(rejected) = self.submit(bus, scheduler) {
                    debug!(error = %rejected, "auto_submit_rejected");
                }
            }
            DeferredAction::ClearAfterFeedback => self.clear(bus),
            DeferredAction::NextCycle | DeferredAction::UnlockHatch => {}
        }
    }

    pub fn buffer(&self) -> &[Digit] {
        &self.buffer
    }

    pub fn arity(&self) -> usize {
        self.settings.arity
    }

    pub fn is_full(&self) -> bool {
        self.buffer.len() >= self.settings.arity
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn pending_action(&self) -> Option<DeferredAction> {
        self.pending
            .as_ref()
            .filter(|pending| !pending.is_cancelled())
            .map(TaskHandle::action)
    }

    pub fn validator(&self) -> &CodeValidator {
        &self.validator
    }

    /// Entered digits separated by spaces, `_` for empty slots: `"4 8 _ _"`.
    pub fn display_text(&self) -> String {
        (0..self.settings.arity)
            .map(|slot| {
                self.buffer
                    .get(slot)
                    .map_or_else(|| "_".to_string(), ToString::to_string)
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn begin_feedback_clear(&mut self, bus: &mut SignalBus, scheduler: &mut Scheduler) {
        let delay_seconds = self.settings.incorrect_clear_delay_seconds;
        if delay_seconds > 0.0 {
            self.replace_pending(scheduler.schedule(DeferredAction::ClearAfterFeedback, delay_seconds));
        } else {
            self.clear(bus);
        }
    }

    fn replace_pending(&mut self, handle: TaskHandle) {
        self.cancel_pending();
        self.pending = Some(handle);
    }

    fn cancel_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.cancel();
        }
    }
}
