use std::collections::VecDeque;
use std::fmt;

use tracing::trace;

use crate::weight::ScaleRole;

/// A single keypad value. Panels may use multi-digit button values, so this is not
/// restricted to `0..=9`.
pub type Digit = u8;

#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    DigitEntered { digit: Digit },
    CodeCorrect { index: usize, name: String },
    CodeIncorrect,
    CodeAlreadyUsed { index: usize, name: String },
    CodeCleared,
    InputLocked,
    InputUnlocked,
    TimerTick { remaining_seconds: f32 },
    TimerWarning,
    TimerExpired,
    ProtocolStarted,
    CycleCompleted { cycle: u32 },
    CycleFailed { cycle: u32 },
    FinalActTriggered { duration_seconds: f32 },
    ProtocolSuspended,
    HatchUnlocked,
    ProtocolReset,
    ScaleWeightChanged { scale: ScaleRole, weight_kg: f32 },
    WeightsMatched { weight_kg: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    DigitEntered,
    CodeCorrect,
    CodeIncorrect,
    CodeAlreadyUsed,
    CodeCleared,
    InputLocked,
    InputUnlocked,
    TimerTick,
    TimerWarning,
    TimerExpired,
    ProtocolStarted,
    CycleCompleted,
    CycleFailed,
    FinalActTriggered,
    ProtocolSuspended,
    HatchUnlocked,
    ProtocolReset,
    ScaleWeightChanged,
    WeightsMatched,
}

const SIGNAL_KIND_COUNT: usize = 19;

impl SignalKind {
    const fn index(self) -> usize {
        match self {
            Self::DigitEntered => 0,
            Self::CodeCorrect => 1,
            Self::CodeIncorrect => 2,
            Self::CodeAlreadyUsed => 3,
            Self::CodeCleared => 4,
            Self::InputLocked => 5,
            Self::InputUnlocked => 6,
            Self::TimerTick => 7,
            Self::TimerWarning => 8,
            Self::TimerExpired => 9,
            Self::ProtocolStarted => 10,
            Self::CycleCompleted => 11,
            Self::CycleFailed => 12,
            Self::FinalActTriggered => 13,
            Self::ProtocolSuspended => 14,
            Self::HatchUnlocked => 15,
            Self::ProtocolReset => 16,
            Self::ScaleWeightChanged => 17,
            Self::WeightsMatched => 18,
        }
    }

    pub fn as_token(self) -> &'static str {
        match self {
            Self::DigitEntered => "digit_entered",
            Self::CodeCorrect => "code_correct",
            Self::CodeIncorrect => "code_incorrect",
            Self::CodeAlreadyUsed => "code_already_used",
            Self::CodeCleared => "code_cleared",
            Self::InputLocked => "input_locked",
            Self::InputUnlocked => "input_unlocked",
            Self::TimerTick => "timer_tick",
            Self::TimerWarning => "timer_warning",
            Self::TimerExpired => "timer_expired",
            Self::ProtocolStarted => "protocol_started",
            Self::CycleCompleted => "cycle_completed",
            Self::CycleFailed => "cycle_failed",
            Self::FinalActTriggered => "final_act_triggered",
            Self::ProtocolSuspended => "protocol_suspended",
            Self::HatchUnlocked => "hatch_unlocked",
            Self::ProtocolReset => "protocol_reset",
            Self::ScaleWeightChanged => "scale_weight_changed",
            Self::WeightsMatched => "weights_matched",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

impl Signal {
    pub fn kind(&self) -> SignalKind {
        match self {
            Self::DigitEntered { .. } => SignalKind::DigitEntered,
            Self::CodeCorrect { .. } => SignalKind::CodeCorrect,
            Self::CodeIncorrect => SignalKind::CodeIncorrect,
            Self::CodeAlreadyUsed { .. } => SignalKind::CodeAlreadyUsed,
            Self::CodeCleared => SignalKind::CodeCleared,
            Self::InputLocked => SignalKind::InputLocked,
            Self::InputUnlocked => SignalKind::InputUnlocked,
            Self::TimerTick { .. } => SignalKind::TimerTick,
            Self::TimerWarning => SignalKind::TimerWarning,
            Self::TimerExpired => SignalKind::TimerExpired,
            Self::ProtocolStarted => SignalKind::ProtocolStarted,
            Self::CycleCompleted { .. } => SignalKind::CycleCompleted,
            Self::CycleFailed { .. } => SignalKind::CycleFailed,
            Self::FinalActTriggered { .. } => SignalKind::FinalActTriggered,
            Self::ProtocolSuspended => SignalKind::ProtocolSuspended,
            Self::HatchUnlocked => SignalKind::HatchUnlocked,
            Self::ProtocolReset => SignalKind::ProtocolReset,
            Self::ScaleWeightChanged { .. } => SignalKind::ScaleWeightChanged,
            Self::WeightsMatched { .. } => SignalKind::WeightsMatched,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignalCounts {
    counts: [u32; SIGNAL_KIND_COUNT],
}

impl SignalCounts {
    pub fn record(&mut self, kind: SignalKind) {
        let slot = &mut self.counts[kind.index()];
        *slot = slot.saturating_add(1);
    }

    pub fn get(&self, kind: SignalKind) -> u32 {
        self.counts[kind.index()]
    }

    pub fn total(&self) -> u32 {
        self.counts.iter().fold(0u32, |acc, count| acc.saturating_add(*count))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Observer = Box<dyn FnMut(&Signal)>;

#[derive(Default)]
pub struct SignalBus {
    observers: Vec<(ObserverId, Observer)>,
    next_observer_id: u64,
    pending: VecDeque<Signal>,
    current_tick_counts: SignalCounts,
    last_tick_counts: SignalCounts,
}

impl fmt::Debug for SignalBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalBus")
            .field("observer_count", &self.observers.len())
            .field("pending", &self.pending)
            .field("current_tick_counts", &self.current_tick_counts)
            .field("last_tick_counts", &self.last_tick_counts)
            .finish()
    }
}

impl SignalBus {
    pub fn subscribe(&mut self, observer: impl FnMut(&Signal) + 'static) -> ObserverId {
        let id = ObserverId(self.next_observer_id);
        self.next_observer_id = self.next_observer_id.saturating_add(1);
        self.observers.push((id, Box::new(observer)));
        id
    }

    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(observer_id, _)| *observer_id != id);
        self.observers.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    pub fn emit(&mut self, signal: Signal) {
        trace!(kind = %signal.kind(), "signal_emitted");
        self.current_tick_counts.record(signal.kind());
        for (_, observer) in &mut self.observers {
            observer(&signal);
        }
        self.pending.push_back(signal);
    }

    pub(crate) fn pop_pending(&mut self) -> Option<Signal> {
        self.pending.pop_front()
    }

    pub fn current_tick_counts(&self) -> SignalCounts {
        self.current_tick_counts
    }

    pub fn finish_tick_rollover(&mut self) {
        self.last_tick_counts = self.current_tick_counts;
        self.current_tick_counts = SignalCounts::default();
    }

    pub fn last_tick_counts(&self) -> SignalCounts {
        self.last_tick_counts
    }
}
