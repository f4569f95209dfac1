use protocol::Signal;
use tracing::{debug, info, trace, warn};

pub(crate) fn log_signal(signal: &Signal) {
    let kind = signal.kind();
    match signal {
        Signal::TimerTick { remaining_seconds } => {
            trace!(signal = %kind, remaining_seconds, "signal");
        }
        Signal::DigitEntered { digit } => debug!(signal = %kind, digit, "signal"),
        Signal::CodeCleared | Signal::InputLocked | Signal::InputUnlocked => {
            debug!(signal = %kind, "signal");
        }
        Signal::CodeCorrect { index, name } | Signal::CodeAlreadyUsed { index, name } => {
            info!(signal = %kind, index, name = name.as_str(), "signal");
        }
        Signal::CycleCompleted { cycle } => info!(signal = %kind, cycle, "signal"),
        Signal::CycleFailed { cycle } => warn!(signal = %kind, cycle, "signal"),
        Signal::FinalActTriggered { duration_seconds } => {
            warn!(signal = %kind, duration_seconds, "signal");
        }
        Signal::ProtocolSuspended | Signal::TimerWarning => warn!(signal = %kind, "signal"),
        Signal::ScaleWeightChanged { scale, weight_kg } => {
            debug!(signal = %kind, scale = %scale, weight_kg, "signal");
        }
        Signal::WeightsMatched { weight_kg } => info!(signal = %kind, weight_kg, "signal"),
        Signal::CodeIncorrect
        | Signal::TimerExpired
        | Signal::ProtocolStarted
        | Signal::HatchUnlocked
        | Signal::ProtocolReset => info!(signal = %kind, "signal"),
    }
}
