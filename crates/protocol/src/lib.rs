pub mod config;
pub mod machine;
pub mod room;
pub mod schedule;
pub mod session;
pub mod signals;
pub mod timer;
pub mod validator;
pub mod weight;

pub use config::{
    ConfigError, InputConfig, ProtocolConfig, RoomConfig, TargetCodeConfig, TimerConfig,
    WeightPuzzleConfig, CONFIG_VERSION,
};
pub use machine::{
    ProtocolEffect, ProtocolInput, ProtocolPhase, ProtocolSettings, ProtocolState,
    ProtocolStateMachine, SignalWhileSuspended,
};
pub use room::{EscapeRoom, RoomSnapshot};
pub use schedule::{CancelToken, DeferredAction, DueTask, Scheduler, TaskHandle, TaskId};
pub use session::{
    AutoSubmit, CodeInputSession, InputRejected, SessionSettings, SubmitOutcome, SubmitRejected,
};
pub use signals::{Digit, ObserverId, Signal, SignalBus, SignalCounts, SignalKind};
pub use timer::{format_clock, CountdownTimer, TimerError, TimerPhase};
pub use validator::{CodeMatch, CodeValidator, TargetCode};
pub use weight::{ObjectId, Scale, ScaleRejected, ScaleRole, WeighableObject, WeightPuzzle};
