use std::fs;
use std::path::{Path, PathBuf};

use protocol::{Digit, EscapeRoom, ObjectId, ScaleRole, WeighableObject};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Script times closer than this to a tick boundary count as reached.
const SCRIPT_TIME_EPSILON_SECONDS: f64 = 1.0e-9;

#[derive(Debug, Error)]
pub(crate) enum ScriptError {
    #[error("failed to read script {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("line {line}: unknown command '{command}'")]
    UnknownCommand { line: usize, command: String },
    #[error("line {line}: '{command}' expects {expected}")]
    MissingArgument {
        line: usize,
        command: &'static str,
        expected: &'static str,
    },
    #[error("line {line}: '{command}' got unexpected argument '{argument}'")]
    UnexpectedArgument {
        line: usize,
        command: &'static str,
        argument: String,
    },
    #[error("line {line}: invalid {what} '{value}'")]
    InvalidValue {
        line: usize,
        what: &'static str,
        value: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ScriptCommand {
    Start,
    Press(Digit),
    Digits(Vec<Digit>),
    Submit,
    Clear,
    Lock,
    Unlock,
    Reset,
    Restart,
    ResetTimer,
    ResetWeights,
    FinalAct,
    Status,
    Place {
        scale: ScaleRole,
        object: WeighableObject,
    },
    Remove {
        scale: ScaleRole,
        id: ObjectId,
    },
    Hold {
        scale: ScaleRole,
        id: ObjectId,
    },
    Release {
        scale: ScaleRole,
        id: ObjectId,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ScriptEvent {
    pub(crate) at_seconds: f64,
    pub(crate) line: usize,
    pub(crate) command: ScriptCommand,
}

/// Timed operator input. `wait` lines move the cursor; every other line is an event
/// at the current cursor.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Script {
    events: Vec<ScriptEvent>,
    end_seconds: f64,
}

impl Script {
    pub(crate) fn load(path: &Path) -> Result<Self, ScriptError> {
        let raw = fs::read_to_string(path).map_err(|source| ScriptError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw)
    }

    pub(crate) fn parse(raw: &str) -> Result<Self, ScriptError> {
        let mut events = Vec::new();
        let mut cursor_seconds = 0.0f64;

        for (index, text) in raw.lines().enumerate() {
            let line = index + 1;
            let text = text.split('#').next().unwrap_or_default().trim();
            let mut words = text.split_whitespace();
            let Some(keyword) = words.next() else {
                continue;
            };
            let args = words.collect::<Vec<_>>();

            if keyword == "wait" {
                let [seconds] = args.as_slice() else {
                    return Err(arity_error(line, "wait", "<seconds>", &args, 1));
                };
                let seconds = parse_seconds(line, seconds)?;
                cursor_seconds += seconds;
                continue;
            }

            events.push(ScriptEvent {
                at_seconds: cursor_seconds,
                line,
                command: parse_command(line, keyword, &args)?,
            });
        }

        Ok(Self {
            events,
            end_seconds: cursor_seconds,
        })
    }

    pub(crate) fn events(&self) -> &[ScriptEvent] {
        &self.events
    }

    pub(crate) fn end_seconds(&self) -> f64 {
        self.end_seconds
    }
}

fn parse_command(line: usize, keyword: &str, args: &[&str]) -> Result<ScriptCommand, ScriptError> {
    let command = match keyword {
        "start" => no_args(line, "start", args, ScriptCommand::Start)?,
        "submit" => no_args(line, "submit", args, ScriptCommand::Submit)?,
        "clear" => no_args(line, "clear", args, ScriptCommand::Clear)?,
        "lock" => no_args(line, "lock", args, ScriptCommand::Lock)?,
        "unlock" => no_args(line, "unlock", args, ScriptCommand::Unlock)?,
        "reset" => no_args(line, "reset", args, ScriptCommand::Reset)?,
        "restart" => no_args(line, "restart", args, ScriptCommand::Restart)?,
        "reset-timer" => no_args(line, "reset-timer", args, ScriptCommand::ResetTimer)?,
        "reset-weights" => no_args(line, "reset-weights", args, ScriptCommand::ResetWeights)?,
        "final-act" => no_args(line, "final-act", args, ScriptCommand::FinalAct)?,
        "status" => no_args(line, "status", args, ScriptCommand::Status)?,
        "press" => {
            let [digit] = args else {
                return Err(arity_error(line, "press", "<digit>", args, 1));
            };
            ScriptCommand::Press(parse_digit(line, digit)?)
        }
        "digits" => {
            if args.is_empty() {
                return Err(ScriptError::MissingArgument {
                    line,
                    command: "digits",
                    expected: "<digit>...",
                });
            }
            let digits = args
                .iter()
                .map(|digit| parse_digit(line, digit))
                .collect::<Result<Vec<_>, _>>()?;
            ScriptCommand::Digits(digits)
        }
        "place" => {
            let (scale, id, weight, flag) = match args {
                [scale, id, weight] => (scale, id, weight, None),
                [scale, id, weight, flag] => (scale, id, weight, Some(*flag)),
                _ => {
                    return Err(arity_error(
                        line,
                        "place",
                        "<scale> <id> <kg> [ref]",
                        args,
                        4,
                    ))
                }
            };
            let scale = parse_scale(line, scale)?;
            let is_reference = match flag {
                None => scale == ScaleRole::Reference,
                Some("ref") => true,
                Some(other) => {
                    return Err(ScriptError::UnexpectedArgument {
                        line,
                        command: "place",
                        argument: other.to_string(),
                    })
                }
            };
            ScriptCommand::Place {
                scale,
                object: WeighableObject {
                    id: parse_object_id(line, id)?,
                    weight_kg: parse_weight(line, weight)?,
                    is_reference,
                },
            }
        }
        "remove" | "hold" | "release" => {
            let [scale, id] = args else {
                let command = match keyword {
                    "remove" => "remove",
                    "hold" => "hold",
                    _ => "release",
                };
                return Err(arity_error(line, command, "<scale> <id>", args, 2));
            };
            let scale = parse_scale(line, scale)?;
            let id = parse_object_id(line, id)?;
            match keyword {
                "remove" => ScriptCommand::Remove { scale, id },
                "hold" => ScriptCommand::Hold { scale, id },
                _ => ScriptCommand::Release { scale, id },
            }
        }
        other => {
            return Err(ScriptError::UnknownCommand {
                line,
                command: other.to_string(),
            })
        }
    };
    Ok(command)
}

fn no_args(
    line: usize,
    command: &'static str,
    args: &[&str],
    parsed: ScriptCommand,
) -> Result<ScriptCommand, ScriptError> {
    match args.first() {
        None => Ok(parsed),
        Some(argument) => Err(ScriptError::UnexpectedArgument {
            line,
            command,
            argument: (*argument).to_string(),
        }),
    }
}

fn arity_error(
    line: usize,
    command: &'static str,
    expected: &'static str,
    args: &[&str],
    max_args: usize,
) -> ScriptError {
    match args.get(max_args) {
        Some(argument) => ScriptError::UnexpectedArgument {
            line,
            command,
            argument: (*argument).to_string(),
        },
        None => ScriptError::MissingArgument {
            line,
            command,
            expected,
        },
    }
}

fn parse_seconds(line: usize, value: &str) -> Result<f64, ScriptError> {
    match value.parse::<f64>() {
        Ok(seconds) if seconds.is_finite() && seconds >= 0.0 => Ok(seconds),
        _ => Err(invalid(line, "duration", value)),
    }
}

fn parse_digit(line: usize, value: &str) -> Result<Digit, ScriptError> {
    value.parse::<Digit>().map_err(|_| invalid(line, "digit", value))
}

fn parse_scale(line: usize, value: &str) -> Result<ScaleRole, ScriptError> {
    ScaleRole::parse(value).ok_or_else(|| invalid(line, "scale", value))
}

fn parse_object_id(line: usize, value: &str) -> Result<ObjectId, ScriptError> {
    value
        .parse::<u64>()
        .map(ObjectId)
        .map_err(|_| invalid(line, "object id", value))
}

fn parse_weight(line: usize, value: &str) -> Result<f32, ScriptError> {
    match value.parse::<f32>() {
        Ok(weight_kg) if weight_kg.is_finite() => Ok(weight_kg),
        _ => Err(invalid(line, "weight", value)),
    }
}

fn invalid(line: usize, what: &'static str, value: &str) -> ScriptError {
    ScriptError::InvalidValue {
        line,
        what,
        value: value.to_string(),
    }
}

#[derive(Debug)]
pub(crate) struct ScriptPlayer {
    script: Script,
    next_event: usize,
}

impl ScriptPlayer {
    pub(crate) fn new(script: Script) -> Self {
        Self {
            script,
            next_event: 0,
        }
    }

    pub(crate) fn apply_due(&mut self, room: &mut EscapeRoom, now_seconds: f64) -> usize {
        let mut applied = 0;
        while let Some(event) = self.script.events.get(self.next_event) {
            if event.at_seconds > now_seconds + SCRIPT_TIME_EPSILON_SECONDS {
                break;
            }
            debug!(line = event.line, at_seconds = event.at_seconds, command = ?event.command, "script_event");
            apply_command(room, &event.command);
            self.next_event += 1;
            applied += 1;
        }
        applied
    }

    pub(crate) fn is_finished(&self, now_seconds: f64) -> bool {
        self.next_event >= self.script.events.len()
            && now_seconds + SCRIPT_TIME_EPSILON_SECONDS >= self.script.end_seconds
    }
}

pub(crate) fn apply_command(room: &mut EscapeRoom, command: &ScriptCommand) {
    match command {
        ScriptCommand::Start => {
            if !room.start_protocol() {
                warn!("start_ignored_while_suspended");
            }
        }
        ScriptCommand::Press(digit) => {
            let _ = room.press_digit(*digit);
        }
        ScriptCommand::Digits(digits) => {
            for digit in digits {
                let _ = room.press_digit(*digit);
            }
        }
        ScriptCommand::Submit => {
            let _ = room.submit();
        }
        ScriptCommand::Clear => room.clear_input(),
        ScriptCommand::Lock => room.lock_input(),
        ScriptCommand::Unlock => room.unlock_input(),
        ScriptCommand::Reset => room.reset_protocol(),
        ScriptCommand::Restart => {
            if !room.restart_protocol() {
                warn!("restart_failed_to_start");
            }
        }
        ScriptCommand::ResetTimer => {
            if !room.restart_timer() {
                debug!("reset_timer_ignored");
            }
        }
        ScriptCommand::ResetWeights => {
            if let Err(error) = room.reset_weights() {
                debug!(error = %error, "reset_weights_ignored");
            }
        }
        ScriptCommand::FinalAct => {
            if let Err(error) = room.force_final_act() {
                debug!(error = %error, "final_act_ignored");
            }
        }
        ScriptCommand::Status => {
            info!(
                status = %room.status_line(),
                timer = %room.timer().formatted(),
                display = %room.session().display_text(),
                "status"
            );
        }
        ScriptCommand::Place { scale, object } => {
            if let Err(error) = room.place_object(*scale, *object) {
                debug!(error = %error, "place_ignored");
            }
        }
        ScriptCommand::Remove { scale, id } => {
            if let Err(error) = room.remove_object(*scale, *id) {
                debug!(error = %error, "remove_ignored");
            }
        }
        ScriptCommand::Hold { scale, id } => {
            if let Err(error) = room.set_object_held(*scale, *id, true) {
                debug!(error = %error, "hold_ignored");
            }
        }
        ScriptCommand::Release { scale, id } => {
            if let Err(error) = room.set_object_held(*scale, *id, false) {
                debug!(error = %error, "release_ignored");
            }
        }
    }
}
