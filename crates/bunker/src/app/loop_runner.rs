use std::fmt;
use std::process::ExitCode;
use std::thread;
use std::time::{Duration, Instant};

use protocol::{ConfigError, EscapeRoom};
use thiserror::Error;
use tracing::{error, info, warn};

use super::bootstrap::AppWiring;
use super::paths::StartupError;
use super::script::{ScriptError, ScriptPlayer};

#[derive(Debug, Clone)]
pub(crate) struct LoopConfig {
    pub(crate) target_tps: u32,
    pub(crate) realtime: bool,
    pub(crate) max_seconds: f64,
    pub(crate) max_frame_delta: Duration,
    pub(crate) max_ticks_per_frame: u32,
    pub(crate) pacing_log_interval: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            target_tps: 60,
            realtime: false,
            max_seconds: 600.0,
            max_frame_delta: Duration::from_millis(250),
            max_ticks_per_frame: 5,
            pacing_log_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error(transparent)]
    Startup(#[from] StartupError),
    #[error("failed to load room config: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to load input script: {0}")]
    Script(#[from] ScriptError),
    #[error("failed to serialize room snapshot: {0}")]
    Snapshot(#[source] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StopReason {
    ScriptFinished,
    TimeLimit,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ScriptFinished => "script_finished",
            Self::TimeLimit => "time_limit",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct RunSummary {
    pub(crate) ticks: u64,
    pub(crate) simulated_seconds: f64,
    pub(crate) stop_reason: StopReason,
}

pub(crate) fn run(app: AppWiring) -> ExitCode {
    if let Err(err) = run_app(app) {
        error!(error = %err, "run_failed");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn run_app(app: AppWiring) -> Result<(), AppError> {
    let AppWiring {
        config,
        room,
        script,
        dump_state,
    } = app;
    let target_tps = config.target_tps.max(1);
    let max_frame_delta =
        normalize_non_zero_duration(config.max_frame_delta, Duration::from_millis(250));
    let max_ticks_per_frame = config.max_ticks_per_frame.max(1);
    let pacing_log_interval =
        normalize_non_zero_duration(config.pacing_log_interval, Duration::from_secs(1));
    info!(
        target_tps,
        realtime = config.realtime,
        max_seconds = config.max_seconds,
        max_frame_delta_ms = max_frame_delta.as_millis() as u64,
        max_ticks_per_frame,
        pacing_log_interval_ms = pacing_log_interval.as_millis() as u64,
        script_events = script.events().len(),
        script_end_seconds = script.end_seconds(),
        "loop_config"
    );

    let mut simulation = Simulation::new(
        room,
        ScriptPlayer::new(script),
        target_tps,
        config.max_seconds,
    );
    let stop_reason = if config.realtime {
        run_realtime(
            &mut simulation,
            max_frame_delta,
            max_ticks_per_frame,
            pacing_log_interval,
        )
    } else {
        run_simulated(&mut simulation)
    };
    let summary = simulation.summary(stop_reason);
    let room = simulation.room;

    info!(
        ticks = summary.ticks,
        simulated_seconds = summary.simulated_seconds,
        stop_reason = %summary.stop_reason,
        status = %room.status_line(),
        hatch_unlocked = room.machine().hatch_unlocked(),
        "run_finished"
    );

    if dump_state {
        let json = serde_json::to_string_pretty(&room.snapshot()).map_err(AppError::Snapshot)?;
        println!("{json}");
    }
    Ok(())
}

/// Room plus script, stepped at a fixed rate. Script time is derived from the tick
/// count so it never drifts.
struct Simulation {
    room: EscapeRoom,
    player: ScriptPlayer,
    target_tps: u32,
    dt_seconds: f32,
    max_seconds: f64,
}

impl Simulation {
    fn new(room: EscapeRoom, player: ScriptPlayer, target_tps: u32, max_seconds: f64) -> Self {
        let target_tps = target_tps.max(1);
        Self {
            room,
            player,
            target_tps,
            dt_seconds: (1.0 / f64::from(target_tps)) as f32,
            max_seconds,
        }
    }

    fn now_seconds(&self) -> f64 {
        self.room.tick_count() as f64 / f64::from(self.target_tps)
    }

    fn step(&mut self) -> Option<StopReason> {
        let now_seconds = self.now_seconds();
        self.player.apply_due(&mut self.room, now_seconds);
        if self.player.is_finished(now_seconds) {
            return Some(StopReason::ScriptFinished);
        }
        if now_seconds >= self.max_seconds {
            warn!(max_seconds = self.max_seconds, "time_limit_reached");
            return Some(StopReason::TimeLimit);
        }
        self.room.tick(self.dt_seconds);
        None
    }

    fn summary(&self, stop_reason: StopReason) -> RunSummary {
        RunSummary {
            ticks: self.room.tick_count(),
            simulated_seconds: self.now_seconds(),
            stop_reason,
        }
    }
}

fn run_simulated(simulation: &mut Simulation) -> StopReason {
    loop {
        if let Some(reason) = simulation.step() {
            return reason;
        }
    }
}

fn run_realtime(
    simulation: &mut Simulation,
    max_frame_delta: Duration,
    max_ticks_per_frame: u32,
    pacing_log_interval: Duration,
) -> StopReason {
    let fixed_dt = Duration::from_secs_f64(1.0 / f64::from(simulation.target_tps));
    let mut accumulator = Duration::ZERO;
    let mut last_frame_instant = Instant::now();
    let mut pacing = PacingWindow::new(pacing_log_interval, fixed_dt, last_frame_instant);

    loop {
        let now = Instant::now();
        let raw_frame_dt = now.saturating_duration_since(last_frame_instant);
        last_frame_instant = now;

        let clamped_frame_dt = clamp_frame_delta(raw_frame_dt, max_frame_delta);
        accumulator = accumulator.saturating_add(clamped_frame_dt);

        let step_plan = plan_sim_steps(accumulator, fixed_dt, max_ticks_per_frame);
        for _ in 0..step_plan.ticks_to_run {
            if let Some(reason) = simulation.step() {
                return reason;
            }
            pacing.ticks = pacing.ticks.saturating_add(1);
        }
        accumulator = step_plan.remaining_accumulator;

        if step_plan.dropped_backlog > Duration::ZERO {
            pacing.dropped_backlog = pacing
                .dropped_backlog
                .saturating_add(step_plan.dropped_backlog);
            warn!(
                dropped_backlog_ms = step_plan.dropped_backlog.as_millis() as u64,
                max_ticks_per_frame, "sim_clamp_triggered"
            );
        }

        if let Some(report) = pacing.close_if_elapsed(Instant::now()) {
            info!(
                tps = report.tps,
                sim_speed = report.sim_speed,
                dropped_backlog_ms = report.dropped_backlog_ms,
                timer = %simulation.room.timer().formatted(),
                "loop_pacing"
            );
        }

        let sleep = fixed_dt.saturating_sub(accumulator);
        if sleep > Duration::ZERO {
            thread::sleep(sleep);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PacingReport {
    tps: f32,
    // Simulated seconds per wall-clock second; 1.0 when pacing keeps up.
    sim_speed: f32,
    dropped_backlog_ms: u64,
}

#[derive(Debug)]
struct PacingWindow {
    opened_at: Instant,
    length: Duration,
    fixed_dt: Duration,
    ticks: u32,
    dropped_backlog: Duration,
}

impl PacingWindow {
    fn new(length: Duration, fixed_dt: Duration, now: Instant) -> Self {
        Self {
            opened_at: now,
            length,
            fixed_dt,
            ticks: 0,
            dropped_backlog: Duration::ZERO,
        }
    }

    fn close_if_elapsed(&mut self, now: Instant) -> Option<PacingReport> {
        let wall = now.saturating_duration_since(self.opened_at);
        if wall < self.length {
            return None;
        }
        let wall_seconds = wall.as_secs_f32().max(f32::EPSILON);
        let simulated_seconds = self.fixed_dt.as_secs_f32() * self.ticks as f32;
        let report = PacingReport {
            tps: self.ticks as f32 / wall_seconds,
            sim_speed: simulated_seconds / wall_seconds,
            dropped_backlog_ms: u64::try_from(self.dropped_backlog.as_millis())
                .unwrap_or(u64::MAX),
        };
        *self = Self::new(self.length, self.fixed_dt, now);
        Some(report)
    }
}

#[derive(Debug, Clone, Copy)]
struct StepPlan {
    ticks_to_run: u32,
    remaining_accumulator: Duration,
    dropped_backlog: Duration,
}

fn plan_sim_steps(
    mut accumulator: Duration,
    fixed_dt: Duration,
    max_ticks_per_frame: u32,
) -> StepPlan {
    let mut ticks_to_run = 0u32;

    while accumulator >= fixed_dt && ticks_to_run < max_ticks_per_frame {
        accumulator = accumulator.saturating_sub(fixed_dt);
        ticks_to_run = ticks_to_run.saturating_add(1);
    }

    let dropped_backlog = if accumulator >= fixed_dt {
        std::mem::take(&mut accumulator)
    } else {
        Duration::ZERO
    };
    StepPlan {
        ticks_to_run,
        remaining_accumulator: accumulator,
        dropped_backlog,
    }
}

fn clamp_frame_delta(frame_dt: Duration, max_frame_delta: Duration) -> Duration {
    frame_dt.min(max_frame_delta)
}

fn normalize_non_zero_duration(value: Duration, fallback: Duration) -> Duration {
    if value.is_zero() {
        fallback
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use protocol::{ProtocolPhase, RoomConfig, TargetCodeConfig};

    use super::super::script::Script;
    use super::*;

    fn bundled(relative: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join(relative)
    }

    fn bundled_simulation(room: &str, script: &str) -> Simulation {
        let config = RoomConfig::load(&bundled(room)).expect("bundled room");
        let script = Script::load(&bundled(script)).expect("bundled script");
        let room = EscapeRoom::new(&config).expect("room");
        Simulation::new(room, ScriptPlayer::new(script), 60, 600.0)
    }

    fn simulation(script: &str, target_tps: u32, max_seconds: f64) -> Simulation {
        let mut config = RoomConfig::with_codes(vec![
            TargetCodeConfig {
                name: "alpha".to_string(),
                digits: vec![4, 8, 1, 5],
            },
            TargetCodeConfig {
                name: "beta".to_string(),
                digits: vec![1, 6, 2, 3],
            },
        ]);
        config.protocol.cycles_before_final_act = 2;
        config.timer.final_act_duration_seconds = 5.0;
        let room = EscapeRoom::new(&config).expect("room");
        let script = Script::parse(script).expect("script");
        Simulation::new(room, ScriptPlayer::new(script), target_tps, max_seconds)
    }

    #[test]
    fn clamp_frame_delta_caps_large_frame() {
        let max_frame_delta = Duration::from_millis(250);

        assert_eq!(
            clamp_frame_delta(Duration::from_millis(600), max_frame_delta),
            max_frame_delta
        );
    }

    #[test]
    fn plan_sim_steps_runs_expected_ticks_without_drop() {
        let fixed_dt = Duration::from_millis(16);
        let result = plan_sim_steps(Duration::from_millis(40), fixed_dt, 5);

        assert_eq!(result.ticks_to_run, 2);
        assert_eq!(result.remaining_accumulator, Duration::from_millis(8));
        assert_eq!(result.dropped_backlog, Duration::ZERO);
    }

    #[test]
    fn plan_sim_steps_drops_backlog_when_tick_cap_hit() {
        let fixed_dt = Duration::from_millis(16);
        let result = plan_sim_steps(Duration::from_millis(120), fixed_dt, 3);

        assert_eq!(result.ticks_to_run, 3);
        assert_eq!(result.remaining_accumulator, Duration::ZERO);
        assert_eq!(result.dropped_backlog, Duration::from_millis(72));
    }

    #[test]
    fn zero_durations_fall_back() {
        assert_eq!(
            normalize_non_zero_duration(Duration::ZERO, Duration::from_secs(1)),
            Duration::from_secs(1)
        );
        assert_eq!(
            normalize_non_zero_duration(Duration::from_millis(5), Duration::from_secs(1)),
            Duration::from_millis(5)
        );
    }

    #[test]
    fn simulated_run_stops_after_final_wait() {
        let mut simulation = simulation("start\nwait 2\n", 10, 60.0);

        let reason = run_simulated(&mut simulation);
        let summary = simulation.summary(reason);

        assert_eq!(reason, StopReason::ScriptFinished);
        assert_eq!(summary.ticks, 20);
        assert_eq!(simulation.room.timer().remaining_seconds().round(), 118.0);
    }

    #[test]
    fn simulated_run_respects_time_limit() {
        let mut simulation = simulation("start\nwait 100\n", 4, 3.0);

        let reason = run_simulated(&mut simulation);

        assert_eq!(reason, StopReason::TimeLimit);
        assert_eq!(simulation.summary(reason).ticks, 12);
    }

    #[test]
    fn scripted_final_act_ends_in_hatch_unlock() {
        let mut simulation = simulation(
            "start\ndigits 4 8 1 5\nwait 3\ndigits 1 6 2 3\nwait 15\nstatus\n",
            20,
            120.0,
        );

        let reason = run_simulated(&mut simulation);

        assert_eq!(reason, StopReason::ScriptFinished);
        let room = &simulation.room;
        assert!(room.machine().is_suspended());
        assert!(room.machine().hatch_unlocked());
        assert_eq!(room.state().success_count, 2);
        assert_eq!(room.state().failure_count, 1);
        assert_eq!(room.status_line(), "PROTOCOL SUSPENDED");
    }

    #[test]
    fn bundled_final_act_script_unlocks_the_hatch() {
        let mut simulation = bundled_simulation(
            "assets/rooms/bunker.json",
            "assets/scripts/final_act.script",
        );

        assert_eq!(run_simulated(&mut simulation), StopReason::ScriptFinished);
        assert!(simulation.room.machine().hatch_unlocked());
        assert_eq!(simulation.room.state().success_count, 2);
    }

    #[test]
    fn bundled_reused_code_script_stays_out_of_final_act() {
        let mut simulation = bundled_simulation(
            "assets/rooms/bunker.json",
            "assets/scripts/reused_code.script",
        );

        run_simulated(&mut simulation);

        let state = simulation.room.state();
        assert_eq!(state.success_count, 1);
        assert_eq!(state.failure_count, 2);
        assert_eq!(state.cycle_count, 3);
        assert_eq!(state.phase, ProtocolPhase::Active { final_act: false });
    }

    #[test]
    fn bundled_weights_script_matches_the_scales() {
        let mut simulation = bundled_simulation(
            "assets/rooms/bunker.json",
            "assets/scripts/weights.script",
        );

        run_simulated(&mut simulation);

        let weights = simulation.room.weights().expect("weight puzzle");
        assert!(weights.is_matched());
    }

    #[test]
    fn bundled_swan_room_accepts_six_digit_code() {
        let mut simulation =
            bundled_simulation("assets/rooms/swan.json", "assets/scripts/swan.script");

        run_simulated(&mut simulation);

        assert_eq!(simulation.room.state().success_count, 1);
        assert!(simulation.room.session().validator().codes()[0].is_used());
    }

    #[test]
    fn pacing_window_reports_tick_rate_and_speed() {
        let opened = Instant::now();
        let mut window = PacingWindow::new(
            Duration::from_secs(2),
            Duration::from_millis(100),
            opened,
        );
        window.ticks = 10;
        window.dropped_backlog = Duration::from_millis(300);

        assert!(window
            .close_if_elapsed(opened + Duration::from_secs(1))
            .is_none());
        let report = window
            .close_if_elapsed(opened + Duration::from_secs(2))
            .expect("window closed");

        assert!((report.tps - 5.0).abs() < 0.01);
        assert!((report.sim_speed - 0.5).abs() < 0.01);
        assert_eq!(report.dropped_backlog_ms, 300);
    }

    #[test]
    fn pacing_window_reopens_empty_after_a_report() {
        let opened = Instant::now();
        let mut window =
            PacingWindow::new(Duration::from_secs(1), Duration::from_millis(50), opened);
        window.ticks = 20;
        window
            .close_if_elapsed(opened + Duration::from_secs(1))
            .expect("first report");

        let second = window
            .close_if_elapsed(opened + Duration::from_secs(2))
            .expect("second report");

        assert_eq!(second.tps, 0.0);
        assert_eq!(second.sim_speed, 0.0);
        assert_eq!(second.dropped_backlog_ms, 0);
    }
}
