use std::path::PathBuf;

use clap::Parser;
use protocol::{EscapeRoom, RoomConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

use super::loop_runner::{AppError, LoopConfig};
use super::paths::{resolve_asset_path, resolve_root};
use super::script::Script;
use super::signal_log::log_signal;

/// Headless host for the bunker escape-room protocol.
#[derive(Parser, Debug)]
#[command(name = "bunker", version, about)]
pub(crate) struct Cli {
    /// Room configuration; relative paths start at the project root.
    #[arg(long, env = "BUNKER_ROOM", default_value = "assets/rooms/bunker.json")]
    pub(crate) room: PathBuf,

    /// Operator input script to play back.
    #[arg(
        long,
        env = "BUNKER_SCRIPT",
        default_value = "assets/scripts/final_act.script"
    )]
    pub(crate) script: PathBuf,

    /// Simulation ticks per second.
    #[arg(long, env = "BUNKER_TPS", default_value_t = 60)]
    pub(crate) tps: u32,

    /// Pace ticks against the wall clock.
    #[arg(long, env = "BUNKER_REALTIME")]
    pub(crate) realtime: bool,

    /// Stop after this many simulated seconds.
    #[arg(long, env = "BUNKER_MAX_SECONDS", default_value_t = 600.0)]
    pub(crate) max_seconds: f64,

    /// Print the final room snapshot as JSON on stdout.
    #[arg(long)]
    pub(crate) dump_state: bool,
}

pub(crate) struct AppWiring {
    pub(crate) config: LoopConfig,
    pub(crate) room: EscapeRoom,
    pub(crate) script: Script,
    pub(crate) dump_state: bool,
}

pub(crate) fn build_app(cli: Cli) -> Result<AppWiring, AppError> {
    let root = resolve_root()?;
    let room_path = resolve_asset_path(&root, &cli.room);
    let script_path = resolve_asset_path(&root, &cli.script);
    info!(
        root = %root.display(),
        room = %room_path.display(),
        script = %script_path.display(),
        "startup"
    );

    let room_config = RoomConfig::load(&room_path)?;
    let mut room = EscapeRoom::new(&room_config)?;
    room.subscribe(log_signal);
    let script = Script::load(&script_path)?;

    Ok(AppWiring {
        config: LoopConfig {
            target_tps: cli.tps,
            realtime: cli.realtime,
            max_seconds: cli.max_seconds,
            ..LoopConfig::default()
        },
        room,
        script,
        dump_state: cli.dump_state,
    })
}

pub(crate) fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .init();
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn cli_defaults_point_at_bundled_assets() {
        let cli = Cli::try_parse_from(["bunker"]).expect("defaults parse");

        assert_eq!(cli.room, PathBuf::from("assets/rooms/bunker.json"));
        assert_eq!(cli.tps, 60);
        assert!(!cli.dump_state);
    }

    #[test]
    fn cli_flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "bunker",
            "--room",
            "/tmp/room.json",
            "--tps",
            "20",
            "--max-seconds",
            "30",
            "--dump-state",
        ])
        .expect("flags parse");

        assert_eq!(cli.room, PathBuf::from("/tmp/room.json"));
        assert_eq!(cli.tps, 20);
        assert_eq!(cli.max_seconds, 30.0);
        assert!(cli.dump_state);
    }
}
