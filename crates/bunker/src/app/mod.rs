mod bootstrap;
mod loop_runner;
mod paths;
mod script;
mod signal_log;

pub(crate) use bootstrap::{build_app, init_tracing, Cli};
pub(crate) use loop_runner::run;
