//! CLI commands.

pub mod parse_signals;
pub mod run;

pub use parse_signals::{run_parse_signals, ParseSignalsArgs};
pub use run::{run_session, RunArgs};
