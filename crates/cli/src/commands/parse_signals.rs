//! Parse-signals CLI command.
//!
//! Dry-runs the signal parser over a file so users can check their signal
//! text before starting a session.

use anyhow::{anyhow, Context, Result};
use autotrade_core::{SchedulePolicy, SignalBook, SignalTiming};
use chrono::{DateTime, Utc};
use clap::Args;
use std::path::PathBuf;

/// Arguments for the parse-signals command.
#[derive(Args, Debug, Clone)]
pub struct ParseSignalsArgs {
    /// Signal file, one directive per line
    pub file: PathBuf,

    /// Timezone of timestamped signals, whole hours east of UTC
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    pub utc_offset: i32,

    /// Output format: text, json
    #[arg(long, default_value = "text")]
    pub format: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(anyhow!("Unknown format: '{s}'. Valid formats: text, json")),
        }
    }
}

pub fn run_parse_signals(args: &ParseSignalsArgs) -> Result<()> {
    let format = OutputFormat::parse(&args.format)?;
    let text = std::fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read signal file {}", args.file.display()))?;

    let policy = SchedulePolicy {
        utc_offset_hours: args.utc_offset,
        ..SchedulePolicy::default()
    };
    let book = SignalBook::parse(&text, &policy, Utc::now());

    match format {
        OutputFormat::Text => print!("{}", render_text(&book)),
        OutputFormat::Json => println!("{}", render_json(&book)?),
    }

    if book.is_empty() {
        return Err(anyhow!("no valid signals in {}", args.file.display()));
    }
    Ok(())
}

fn render_text(book: &SignalBook) -> String {
    let mut output = String::new();

    output.push_str(&format!("Accepted signals: {}\n", book.len()));
    for signal in book.signals() {
        output.push_str(&format!(
            "  line {:>3}  {:<4}  {:<12}  {:>6}  {}\n",
            signal.line,
            signal.direction,
            signal.asset.as_deref().unwrap_or("(default)"),
            signal
                .expiry_minutes
                .map_or_else(|| "(def)".to_string(), |m| format!("{m}m")),
            describe_timing(signal.timing, signal.scheduled_at),
        ));
    }

    if !book.rejected().is_empty() {
        output.push_str(&format!("Rejected lines: {}\n", book.rejected().len()));
        for rejected in book.rejected() {
            output.push_str(&format!("  {rejected}\n"));
        }
    }

    output
}

fn render_json(book: &SignalBook) -> Result<String> {
    let report = serde_json::json!({
        "accepted": book.signals(),
        "rejected": book.rejected(),
    });
    Ok(serde_json::to_string_pretty(&report)?)
}

fn describe_timing(timing: SignalTiming, at: Option<DateTime<Utc>>) -> String {
    let at = at.map(|at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string());
    match (timing, at) {
        (SignalTiming::Scheduled, Some(at)) => format!("at {at}"),
        (SignalTiming::Stale, Some(at)) => format!("stale ({at}), fires now"),
        (SignalTiming::BeyondHorizon, Some(at)) => format!("too far out ({at}), fires now"),
        _ => "immediate".to_string(),
    }
}
