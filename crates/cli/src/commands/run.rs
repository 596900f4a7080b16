//! Run CLI command.
//!
//! Starts one session on the paper broker, streams its events to stdout and
//! prints the session summary once it stops.

use anyhow::{anyhow, Context, Result};
use autotrade_bot_orchestrator::{BotEvent, BotRegistry, BotStatus};
use autotrade_core::{ConfigLoader, SessionSummary, SummaryFormatter};
use autotrade_paper::PaperBrokerFactory;
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

/// Arguments for the run command.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Config file path
    #[arg(short, long, default_value = "config/Config.toml")]
    pub config: PathBuf,

    /// Profile layered over the config file (reads Config.<profile>.toml)
    #[arg(short, long)]
    pub profile: Option<String>,

    /// Account the session trades for
    #[arg(short, long, env = "AUTOTRADE_ACCOUNT", default_value = "paper")]
    pub account: String,

    /// Signal file replacing the configured signal text
    #[arg(short, long)]
    pub signals: Option<PathBuf>,

    /// Optional log file path (logs to file instead of stderr)
    #[arg(long)]
    pub log_file: Option<String>,
}

pub async fn run_session(args: RunArgs) -> Result<()> {
    let mut config = ConfigLoader::load_from(&args.config, args.profile.as_deref())?;
    if let Some(path) = &args.signals {
        config.session.signal_text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read signal file {}", path.display()))?;
    }

    let factory = Arc::new(PaperBrokerFactory::new(config.paper.clone()));
    let registry = BotRegistry::new(factory, config.engine.clone());

    let handle = registry
        .start(&args.account, &config.credentials, config.session.clone())
        .await
        .map_err(|err| anyhow!(err.reason()))?;
    let mut events = handle.subscribe();
    println!(
        "Session {} started for {} ({:?}, {:?} signals)",
        handle.session_id(),
        args.account,
        config.session.account_mode,
        config.session.signal_mode
    );
    let started = handle.wait_started().await;
    println!("{}", describe_connection(&started));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    while handle.is_live() {
        tokio::select! {
            result = &mut ctrl_c, if !interrupted => {
                result.context("Failed to listen for Ctrl-C")?;
                interrupted = true;
                println!("Stopping after the current trade settles...");
                registry.stop(&args.account).await;
            }
            event = events.recv() => match event {
                Ok(BotEvent::SessionStarted { .. }) => {}
                Ok(event) => {
                    println!("{}", describe_event(&event));
                    if matches!(event, BotEvent::SessionStopped { .. }) {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event stream lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    let status = handle.wait_stopped().await;
    let summary = SessionSummary::from_records(&handle.history());
    print!("{}", SummaryFormatter::format(&args.account, &summary));
    if let Some(reason) = status.stop_reason {
        println!("Stopped: {reason}");
    }

    registry.shutdown_all().await;
    Ok(())
}

/// The opening line, read from the published status so it cannot be missed
/// by a late event subscription.
fn describe_connection(status: &BotStatus) -> String {
    match status.balance {
        Some(balance) => format!("Connected, balance {balance}"),
        None => "Connected".to_string(),
    }
}

fn describe_event(event: &BotEvent) -> String {
    match event {
        BotEvent::SessionStarted { balance, .. } => match balance {
            Some(balance) => format!("Connected, balance {balance}"),
            None => "Connected".to_string(),
        },
        BotEvent::OrderPlaced {
            order_id,
            asset,
            direction,
            stake,
            step,
            expiry_minutes,
        } => format!(
            "Placed {direction} {asset} stake {stake} (step {step}, {expiry_minutes}m) [{order_id}]"
        ),
        BotEvent::TradeSettled {
            record,
            profit_total,
        } => format!(
            "{} {} {} pnl {} | total {profit_total}",
            record.outcome, record.direction, record.asset, record.pnl
        ),
        BotEvent::CycleFailed { reason, .. } => format!("Cycle failed: {reason}"),
        BotEvent::SessionStopped {
            reason,
            profit_total,
            trade_count,
        } => format!("Session stopped ({reason}) after {trade_count} trades, total {profit_total}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autotrade_bot_orchestrator::StopReason;
    use autotrade_core::{Direction, Outcome, TradeRecord};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[test]
    fn settled_trade_line_shows_outcome_and_total() {
        let record = TradeRecord {
            timestamp: Utc::now(),
            asset: "EURUSD".to_string(),
            direction: Direction::Put,
            stake: dec!(2),
            outcome: Outcome::Loss,
            pnl: dec!(-2),
            step_at_time: 1,
            order_id: Some("p-1".to_string()),
            note: None,
        };
        let line = describe_event(&BotEvent::TradeSettled {
            record,
            profit_total: dec!(-3),
        });
        assert_eq!(line, "LOSS PUT EURUSD pnl -2 | total -3");
    }

    #[test]
    fn connection_line_uses_published_balance() {
        let mut status = BotStatus::new(
            "paper",
            uuid::Uuid::new_v4(),
            autotrade_core::AccountMode::Demo,
            autotrade_core::SignalMode::Manual,
            dec!(1),
        );
        assert_eq!(describe_connection(&status), "Connected");
        status.balance = Some(dec!(1000));
        assert_eq!(describe_connection(&status), "Connected, balance 1000");
    }

    #[test]
    fn stop_line_names_reason() {
        let line = describe_event(&BotEvent::SessionStopped {
            reason: StopReason::StopWin,
            profit_total: dec!(10.4),
            trade_count: 12,
        });
        assert_eq!(line, "Session stopped (stop win reached) after 12 trades, total 10.4");
    }
}
