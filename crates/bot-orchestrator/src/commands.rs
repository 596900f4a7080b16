use autotrade_core::{AccountMode, SignalMode, TradeRecord};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle of one trading session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BotState {
    Idle,
    Connecting,
    Running,
    /// Finishing the in-flight cycle and closing the broker session
    Stopping,
    Stopped,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StopReason {
    /// Profit reached `stop_win`
    StopWin,
    /// Loss reached `stop_loss`
    StopLoss,
    /// Martingale cycle exhausted with the consecutive-loss ceiling reached
    ConsecutiveLosses,
    /// Every manual signal was dispatched
    SignalsExhausted,
    /// `stop` or `logout` was called
    UserRequested,
    /// The broker session became unusable
    SessionLost,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::StopWin => "stop win reached",
            Self::StopLoss => "stop loss reached",
            Self::ConsecutiveLosses => "consecutive loss limit reached",
            Self::SignalsExhausted => "all signals dispatched",
            Self::UserRequested => "stopped by user",
            Self::SessionLost => "broker session lost",
        };
        f.write_str(text)
    }
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotStatus {
    pub account_id: String,
    pub session_id: Uuid,
    pub state: BotState,
    pub stop_reason: Option<StopReason>,
    pub account_mode: AccountMode,
    pub signal_mode: SignalMode,
    pub profit_total: Decimal,
    pub trade_count: u32,
    pub consecutive_losses: u32,
    pub step: u32,
    /// Stake of the next order, rounded to the tradable increment
    pub next_stake: Decimal,
    pub balance: Option<Decimal>,
    /// Undispatched manual signals (`None` in indicator modes)
    pub pending_signals: Option<usize>,
    /// A stop was asked for; the session ends once the in-flight cycle settles
    pub stop_requested: bool,
    pub started_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    /// Reason of the most recent failed cycle
    pub last_error: Option<String>,
}

impl BotStatus {
    #[must_use]
    pub fn new(
        account_id: &str,
        session_id: Uuid,
        account_mode: AccountMode,
        signal_mode: SignalMode,
        next_stake: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            account_id: account_id.to_string(),
            session_id,
            state: BotState::Idle,
            stop_reason: None,
            account_mode,
            signal_mode,
            profit_total: Decimal::ZERO,
            trade_count: 0,
            consecutive_losses: 0,
            step: 0,
            next_stake,
            balance: None,
            pending_signals: None,
            stop_requested: false,
            started_at: now,
            last_update: now,
            last_error: None,
        }
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.state == BotState::Stopped
    }
}

/// Status and trade history, published together so readers never see a
/// record without the totals it produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub status: BotStatus,
    pub history: Vec<TradeRecord>,
}

impl SessionSnapshot {
    #[must_use]
    pub const fn new(status: BotStatus) -> Self {
        Self {
            status,
            history: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn new_status_is_idle_and_empty() {
        let status = BotStatus::new(
            "alice",
            Uuid::new_v4(),
            AccountMode::Demo,
            SignalMode::Manual,
            dec!(1),
        );
        assert_eq!(status.state, BotState::Idle);
        assert_eq!(status.profit_total, dec!(0));
        assert!(!status.is_stopped());
        assert!(SessionSnapshot::new(status).history.is_empty());
    }

    #[test]
    fn stop_reason_reads_naturally() {
        assert_eq!(StopReason::SignalsExhausted.to_string(), "all signals dispatched");
    }
}
