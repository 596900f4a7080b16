use crate::commands::StopReason;
use autotrade_core::{Direction, TradeRecord};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BotEvent {
    /// Broker connected, trading about to begin
    SessionStarted {
        session_id: Uuid,
        balance: Option<Decimal>,
        timestamp: DateTime<Utc>,
    },

    /// Order opened with the broker
    OrderPlaced {
        order_id: String,
        asset: String,
        direction: Direction,
        stake: Decimal,
        step: u32,
        expiry_minutes: u32,
    },

    /// Order settled and recorded
    TradeSettled {
        record: TradeRecord,
        profit_total: Decimal,
    },

    /// Cycle ended without a settled position
    CycleFailed {
        reason: String,
        timestamp: DateTime<Utc>,
    },

    SessionStopped {
        reason: StopReason,
        profit_total: Decimal,
        trade_count: u32,
    },
}
