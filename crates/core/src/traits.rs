use crate::config::{AccountMode, Credentials};
use crate::error::BrokerError;
use crate::events::Direction;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Broker-assigned order identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(pub String);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for OrderId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A timed binary order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Already rounded to the tradable increment
    pub stake: Decimal,
    pub asset: String,
    pub direction: Direction,
    pub expiry_minutes: u32,
}

/// Session with a binary-options broker, owned by exactly one trading loop.
///
/// Settlement results are signed: the win amount when positive, zero for a
/// refund, negative for a loss.
#[async_trait]
pub trait BrokerClient: Send {
    async fn connect(
        &mut self,
        credentials: &Credentials,
        mode: AccountMode,
    ) -> Result<(), BrokerError>;

    async fn disconnect(&mut self);

    async fn get_balance(&mut self) -> Result<Decimal, BrokerError>;

    async fn place_order(&mut self, order: &OrderRequest) -> Result<OrderId, BrokerError>;

    /// Resolves once the order has settled.
    async fn await_settlement(&mut self, order_id: &OrderId) -> Result<Decimal, BrokerError>;

    /// The last `count` closes of `asset` at the given candle width, oldest first.
    async fn recent_closes(
        &mut self,
        _asset: &str,
        _interval_minutes: u32,
        _count: usize,
    ) -> Result<Vec<Decimal>, BrokerError> {
        Err(BrokerError::Unsupported("recent_closes"))
    }
}

/// Opens a fresh, unconnected broker client for an account.
pub trait BrokerFactory: Send + Sync {
    fn create(&self, account_id: &str) -> Box<dyn BrokerClient>;
}
