//! Randomized paper broker.
//!
//! Simulates a binary-options account: stakes are debited on placement,
//! settlement rolls win/draw/loss from configured probabilities after a fixed
//! delay, and prices follow a bounded random walk per asset.

use async_trait::async_trait;
use autotrade_core::{
    AccountMode, BrokerClient, BrokerError, BrokerFactory, Credentials, OrderId, OrderRequest,
    PaperConfig,
};
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

// =============================================================================
// State
// =============================================================================

#[derive(Debug)]
struct PaperState {
    connected: bool,
    mode: AccountMode,
    balance: Decimal,
    /// Stake held for each open order
    open_orders: HashMap<String, Decimal>,
    /// Last simulated price per asset
    prices: HashMap<String, Decimal>,
    orders_placed: u32,
    orders_rejected: u32,
}

impl PaperState {
    fn new(balance: Decimal) -> Self {
        Self {
            connected: false,
            mode: AccountMode::Demo,
            balance,
            open_orders: HashMap::new(),
            prices: HashMap::new(),
            orders_placed: 0,
            orders_rejected: 0,
        }
    }
}

/// Roll outcome for a settling order.
enum Roll {
    Win,
    Draw,
    Loss,
}

// =============================================================================
// Broker
// =============================================================================

pub struct PaperBroker {
    config: PaperConfig,
    state: Arc<RwLock<PaperState>>,
    rng: Arc<RwLock<StdRng>>,
}

impl std::fmt::Debug for PaperBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaperBroker")
            .field("config", &self.config)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl PaperBroker {
    #[must_use]
    pub fn new(config: PaperConfig) -> Self {
        let rng = match config.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            state: Arc::new(RwLock::new(PaperState::new(config.initial_balance))),
            rng: Arc::new(RwLock::new(rng)),
            config,
        }
    }

    #[must_use]
    pub fn balance(&self) -> Decimal {
        self.state.read().balance
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.read().connected
    }

    #[must_use]
    pub fn orders_placed(&self) -> u32 {
        self.state.read().orders_placed
    }

    #[must_use]
    pub fn orders_rejected(&self) -> u32 {
        self.state.read().orders_rejected
    }

    fn ensure_connected(&self) -> Result<(), BrokerError> {
        if self.state.read().connected {
            Ok(())
        } else {
            Err(BrokerError::SessionLost("paper session is not connected".to_string()))
        }
    }

    fn roll_rejection(&self) -> bool {
        self.rng.write().gen::<f64>() < self.config.reject_probability
    }

    fn roll_outcome(&self) -> Roll {
        let draw = self.config.draw_probability;
        let win = self.config.win_probability;
        let roll = self.rng.write().gen::<f64>();
        if roll < draw {
            Roll::Draw
        } else if roll < draw + (1.0 - draw) * win {
            Roll::Win
        } else {
            Roll::Loss
        }
    }

    /// One random-walk step of at most ±0.05%.
    fn step_price(&self, price: Decimal) -> Decimal {
        let bps: i64 = self.rng.write().gen_range(-5..=5);
        (price + price * Decimal::new(bps, 4)).round_dp(5)
    }
}

#[async_trait]
impl BrokerClient for PaperBroker {
    async fn connect(
        &mut self,
        credentials: &Credentials,
        mode: AccountMode,
    ) -> Result<(), BrokerError> {
        if credentials.email.trim().is_empty() {
            return Err(BrokerError::Authentication("email is required".to_string()));
        }
        let mut state = self.state.write();
        state.connected = true;
        state.mode = mode;
        tracing::info!(
            email = %credentials.email,
            mode = ?mode,
            balance = %state.balance,
            "Paper broker connected"
        );
        Ok(())
    }

    async fn disconnect(&mut self) {
        let mut state = self.state.write();
        state.connected = false;
        tracing::info!(open_orders = state.open_orders.len(), "Paper broker disconnected");
    }

    async fn get_balance(&mut self) -> Result<Decimal, BrokerError> {
        self.ensure_connected()?;
        Ok(self.state.read().balance)
    }

    async fn place_order(&mut self, order: &OrderRequest) -> Result<OrderId, BrokerError> {
        self.ensure_connected()?;

        if order.stake <= Decimal::ZERO {
            return Err(BrokerError::Rejected("stake must be positive".to_string()));
        }
        let rejected = self.roll_rejection();

        let mut state = self.state.write();
        if order.stake > state.balance {
            state.orders_rejected += 1;
            return Err(BrokerError::Rejected("insufficient balance".to_string()));
        }
        if rejected {
            state.orders_rejected += 1;
            return Err(BrokerError::Rejected(format!(
                "asset {} is not available",
                order.asset
            )));
        }

        let order_id = format!("paper-{}", Uuid::new_v4());
        state.balance -= order.stake;
        state.orders_placed += 1;
        state.open_orders.insert(order_id.clone(), order.stake);

        tracing::debug!(
            order_id = %order_id,
            asset = %order.asset,
            direction = %order.direction,
            stake = %order.stake,
            "Paper order opened"
        );
        Ok(OrderId(order_id))
    }

    async fn await_settlement(&mut self, order_id: &OrderId) -> Result<Decimal, BrokerError> {
        if !self.state.read().open_orders.contains_key(&order_id.0) {
            return Err(BrokerError::Rejected(format!("unknown order {order_id}")));
        }

        tokio::time::sleep(self.config.settlement_delay).await;
        self.ensure_connected()?;

        let roll = self.roll_outcome();
        let mut state = self.state.write();
        let stake = state
            .open_orders
            .remove(&order_id.0)
            .ok_or_else(|| BrokerError::Rejected(format!("unknown order {order_id}")))?;

        let result = match roll {
            Roll::Win => {
                let profit = (stake * self.config.payout_ratio).round_dp(2);
                state.balance += stake + profit;
                profit
            }
            Roll::Draw => {
                state.balance += stake;
                Decimal::ZERO
            }
            Roll::Loss => -stake,
        };
        Ok(result)
    }

    async fn recent_closes(
        &mut self,
        asset: &str,
        _interval_minutes: u32,
        count: usize,
    ) -> Result<Vec<Decimal>, BrokerError> {
        self.ensure_connected()?;

        let start = self
            .state
            .read()
            .prices
            .get(asset)
            .copied()
            .unwrap_or(dec!(1.10000));

        let mut closes = Vec::with_capacity(count);
        let mut price = start;
        for _ in 0..count {
            price = self.step_price(price);
            closes.push(price);
        }

        self.state.write().prices.insert(asset.to_string(), price);
        Ok(closes)
    }
}

/// Creates one independent paper account per trading session.
#[derive(Debug, Clone, Default)]
pub struct PaperBrokerFactory {
    config: PaperConfig,
}

impl PaperBrokerFactory {
    #[must_use]
    pub const fn new(config: PaperConfig) -> Self {
        Self { config }
    }
}

impl BrokerFactory for PaperBrokerFactory {
    fn create(&self, account_id: &str) -> Box<dyn BrokerClient> {
        tracing::debug!(account = account_id, "Creating paper broker");
        Box::new(PaperBroker::new(self.config.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autotrade_core::Direction;
    use std::time::Duration;

    fn config(win: f64, draw: f64) -> PaperConfig {
        PaperConfig {
            initial_balance: dec!(100),
            payout_ratio: dec!(0.8),
            win_probability: win,
            draw_probability: draw,
            reject_probability: 0.0,
            settlement_delay: Duration::ZERO,
            random_seed: Some(42),
        }
    }

    fn order(stake: Decimal) -> OrderRequest {
        OrderRequest {
            stake,
            asset: "EURUSD".to_string(),
            direction: Direction::Call,
            expiry_minutes: 1,
        }
    }

    async fn connected(config: PaperConfig) -> PaperBroker {
        let mut broker = PaperBroker::new(config);
        broker
            .connect(&Credentials::default(), AccountMode::Demo)
            .await
            .unwrap();
        broker
    }

    #[tokio::test]
    async fn rejects_empty_email() {
        let mut broker = PaperBroker::new(config(1.0, 0.0));
        let err = broker
            .connect(&Credentials::new("", "x"), AccountMode::Demo)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Authentication(_)));
    }

    #[tokio::test]
    async fn orders_require_connection() {
        let mut broker = PaperBroker::new(config(1.0, 0.0));
        let err = broker.place_order(&order(dec!(1))).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn certain_win_pays_out() {
        let mut broker = connected(config(1.0, 0.0)).await;
        let id = broker.place_order(&order(dec!(10))).await.unwrap();
        assert_eq!(broker.balance(), dec!(90));
        let result = broker.await_settlement(&id).await.unwrap();
        assert_eq!(result, dec!(8));
        assert_eq!(broker.balance(), dec!(108));
    }

    #[tokio::test]
    async fn certain_loss_keeps_stake() {
        let mut broker = connected(config(0.0, 0.0)).await;
        let id = broker.place_order(&order(dec!(10))).await.unwrap();
        assert_eq!(broker.await_settlement(&id).await.unwrap(), dec!(-10));
        assert_eq!(broker.get_balance().await.unwrap(), dec!(90));
    }

    #[tokio::test]
    async fn certain_draw_refunds() {
        let mut broker = connected(config(0.5, 1.0)).await;
        let id = broker.place_order(&order(dec!(10))).await.unwrap();
        assert_eq!(broker.await_settlement(&id).await.unwrap(), Decimal::ZERO);
        assert_eq!(broker.balance(), dec!(100));
    }

    #[tokio::test]
    async fn rejects_stake_above_balance() {
        let mut broker = connected(config(1.0, 0.0)).await;
        let err = broker.place_order(&order(dec!(101))).await.unwrap_err();
        assert!(matches!(err, BrokerError::Rejected(_)));
        assert_eq!(broker.orders_rejected(), 1);
    }

    #[tokio::test]
    async fn settling_unknown_order_fails() {
        let mut broker = connected(config(1.0, 0.0)).await;
        let err = broker
            .await_settlement(&OrderId("nope".to_string()))
            .await
            .unwrap_err();
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn closes_continue_the_walk() {
        let mut broker = connected(config(1.0, 0.0)).await;
        let first = broker.recent_closes("EURUSD", 1, 30).await.unwrap();
        assert_eq!(first.len(), 30);
        assert!(first.iter().all(|p| *p > Decimal::ZERO));
        let second = broker.recent_closes("EURUSD", 1, 1).await.unwrap();
        let drift = (second[0] - first[29]).abs();
        assert!(drift <= first[29] * dec!(0.0005) + dec!(0.00001));
    }

    #[tokio::test]
    async fn disconnect_ends_session() {
        let mut broker = connected(config(1.0, 0.0)).await;
        broker.disconnect().await;
        assert!(!broker.is_connected());
        assert!(broker.get_balance().await.unwrap_err().is_fatal());
    }

    #[test]
    fn factory_creates_fresh_accounts() {
        let factory = PaperBrokerFactory::new(config(1.0, 0.0));
        let _a = factory.create("alice");
        let _b = factory.create("bob");
    }
}
