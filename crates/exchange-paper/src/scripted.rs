//! Deterministic broker driven by a queue of scripted trades.
//!
//! Every `place_order` pops the next [`ScriptedTrade`]; what happens at
//! placement and settlement is fully decided by that entry. Placed orders,
//! connects and disconnects are recorded in a shared [`ScriptLog`].

use async_trait::async_trait;
use autotrade_core::{
    AccountMode, BrokerClient, BrokerError, BrokerFactory, Credentials, OrderId, OrderRequest,
};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// What the broker does with one order.
#[derive(Debug, Clone)]
pub enum ScriptedTrade {
    /// Opens, then settles with the signed result immediately
    Settle(Decimal),
    /// Opens, then settles after `delay`
    SettleAfter { result: Decimal, delay: Duration },
    /// Opens, signals `entered` once settlement is awaited, then waits for
    /// `release` before settling
    SettleWhen {
        result: Decimal,
        entered: Arc<Notify>,
        release: Arc<Notify>,
    },
    /// Opens, but settlement never arrives
    Hang,
    /// Placement fails
    RejectPlacement(BrokerError),
    /// Placement never answers
    HangPlacement,
    /// Placement panics, taking the calling task down
    Crash,
    /// Opens, settlement fails
    FailSettlement(BrokerError),
}

impl ScriptedTrade {
    #[must_use]
    pub fn win(amount: Decimal) -> Self {
        Self::Settle(amount)
    }

    #[must_use]
    pub fn loss(stake: Decimal) -> Self {
        Self::Settle(-stake)
    }

    #[must_use]
    pub const fn draw() -> Self {
        Self::Settle(Decimal::ZERO)
    }

    #[must_use]
    pub fn rejected(reason: &str) -> Self {
        Self::RejectPlacement(BrokerError::Rejected(reason.to_string()))
    }
}

/// Observable side effects of a scripted broker.
#[derive(Debug, Default)]
pub struct ScriptLog {
    orders: Mutex<Vec<OrderRequest>>,
    connects: Mutex<u32>,
    disconnects: Mutex<u32>,
}

impl ScriptLog {
    /// Orders that opened, in placement order.
    #[must_use]
    pub fn orders(&self) -> Vec<OrderRequest> {
        self.orders.lock().clone()
    }

    #[must_use]
    pub fn stakes(&self) -> Vec<Decimal> {
        self.orders.lock().iter().map(|o| o.stake).collect()
    }

    #[must_use]
    pub fn connects(&self) -> u32 {
        *self.connects.lock()
    }

    #[must_use]
    pub fn disconnects(&self) -> u32 {
        *self.disconnects.lock()
    }
}

enum Pending {
    Result(Decimal),
    Delayed(Decimal, Duration),
    Gated(Decimal, Arc<Notify>, Arc<Notify>),
    Hang,
    Fail(BrokerError),
}

pub struct ScriptedBroker {
    script: VecDeque<ScriptedTrade>,
    pending: HashMap<String, Pending>,
    connect_error: Option<BrokerError>,
    /// Assets on which placement is refused without consuming the script
    closed_assets: HashSet<String>,
    closes: Vec<Decimal>,
    balance: Decimal,
    next_id: u64,
    log: Arc<ScriptLog>,
}

impl ScriptedBroker {
    #[must_use]
    pub fn new(script: impl IntoIterator<Item = ScriptedTrade>) -> Self {
        Self {
            script: script.into_iter().collect(),
            pending: HashMap::new(),
            connect_error: None,
            closed_assets: HashSet::new(),
            closes: Vec::new(),
            balance: Decimal::from(1_000),
            next_id: 1,
            log: Arc::new(ScriptLog::default()),
        }
    }

    /// A broker with nothing scripted; every placement is rejected.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(VecDeque::new())
    }

    /// Makes `connect` fail with `error`.
    #[must_use]
    pub fn failing_connect(mut self, error: BrokerError) -> Self {
        self.connect_error = Some(error);
        self
    }

    #[must_use]
    pub fn with_closed_asset(mut self, asset: &str) -> Self {
        self.closed_assets.insert(asset.to_string());
        self
    }

    /// Closes returned by `recent_closes` (the last `count` of them).
    #[must_use]
    pub fn with_closes(mut self, closes: Vec<Decimal>) -> Self {
        self.closes = closes;
        self
    }

    #[must_use]
    pub fn log(&self) -> Arc<ScriptLog> {
        Arc::clone(&self.log)
    }
}

#[async_trait]
impl BrokerClient for ScriptedBroker {
    async fn connect(
        &mut self,
        _credentials: &Credentials,
        _mode: AccountMode,
    ) -> Result<(), BrokerError> {
        *self.log.connects.lock() += 1;
        match self.connect_error.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn disconnect(&mut self) {
        *self.log.disconnects.lock() += 1;
    }

    async fn get_balance(&mut self) -> Result<Decimal, BrokerError> {
        Ok(self.balance)
    }

    async fn place_order(&mut self, order: &OrderRequest) -> Result<OrderId, BrokerError> {
        if self.closed_assets.contains(&order.asset) {
            return Err(BrokerError::Rejected(format!("asset {} is closed", order.asset)));
        }

        let pending = match self.script.pop_front() {
            None => return Err(BrokerError::Rejected("script exhausted".to_string())),
            Some(ScriptedTrade::RejectPlacement(err)) => return Err(err),
            Some(ScriptedTrade::HangPlacement) => return std::future::pending().await,
            Some(ScriptedTrade::Crash) => panic!("scripted broker crashed placing {}", order.asset),
            Some(ScriptedTrade::Settle(result)) => Pending::Result(result),
            Some(ScriptedTrade::SettleAfter { result, delay }) => Pending::Delayed(result, delay),
            Some(ScriptedTrade::SettleWhen {
                result,
                entered,
                release,
            }) => Pending::Gated(result, entered, release),
            Some(ScriptedTrade::Hang) => Pending::Hang,
            Some(ScriptedTrade::FailSettlement(err)) => Pending::Fail(err),
        };

        let id = format!("scripted-{}", self.next_id);
        self.next_id += 1;
        self.pending.insert(id.clone(), pending);
        self.log.orders.lock().push(order.clone());
        Ok(OrderId(id))
    }

    async fn await_settlement(&mut self, order_id: &OrderId) -> Result<Decimal, BrokerError> {
        let pending = self
            .pending
            .remove(&order_id.0)
            .ok_or_else(|| BrokerError::Rejected(format!("unknown order {order_id}")))?;

        let result = match pending {
            Pending::Result(result) => result,
            Pending::Delayed(result, delay) => {
                tokio::time::sleep(delay).await;
                result
            }
            Pending::Gated(result, entered, release) => {
                entered.notify_one();
                release.notified().await;
                result
            }
            Pending::Hang => std::future::pending().await,
            Pending::Fail(err) => return Err(err),
        };

        self.balance += result;
        Ok(result)
    }

    async fn recent_closes(
        &mut self,
        _asset: &str,
        _interval_minutes: u32,
        count: usize,
    ) -> Result<Vec<Decimal>, BrokerError> {
        let skip = self.closes.len().saturating_sub(count);
        Ok(self.closes[skip..].to_vec())
    }
}

/// Hands out pre-built scripted brokers per account, in push order.
///
/// An account with nothing queued gets an empty script.
#[derive(Default)]
pub struct ScriptedBrokerFactory {
    queued: Mutex<HashMap<String, VecDeque<ScriptedBroker>>>,
}

impl ScriptedBrokerFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `broker` for the next session of `account_id` and returns its log.
    pub fn push(&self, account_id: &str, broker: ScriptedBroker) -> Arc<ScriptLog> {
        let log = broker.log();
        self.queued
            .lock()
            .entry(account_id.to_string())
            .or_default()
            .push_back(broker);
        log
    }
}

impl BrokerFactory for ScriptedBrokerFactory {
    fn create(&self, account_id: &str) -> Box<dyn BrokerClient> {
        let broker = self
            .queued
            .lock()
            .get_mut(account_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(ScriptedBroker::empty);
        Box::new(broker)
    }
}
