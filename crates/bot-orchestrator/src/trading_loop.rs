//! Per-account trading control loop.
//!
//! One loop owns one connected broker session and runs strictly sequential
//! cycles:
//!
//! ```text
//! check boundaries -> check stop -> next direction -> place -> await settlement
//!        ^                                                            |
//!        +---------------------- record, advance stake ---------------+
//! ```
//!
//! Stop requests are observed at the top of each cycle and while idling or
//! backing off, never while an order is settling. Every broker call is
//! bounded: settlement by expiry plus margin, everything else by
//! `EngineConfig::broker_timeout`.

use crate::commands::{BotState, BotStatus, SessionSnapshot, StopReason};
use crate::events::BotEvent;
use autotrade_core::signal::otc_variant;
use autotrade_core::{
    round_to_increment, BrokerClient, BrokerError, ConfigError, CycleError, Direction,
    EngineConfig, IndicatorStrategy, OrderId, OrderRequest, Outcome, SessionSummary,
    SessionTotals, SignalBook, StakePolicy, TradeRecord, TradingConfig,
};
use chrono::Utc;
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use uuid::Uuid;

/// Broker session shared between a loop and the registry supervisor, which
/// closes it if the loop dies without reaching `finish`.
pub type SharedBroker = Arc<Mutex<Box<dyn BrokerClient>>>;

/// Where trade directions come from.
pub enum DirectionSource {
    /// Parsed manual signals, dispatched in order
    Signals(SignalBook),
    /// Indicator decision on recent closes of the default asset
    Indicator(Box<dyn IndicatorStrategy>),
}

impl DirectionSource {
    fn pending(&self) -> Option<usize> {
        match self {
            Self::Signals(book) => Some(book.pending_count()),
            Self::Indicator(_) => None,
        }
    }
}

/// Channels linking a loop to its handle.
pub struct SessionChannels {
    pub stop_rx: watch::Receiver<bool>,
    pub snapshot_tx: Arc<watch::Sender<SessionSnapshot>>,
    pub event_tx: broadcast::Sender<BotEvent>,
}

/// A trade the loop has decided to make.
struct TradePlan {
    direction: Direction,
    asset: Option<String>,
    expiry_minutes: u32,
}

enum NextStep {
    Trade(TradePlan),
    Idle(Duration),
    Exhausted,
    Lost(BrokerError),
}

enum CycleResult {
    Settled { proceed: bool },
    Failed(CycleError),
}

pub struct TradingLoop {
    account_id: String,
    session_id: Uuid,
    config: TradingConfig,
    engine: EngineConfig,
    broker: SharedBroker,
    source: DirectionSource,
    stake: StakePolicy,
    totals: SessionTotals,
    state: BotState,
    stop_reason: Option<StopReason>,
    balance: Option<Decimal>,
    last_error: Option<String>,
    started_at: chrono::DateTime<Utc>,
    channels: SessionChannels,
}

impl TradingLoop {
    /// Creates a loop around an already connected broker.
    #[must_use]
    pub fn new(
        account_id: &str,
        session_id: Uuid,
        config: TradingConfig,
        engine: EngineConfig,
        broker: SharedBroker,
        source: DirectionSource,
        channels: SessionChannels,
    ) -> Self {
        Self {
            account_id: account_id.to_string(),
            session_id,
            stake: StakePolicy::from_config(&config),
            config,
            engine,
            broker,
            source,
            totals: SessionTotals::default(),
            state: BotState::Connecting,
            stop_reason: None,
            balance: None,
            last_error: None,
            started_at: Utc::now(),
            channels,
        }
    }

    /// Runs cycles until a boundary, exhaustion, a stop request or a lost
    /// session ends the loop, then closes the broker session.
    pub async fn run(mut self) -> StopReason {
        self.begin_session().await;

        let reason = loop {
            if let Some(reason) = self.boundary_reached() {
                break reason;
            }
            if self.stop_requested() {
                break StopReason::UserRequested;
            }

            match self.next_step().await {
                NextStep::Exhausted => break StopReason::SignalsExhausted,
                NextStep::Lost(err) => {
                    tracing::error!(account = %self.account_id, error = %err, "Broker session lost");
                    self.last_error = Some(err.to_string());
                    break StopReason::SessionLost;
                }
                NextStep::Idle(wait) => {
                    if self.sleep_unless_stopped(wait).await {
                        break StopReason::UserRequested;
                    }
                }
                NextStep::Trade(plan) => match self.execute(plan).await {
                    CycleResult::Settled { proceed: true } => {}
                    CycleResult::Settled { proceed: false } => {
                        break StopReason::ConsecutiveLosses;
                    }
                    CycleResult::Failed(err) if err.is_fatal() => {
                        break StopReason::SessionLost;
                    }
                    CycleResult::Failed(_) => {
                        if self.sleep_unless_stopped(self.engine.failure_backoff).await {
                            break StopReason::UserRequested;
                        }
                    }
                },
            }
        };

        self.finish(reason).await;
        reason
    }

    async fn begin_session(&mut self) {
        self.stake.reset();
        self.totals = SessionTotals::default();
        self.started_at = Utc::now();
        self.balance = self.read_balance().await;
        self.state = BotState::Running;
        self.publish();

        tracing::info!(
            account = %self.account_id,
            session = %self.session_id,
            mode = ?self.config.account_mode,
            signals = ?self.config.signal_mode,
            stake = %self.config.stake_base,
            stop_win = %self.config.stop_win,
            stop_loss = %self.config.stop_loss,
            martingale_steps = self.config.martingale_steps,
            "Trading session started"
        );
        self.emit(BotEvent::SessionStarted {
            session_id: self.session_id,
            balance: self.balance,
            timestamp: self.started_at,
        });
    }

    /// Stop-win / stop-loss check, run before any new position is opened.
    fn boundary_reached(&self) -> Option<StopReason> {
        let profit = self.totals.profit_total;
        if profit >= self.config.stop_win {
            tracing::info!(account = %self.account_id, profit_total = %profit, "Stop win reached");
            return Some(StopReason::StopWin);
        }
        if profit <= -self.config.stop_loss {
            tracing::info!(account = %self.account_id, profit_total = %profit, "Stop loss reached");
            return Some(StopReason::StopLoss);
        }
        None
    }

    fn stop_requested(&self) -> bool {
        *self.channels.stop_rx.borrow()
    }

    /// Sleeps for `wait`, returning early (with `true`) on a stop request.
    async fn sleep_unless_stopped(&mut self, wait: Duration) -> bool {
        if self.stop_requested() {
            return true;
        }
        tokio::select! {
            () = tokio::time::sleep(wait) => false,
            _ = self.channels.stop_rx.wait_for(|stop| *stop) => true,
        }
    }

    async fn next_step(&mut self) -> NextStep {
        let expiry_default = self.config.expiry_minutes;
        let default_asset = self.config.default_asset().map(str::to_string);
        let idle_poll = self.engine.idle_poll;
        let lookback = self.engine.indicator_lookback;
        let call_timeout = self.engine.broker_timeout;
        let broker = Arc::clone(&self.broker);

        match &mut self.source {
            DirectionSource::Signals(book) => {
                let now = Utc::now();
                if let Some(signal) = book.next_due(now).cloned() {
                    book.consume(signal.id);
                    tracing::debug!(
                        account = %self.account_id,
                        line = signal.line,
                        timing = ?signal.timing,
                        "Dispatching signal"
                    );
                    let expiry_minutes = signal.expiry_or(expiry_default);
                    return NextStep::Trade(TradePlan {
                        direction: signal.direction,
                        asset: signal.asset.or(default_asset),
                        expiry_minutes,
                    });
                }
                if !book.has_pending() {
                    return NextStep::Exhausted;
                }
                let wait = book
                    .next_wake(now)
                    .and_then(|at| (at - now).to_std().ok())
                    .map_or(idle_poll, |until| until.min(idle_poll));
                NextStep::Idle(wait)
            }
            DirectionSource::Indicator(strategy) => {
                let Some(asset) = default_asset else {
                    return NextStep::Idle(idle_poll);
                };
                let count = lookback.max(strategy.min_closes());
                let request = async {
                    broker
                        .lock()
                        .await
                        .recent_closes(&asset, expiry_default, count)
                        .await
                };
                let closes = match within(call_timeout, "recent_closes", request).await {
                    Ok(closes) => closes,
                    Err(err) if err.is_fatal() => return NextStep::Lost(err),
                    Err(err) => {
                        tracing::warn!(account = %self.account_id, error = %err, "Could not read closes");
                        return NextStep::Idle(idle_poll);
                    }
                };
                match strategy.decide(&closes) {
                    Some(direction) => {
                        tracing::debug!(
                            account = %self.account_id,
                            strategy = strategy.name(),
                            %direction,
                            "Indicator signal"
                        );
                        NextStep::Trade(TradePlan {
                            direction,
                            asset: Some(asset),
                            expiry_minutes: expiry_default,
                        })
                    }
                    None => NextStep::Idle(idle_poll),
                }
            }
        }
    }

    async fn execute(&mut self, plan: TradePlan) -> CycleResult {
        let step = self.stake.step();
        let stake = round_to_increment(self.stake.current_stake(), self.config.stake_increment);

        let Some(asset) = plan.asset else {
            let err = CycleError::from(ConfigError::MissingAsset);
            self.record_failure(String::new(), plan.direction, stake, step, None, &err);
            return CycleResult::Failed(err);
        };

        let (asset, order_id) = match self
            .place(asset, plan.direction, stake, plan.expiry_minutes)
            .await
        {
            Ok(placed) => placed,
            Err((asset, err)) => {
                self.record_failure(asset, plan.direction, stake, step, None, &err);
                return CycleResult::Failed(err);
            }
        };

        tracing::info!(
            account = %self.account_id,
            order_id = %order_id,
            %asset,
            direction = %plan.direction,
            %stake,
            step,
            expiry = plan.expiry_minutes,
            "Order placed"
        );
        self.emit(BotEvent::OrderPlaced {
            order_id: order_id.to_string(),
            asset: asset.clone(),
            direction: plan.direction,
            stake,
            step,
            expiry_minutes: plan.expiry_minutes,
        });

        let settlement = match self.settle(&order_id, plan.expiry_minutes).await {
            Ok(result) => result,
            Err(err) => {
                self.record_failure(asset, plan.direction, stake, step, Some(&order_id), &err);
                return CycleResult::Failed(err);
            }
        };

        let outcome = Outcome::from_settlement(settlement);
        let record = TradeRecord {
            timestamp: Utc::now(),
            asset,
            direction: plan.direction,
            stake,
            outcome,
            pnl: outcome.pnl(settlement, stake),
            step_at_time: step,
            order_id: Some(order_id.to_string()),
            note: None,
        };
        let decision = self.stake.advance(outcome);

        self.balance = self.read_balance().await.or(self.balance);
        self.last_error = None;
        self.commit(record.clone());

        tracing::info!(
            account = %self.account_id,
            %outcome,
            pnl = %record.pnl,
            profit_total = %self.totals.profit_total,
            next_stake = %decision.next_stake,
            consecutive_losses = self.stake.consecutive_losses(),
            "Trade settled"
        );
        self.emit(BotEvent::TradeSettled {
            record,
            profit_total: self.totals.profit_total,
        });

        CycleResult::Settled {
            proceed: decision.proceed,
        }
    }

    /// Places the order, retrying a rejected asset once on its OTC variant.
    /// Returns the asset that opened (or was last tried, on failure).
    async fn place(
        &mut self,
        asset: String,
        direction: Direction,
        stake: Decimal,
        expiry_minutes: u32,
    ) -> Result<(String, OrderId), (String, CycleError)> {
        let mut request = OrderRequest {
            stake,
            asset,
            direction,
            expiry_minutes,
        };

        let first = self.place_once(&request).await;
        let reason = match first {
            Ok(order_id) => return Ok((request.asset, order_id)),
            Err(BrokerError::Rejected(reason)) if self.config.otc_fallback => reason,
            Err(err) => return Err((request.asset, CycleError::Placement(err))),
        };

        let Some(otc) = otc_variant(&request.asset) else {
            return Err((request.asset, CycleError::Placement(BrokerError::Rejected(reason))));
        };
        tracing::warn!(
            account = %self.account_id,
            asset = %request.asset,
            fallback = %otc,
            %reason,
            "Order rejected, retrying on OTC asset"
        );
        request.asset = otc;

        match self.place_once(&request).await {
            Ok(order_id) => Ok((request.asset, order_id)),
            Err(err) => Err((request.asset, CycleError::Placement(err))),
        }
    }

    async fn place_once(&self, request: &OrderRequest) -> Result<OrderId, BrokerError> {
        let broker = Arc::clone(&self.broker);
        let call = async { broker.lock().await.place_order(request).await };
        within(self.engine.broker_timeout, "place_order", call).await
    }

    /// Waits for settlement, bounded by expiry plus margin (and the hard ceiling).
    async fn settle(&mut self, order_id: &OrderId, expiry_minutes: u32) -> Result<Decimal, CycleError> {
        let wait = self.engine.settlement_wait(expiry_minutes);
        let broker = Arc::clone(&self.broker);
        let settlement = async { broker.lock().await.await_settlement(order_id).await };
        match tokio::time::timeout(wait, settlement).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(err)) => Err(CycleError::Settlement(err)),
            Err(_) => Err(CycleError::SettlementTimeout {
                order_id: order_id.to_string(),
                waited: wait,
            }),
        }
    }

    fn record_failure(
        &mut self,
        asset: String,
        direction: Direction,
        stake: Decimal,
        step: u32,
        order_id: Option<&OrderId>,
        err: &CycleError,
    ) {
        tracing::warn!(account = %self.account_id, %asset, error = %err, "Trade cycle failed");

        let record = TradeRecord {
            timestamp: Utc::now(),
            asset,
            direction,
            stake,
            outcome: Outcome::Error,
            pnl: Decimal::ZERO,
            step_at_time: step,
            order_id: order_id.map(ToString::to_string),
            note: Some(err.to_string()),
        };
        self.last_error = Some(err.to_string());
        self.commit(record);
        self.emit(BotEvent::CycleFailed {
            reason: err.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Applies a record to the totals and publishes it with the new status
    /// in one snapshot update.
    fn commit(&mut self, record: TradeRecord) {
        self.totals.apply(&record);
        let status = self.status();
        self.channels.snapshot_tx.send_modify(|snapshot| {
            snapshot.history.push(record);
            snapshot.status = status;
        });
    }

    async fn read_balance(&self) -> Option<Decimal> {
        let broker = Arc::clone(&self.broker);
        let call = async { broker.lock().await.get_balance().await };
        match within(self.engine.broker_timeout, "get_balance", call).await {
            Ok(balance) => Some(balance),
            Err(err) => {
                tracing::warn!(account = %self.account_id, error = %err, "Could not read balance");
                None
            }
        }
    }

    async fn finish(&mut self, reason: StopReason) {
        self.state = BotState::Stopping;
        self.publish();

        disconnect(&self.broker, self.engine.broker_timeout).await;

        self.state = BotState::Stopped;
        self.stop_reason = Some(reason);
        self.publish();

        let summary = SessionSummary::from_records(&self.channels.snapshot_tx.borrow().history);
        tracing::info!(
            account = %self.account_id,
            session = %self.session_id,
            %reason,
            profit_total = %self.totals.profit_total,
            wins = summary.wins,
            losses = summary.losses,
            draws = summary.draws,
            errors = summary.errors,
            "Trading session stopped"
        );
        self.emit(BotEvent::SessionStopped {
            reason,
            profit_total: self.totals.profit_total,
            trade_count: self.totals.trade_count,
        });
    }

    fn status(&self) -> BotStatus {
        BotStatus {
            account_id: self.account_id.clone(),
            session_id: self.session_id,
            state: self.state,
            stop_reason: self.stop_reason,
            account_mode: self.config.account_mode,
            signal_mode: self.config.signal_mode,
            profit_total: self.totals.profit_total,
            trade_count: self.totals.trade_count,
            consecutive_losses: self.stake.consecutive_losses(),
            step: self.stake.step(),
            next_stake: round_to_increment(self.stake.current_stake(), self.config.stake_increment),
            balance: self.balance,
            pending_signals: self.source.pending(),
            stop_requested: self.stop_requested(),
            started_at: self.started_at,
            last_update: Utc::now(),
            last_error: self.last_error.clone(),
        }
    }

    fn publish(&self) {
        let status = self.status();
        self.channels
            .snapshot_tx
            .send_modify(|snapshot| snapshot.status = status);
    }

    fn emit(&self, event: BotEvent) {
        // No subscribers is fine
        let _ = self.channels.event_tx.send(event);
    }
}

/// Awaits a broker call for at most `limit`.
pub(crate) async fn within<T>(
    limit: Duration,
    call: &'static str,
    request: impl Future<Output = Result<T, BrokerError>>,
) -> Result<T, BrokerError> {
    tokio::time::timeout(limit, request).await.unwrap_or_else(|_| {
        Err(BrokerError::Timeout(format!(
            "{call} did not answer within {limit:?}"
        )))
    })
}

/// Closes the broker session, giving up after `limit`.
pub(crate) async fn disconnect(broker: &SharedBroker, limit: Duration) {
    let call = async { broker.lock().await.disconnect().await };
    if tokio::time::timeout(limit, call).await.is_err() {
        tracing::warn!(timeout = ?limit, "Broker disconnect did not finish");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autotrade_core::{SchedulePolicy, TrendStrategy};
    use autotrade_paper::{ScriptLog, ScriptedBroker, ScriptedTrade};
    use rust_decimal_macros::dec;

    fn engine() -> EngineConfig {
        EngineConfig {
            idle_poll: Duration::from_millis(5),
            failure_backoff: Duration::from_millis(5),
            settlement_margin: Duration::from_millis(50),
            broker_timeout: Duration::from_secs(1),
            ..EngineConfig::default()
        }
    }

    fn config(signals: &str) -> TradingConfig {
        TradingConfig {
            stake_base: dec!(1),
            stop_win: dec!(100),
            stop_loss: dec!(100),
            martingale_steps: 3,
            martingale_multiplier: dec!(2),
            asset_default: "EURUSD".to_string(),
            signal_text: signals.to_string(),
            ..TradingConfig::default()
        }
    }

    struct Harness {
        trading_loop: TradingLoop,
        stop_tx: watch::Sender<bool>,
        snapshot_rx: watch::Receiver<SessionSnapshot>,
        log: Arc<ScriptLog>,
    }

    fn harness(config: TradingConfig, broker: ScriptedBroker) -> Harness {
        let log = broker.log();
        let book = SignalBook::parse(&config.signal_text, &SchedulePolicy::default(), Utc::now());
        harness_with_source(config, broker, DirectionSource::Signals(book), log)
    }

    fn harness_with_source(
        config: TradingConfig,
        broker: ScriptedBroker,
        source: DirectionSource,
        log: Arc<ScriptLog>,
    ) -> Harness {
        let session_id = Uuid::new_v4();
        let (stop_tx, stop_rx) = watch::channel(false);
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::new(BotStatus::new(
            "alice",
            session_id,
            config.account_mode,
            config.signal_mode,
            config.stake_base,
        )));
        let (event_tx, _) = broadcast::channel(64);
        let broker: Box<dyn BrokerClient> = Box::new(broker);
        let trading_loop = TradingLoop::new(
            "alice",
            session_id,
            config,
            engine(),
            Arc::new(Mutex::new(broker)),
            source,
            SessionChannels {
                stop_rx,
                snapshot_tx: Arc::new(snapshot_tx),
                event_tx,
            },
        );
        Harness {
            trading_loop,
            stop_tx,
            snapshot_rx,
            log,
        }
    }

    #[tokio::test]
    async fn runs_until_signals_exhausted() {
        let h = harness(
            config("CALL\nPUT\nCALL"),
            ScriptedBroker::new([
                ScriptedTrade::loss(dec!(1)),
                ScriptedTrade::win(dec!(1.6)),
                ScriptedTrade::draw(),
            ]),
        );
        let reason = h.trading_loop.run().await;

        assert_eq!(reason, StopReason::SignalsExhausted);
        assert_eq!(h.log.stakes(), vec![dec!(1), dec!(2), dec!(1)]);
        let snapshot = h.snapshot_rx.borrow().clone();
        assert_eq!(snapshot.status.state, BotState::Stopped);
        assert_eq!(snapshot.status.stop_reason, Some(StopReason::SignalsExhausted));
        assert_eq!(snapshot.status.profit_total, dec!(0.6));
        assert_eq!(snapshot.status.trade_count, 3);
        assert_eq!(snapshot.history.len(), 3);
        assert_eq!(h.log.disconnects(), 1);
    }

    #[tokio::test]
    async fn zero_stop_win_stops_before_first_trade() {
        let mut cfg = config("CALL");
        cfg.stop_win = dec!(0);
        let h = harness(cfg, ScriptedBroker::new([ScriptedTrade::win(dec!(0.8))]));

        let reason = h.trading_loop.run().await;
        assert_eq!(reason, StopReason::StopWin);
        assert!(h.log.orders().is_empty());
        assert_eq!(h.log.disconnects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_placement_is_an_error_cycle() {
        let h = harness(
            config("CALL\nPUT"),
            ScriptedBroker::new([ScriptedTrade::HangPlacement, ScriptedTrade::win(dec!(0.8))]),
        );
        let reason = h.trading_loop.run().await;
        assert_eq!(reason, StopReason::SignalsExhausted);

        let snapshot = h.snapshot_rx.borrow().clone();
        assert_eq!(snapshot.history.len(), 2);
        assert_eq!(snapshot.history[0].outcome, Outcome::Error);
        assert!(snapshot.history[0]
            .note
            .as_deref()
            .is_some_and(|note| note.contains("place_order did not answer")));
        assert_eq!(snapshot.history[1].outcome, Outcome::Win);
        assert_eq!(snapshot.history[1].stake, dec!(1));
        assert_eq!(snapshot.status.trade_count, 1);
        assert_eq!(h.log.orders().len(), 1);
    }

    #[tokio::test]
    async fn missing_asset_is_recorded_and_skipped() {
        let mut cfg = config("CALL\n2030-01-01 00:00:00,GBPUSD,PUT,1");
        cfg.asset_default = String::new();
        let policy = SchedulePolicy {
            horizon: Duration::ZERO,
            ..SchedulePolicy::default()
        };
        let book = SignalBook::parse(&cfg.signal_text, &policy, Utc::now());
        let broker = ScriptedBroker::new([ScriptedTrade::win(dec!(0.8))]);
        let log = broker.log();
        let h = harness_with_source(cfg, broker, DirectionSource::Signals(book), log);

        let reason = h.trading_loop.run().await;
        assert_eq!(reason, StopReason::SignalsExhausted);

        let history = h.snapshot_rx.borrow().history.clone();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].outcome, Outcome::Error);
        assert_eq!(history[0].asset, "");
        assert_eq!(history[0].pnl, dec!(0));
        assert_eq!(history[1].outcome, Outcome::Win);
        assert_eq!(history[1].asset, "GBPUSD");
        assert_eq!(history[1].stake, dec!(1));
        assert_eq!(h.log.orders().len(), 1);
    }

    #[tokio::test]
    async fn rejected_asset_falls_back_to_otc() {
        let h = harness(
            config("PUT"),
            ScriptedBroker::new([ScriptedTrade::win(dec!(0.9))]).with_closed_asset("EURUSD"),
        );
        h.trading_loop.run().await;

        assert_eq!(h.log.orders()[0].asset, "EURUSD-OTC");
        assert_eq!(h.snapshot_rx.borrow().history[0].asset, "EURUSD-OTC");
    }

    #[tokio::test]
    async fn rejection_without_fallback_is_an_error_cycle() {
        let mut cfg = config("PUT\nCALL");
        cfg.otc_fallback = false;
        let h = harness(
            cfg,
            ScriptedBroker::new([ScriptedTrade::loss(dec!(1))]).with_closed_asset("EURUSD"),
        );
        h.trading_loop.run().await;

        let snapshot = h.snapshot_rx.borrow().clone();
        assert_eq!(snapshot.history.len(), 2);
        assert!(snapshot.history.iter().all(|r| r.outcome == Outcome::Error));
        assert_eq!(snapshot.status.trade_count, 0);
        assert_eq!(snapshot.status.step, 0);
        assert!(snapshot.status.last_error.is_some());
    }

    #[tokio::test]
    async fn stake_is_rounded_at_point_of_use() {
        let mut cfg = config("CALL\nCALL");
        cfg.stake_base = dec!(1.005);
        cfg.martingale_multiplier = dec!(2.2);
        let h = harness(
            cfg,
            ScriptedBroker::new([ScriptedTrade::loss(dec!(1.01)), ScriptedTrade::draw()]),
        );
        h.trading_loop.run().await;
        // 1.005 -> 1.01, 1.005 * 2.2 = 2.211 -> 2.21
        assert_eq!(h.log.stakes(), vec![dec!(1.01), dec!(2.21)]);
    }

    #[tokio::test]
    async fn indicator_mode_trades_until_boundary() {
        let mut cfg = config("");
        cfg.signal_mode = autotrade_core::SignalMode::Trend;
        cfg.stop_win = dec!(1.5);
        let closes: Vec<Decimal> = (0..30).map(|i| Decimal::from(100 + i)).collect();
        let broker = ScriptedBroker::new([
            ScriptedTrade::win(dec!(0.8)),
            ScriptedTrade::win(dec!(0.8)),
            ScriptedTrade::win(dec!(0.8)),
        ])
        .with_closes(closes);
        let log = broker.log();
        let h = harness_with_source(
            cfg,
            broker,
            DirectionSource::Indicator(Box::new(TrendStrategy::default())),
            log,
        );

        let reason = h.trading_loop.run().await;
        assert_eq!(reason, StopReason::StopWin);
        assert_eq!(h.log.orders().len(), 2);
        assert!(h.log.orders().iter().all(|o| o.direction == Direction::Call));
        assert_eq!(h.snapshot_rx.borrow().status.pending_signals, None);
    }

    #[tokio::test]
    async fn stop_request_ends_idle_wait() {
        let policy = SchedulePolicy::default();
        let at = (Utc::now() + chrono::Duration::minutes(30)).format("%Y-%m-%d %H:%M:%S");
        let cfg = config(&format!("{at},EURUSD,CALL,1"));
        let book = SignalBook::parse(&cfg.signal_text, &policy, Utc::now());
        let broker = ScriptedBroker::empty();
        let log = broker.log();
        let h = harness_with_source(cfg, broker, DirectionSource::Signals(book), log);

        let task = tokio::spawn(h.trading_loop.run());
        tokio::time::sleep(Duration::from_millis(30)).await;
        h.stop_tx.send_replace(true);

        let reason = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason, StopReason::UserRequested);
        assert!(h.log.orders().is_empty());
        assert_eq!(h.snapshot_rx.borrow().status.pending_signals, Some(1));
    }
}
