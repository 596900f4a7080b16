use crate::bot_handle::BotHandle;
use crate::commands::{BotState, BotStatus, SessionSnapshot, StopReason};
use crate::events::BotEvent;
use crate::trading_loop::{
    disconnect, within, DirectionSource, SessionChannels, SharedBroker, TradingLoop,
};
use autotrade_core::{
    round_to_increment, strategy_for, BrokerError, BrokerFactory, ConfigError, Credentials,
    EngineConfig, SchedulePolicy, SignalBook, TradeRecord, TradingConfig,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, watch, Mutex, OwnedMutexGuard, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

const EVENT_CAPACITY: usize = 256;

/// One account's entry. `None` once no session is attached.
type Slot = Arc<Mutex<Option<BotHandle>>>;
type Slots = RwLock<HashMap<String, Slot>>;

/// What the supervisor needs to close out a session whose loop died.
struct Supervised {
    account_id: String,
    session_id: Uuid,
    slot: Slot,
    broker: SharedBroker,
    snapshot_tx: Arc<watch::Sender<SessionSnapshot>>,
    event_tx: broadcast::Sender<BotEvent>,
}

/// Why `start` was refused.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("could not connect account {account_id}: {source}")]
    Connect {
        account_id: String,
        #[source]
        source: BrokerError,
    },

    #[error("account {0} already has a running bot")]
    ConcurrencyViolation(String),
}

impl RegistryError {
    /// Stable machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_error",
            Self::Connect { .. } => "connect_error",
            Self::ConcurrencyViolation(_) => "concurrency_violation",
        }
    }

    /// `code: message`, for callers that surface the failure to a user.
    #[must_use]
    pub fn reason(&self) -> String {
        format!("{}: {self}", self.code())
    }
}

/// Result of a `stop` call. Every variant is a success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// A live session was asked to stop
    Stopping,
    /// The session had already been asked to stop, or has stopped
    AlreadyStopped,
    /// No session for this account
    NotFound,
}

/// Process-wide table of trading sessions, at most one per account.
///
/// Created at application start and torn down with [`BotRegistry::shutdown_all`].
/// Calls for the same account are serialized; calls for different accounts
/// run concurrently.
pub struct BotRegistry {
    slots: Arc<Slots>,
    factory: Arc<dyn BrokerFactory>,
    engine: EngineConfig,
}

impl BotRegistry {
    #[must_use]
    pub fn new(factory: Arc<dyn BrokerFactory>, engine: EngineConfig) -> Self {
        Self {
            slots: Arc::new(RwLock::new(HashMap::new())),
            factory,
            engine,
        }
    }

    /// Connects a broker session for `account_id` and starts its trading loop.
    ///
    /// # Errors
    /// - `Config` if the configuration is invalid or manual mode has no usable signal
    /// - `ConcurrencyViolation` if the account already has a live session
    /// - `Connect` if the broker refuses the login or does not answer within
    ///   `broker_timeout`; nothing is left running
    pub async fn start(
        &self,
        account_id: &str,
        credentials: &Credentials,
        config: TradingConfig,
    ) -> Result<BotHandle, RegistryError> {
        config.validate()?;
        let source = self.direction_source(&config)?;

        let (slot, mut guard) = self.lock_slot(account_id).await;

        if guard.as_ref().is_some_and(BotHandle::is_live) {
            tracing::warn!(account = account_id, "Rejected start: session already running");
            return Err(RegistryError::ConcurrencyViolation(account_id.to_string()));
        }

        let session_id = Uuid::new_v4();

        let mut status = BotStatus::new(
            account_id,
            session_id,
            config.account_mode,
            config.signal_mode,
            round_to_increment(config.stake_base, config.stake_increment),
        );
        status.state = BotState::Connecting;
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::new(status));

        tracing::info!(account = account_id, session = %session_id, mode = ?config.account_mode, "Connecting to broker");
        let mut broker = self.factory.create(account_id);
        let login = broker.connect(credentials, config.account_mode);
        if let Err(source) = within(self.engine.broker_timeout, "connect", login).await {
            tracing::warn!(account = account_id, error = %source, "Broker connect failed");
            if guard.is_none() {
                Self::forget(&self.slots, account_id, &slot).await;
            }
            return Err(RegistryError::Connect {
                account_id: account_id.to_string(),
                source,
            });
        }

        let broker: SharedBroker = Arc::new(Mutex::new(broker));
        let snapshot_tx = Arc::new(snapshot_tx);
        let (stop_tx, stop_rx) = watch::channel(false);
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);

        let trading_loop = TradingLoop::new(
            account_id,
            session_id,
            config,
            self.engine.clone(),
            Arc::clone(&broker),
            source,
            SessionChannels {
                stop_rx,
                snapshot_tx: Arc::clone(&snapshot_tx),
                event_tx: event_tx.clone(),
            },
        );
        let task = tokio::spawn(trading_loop.run());

        let handle =
            BotHandle::new(session_id, account_id, stop_tx, snapshot_rx, event_tx.clone());
        *guard = Some(handle.clone());
        drop(guard);

        self.supervise(
            Supervised {
                account_id: account_id.to_string(),
                session_id,
                slot,
                broker,
                snapshot_tx,
                event_tx,
            },
            task,
        );
        Ok(handle)
    }

    /// Requests a cooperative stop. Idempotent; never fails.
    pub async fn stop(&self, account_id: &str) -> StopOutcome {
        let Some(slot) = self.existing_slot(account_id).await else {
            return StopOutcome::NotFound;
        };
        let guard = slot.lock().await;
        match guard.as_ref() {
            None => StopOutcome::NotFound,
            Some(handle) if !handle.is_live() => StopOutcome::AlreadyStopped,
            Some(handle) => {
                if handle.stop() {
                    tracing::info!(account = account_id, "Stop requested");
                    StopOutcome::Stopping
                } else {
                    StopOutcome::AlreadyStopped
                }
            }
        }
    }

    /// Latest status, or `None` if the account has no session.
    pub async fn status(&self, account_id: &str) -> Option<BotStatus> {
        self.handle(account_id).await.map(|handle| handle.status())
    }

    /// Trade history of the account's current or last session.
    pub async fn history(&self, account_id: &str) -> Option<Vec<TradeRecord>> {
        self.handle(account_id).await.map(|handle| handle.history())
    }

    pub async fn subscribe(&self, account_id: &str) -> Option<broadcast::Receiver<BotEvent>> {
        self.handle(account_id).await.map(|handle| handle.subscribe())
    }

    pub async fn handle(&self, account_id: &str) -> Option<BotHandle> {
        let slot = self.existing_slot(account_id).await?;
        let guard = slot.lock().await;
        guard.clone()
    }

    /// Accounts that currently have a session attached.
    pub async fn list_accounts(&self) -> Vec<String> {
        let slots: Vec<(String, Slot)> = self
            .slots
            .read()
            .await
            .iter()
            .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
            .collect();

        let mut accounts = Vec::new();
        for (account_id, slot) in slots {
            if slot.lock().await.is_some() {
                accounts.push(account_id);
            }
        }
        accounts.sort();
        accounts
    }

    /// Stops the account's session, waits for it to finish its in-flight
    /// cycle and close the broker session, then removes it.
    ///
    /// # Returns
    /// The final status, or `None` if there was no session.
    pub async fn logout(&self, account_id: &str) -> Option<BotStatus> {
        let slot = self.existing_slot(account_id).await?;
        let mut guard = slot.lock().await;
        let handle = guard.take()?;

        handle.stop();
        let status = handle.wait_stopped().await;
        Self::forget(&self.slots, account_id, &slot).await;
        drop(guard);
        tracing::info!(account = account_id, profit_total = %status.profit_total, "Account logged out");
        Some(status)
    }

    /// Stops every live session and waits for all of them to finish.
    pub async fn shutdown_all(&self) {
        let slots: Vec<Slot> = self.slots.read().await.values().cloned().collect();

        let mut handles = Vec::new();
        for slot in slots {
            if let Some(handle) = slot.lock().await.as_ref() {
                if handle.is_live() {
                    handle.stop();
                    handles.push(handle.clone());
                }
            }
        }

        tracing::info!(sessions = handles.len(), "Shutting down all sessions");
        for handle in handles {
            handle.wait_stopped().await;
        }
    }

    fn direction_source(&self, config: &TradingConfig) -> Result<DirectionSource, ConfigError> {
        if let Some(strategy) = strategy_for(config.signal_mode) {
            return Ok(DirectionSource::Indicator(strategy));
        }

        let policy = SchedulePolicy::new(config, &self.engine);
        let book = SignalBook::parse(&config.signal_text, &policy, Utc::now());
        if book.is_empty() {
            return Err(ConfigError::NoSignals {
                rejected: book.rejected().len(),
            });
        }
        Ok(DirectionSource::Signals(book))
    }

    /// Clears the slot when a session ends without a usable broker, so the
    /// account is free even if nobody calls `stop` or `logout`.
    ///
    /// A loop that panics never reaches its own shutdown; the supervisor
    /// closes the broker session and publishes the `Stopped` status for it.
    fn supervise(&self, session: Supervised, task: JoinHandle<StopReason>) {
        let slots = Arc::clone(&self.slots);
        let broker_timeout = self.engine.broker_timeout;
        tokio::spawn(async move {
            let account_id = session.account_id.as_str();
            let release = match task.await {
                Ok(StopReason::SessionLost) => {
                    tracing::warn!(account = account_id, "Session lost, releasing handle");
                    true
                }
                Ok(reason) => {
                    tracing::debug!(account = account_id, %reason, "Trading loop finished");
                    false
                }
                Err(err) => {
                    tracing::error!(account = account_id, error = %err, "Trading loop aborted");
                    disconnect(&session.broker, broker_timeout).await;
                    Self::publish_abort(&session, &err.to_string());
                    true
                }
            };

            if release {
                let mut guard = session.slot.lock().await;
                if guard
                    .as_ref()
                    .is_some_and(|handle| handle.session_id() == session.session_id)
                {
                    *guard = None;
                    Self::forget(&slots, account_id, &session.slot).await;
                }
            }
        });
    }

    fn publish_abort(session: &Supervised, cause: &str) {
        let reason = StopReason::SessionLost;
        let mut totals = None;
        session.snapshot_tx.send_modify(|snapshot| {
            let status = &mut snapshot.status;
            status.state = BotState::Stopped;
            status.stop_reason = Some(reason);
            status.last_error = Some(format!("trading loop aborted: {cause}"));
            status.last_update = Utc::now();
            totals = Some((status.profit_total, status.trade_count));
        });
        if let Some((profit_total, trade_count)) = totals {
            let _ = session.event_tx.send(BotEvent::SessionStopped {
                reason,
                profit_total,
                trade_count,
            });
        }
    }

    /// Locks the account's slot, creating it if needed. Retries if the slot
    /// was dropped from the map while waiting for the lock.
    async fn lock_slot(&self, account_id: &str) -> (Slot, OwnedMutexGuard<Option<BotHandle>>) {
        loop {
            let slot = self.slot(account_id).await;
            let guard = Arc::clone(&slot).lock_owned().await;
            let current = self
                .slots
                .read()
                .await
                .get(account_id)
                .is_some_and(|entry| Arc::ptr_eq(entry, &slot));
            if current {
                return (slot, guard);
            }
        }
    }

    /// Drops the account's map entry if it is still `slot`. Call with the
    /// slot locked and empty.
    async fn forget(slots: &Slots, account_id: &str, slot: &Slot) {
        let mut slots = slots.write().await;
        if slots
            .get(account_id)
            .is_some_and(|entry| Arc::ptr_eq(entry, slot))
        {
            slots.remove(account_id);
        }
    }

    async fn slot(&self, account_id: &str) -> Slot {
        if let Some(slot) = self.slots.read().await.get(account_id) {
            return Arc::clone(slot);
        }
        Arc::clone(
            self.slots
                .write()
                .await
                .entry(account_id.to_string())
                .or_default(),
        )
    }

    async fn existing_slot(&self, account_id: &str) -> Option<Slot> {
        self.slots.read().await.get(account_id).cloned()
    }
}
