use crate::commands::{BotState, BotStatus, SessionSnapshot};
use crate::events::BotEvent;
use autotrade_core::TradeRecord;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

/// Cloneable reference to one account's trading session.
#[derive(Clone)]
pub struct BotHandle {
    session_id: Uuid,
    account_id: String,
    stop_tx: Arc<watch::Sender<bool>>,
    snapshot_rx: watch::Receiver<SessionSnapshot>,
    event_tx: broadcast::Sender<BotEvent>,
}

impl std::fmt::Debug for BotHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotHandle")
            .field("session_id", &self.session_id)
            .field("account_id", &self.account_id)
            .finish_non_exhaustive()
    }
}

impl BotHandle {
    #[must_use]
    pub fn new(
        session_id: Uuid,
        account_id: &str,
        stop_tx: watch::Sender<bool>,
        snapshot_rx: watch::Receiver<SessionSnapshot>,
        event_tx: broadcast::Sender<BotEvent>,
    ) -> Self {
        Self {
            session_id,
            account_id: account_id.to_string(),
            stop_tx: Arc::new(stop_tx),
            snapshot_rx,
            event_tx,
        }
    }

    #[must_use]
    pub const fn session_id(&self) -> Uuid {
        self.session_id
    }

    #[must_use]
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Asks the loop to stop at its next cycle boundary.
    ///
    /// # Returns
    /// `true` if this call raised the stop request, `false` if it was already raised.
    pub fn stop(&self) -> bool {
        !self.stop_tx.send_replace(true)
    }

    #[must_use]
    pub fn status(&self) -> BotStatus {
        self.with_stop_request(self.snapshot_rx.borrow().status.clone())
    }

    #[must_use]
    pub fn history(&self) -> Vec<TradeRecord> {
        self.snapshot_rx.borrow().history.clone()
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        let mut snapshot = self.snapshot_rx.borrow().clone();
        snapshot.status = self.with_stop_request(snapshot.status);
        snapshot
    }

    /// Reflects a raised stop flag the loop has not published yet: a running
    /// session reads as `Stopping` while its last cycle settles.
    fn with_stop_request(&self, mut status: BotStatus) -> BotStatus {
        if *self.stop_tx.borrow() && !status.is_stopped() {
            status.stop_requested = true;
            if status.state == BotState::Running {
                status.state = BotState::Stopping;
            }
        }
        status
    }

    /// Returns true until the loop has reached `Stopped`.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.snapshot_rx.borrow().status.state != BotState::Stopped
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BotEvent> {
        self.event_tx.subscribe()
    }

    /// Waits until the loop has left `Connecting` and returns the status it
    /// published, including the opening balance.
    pub async fn wait_started(&self) -> BotStatus {
        let mut rx = self.snapshot_rx.clone();
        let reached = rx
            .wait_for(|snapshot| {
                !matches!(snapshot.status.state, BotState::Idle | BotState::Connecting)
            })
            .await
            .map(|snapshot| snapshot.status.clone());
        let status = reached.unwrap_or_else(|_| rx.borrow().status.clone());
        self.with_stop_request(status)
    }

    /// Waits until the loop has fully stopped and returns its final status.
    ///
    /// If the loop went away without reaching `Stopped`, returns the last
    /// status it published.
    pub async fn wait_stopped(&self) -> BotStatus {
        let mut rx = self.snapshot_rx.clone();
        let reached = rx
            .wait_for(|snapshot| snapshot.status.state == BotState::Stopped)
            .await
            .map(|snapshot| snapshot.status.clone());
        reached.unwrap_or_else(|_| rx.borrow().status.clone())
    }
}
