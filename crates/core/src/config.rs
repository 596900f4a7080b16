use crate::error::ConfigError;
use crate::stake::StakePolicy;
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

/// Broker balance the session trades against.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum AccountMode {
    /// Practice balance (no real money)
    #[default]
    Demo,
    /// Real-money balance
    Real,
}

/// Where trade directions come from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SignalMode {
    /// Pre-timed directives parsed from `signal_text`
    #[default]
    Manual,
    /// Fast/slow moving-average trend of recent closes
    Trend,
    /// RSI overbought/oversold reversal
    Rsi,
}

/// Per-session trading configuration.
///
/// Built from user-submitted settings and never mutated once a trading loop
/// has started; changing it means stopping and starting a new session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Baseline stake for step 0
    pub stake_base: Decimal,
    /// Session ends once profit reaches this amount
    #[serde(default = "default_stop_threshold")]
    pub stop_win: Decimal,
    /// Session ends once loss reaches this amount
    #[serde(default = "default_stop_threshold")]
    pub stop_loss: Decimal,
    #[serde(default)]
    pub martingale_steps: u32,
    #[serde(default = "default_multiplier")]
    pub martingale_multiplier: Decimal,
    /// Hard ceiling on consecutive losses, 0 = unlimited
    #[serde(default)]
    pub max_consecutive_losses: u32,
    #[serde(default)]
    pub asset_default: String,
    #[serde(default = "default_expiry_minutes")]
    pub expiry_minutes: u32,
    #[serde(default)]
    pub signal_text: String,

    #[serde(default)]
    pub account_mode: AccountMode,
    #[serde(default)]
    pub signal_mode: SignalMode,
    /// Timezone of scheduled-signal timestamps, in whole hours east of UTC
    #[serde(default)]
    pub utc_offset_hours: i32,
    /// Smallest tradable stake increment
    #[serde(default = "default_stake_increment")]
    pub stake_increment: Decimal,
    /// Retry a rejected asset once as `<ASSET>-OTC`
    #[serde(default = "default_otc_fallback")]
    pub otc_fallback: bool,
}

fn default_stop_threshold() -> Decimal {
    Decimal::TEN
}

fn default_multiplier() -> Decimal {
    Decimal::TWO
}

const fn default_expiry_minutes() -> u32 {
    1
}

fn default_stake_increment() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

const fn default_otc_fallback() -> bool {
    true
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            stake_base: Decimal::ONE,
            stop_win: default_stop_threshold(),
            stop_loss: default_stop_threshold(),
            martingale_steps: 3,
            martingale_multiplier: default_multiplier(),
            max_consecutive_losses: 0,
            asset_default: String::new(),
            expiry_minutes: default_expiry_minutes(),
            signal_text: String::new(),
            account_mode: AccountMode::Demo,
            signal_mode: SignalMode::Manual,
            utc_offset_hours: 0,
            stake_increment: default_stake_increment(),
            otc_fallback: default_otc_fallback(),
        }
    }
}

impl TradingConfig {
    /// Checks every field against its allowed range.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidField` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stake_base <= Decimal::ZERO {
            return Err(ConfigError::invalid("stake_base", "must be greater than zero"));
        }
        if self.stop_win < Decimal::ZERO {
            return Err(ConfigError::invalid("stop_win", "must not be negative"));
        }
        if self.stop_loss < Decimal::ZERO {
            return Err(ConfigError::invalid("stop_loss", "must not be negative"));
        }
        if self.martingale_multiplier <= Decimal::ZERO {
            return Err(ConfigError::invalid(
                "martingale_multiplier",
                "must be greater than zero",
            ));
        }
        if self.expiry_minutes == 0 {
            return Err(ConfigError::invalid("expiry_minutes", "must be at least 1"));
        }
        if self.stake_increment <= Decimal::ZERO {
            return Err(ConfigError::invalid("stake_increment", "must be greater than zero"));
        }
        let peak = StakePolicy::from_config(self)
            .peak_stake()
            .and_then(|peak| peak.checked_div(self.stake_increment));
        if peak.is_none() {
            return Err(ConfigError::invalid(
                "martingale_steps",
                "stake at the last martingale step is too large",
            ));
        }
        if !(-12..=14).contains(&self.utc_offset_hours) {
            return Err(ConfigError::invalid(
                "utc_offset_hours",
                "must be between -12 and 14",
            ));
        }
        if self.signal_mode != SignalMode::Manual && self.asset_default.trim().is_empty() {
            return Err(ConfigError::invalid(
                "asset_default",
                "indicator signal modes need a default asset",
            ));
        }
        Ok(())
    }

    /// Default asset, or `None` when the user left it blank.
    #[must_use]
    pub fn default_asset(&self) -> Option<&str> {
        let asset = self.asset_default.trim();
        (!asset.is_empty()).then_some(asset)
    }
}

/// Timing knobs of the trading loop, shared by every session of a registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Re-poll interval while no signal is due
    #[serde(with = "duration_secs", default = "default_idle_poll")]
    pub idle_poll: Duration,
    /// Wait after a failed cycle before the next one
    #[serde(with = "duration_secs", default = "default_failure_backoff")]
    pub failure_backoff: Duration,
    /// Extra time granted past expiry for the broker to report settlement
    #[serde(with = "duration_secs", default = "default_settlement_margin")]
    pub settlement_margin: Duration,
    /// Absolute cap on any settlement wait
    #[serde(with = "duration_secs", default = "default_settlement_ceiling")]
    pub settlement_ceiling: Duration,
    /// Limit on every other broker call (connect, place, balance, closes, disconnect)
    #[serde(with = "duration_secs", default = "default_broker_timeout")]
    pub broker_timeout: Duration,
    /// Scheduled signals older than this fire immediately and are logged as stale
    #[serde(with = "duration_secs", default = "default_stale_grace")]
    pub stale_grace: Duration,
    /// Scheduled signals further out than this are treated as immediate
    #[serde(with = "duration_secs", default = "default_schedule_horizon")]
    pub schedule_horizon: Duration,
    /// Number of closes fed to indicator strategies
    #[serde(default = "default_indicator_lookback")]
    pub indicator_lookback: usize,
}

const fn default_idle_poll() -> Duration {
    Duration::from_secs(10)
}

const fn default_failure_backoff() -> Duration {
    Duration::from_secs(10)
}

const fn default_settlement_margin() -> Duration {
    Duration::from_secs(5)
}

const fn default_settlement_ceiling() -> Duration {
    Duration::from_secs(4 * 60 * 60)
}

const fn default_broker_timeout() -> Duration {
    Duration::from_secs(30)
}

const fn default_stale_grace() -> Duration {
    Duration::from_secs(60)
}

const fn default_schedule_horizon() -> Duration {
    Duration::from_secs(2 * 60 * 60)
}

const fn default_indicator_lookback() -> usize {
    30
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            idle_poll: default_idle_poll(),
            failure_backoff: default_failure_backoff(),
            settlement_margin: default_settlement_margin(),
            settlement_ceiling: default_settlement_ceiling(),
            broker_timeout: default_broker_timeout(),
            stale_grace: default_stale_grace(),
            schedule_horizon: default_schedule_horizon(),
            indicator_lookback: default_indicator_lookback(),
        }
    }
}

impl EngineConfig {
    /// How long to wait for a trade expiring in `expiry_minutes` to settle.
    ///
    /// Expiry plus the safety margin, never more than the hard ceiling.
    #[must_use]
    pub fn settlement_wait(&self, expiry_minutes: u32) -> Duration {
        let expiry = Duration::from_secs(u64::from(expiry_minutes) * 60);
        (expiry + self.settlement_margin).min(self.settlement_ceiling)
    }
}

/// Simulation parameters for the paper broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperConfig {
    pub initial_balance: Decimal,
    /// Profit paid on a winning stake, as a fraction of the stake
    pub payout_ratio: Decimal,
    pub win_probability: f64,
    pub draw_probability: f64,
    pub reject_probability: f64,
    /// Real time the simulated broker takes to settle, regardless of expiry
    #[serde(with = "duration_secs")]
    pub settlement_delay: Duration,
    pub random_seed: Option<u64>,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            initial_balance: Decimal::from(10_000),
            payout_ratio: Decimal::new(80, 2),
            win_probability: 0.5,
            draw_probability: 0.03,
            reject_probability: 0.0,
            settlement_delay: Duration::from_secs(2),
            random_seed: None,
        }
    }
}

/// Broker login. The password never appears in `Debug` output.
#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub email: String,
    #[serde(deserialize_with = "deserialize_secret")]
    pub password: SecretString,
}

impl Credentials {
    #[must_use]
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: SecretString::from(password.into()),
        }
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::new("demo@localhost", "")
    }
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(SecretString::from)
}

/// Top-level application configuration.
#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub paper: PaperConfig,
    #[serde(default)]
    pub session: TradingConfig,
    #[serde(default)]
    pub credentials: Credentials,
}

// Durations are written as whole seconds in config files.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
