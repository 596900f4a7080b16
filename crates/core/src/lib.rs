pub mod config;
pub mod config_loader;
pub mod error;
pub mod events;
pub mod indicator;
pub mod metrics_formatter;
pub mod signal;
pub mod stake;
pub mod traits;

pub use config::{AccountMode, AppConfig, Credentials, EngineConfig, PaperConfig, SignalMode, TradingConfig};
pub use config_loader::ConfigLoader;
pub use error::{BrokerError, ConfigError, CycleError};
pub use events::{Direction, Outcome, SessionTotals, TradeRecord};
pub use indicator::{strategy_for, IndicatorStrategy, RsiStrategy, TrendStrategy};
pub use metrics_formatter::{SessionSummary, SummaryFormatter};
pub use signal::{SchedulePolicy, Signal, SignalBook, SignalParseError, SignalTiming};
pub use stake::{round_to_increment, StakeDecision, StakePolicy, StakeState};
pub use traits::{BrokerClient, BrokerFactory, OrderId, OrderRequest};
