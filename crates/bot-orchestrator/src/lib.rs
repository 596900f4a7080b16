//! Per-account trading sessions: the trading loop that drives one broker
//! session and the registry that owns every running loop.

pub mod bot_handle;
pub mod commands;
pub mod events;
pub mod registry;
pub mod trading_loop;

pub use bot_handle::BotHandle;
pub use commands::{BotState, BotStatus, SessionSnapshot, StopReason};
pub use events::BotEvent;
pub use registry::{BotRegistry, RegistryError, StopOutcome};
pub use trading_loop::{DirectionSource, SessionChannels, TradingLoop};
