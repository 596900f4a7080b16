//! Broker clients that never touch a real broker.
//!
//! - [`PaperBroker`]: randomized simulation with a virtual balance
//! - [`ScriptedBroker`]: plays back a fixed sequence of trade results

pub mod paper;
pub mod scripted;

pub use paper::{PaperBroker, PaperBrokerFactory};
pub use scripted::{ScriptLog, ScriptedBroker, ScriptedBrokerFactory, ScriptedTrade};
