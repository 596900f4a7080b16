//! Indicator-driven direction strategies used when no manual signals are given.
//!
//! Each strategy looks at a window of recent closes (oldest first) and either
//! picks a direction or abstains.

use crate::config::SignalMode;
use crate::events::Direction;
use rust_decimal::Decimal;

pub trait IndicatorStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Closes needed before the strategy will decide.
    fn min_closes(&self) -> usize;

    /// Direction for the next trade, or `None` to sit this cycle out.
    fn decide(&self, closes: &[Decimal]) -> Option<Direction>;
}

/// Builds the strategy for an indicator signal mode; `None` for manual mode.
#[must_use]
pub fn strategy_for(mode: SignalMode) -> Option<Box<dyn IndicatorStrategy>> {
    match mode {
        SignalMode::Manual => None,
        SignalMode::Trend => Some(Box::new(TrendStrategy::default())),
        SignalMode::Rsi => Some(Box::new(RsiStrategy::default())),
    }
}

/// Mean of the last `period` values.
#[must_use]
pub fn sma(values: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    let sum: Decimal = window.iter().copied().sum();
    Some(sum / Decimal::from(period))
}

/// Wilder RSI of the whole series, reported for its last value.
///
/// A flat series reads 50; no losses reads 100, no gains reads 0.
#[must_use]
pub fn rsi(values: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || values.len() < period + 1 {
        return None;
    }

    let changes: Vec<Decimal> = values.windows(2).map(|w| w[1] - w[0]).collect();
    let n = Decimal::from(period);

    let (mut avg_gain, mut avg_loss) = changes[..period]
        .iter()
        .fold((Decimal::ZERO, Decimal::ZERO), |(g, l), ch| split(g, l, *ch));
    avg_gain /= n;
    avg_loss /= n;

    for ch in &changes[period..] {
        let (gain, loss) = split(Decimal::ZERO, Decimal::ZERO, *ch);
        avg_gain = (avg_gain * (n - Decimal::ONE) + gain) / n;
        avg_loss = (avg_loss * (n - Decimal::ONE) + loss) / n;
    }

    let hundred = Decimal::ONE_HUNDRED;
    Some(if avg_gain.is_zero() && avg_loss.is_zero() {
        Decimal::from(50)
    } else if avg_loss.is_zero() {
        hundred
    } else {
        hundred - hundred / (Decimal::ONE + avg_gain / avg_loss)
    })
}

fn split(gain: Decimal, loss: Decimal, change: Decimal) -> (Decimal, Decimal) {
    if change > Decimal::ZERO {
        (gain + change, loss)
    } else {
        (gain, loss - change)
    }
}

/// Fast/slow simple moving average trend follower.
#[derive(Debug, Clone)]
pub struct TrendStrategy {
    fast: usize,
    slow: usize,
}

impl Default for TrendStrategy {
    fn default() -> Self {
        Self { fast: 5, slow: 20 }
    }
}

impl TrendStrategy {
    #[must_use]
    pub const fn new(fast: usize, slow: usize) -> Self {
        Self { fast, slow }
    }
}

impl IndicatorStrategy for TrendStrategy {
    fn name(&self) -> &str {
        "trend"
    }

    fn min_closes(&self) -> usize {
        self.fast.max(self.slow)
    }

    fn decide(&self, closes: &[Decimal]) -> Option<Direction> {
        let fast = sma(closes, self.fast)?;
        let slow = sma(closes, self.slow)?;
        match fast.cmp(&slow) {
            std::cmp::Ordering::Greater => Some(Direction::Call),
            std::cmp::Ordering::Less => Some(Direction::Put),
            std::cmp::Ordering::Equal => None,
        }
    }
}

/// RSI mean reversion: buy oversold, sell overbought.
#[derive(Debug, Clone)]
pub struct RsiStrategy {
    period: usize,
    oversold: Decimal,
    overbought: Decimal,
}

impl Default for RsiStrategy {
    fn default() -> Self {
        Self {
            period: 14,
            oversold: Decimal::from(30),
            overbought: Decimal::from(70),
        }
    }
}

impl RsiStrategy {
    #[must_use]
    pub const fn new(period: usize, oversold: Decimal, overbought: Decimal) -> Self {
        Self {
            period,
            oversold,
            overbought,
        }
    }
}

impl IndicatorStrategy for RsiStrategy {
    fn name(&self) -> &str {
        "rsi"
    }

    fn min_closes(&self) -> usize {
        self.period + 1
    }

    fn decide(&self, closes: &[Decimal]) -> Option<Direction> {
        let value = rsi(closes, self.period)?;
        if value < self.oversold {
            Some(Direction::Call)
        } else if value > self.overbought {
            Some(Direction::Put)
        } else {
            None
        }
    }
}
