use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Direction of a binary option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Price expected to finish above the strike
    Call,
    /// Price expected to finish below the strike
    Put,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Call => f.pad("CALL"),
            Self::Put => f.pad("PUT"),
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim();
        if token.eq_ignore_ascii_case("call") {
            Ok(Self::Call)
        } else if token.eq_ignore_ascii_case("put") {
            Ok(Self::Put)
        } else {
            Err(format!("direction must be CALL or PUT, got {token:?}"))
        }
    }
}

/// Classified result of one trade cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Win,
    Loss,
    /// Stake refunded
    Draw,
    /// No position settled (placement failed, timed out, or no asset)
    Error,
}

impl Outcome {
    /// Classifies a broker's signed settlement amount.
    ///
    /// Positive is a win, exactly zero a draw, negative a loss. This is the
    /// only place the sign of a raw settlement value is inspected.
    #[must_use]
    pub fn from_settlement(result: Decimal) -> Self {
        if result > Decimal::ZERO {
            Self::Win
        } else if result.is_zero() {
            Self::Draw
        } else {
            Self::Loss
        }
    }

    /// Signed profit of a settled trade: the payout on a win, minus the stake on a loss.
    #[must_use]
    pub fn pnl(self, settlement: Decimal, stake: Decimal) -> Decimal {
        match self {
            Self::Win => settlement,
            Self::Loss => -stake,
            Self::Draw | Self::Error => Decimal::ZERO,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Win => "WIN",
            Self::Loss => "LOSS",
            Self::Draw => "DRAW",
            Self::Error => "ERROR",
        };
        f.write_str(label)
    }
}

/// Append-only audit entry, one per completed cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub timestamp: DateTime<Utc>,
    /// Asset the order opened on (empty if none could be resolved)
    pub asset: String,
    pub direction: Direction,
    pub stake: Decimal,
    pub outcome: Outcome,
    pub pnl: Decimal,
    /// Martingale step the stake was sized at
    pub step_at_time: u32,
    #[serde(default)]
    pub order_id: Option<String>,
    /// Failure reason for `ERROR` cycles
    #[serde(default)]
    pub note: Option<String>,
}

/// Running aggregate used to evaluate stop boundaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTotals {
    /// Sum of every record's `pnl`
    pub profit_total: Decimal,
    /// Settled trades (`ERROR` cycles excluded)
    pub trade_count: u32,
}

impl SessionTotals {
    /// Folds one record into the totals.
    pub fn apply(&mut self, record: &TradeRecord) {
        self.profit_total += record.pnl;
        if record.outcome != Outcome::Error {
            self.trade_count += 1;
        }
    }

    /// Recomputes totals from a trade history.
    #[must_use]
    pub fn from_records(records: &[TradeRecord]) -> Self {
        let mut totals = Self::default();
        for record in records {
            totals.apply(record);
        }
        totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn record(outcome: Outcome, pnl: Decimal) -> TradeRecord {
        TradeRecord {
            timestamp: Utc::now(),
            asset: "EURUSD".to_string(),
            direction: Direction::Call,
            stake: dec!(1),
            outcome,
            pnl,
            step_at_time: 0,
            order_id: None,
            note: None,
        }
    }

    #[test]
    fn direction_parses_case_insensitively() {
        assert_eq!("call".parse::<Direction>(), Ok(Direction::Call));
        assert_eq!(" Put ".parse::<Direction>(), Ok(Direction::Put));
        assert!("BUY".parse::<Direction>().is_err());
    }

    #[test]
    fn direction_display_pads() {
        assert_eq!(Direction::Put.to_string(), "PUT");
        assert_eq!(format!("{:<4}|", Direction::Put), "PUT |");
    }

    #[test]
    fn settlement_sign_classifies_outcome() {
        assert_eq!(Outcome::from_settlement(dec!(0.85)), Outcome::Win);
        assert_eq!(Outcome::from_settlement(dec!(0)), Outcome::Draw);
        assert_eq!(Outcome::from_settlement(dec!(0.00)), Outcome::Draw);
        assert_eq!(Outcome::from_settlement(dec!(-1)), Outcome::Loss);
    }

    #[test]
    fn pnl_uses_payout_on_win_and_stake_on_loss() {
        assert_eq!(Outcome::Win.pnl(dec!(1.7), dec!(2)), dec!(1.7));
        assert_eq!(Outcome::Loss.pnl(dec!(-5), dec!(2)), dec!(-2));
        assert_eq!(Outcome::Draw.pnl(dec!(0), dec!(2)), dec!(0));
        assert_eq!(Outcome::Error.pnl(dec!(3), dec!(2)), dec!(0));
    }

    #[test]
    fn totals_sum_pnl_and_skip_errors_in_count() {
        let records = vec![
            record(Outcome::Loss, dec!(-1)),
            record(Outcome::Error, dec!(0)),
            record(Outcome::Win, dec!(1.6)),
            record(Outcome::Draw, dec!(0)),
        ];
        let totals = SessionTotals::from_records(&records);
        assert_eq!(totals.profit_total, dec!(0.6));
        assert_eq!(totals.trade_count, 3);
    }
}
