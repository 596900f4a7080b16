#![allow(clippy::format_push_string)]

use crate::events::{Outcome, TradeRecord};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Per-session statistics derived from trade history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
    pub errors: u32,
    pub profit: Decimal,
    pub total_staked: Decimal,
    pub first_trade: Option<DateTime<Utc>>,
    pub last_trade: Option<DateTime<Utc>>,
}

impl SessionSummary {
    #[must_use]
    pub fn from_records(records: &[TradeRecord]) -> Self {
        let mut summary = Self::default();
        for record in records {
            match record.outcome {
                Outcome::Win => summary.wins += 1,
                Outcome::Loss => summary.losses += 1,
                Outcome::Draw => summary.draws += 1,
                Outcome::Error => summary.errors += 1,
            }
            if record.outcome != Outcome::Error {
                summary.total_staked += record.stake;
            }
            summary.profit += record.pnl;
            summary.first_trade.get_or_insert(record.timestamp);
            summary.last_trade = Some(record.timestamp);
        }
        summary
    }

    /// Trades that reached settlement.
    #[must_use]
    pub const fn settled(&self) -> u32 {
        self.wins + self.losses + self.draws
    }

    /// Wins over decided (win or loss) trades, in percent. `None` before the
    /// first decided trade.
    #[must_use]
    pub fn win_rate(&self) -> Option<Decimal> {
        let decided = self.wins + self.losses;
        if decided == 0 {
            return None;
        }
        Some((Decimal::from(self.wins) * Decimal::ONE_HUNDRED / Decimal::from(decided)).round_dp(2))
    }
}

pub struct SummaryFormatter;

impl SummaryFormatter {
    #[must_use]
    pub fn format(account_id: &str, summary: &SessionSummary) -> String {
        let mut output = String::new();

        output.push('\n');
        output.push_str("═══════════════════════════════════════════════════════════════\n");
        output.push_str("                    TRADING SUMMARY                            \n");
        output.push_str("═══════════════════════════════════════════════════════════════\n");
        output.push_str(&format!("Account:               {account_id}\n"));

        if let (Some(first), Some(last)) = (summary.first_trade, summary.last_trade) {
            output.push_str(&format!(
                "First Trade:           {}\n",
                first.format("%Y-%m-%d %H:%M:%S UTC")
            ));
            output.push_str(&format!(
                "Last Trade:            {}\n",
                last.format("%Y-%m-%d %H:%M:%S UTC")
            ));
        }
        output.push('\n');

        output.push_str("Trades\n");
        output.push_str("───────────────────────────────────────────────────────────────\n");
        output.push_str(&format!("Settled:               {}\n", summary.settled()));
        output.push_str(&format!("Wins:                  {}\n", summary.wins));
        output.push_str(&format!("Losses:                {}\n", summary.losses));
        output.push_str(&format!("Draws:                 {}\n", summary.draws));
        output.push_str(&format!("Failed Cycles:         {}\n", summary.errors));
        match summary.win_rate() {
            Some(rate) => output.push_str(&format!("Win Rate:              {rate:.2}%\n")),
            None => output.push_str("Win Rate:              N/A (no decided trades)\n"),
        }
        output.push('\n');

        output.push_str("Money\n");
        output.push_str("───────────────────────────────────────────────────────────────\n");
        output.push_str(&format!("Total Staked:          ${:.2}\n", summary.total_staked));
        output.push_str(&format!("Profit:                ${:.2}\n", summary.profit));
        output.push_str("═══════════════════════════════════════════════════════════════\n");

        if summary.settled() == 0 {
            output.push_str("\n⚠️  No trades settled during this session.\n\n");
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Direction;
    use rust_decimal_macros::dec;

    fn record(outcome: Outcome, stake: Decimal, pnl: Decimal) -> TradeRecord {
        TradeRecord {
            timestamp: Utc::now(),
            asset: "EURUSD".to_string(),
            direction: Direction::Put,
            stake,
            outcome,
            pnl,
            step_at_time: 0,
            order_id: None,
            note: None,
        }
    }

    #[test]
    fn summary_counts_each_outcome() {
        let records = vec![
            record(Outcome::Loss, dec!(1), dec!(-1)),
            record(Outcome::Loss, dec!(2), dec!(-2)),
            record(Outcome::Win, dec!(4), dec!(3.2)),
            record(Outcome::Draw, dec!(1), dec!(0)),
            record(Outcome::Error, dec!(1), dec!(0)),
        ];
        let summary = SessionSummary::from_records(&records);
        assert_eq!(summary.wins, 1);
        assert_eq!(summary.losses, 2);
        assert_eq!(summary.draws, 1);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.settled(), 4);
        assert_eq!(summary.profit, dec!(0.2));
        assert_eq!(summary.total_staked, dec!(8));
        assert_eq!(summary.win_rate(), Some(dec!(33.33)));
    }

    #[test]
    fn win_rate_undefined_without_decided_trades() {
        let summary = SessionSummary::from_records(&[record(Outcome::Draw, dec!(1), dec!(0))]);
        assert_eq!(summary.win_rate(), None);
    }

    #[test]
    fn formatter_renders_totals() {
        let summary =
            SessionSummary::from_records(&[record(Outcome::Win, dec!(1), dec!(0.8))]);
        let text = SummaryFormatter::format("alice", &summary);
        assert!(text.contains("Account:               alice"));
        assert!(text.contains("Win Rate:              100.00%"));
        assert!(text.contains("Profit:                $0.80"));
    }

    #[test]
    fn formatter_flags_empty_session() {
        let text = SummaryFormatter::format("bob", &SessionSummary::default());
        assert!(text.contains("N/A"));
        assert!(text.contains("No trades settled"));
    }
}
