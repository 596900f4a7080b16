//! Martingale stake sizing.
//!
//! `StakePolicy` is a pure state machine: it is fed one classified outcome per
//! settled trade and answers with the stake for the next trade and whether the
//! session may continue.
//!
//! ```text
//! BASELINE (step 0) --LOSS--> STEP 1 --LOSS--> ... STEP N --LOSS--> BASELINE
//!        ^                                             |
//!        +------------------- WIN ---------------------+
//! ```
//!
//! Stakes are computed from the base stake on every transition rather than
//! from the previous stake, so repeated multiplication never compounds a
//! rounding error. Rounding to a tradable increment happens only where the
//! stake is used (see [`round_to_increment`]).

use crate::config::TradingConfig;
use crate::events::Outcome;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Mutable sizing state owned by one trading loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeState {
    pub current_stake: Decimal,
    /// 0 = baseline
    pub step: u32,
    /// Losses since the last win; survives martingale resets
    pub consecutive_losses: u32,
}

/// Answer to one `advance` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StakeDecision {
    pub next_stake: Decimal,
    /// False once the consecutive-loss ceiling is reached
    pub proceed: bool,
}

#[derive(Debug, Clone)]
pub struct StakePolicy {
    stake_base: Decimal,
    multiplier: Decimal,
    max_steps: u32,
    max_consecutive_losses: u32,
    state: StakeState,
}

impl StakePolicy {
    #[must_use]
    pub fn new(
        stake_base: Decimal,
        multiplier: Decimal,
        max_steps: u32,
        max_consecutive_losses: u32,
    ) -> Self {
        Self {
            stake_base,
            multiplier,
            max_steps,
            max_consecutive_losses,
            state: StakeState {
                current_stake: stake_base,
                step: 0,
                consecutive_losses: 0,
            },
        }
    }

    #[must_use]
    pub fn from_config(config: &TradingConfig) -> Self {
        Self::new(
            config.stake_base,
            config.martingale_multiplier,
            config.martingale_steps,
            config.max_consecutive_losses,
        )
    }

    #[must_use]
    pub const fn state(&self) -> StakeState {
        self.state
    }

    /// Unrounded stake for the next trade.
    #[must_use]
    pub const fn current_stake(&self) -> Decimal {
        self.state.current_stake
    }

    #[must_use]
    pub const fn step(&self) -> u32 {
        self.state.step
    }

    #[must_use]
    pub const fn consecutive_losses(&self) -> u32 {
        self.state.consecutive_losses
    }

    /// Returns to baseline and clears the loss counter (new session).
    pub fn reset(&mut self) {
        self.state = StakeState {
            current_stake: self.stake_base,
            step: 0,
            consecutive_losses: 0,
        };
    }

    /// Applies one settled outcome.
    ///
    /// `Error` cycles never reach the policy; passing one is a no-op that
    /// lets the session continue.
    pub fn advance(&mut self, outcome: Outcome) -> StakeDecision {
        let proceed = match outcome {
            Outcome::Win => {
                self.reset();
                true
            }
            Outcome::Draw | Outcome::Error => true,
            Outcome::Loss => {
                self.state.consecutive_losses = self.state.consecutive_losses.saturating_add(1);
                let next_step = self.state.step.saturating_add(1);
                let escalated = (self.state.step < self.max_steps)
                    .then(|| self.stake_for_step(next_step))
                    .flatten();
                if let Some(stake) = escalated {
                    self.state.step = next_step;
                    self.state.current_stake = stake;
                    true
                } else {
                    // Cycle exhausted (or the next stake is not representable):
                    // stake goes back to baseline, the loss counter keeps running.
                    self.state.step = 0;
                    self.state.current_stake = self.stake_base;
                    !self.loss_ceiling_reached()
                }
            }
        };

        StakeDecision {
            next_stake: self.state.current_stake,
            proceed,
        }
    }

    /// `stake_base * multiplier^step`, exact, or `None` if it does not fit
    /// in a `Decimal`.
    #[must_use]
    pub fn stake_for_step(&self, step: u32) -> Option<Decimal> {
        (0..step).try_fold(self.stake_base, |stake, _| stake.checked_mul(self.multiplier))
    }

    /// Stake at the last martingale step.
    #[must_use]
    pub fn peak_stake(&self) -> Option<Decimal> {
        self.stake_for_step(self.max_steps)
    }

    fn loss_ceiling_reached(&self) -> bool {
        self.max_consecutive_losses > 0
            && self.state.consecutive_losses >= self.max_consecutive_losses
    }
}

/// Rounds a stake to the nearest multiple of `increment` (half away from
/// zero), never below one increment.
#[must_use]
pub fn round_to_increment(stake: Decimal, increment: Decimal) -> Decimal {
    if increment <= Decimal::ZERO {
        return stake;
    }
    let Some(ratio) = stake.checked_div(increment) else {
        return stake;
    };
    let units = ratio
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .max(Decimal::ONE);
    units
        .checked_mul(increment)
        .map_or(stake, |d| d.normalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn policy(steps: u32, multiplier: Decimal, max_losses: u32) -> StakePolicy {
        StakePolicy::new(dec!(1), multiplier, steps, max_losses)
    }

    #[test]
    fn starts_at_baseline() {
        let p = policy(3, dec!(2), 0);
        assert_eq!(p.current_stake(), dec!(1));
        assert_eq!(p.step(), 0);
        assert_eq!(p.consecutive_losses(), 0);
    }

    #[test]
    fn losses_progress_geometrically() {
        let mut p = policy(3, dec!(2), 0);
        assert_eq!(p.advance(Outcome::Loss).next_stake, dec!(2));
        assert_eq!(p.advance(Outcome::Loss).next_stake, dec!(4));
        assert_eq!(p.advance(Outcome::Loss).next_stake, dec!(8));
        assert_eq!(p.step(), 3);
        assert_eq!(p.consecutive_losses(), 3);
    }

    #[test]
    fn win_always_returns_to_base() {
        for prior_losses in 0..=3 {
            let mut p = policy(3, dec!(2.2), 0);
            for _ in 0..prior_losses {
                p.advance(Outcome::Loss);
            }
            let decision = p.advance(Outcome::Win);
            assert_eq!(decision.next_stake, dec!(1));
            assert!(decision.proceed);
            assert_eq!(p.step(), 0);
            assert_eq!(p.consecutive_losses(), 0);
        }
    }

    #[test]
    fn draw_changes_nothing() {
        let mut p = policy(3, dec!(2), 0);
        p.advance(Outcome::Loss);
        let before = p.state();
        let decision = p.advance(Outcome::Draw);
        assert_eq!(p.state(), before);
        assert_eq!(decision.next_stake, dec!(2));
        assert!(decision.proceed);
    }

    #[test]
    fn exhaustion_resets_stake_but_not_loss_counter() {
        let mut p = policy(2, dec!(2), 0);
        p.advance(Outcome::Loss);
        p.advance(Outcome::Loss);
        let decision = p.advance(Outcome::Loss);
        assert_eq!(p.step(), 0);
        assert_eq!(decision.next_stake, dec!(1));
        assert_eq!(p.consecutive_losses(), 3);
        assert!(decision.proceed);
    }

    #[test]
    fn flat_staking_hits_loss_ceiling() {
        let mut p = policy(0, dec!(2), 2);
        let first = p.advance(Outcome::Loss);
        assert!(first.proceed);
        assert_eq!(first.next_stake, dec!(1));
        let second = p.advance(Outcome::Loss);
        assert!(!second.proceed);
        assert_eq!(second.next_stake, dec!(1));
        assert_eq!(p.step(), 0);
    }

    #[test]
    fn ceiling_only_checked_on_exhaustion() {
        let mut p = policy(3, dec!(2), 2);
        assert!(p.advance(Outcome::Loss).proceed);
        assert!(p.advance(Outcome::Loss).proceed);
        assert!(p.advance(Outcome::Loss).proceed);
        // step 3 == max: this loss exhausts the cycle with 4 >= 2 losses
        assert!(!p.advance(Outcome::Loss).proceed);
    }

    #[test]
    fn unlimited_ceiling_never_stops() {
        let mut p = policy(1, dec!(2), 0);
        for _ in 0..50 {
            assert!(p.advance(Outcome::Loss).proceed);
        }
        assert_eq!(p.consecutive_losses(), 50);
    }

    #[test]
    fn multiplier_of_one_is_flat() {
        let mut p = policy(3, dec!(1), 0);
        for _ in 0..3 {
            assert_eq!(p.advance(Outcome::Loss).next_stake, dec!(1));
        }
    }

    #[test]
    fn deep_progression_stays_exact() {
        let p = StakePolicy::new(dec!(1), dec!(2.2), 10, 0);
        // 2.2^8 = 548.75873536
        assert_eq!(p.stake_for_step(8), Some(dec!(548.75873536)));
        assert_eq!(p.stake_for_step(10), Some(dec!(2655.9922791424)));
        assert_eq!(p.peak_stake(), Some(dec!(2655.9922791424)));
    }

    #[test]
    fn unrepresentable_step_exhausts_cycle() {
        // 100^14 = 1e28 still fits, 100^15 does not
        let mut p = StakePolicy::new(dec!(1), dec!(100), 20, 0);
        assert!(p.peak_stake().is_none());
        for _ in 0..14 {
            assert!(p.advance(Outcome::Loss).proceed);
        }
        assert_eq!(p.step(), 14);

        let decision = p.advance(Outcome::Loss);
        assert!(decision.proceed);
        assert_eq!(decision.next_stake, dec!(1));
        assert_eq!(p.step(), 0);
        assert_eq!(p.consecutive_losses(), 15);
    }

    #[test]
    fn error_outcome_is_ignored() {
        let mut p = policy(3, dec!(2), 1);
        p.advance(Outcome::Loss);
        let before = p.state();
        assert!(p.advance(Outcome::Error).proceed);
        assert_eq!(p.state(), before);
    }

    #[test]
    fn rounds_to_increment_at_point_of_use() {
        assert_eq!(round_to_increment(dec!(548.75873536), dec!(0.01)), dec!(548.76));
        assert_eq!(round_to_increment(dec!(2.125), dec!(0.01)), dec!(2.13));
        assert_eq!(round_to_increment(dec!(7.4), dec!(1)), dec!(7));
        assert_eq!(round_to_increment(dec!(0.001), dec!(0.01)), dec!(0.01));
    }

    #[test]
    fn rounding_huge_stake_does_not_overflow() {
        assert_eq!(round_to_increment(Decimal::MAX, dec!(0.01)), Decimal::MAX);
    }
}
