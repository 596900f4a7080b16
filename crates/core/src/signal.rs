//! Signal source: parses user-supplied signal text into an ordered book of
//! directives and answers which one is due.
//!
//! Accepted line formats (one directive per line, blank lines and lines
//! starting with `#` ignored):
//!
//! ```text
//! CALL                                   immediate, default asset and expiry
//! PUT,2                                  immediate, 2 minute expiry
//! 2025-01-01 09:30:00,EURUSD,CALL,1      scheduled, explicit asset
//! ```
//!
//! A bad line is rejected on its own and never aborts the batch. The book is
//! built once per session; signals are consumed monotonically and never
//! re-parsed.

use crate::config::{EngineConfig, TradingConfig};
use crate::events::Direction;
use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Timestamp layout of scheduled signals.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Suffix some brokers use for over-the-counter variants of an asset.
pub const OTC_SUFFIX: &str = "-OTC";

/// A rejected signal line.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("line {line}: {reason} ({content:?})")]
pub struct SignalParseError {
    /// 1-based line number in the signal text
    pub line: usize,
    pub content: String,
    pub reason: String,
}

/// When a signal becomes eligible, fixed at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalTiming {
    /// No timestamp
    Immediate,
    /// Waits for `scheduled_at`
    Scheduled,
    /// Timestamp already past the grace window; fires immediately
    Stale,
    /// Timestamp beyond the scheduling horizon; fires immediately
    BeyondHorizon,
}

/// One parsed directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    /// Position in parse order
    pub id: usize,
    /// 1-based source line
    pub line: usize,
    pub direction: Direction,
    pub asset: Option<String>,
    pub expiry_minutes: Option<u32>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub timing: SignalTiming,
    consumed: bool,
}

impl Signal {
    #[must_use]
    pub const fn is_consumed(&self) -> bool {
        self.consumed
    }

    /// Returns true if the signal may be dispatched at `now`.
    #[must_use]
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        match self.timing {
            SignalTiming::Immediate | SignalTiming::Stale | SignalTiming::BeyondHorizon => true,
            SignalTiming::Scheduled => self.scheduled_at.map_or(true, |at| at <= now),
        }
    }

    /// The signal's own asset, else `default`.
    #[must_use]
    pub fn asset_or<'a>(&'a self, default: Option<&'a str>) -> Option<&'a str> {
        self.asset.as_deref().or(default)
    }

    #[must_use]
    pub fn expiry_or(&self, default: u32) -> u32 {
        self.expiry_minutes.unwrap_or(default)
    }
}

/// Settings that turn raw timestamps into eligibility classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulePolicy {
    /// Timezone of the timestamps, whole hours east of UTC
    pub utc_offset_hours: i32,
    pub stale_grace: Duration,
    pub horizon: Duration,
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            utc_offset_hours: 0,
            stale_grace: engine.stale_grace,
            horizon: engine.schedule_horizon,
        }
    }
}

impl SchedulePolicy {
    #[must_use]
    pub const fn new(trading: &TradingConfig, engine: &EngineConfig) -> Self {
        Self {
            utc_offset_hours: trading.utc_offset_hours,
            stale_grace: engine.stale_grace,
            horizon: engine.schedule_horizon,
        }
    }

    fn offset(&self) -> Option<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_hours.checked_mul(3600)?)
    }

    fn classify(&self, at: DateTime<Utc>, now: DateTime<Utc>) -> SignalTiming {
        let grace = ChronoDuration::from_std(self.stale_grace).unwrap_or(ChronoDuration::MAX);
        let horizon = ChronoDuration::from_std(self.horizon).unwrap_or(ChronoDuration::MAX);
        let delta = at.signed_duration_since(now);
        if delta < -grace {
            SignalTiming::Stale
        } else if delta > horizon {
            SignalTiming::BeyondHorizon
        } else {
            SignalTiming::Scheduled
        }
    }
}

/// Parse-ordered collection of signals for one session.
#[derive(Debug, Clone, Default)]
pub struct SignalBook {
    signals: Vec<Signal>,
    rejected: Vec<SignalParseError>,
}

impl SignalBook {
    /// Parses every line of `text`, classifying timestamps against `now`.
    ///
    /// Never fails as a whole; rejected lines are available from
    /// [`SignalBook::rejected`].
    #[must_use]
    pub fn parse(text: &str, policy: &SchedulePolicy, now: DateTime<Utc>) -> Self {
        let mut book = Self::default();

        for (index, raw) in text.lines().enumerate() {
            let line_no = index + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match parse_line(line, policy, now) {
                Ok(mut signal) => {
                    signal.id = book.signals.len();
                    signal.line = line_no;
                    if matches!(signal.timing, SignalTiming::Stale | SignalTiming::BeyondHorizon) {
                        tracing::warn!(
                            line = line_no,
                            timing = ?signal.timing,
                            scheduled_at = ?signal.scheduled_at,
                            "Scheduled signal out of window, will fire immediately"
                        );
                    }
                    book.signals.push(signal);
                }
                Err(reason) => {
                    tracing::warn!(line = line_no, %reason, "Skipping invalid signal line");
                    book.rejected.push(SignalParseError {
                        line: line_no,
                        content: line.to_string(),
                        reason,
                    });
                }
            }
        }

        tracing::debug!(
            accepted = book.signals.len(),
            rejected = book.rejected.len(),
            "Parsed signal text"
        );
        book
    }

    #[must_use]
    pub fn signals(&self) -> &[Signal] {
        &self.signals
    }

    #[must_use]
    pub fn rejected(&self) -> &[SignalParseError] {
        &self.rejected
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.signals.len()
    }

    /// First unconsumed signal, in parse order, that is eligible at `now`.
    #[must_use]
    pub fn next_due(&self, now: DateTime<Utc>) -> Option<&Signal> {
        self.pending().find(|signal| signal.is_eligible(now))
    }

    /// Marks a signal consumed. Returns false if it already was (or is unknown).
    pub fn consume(&mut self, id: usize) -> bool {
        match self.signals.get_mut(id) {
            Some(signal) if !signal.consumed => {
                signal.consumed = true;
                true
            }
            _ => false,
        }
    }

    /// Returns true while any signal is left to dispatch.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending().next().is_some()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending().count()
    }

    /// Earliest instant after `now` at which a pending scheduled signal
    /// becomes eligible.
    #[must_use]
    pub fn next_wake(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.pending()
            .filter(|signal| signal.timing == SignalTiming::Scheduled)
            .filter_map(|signal| signal.scheduled_at)
            .filter(|at| *at > now)
            .min()
    }

    fn pending(&self) -> impl Iterator<Item = &Signal> {
        self.signals.iter().filter(|signal| !signal.consumed)
    }
}

fn parse_line(line: &str, policy: &SchedulePolicy, now: DateTime<Utc>) -> Result<Signal, String> {
    let upper = line.to_ascii_uppercase();
    let fields: Vec<&str> = upper.split(',').map(str::trim).collect();

    let (direction, asset, expiry, scheduled_at) = match fields.as_slice() {
        [direction] => (parse_direction(direction)?, None, None, None),
        [direction, expiry] => (
            parse_direction(direction)?,
            None,
            Some(parse_expiry(expiry)?),
            None,
        ),
        [timestamp, asset, direction, expiry] => {
            let at = parse_timestamp(timestamp, policy)?;
            let asset = (!asset.is_empty()).then(|| (*asset).to_string());
            (
                parse_direction(direction)?,
                asset,
                Some(parse_expiry(expiry)?),
                Some(at),
            )
        }
        other => {
            return Err(format!(
                "expected 1, 2 or 4 comma-separated fields, got {}",
                other.len()
            ))
        }
    };

    let timing = scheduled_at.map_or(SignalTiming::Immediate, |at| policy.classify(at, now));

    Ok(Signal {
        id: 0,
        line: 0,
        direction,
        asset,
        expiry_minutes: expiry,
        scheduled_at,
        timing,
        consumed: false,
    })
}

fn parse_direction(token: &str) -> Result<Direction, String> {
    token.parse()
}

fn parse_expiry(token: &str) -> Result<u32, String> {
    match token.parse::<u32>() {
        Ok(0) => Err("expiry must be at least 1 minute".to_string()),
        Ok(minutes) => Ok(minutes),
        Err(_) => Err(format!("invalid expiry {token:?}")),
    }
}

fn parse_timestamp(token: &str, policy: &SchedulePolicy) -> Result<DateTime<Utc>, String> {
    let naive = NaiveDateTime::parse_from_str(token, TIMESTAMP_FORMAT)
        .map_err(|e| format!("invalid timestamp {token:?}: {e}"))?;
    let offset = policy
        .offset()
        .ok_or_else(|| format!("invalid utc offset {}", policy.utc_offset_hours))?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| format!("ambiguous timestamp {token:?}"))
}

/// `<ASSET>-OTC`, or `None` if the asset already is an OTC variant.
#[must_use]
pub fn otc_variant(asset: &str) -> Option<String> {
    if asset.to_ascii_uppercase().ends_with(OTC_SUFFIX) {
        None
    } else {
        Some(format!("{asset}{OTC_SUFFIX}"))
    }
}
