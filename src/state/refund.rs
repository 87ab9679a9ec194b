//! Refund policy for time-bound bookings and tickets.
//!
//! Pure functions: they decide how many tokens go back to the payer and
//! whether the platform's fee is part of it. Moving the tokens is the
//! ledger's job.

use crate::error::{Error, Result};
use crate::state::policy::{SplitAmounts, BPS_MAX};
use serde::{Deserialize, Serialize};

pub const HOUR_SECS: i64 = 60 * 60;

/// At or beyond this lead time a payer cancellation returns the whole earner share.
pub const FULL_REFUND_LEAD_SECS: i64 = 72 * HOUR_SECS;

/// At or beyond this lead time (and below the full-refund one) half is returned.
pub const HALF_REFUND_LEAD_SECS: i64 = 24 * HOUR_SECS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancellationActor {
    Payer,
    Earner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundReason {
    PayerCancelled,
    EarnerCancelled,
    EventCancelled,
    MismatchConfirmed,
    PayerNoShow,
    EarnerNoShow,
    Goodwill,
}

impl RefundReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundReason::PayerCancelled => "PAYER_CANCELLED",
            RefundReason::EarnerCancelled => "EARNER_CANCELLED",
            RefundReason::EventCancelled => "EVENT_CANCELLED",
            RefundReason::MismatchConfirmed => "MISMATCH_CONFIRMED",
            RefundReason::PayerNoShow => "PAYER_NO_SHOW",
            RefundReason::EarnerNoShow => "EARNER_NO_SHOW",
            RefundReason::Goodwill => "GOODWILL",
        }
    }
}

/// Outcome of a refund computation.
///
/// `amount` is what the payer receives. With `refund_platform_share` the
/// amount covers the full price (earner share plus platform fee); otherwise
/// it comes out of the earner share alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundDecision {
    pub amount: u64,
    pub refund_platform_share: bool,
    pub reason: RefundReason,
}

impl RefundDecision {
    pub fn is_empty(&self) -> bool {
        self.amount == 0
    }

    /// Portion of `amount` taken from the earner share.
    pub fn from_earner_share(&self, split: &SplitAmounts) -> u64 {
        if self.refund_platform_share {
            self.amount.min(split.earner)
        } else {
            self.amount
        }
    }

    /// Portion of `amount` taken back from platform revenue.
    pub fn from_platform_share(&self, split: &SplitAmounts) -> u64 {
        self.amount - self.from_earner_share(split)
    }
}

/// Fraction of the earner share (basis points) returned on payer cancellation.
///
/// Non-increasing as the start approaches. A negative lead (start already
/// passed) refunds nothing.
pub fn payer_refund_bps(secs_until_start: i64) -> u16 {
    if secs_until_start >= FULL_REFUND_LEAD_SECS {
        BPS_MAX
    } else if secs_until_start >= HALF_REFUND_LEAD_SECS {
        BPS_MAX / 2
    } else {
        0
    }
}

/// Payer-initiated cancellation: time-window refund of the earner share,
/// platform fee kept.
pub fn payer_cancellation(earner_share: u64, secs_until_start: i64) -> RefundDecision {
    let bps = payer_refund_bps(secs_until_start) as u128;
    let amount = (earner_share as u128 * bps / BPS_MAX as u128) as u64;
    RefundDecision {
        amount,
        refund_platform_share: false,
        reason: RefundReason::PayerCancelled,
    }
}

/// Earner- or organizer-initiated cancellation: everything back, fee included.
pub fn earner_cancellation(price: u64, reason: RefundReason) -> RefundDecision {
    RefundDecision {
        amount: price,
        refund_platform_share: true,
        reason,
    }
}

/// Confirmed appearance or identity mismatch: full price, regardless of timing.
pub fn mismatch_refund(price: u64) -> RefundDecision {
    RefundDecision {
        amount: price,
        refund_platform_share: true,
        reason: RefundReason::MismatchConfirmed,
    }
}

/// No-show of one party. A missing payer forfeits; a missing earner is
/// handled like an earner cancellation.
pub fn no_show_refund(absent: CancellationActor, price: u64) -> RefundDecision {
    match absent {
        CancellationActor::Payer => RefundDecision {
            amount: 0,
            refund_platform_share: false,
            reason: RefundReason::PayerNoShow,
        },
        CancellationActor::Earner => earner_cancellation(price, RefundReason::EarnerNoShow),
    }
}

/// A mismatch may only be reported shortly after check-in.
pub fn mismatch_report_allowed(checked_in_at: u64, now: u64, window_secs: u64) -> bool {
    now >= checked_in_at && now - checked_in_at <= window_secs
}

/// Earner-funded goodwill refund after completion.
///
/// Bounded by what the earner was actually paid minus earlier goodwill
/// refunds. The platform fee is never part of it.
pub fn goodwill_refund(
    requested: u64,
    earner_paid: u64,
    already_refunded: u64,
) -> Result<RefundDecision> {
    if requested == 0 {
        return Err(Error::Validation(
            "Goodwill amount must be greater than zero".to_string(),
        ));
    }
    let remaining = earner_paid.saturating_sub(already_refunded);
    if requested > remaining {
        return Err(Error::Validation(format!(
            "Goodwill amount {} exceeds refundable earner share {}",
            requested, remaining
        )));
    }
    Ok(RefundDecision {
        amount: requested,
        refund_platform_share: false,
        reason: RefundReason::Goodwill,
    })
}
