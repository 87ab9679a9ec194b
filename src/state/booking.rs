//! Booking aggregate: a paid one-to-one meeting or an event ticket.
//!
//! The record is the payment audit trail: it is never deleted, and every
//! status change is appended to `history`.

use crate::error::{Error, Result};
use crate::state::policy::SplitAmounts;
use crate::state::refund::RefundDecision;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingKind {
    OneOnOne,
    EventTicket { event_id: String },
}

/// Booking lifecycle.
///
/// Pending -> Confirmed -> {CancelledByPayer, CancelledByEarner,
/// MismatchConfirmed, Completed, NoShow}; Completed -> CompletedGoodwill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    /// Created, payment not yet taken. Never outlives the purchase transaction.
    Pending,
    /// Paid; earner share held in escrow.
    Confirmed,
    CancelledByPayer,
    CancelledByEarner,
    MismatchConfirmed,
    /// Earner share released.
    Completed,
    /// Completed, then partially refunded out of the earner's pocket.
    CompletedGoodwill,
    NoShow,
}

impl BookingStatus {
    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Confirmed, CancelledByPayer)
                | (Confirmed, CancelledByEarner)
                | (Confirmed, MismatchConfirmed)
                | (Confirmed, Completed)
                | (Confirmed, NoShow)
                | (Completed, CompletedGoodwill)
                | (CompletedGoodwill, CompletedGoodwill)
        )
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }
}

/// Price split fixed at purchase time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingSplit {
    pub platform_share_tokens: u64,
    pub earner_share_tokens: u64,
}

impl BookingSplit {
    pub fn amounts(&self) -> SplitAmounts {
        SplitAmounts {
            earner: self.earner_share_tokens,
            platform: self.platform_share_tokens,
        }
    }
}

impl From<SplitAmounts> for BookingSplit {
    fn from(s: SplitAmounts) -> Self {
        BookingSplit {
            platform_share_tokens: s.platform,
            earner_share_tokens: s.earner,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub charged_tokens: u64,
    pub refunded_tokens_total: u64,
    pub refunded_to_payer_tokens: u64,
    /// Part of the refunds that came out of the earner share
    pub refunded_from_earner_tokens: u64,
    pub platform_fee_refunded: bool,
    /// Earner share collected but not yet released or refunded
    pub escrow_held_tokens: u64,
    pub earner_paid_tokens: u64,
    pub goodwill_refunded_tokens: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckIn {
    pub verified: bool,
    pub checked_in_at: Option<u64>,
    pub checked_in_by: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mismatch {
    pub reported: bool,
    pub reported_by: Option<String>,
    pub reported_at: Option<u64>,
    pub confirmed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: BookingStatus,
    pub at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub booking_id: String,
    pub kind: BookingKind,
    pub payer_id: String,
    pub earner_id: String,
    pub price_tokens: u64,
    pub split: BookingSplit,
    pub payment: Payment,
    pub status: BookingStatus,
    pub check_in: CheckIn,
    pub mismatch: Mismatch,
    pub start_at: u64,
    pub end_at: u64,
    pub created_at: u64,
    pub history: Vec<StatusChange>,
}

impl Booking {
    #[allow(clippy::too_many_arguments)]
    pub fn pending(
        booking_id: String,
        kind: BookingKind,
        payer_id: String,
        earner_id: String,
        price_tokens: u64,
        start_at: u64,
        end_at: u64,
        now: u64,
    ) -> Self {
        Booking {
            booking_id,
            kind,
            payer_id,
            earner_id,
            price_tokens,
            split: BookingSplit::default(),
            payment: Payment::default(),
            status: BookingStatus::Pending,
            check_in: CheckIn::default(),
            mismatch: Mismatch::default(),
            start_at,
            end_at,
            created_at: now,
            history: vec![StatusChange {
                status: BookingStatus::Pending,
                at: now,
            }],
        }
    }

    pub fn transition(&mut self, next: BookingStatus, now: u64) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidState(format!(
                "Booking {} cannot move from {:?} to {:?}",
                self.booking_id, self.status, next
            )));
        }
        self.status = next;
        self.history.push(StatusChange { status: next, at: now });
        Ok(())
    }

    /// Pending -> Confirmed once the purchase spend landed.
    pub fn confirm(&mut self, split: SplitAmounts, now: u64) -> Result<()> {
        self.transition(BookingStatus::Confirmed, now)?;
        self.split = split.into();
        self.payment.charged_tokens = self.price_tokens;
        self.payment.escrow_held_tokens = split.earner;
        Ok(())
    }

    pub fn require_status(&self, expected: BookingStatus) -> Result<()> {
        if self.status != expected {
            return Err(Error::InvalidState(format!(
                "Booking {} is {:?}, expected {:?}",
                self.booking_id, self.status, expected
            )));
        }
        Ok(())
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.payer_id == user_id || self.earner_id == user_id
    }

    pub fn require_participant(&self, user_id: &str) -> Result<()> {
        if !self.is_participant(user_id) {
            return Err(Error::Unauthorized(format!(
                "{} is not a participant of booking {}",
                user_id, self.booking_id
            )));
        }
        Ok(())
    }

    pub fn event_id(&self) -> Option<&str> {
        match &self.kind {
            BookingKind::EventTicket { event_id } => Some(event_id),
            BookingKind::OneOnOne => None,
        }
    }

    /// Signed lead time; negative once the start has passed. Saturates at
    /// the `i64` range.
    pub fn seconds_until_start(&self, now: u64) -> i64 {
        let lead = self.start_at as i128 - now as i128;
        lead.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    pub fn has_ended(&self, now: u64) -> bool {
        now >= self.end_at
    }

    pub fn record_check_in(&mut self, by: &str, now: u64) {
        self.check_in = CheckIn {
            verified: true,
            checked_in_at: Some(now),
            checked_in_by: Some(by.to_string()),
        };
    }

    /// Book-keeping for a refund; `from_escrow` is the part of the earner
    /// share that was still held when the refund happened.
    pub fn record_refund(&mut self, decision: &RefundDecision, from_escrow: u64) {
        let split = self.split.amounts();
        let from_earner = decision.from_earner_share(&split);
        let p = &mut self.payment;
        p.refunded_tokens_total = p.refunded_tokens_total.saturating_add(decision.amount);
        p.refunded_to_payer_tokens = p.refunded_to_payer_tokens.saturating_add(decision.amount);
        p.refunded_from_earner_tokens = p.refunded_from_earner_tokens.saturating_add(from_earner);
        p.escrow_held_tokens = p.escrow_held_tokens.saturating_sub(from_escrow);
        if decision.from_platform_share(&split) > 0 {
            p.platform_fee_refunded = true;
        }
        if decision.reason == crate::state::refund::RefundReason::Goodwill {
            p.goodwill_refunded_tokens = p.goodwill_refunded_tokens.saturating_add(decision.amount);
        }
    }

    /// Escrow released to the earner.
    pub fn record_payout(&mut self, amount: u64) {
        self.payment.escrow_held_tokens = self.payment.escrow_held_tokens.saturating_sub(amount);
        self.payment.earner_paid_tokens = self.payment.earner_paid_tokens.saturating_add(amount);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::refund::{payer_cancellation, HOUR_SECS};

    fn confirmed() -> Booking {
        let mut b = Booking::pending(
            "b1".to_string(),
            BookingKind::OneOnOne,
            "payer".to_string(),
            "earner".to_string(),
            1000,
            10_000,
            13_600,
            0,
        );
        b.confirm(
            SplitAmounts {
                earner: 800,
                platform: 200,
            },
            1,
        )
        .unwrap();
        b
    }

    #[test]
    fn test_confirm_sets_payment() {
        let b = confirmed();
        assert_eq!(b.status, BookingStatus::Confirmed);
        assert_eq!(b.payment.charged_tokens, 1000);
        assert_eq!(b.payment.escrow_held_tokens, 800);
        assert_eq!(b.split.platform_share_tokens, 200);
        assert_eq!(b.history.len(), 2);
    }

    #[test]
    fn test_illegal_transitions() {
        let mut b = confirmed();
        assert!(b.transition(BookingStatus::CompletedGoodwill, 2).is_err());
        b.transition(BookingStatus::CancelledByPayer, 2).unwrap();
        assert!(b.transition(BookingStatus::Completed, 3).is_err());
        assert!(b.status.is_terminal());
    }

    #[test]
    fn test_goodwill_only_after_completion() {
        let mut b = confirmed();
        b.transition(BookingStatus::Completed, 2).unwrap();
        b.transition(BookingStatus::CompletedGoodwill, 3).unwrap();
        b.transition(BookingStatus::CompletedGoodwill, 4).unwrap();
    }

    #[test]
    fn test_record_refund_half_window() {
        let mut b = confirmed();
        let d = payer_cancellation(800, 30 * HOUR_SECS);
        b.record_refund(&d, 400);
        assert_eq!(b.payment.refunded_to_payer_tokens, 400);
        assert_eq!(b.payment.refunded_from_earner_tokens, 400);
        assert_eq!(b.payment.escrow_held_tokens, 400);
        assert!(!b.payment.platform_fee_refunded);
    }

    #[test]
    fn test_lead_time_saturates() {
        let mut b = confirmed();
        assert_eq!(b.seconds_until_start(4_000), 6_000);
        assert_eq!(b.seconds_until_start(13_600), -3_600);
        b.start_at = u64::MAX;
        assert_eq!(b.seconds_until_start(0), i64::MAX);
        b.start_at = 0;
        assert_eq!(b.seconds_until_start(u64::MAX), i64::MIN);
    }

    #[test]
    fn test_participants() {
        let b = confirmed();
        assert!(b.require_participant("payer").is_ok());
        assert!(b.require_participant("earner").is_ok());
        assert!(matches!(
            b.require_participant("mallory"),
            Err(Error::Unauthorized(_))
        ));
    }
}
