//! Booking and ticket economics.
//!
//! A purchase debits the payer, books the platform share and parks the
//! earner share in escrow. Every later transition settles that escrow:
//! completion releases it to the earner, cancellations and mismatches
//! return (part of) it to the payer, together with the platform share
//! when the earner side is at fault.

pub mod event;

pub use event::{NewEvent, TicketResolution};

use crate::config::BookingConfig;
use crate::error::{Error, Result};
use crate::ledger::ops;
use crate::ledger::Ledger;
use crate::state::refund::{
    earner_cancellation, goodwill_refund, mismatch_refund, mismatch_report_allowed,
    no_show_refund, payer_cancellation,
};
use crate::state::{
    Booking, BookingKind, BookingStatus, CancellationActor, RefundDecision, RefundReason,
    RevenueContext,
};
use crate::store::{Key, KeyKind, Record, Store, Txn};
use crate::tx::{validate_amount, validate_user_id, Source, SpendRequest};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Purchase request for a one-to-one meeting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBooking {
    /// Generated when absent
    pub booking_id: Option<String>,
    pub payer_id: String,
    pub earner_id: String,
    pub price_tokens: u64,
    pub start_at: u64,
    pub end_at: u64,
}

/// A booking after a settling transition, with the tokens that moved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingOutcome {
    pub booking: Booking,
    /// Returned to the payer
    pub refunded: u64,
    /// Released from escrow to the earner
    pub released: u64,
}

pub struct BookingService<'a, S: Store> {
    ledger: &'a Ledger<S>,
    config: BookingConfig,
}

impl<'a, S: Store> BookingService<'a, S> {
    pub fn new(ledger: &'a Ledger<S>, config: BookingConfig) -> Self {
        BookingService { ledger, config }
    }

    pub fn config(&self) -> &BookingConfig {
        &self.config
    }

    /// Buy a one-to-one meeting. The booking only exists once paid.
    pub fn create(&self, req: &NewBooking, now: u64) -> Result<Booking> {
        validate_user_id(&req.payer_id)?;
        validate_user_id(&req.earner_id)?;
        validate_amount(req.price_tokens)?;
        validate_window(req.start_at, req.end_at, now)?;
        let booking_id = req
            .booking_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let booking = self.ledger.run("booking.create", now, |txn| {
            let mut booking = Booking::pending(
                booking_id.clone(),
                BookingKind::OneOnOne,
                req.payer_id.clone(),
                req.earner_id.clone(),
                req.price_tokens,
                req.start_at,
                req.end_at,
                now,
            );
            purchase(txn, &mut booking)?;
            txn.insert_booking(booking.clone())?;
            Ok(booking)
        })?;

        info!(
            booking = %booking.booking_id,
            payer = %booking.payer_id,
            earner = %booking.earner_id,
            price = booking.price_tokens,
            "booking confirmed"
        );
        Ok(booking)
    }

    /// Cancel a confirmed booking or ticket before it starts. The payer gets
    /// the time-window refund of the earner share; the earner side refunds
    /// everything. Once started, only no-show, mismatch or completion settle.
    pub fn cancel(&self, booking_id: &str, actor_id: &str, now: u64) -> Result<BookingOutcome> {
        let outcome = self.ledger.run("booking.cancel", now, |txn| {
            let mut booking = txn.booking(booking_id)?;
            booking.require_status(BookingStatus::Confirmed)?;
            if now >= booking.start_at {
                return Err(Error::InvalidState(format!(
                    "Booking {} started at {} and can no longer be cancelled",
                    booking_id, booking.start_at
                )));
            }
            if let Some(event_id) = booking.event_id() {
                txn.event(event_id)?
                    .require_status(crate::state::EventStatus::Scheduled)?;
            }
            let (decision, next) = if actor_id == booking.payer_id {
                (
                    payer_cancellation(
                        booking.split.earner_share_tokens,
                        booking.seconds_until_start(now),
                    ),
                    BookingStatus::CancelledByPayer,
                )
            } else if actor_id == booking.earner_id {
                (
                    earner_cancellation(booking.price_tokens, RefundReason::EarnerCancelled),
                    BookingStatus::CancelledByEarner,
                )
            } else {
                return Err(Error::Unauthorized(format!(
                    "{} cannot cancel booking {}",
                    actor_id, booking_id
                )));
            };
            settle(txn, booking, decision, next)
        })?;

        info!(
            booking = %booking_id,
            by = %actor_id,
            refunded = outcome.refunded,
            released = outcome.released,
            "booking cancelled"
        );
        Ok(outcome)
    }

    /// Record attendance. Opens shortly before the start and closes at the end.
    pub fn check_in(&self, booking_id: &str, user_id: &str, now: u64) -> Result<Booking> {
        let opens_before = self.config.checkin_opens_before_secs;
        self.ledger.run("booking.check_in", now, |txn| {
            let mut booking = txn.booking(booking_id)?;
            booking.require_status(BookingStatus::Confirmed)?;
            booking.require_participant(user_id)?;
            if now.saturating_add(opens_before) < booking.start_at || now > booking.end_at {
                return Err(Error::InvalidState(format!(
                    "Check-in for {} is open from {} to {}",
                    booking_id,
                    booking.start_at.saturating_sub(opens_before),
                    booking.end_at
                )));
            }
            if booking.check_in.verified {
                return Err(Error::InvalidState(format!(
                    "Booking {} is already checked in",
                    booking_id
                )));
            }
            booking.record_check_in(user_id, now);
            txn.put_booking(booking.clone());
            Ok(booking)
        })
    }

    /// Payer flags that the earner is not who they claimed to be. Only
    /// allowed within the mismatch window after check-in.
    pub fn report_mismatch(&self, booking_id: &str, reporter_id: &str, now: u64) -> Result<Booking> {
        let window = self.config.mismatch_window_secs;
        self.ledger.run("booking.report_mismatch", now, |txn| {
            let mut booking = txn.booking(booking_id)?;
            booking.require_status(BookingStatus::Confirmed)?;
            if reporter_id != booking.payer_id {
                return Err(Error::Unauthorized(format!(
                    "Only the payer can report a mismatch on {}",
                    booking_id
                )));
            }
            let Some(checked_in_at) = booking.check_in.checked_in_at else {
                return Err(Error::InvalidState(format!(
                    "Booking {} has no check-in",
                    booking_id
                )));
            };
            if !mismatch_report_allowed(checked_in_at, now, window) {
                return Err(Error::InvalidState(format!(
                    "Mismatch window for {} closed",
                    booking_id
                )));
            }
            if booking.mismatch.reported {
                return Err(Error::InvalidState(format!(
                    "Mismatch on {} already reported",
                    booking_id
                )));
            }
            booking.mismatch.reported = true;
            booking.mismatch.reported_by = Some(reporter_id.to_string());
            booking.mismatch.reported_at = Some(now);
            txn.put_booking(booking.clone());
            Ok(booking)
        })
    }

    /// Moderation upheld a mismatch report: full refund, platform fee included.
    pub fn confirm_mismatch(&self, booking_id: &str, now: u64) -> Result<BookingOutcome> {
        let outcome = self.ledger.run("booking.confirm_mismatch", now, |txn| {
            let mut booking = txn.booking(booking_id)?;
            booking.require_status(BookingStatus::Confirmed)?;
            if !booking.mismatch.reported {
                return Err(Error::InvalidState(format!(
                    "No mismatch reported on {}",
                    booking_id
                )));
            }
            booking.mismatch.confirmed = true;
            let decision = mismatch_refund(booking.price_tokens);
            settle(txn, booking, decision, BookingStatus::MismatchConfirmed)
        })?;
        warn!(booking = %booking_id, refunded = outcome.refunded, "mismatch confirmed");
        Ok(outcome)
    }

    /// Pay the earner once a one-to-one meeting is over. Check-in is not
    /// required. Event tickets complete through their event.
    pub fn complete(&self, booking_id: &str, now: u64) -> Result<BookingOutcome> {
        let outcome = self.ledger.run("booking.complete", now, |txn| {
            let booking = txn.booking(booking_id)?;
            if booking.event_id().is_some() {
                return Err(Error::InvalidState(format!(
                    "Ticket {} completes with its event",
                    booking_id
                )));
            }
            complete_in(txn, booking)
        })?;
        info!(booking = %booking_id, released = outcome.released, "booking completed");
        Ok(outcome)
    }

    /// One side did not show up. A missing payer forfeits the price; a
    /// missing earner refunds it in full.
    pub fn no_show(
        &self,
        booking_id: &str,
        absent: CancellationActor,
        now: u64,
    ) -> Result<BookingOutcome> {
        let outcome = self.ledger.run("booking.no_show", now, |txn| {
            let booking = txn.booking(booking_id)?;
            booking.require_status(BookingStatus::Confirmed)?;
            if now < booking.start_at {
                return Err(Error::InvalidState(format!(
                    "Booking {} has not started",
                    booking_id
                )));
            }
            let decision = no_show_refund(absent, booking.price_tokens);
            settle(txn, booking, decision, BookingStatus::NoShow)
        })?;
        info!(booking = %booking_id, ?absent, refunded = outcome.refunded, "no-show");
        Ok(outcome)
    }

    /// Earner returns part of what they were paid. The platform fee is
    /// never part of a goodwill refund.
    pub fn goodwill(
        &self,
        booking_id: &str,
        earner_id: &str,
        amount: u64,
        now: u64,
    ) -> Result<BookingOutcome> {
        let outcome = self.ledger.run("booking.goodwill", now, |txn| {
            let mut booking = txn.booking(booking_id)?;
            if !matches!(
                booking.status,
                BookingStatus::Completed | BookingStatus::CompletedGoodwill
            ) {
                return Err(Error::InvalidState(format!(
                    "Booking {} is {:?}; goodwill needs a completed booking",
                    booking_id, booking.status
                )));
            }
            if earner_id != booking.earner_id {
                return Err(Error::Unauthorized(format!(
                    "Only the earner can refund goodwill on {}",
                    booking_id
                )));
            }
            let decision = goodwill_refund(
                amount,
                booking.payment.earner_paid_tokens,
                booking.payment.goodwill_refunded_tokens,
            )?;
            let (source, _) = pricing(&booking.kind);
            ops::goodwill_transfer(
                txn,
                &booking.earner_id,
                &booking.payer_id,
                decision.amount,
                source,
                &booking.booking_id,
            )?;
            booking.record_refund(&decision, 0);
            booking.transition(BookingStatus::CompletedGoodwill, now)?;
            txn.put_booking(booking.clone());
            Ok(BookingOutcome {
                booking,
                refunded: decision.amount,
                released: 0,
            })
        })?;
        info!(booking = %booking_id, amount, "goodwill refund");
        Ok(outcome)
    }

    /// Complete every confirmed one-to-one booking whose end has passed.
    /// Returns the completed ids. Bookings that changed state concurrently
    /// are skipped.
    pub fn sweep_due(&self, now: u64) -> Result<Vec<String>> {
        let mut completed = Vec::new();
        for key in self.ledger.store().keys(KeyKind::Booking)? {
            let Some(Record::Booking(b)) = self.ledger.store().get(&key)?.map(|v| v.record) else {
                continue;
            };
            if b.status != BookingStatus::Confirmed || b.event_id().is_some() || !b.has_ended(now) {
                continue;
            }
            match self.complete(key.id(), now) {
                Ok(_) => completed.push(key.id().to_string()),
                Err(Error::InvalidState(msg)) => {
                    warn!(booking = %key.id(), %msg, "skipped by sweep");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(completed)
    }

    pub fn get(&self, booking_id: &str) -> Result<Booking> {
        match self
            .ledger
            .store()
            .get(&Key::Booking(booking_id.to_string()))?
        {
            Some(v) => match v.record {
                Record::Booking(b) => Ok(b),
                other => Err(Error::Storage(format!(
                    "Expected booking record, found {:?}",
                    other
                ))),
            },
            None => Err(Error::NotFound(format!("Booking {}", booking_id))),
        }
    }
}

/// Latest accepted start or end time; lead times are signed seconds.
pub const MAX_TIMESTAMP: u64 = i64::MAX as u64;

fn validate_window(start_at: u64, end_at: u64, now: u64) -> Result<()> {
    if start_at > MAX_TIMESTAMP || end_at > MAX_TIMESTAMP {
        return Err(Error::Validation(format!(
            "Times must not exceed {}",
            MAX_TIMESTAMP
        )));
    }
    if end_at <= start_at {
        return Err(Error::Validation(format!(
            "End {} must be after start {}",
            end_at, start_at
        )));
    }
    if start_at <= now {
        return Err(Error::Validation(format!(
            "Start {} is not in the future",
            start_at
        )));
    }
    Ok(())
}

/// Ledger source and revenue context for a booking kind.
pub(crate) fn pricing(kind: &BookingKind) -> (Source, RevenueContext) {
    match kind {
        BookingKind::OneOnOne => (Source::Calendar, RevenueContext::CalendarBooking),
        BookingKind::EventTicket { .. } => (Source::Event, RevenueContext::EventTicket),
    }
}

/// Charge the payer for a pending booking and confirm it.
pub(crate) fn purchase<S: Store + ?Sized>(txn: &mut Txn<'_, S>, booking: &mut Booking) -> Result<()> {
    let (source, context) = pricing(&booking.kind);
    let req = SpendRequest::new(&booking.payer_id, booking.price_tokens, source, context)
        .earner(&booking.earner_id)
        .related(&booking.booking_id);
    let spent = ops::spend_into_escrow(txn, &req)?;
    booking.confirm(spent.split, txn.now())
}

/// Release whatever is still held for `booking` to its earner.
fn release_held<S: Store + ?Sized>(txn: &mut Txn<'_, S>, booking: &mut Booking) -> Result<u64> {
    let held = booking.payment.escrow_held_tokens;
    let (source, context) = pricing(&booking.kind);
    ops::release_escrow(txn, &booking.earner_id, held, source, &booking.booking_id, context)?;
    booking.record_payout(held);
    Ok(held)
}

/// Confirmed -> Completed, paying out the escrow.
pub(crate) fn complete_in<S: Store + ?Sized>(
    txn: &mut Txn<'_, S>,
    mut booking: Booking,
) -> Result<BookingOutcome> {
    booking.require_status(BookingStatus::Confirmed)?;
    if !booking.has_ended(txn.now()) {
        return Err(Error::InvalidState(format!(
            "Booking {} ends at {}",
            booking.booking_id, booking.end_at
        )));
    }
    let released = release_held(txn, &mut booking)?;
    booking.transition(BookingStatus::Completed, txn.now())?;
    txn.put_booking(booking.clone());
    Ok(BookingOutcome {
        booking,
        refunded: 0,
        released,
    })
}

/// Apply a refund decision to a confirmed booking and move it to `next`.
///
/// The earner part of the refund comes out of escrow and the platform part
/// out of revenue. On payer-side outcomes whatever escrow remains belongs
/// to the earner and is released at once.
pub(crate) fn settle<S: Store + ?Sized>(
    txn: &mut Txn<'_, S>,
    mut booking: Booking,
    decision: RefundDecision,
    next: BookingStatus,
) -> Result<BookingOutcome> {
    let now = txn.now();
    let split = booking.split.amounts();
    let from_earner = decision.from_earner_share(&split);
    if from_earner > booking.payment.escrow_held_tokens {
        return Err(Error::InvalidState(format!(
            "Booking {} holds {} in escrow, refund needs {}",
            booking.booking_id, booking.payment.escrow_held_tokens, from_earner
        )));
    }

    let (source, context) = pricing(&booking.kind);
    ops::refund_from_escrow(
        txn,
        &booking.payer_id,
        &booking.earner_id,
        &decision,
        &split,
        source,
        &booking.booking_id,
        context,
    )?;
    booking.record_refund(&decision, from_earner);

    let released = if decision.refund_platform_share {
        0
    } else {
        release_held(txn, &mut booking)?
    };

    booking.transition(next, now)?;
    txn.put_booking(booking.clone());
    Ok(BookingOutcome {
        booking,
        refunded: decision.amount,
        released,
    })
}
