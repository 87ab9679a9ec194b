//! Group events sold through tickets.
//!
//! Tickets are bookings of kind `EventTicket`. The organizer is the earner
//! of every ticket, and payout is gated on the check-in rate: below the
//! threshold the escrow stays held until a platform operator resolves it.

use super::{complete_in, purchase, settle, BookingOutcome, BookingService};
use crate::error::{Error, Result};
use crate::state::event::{checkin_rate_bps, meets_threshold};
use crate::state::refund::earner_cancellation;
use crate::state::{Booking, BookingKind, BookingStatus, Event, EventStatus, RefundReason};
use crate::store::{Store, Txn};
use crate::tx::{validate_amount, validate_user_id};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEvent {
    pub event_id: Option<String>,
    pub organizer_id: String,
    pub price_tokens: u64,
    pub start_at: u64,
    pub end_at: u64,
    pub capacity: Option<u32>,
}

/// Manual decision on an event whose payout was withheld.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketResolution {
    /// Pay the organizer as if the threshold had been met
    Release,
    /// Refund every ticket holder in full
    RefundAll,
}

/// Event after a settling operation, with per-ticket outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventOutcome {
    pub event: Event,
    pub tickets: Vec<BookingOutcome>,
}

impl EventOutcome {
    pub fn total_refunded(&self) -> u64 {
        self.tickets.iter().map(|t| t.refunded).sum()
    }

    pub fn total_released(&self) -> u64 {
        self.tickets.iter().map(|t| t.released).sum()
    }
}

impl<'a, S: Store> BookingService<'a, S> {
    pub fn create_event(&self, req: &NewEvent, now: u64) -> Result<Event> {
        validate_user_id(&req.organizer_id)?;
        validate_amount(req.price_tokens)?;
        super::validate_window(req.start_at, req.end_at, now)?;
        if req.capacity == Some(0) {
            return Err(Error::Validation("Capacity must be positive".to_string()));
        }
        let event_id = req
            .event_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let event = self.ledger.run("event.create", now, |txn| {
            let event = Event::scheduled(
                event_id.clone(),
                req.organizer_id.clone(),
                req.price_tokens,
                req.start_at,
                req.end_at,
                req.capacity,
                now,
            );
            txn.insert_event(event.clone())?;
            Ok(event)
        })?;
        info!(event = %event.event_id, organizer = %event.organizer_id, "event scheduled");
        Ok(event)
    }

    /// Sell one ticket. Sales close when the event starts.
    pub fn buy_ticket(&self, event_id: &str, payer_id: &str, now: u64) -> Result<Booking> {
        validate_user_id(payer_id)?;
        let ticket_id = uuid::Uuid::new_v4().to_string();

        let ticket = self.ledger.run("event.buy_ticket", now, |txn| {
            let mut event = txn.event(event_id)?;
            event.require_status(EventStatus::Scheduled)?;
            if now >= event.start_at {
                return Err(Error::InvalidState(format!(
                    "Ticket sales for {} are closed",
                    event_id
                )));
            }
            let active = active_tickets(txn, &event)?.len();
            if event.is_sold_out(active) {
                return Err(Error::InvalidState(format!("Event {} is sold out", event_id)));
            }

            let mut ticket = Booking::pending(
                ticket_id.clone(),
                BookingKind::EventTicket {
                    event_id: event_id.to_string(),
                },
                payer_id.to_string(),
                event.organizer_id.clone(),
                event.price_tokens,
                event.start_at,
                event.end_at,
                now,
            );
            purchase(txn, &mut ticket)?;
            txn.insert_booking(ticket.clone())?;
            event.ticket_ids.push(ticket_id.clone());
            txn.put_event(event);
            Ok(ticket)
        })?;
        info!(event = %event_id, ticket = %ticket.booking_id, payer = %payer_id, "ticket sold");
        Ok(ticket)
    }

    /// Payer cancels a ticket; same time windows as a one-to-one booking.
    pub fn cancel_ticket(&self, ticket_id: &str, payer_id: &str, now: u64) -> Result<BookingOutcome> {
        let ticket = self.get(ticket_id)?;
        if ticket.event_id().is_none() {
            return Err(Error::Validation(format!("{} is not a ticket", ticket_id)));
        }
        if ticket.payer_id != payer_id {
            return Err(Error::Unauthorized(format!(
                "{} does not hold ticket {}",
                payer_id, ticket_id
            )));
        }
        self.cancel(ticket_id, payer_id, now)
    }

    /// Organizer cancels: every active ticket is refunded in full.
    pub fn cancel_event(&self, event_id: &str, organizer_id: &str, now: u64) -> Result<EventOutcome> {
        let outcome = self.ledger.run("event.cancel", now, |txn| {
            let mut event = txn.event(event_id)?;
            event.require_organizer(organizer_id)?;
            event.require_status(EventStatus::Scheduled)?;
            let tickets = refund_all(txn, &event)?;
            event.status = EventStatus::Cancelled;
            txn.put_event(event.clone());
            Ok(EventOutcome { event, tickets })
        })?;
        info!(
            event = %event_id,
            tickets = outcome.tickets.len(),
            refunded = outcome.total_refunded(),
            "event cancelled"
        );
        Ok(outcome)
    }

    /// Close a finished event. Pays the organizer when enough ticket
    /// holders checked in, otherwise withholds the payout.
    pub fn complete_event(&self, event_id: &str, now: u64) -> Result<EventOutcome> {
        let threshold = self.config.checkin_threshold_bps;
        let outcome = self.ledger.run("event.complete", now, |txn| {
            let mut event = txn.event(event_id)?;
            event.require_status(EventStatus::Scheduled)?;
            if now < event.end_at {
                return Err(Error::InvalidState(format!(
                    "Event {} ends at {}",
                    event_id, event.end_at
                )));
            }
            let active = active_tickets(txn, &event)?;
            let checked_in = active.iter().filter(|t| t.check_in.verified).count();
            event.checkin_rate_bps = checkin_rate_bps(checked_in, active.len());

            let tickets = if active.is_empty() || meets_threshold(checked_in, active.len(), threshold) {
                event.status = EventStatus::Completed;
                release_all(txn, active)?
            } else {
                event.status = EventStatus::PayoutWithheld;
                Vec::new()
            };
            txn.put_event(event.clone());
            Ok(EventOutcome { event, tickets })
        })?;

        match outcome.event.status {
            EventStatus::PayoutWithheld => warn!(
                event = %event_id,
                rate_bps = ?outcome.event.checkin_rate_bps,
                threshold_bps = threshold,
                "check-in rate below threshold, payout withheld"
            ),
            _ => info!(
                event = %event_id,
                rate_bps = ?outcome.event.checkin_rate_bps,
                released = outcome.total_released(),
                "event completed"
            ),
        }
        Ok(outcome)
    }

    /// Platform decision on a withheld payout.
    pub fn resolve_withheld(
        &self,
        event_id: &str,
        resolution: TicketResolution,
        now: u64,
    ) -> Result<EventOutcome> {
        let outcome = self.ledger.run("event.resolve", now, |txn| {
            let mut event = txn.event(event_id)?;
            event.require_status(EventStatus::PayoutWithheld)?;
            let tickets = match resolution {
                TicketResolution::Release => {
                    let active = active_tickets(txn, &event)?;
                    event.status = EventStatus::Completed;
                    release_all(txn, active)?
                }
                TicketResolution::RefundAll => {
                    event.status = EventStatus::Refunded;
                    refund_all(txn, &event)?
                }
            };
            txn.put_event(event.clone());
            Ok(EventOutcome { event, tickets })
        })?;
        info!(event = %event_id, ?resolution, "withheld payout resolved");
        Ok(outcome)
    }

    pub fn get_event(&self, event_id: &str) -> Result<Event> {
        let store = self.ledger.store();
        let mut txn = Txn::new(store, 0);
        txn.event(event_id)
    }
}

/// Confirmed tickets of an event, in sale order.
fn active_tickets<S: Store + ?Sized>(txn: &mut Txn<'_, S>, event: &Event) -> Result<Vec<Booking>> {
    let mut active = Vec::new();
    for id in &event.ticket_ids {
        let ticket = txn.booking(id)?;
        if ticket.status == BookingStatus::Confirmed {
            active.push(ticket);
        }
    }
    Ok(active)
}

fn release_all<S: Store + ?Sized>(
    txn: &mut Txn<'_, S>,
    tickets: Vec<Booking>,
) -> Result<Vec<BookingOutcome>> {
    tickets.into_iter().map(|t| complete_in(txn, t)).collect()
}

fn refund_all<S: Store + ?Sized>(txn: &mut Txn<'_, S>, event: &Event) -> Result<Vec<BookingOutcome>> {
    let mut out = Vec::new();
    for ticket in active_tickets(txn, event)? {
        let decision = earner_cancellation(ticket.price_tokens, RefundReason::EventCancelled);
        out.push(settle(txn, ticket, decision, BookingStatus::CancelledByEarner)?);
    }
    Ok(out)
}
