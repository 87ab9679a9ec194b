use crate::error::{Error, Result};
use crate::state::policy::BPS_MAX;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Scheduled,
    Cancelled,
    Completed,
    /// Check-in rate below threshold; escrow kept until manual resolution.
    PayoutWithheld,
    /// Withheld payout resolved by refunding ticket holders.
    Refunded,
}

/// Group event sold through tickets. Each ticket is a [`crate::state::Booking`]
/// of kind `EventTicket`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub organizer_id: String,
    pub price_tokens: u64,
    pub start_at: u64,
    pub end_at: u64,
    pub capacity: Option<u32>,
    pub ticket_ids: Vec<String>,
    pub status: EventStatus,
    /// Check-in rate observed at completion, in basis points
    pub checkin_rate_bps: Option<u16>,
    pub created_at: u64,
}

impl Event {
    pub fn scheduled(
        event_id: String,
        organizer_id: String,
        price_tokens: u64,
        start_at: u64,
        end_at: u64,
        capacity: Option<u32>,
        now: u64,
    ) -> Self {
        Event {
            event_id,
            organizer_id,
            price_tokens,
            start_at,
            end_at,
            capacity,
            ticket_ids: Vec::new(),
            status: EventStatus::Scheduled,
            checkin_rate_bps: None,
            created_at: now,
        }
    }

    pub fn require_status(&self, expected: EventStatus) -> Result<()> {
        if self.status != expected {
            return Err(Error::InvalidState(format!(
                "Event {} is {:?}, expected {:?}",
                self.event_id, self.status, expected
            )));
        }
        Ok(())
    }

    pub fn require_organizer(&self, user_id: &str) -> Result<()> {
        if self.organizer_id != user_id {
            return Err(Error::Unauthorized(format!(
                "{} is not the organizer of event {}",
                user_id, self.event_id
            )));
        }
        Ok(())
    }

    pub fn is_sold_out(&self, active_tickets: usize) -> bool {
        self.capacity
            .map(|cap| active_tickets >= cap as usize)
            .unwrap_or(false)
    }
}

/// Check-in rate in basis points, floored. `None` when there is no active ticket.
pub fn checkin_rate_bps(checked_in: usize, active: usize) -> Option<u16> {
    if active == 0 {
        return None;
    }
    Some((checked_in as u64 * BPS_MAX as u64 / active as u64) as u16)
}

/// Payout is released when the rate meets or exceeds the threshold.
pub fn meets_threshold(checked_in: usize, active: usize, threshold_bps: u16) -> bool {
    // Compare cross-multiplied so flooring never rejects an exact 70%.
    active > 0 && checked_in as u64 * BPS_MAX as u64 >= threshold_bps as u64 * active as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkin_rate() {
        assert_eq!(checkin_rate_bps(7, 10), Some(7_000));
        assert_eq!(checkin_rate_bps(2, 3), Some(6_666));
        assert_eq!(checkin_rate_bps(0, 0), None);
    }

    #[test]
    fn test_threshold_inclusive() {
        assert!(meets_threshold(7, 10, 7_000));
        assert!(!meets_threshold(6, 10, 7_000));
        assert!(meets_threshold(3, 3, 7_000));
        assert!(!meets_threshold(0, 0, 7_000));
    }

    #[test]
    fn test_capacity() {
        let e = Event::scheduled("e".into(), "org".into(), 100, 10, 20, Some(2), 0);
        assert!(!e.is_sold_out(1));
        assert!(e.is_sold_out(2));
        let open = Event::scheduled("e".into(), "org".into(), 100, 10, 20, None, 0);
        assert!(!open.is_sold_out(10_000));
    }
}
