pub mod booking;
pub mod event;
pub mod policy;
pub mod refund;
pub mod session;
pub mod wallet;

pub use booking::{
    Booking, BookingKind, BookingSplit, BookingStatus, CheckIn, Mismatch, Payment, StatusChange,
};
pub use event::{Event, EventStatus};
pub use policy::{RevenueContext, RevenueSplit, SplitAmounts};
pub use refund::{CancellationActor, RefundDecision, RefundReason};
pub use session::{EndReason, Session, SessionOwner, SessionStatus, SessionTier};
pub use wallet::Wallet;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Global platform revenue counter.
///
/// `gross` and `clawed_back` only grow; the net figure is derived.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlatformRevenue {
    pub gross: u64,
    pub clawed_back: u64,
    pub gross_by_context: BTreeMap<RevenueContext, u64>,
}

impl PlatformRevenue {
    pub fn credit(&mut self, context: RevenueContext, amount: u64) {
        self.gross = self.gross.saturating_add(amount);
        let slot = self.gross_by_context.entry(context).or_default();
        *slot = slot.saturating_add(amount);
    }

    pub fn claw_back(&mut self, amount: u64) {
        self.clawed_back = self.clawed_back.saturating_add(amount);
    }

    pub fn net(&self) -> i128 {
        self.gross as i128 - self.clawed_back as i128
    }
}

/// Earner shares collected for bookings and tickets, not yet released to the
/// earner nor returned to the payer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Escrow {
    pub held: u64,
    pub total_released: u64,
    pub total_refunded: u64,
}

/// Serializable image of everything the ledger holds except the entry log.
///
/// This is what gets snapshotted to disk; the store is rebuilt from it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct State {
    pub wallets: HashMap<String, Wallet>,
    pub platform_revenue: PlatformRevenue,
    pub escrow: Escrow,
    pub bookings: HashMap<String, Booking>,
    pub events: HashMap<String, Event>,
    pub sessions: HashMap<String, Session>,
}

impl State {
    /// Create empty genesis state
    pub fn new() -> Self {
        State::default()
    }

    pub fn get_wallet(&self, user_id: &str) -> Option<&Wallet> {
        self.wallets.get(user_id)
    }

    pub fn get_booking(&self, booking_id: &str) -> Option<&Booking> {
        self.bookings.get(booking_id)
    }

    pub fn get_event(&self, event_id: &str) -> Option<&Event> {
        self.events.get(event_id)
    }

    pub fn get_session(&self, session_id: &str) -> Option<&Session> {
        self.sessions.get(session_id)
    }

    /// Sum of every wallet balance.
    pub fn total_balances(&self) -> u128 {
        self.wallets.values().map(|w| w.balance as u128).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_creation() {
        let state = State::new();
        assert!(state.wallets.is_empty());
        assert_eq!(state.platform_revenue.net(), 0);
    }

    #[test]
    fn test_platform_revenue_counters() {
        let mut rev = PlatformRevenue::default();
        rev.credit(RevenueContext::ChatPaid, 35);
        rev.credit(RevenueContext::Tip, 10);
        rev.claw_back(20);
        assert_eq!(rev.gross, 45);
        assert_eq!(rev.net(), 25);
        assert_eq!(rev.gross_by_context[&RevenueContext::ChatPaid], 35);
    }

    #[test]
    fn test_total_balances() {
        let mut state = State::new();
        state.wallets.insert("a".into(), Wallet::with_balance("a", 10));
        state.wallets.insert("b".into(), Wallet::with_balance("b", 5));
        assert_eq!(state.total_balances(), 15);
    }
}
