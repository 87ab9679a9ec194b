use token_ledger::billing::MeteredBilling;
use token_ledger::config::BillingConfig;
use token_ledger::error::{Error, ErrorCode};
use token_ledger::ledger::Ledger;
use token_ledger::state::{EndReason, RevenueContext, SessionOwner, SessionStatus, SessionTier};
use token_ledger::store::{MemoryStore, Store};
use token_ledger::tx::{CreditRequest, Source, TxType};

const T0: u64 = 1_700_000_000;

fn ledger(balance: u64) -> Ledger<MemoryStore> {
    let ledger = Ledger::in_memory();
    ledger
        .purchase_at(&CreditRequest::new("viewer", balance, Source::TokenPurchase), 0)
        .unwrap();
    ledger
}

fn open(billing: &MeteredBilling<'_, MemoryStore>, id: &str, owner: SessionOwner) {
    billing
        .create(Some(id), "viewer", owner, SessionTier::Standard, T0)
        .unwrap();
    billing.start(id, T0).unwrap();
}

#[test]
fn test_earner_session_splits_each_tick() {
    let ledger = ledger(1_000);
    let billing = MeteredBilling::new(&ledger, BillingConfig::default());
    open(&billing, "s1", SessionOwner::Earner("creator".into()));

    let first = billing.tick("s1", T0 + 150).unwrap();
    assert_eq!((first.minutes_billed, first.tokens_charged), (2, 40));
    assert_eq!(ledger.balance("creator").unwrap(), 26);
    assert_eq!(
        ledger.platform_revenue().unwrap().gross_by_context[&RevenueContext::AiSession],
        14
    );

    // Replayed tick for the same instant bills nothing.
    assert_eq!(billing.tick("s1", T0 + 150).unwrap().tokens_charged, 0);
    // A clock that reads earlier than the last tick bills nothing either.
    assert_eq!(billing.tick("s1", T0 + 100).unwrap().tokens_charged, 0);

    let end = billing.end("s1", "creator", T0 + 200).unwrap();
    assert_eq!(end.minutes_billed, 1);
    assert_eq!(end.session.total_tokens_charged, 60);
    assert_eq!(end.session.billed_minutes, 3);
    assert_eq!(end.session.status, SessionStatus::Ended);
    assert_eq!(ledger.balance("viewer").unwrap(), 940);

    let err = billing.tick("s1", T0 + 400).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidState);
    assert_eq!(ledger.balance("viewer").unwrap(), 940);
}

#[test]
fn test_final_tick_and_end_land_together() {
    let ledger = ledger(1_000);
    let billing = MeteredBilling::new(&ledger, BillingConfig::default());
    open(&billing, "s1", SessionOwner::Platform);
    let before = ledger.store().next_seq().unwrap();

    billing.end("s1", "viewer", T0 + 61).unwrap();

    let entries = ledger.store().entries_from(before).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].tx_type, TxType::Spend);
    assert_eq!(entries[0].amount_tokens, -20);
    assert_eq!(billing.get("s1").unwrap().status, SessionStatus::Ended);
    assert!(billing.end("s1", "viewer", T0 + 120).is_err());
}

#[test]
fn test_pending_session_rules() {
    let ledger = ledger(1_000);
    let billing = MeteredBilling::new(&ledger, BillingConfig::default());
    billing
        .create(Some("s1"), "viewer", SessionOwner::Platform, SessionTier::Vip, T0)
        .unwrap();

    assert!(matches!(billing.tick("s1", T0 + 60), Err(Error::InvalidState(_))));
    assert!(billing.end("s1", "viewer", T0 + 60).is_err());
    assert!(billing
        .create(Some("s1"), "viewer", SessionOwner::Platform, SessionTier::Vip, T0)
        .is_err());
    assert!(matches!(
        billing.create(Some("s2"), "viewer", SessionOwner::Earner("viewer".into()), SessionTier::Vip, T0),
        Err(Error::Validation(_))
    ));
    assert!(matches!(billing.get("nope"), Err(Error::NotFound(_))));

    let cancelled = billing.cancel("s1", "viewer", T0 + 5).unwrap();
    assert_eq!(cancelled.status, SessionStatus::Cancelled);
    assert_eq!(ledger.balance("viewer").unwrap(), 1_000);
}

#[test]
fn test_sweep_ends_only_overdue_sessions() {
    let ledger = ledger(10_000);
    let config = BillingConfig {
        max_session_secs: 30 * 60,
        ..BillingConfig::default()
    };
    let billing = MeteredBilling::new(&ledger, config);
    open(&billing, "long", SessionOwner::Platform);
    billing
        .create(Some("short"), "viewer", SessionOwner::Platform, SessionTier::Standard, T0)
        .unwrap();
    billing.start("short", T0 + 20 * 60).unwrap();

    let ended = billing.sweep(T0 + 40 * 60).unwrap();
    assert_eq!(ended, vec!["long".to_string()]);

    let long = billing.get("long").unwrap();
    assert_eq!(long.end_reason, Some(EndReason::Timeout));
    assert_eq!(long.billed_minutes, 30);
    assert!(billing.get("short").unwrap().is_active());
    assert_eq!(ledger.balance("viewer").unwrap(), 10_000 - 30 * 20);
}

#[test]
fn test_late_tick_stops_at_the_cap() {
    let ledger = ledger(10_000);
    let config = BillingConfig {
        max_session_secs: 10 * 60,
        ..BillingConfig::default()
    };
    let billing = MeteredBilling::new(&ledger, config);
    open(&billing, "late", SessionOwner::Platform);
    open(&billing, "ending", SessionOwner::Platform);

    let out = billing.tick("late", T0 + 15 * 60).unwrap();
    assert_eq!(out.minutes_billed, 10);
    assert_eq!(out.session.status, SessionStatus::Ended);
    assert_eq!(out.session.end_reason, Some(EndReason::Timeout));
    assert!(matches!(
        billing.tick("late", T0 + 16 * 60),
        Err(Error::InvalidState(_))
    ));

    let end = billing.end("ending", "viewer", T0 + 20 * 60).unwrap();
    assert_eq!(end.session.billed_minutes, 10);
    assert_eq!(end.session.end_reason, Some(EndReason::Timeout));

    assert!(billing.sweep(T0 + 30 * 60).unwrap().is_empty());
    assert_eq!(ledger.balance("viewer").unwrap(), 10_000 - 2 * 10 * 20);
}
