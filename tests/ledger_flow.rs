use token_ledger::audit::verify_chain;
use token_ledger::error::{Error, ErrorCode};
use token_ledger::ledger::{ApiResponse, Ledger};
use token_ledger::payout::Eligibility;
use token_ledger::state::RevenueContext;
use token_ledger::store::{MemoryStore, Store};
use token_ledger::tx::{CreditRequest, RefundRequest, Source, SpendRequest, TxType};

fn funded(user: &str, amount: u64) -> Ledger<MemoryStore> {
    let ledger = Ledger::in_memory();
    ledger
        .purchase_at(&CreditRequest::new(user, amount, Source::TokenPurchase), 1)
        .unwrap();
    ledger
}

#[test]
fn test_chat_spend_floors_earner_share() {
    let ledger = funded("alice", 1_000);
    let receipt = ledger
        .spend_at(
            &SpendRequest::new("alice", 101, Source::Chat, RevenueContext::ChatPaid).earner("bob"),
            2,
        )
        .unwrap();

    assert_eq!(receipt.new_balance, 899);
    assert_eq!(receipt.earner_earned, 65);
    assert_eq!(receipt.platform_share, 36);
    assert_eq!(ledger.balance("bob").unwrap(), 65);

    let revenue = ledger.platform_revenue().unwrap();
    assert_eq!(revenue.gross, 36);
    assert_eq!(revenue.gross_by_context[&RevenueContext::ChatPaid], 36);
}

#[test]
fn test_each_policy_row() {
    let cases = [
        (RevenueContext::VoiceCall, 65, 35),
        (RevenueContext::CalendarBooking, 80, 20),
        (RevenueContext::EventTicket, 80, 20),
        (RevenueContext::Tip, 90, 10),
    ];
    for (context, earner, platform) in cases {
        let ledger = funded("alice", 100);
        let receipt = ledger
            .spend_at(
                &SpendRequest::new("alice", 100, Source::Tip, context).earner("bob"),
                2,
            )
            .unwrap();
        assert_eq!(receipt.earner_earned, earner, "{}", context);
        assert_eq!(receipt.platform_share, platform, "{}", context);
    }
}

#[test]
fn test_platform_only_needs_no_earner() {
    let ledger = funded("alice", 100);
    let mut req = SpendRequest::new("alice", 40, Source::AdsCampaign, RevenueContext::PlatformOnlyVideo);
    req.earner_id = Some("bob".into());
    let receipt = ledger.spend_at(&req, 2).unwrap();
    assert_eq!(receipt.earner_earned, 0);
    assert_eq!(receipt.platform_share, 40);
    assert_eq!(ledger.balance("bob").unwrap(), 0);
}

#[test]
fn test_source_implies_context() {
    let ledger = funded("alice", 100);
    let req = SpendRequest {
        payer_id: "alice".into(),
        amount: 10,
        source: Source::Tip,
        related_id: None,
        context: None,
        earner_id: Some("bob".into()),
    };
    let receipt = ledger.spend_at(&req, 2).unwrap();
    assert_eq!(receipt.context, RevenueContext::Tip);
    assert_eq!(receipt.earner_earned, 9);
}

#[test]
fn test_unknown_context_rejected() {
    let parsed = "mystery-box".parse::<RevenueContext>();
    assert!(matches!(parsed, Err(Error::UnknownContext(_))));
    assert_eq!(parsed.unwrap_err().code(), ErrorCode::Validation);
}

#[test]
fn test_insufficient_funds_leaves_everything_untouched() {
    let ledger = funded("alice", 50);
    let before = ledger.store().next_seq().unwrap();
    let err = ledger
        .spend_at(
            &SpendRequest::new("alice", 51, Source::Chat, RevenueContext::ChatPaid).earner("bob"),
            2,
        )
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InsufficientFunds);
    assert_eq!(ledger.balance("alice").unwrap(), 50);
    assert!(ledger.wallet("bob").unwrap().is_none());
    assert_eq!(ledger.store().next_seq().unwrap(), before);

    let json = serde_json::to_value(ApiResponse::<()>::err(&err)).unwrap();
    assert_eq!(json["success"], false);
    assert_eq!(json["error"]["code"], "INSUFFICIENT_FUNDS");
}

#[test]
fn test_refund_with_full_clawback() {
    let ledger = funded("alice", 1_000);
    ledger
        .spend_at(
            &SpendRequest::new("alice", 100, Source::VideoCall, RevenueContext::VideoCall)
                .earner("bob")
                .related("call-7"),
            2,
        )
        .unwrap();

    let receipt = ledger
        .refund_at(
            &RefundRequest::new("alice", 100, Source::VideoCall, "call dropped")
                .clawback(RevenueContext::VideoCall, "bob")
                .related("call-7"),
            3,
        )
        .unwrap();
    assert_eq!(receipt.new_balance, 1_000);
    assert_eq!(receipt.earner_deducted, 65);
    assert_eq!(receipt.platform_deducted, 35);
    assert!(!receipt.clawback_skipped);
    assert_eq!(ledger.balance("bob").unwrap(), 0);
    assert_eq!(ledger.platform_revenue().unwrap().net(), 0);
}

#[test]
fn test_clawback_skipped_when_earner_spent_it() {
    let ledger = funded("alice", 1_000);
    ledger
        .spend_at(
            &SpendRequest::new("alice", 100, Source::Chat, RevenueContext::ChatPaid).earner("bob"),
            2,
        )
        .unwrap();
    ledger
        .spend_at(
            &SpendRequest::new("bob", 60, Source::AdsCampaign, RevenueContext::PlatformOnlyRevenue),
            3,
        )
        .unwrap();

    let receipt = ledger
        .refund_at(
            &RefundRequest::new("alice", 100, Source::Chat, "abuse report")
                .clawback(RevenueContext::ChatPaid, "bob"),
            4,
        )
        .unwrap();
    assert!(receipt.clawback_skipped);
    assert_eq!(receipt.earner_deducted, 0);
    assert_eq!(receipt.new_balance, 1_000);
    assert_eq!(ledger.balance("bob").unwrap(), 5);
    assert_eq!(ledger.platform_revenue().unwrap().net(), 60);
}

#[test]
fn test_history_and_chain() {
    let ledger = funded("alice", 500);
    for t in 2..5 {
        ledger
            .spend_at(
                &SpendRequest::new("alice", 10, Source::Tip, RevenueContext::Tip).earner("bob"),
                t,
            )
            .unwrap();
    }

    let history = ledger.history("alice", 0, u64::MAX).unwrap();
    assert_eq!(history.len(), 4);
    assert_eq!(history[0].tx_type, TxType::Purchase);
    assert!(history[1..].iter().all(|e| e.tx_type == TxType::Spend));
    assert_eq!(history.last().unwrap().after_balance, 470);
    assert_eq!(ledger.history("alice", 3, 3).unwrap().len(), 1);
    assert!(matches!(
        ledger.history("alice", 5, 1),
        Err(Error::Validation(_))
    ));

    verify_chain(&ledger.store().entries_from(0).unwrap()).unwrap();
}

#[test]
fn test_cash_out_only_earned_tokens() {
    let ledger = funded("alice", 1_000);
    ledger
        .purchase_at(&CreditRequest::new("bob", 500, Source::TokenPurchase), 1)
        .unwrap();
    ledger
        .spend_at(
            &SpendRequest::new("alice", 200, Source::Tip, RevenueContext::Tip).earner("bob"),
            2,
        )
        .unwrap();

    let err = ledger
        .cash_out_at("bob", 181, &Eligibility::verified(), 3)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InsufficientFunds);

    let receipt = ledger.cash_out_at("bob", 180, &Eligibility::verified(), 3).unwrap();
    assert_eq!(receipt.new_balance, 500);
    assert_eq!(ledger.wallet("bob").unwrap().unwrap().lifetime_paid_out, 180);

    let unverified = Eligibility {
        identity_verified: false,
        tax_profile_complete: true,
    };
    assert_eq!(
        ledger.cash_out_at("bob", 1, &unverified, 4).unwrap_err().code(),
        ErrorCode::Unauthorized
    );
}
