use proptest::prelude::*;
use token_ledger::audit::verify_chain;
use token_ledger::ledger::Ledger;
use token_ledger::payout::Eligibility;
use token_ledger::replay;
use token_ledger::state::refund::payer_refund_bps;
use token_ledger::state::RevenueContext;
use token_ledger::store::{MemoryStore, Store};
use token_ledger::tx::{CreditRequest, RefundRequest, Source, SpendRequest};

const USERS: [&str; 4] = ["ana", "ben", "cy", "dee"];

#[derive(Debug, Clone)]
enum Op {
    Purchase { user: usize, amount: u64 },
    Spend { payer: usize, earner: usize, amount: u64, context: usize },
    Refund { payer: usize, earner: usize, amount: u64, context: usize },
    CashOut { user: usize, amount: u64 },
}

fn op() -> impl Strategy<Value = Op> {
    let user = 0..USERS.len();
    let context = 0..RevenueContext::ALL.len();
    prop_oneof![
        (user.clone(), 1u64..500).prop_map(|(user, amount)| Op::Purchase { user, amount }),
        (user.clone(), user.clone(), 1u64..400, context.clone()).prop_map(
            |(payer, earner, amount, context)| Op::Spend { payer, earner, amount, context }
        ),
        (user.clone(), user.clone(), 1u64..200, context).prop_map(
            |(payer, earner, amount, context)| Op::Refund { payer, earner, amount, context }
        ),
        (user, 1u64..200).prop_map(|(user, amount)| Op::CashOut { user, amount }),
    ]
}

/// Tokens that entered through purchases or unbacked refunds, minus payouts.
#[derive(Default)]
struct Books {
    inflow: i128,
}

fn tokens_inside(ledger: &Ledger<MemoryStore>) -> i128 {
    let state = ledger.store().snapshot().unwrap();
    state.total_balances() as i128 + state.escrow.held as i128 + state.platform_revenue.net()
}

fn apply(ledger: &Ledger<MemoryStore>, books: &mut Books, op: &Op, now: u64) {
    match *op {
        Op::Purchase { user, amount } => {
            if ledger
                .purchase_at(&CreditRequest::new(USERS[user], amount, Source::TokenPurchase), now)
                .is_ok()
            {
                books.inflow += amount as i128;
            }
        }
        Op::Spend { payer, earner, amount, context } => {
            let ctx = RevenueContext::ALL[context];
            let req = SpendRequest::new(USERS[payer], amount, Source::Chat, ctx).earner(USERS[earner]);
            let _ = ledger.spend_at(&req, now);
        }
        Op::Refund { payer, earner, amount, context } => {
            let ctx = RevenueContext::ALL[context];
            let req = RefundRequest::new(USERS[payer], amount, Source::Chat, "property")
                .clawback(ctx, USERS[earner]);
            if let Ok(receipt) = ledger.refund_at(&req, now) {
                // The payer is made whole; whatever the earner and platform
                // did not give back is new money.
                books.inflow += amount as i128
                    - receipt.earner_deducted as i128
                    - receipt.platform_deducted as i128;
            }
        }
        Op::CashOut { user, amount } => {
            if ledger
                .cash_out_at(USERS[user], amount, &Eligibility::verified(), now)
                .is_ok()
            {
                books.inflow -= amount as i128;
            }
        }
    }
}

proptest! {
    /// Every token is accounted for after any sequence of operations, and
    /// failed operations change nothing.
    #[test]
    fn tokens_are_conserved(ops in prop::collection::vec(op(), 1..60)) {
        let ledger = Ledger::in_memory();
        let mut books = Books::default();

        for (i, op) in ops.iter().enumerate() {
            let before = ledger.store().snapshot().unwrap();
            let seq_before = ledger.store().next_seq().unwrap();
            let inflow_before = books.inflow;

            apply(&ledger, &mut books, op, i as u64 + 1);

            if books.inflow == inflow_before && ledger.store().next_seq().unwrap() == seq_before {
                prop_assert_eq!(&ledger.store().snapshot().unwrap(), &before);
            }
            prop_assert_eq!(tokens_inside(&ledger), books.inflow);
        }

        let entries = ledger.store().entries_from(0).unwrap();
        prop_assert!(verify_chain(&entries).is_ok());
        prop_assert!(replay::verify(&ledger.store().snapshot().unwrap(), &entries).is_ok());
    }

    /// Earned-but-unpaid tokens never exceed what was credited as earnings.
    #[test]
    fn withdrawable_is_bounded(ops in prop::collection::vec(op(), 1..40)) {
        let ledger = Ledger::in_memory();
        let mut books = Books::default();
        for (i, op) in ops.iter().enumerate() {
            apply(&ledger, &mut books, op, i as u64 + 1);
        }
        for user in USERS {
            if let Some(w) = ledger.wallet(user).unwrap() {
                prop_assert!(w.withdrawable() <= w.balance);
                prop_assert!(w.lifetime_paid_out <= w.lifetime_earned);
            }
        }
    }

    #[test]
    fn payer_refund_never_grows_closer_to_start(a in -1_000_000i64..1_000_000, b in -1_000_000i64..1_000_000) {
        let (near, far) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(payer_refund_bps(near) <= payer_refund_bps(far));
    }

    #[test]
    fn split_is_exact(amount in 1u64..u64::MAX / 2, idx in 0..RevenueContext::ALL.len()) {
        let ctx = RevenueContext::ALL[idx];
        let split = ctx.split().apply(amount);
        prop_assert_eq!(split.earner + split.platform, amount);
        prop_assert_eq!(
            split.earner as u128,
            amount as u128 * ctx.split().earner_bps as u128 / 10_000
        );
    }
}
