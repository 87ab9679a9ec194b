//! Wallet mutation primitives.
//!
//! Each function stages its changes on a [`Txn`] and never commits; callers
//! compose several of them and commit once. A primitive that fails leaves
//! nothing staged behind it: the first write happens only after every
//! check of that primitive has passed.

use crate::error::{Error, Result};
use crate::state::{RefundDecision, RevenueContext, SplitAmounts};
use crate::store::{Store, Txn};
use crate::tx::{
    validate_credit, validate_refund, validate_spend, CreditRequest, EntryMetadata, LedgerEntry,
    RefundRequest, Source, SpendRequest, TxType,
};
use tracing::{debug, warn};

/// Direction of a single wallet movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Movement {
    Credit(u64),
    Debit(u64),
}

impl Movement {
    fn signed(&self) -> i64 {
        match *self {
            Movement::Credit(n) => n as i64,
            Movement::Debit(n) => -(n as i64),
        }
    }
}

/// A staged entry and the balance it leaves behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posted {
    pub tx_id: String,
    pub balance: u64,
}

/// Apply one movement to one wallet and stage its log entry.
///
/// Lifetime counters follow the entry type: purchases, spends, earnings and
/// payouts each bump their own counter; refunds touch none.
#[allow(clippy::too_many_arguments)]
pub fn post<S: Store + ?Sized>(
    txn: &mut Txn<'_, S>,
    user_id: &str,
    tx_type: TxType,
    source: Source,
    related_id: Option<&str>,
    movement: Movement,
    context: Option<RevenueContext>,
    metadata: EntryMetadata,
) -> Result<Posted> {
    let now = txn.now();
    let mut wallet = txn.wallet(user_id)?;
    let before = wallet.balance;
    let after = match movement {
        Movement::Credit(n) => wallet.credit(n)?,
        Movement::Debit(n) => wallet.debit(n)?,
    };
    match (tx_type, movement) {
        (TxType::Purchase, Movement::Credit(n)) => wallet.record_purchase(n),
        (TxType::Spend, Movement::Debit(n)) => wallet.record_spend(n),
        (TxType::Earn, Movement::Credit(n)) => wallet.record_earning(n),
        (TxType::Payout, Movement::Debit(n)) => wallet.record_payout(n),
        _ => {}
    }
    wallet.touch(now);
    txn.put_wallet(wallet);

    let tx_id = txn.append(LedgerEntry::new(
        user_id,
        tx_type,
        source,
        related_id.map(str::to_string),
        movement.signed(),
        before,
        after,
        context,
        metadata,
        now,
    ));
    Ok(Posted {
        tx_id,
        balance: after,
    })
}

/// Result of a split spend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spent {
    pub tx_id: String,
    pub payer_balance: u64,
    pub context: RevenueContext,
    pub split: SplitAmounts,
    /// Earner share credited straight to the earner
    pub earner_credited: u64,
    /// Earner share parked in escrow instead
    pub escrowed: u64,
}

/// Debit the payer, pay the earner share out and book the platform share.
pub fn spend<S: Store + ?Sized>(txn: &mut Txn<'_, S>, req: &SpendRequest) -> Result<Spent> {
    let (mut spent, earner) = debit_payer(txn, req)?;
    if spent.split.earner > 0 {
        if let Some(earner_id) = earner {
            post(
                txn,
                &earner_id,
                TxType::Earn,
                req.source,
                req.related_id.as_deref(),
                Movement::Credit(spent.split.earner),
                Some(spent.context),
                EntryMetadata {
                    counterpart_id: Some(req.payer_id.clone()),
                    split: Some(spent.split),
                    ..EntryMetadata::default()
                },
            )?;
            spent.earner_credited = spent.split.earner;
        }
    }
    Ok(spent)
}

/// Like [`spend`], but the earner share is held in escrow until the
/// booking it pays for settles.
pub fn spend_into_escrow<S: Store + ?Sized>(
    txn: &mut Txn<'_, S>,
    req: &SpendRequest,
) -> Result<Spent> {
    let (mut spent, _) = debit_payer(txn, req)?;
    txn.hold_escrow(spent.split.earner);
    spent.escrowed = spent.split.earner;
    Ok(spent)
}

fn debit_payer<S: Store + ?Sized>(
    txn: &mut Txn<'_, S>,
    req: &SpendRequest,
) -> Result<(Spent, Option<String>)> {
    let context = validate_spend(req)?;
    let split = context.split().apply(req.amount);
    let earner = if context.is_platform_only() {
        None
    } else {
        req.earner_id.clone()
    };

    let posted = post(
        txn,
        &req.payer_id,
        TxType::Spend,
        req.source,
        req.related_id.as_deref(),
        Movement::Debit(req.amount),
        Some(context),
        EntryMetadata {
            counterpart_id: earner.clone(),
            split: Some(split),
            ..EntryMetadata::default()
        },
    )?;
    txn.credit_platform(context, split.platform);

    debug!(
        payer = %req.payer_id,
        amount = req.amount,
        context = %context,
        earner_share = split.earner,
        platform_share = split.platform,
        "spend staged"
    );

    Ok((
        Spent {
            tx_id: posted.tx_id,
            payer_balance: posted.balance,
            context,
            split,
            earner_credited: 0,
            escrowed: 0,
        },
        earner,
    ))
}

/// Plain earning, no split.
pub fn earn<S: Store + ?Sized>(txn: &mut Txn<'_, S>, req: &CreditRequest) -> Result<Posted> {
    validate_credit(req)?;
    post(
        txn,
        &req.user_id,
        TxType::Earn,
        req.source,
        req.related_id.as_deref(),
        Movement::Credit(req.amount),
        None,
        EntryMetadata::default(),
    )
}

/// Tokens bought through the payment gateway.
pub fn purchase<S: Store + ?Sized>(txn: &mut Txn<'_, S>, req: &CreditRequest) -> Result<Posted> {
    validate_credit(req)?;
    post(
        txn,
        &req.user_id,
        TxType::Purchase,
        req.source,
        req.related_id.as_deref(),
        Movement::Credit(req.amount),
        None,
        EntryMetadata::default(),
    )
}

/// Result of a ledger refund.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refunded {
    pub tx_id: String,
    pub balance: u64,
    pub earner_deducted: u64,
    pub platform_deducted: u64,
    /// The earner could not cover their share; the payer was refunded anyway
    pub clawback_skipped: bool,
}

/// Credit the payer and, when asked, reverse the original split.
///
/// The earner deduction is best effort: it is skipped when the earner's
/// balance does not cover it, and the payer is refunded regardless.
pub fn refund<S: Store + ?Sized>(txn: &mut Txn<'_, S>, req: &RefundRequest) -> Result<Refunded> {
    validate_refund(req)?;
    let posted = post(
        txn,
        &req.user_id,
        TxType::Refund,
        req.source,
        req.related_id.as_deref(),
        Movement::Credit(req.amount),
        req.context,
        EntryMetadata {
            counterpart_id: req.earner_id.clone(),
            reason: Some(req.reason.clone()),
            ..EntryMetadata::default()
        },
    )?;

    let mut out = Refunded {
        tx_id: posted.tx_id,
        balance: posted.balance,
        earner_deducted: 0,
        platform_deducted: 0,
        clawback_skipped: false,
    };

    let (true, Some(context)) = (req.refund_platform_share, req.context) else {
        return Ok(out);
    };
    let split = context.split().apply(req.amount);

    if split.earner > 0 {
        if let Some(earner_id) = req.earner_id.as_deref() {
            if txn.wallet(earner_id)?.has_sufficient_balance(split.earner) {
                post(
                    txn,
                    earner_id,
                    TxType::Refund,
                    req.source,
                    req.related_id.as_deref(),
                    Movement::Debit(split.earner),
                    Some(context),
                    EntryMetadata {
                        counterpart_id: Some(req.user_id.clone()),
                        split: Some(split),
                        reason: Some(req.reason.clone()),
                        note: Some("clawback".to_string()),
                    },
                )?;
                out.earner_deducted = split.earner;
            } else {
                warn!(
                    earner = %earner_id,
                    wanted = split.earner,
                    "earner cannot cover clawback, skipping"
                );
                out.clawback_skipped = true;
            }
        }
    }

    txn.claw_back_platform(split.platform);
    out.platform_deducted = split.platform;
    Ok(out)
}

/// Pay escrowed earner share out to the earner.
pub fn release_escrow<S: Store + ?Sized>(
    txn: &mut Txn<'_, S>,
    earner_id: &str,
    amount: u64,
    source: Source,
    related_id: &str,
    context: RevenueContext,
) -> Result<Option<Posted>> {
    if amount == 0 {
        return Ok(None);
    }
    let posted = post(
        txn,
        earner_id,
        TxType::Earn,
        source,
        Some(related_id),
        Movement::Credit(amount),
        Some(context),
        EntryMetadata {
            note: Some("escrow release".to_string()),
            ..EntryMetadata::default()
        },
    )?;
    txn.release_escrow(amount);
    Ok(Some(posted))
}

/// Refund a payer out of escrow (earner part) and platform revenue
/// (platform part), as laid out by `decision` against `split`.
#[allow(clippy::too_many_arguments)]
pub fn refund_from_escrow<S: Store + ?Sized>(
    txn: &mut Txn<'_, S>,
    payer_id: &str,
    earner_id: &str,
    decision: &RefundDecision,
    split: &SplitAmounts,
    source: Source,
    related_id: &str,
    context: RevenueContext,
) -> Result<Option<Posted>> {
    if decision.is_empty() {
        return Ok(None);
    }
    let from_earner = decision.from_earner_share(split);
    let from_platform = decision.from_platform_share(split);
    if from_platform > split.platform {
        return Err(Error::InvalidState(format!(
            "Refund of {} exceeds the price paid for {}",
            decision.amount, related_id
        )));
    }

    let posted = post(
        txn,
        payer_id,
        TxType::Refund,
        source,
        Some(related_id),
        Movement::Credit(decision.amount),
        Some(context),
        EntryMetadata {
            counterpart_id: Some(earner_id.to_string()),
            split: Some(SplitAmounts {
                earner: from_earner,
                platform: from_platform,
            }),
            reason: Some(decision.reason.as_str().to_string()),
            note: None,
        },
    )?;
    txn.refund_escrow(from_earner);
    txn.claw_back_platform(from_platform);
    Ok(Some(posted))
}

/// Move `amount` from the earner's wallet back to the payer. Both sides
/// are staged together; an earner who cannot cover it fails the whole
/// transfer with `InsufficientFunds`.
pub fn goodwill_transfer<S: Store + ?Sized>(
    txn: &mut Txn<'_, S>,
    earner_id: &str,
    payer_id: &str,
    amount: u64,
    source: Source,
    related_id: &str,
) -> Result<Posted> {
    let metadata = |counterpart: &str| EntryMetadata {
        counterpart_id: Some(counterpart.to_string()),
        reason: Some("GOODWILL".to_string()),
        ..EntryMetadata::default()
    };
    post(
        txn,
        earner_id,
        TxType::Refund,
        source,
        Some(related_id),
        Movement::Debit(amount),
        None,
        metadata(payer_id),
    )?;
    post(
        txn,
        payer_id,
        TxType::Refund,
        source,
        Some(related_id),
        Movement::Credit(amount),
        None,
        metadata(earner_id),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::refund::{earner_cancellation, payer_cancellation, RefundReason};
    use crate::store::{MemoryStore, Store};

    fn funded(store: &MemoryStore, user: &str, amount: u64) {
        let mut txn = Txn::new(store, 0);
        purchase(&mut txn, &CreditRequest::new(user, amount, Source::TokenPurchase)).unwrap();
        store.commit(txn.into_changes()).unwrap();
    }

    #[test]
    fn test_spend_splits_and_logs_both_sides() {
        let store = MemoryStore::new();
        funded(&store, "alice", 100);

        let mut txn = Txn::new(&store, 1);
        let req = SpendRequest::new("alice", 100, Source::Chat, RevenueContext::ChatPaid).earner("bob");
        let spent = spend(&mut txn, &req).unwrap();
        assert_eq!(spent.split, SplitAmounts { earner: 65, platform: 35 });
        assert_eq!(spent.payer_balance, 0);
        assert_eq!(txn.entries().len(), 2);
        assert_eq!(txn.entries()[0].amount_tokens, -100);
        assert_eq!(txn.entries()[1].amount_tokens, 65);
        store.commit(txn.into_changes()).unwrap();

        let state = store.snapshot().unwrap();
        assert_eq!(state.wallets["bob"].balance, 65);
        assert_eq!(state.wallets["bob"].lifetime_earned, 65);
        assert_eq!(state.wallets["alice"].lifetime_spent, 100);
        assert_eq!(state.platform_revenue.gross, 35);
    }

    #[test]
    fn test_failed_spend_stages_nothing() {
        let store = MemoryStore::new();
        funded(&store, "alice", 10);
        let mut txn = Txn::new(&store, 1);
        let req = SpendRequest::new("alice", 11, Source::Tip, RevenueContext::Tip).earner("bob");
        assert!(matches!(
            spend(&mut txn, &req),
            Err(Error::InsufficientFunds { available: 10, required: 11 })
        ));
        let changes = txn.into_changes();
        assert!(changes.writes.is_empty());
        assert!(changes.entries.is_empty());
        assert!(changes.counters.is_empty());
    }

    #[test]
    fn test_spend_into_escrow_holds_earner_share() {
        let store = MemoryStore::new();
        funded(&store, "alice", 1000);
        let mut txn = Txn::new(&store, 1);
        let req = SpendRequest::new("alice", 1000, Source::Calendar, RevenueContext::CalendarBooking)
            .earner("bob");
        let spent = spend_into_escrow(&mut txn, &req).unwrap();
        assert_eq!(spent.escrowed, 800);
        assert_eq!(txn.entries().len(), 1);
        store.commit(txn.into_changes()).unwrap();
        assert_eq!(store.escrow().unwrap().held, 800);
        assert_eq!(store.platform_revenue().unwrap().gross, 200);
    }

    #[test]
    fn test_refund_clawback_best_effort() {
        let store = MemoryStore::new();
        funded(&store, "bob", 10);
        let mut txn = Txn::new(&store, 1);
        let req = RefundRequest::new("alice", 100, Source::Chat, "dispute")
            .clawback(RevenueContext::ChatPaid, "bob");
        let out = refund(&mut txn, &req).unwrap();
        assert!(out.clawback_skipped);
        assert_eq!(out.earner_deducted, 0);
        assert_eq!(out.platform_deducted, 35);
        assert_eq!(out.balance, 100);
        store.commit(txn.into_changes()).unwrap();
        assert_eq!(store.snapshot().unwrap().wallets["bob"].balance, 10);
        assert_eq!(store.platform_revenue().unwrap().clawed_back, 35);
    }

    #[test]
    fn test_refund_from_escrow_payer_and_earner_side() {
        let split = SplitAmounts { earner: 800, platform: 200 };

        let store = MemoryStore::new();
        let mut txn = Txn::new(&store, 0);
        txn.hold_escrow(800);
        let decision = payer_cancellation(800, 30 * 3600);
        refund_from_escrow(&mut txn, "alice", "bob", &decision, &split, Source::Calendar, "b1", RevenueContext::CalendarBooking)
            .unwrap();
        store.commit(txn.into_changes()).unwrap();
        assert_eq!(store.escrow().unwrap().held, 400);
        assert_eq!(store.platform_revenue().unwrap().clawed_back, 0);

        let store = MemoryStore::new();
        let mut txn = Txn::new(&store, 0);
        txn.hold_escrow(800);
        let decision = earner_cancellation(1000, RefundReason::EarnerCancelled);
        let posted = refund_from_escrow(&mut txn, "alice", "bob", &decision, &split, Source::Calendar, "b1", RevenueContext::CalendarBooking)
            .unwrap()
            .unwrap();
        assert_eq!(posted.balance, 1000);
        store.commit(txn.into_changes()).unwrap();
        assert_eq!(store.escrow().unwrap().held, 0);
        assert_eq!(store.platform_revenue().unwrap().clawed_back, 200);
    }

    #[test]
    fn test_goodwill_requires_earner_funds() {
        let store = MemoryStore::new();
        funded(&store, "bob", 100);
        let mut txn = Txn::new(&store, 1);
        assert!(goodwill_transfer(&mut txn, "bob", "alice", 101, Source::Calendar, "b1").is_err());
        assert!(txn.into_changes().writes.is_empty());

        let mut txn = Txn::new(&store, 1);
        let posted = goodwill_transfer(&mut txn, "bob", "alice", 60, Source::Calendar, "b1").unwrap();
        assert_eq!(posted.balance, 60);
        store.commit(txn.into_changes()).unwrap();
        assert_eq!(store.snapshot().unwrap().wallets["bob"].balance, 40);
    }
}
