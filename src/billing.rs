//! Per-minute billing of AI video sessions.
//!
//! The loop is driven from outside: whoever owns the clock calls `tick`
//! (and `sweep`) periodically. A tick bills only whole minutes not billed
//! yet, so repeating it within the same minute charges nothing.

use crate::config::BillingConfig;
use crate::error::{Error, Result};
use crate::ledger::ops;
use crate::ledger::Ledger;
use crate::state::session::SECS_PER_MINUTE;
use crate::state::{EndReason, Session, SessionOwner, SessionStatus, SessionTier};
use crate::store::{Key, KeyKind, Record, Store, Txn};
use crate::tx::{validate_user_id, Source, SpendRequest};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// What one billing pass did to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickOutcome {
    pub session: Session,
    pub minutes_billed: u64,
    pub tokens_charged: u64,
}

pub struct MeteredBilling<'a, S: Store> {
    ledger: &'a Ledger<S>,
    config: BillingConfig,
}

impl<'a, S: Store> MeteredBilling<'a, S> {
    pub fn new(ledger: &'a Ledger<S>, config: BillingConfig) -> Self {
        MeteredBilling { ledger, config }
    }

    /// Open a session. The per-minute price is fixed here from the tier.
    pub fn create(
        &self,
        session_id: Option<&str>,
        payer_id: &str,
        owner: SessionOwner,
        tier: SessionTier,
        now: u64,
    ) -> Result<Session> {
        validate_user_id(payer_id)?;
        if let Some(earner) = owner.earner_id() {
            validate_user_id(earner)?;
            if earner == payer_id {
                return Err(Error::Validation(format!(
                    "{} cannot bill a session to themselves",
                    payer_id
                )));
            }
        }
        let price = tier.price_per_minute(&self.config);
        if price == 0 {
            return Err(Error::Validation(format!("{:?} tier has no price", tier)));
        }
        let session_id = session_id
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let session = self.ledger.run("session.create", now, |txn| {
            let session = Session::pending(
                session_id.clone(),
                payer_id.to_string(),
                owner.clone(),
                tier,
                price,
                now,
            );
            txn.insert_session(session.clone())?;
            Ok(session)
        })?;
        info!(session = %session.session_id, payer = %payer_id, ?tier, price, "session created");
        Ok(session)
    }

    /// Start the clock. The payer must afford at least one minute.
    pub fn start(&self, session_id: &str, now: u64) -> Result<Session> {
        let session = self.ledger.run("session.start", now, |txn| {
            let mut session = txn.session(session_id)?;
            session.require_status(SessionStatus::Pending)?;
            let wallet = txn.wallet(&session.payer_id)?;
            if !wallet.has_sufficient_balance(session.price_per_minute) {
                return Err(Error::InsufficientFunds {
                    available: wallet.balance,
                    required: session.price_per_minute,
                });
            }
            session.start(now)?;
            txn.put_session(session.clone());
            Ok(session)
        })?;
        info!(session = %session_id, "session started");
        Ok(session)
    }

    /// Moment a session hits the maximum duration, if it has started.
    fn timeout_at(&self, session: &Session) -> Option<u64> {
        session
            .started_at
            .map(|started_at| started_at.saturating_add(self.config.max_session_secs))
    }

    /// Bill the minutes elapsed since the last tick. A payer who can no
    /// longer pay ends the session instead of failing the tick. Past the
    /// maximum duration the tick bills up to the cap and times it out.
    pub fn tick(&self, session_id: &str, now: u64) -> Result<TickOutcome> {
        let outcome = self.ledger.run("session.tick", now, |txn| {
            let mut session = txn.session(session_id)?;
            session.require_status(SessionStatus::Active)?;
            if let Some(cap) = self.timeout_at(&session).filter(|cap| now >= *cap) {
                return finish(txn, &mut session, cap, EndReason::Timeout);
            }
            let (minutes, tokens) = bill(txn, &mut session, now)?;
            txn.put_session(session.clone());
            Ok(TickOutcome {
                session,
                minutes_billed: minutes,
                tokens_charged: tokens,
            })
        })?;
        log_tick(&outcome);
        if outcome.session.end_reason == Some(EndReason::Timeout) {
            warn!(
                session = %session_id,
                total = outcome.session.total_tokens_charged,
                "session timed out"
            );
        }
        Ok(outcome)
    }

    /// End a session on behalf of one of its parties. The final tick and
    /// the transition commit together.
    pub fn end(&self, session_id: &str, user_id: &str, now: u64) -> Result<TickOutcome> {
        let outcome = self.ledger.run("session.end", now, |txn| {
            let mut session = txn.session(session_id)?;
            if !session.is_party(user_id) {
                return Err(Error::Unauthorized(format!(
                    "{} is not a party of session {}",
                    user_id, session_id
                )));
            }
            match self.timeout_at(&session).filter(|cap| now >= *cap) {
                Some(cap) => finish(txn, &mut session, cap, EndReason::Timeout),
                None => finish(txn, &mut session, now, EndReason::UserEnded),
            }
        })?;
        log_tick(&outcome);
        info!(
            session = %session_id,
            total = outcome.session.total_tokens_charged,
            reason = ?outcome.session.end_reason,
            "session ended"
        );
        Ok(outcome)
    }

    /// Cancel a session that never started. Nothing is charged.
    pub fn cancel(&self, session_id: &str, user_id: &str, now: u64) -> Result<Session> {
        self.ledger.run("session.cancel", now, |txn| {
            let mut session = txn.session(session_id)?;
            if !session.is_party(user_id) {
                return Err(Error::Unauthorized(format!(
                    "{} is not a party of session {}",
                    user_id, session_id
                )));
            }
            session.cancel(now)?;
            txn.put_session(session.clone());
            Ok(session)
        })
    }

    /// End every active session that ran past the maximum duration. Billing
    /// stops at the cap, not at `now`. Returns the ended ids.
    pub fn sweep(&self, now: u64) -> Result<Vec<String>> {
        let max = self.config.max_session_secs;
        let mut ended = Vec::new();
        for key in self.ledger.store().keys(KeyKind::Session)? {
            let Some(Record::Session(s)) = self.ledger.store().get(&key)?.map(|v| v.record) else {
                continue;
            };
            let Some(started_at) = s.started_at else {
                continue;
            };
            let cap = started_at.saturating_add(max);
            if !s.is_active() || now < cap {
                continue;
            }
            let result = self.ledger.run("session.sweep", now, |txn| {
                let mut session = txn.session(key.id())?;
                finish(txn, &mut session, cap, EndReason::Timeout)
            });
            match result {
                Ok(outcome) => {
                    warn!(
                        session = %key.id(),
                        total = outcome.session.total_tokens_charged,
                        "session timed out"
                    );
                    ended.push(key.id().to_string());
                }
                Err(Error::InvalidState(msg)) => {
                    debug!(session = %key.id(), %msg, "skipped by sweep");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(ended)
    }

    pub fn get(&self, session_id: &str) -> Result<Session> {
        match self
            .ledger
            .store()
            .get(&Key::Session(session_id.to_string()))?
        {
            Some(v) => match v.record {
                Record::Session(s) => Ok(s),
                other => Err(Error::Storage(format!(
                    "Expected session record, found {:?}",
                    other
                ))),
            },
            None => Err(Error::NotFound(format!("Session {}", session_id))),
        }
    }
}

/// Final tick then end with `reason`, unless billing already ended it.
fn finish<S: Store + ?Sized>(
    txn: &mut Txn<'_, S>,
    session: &mut Session,
    bill_until: u64,
    reason: EndReason,
) -> Result<TickOutcome> {
    session.require_status(SessionStatus::Active)?;
    let (minutes, tokens) = bill(txn, session, bill_until)?;
    if session.is_active() {
        session.end(reason, txn.now())?;
    }
    txn.put_session(session.clone());
    Ok(TickOutcome {
        session: session.clone(),
        minutes_billed: minutes,
        tokens_charged: tokens,
    })
}

/// Charge the whole minutes due at `until`. On insufficient funds the
/// session is ended in place and nothing is charged.
fn bill<S: Store + ?Sized>(
    txn: &mut Txn<'_, S>,
    session: &mut Session,
    until: u64,
) -> Result<(u64, u64)> {
    let minutes = session.minutes_due(until);
    if minutes == 0 {
        return Ok((0, 0));
    }
    let tokens = minutes.checked_mul(session.price_per_minute).ok_or_else(|| {
        Error::Validation(format!(
            "Charge for {} minutes overflows",
            minutes
        ))
    })?;

    let mut req = SpendRequest::new(
        &session.payer_id,
        tokens,
        Source::AiSession,
        session.owner.context(),
    )
    .related(&session.session_id);
    if let Some(earner) = session.owner.earner_id() {
        req = req.earner(earner);
    }

    match ops::spend(txn, &req) {
        Ok(_) => {
            session.record_billing(minutes, tokens);
            Ok((minutes, tokens))
        }
        Err(Error::InsufficientFunds { available, required }) => {
            warn!(
                session = %session.session_id,
                available,
                required,
                "payer out of tokens, ending session"
            );
            session.end(EndReason::InsufficientTokens, txn.now())?;
            Ok((0, 0))
        }
        Err(e) => Err(e),
    }
}

fn log_tick(outcome: &TickOutcome) {
    if outcome.tokens_charged > 0 {
        debug!(
            session = %outcome.session.session_id,
            minutes = outcome.minutes_billed,
            tokens = outcome.tokens_charged,
            billed_total = outcome.session.billed_minutes,
            "billed"
        );
    }
}

/// Minutes a session has been running, for display.
pub fn elapsed_minutes(session: &Session, now: u64) -> u64 {
    session
        .started_at
        .map(|s| now.saturating_sub(s) / SECS_PER_MINUTE)
        .unwrap_or(0)
}
