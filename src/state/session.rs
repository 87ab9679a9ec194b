use crate::config::BillingConfig;
use crate::error::{Error, Result};
use crate::state::policy::RevenueContext;
use serde::{Deserialize, Serialize};

pub const SECS_PER_MINUTE: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionTier {
    Standard,
    /// Discounted per-minute price
    Vip,
}

impl SessionTier {
    pub fn price_per_minute(&self, billing: &BillingConfig) -> u64 {
        match self {
            SessionTier::Standard => billing.standard_price_per_minute,
            SessionTier::Vip => billing.vip_price_per_minute,
        }
    }
}

impl std::str::FromStr for SessionTier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(SessionTier::Standard),
            "vip" => Ok(SessionTier::Vip),
            other => Err(Error::Validation(format!("Unknown session tier: {}", other))),
        }
    }
}

/// Who receives the earner share of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionOwner {
    Earner(String),
    Platform,
}

impl SessionOwner {
    pub fn context(&self) -> RevenueContext {
        match self {
            SessionOwner::Earner(_) => RevenueContext::AiSession,
            SessionOwner::Platform => RevenueContext::PlatformOnlyVideo,
        }
    }

    pub fn earner_id(&self) -> Option<&str> {
        match self {
            SessionOwner::Earner(id) => Some(id),
            SessionOwner::Platform => None,
        }
    }
}

/// Session lifecycle: Pending -> Active -> Ended; Pending -> Cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Pending,
    Active,
    Ended,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndReason {
    UserEnded,
    Timeout,
    InsufficientTokens,
}

/// Metered AI video session.
///
/// Invariants:
/// - `billed_minutes` and `total_tokens_charged` are monotonic
/// - Only whole elapsed minutes are ever billed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub payer_id: String,
    pub owner: SessionOwner,
    pub tier: SessionTier,
    /// Fixed when the session is created
    pub price_per_minute: u64,
    pub billed_minutes: u64,
    pub total_tokens_charged: u64,
    pub status: SessionStatus,
    pub created_at: u64,
    pub started_at: Option<u64>,
    pub ended_at: Option<u64>,
    pub end_reason: Option<EndReason>,
}

impl Session {
    pub fn pending(
        session_id: String,
        payer_id: String,
        owner: SessionOwner,
        tier: SessionTier,
        price_per_minute: u64,
        now: u64,
    ) -> Self {
        Session {
            session_id,
            payer_id,
            owner,
            tier,
            price_per_minute,
            billed_minutes: 0,
            total_tokens_charged: 0,
            status: SessionStatus::Pending,
            created_at: now,
            started_at: None,
            ended_at: None,
            end_reason: None,
        }
    }

    pub fn require_status(&self, expected: SessionStatus) -> Result<()> {
        if self.status != expected {
            return Err(Error::InvalidState(format!(
                "Session {} is {:?}, expected {:?}",
                self.session_id, self.status, expected
            )));
        }
        Ok(())
    }

    pub fn start(&mut self, now: u64) -> Result<()> {
        self.require_status(SessionStatus::Pending)?;
        self.status = SessionStatus::Active;
        self.started_at = Some(now);
        Ok(())
    }

    pub fn cancel(&mut self, now: u64) -> Result<()> {
        self.require_status(SessionStatus::Pending)?;
        self.status = SessionStatus::Cancelled;
        self.ended_at = Some(now);
        Ok(())
    }

    pub fn end(&mut self, reason: EndReason, now: u64) -> Result<()> {
        self.require_status(SessionStatus::Active)?;
        self.status = SessionStatus::Ended;
        self.ended_at = Some(now);
        self.end_reason = Some(reason);
        Ok(())
    }

    /// Whole minutes elapsed since start and not billed yet. Zero before start
    /// or if the clock reads earlier than the start.
    pub fn minutes_due(&self, now: u64) -> u64 {
        let Some(started_at) = self.started_at else {
            return 0;
        };
        let elapsed = now.saturating_sub(started_at) / SECS_PER_MINUTE;
        elapsed.saturating_sub(self.billed_minutes)
    }

    /// Record a successful charge (monotonic).
    pub fn record_billing(&mut self, minutes: u64, tokens: u64) {
        self.billed_minutes = self.billed_minutes.saturating_add(minutes);
        self.total_tokens_charged = self.total_tokens_charged.saturating_add(tokens);
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    pub fn is_party(&self, user_id: &str) -> bool {
        self.payer_id == user_id || self.owner.earner_id() == Some(user_id)
    }
}
