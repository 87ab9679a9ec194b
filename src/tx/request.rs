use crate::state::policy::RevenueContext;
use crate::tx::Source;
use serde::{Deserialize, Serialize};

/// Paid movement from a payer, split between an optional earner and the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendRequest {
    pub payer_id: String,
    pub amount: u64,
    pub source: Source,
    pub related_id: Option<String>,
    /// Falls back to `source.default_context()` when absent
    pub context: Option<RevenueContext>,
    pub earner_id: Option<String>,
}

impl SpendRequest {
    pub fn new(payer_id: &str, amount: u64, source: Source, context: RevenueContext) -> Self {
        SpendRequest {
            payer_id: payer_id.to_string(),
            amount,
            source,
            related_id: None,
            context: Some(context),
            earner_id: None,
        }
    }

    pub fn earner(mut self, earner_id: &str) -> Self {
        self.earner_id = Some(earner_id.to_string());
        self
    }

    pub fn related(mut self, related_id: &str) -> Self {
        self.related_id = Some(related_id.to_string());
        self
    }
}

/// Direct credit without split (bonus, promo grant, payout release).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditRequest {
    pub user_id: String,
    pub amount: u64,
    pub source: Source,
    pub related_id: Option<String>,
}

impl CreditRequest {
    pub fn new(user_id: &str, amount: u64, source: Source) -> Self {
        CreditRequest {
            user_id: user_id.to_string(),
            amount,
            source,
            related_id: None,
        }
    }

    pub fn related(mut self, related_id: &str) -> Self {
        self.related_id = Some(related_id.to_string());
        self
    }
}

/// Compensating credit to `user_id`, optionally reclaiming the split that
/// the original spend paid out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundRequest {
    pub user_id: String,
    pub amount: u64,
    pub source: Source,
    pub related_id: Option<String>,
    pub reason: String,
    pub context: Option<RevenueContext>,
    pub refund_platform_share: bool,
    pub earner_id: Option<String>,
}

impl RefundRequest {
    pub fn new(user_id: &str, amount: u64, source: Source, reason: &str) -> Self {
        RefundRequest {
            user_id: user_id.to_string(),
            amount,
            source,
            related_id: None,
            reason: reason.to_string(),
            context: None,
            refund_platform_share: false,
            earner_id: None,
        }
    }

    /// Claw back the earner and platform shares of `context`.
    pub fn clawback(mut self, context: RevenueContext, earner_id: &str) -> Self {
        self.context = Some(context);
        self.earner_id = Some(earner_id.to_string());
        self.refund_platform_share = true;
        self
    }

    pub fn related(mut self, related_id: &str) -> Self {
        self.related_id = Some(related_id.to_string());
        self
    }
}
