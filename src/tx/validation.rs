//! Request validation: everything that can be rejected before touching the store.

use crate::error::{Error, Result};
use crate::state::policy::RevenueContext;
use crate::tx::{CreditRequest, RefundRequest, SpendRequest};

/// Entries carry signed amounts, so a single movement must fit in an i64.
pub const MAX_AMOUNT: u64 = i64::MAX as u64;

pub fn validate_amount(amount: u64) -> Result<()> {
    if amount == 0 {
        return Err(Error::Validation(
            "Amount must be greater than zero".to_string(),
        ));
    }
    if amount > MAX_AMOUNT {
        return Err(Error::Validation(format!(
            "Amount {} exceeds maximum {}",
            amount, MAX_AMOUNT
        )));
    }
    Ok(())
}

pub fn validate_user_id(user_id: &str) -> Result<()> {
    if user_id.trim().is_empty() {
        return Err(Error::Validation("User id must not be empty".to_string()));
    }
    Ok(())
}

/// Validate a spend and resolve its revenue context.
///
/// Checks:
/// - amount in (0, MAX_AMOUNT]
/// - a context is given or implied by the source
/// - an earner is present unless the context is platform-only
/// - the earner is not the payer
pub fn validate_spend(req: &SpendRequest) -> Result<RevenueContext> {
    validate_user_id(&req.payer_id)?;
    validate_amount(req.amount)?;

    let context = match req.context {
        Some(ctx) => ctx,
        None => req.source.default_context().ok_or_else(|| {
            Error::Validation(format!(
                "Source {} has no revenue context; pass one explicitly",
                req.source
            ))
        })?,
    };

    if !context.is_platform_only() {
        let earner = req.earner_id.as_deref().ok_or_else(|| {
            Error::Validation(format!("Context {} requires an earner", context))
        })?;
        validate_user_id(earner)?;
        if earner == req.payer_id {
            return Err(Error::Validation(format!(
                "Payer {} cannot pay themselves",
                req.payer_id
            )));
        }
    }

    Ok(context)
}

pub fn validate_credit(req: &CreditRequest) -> Result<()> {
    validate_user_id(&req.user_id)?;
    validate_amount(req.amount)
}

/// Validate a refund. A clawback needs both a context and an earner.
pub fn validate_refund(req: &RefundRequest) -> Result<()> {
    validate_user_id(&req.user_id)?;
    validate_amount(req.amount)?;
    if req.refund_platform_share {
        let Some(context) = req.context else {
            return Err(Error::Validation(
                "Platform-share refund requires a context".to_string(),
            ));
        };
        if !context.is_platform_only() {
            let earner = req.earner_id.as_deref().ok_or_else(|| {
                Error::Validation(format!("Clawback for {} requires an earner", context))
            })?;
            validate_user_id(earner)?;
        }
    }
    Ok(())
}
