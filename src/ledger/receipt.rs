use crate::error::{Error, ErrorCode};
use crate::state::RevenueContext;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendReceipt {
    pub tx_id: String,
    pub new_balance: u64,
    pub earner_earned: u64,
    pub platform_share: u64,
    /// Earner share held for a booking instead of paid out
    #[serde(skip_serializing_if = "is_zero", default)]
    pub escrowed: u64,
    pub context: RevenueContext,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditReceipt {
    pub tx_id: String,
    pub new_balance: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundReceipt {
    pub tx_id: String,
    pub new_balance: u64,
    pub earner_deducted: u64,
    pub platform_deducted: u64,
    pub clawback_skipped: bool,
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&Error> for ApiError {
    fn from(e: &Error) -> Self {
        ApiError {
            code: e.code(),
            message: e.to_string(),
        }
    }
}

/// `{success, ...}` envelope used at the API boundary.
///
/// On success the payload's fields are inlined next to `success`; on
/// failure only `error` is present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(flatten)]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        ApiResponse {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(e: &Error) -> Self {
        ApiResponse {
            success: false,
            data: None,
            error: Some(ApiError::from(e)),
        }
    }
}

impl<T> From<crate::error::Result<T>> for ApiResponse<T> {
    fn from(r: crate::error::Result<T>) -> Self {
        match r {
            Ok(data) => ApiResponse::ok(data),
            Err(e) => ApiResponse::err(&e),
        }
    }
}
