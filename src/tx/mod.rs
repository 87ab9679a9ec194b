pub mod request;
pub mod transaction;
pub mod validation;

pub use request::{CreditRequest, RefundRequest, SpendRequest};
pub use transaction::{EntryMetadata, LedgerEntry, Source, TxType};
pub use validation::{
    validate_amount, validate_credit, validate_refund, validate_spend, validate_user_id,
    MAX_AMOUNT,
};
