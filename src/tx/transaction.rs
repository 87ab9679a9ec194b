use crate::error::{Error, Result};
use crate::state::policy::{RevenueContext, SplitAmounts};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of balance movement recorded in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxType {
    Purchase,
    Spend,
    Earn,
    Refund,
    /// Earned tokens cashed out to fiat
    Payout,
}

/// Feature that originated a movement.
///
/// Older callers only send a source tag; [`Source::default_context`] is the
/// single place such a tag is turned into a revenue context.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Chat,
    VoiceCall,
    VideoCall,
    AiSession,
    Media,
    Calendar,
    Event,
    Tip,
    AdsCampaign,
    PromoBundle,
    Bonus,
    TokenPurchase,
    Payout,
}

impl Source {
    const ALL: [Source; 13] = [
        Source::Chat,
        Source::VoiceCall,
        Source::VideoCall,
        Source::AiSession,
        Source::Media,
        Source::Calendar,
        Source::Event,
        Source::Tip,
        Source::AdsCampaign,
        Source::PromoBundle,
        Source::Bonus,
        Source::TokenPurchase,
        Source::Payout,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Chat => "chat",
            Source::VoiceCall => "voice_call",
            Source::VideoCall => "video_call",
            Source::AiSession => "ai_session",
            Source::Media => "media",
            Source::Calendar => "calendar",
            Source::Event => "event",
            Source::Tip => "tip",
            Source::AdsCampaign => "ads_campaign",
            Source::PromoBundle => "promo_bundle",
            Source::Bonus => "bonus",
            Source::TokenPurchase => "token_purchase",
            Source::Payout => "payout",
        }
    }

    /// Revenue context implied by a bare source tag. `None` for sources that
    /// never carry a split (credits and payouts).
    pub fn default_context(&self) -> Option<RevenueContext> {
        match self {
            Source::Chat => Some(RevenueContext::ChatPaid),
            Source::VoiceCall => Some(RevenueContext::VoiceCall),
            Source::VideoCall => Some(RevenueContext::VideoCall),
            Source::AiSession => Some(RevenueContext::AiSession),
            Source::Media => Some(RevenueContext::MediaPurchase),
            Source::Calendar => Some(RevenueContext::CalendarBooking),
            Source::Event => Some(RevenueContext::EventTicket),
            Source::Tip => Some(RevenueContext::Tip),
            Source::AdsCampaign | Source::PromoBundle => Some(RevenueContext::PlatformOnlyRevenue),
            Source::Bonus | Source::TokenPurchase | Source::Payout => None,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let tag = s.trim().to_ascii_lowercase().replace('-', "_");
        Source::ALL
            .iter()
            .copied()
            .find(|src| src.as_str() == tag)
            .ok_or_else(|| Error::Validation(format!("Unknown source: {}", s)))
    }
}

/// Free-form context attached to an entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub counterpart_id: Option<String>,
    pub split: Option<SplitAmounts>,
    pub reason: Option<String>,
    pub note: Option<String>,
}

/// Immutable ledger entry: one balance movement on one wallet.
///
/// `seq`, `prev_hash` and `hash` are assigned by the store at commit; until
/// then the entry is unsealed (`hash` empty).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub seq: u64,
    pub tx_id: String,
    pub user_id: String,
    pub tx_type: TxType,
    pub source: Source,
    pub related_id: Option<String>,
    /// Signed relative to the wallet: negative for debits
    pub amount_tokens: i64,
    pub before_balance: u64,
    pub after_balance: u64,
    pub context: Option<RevenueContext>,
    pub metadata: EntryMetadata,
    pub created_at: u64,
    pub prev_hash: String,
    pub hash: String,
}

impl LedgerEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_id: &str,
        tx_type: TxType,
        source: Source,
        related_id: Option<String>,
        amount_tokens: i64,
        before_balance: u64,
        after_balance: u64,
        context: Option<RevenueContext>,
        metadata: EntryMetadata,
        created_at: u64,
    ) -> Self {
        LedgerEntry {
            seq: 0,
            tx_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            tx_type,
            source,
            related_id,
            amount_tokens,
            before_balance,
            after_balance,
            context,
            metadata,
            created_at,
            prev_hash: String::new(),
            hash: String::new(),
        }
    }

    /// before + amount == after
    pub fn is_balanced(&self) -> bool {
        self.before_balance as i128 + self.amount_tokens as i128 == self.after_balance as i128
    }

    pub fn is_sealed(&self) -> bool {
        !self.hash.is_empty()
    }

    /// Assign log position and chain hash.
    pub fn seal(&mut self, seq: u64, prev_hash: &str) -> Result<()> {
        self.seq = seq;
        self.prev_hash = prev_hash.to_string();
        self.hash = String::new();
        self.hash = crate::audit::entry_hash(self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(amount: i64, before: u64, after: u64) -> LedgerEntry {
        LedgerEntry::new(
            "alice",
            TxType::Spend,
            Source::Chat,
            None,
            amount,
            before,
            after,
            Some(RevenueContext::ChatPaid),
            EntryMetadata::default(),
            0,
        )
    }

    #[test]
    fn test_balanced() {
        assert!(entry(-30, 100, 70).is_balanced());
        assert!(!entry(-30, 100, 80).is_balanced());
    }

    #[test]
    fn test_tx_ids_unique() {
        assert_ne!(entry(-1, 1, 0).tx_id, entry(-1, 1, 0).tx_id);
    }

    #[test]
    fn test_seal() {
        let mut e = entry(-30, 100, 70);
        assert!(!e.is_sealed());
        e.seal(3, "abc").unwrap();
        assert_eq!(e.seq, 3);
        assert_eq!(e.prev_hash, "abc");
        assert_eq!(e.hash.len(), 64);
    }

    #[test]
    fn test_source_mapping() {
        assert_eq!(Source::Calendar.default_context(), Some(RevenueContext::CalendarBooking));
        assert_eq!(
            Source::AdsCampaign.default_context(),
            Some(RevenueContext::PlatformOnlyRevenue)
        );
        assert_eq!(Source::Bonus.default_context(), None);
        assert_eq!("voice-call".parse::<Source>().unwrap(), Source::VoiceCall);
        assert!("fax".parse::<Source>().is_err());
    }
}
