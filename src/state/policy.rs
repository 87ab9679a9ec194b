//! Revenue split policy: a fixed table from context to (earner, platform) shares.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const BPS_MAX: u16 = 10_000;

/// Feature context a paid transaction belongs to. Closed set; each variant
/// has exactly one split in [`RevenueContext::split`].
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RevenueContext {
    ChatPaid,
    VoiceCall,
    VideoCall,
    AiSession,
    MediaPurchase,
    CalendarBooking,
    EventTicket,
    Tip,
    PlatformOnlyRevenue,
    PlatformOnlyVideo,
}

impl RevenueContext {
    pub const ALL: [RevenueContext; 10] = [
        RevenueContext::ChatPaid,
        RevenueContext::VoiceCall,
        RevenueContext::VideoCall,
        RevenueContext::AiSession,
        RevenueContext::MediaPurchase,
        RevenueContext::CalendarBooking,
        RevenueContext::EventTicket,
        RevenueContext::Tip,
        RevenueContext::PlatformOnlyRevenue,
        RevenueContext::PlatformOnlyVideo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RevenueContext::ChatPaid => "chat-paid",
            RevenueContext::VoiceCall => "voice-call",
            RevenueContext::VideoCall => "video-call",
            RevenueContext::AiSession => "ai-session",
            RevenueContext::MediaPurchase => "media-purchase",
            RevenueContext::CalendarBooking => "calendar-booking",
            RevenueContext::EventTicket => "event-ticket",
            RevenueContext::Tip => "tip",
            RevenueContext::PlatformOnlyRevenue => "platform-only-revenue",
            RevenueContext::PlatformOnlyVideo => "platform-only-video",
        }
    }

    pub fn split(&self) -> RevenueSplit {
        match self {
            RevenueContext::ChatPaid
            | RevenueContext::VoiceCall
            | RevenueContext::VideoCall
            | RevenueContext::AiSession
            | RevenueContext::MediaPurchase => RevenueSplit::new(6_500, 3_500),
            RevenueContext::CalendarBooking | RevenueContext::EventTicket => {
                RevenueSplit::new(8_000, 2_000)
            }
            RevenueContext::Tip => RevenueSplit::new(9_000, 1_000),
            RevenueContext::PlatformOnlyRevenue | RevenueContext::PlatformOnlyVideo => {
                RevenueSplit::new(0, BPS_MAX)
            }
        }
    }

    pub fn is_platform_only(&self) -> bool {
        self.split().earner_bps == 0
    }
}

impl fmt::Display for RevenueContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RevenueContext {
    type Err = Error;

    /// Unknown tags are rejected; there is no fallback split.
    fn from_str(s: &str) -> Result<Self> {
        let tag = s.trim().to_ascii_lowercase().replace('_', "-");
        RevenueContext::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == tag)
            .ok_or_else(|| Error::UnknownContext(s.to_string()))
    }
}

/// Split in basis points. earner_bps + platform_bps == 10_000.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevenueSplit {
    pub earner_bps: u16,
    pub platform_bps: u16,
}

impl RevenueSplit {
    pub const fn new(earner_bps: u16, platform_bps: u16) -> Self {
        RevenueSplit {
            earner_bps,
            platform_bps,
        }
    }

    pub fn validate(&self) -> bool {
        self.earner_bps.saturating_add(self.platform_bps) == BPS_MAX
    }

    /// Returns (earner_share, platform_share). Earner share is floored and the
    /// remainder goes to the platform, so the two always sum to `amount`.
    pub fn apply(&self, amount: u64) -> SplitAmounts {
        let earner = (amount as u128 * self.earner_bps as u128 / BPS_MAX as u128) as u64;
        SplitAmounts {
            earner,
            platform: amount - earner,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitAmounts {
    pub earner: u64,
    pub platform: u64,
}

impl SplitAmounts {
    pub fn total(&self) -> u64 {
        self.earner + self.platform
    }
}
