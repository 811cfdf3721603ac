// gcfleet/src/events.rs
//
// Shared domain types flowing between SessionClient, Bot, and BotController.
//
// `RawGcReply` is what a SessionClient hands back from the wire; `ItemInfo`
// is what a caller receives. The split mirrors any raw-capture →
// normalized-event boundary: fields get renamed, defaults get filled in,
// and nothing downstream ever sees the raw shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::inspect_link::InspectLink;

// ── Raw GC wire reply ─────────────────────────────────────────────────────────

/// A sticker as the GC actually sends it: `sticker_id`, not `stickerId`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSticker {
    pub sticker_id: u32,
    #[serde(default)]
    pub slot: u32,
    #[serde(default)]
    pub wear: Option<f32>,
}

/// Raw inspect reply from the GC, before field renaming/defaulting. The
/// post-reply cooldown (`ItemInfo.delay`) is not a GC-wire field — it's
/// derived from the bot's own `request_delay` config knob, not from
/// anything the GC sends back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawGcReply {
    pub item_id: String,
    #[serde(default)]
    pub paintseed: Option<u32>,
    pub paintwear: f32,
    #[serde(default)]
    pub stickers: Vec<RawSticker>,
}

// ── Normalized reply ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sticker {
    pub sticker_id: u32,
    pub slot: u32,
    pub wear: Option<f32>,
}

impl From<RawSticker> for Sticker {
    fn from(raw: RawSticker) -> Self {
        Self { sticker_id: raw.sticker_id, slot: raw.slot, wear: raw.wear }
    }
}

/// Canonical item attributes as observed by the GC, normalized per spec:
/// `paintwear` renamed to `floatValue`, `paintseed` defaulted to 0, every
/// sticker's `sticker_id` renamed to `stickerId`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ItemInfo {
    pub item_id: String,
    pub paintseed: u32,
    pub float_value: f32,
    pub stickers: Vec<Sticker>,
    /// Pass-through request fields so a caller can correlate a reply with
    /// the link it submitted.
    pub s: String,
    pub a: String,
    pub d: String,
    pub m: String,
    /// Non-negative milliseconds remaining until the bot becomes free again.
    pub delay: i64,
}

impl ItemInfo {
    pub fn from_raw(raw: RawGcReply, link: &InspectLink, delay: i64) -> Self {
        Self {
            item_id: raw.item_id,
            paintseed: raw.paintseed.unwrap_or(0),
            float_value: raw.paintwear,
            stickers: raw.stickers.into_iter().map(Sticker::from).collect(),
            s: link.s.clone(),
            a: link.a.clone(),
            d: link.d.clone(),
            m: link.m.clone(),
            delay: delay.max(0),
        }
    }
}

// ── Pending request (§3 PendingRequest) ───────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub link: InspectLink,
    pub issued_at: DateTime<Utc>,
}

// ── Bot lifecycle state (§3 BotState) ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BotState {
    Init,
    LoggingIn,
    LoggedOn,
    GcConnecting,
    Ready,
    GcLost,
    Dead,
}

impl std::fmt::Display for BotState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Init => "INIT",
            Self::LoggingIn => "LOGGING_IN",
            Self::LoggedOn => "LOGGED_ON",
            Self::GcConnecting => "GC_CONNECTING",
            Self::Ready => "READY",
            Self::GcLost => "GC_LOST",
            Self::Dead => "DEAD",
        };
        write!(f, "{s}")
    }
}

// ── Lifecycle events emitted by a Bot to its owning Controller ───────────────

#[derive(Debug, Clone)]
pub enum BotEvent {
    Ready { index: usize },
    Unready { index: usize },
    LoginFailed { index: usize, reason: String },
    GcReconnectFailed { index: usize },
}

/// Service-level events the Controller emits (edge-triggered per §3 I5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FleetEvent {
    Ready,
    Unready,
    InitializationComplete,
}

// ── Per-bot status snapshot (§4.4 getStatus) ─────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotStatus {
    pub username: String,
    pub state: BotState,
    pub ready: bool,
    pub busy: bool,
    pub login_attempt: u32,
    pub gc_attempt: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link() -> InspectLink {
        InspectLink::from_fields("76561198000000000", "123456", "abcDEF", "0").unwrap()
    }

    #[test]
    fn normalizes_paintseed_default() {
        let raw = RawGcReply {
            item_id: "123456".into(),
            paintseed: None,
            paintwear: 0.2468,
            stickers: vec![],
        };
        let info = ItemInfo::from_raw(raw, &link(), 500);
        assert_eq!(info.paintseed, 0);
        assert_eq!(info.float_value, 0.2468);
    }

    #[test]
    fn renames_sticker_id() {
        let raw = RawGcReply {
            item_id: "123456".into(),
            paintseed: Some(7),
            paintwear: 0.01,
            stickers: vec![RawSticker { sticker_id: 42, slot: 0, wear: None }],
        };
        let info = ItemInfo::from_raw(raw, &link(), 0);
        assert_eq!(info.stickers[0].sticker_id, 42);
    }

    #[test]
    fn delay_never_negative() {
        let raw = RawGcReply {
            item_id: "1".into(),
            paintseed: None,
            paintwear: 0.0,
            stickers: vec![],
        };
        let info = ItemInfo::from_raw(raw, &link(), -50);
        assert_eq!(info.delay, 0);
    }
}
