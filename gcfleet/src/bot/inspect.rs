// gcfleet/src/bot/inspect.rs
//
// §4.3 `sendInspect` + reply matching + TTL. A GC reply whose `itemId`
// doesn't match the live `PendingRequest.a` is dropped silently (P7) —
// cross-talk from a stale request never mutates bot state.

use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::warn;

use super::{ActorState, Ctx, Tick};
use crate::error::FleetError;
use crate::events::{BotState, ItemInfo, PendingRequest, RawGcReply};
use crate::inspect_link::InspectLink;

pub(crate) async fn send_inspect(
    ctx: &Ctx,
    state: &mut ActorState,
    link: InspectLink,
    resp: oneshot::Sender<Result<ItemInfo, FleetError>>,
) {
    if state.destroyed || state.state != BotState::Ready || state.busy {
        let _ = resp.send(Err(FleetError::NotReady));
        return;
    }
    let Some(session) = state.session.clone() else {
        let _ = resp.send(Err(FleetError::NotReady));
        return;
    };

    state.busy = true;
    state.pending = Some(PendingRequest { link: link.clone(), issued_at: chrono::Utc::now() });
    state.pending_resp = Some(resp);
    state.ttl_token = Some(ctx.schedule(Duration::from_millis(ctx.config.request_ttl_ms), Tick::TtlExpired));

    // §3: exactly one of s/m is the non-"0" owner; forward whichever one it is.
    let owner = if link.s != "0" { &link.s } else { &link.m };
    session.inspect_item(owner, &link.a, &link.d).await;
}

/// A GC reply arrived. §4.3: match on `itemId == pending.a`; normalize and
/// deliver on match, silently ignore otherwise.
pub(crate) fn on_gc_reply(ctx: &Ctx, state: &mut ActorState, raw: RawGcReply) {
    let is_match = matches!(&state.pending, Some(p) if p.link.a == raw.item_id);
    if !is_match {
        warn!(item_id = %raw.item_id, "ignoring GC reply with no matching pending request");
        return;
    }

    state.last_gc_activity = Instant::now();
    if let Some(token) = state.ttl_token.take() {
        token.cancel();
    }
    let pending = state.pending.take().expect("checked above");

    // §4.3: delay = max(0, request_delay − (now − issuedAt)) — the cooldown
    // comes from the bot's own config, not anything the GC sends back.
    let elapsed_ms = chrono::Utc::now()
        .signed_duration_since(pending.issued_at)
        .num_milliseconds()
        .max(0);
    let remaining_ms = (ctx.config.request_delay_ms as i64 - elapsed_ms).max(0);

    let info = ItemInfo::from_raw(raw, &pending.link, remaining_ms);
    if let Some(resp) = state.pending_resp.take() {
        let _ = resp.send(Ok(info));
    }

    state.busy_clear_token = Some(ctx.schedule(Duration::from_millis(remaining_ms as u64), Tick::BusyClear));
}

pub(crate) fn on_busy_clear(state: &mut ActorState) {
    state.busy_clear_token = None;
    state.busy = false;
}

/// No GC reply arrived inside `request_ttl`.
pub(crate) fn on_ttl_expired(ctx: &Ctx, state: &mut ActorState) {
    state.ttl_token = None;
    if state.pending.take().is_none() {
        return;
    }
    state.busy = false;
    if let Some(resp) = state.pending_resp.take() {
        let _ = resp.send(Err(FleetError::TtlExceeded { ttl_ms: ctx.config.request_ttl_ms }));
    }
}
