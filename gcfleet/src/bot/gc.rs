// gcfleet/src/bot/gc.rs
//
// GC reconnection, health monitor, and scheduled refresh. All three timers
// are owned by the bot actor and rescheduled from inside their own tick
// handlers, a self-rescheduling shape applied per-bot instead of
// process-wide.

use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

use super::{ActorState, Ctx, Tick, CSGO_APP_ID};
use crate::events::BotState;

/// §4.3 GC reconnection backoff: `gcBase · 2^(gcAttempt−1)`, capped at
/// `maxGcAttempts`.
pub(crate) fn schedule_gc_reconnect(ctx: &Ctx, state: &mut ActorState) {
    if state.gc_reconnect_token.is_some() {
        return;
    }
    if state.gc_attempt >= ctx.config.max_gc_reconnect_attempts {
        warn!("GC reconnect attempts exhausted");
        ctx.emit(crate::events::BotEvent::GcReconnectFailed { index: ctx.index });
        return;
    }
    state.gc_attempt += 1;
    let delay_ms = ctx.config.gc_reconnect_delay_ms * (1u64 << (state.gc_attempt - 1));
    info!(attempt = state.gc_attempt, delay_ms, "scheduling GC reconnect");
    state.gc_reconnect_token = Some(ctx.schedule(Duration::from_millis(delay_ms), Tick::GcReconnectFire));
}

/// On the reconnect timer firing: if Steam is still logged on, toggle played
/// games off then back on a second later to force a fresh GC handshake.
pub(crate) async fn fire_gc_reconnect(ctx: &Ctx, state: &mut ActorState) {
    state.gc_reconnect_token = None;
    if state.destroyed || matches!(state.state, BotState::Init | BotState::LoggingIn | BotState::Dead) {
        return;
    }
    let Some(session) = state.session.clone() else { return };
    session.set_played_games(vec![], true).await;
    state.gc_reconnect_token = Some(ctx.schedule(Duration::from_secs(1), Tick::GcReconnectToggleBack));
}

pub(crate) async fn toggle_played_games_back(_ctx: &Ctx, state: &mut ActorState) {
    state.gc_reconnect_token = None;
    if state.destroyed {
        return;
    }
    let Some(session) = state.session.clone() else { return };
    session.set_played_games(vec![CSGO_APP_ID], true).await;
}

pub(crate) async fn on_connected_to_gc(_ctx: &Ctx, state: &mut ActorState) {
    if let Some(token) = state.gc_reconnect_token.take() {
        token.cancel();
    }
    state.gc_attempt = 0;
    state.last_gc_activity = std::time::Instant::now();
    state.state = BotState::Ready;
    info!("GC session attached");
}

pub(crate) async fn on_disconnected_from_gc(ctx: &Ctx, state: &mut ActorState, reason: String) {
    if state.destroyed {
        return;
    }
    warn!(%reason, "GC session lost");
    state.state = BotState::GcLost;
    schedule_gc_reconnect(ctx, state);
}

/// §4.3 health monitor, every `health_check_interval_ms`.
pub(crate) async fn health_check(ctx: &Ctx, state: &mut ActorState) {
    if !state.destroyed {
        match state.state {
            BotState::Init => {
                super::login::begin_login(ctx, state).await;
            }
            BotState::Ready => {
                if state.last_gc_activity.elapsed()
                    > Duration::from_millis(ctx.config.gc_inactivity_ceiling_ms)
                {
                    warn!("GC inactivity ceiling exceeded; demoting to unready");
                    state.state = BotState::GcLost;
                    schedule_gc_reconnect(ctx, state);
                }
            }
            BotState::LoggedOn | BotState::GcConnecting | BotState::GcLost => {
                schedule_gc_reconnect(ctx, state);
            }
            BotState::LoggingIn | BotState::Dead => {}
        }
    }
    state.health_token = Some(schedule_health_tick(ctx));
}

pub(crate) fn schedule_health_tick(ctx: &Ctx) -> tokio_util::sync::CancellationToken {
    ctx.schedule(Duration::from_millis(ctx.config.health_check_interval_ms), Tick::HealthTick)
}

/// §4.3 scheduled refresh: 30 min + uniform jitter in `[0, 4 min)`.
pub(crate) fn schedule_refresh(ctx: &Ctx) -> tokio_util::sync::CancellationToken {
    let jitter_ms = if ctx.config.refresh_jitter_ms > 0 {
        rand::thread_rng().gen_range(0..ctx.config.refresh_jitter_ms)
    } else {
        0
    };
    ctx.schedule(Duration::from_millis(ctx.config.refresh_period_ms + jitter_ms), Tick::RefreshDue)
}

/// §9 open question resolved: gated on `¬busy`; a refresh due mid-inspect
/// reschedules 60s out instead of relogging under an in-flight request.
pub(crate) async fn on_refresh_due(ctx: &Ctx, state: &mut ActorState) {
    if state.destroyed {
        return;
    }
    if state.busy {
        state.refresh_token = Some(ctx.schedule(Duration::from_secs(60), Tick::RefreshRecheck));
        return;
    }
    if state.state == BotState::Ready {
        info!("scheduled refresh: relogging");
        state.relogin = true;
        if let Some(session) = state.session.clone() {
            session.relog().await;
        }
    }
    state.refresh_token = Some(schedule_refresh(ctx));
}
