// gcfleet/src/bot/login.rs
//
// §4.3 login state machine: idempotent `login()`, TOTP/auth-code resolution,
// retryable-error classification with exponential backoff, and the
// loggedOn -> ownership-check -> GC-open handoff.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{ActorState, Ctx, Tick, CSGO_APP_ID};
use crate::events::{BotEvent, BotState};
use crate::session::LogOnCredentials;

/// Enters `LOGGING_IN`, tearing down any in-flight session first — the
/// `login()` contract is idempotent whether called fresh, on retry, or from
/// the health monitor.
pub(crate) async fn begin_login(ctx: &Ctx, state: &mut ActorState) {
    if state.destroyed {
        return;
    }
    if let Some(old) = state.session.take() {
        old.log_off().await;
    }
    state.session_rx = None;
    state.state = BotState::LoggingIn;

    match ctx.proxy.pick_random().await {
        Some(binding) => info!(proxy = %binding.name, "egress proxy bound for login"),
        None => debug!("no proxy available; logging in direct"),
    }

    let unix_time = chrono::Utc::now().timestamp().max(0) as u64;
    let (auth_code, two_factor_code) = match &state.auth_secret {
        None => (None, None),
        Some(secret) if secret.len() <= 5 => (Some(secret.clone()), None),
        Some(secret) => match crate::totp::totp(secret, unix_time) {
            Ok(code) => (None, Some(code)),
            Err(e) => {
                warn!(error = %e, "failed to derive Steam Guard TOTP code");
                (None, None)
            }
        },
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let session = ctx.session_factory.create(tx);
    state.session_rx = Some(rx);

    session
        .log_on(LogOnCredentials {
            account_name: state.account_name.clone(),
            password: state.password.clone(),
            remember_password: true,
            auth_code,
            two_factor_code,
        })
        .await;
    state.session = Some(session);
}

/// §4.3 step 2 — classify and react to a session error. Only login-phase
/// errors drive the retry/backoff machine; an error arriving after
/// `LOGGED_ON` (e.g. a `LicenseFailure`) is logged and left to the health
/// monitor, per §7's policy table.
pub(crate) async fn on_error(ctx: &Ctx, state: &mut ActorState, msg: String) {
    if state.destroyed {
        return;
    }
    if state.state != BotState::LoggingIn {
        warn!(error = %msg, state = %state.state, "session error outside login phase");
        return;
    }

    let retryable = (ctx.retry_classifier)(&msg);
    if retryable && state.login_attempt < ctx.config.max_login_retries {
        state.login_attempt += 1;
        let delay_ms = ctx.config.login_retry_delay_ms * (1u64 << (state.login_attempt - 1));
        info!(attempt = state.login_attempt, delay_ms, "retrying login after error: {msg}");
        state.login_retry_token = Some(ctx.schedule(Duration::from_millis(delay_ms), Tick::LoginRetry));
    } else {
        warn!(error = %msg, "login failed permanently");
        ctx.emit(BotEvent::LoginFailed { index: ctx.index, reason: msg });
        state.state = BotState::Dead;
    }
}

/// §4.3 step 3 — `loggedOn`. A scheduled relog (`state.relogin`) skips the
/// ownership check entirely and opens the GC session directly.
pub(crate) async fn on_logged_on(_ctx: &Ctx, state: &mut ActorState) {
    state.login_attempt = 0;
    state.state = BotState::LoggedOn;

    let Some(session) = state.session.clone() else { return };
    if state.relogin {
        state.relogin = false;
        state.state = BotState::GcConnecting;
        session.set_played_games(vec![CSGO_APP_ID], true).await;
    } else {
        session.set_played_games(vec![], true).await;
    }
}

/// §4.3 step 3's ownership-check branch, fired by the one-shot
/// `ownershipCached` signal.
pub(crate) async fn on_ownership_cached(_ctx: &Ctx, state: &mut ActorState) {
    let Some(session) = state.session.clone() else { return };

    if !session.owns_app(CSGO_APP_ID).await {
        session.request_free_license(vec![CSGO_APP_ID]).await;
    }
    state.relogin = false;
    state.state = BotState::GcConnecting;
    session.set_played_games(vec![CSGO_APP_ID], true).await;
}
