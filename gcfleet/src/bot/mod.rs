// gcfleet/src/bot/mod.rs
//
// Bot — one account's full lifecycle. Single-owner per-bot state via a
// task-per-bot actor: everything in `ActorState` is read/written exclusively
// by the task running `run()`. The public `Bot` handle is just a command
// sender plus a cancellation token — a handle-talks-to-task-over-a-channel
// shape rather than a shared mutex around bot state.
//
// Submodules hold the three behavioral slices of a bot's lifecycle:
// `login` (login state machine + backoff classification), `gc` (GC
// reconnection, health monitor, scheduled refresh), `inspect` (sendInspect +
// reply matching + TTL).

mod gc;
mod inspect;
mod login;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{info_span, Instrument};

use crate::config::{AccountCredentials, FleetConfig};
use crate::error::FleetError;
use crate::events::{BotEvent, BotState, BotStatus, ItemInfo, PendingRequest};
use crate::inspect_link::InspectLink;
use crate::proxy::ProxySelector;
use crate::session::{SessionClient, SessionClientFactory, SessionEvent};

pub(crate) const CSGO_APP_ID: u32 = 730;

/// The upstream-error-class match is a configurable predicate, not string
/// literals sprinkled through the login handler.
pub type RetryClassifier = Arc<dyn Fn(&str) -> bool + Send + Sync>;

pub fn default_retry_classifier() -> RetryClassifier {
    Arc::new(|msg: &str| {
        const NEEDLES: &[&str] = &[
            "Proxy connection timed out",
            "LogonSessionReplaced",
            "ServiceUnavailable",
            "ConnectFailed",
            "Timeout",
        ];
        const CODES: &[&str] = &["84", "85", "86", "87"];
        NEEDLES.iter().any(|n| msg.contains(n)) || CODES.iter().any(|c| msg.contains(c))
    })
}

// ── Public handle ─────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Bot {
    pub index: usize,
    pub account_name: String,
    cmd_tx: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
}

impl Bot {
    /// Spawns the per-bot actor task and returns a handle. Login is not
    /// started automatically — the Controller calls `login()` right after
    /// instantiating the bot.
    pub fn spawn(
        index: usize,
        credentials: AccountCredentials,
        config: Arc<FleetConfig>,
        proxy: Arc<dyn ProxySelector>,
        session_factory: Arc<dyn SessionClientFactory>,
        retry_classifier: RetryClassifier,
        bot_events: mpsc::UnboundedSender<BotEvent>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let account_name = credentials.username.clone();

        let ctx = Ctx {
            index,
            config,
            proxy,
            session_factory,
            retry_classifier,
            bot_events,
            cmd_tx: cmd_tx.clone(),
            cancel: cancel.clone(),
        };
        let state = ActorState::new(credentials);

        let span = info_span!("bot", index, account = %account_name);
        tokio::spawn(run(ctx, cmd_rx, state).instrument(span));

        Self { index, account_name, cmd_tx, cancel }
    }

    pub async fn login(&self) {
        let (resp, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Login { resp }).is_ok() {
            let _ = rx.await;
        }
    }

    pub async fn send_inspect(&self, link: InspectLink) -> Result<ItemInfo, FleetError> {
        let (resp, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::SendInspect { link, resp }).is_err() {
            return Err(FleetError::Destroyed);
        }
        rx.await.unwrap_or(Err(FleetError::Destroyed))
    }

    pub async fn status(&self) -> BotStatus {
        let (resp, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Status { resp }).is_err() {
            return BotStatus {
                username: self.account_name.clone(),
                state: BotState::Dead,
                ready: false,
                busy: false,
                login_attempt: 0,
                gc_attempt: 0,
            };
        }
        rx.await.unwrap_or(BotStatus {
            username: self.account_name.clone(),
            state: BotState::Dead,
            ready: false,
            busy: false,
            login_attempt: 0,
            gc_attempt: 0,
        })
    }

    pub async fn is_ready(&self) -> bool {
        self.status().await.ready
    }

    pub async fn is_busy(&self) -> bool {
        self.status().await.busy
    }

    /// Cancels every outstanding timer tree and tells the actor to log off
    /// and exit. Idempotent.
    pub async fn destroy(&self) {
        let (resp, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Destroy { resp }).is_ok() {
            let _ = rx.await;
        }
        self.cancel.cancel();
    }
}

// ── Actor-internal command/tick types ─────────────────────────────────────────

pub(crate) enum Command {
    Login { resp: oneshot::Sender<()> },
    SendInspect { link: InspectLink, resp: oneshot::Sender<Result<ItemInfo, FleetError>> },
    Status { resp: oneshot::Sender<BotStatus> },
    Destroy { resp: oneshot::Sender<()> },
    Internal(Tick),
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Tick {
    LoginRetry,
    GcReconnectFire,
    GcReconnectToggleBack,
    RefreshDue,
    RefreshRecheck,
    HealthTick,
    TtlExpired,
    BusyClear,
}

pub(crate) struct Ctx {
    pub index: usize,
    pub config: Arc<FleetConfig>,
    pub proxy: Arc<dyn ProxySelector>,
    pub session_factory: Arc<dyn SessionClientFactory>,
    pub retry_classifier: RetryClassifier,
    pub bot_events: mpsc::UnboundedSender<BotEvent>,
    pub cmd_tx: mpsc::UnboundedSender<Command>,
    pub cancel: CancellationToken,
}

impl Ctx {
    /// Spawns a one-shot delayed tick, cancellable via its own child token.
    /// `destroy()` cancelling the parent cascades to every outstanding timer,
    /// so a dead bot never leaves a timer referencing it behind.
    pub fn schedule(&self, delay: Duration, tick: Tick) -> CancellationToken {
        let child = self.cancel.child_token();
        let tx = self.cmd_tx.clone();
        let token = child.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(Command::Internal(tick));
                }
            }
        });
        child
    }

    pub fn emit(&self, event: BotEvent) {
        let _ = self.bot_events.send(event);
    }
}

pub(crate) struct ActorState {
    pub account_name: String,
    pub password: String,
    pub auth_secret: Option<String>,

    pub state: BotState,
    pub busy: bool,
    pub login_attempt: u32,
    pub gc_attempt: u32,
    pub last_gc_activity: Instant,
    pub relogin: bool,
    pub destroyed: bool,
    /// Edge-triggered `ready`/`unready` bookkeeping for this bot alone —
    /// the Controller does its own aggregate edge detection on top.
    pub was_ready: bool,

    pub pending: Option<PendingRequest>,
    pub pending_resp: Option<oneshot::Sender<Result<ItemInfo, FleetError>>>,

    pub session: Option<Arc<dyn SessionClient>>,
    pub session_rx: Option<mpsc::UnboundedReceiver<SessionEvent>>,

    pub login_retry_token: Option<CancellationToken>,
    pub gc_reconnect_token: Option<CancellationToken>,
    pub ttl_token: Option<CancellationToken>,
    pub busy_clear_token: Option<CancellationToken>,
    pub refresh_token: Option<CancellationToken>,
    pub health_token: Option<CancellationToken>,
}

impl ActorState {
    fn new(credentials: AccountCredentials) -> Self {
        Self {
            account_name: credentials.username,
            password: credentials.password,
            auth_secret: credentials.auth_secret,
            state: BotState::Init,
            busy: false,
            login_attempt: 0,
            gc_attempt: 0,
            last_gc_activity: Instant::now(),
            relogin: false,
            destroyed: false,
            was_ready: false,
            pending: None,
            pending_resp: None,
            session: None,
            session_rx: None,
            login_retry_token: None,
            gc_reconnect_token: None,
            ttl_token: None,
            busy_clear_token: None,
            refresh_token: None,
            health_token: None,
        }
    }

    pub fn ready(&self) -> bool {
        self.state == BotState::Ready && !self.busy
    }

    fn status(&self) -> BotStatus {
        BotStatus {
            username: self.account_name.clone(),
            state: self.state,
            ready: self.state == BotState::Ready,
            busy: self.busy,
            login_attempt: self.login_attempt,
            gc_attempt: self.gc_attempt,
        }
    }

    /// Edge-triggered `ready`/`unready` toward the Controller. Uses
    /// `ready()` (state == READY ∧ ¬busy), not raw state — a bot serving a
    /// request or sitting in its post-reply cooldown must drop out of the
    /// Controller's dispatch pool even though its `BotState` is still
    /// `READY`.
    fn sync_readiness(&mut self, ctx: &Ctx) {
        let now_ready = self.ready();
        if now_ready && !self.was_ready {
            ctx.emit(BotEvent::Ready { index: ctx.index });
        } else if !now_ready && self.was_ready {
            ctx.emit(BotEvent::Unready { index: ctx.index });
        }
        self.was_ready = now_ready;
    }
}

async fn run(ctx: Ctx, mut cmd_rx: mpsc::UnboundedReceiver<Command>, mut state: ActorState) {
    state.health_token = Some(gc::schedule_health_tick(&ctx));
    state.refresh_token = Some(gc::schedule_refresh(&ctx));

    loop {
        tokio::select! {
            biased;

            _ = ctx.cancel.cancelled() => break,

            maybe_cmd = cmd_rx.recv() => {
                match maybe_cmd {
                    Some(cmd) => {
                        handle_command(&ctx, &mut state, cmd).await;
                        state.sync_readiness(&ctx);
                    }
                    None => break,
                }
            }

            maybe_ev = recv_session_event(&mut state), if state.session_rx.is_some() => {
                match maybe_ev {
                    Some(ev) => handle_session_event(&ctx, &mut state, ev).await,
                    None => state.session_rx = None,
                }
            }
        }

        if state.destroyed {
            break;
        }
    }
}

async fn recv_session_event(state: &mut ActorState) -> Option<SessionEvent> {
    state.session_rx.as_mut().unwrap().recv().await
}

async fn handle_command(ctx: &Ctx, state: &mut ActorState, cmd: Command) {
    match cmd {
        Command::Login { resp } => {
            login::begin_login(ctx, state).await;
            let _ = resp.send(());
        }
        Command::SendInspect { link, resp } => {
            inspect::send_inspect(ctx, state, link, resp).await;
        }
        Command::Status { resp } => {
            let _ = resp.send(state.status());
        }
        Command::Destroy { resp } => {
            destroy(ctx, state).await;
            let _ = resp.send(());
        }
        Command::Internal(tick) => handle_tick(ctx, state, tick).await,
    }
}

async fn handle_tick(ctx: &Ctx, state: &mut ActorState, tick: Tick) {
    match tick {
        Tick::LoginRetry => login::begin_login(ctx, state).await,
        Tick::GcReconnectFire => gc::fire_gc_reconnect(ctx, state).await,
        Tick::GcReconnectToggleBack => gc::toggle_played_games_back(ctx, state).await,
        Tick::RefreshDue => gc::on_refresh_due(ctx, state).await,
        Tick::RefreshRecheck => gc::on_refresh_due(ctx, state).await,
        Tick::HealthTick => gc::health_check(ctx, state).await,
        Tick::TtlExpired => inspect::on_ttl_expired(ctx, state),
        Tick::BusyClear => inspect::on_busy_clear(state),
    }
    state.sync_readiness(ctx);
}

async fn handle_session_event(ctx: &Ctx, state: &mut ActorState, ev: SessionEvent) {
    match ev {
        SessionEvent::Error(msg) => login::on_error(ctx, state, msg).await,
        SessionEvent::Disconnected { code, msg } => {
            tracing::info!(code, %msg, "steam-level disconnect; awaiting auto-reconnect");
        }
        SessionEvent::LoggedOn => login::on_logged_on(ctx, state).await,
        SessionEvent::OwnershipCached => login::on_ownership_cached(ctx, state).await,
        SessionEvent::ConnectedToGc => gc::on_connected_to_gc(ctx, state).await,
        SessionEvent::DisconnectedFromGc(reason) => gc::on_disconnected_from_gc(ctx, state, reason).await,
        SessionEvent::ConnectionStatus(s) => tracing::debug!(status = %s, "connection status"),
        SessionEvent::InspectItemInfo(raw) => inspect::on_gc_reply(ctx, state, raw),
    }
    state.sync_readiness(ctx);
}

async fn destroy(ctx: &Ctx, state: &mut ActorState) {
    if state.destroyed {
        return;
    }
    for token in [
        state.login_retry_token.take(),
        state.gc_reconnect_token.take(),
        state.ttl_token.take(),
        state.busy_clear_token.take(),
        state.refresh_token.take(),
        state.health_token.take(),
    ]
    .into_iter()
    .flatten()
    {
        token.cancel();
    }
    if let Some(resp) = state.pending_resp.take() {
        let _ = resp.send(Err(FleetError::Destroyed));
    }
    state.pending = None;
    if let Some(session) = &state.session {
        session.log_off().await;
    }
    state.state = BotState::Dead;
    state.busy = false;
    state.destroyed = true;
    state.sync_readiness(ctx);
}
