// gcfleet/src/controller.rs
//
// §4.4 BotController — the pool that owns the bots, dispatches inbound
// inspect requests across free/ready bots, and aggregates per-bot readiness
// into a single edge-triggered service-level signal.
//
// Grounded on the teacher's `StateStore` (concurrent registry guarded by
// `parking_lot`, atomics for counters) and `main.rs`'s long-lived
// `Pipeline` that owns its components and runs a background housekeeping
// loop — here that loop is the readiness-latch task instead of window
// eviction.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rand::seq::SliceRandom;
use tokio::sync::{mpsc, Notify};
use tracing::{info, warn};

use crate::bot::{default_retry_classifier, Bot, RetryClassifier};
use crate::config::{AccountCredentials, FleetConfig};
use crate::error::FleetError;
use crate::events::{BotEvent, BotStatus, FleetEvent, ItemInfo};
use crate::inspect_link::InspectLink;
use crate::proxy::ProxySelector;
use crate::session::SessionClientFactory;

/// §3 I5 — service readiness is edge-triggered: the controller emits
/// `Ready`/`Unready` only when the *aggregate* free-and-ready condition
/// flips, not on every individual bot transition.
struct ReadinessLatch {
    ready: AtomicBool,
}

impl ReadinessLatch {
    fn new() -> Self {
        Self { ready: AtomicBool::new(false) }
    }
}

pub struct BotController {
    bots: RwLock<Vec<Bot>>,
    config: Arc<FleetConfig>,
    proxy: Arc<dyn ProxySelector>,
    session_factory: Arc<dyn SessionClientFactory>,
    retry_classifier: RetryClassifier,

    bot_events_tx: mpsc::UnboundedSender<BotEvent>,
    fleet_events_tx: tokio::sync::broadcast::Sender<FleetEvent>,

    latch: Arc<ReadinessLatch>,
    ready_count: AtomicUsize,
    logins_attempted: AtomicUsize,
    init_notify: Arc<Notify>,
}

impl BotController {
    pub fn new(
        config: FleetConfig,
        proxy: Arc<dyn ProxySelector>,
        session_factory: Arc<dyn SessionClientFactory>,
    ) -> Arc<Self> {
        let (bot_events_tx, bot_events_rx) = mpsc::unbounded_channel();
        let (fleet_events_tx, _rx) = tokio::sync::broadcast::channel(256);

        let controller = Arc::new(Self {
            bots: RwLock::new(Vec::new()),
            config: Arc::new(config),
            proxy,
            session_factory,
            retry_classifier: default_retry_classifier(),
            bot_events_tx,
            fleet_events_tx,
            latch: Arc::new(ReadinessLatch::new()),
            ready_count: AtomicUsize::new(0),
            logins_attempted: AtomicUsize::new(0),
            init_notify: Arc::new(Notify::new()),
        });

        let weak = Arc::downgrade(&controller);
        tokio::spawn(run_event_loop(weak, bot_events_rx));
        controller
    }

    pub fn subscribe_fleet_events(&self) -> tokio::sync::broadcast::Receiver<FleetEvent> {
        self.fleet_events_tx.subscribe()
    }

    /// §4.4 `addBot` — assigns `botIndex = len(bots)`, spawns the bot actor,
    /// and begins login. Login-initiation errors are logged, never
    /// propagated — the contract says "non-fatal".
    pub async fn add_bot(self: &Arc<Self>, credentials: AccountCredentials) {
        let index = self.bots.read().len();
        let bot = Bot::spawn(
            index,
            credentials,
            self.config.clone(),
            self.proxy.clone(),
            self.session_factory.clone(),
            self.retry_classifier.clone(),
            self.bot_events_tx.clone(),
        );
        self.bots.write().push(bot.clone());
        info!(index, account = %bot.account_name, "bot added, beginning login");
        bot.login().await;
        self.logins_attempted.fetch_add(1, Ordering::SeqCst);
        self.maybe_complete_initialization();
    }

    /// §4.4 `waitForInitialization` — resolves once ≥ 1 bot is ready, every
    /// bot has attempted login, or `timeout` elapses. Never rejects.
    pub async fn wait_for_initialization(self: &Arc<Self>, timeout: Duration) {
        if self.maybe_complete_initialization() {
            return;
        }
        let notified = self.init_notify.notified();
        tokio::select! {
            _ = notified => {}
            _ = tokio::time::sleep(timeout) => {
                warn!("startup barrier timed out waiting for bot initialization");
            }
        }
    }

    fn maybe_complete_initialization(&self) -> bool {
        let total = self.bots.read().len();
        let attempted = self.logins_attempted.load(Ordering::SeqCst);
        let any_ready = self.ready_count.load(Ordering::SeqCst) > 0;
        if any_ready || (total > 0 && attempted >= total) {
            let _ = self.fleet_events_tx.send(FleetEvent::InitializationComplete);
            self.init_notify.notify_waiters();
            true
        } else {
            false
        }
    }

    /// §4.4 dispatch algorithm — Fisher–Yates shuffle, first `ready ∧
    /// ¬busy` bot wins. Shuffling (rather than scanning in index order)
    /// prevents head-of-line pinning on the first account in the list.
    pub async fn lookup_inspect(self: &Arc<Self>, link: InspectLink) -> Result<ItemInfo, FleetError> {
        let mut bots = self.bots.read().clone();
        bots.shuffle(&mut rand::thread_rng());

        let mut candidate = None;
        for bot in &bots {
            let status = bot.status().await;
            if status.ready && !status.busy {
                candidate = Some(bot.clone());
                break;
            }
        }

        match candidate {
            Some(bot) => bot.send_inspect(link).await,
            None => Err(FleetError::NoBotsAvailable),
        }
    }

    pub fn get_ready_count(&self) -> usize {
        self.ready_count.load(Ordering::SeqCst)
    }

    pub async fn get_status(&self) -> Vec<BotStatus> {
        let bots = self.bots.read().clone();
        let mut out = Vec::with_capacity(bots.len());
        for bot in &bots {
            out.push(bot.status().await);
        }
        out
    }

    pub async fn destroy(&self) {
        let bots = self.bots.read().clone();
        for bot in &bots {
            bot.destroy().await;
        }
    }
}

/// Owns the cross-bot shared state (§5): the bot list and the readiness
/// latch are the only state multiple bots' events touch, so all mutation
/// happens serially in this single task rather than behind a shared mutex
/// taken from each bot's own context.
async fn run_event_loop(
    controller: std::sync::Weak<BotController>,
    mut rx: mpsc::UnboundedReceiver<BotEvent>,
) {
    let mut ready_indices: std::collections::HashSet<usize> = std::collections::HashSet::new();

    while let Some(event) = rx.recv().await {
        let Some(controller) = controller.upgrade() else { break };

        match event {
            BotEvent::Ready { index } => {
                ready_indices.insert(index);
            }
            BotEvent::Unready { index } | BotEvent::LoginFailed { index, .. } | BotEvent::GcReconnectFailed { index } => {
                ready_indices.remove(&index);
            }
        }

        controller.ready_count.store(ready_indices.len(), Ordering::SeqCst);
        let now_ready = !ready_indices.is_empty();
        let was_ready = controller.latch.ready.swap(now_ready, Ordering::SeqCst);

        if now_ready && !was_ready {
            let _ = controller.fleet_events_tx.send(FleetEvent::Ready);
        } else if !now_ready && was_ready {
            let _ = controller.fleet_events_tx.send(FleetEvent::Unready);
        }

        controller.maybe_complete_initialization();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::DirectProxySelector;
    use crate::session::{SimScript, SimulatedSessionClientFactory};

    fn test_config() -> FleetConfig {
        FleetConfig {
            max_login_retries: 2,
            login_retry_delay_ms: 5,
            max_gc_reconnect_attempts: 2,
            gc_reconnect_delay_ms: 5,
            request_ttl_ms: 500,
            request_delay_ms: 50,
            health_check_interval_ms: 60_000,
            refresh_period_ms: 30 * 60 * 1000,
            ..FleetConfig::default()
        }
    }

    #[tokio::test]
    async fn cold_start_one_bot_emits_ready_once() {
        let controller = BotController::new(
            test_config(),
            Arc::new(DirectProxySelector),
            Arc::new(SimulatedSessionClientFactory::new(SimScript::default())),
        );
        let mut events = controller.subscribe_fleet_events();

        controller
            .add_bot(AccountCredentials { username: "acct1".into(), password: "pw".into(), auth_secret: None })
            .await;
        controller.wait_for_initialization(Duration::from_secs(5)).await;

        let mut ready_count = 0;
        while let Ok(ev) = tokio::time::timeout(Duration::from_millis(200), events.recv()).await {
            match ev {
                Ok(FleetEvent::Ready) => ready_count += 1,
                Ok(_) => {}
                Err(_) => break,
            }
        }
        assert_eq!(ready_count, 1);
        assert_eq!(controller.get_ready_count(), 1);
    }

    #[tokio::test]
    async fn dispatch_fails_fast_with_no_bots() {
        let controller = BotController::new(
            test_config(),
            Arc::new(DirectProxySelector),
            Arc::new(SimulatedSessionClientFactory::new(SimScript::default())),
        );
        let link = InspectLink::from_fields("1", "2", "3", "0").unwrap();
        let err = controller.lookup_inspect(link).await.unwrap_err();
        assert!(matches!(err, FleetError::NoBotsAvailable));
    }

    #[tokio::test]
    async fn inspect_happy_path_delivers_and_frees_bot() {
        let controller = BotController::new(
            test_config(),
            Arc::new(DirectProxySelector),
            Arc::new(SimulatedSessionClientFactory::new(SimScript::default())),
        );
        controller
            .add_bot(AccountCredentials { username: "acct1".into(), password: "pw".into(), auth_secret: None })
            .await;
        controller.wait_for_initialization(Duration::from_secs(5)).await;

        let link = InspectLink::from_fields("1", "123456", "proof", "0").unwrap();
        let info = controller.lookup_inspect(link).await.unwrap();
        assert_eq!(info.item_id, "123456");
    }

    /// Boundary scenario 2 / P2: the post-reply cooldown is driven by the
    /// configured `request_delay_ms`, not by anything the GC reply carries —
    /// a bot must stay busy for the remainder of `request_delay` after the
    /// reply lands, then go free.
    #[tokio::test]
    async fn busy_cooldown_comes_from_configured_request_delay() {
        let config = FleetConfig {
            request_delay_ms: 150,
            ..test_config()
        };
        let controller = BotController::new(
            config,
            Arc::new(DirectProxySelector),
            Arc::new(SimulatedSessionClientFactory::new(SimScript {
                inspect_delay: Duration::from_millis(20),
                ..Default::default()
            })),
        );
        controller
            .add_bot(AccountCredentials { username: "acct1".into(), password: "pw".into(), auth_secret: None })
            .await;
        controller.wait_for_initialization(Duration::from_secs(5)).await;

        let bot = controller.bots.read()[0].clone();
        let link = InspectLink::from_fields("1", "123456", "proof", "0").unwrap();
        let info = bot.send_inspect(link).await.unwrap();
        assert!(info.delay > 0, "reply landed well inside request_delay, cooldown should remain");

        assert!(bot.is_busy().await, "bot must stay busy for the rest of the cooldown");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!bot.is_busy().await, "bot must free up once the cooldown elapses");
    }

    /// A market-listing link (`m` set, `s == "0"`) must forward `m` as the
    /// owner id to the GC, not the unset `s` field.
    #[tokio::test]
    async fn market_link_forwards_m_as_owner() {
        let controller = BotController::new(
            test_config(),
            Arc::new(DirectProxySelector),
            Arc::new(SimulatedSessionClientFactory::new(SimScript::default())),
        );
        controller
            .add_bot(AccountCredentials { username: "acct1".into(), password: "pw".into(), auth_secret: None })
            .await;
        controller.wait_for_initialization(Duration::from_secs(5)).await;

        let link = InspectLink::from_fields("0", "123456", "proof", "9988776655").unwrap();
        let info = controller.lookup_inspect(link).await.unwrap();
        assert_eq!(info.m, "9988776655");
        assert_eq!(info.item_id, "123456");
    }
}
