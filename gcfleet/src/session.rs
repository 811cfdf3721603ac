// gcfleet/src/session.rs
//
// §4.5 SessionClient — the opaque Steam+GC client capability a Bot drives.
// The real Steam auth protocol and GC protobuf wire format are out of scope
// (spec.md §1); this module ships the full trait plus one simulated backend
// so the rest of the crate compiles and is testable without a live Steam
// connection — the same "stub provides the full interface with a simulated
// backend" shape the teacher uses for its Kafka output adapter. A
// production deployment wires a real Steam-client crate behind the same
// trait.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::events::RawGcReply;

#[derive(Debug, Clone)]
pub struct LogOnCredentials {
    pub account_name: String,
    pub password: String,
    pub remember_password: bool,
    pub auth_code: Option<String>,
    pub two_factor_code: Option<String>,
}

/// Events a SessionClient emits, per §4.5. Delivered on the channel the
/// owning Bot constructed its client with.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Error(String),
    Disconnected { code: i32, msg: String },
    LoggedOn,
    OwnershipCached,
    ConnectedToGc,
    DisconnectedFromGc(String),
    ConnectionStatus(String),
    InspectItemInfo(RawGcReply),
}

#[async_trait]
pub trait SessionClient: Send + Sync {
    async fn log_on(&self, credentials: LogOnCredentials);
    async fn log_off(&self);
    async fn relog(&self);
    async fn set_played_games(&self, app_ids: Vec<u32>, persist: bool);
    async fn request_free_license(&self, app_ids: Vec<u32>);
    async fn owns_app(&self, app_id: u32) -> bool;
    async fn inspect_item(&self, owner_id: &str, asset_id: &str, proof_token: &str);
}

/// Constructs a fresh `SessionClient` wired to a given event sender. A Bot
/// creates a new client (via its factory) on every `login()` call — idempotent
/// login per §4.3 tears down any in-flight session first by simply dropping
/// the previous client.
pub trait SessionClientFactory: Send + Sync {
    fn create(&self, events: mpsc::UnboundedSender<SessionEvent>) -> Arc<dyn SessionClient>;
}

// ── Simulated backend ──────────────────────────────────────────────────────────

/// Scripted behavior for `SimulatedSessionClient` — lets tests exercise
/// every branch in §4.3/§7 deterministically.
#[derive(Debug, Clone)]
pub struct SimScript {
    /// Number of `log_on` calls (across retries/relogs) that fail before
    /// one succeeds. 0 = succeed immediately.
    pub fail_logins_before_success: u32,
    /// Error text used for the scripted login failures (classify against
    /// this to pick the retryable vs. fatal path).
    pub login_failure_message: String,
    pub owns_app: bool,
    pub request_free_license_fails: bool,
    pub login_delay: Duration,
    pub gc_connect_delay: Duration,
    pub inspect_delay: Duration,
    /// If false, `inspect_item` never replies — simulates a TTL timeout.
    pub inspect_should_reply: bool,
    pub inspect_paintseed: Option<u32>,
    pub inspect_paintwear: f32,
}

impl Default for SimScript {
    fn default() -> Self {
        Self {
            fail_logins_before_success: 0,
            login_failure_message: "ServiceUnavailable".to_string(),
            owns_app: true,
            request_free_license_fails: false,
            login_delay: Duration::from_millis(10),
            gc_connect_delay: Duration::from_millis(10),
            inspect_delay: Duration::from_millis(10),
            inspect_should_reply: true,
            inspect_paintseed: Some(123),
            inspect_paintwear: 0.2468,
        }
    }
}

pub struct SimulatedSessionClientFactory {
    script: Arc<SimScript>,
    login_attempts: Arc<AtomicU32>,
}

impl SimulatedSessionClientFactory {
    pub fn new(script: SimScript) -> Self {
        Self { script: Arc::new(script), login_attempts: Arc::new(AtomicU32::new(0)) }
    }
}

impl SessionClientFactory for SimulatedSessionClientFactory {
    fn create(&self, events: mpsc::UnboundedSender<SessionEvent>) -> Arc<dyn SessionClient> {
        Arc::new(SimulatedSessionClient {
            script: self.script.clone(),
            login_attempts: self.login_attempts.clone(),
            events,
        })
    }
}

pub struct SimulatedSessionClient {
    script: Arc<SimScript>,
    login_attempts: Arc<AtomicU32>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

#[async_trait]
impl SessionClient for SimulatedSessionClient {
    async fn log_on(&self, _credentials: LogOnCredentials) {
        let script = self.script.clone();
        let attempts = self.login_attempts.clone();
        let tx = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(script.login_delay).await;
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < script.fail_logins_before_success {
                let _ = tx.send(SessionEvent::Error(script.login_failure_message.clone()));
            } else {
                let _ = tx.send(SessionEvent::LoggedOn);
            }
        });
    }

    async fn log_off(&self) {
        let _ = self.events.send(SessionEvent::Disconnected { code: 0, msg: "logoff".into() });
    }

    async fn relog(&self) {
        self.log_on(LogOnCredentials {
            account_name: String::new(),
            password: String::new(),
            remember_password: true,
            auth_code: None,
            two_factor_code: None,
        })
        .await;
    }

    async fn set_played_games(&self, app_ids: Vec<u32>, _persist: bool) {
        if app_ids.is_empty() {
            let tx = self.events.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                let _ = tx.send(SessionEvent::OwnershipCached);
            });
        } else {
            let script = self.script.clone();
            let tx = self.events.clone();
            tokio::spawn(async move {
                tokio::time::sleep(script.gc_connect_delay).await;
                let _ = tx.send(SessionEvent::ConnectedToGc);
            });
        }
    }

    async fn request_free_license(&self, _app_ids: Vec<u32>) {
        if self.script.request_free_license_fails {
            let _ = self.events.send(SessionEvent::Error("LicenseFailure".into()));
        }
    }

    async fn owns_app(&self, _app_id: u32) -> bool {
        self.script.owns_app
    }

    async fn inspect_item(&self, _owner_id: &str, asset_id: &str, _proof_token: &str) {
        if !self.script.inspect_should_reply {
            return;
        }
        let script = self.script.clone();
        let tx = self.events.clone();
        let asset_id = asset_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(script.inspect_delay).await;
            let _ = tx.send(SessionEvent::InspectItemInfo(RawGcReply {
                item_id: asset_id,
                paintseed: script.inspect_paintseed,
                paintwear: script.inspect_paintwear,
                stickers: vec![],
            }));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn simulated_login_succeeds_immediately_by_default() {
        let factory = SimulatedSessionClientFactory::new(SimScript::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = factory.create(tx);
        client
            .log_on(LogOnCredentials {
                account_name: "a".into(),
                password: "b".into(),
                remember_password: true,
                auth_code: None,
                two_factor_code: None,
            })
            .await;
        let ev = rx.recv().await.unwrap();
        assert!(matches!(ev, SessionEvent::LoggedOn));
    }

    #[tokio::test]
    async fn simulated_login_fails_n_times_then_succeeds() {
        let factory = SimulatedSessionClientFactory::new(SimScript {
            fail_logins_before_success: 2,
            login_delay: Duration::from_millis(1),
            ..Default::default()
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = factory.create(tx);
        for _ in 0..2 {
            client
                .log_on(LogOnCredentials {
                    account_name: "a".into(),
                    password: "b".into(),
                    remember_password: true,
                    auth_code: None,
                    two_factor_code: None,
                })
                .await;
            assert!(matches!(rx.recv().await.unwrap(), SessionEvent::Error(_)));
        }
        client
            .log_on(LogOnCredentials {
                account_name: "a".into(),
                password: "b".into(),
                remember_password: true,
                auth_code: None,
                two_factor_code: None,
            })
            .await;
        assert!(matches!(rx.recv().await.unwrap(), SessionEvent::LoggedOn));
    }

    #[tokio::test]
    async fn simulated_inspect_can_be_scripted_to_never_reply() {
        let factory = SimulatedSessionClientFactory::new(SimScript {
            inspect_should_reply: false,
            ..Default::default()
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = factory.create(tx);
        client.inspect_item("1", "2", "3").await;
        let res = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(res.is_err(), "no event should ever arrive");
    }
}
