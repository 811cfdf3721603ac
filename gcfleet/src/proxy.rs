// gcfleet/src/proxy.rs
//
// §4.2 ProxySelector — rotating egress proxy assignment, cooldown-bounded.
//
// Three implementations behind one trait, selected by config, matching the
// pack's capability-port style rather than one enum-matched monolith:
//   - ClashProxySelector  — talks to a Clash-compatible control plane over
//                           HTTP (§6).
//   - StaticProxySelector — precomputed bot-index → named-proxy round robin.
//   - DirectProxySelector — always direct (no proxy), explicit opt-out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// A concrete egress binding for one bot, or direct connection if absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyBinding {
    pub http_proxy: String,
    pub socks_proxy: String,
    pub name: String,
}

#[async_trait]
pub trait ProxySelector: Send + Sync {
    /// A fresh binding honoring the switch cooldown; `None` on cooldown,
    /// daemon error, or empty candidate set — always non-fatal (§4.2
    /// failure policy), the bot falls back to direct connection.
    async fn pick_random(&self) -> Option<ProxyBinding>;

    /// The currently selected upstream's name, if any.
    async fn current_name(&self) -> Option<String>;
}

// ── Direct (no proxy) ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct DirectProxySelector;

#[async_trait]
impl ProxySelector for DirectProxySelector {
    async fn pick_random(&self) -> Option<ProxyBinding> {
        None
    }

    async fn current_name(&self) -> Option<String> {
        None
    }
}

// ── Static round robin ────────────────────────────────────────────────────────

/// Precomputed `bot index -> named proxy`, no daemon interaction — §4.2's
/// "alternative mode".
pub struct StaticProxySelector {
    assignments: Vec<ProxyBinding>,
}

impl StaticProxySelector {
    pub fn new(assignments: Vec<ProxyBinding>) -> Self {
        Self { assignments }
    }

    /// `pickForBot(idx, id)` — looks up the binding without daemon I/O.
    pub fn pick_for_bot(&self, idx: usize) -> Option<ProxyBinding> {
        if self.assignments.is_empty() {
            return None;
        }
        Some(self.assignments[idx % self.assignments.len()].clone())
    }
}

#[async_trait]
impl ProxySelector for StaticProxySelector {
    async fn pick_random(&self) -> Option<ProxyBinding> {
        self.assignments.choose(&mut rand::thread_rng()).cloned()
    }

    async fn current_name(&self) -> Option<String> {
        None
    }
}

// ── Clash-compatible control plane ───────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ProxiesResponse {
    proxies: HashMap<String, ProxyEntry>,
}

#[derive(Debug, Deserialize)]
struct ProxyEntry {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    alive: Option<bool>,
}

const META_SELECTOR_KINDS: &[&str] =
    &["Direct", "Reject", "Selector", "URLTest", "Fallback", "LoadBalance"];

struct ClashInner {
    current: Option<String>,
    last_switch: Option<Instant>,
}

pub struct ClashProxySelector {
    client: reqwest::Client,
    base_url: String,
    secret: Option<String>,
    cooldown: Duration,
    proxy_port: u16,
    inner: Mutex<ClashInner>,
}

impl ClashProxySelector {
    pub fn new(base_url: String, secret: Option<String>, cooldown: Duration, proxy_port: u16) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("reqwest client builds"),
            base_url,
            secret,
            cooldown,
            proxy_port,
            inner: Mutex::new(ClashInner { current: None, last_switch: None }),
        }
    }

    async fn fetch_candidates(&self) -> Option<Vec<String>> {
        let mut req = self.client.get(format!("{}/proxies", self.base_url));
        if let Some(secret) = &self.secret {
            req = req.bearer_auth(secret);
        }
        let resp = req.send().await.map_err(|e| warn!("clash proxy list fetch failed: {e}")).ok()?;
        let body: ProxiesResponse = resp.json().await.map_err(|e| warn!("clash proxy list decode failed: {e}")).ok()?;

        Some(
            body.proxies
                .into_iter()
                .filter(|(_, entry)| !META_SELECTOR_KINDS.contains(&entry.kind.as_str()))
                .filter(|(_, entry)| entry.alive != Some(false))
                .map(|(name, _)| name)
                .collect(),
        )
    }

    async fn switch_to(&self, name: &str) -> bool {
        let mut req = self
            .client
            .put(format!("{}/proxies/PROXY", self.base_url))
            .json(&serde_json::json!({ "name": name }));
        if let Some(secret) = &self.secret {
            req = req.bearer_auth(secret);
        }
        match req.send().await {
            Ok(resp) if resp.status().as_u16() == 204 => true,
            Ok(resp) => {
                warn!("clash proxy switch rejected: {}", resp.status());
                false
            }
            Err(e) => {
                warn!("clash proxy switch failed: {e}");
                false
            }
        }
    }

    fn binding_for(&self, name: &str) -> ProxyBinding {
        ProxyBinding {
            http_proxy: format!("http://127.0.0.1:{}", self.proxy_port),
            socks_proxy: format!("socks5://127.0.0.1:{}", self.proxy_port + 1),
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl ProxySelector for ClashProxySelector {
    async fn pick_random(&self) -> Option<ProxyBinding> {
        let mut guard = self.inner.lock().await;
        if let Some(last) = guard.last_switch {
            if last.elapsed() < self.cooldown {
                debug!("proxy switch cooldown active, returning None");
                return None;
            }
        }

        let mut candidates = self.fetch_candidates().await?;
        if candidates.is_empty() {
            return None;
        }
        candidates.sort();

        let mut rng = rand::thread_rng();
        let mut choice = candidates.choose(&mut rng).cloned()?;
        if candidates.len() > 1 && Some(&choice) == guard.current.as_ref() {
            let complement: Vec<&String> = candidates.iter().filter(|c| Some(*c) != guard.current.as_ref()).collect();
            if let Some(alt) = complement.choose(&mut rng) {
                choice = (*alt).clone();
            }
        }

        if !self.switch_to(&choice).await {
            return None;
        }

        guard.current = Some(choice.clone());
        guard.last_switch = Some(Instant::now());
        Some(self.binding_for(&choice))
    }

    async fn current_name(&self) -> Option<String> {
        self.inner.lock().await.current.clone()
    }
}

/// Build the configured `ProxySelector` from `FleetConfig`, falling back to
/// direct connection when no control plane is configured — §4.2's failure
/// policy applies at construction time too, not just per-call.
pub fn from_config(cfg: &crate::config::FleetConfig) -> Arc<dyn ProxySelector> {
    match &cfg.clash_api_url {
        Some(url) => Arc::new(ClashProxySelector::new(
            url.clone(),
            cfg.clash_secret.clone(),
            Duration::from_millis(cfg.proxy_switch_cooldown_ms),
            cfg.proxy_port,
        )),
        None => Arc::new(DirectProxySelector),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn direct_selector_always_none() {
        let sel = DirectProxySelector;
        assert!(sel.pick_random().await.is_none());
        assert!(sel.current_name().await.is_none());
    }

    #[tokio::test]
    async fn static_selector_round_robins_by_index() {
        let sel = StaticProxySelector::new(vec![
            ProxyBinding { http_proxy: "http://127.0.0.1:1".into(), socks_proxy: "socks5://127.0.0.1:2".into(), name: "a".into() },
            ProxyBinding { http_proxy: "http://127.0.0.1:3".into(), socks_proxy: "socks5://127.0.0.1:4".into(), name: "b".into() },
        ]);
        assert_eq!(sel.pick_for_bot(0).unwrap().name, "a");
        assert_eq!(sel.pick_for_bot(1).unwrap().name, "b");
        assert_eq!(sel.pick_for_bot(2).unwrap().name, "a");
    }

    #[tokio::test]
    async fn static_selector_empty_is_direct() {
        let sel = StaticProxySelector::new(vec![]);
        assert!(sel.pick_for_bot(0).is_none());
    }

    #[tokio::test]
    async fn clash_selector_filters_meta_and_dead_entries_then_switches() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/proxies"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "proxies": {
                    "GLOBAL": { "type": "Selector" },
                    "DIRECT": { "type": "Direct" },
                    "dead-upstream": { "type": "Shadowsocks", "alive": false },
                    "live-upstream": { "type": "Shadowsocks", "alive": true },
                }
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/proxies/PROXY"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let sel = ClashProxySelector::new(server.uri(), None, Duration::from_millis(50), 9000);
        let binding = sel.pick_random().await.expect("one live concrete upstream");
        assert_eq!(binding.name, "live-upstream");
        assert_eq!(binding.http_proxy, "http://127.0.0.1:9000");
        assert_eq!(binding.socks_proxy, "socks5://127.0.0.1:9001");
        assert_eq!(sel.current_name().await, Some("live-upstream".to_string()));
    }

    #[tokio::test]
    async fn clash_selector_respects_switch_cooldown() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/proxies"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "proxies": { "upstream-a": { "type": "Shadowsocks" } }
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/proxies/PROXY"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let sel = ClashProxySelector::new(server.uri(), None, Duration::from_millis(200), 9000);
        assert!(sel.pick_random().await.is_some());
        assert!(sel.pick_random().await.is_none(), "second call within cooldown must return None");
    }
}
