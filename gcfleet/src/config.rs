// gcfleet/src/config.rs
//
// §6 configuration. A serde struct with a `Default` impl giving every
// documented default, loadable from a JSON file and overridable by
// `GCFLEET_*` environment variables — the same shape as the teacher's
// `KafkaConfig`/`ProxyConfig` structs.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::FleetError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub max_login_retries: u32,
    pub login_retry_delay_ms: u64,
    pub max_gc_reconnect_attempts: u32,
    pub gc_reconnect_delay_ms: u64,
    pub request_ttl_ms: u64,
    pub request_delay_ms: u64,
    pub proxy_switch_cooldown_ms: u64,
    pub proxy_port: u16,
    pub clash_api_url: Option<String>,
    pub clash_secret: Option<String>,
    pub health_check_interval_ms: u64,
    pub gc_inactivity_ceiling_ms: u64,
    pub refresh_period_ms: u64,
    pub refresh_jitter_ms: u64,
    pub startup_barrier_ms: u64,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            max_login_retries: 5,
            login_retry_delay_ms: 5_000,
            max_gc_reconnect_attempts: 10,
            gc_reconnect_delay_ms: 10_000,
            request_ttl_ms: 30_000,
            request_delay_ms: 1_000,
            proxy_switch_cooldown_ms: 5_000,
            proxy_port: 8080,
            clash_api_url: None,
            clash_secret: None,
            health_check_interval_ms: 60_000,
            gc_inactivity_ceiling_ms: 10 * 60 * 1000,
            refresh_period_ms: 30 * 60 * 1000,
            refresh_jitter_ms: 4 * 60 * 1000,
            startup_barrier_ms: 5 * 60 * 1000,
        }
    }
}

impl FleetConfig {
    pub fn load(path: &Path) -> Result<Self, FleetError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| FleetError::InvalidLink(format!("reading config {}: {e}", path.display())))?;
        let mut cfg: FleetConfig = serde_json::from_str(&raw)
            .map_err(|e| FleetError::InvalidLink(format!("parsing config {}: {e}", path.display())))?;
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// `GCFLEET_*` env vars override the file for the handful of tunables
    /// most commonly flipped per-deployment without touching the config
    /// file (deliberately not exhaustive — mirrors the teacher's own
    /// env-for-a-few-knobs style rather than a full env-everything layer).
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("GCFLEET_MAX_LOGIN_RETRIES") {
            if let Ok(n) = v.parse() {
                self.max_login_retries = n;
            }
        }
        if let Ok(v) = std::env::var("GCFLEET_CLASH_API_URL") {
            self.clash_api_url = Some(v);
        }
        if let Ok(v) = std::env::var("GCFLEET_CLASH_SECRET") {
            self.clash_secret = Some(v);
        }
        if let Ok(v) = std::env::var("GCFLEET_PROXY_PORT") {
            if let Ok(n) = v.parse() {
                self.proxy_port = n;
            }
        }
    }
}

/// One account's login credentials, loaded from a separate file so secrets
/// don't sit next to the tunables in `FleetConfig`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountCredentials {
    pub username: String,
    pub password: String,
    /// Either a short one-shot 2FA code or a long TOTP seed — see
    /// `totp::resolve_auth_code`.
    pub auth_secret: Option<String>,
}

impl AccountCredentials {
    pub fn load_list(path: &Path) -> Result<Vec<Self>, FleetError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| FleetError::InvalidLink(format!("reading accounts {}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| FleetError::InvalidLink(format!("parsing accounts {}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = FleetConfig::default();
        assert_eq!(cfg.max_login_retries, 5);
        assert_eq!(cfg.login_retry_delay_ms, 5_000);
        assert_eq!(cfg.max_gc_reconnect_attempts, 10);
        assert_eq!(cfg.gc_reconnect_delay_ms, 10_000);
        assert_eq!(cfg.proxy_switch_cooldown_ms, 5_000);
    }

    #[test]
    fn loads_partial_json_with_defaults() {
        let dir = std::env::temp_dir().join(format!("gcfleet-test-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        std::fs::write(&path, r#"{"max_login_retries": 3}"#).unwrap();
        let cfg = FleetConfig::load(&path).unwrap();
        assert_eq!(cfg.max_login_retries, 3);
        assert_eq!(cfg.request_ttl_ms, 30_000);
        std::fs::remove_dir_all(&dir).ok();
    }
}
