use std::env;
use std::time::Duration;
use url::Url;

use crate::pagination::MAX_PAGE_SIZE;
use crate::reconcile::{ReconcileMode, Reconciler};
use crate::transport::RetryPolicy;

#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: Url,
    pub ws_path: String,
    pub session_cookie: Option<String>,
    pub reconnect_delay_ms: u64,
    pub reconnect_max_attempts: u32,
    pub connect_timeout_ms: u64,
    pub http_timeout_ms: u64,
    pub page_size: u32,
    pub reconcile_mode: ModeSetting,
    pub reload_delay_ms: u64,
    pub highlight_fade_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeSetting {
    Incremental,
    Reload,
}

impl std::str::FromStr for ModeSetting {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "incremental" => Ok(Self::Incremental),
            "reload" => Ok(Self::Reload),
            other => Err(anyhow::anyhow!(
                "RECONCILE_MODE must be incremental or reload, got {other:?}"
            )),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);
        let base_raw = vars.or("HOOKWATCH_BASE_URL", "http://localhost:5000");
        let base_url = Url::parse(&base_raw)
            .map_err(|err| anyhow::anyhow!("HOOKWATCH_BASE_URL {base_raw:?} is invalid: {err}"))?;
        let ws_path = vars.or("HOOKWATCH_WS_PATH", "/ws");
        let session_cookie = vars
            .get("HOOKWATCH_SESSION_COOKIE")
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        let reconnect_delay_ms = vars.parse_or("RECONNECT_DELAY_MS", 2000)?;
        let reconnect_max_attempts = vars.parse_or("RECONNECT_MAX_ATTEMPTS", 0)?;
        let connect_timeout_ms = vars.parse_or("CONNECT_TIMEOUT_MS", 20_000)?;
        let http_timeout_ms = vars.parse_or("HTTP_TIMEOUT_MS", 10_000)?;
        let page_size: u32 = vars.parse_or("PAGE_SIZE", MAX_PAGE_SIZE)?;
        let reconcile_mode = match vars.get("RECONCILE_MODE") {
            Some(raw) => raw.parse()?,
            None => ModeSetting::Incremental,
        };
        let reload_delay_ms = vars.parse_or("RELOAD_DELAY_MS", 1000)?;
        let highlight_fade_ms = vars.parse_or("HIGHLIGHT_FADE_MS", 100)?;

        // Guardrail checks for nonsensical configuration.
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(anyhow::anyhow!("HOOKWATCH_BASE_URL must be http or https"));
        }
        if !ws_path.starts_with('/') {
            return Err(anyhow::anyhow!("HOOKWATCH_WS_PATH must start with '/'"));
        }
        if reconnect_delay_ms == 0 {
            return Err(anyhow::anyhow!("RECONNECT_DELAY_MS must be > 0"));
        }
        if connect_timeout_ms == 0 || http_timeout_ms == 0 {
            return Err(anyhow::anyhow!("timeouts must be > 0"));
        }

        Ok(Self {
            base_url,
            ws_path,
            session_cookie,
            reconnect_delay_ms,
            reconnect_max_attempts,
            connect_timeout_ms,
            http_timeout_ms,
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
            reconcile_mode,
            reload_delay_ms,
            highlight_fade_ms,
        })
    }

    /// Push endpoint on the same origin: `http` becomes `ws`, `https`
    /// becomes `wss`.
    pub fn push_url(&self) -> anyhow::Result<Url> {
        let mut url = self.base_url.join(&self.ws_path)?;
        let scheme = if self.base_url.scheme() == "https" {
            "wss"
        } else {
            "ws"
        };
        url.set_scheme(scheme)
            .map_err(|_| anyhow::anyhow!("cannot derive push url from {}", self.base_url))?;
        Ok(url)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            delay: Duration::from_millis(self.reconnect_delay_ms),
            max_attempts: (self.reconnect_max_attempts > 0).then_some(self.reconnect_max_attempts),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    pub fn reload_delay(&self) -> Duration {
        Duration::from_millis(self.reload_delay_ms)
    }

    pub fn reconciler(&self) -> Reconciler {
        let mode = match self.reconcile_mode {
            ModeSetting::Incremental => ReconcileMode::Incremental,
            ModeSetting::Reload => ReconcileMode::ReloadAfter(self.reload_delay()),
        };
        Reconciler::new(mode, Duration::from_millis(self.highlight_fade_ms))
    }
}

struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parse_or<T>(&self, key: &str, default: T) -> anyhow::Result<T>
    where
        T: std::str::FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.get(key) {
            Some(value) => value
                .trim()
                .parse()
                .map_err(|err| anyhow::anyhow!("{key}: {err}")),
            None => Ok(default),
        }
    }
}
