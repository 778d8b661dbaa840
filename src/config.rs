/// config.rs – Load settings from config.yaml + environment variables.
///
/// Environment variables always override YAML values.
/// The store key is read exclusively from the environment / .env file.
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::models::{SortDirection, SortKey, ViewConfig};
use crate::staleness::{
    StalenessRule, OFFLINE_AFTER_SECONDS, SKEW_OFFSET_SECONDS, SKEW_TRIGGER_SECONDS,
};

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TerminalConfig {
    pub title: String,
    pub log_level: String,
    /// Log file used while the dashboard owns the screen.
    pub log_file: String,
    /// How often (seconds) connectivity status is re-evaluated without a refetch.
    pub clock_tick_seconds: f64,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            title: "AOT TERMINAL".into(),
            log_level: "INFO".into(),
            log_file: "aot-terminal.log".into(),
            clock_tick_seconds: 10.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Project URL, e.g. https://xyzcompany.supabase.co
    pub url: String,
    /// Realtime websocket base. Derived from `url` when empty.
    pub realtime_url: String,
    pub schema: String,
    pub table: String,
    /// Realtime channel name used for the change subscription.
    pub channel: String,
    pub request_timeout_seconds: f64,
    pub heartbeat_seconds: f64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            realtime_url: String::new(),
            schema: "public".into(),
            table: "trading_accounts".into(),
            channel: "aot_v14".into(),
            request_timeout_seconds: 15.0,
            heartbeat_seconds: 25.0,
        }
    }
}

impl StoreConfig {
    /// Websocket endpoint for change notifications.
    pub fn websocket_base(&self) -> String {
        if !self.realtime_url.trim().is_empty() {
            return self.realtime_url.trim_end_matches('/').to_string();
        }
        let base = self.url.trim_end_matches('/');
        let ws = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        format!("{ws}/realtime/v1")
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StalenessConfig {
    /// Seconds since last update after which an account is shown offline.
    pub offline_after_seconds: f64,
    /// Differences above this are assumed to carry the writer's offset error.
    pub skew_trigger_seconds: f64,
    /// Fixed offset error subtracted when the trigger is exceeded (7 h).
    pub skew_offset_seconds: f64,
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self {
            offline_after_seconds: OFFLINE_AFTER_SECONDS,
            skew_trigger_seconds: SKEW_TRIGGER_SECONDS,
            skew_offset_seconds: SKEW_OFFSET_SECONDS,
        }
    }
}

impl StalenessConfig {
    pub fn rule(&self) -> StalenessRule {
        StalenessRule {
            offline_after_seconds: self.offline_after_seconds,
            skew_trigger_seconds: self.skew_trigger_seconds,
            skew_offset_seconds: self.skew_offset_seconds,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PriceConfig {
    pub enabled: bool,
    pub url: String,
    pub symbol: String,
    /// Top-level JSON field holding the price.
    pub field: String,
    pub poll_interval_seconds: f64,
    pub timeout_seconds: f64,
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "https://api.binance.com/api/v3/ticker/price".into(),
            symbol: "PAXGUSDT".into(),
            field: "price".into(),
            poll_interval_seconds: 30.0,
            timeout_seconds: 8.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DashboardConfig {
    /// Dashboard refresh rate in seconds.
    pub refresh_rate: f64,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self { refresh_rate: 1.0 }
    }
}

// ---------------------------------------------------------------------------
// Top-level settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub terminal: TerminalConfig,
    pub store: StoreConfig,
    pub staleness: StalenessConfig,
    pub price: PriceConfig,
    pub view: ViewConfig,
    pub dashboard: DashboardConfig,

    // Populated from env, not from YAML.
    #[serde(skip)]
    pub store_key: Option<String>,
}

impl Settings {
    /// Load settings from *config_path* YAML file, then overlay env vars.
    pub fn load(config_path: &str) -> Result<Self> {
        // Try to load .env file (ignore error if absent)
        let _ = dotenvy::dotenv();

        let mut settings = if std::path::Path::new(config_path).exists() {
            let yaml = std::fs::read_to_string(config_path).context("reading config file")?;
            serde_yaml::from_str::<Settings>(&yaml).context("parsing config YAML")?
        } else {
            Settings::default()
        };

        if let Ok(url) = std::env::var("SUPABASE_URL") {
            settings.store.url = url;
        }
        settings.store_key = std::env::var("SUPABASE_ANON_KEY")
            .or_else(|_| std::env::var("SUPABASE_KEY"))
            .ok()
            .filter(|k| !k.trim().is_empty());
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            settings.terminal.log_level = level;
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn has_store(&self) -> bool {
        !self.store.url.trim().is_empty() && self.store_key.is_some()
    }

    /// Apply `--sort` / `--desc` from the command line.
    pub fn override_view(&mut self, sort: Option<SortKey>, descending: bool) {
        if let Some(key) = sort {
            self.view.sort = key;
        }
        if descending {
            self.view.direction = SortDirection::Descending;
        }
    }

    fn validate(&self) -> Result<()> {
        validate_interval("terminal.clock_tick_seconds", self.terminal.clock_tick_seconds)?;
        validate_interval("dashboard.refresh_rate", self.dashboard.refresh_rate)?;
        validate_interval(
            "store.request_timeout_seconds",
            self.store.request_timeout_seconds,
        )?;
        validate_interval("store.heartbeat_seconds", self.store.heartbeat_seconds)?;
        validate_positive(
            "staleness.offline_after_seconds",
            self.staleness.offline_after_seconds,
        )?;
        validate_positive(
            "staleness.skew_trigger_seconds",
            self.staleness.skew_trigger_seconds,
        )?;
        if !self.staleness.skew_offset_seconds.is_finite() || self.staleness.skew_offset_seconds < 0.0
        {
            bail!("staleness.skew_offset_seconds must be a finite number >= 0");
        }

        if self.store.table.trim().is_empty() {
            bail!("store.table must not be empty");
        }
        if self.store.schema.trim().is_empty() {
            bail!("store.schema must not be empty");
        }
        if self.store.channel.trim().is_empty() {
            bail!("store.channel must not be empty");
        }
        let url = self.store.url.trim();
        if !url.is_empty() && !(url.starts_with("https://") || url.starts_with("http://")) {
            bail!("store.url must start with http:// or https://");
        }

        if self.price.enabled {
            validate_interval("price.poll_interval_seconds", self.price.poll_interval_seconds)?;
            validate_interval("price.timeout_seconds", self.price.timeout_seconds)?;
            if self.price.url.trim().is_empty() {
                bail!("price.url must be non-empty when price.enabled=true");
            }
            if self.price.symbol.trim().is_empty() {
                bail!("price.symbol must be non-empty when price.enabled=true");
            }
            if self.price.field.trim().is_empty() {
                bail!("price.field must be non-empty when price.enabled=true");
            }
        }

        Ok(())
    }
}

/// Shortest accepted timer or timeout. Anything smaller rounds to a zero
/// `Duration`, which `tokio::time::interval` panics on.
const MIN_INTERVAL_SECONDS: f64 = 0.001;

fn validate_interval(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < MIN_INTERVAL_SECONDS {
        bail!("{name} must be a finite number >= {MIN_INTERVAL_SECONDS}");
    }
    Ok(())
}

fn validate_positive(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        bail!("{name} must be a finite number > 0");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn defaults_match_house_constants() {
        let settings = Settings::default();
        assert_eq!(settings.terminal.clock_tick_seconds, 10.0);
        assert_eq!(settings.price.poll_interval_seconds, 30.0);
        assert_eq!(settings.staleness.rule(), StalenessRule::default());
        assert_eq!(settings.view, ViewConfig::default());
    }

    #[test]
    fn validate_rejects_zero_clock_tick() {
        let mut settings = Settings::default();
        settings.terminal.clock_tick_seconds = 0.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn validate_rejects_sub_millisecond_intervals() {
        let mut settings = Settings::default();
        settings.store.heartbeat_seconds = 1e-10;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.price.poll_interval_seconds = 0.0005;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.dashboard.refresh_rate = 0.001;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn validate_rejects_non_finite_offline_threshold() {
        let mut settings = Settings::default();
        settings.staleness.offline_after_seconds = f64::NAN;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_table() {
        let mut settings = Settings::default();
        settings.store.table = "  ".into();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn validate_rejects_enabled_price_feed_without_symbol() {
        let mut settings = Settings::default();
        settings.price.symbol.clear();
        assert!(settings.validate().is_err());

        settings.price.enabled = false;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_store_scheme() {
        let mut settings = Settings::default();
        settings.store.url = "ftp://example.com".into();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn websocket_base_is_derived_from_project_url() {
        let mut store = StoreConfig {
            url: "https://abc.supabase.co/".into(),
            ..StoreConfig::default()
        };
        assert_eq!(store.websocket_base(), "wss://abc.supabase.co/realtime/v1");

        store.realtime_url = "ws://localhost:4000/socket/".into();
        assert_eq!(store.websocket_base(), "ws://localhost:4000/socket");
    }

    #[test]
    fn yaml_sections_are_optional() {
        let yaml = "view:\n  sort: equity\n  direction: desc\nstaleness:\n  offline_after_seconds: 300\n";
        let settings: Settings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.view.sort, SortKey::Equity);
        assert_eq!(settings.view.direction, SortDirection::Descending);
        assert_eq!(settings.staleness.offline_after_seconds, 300.0);
        assert_eq!(settings.store.table, "trading_accounts");
    }

    #[test]
    fn override_view_applies_cli_flags() {
        let mut settings = Settings::default();
        settings.override_view(Some(SortKey::Name), true);
        assert_eq!(
            settings.view,
            ViewConfig::new(SortKey::Name, SortDirection::Descending)
        );
    }
}
