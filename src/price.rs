/// price.rs – Poll-and-cache reader for a single quoted price.
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::config::PriceConfig;
use crate::models::PriceReading;

pub struct PriceFeed {
    client: reqwest::Client,
    url: String,
    symbol: String,
    field: String,
    reading: PriceReading,
}

impl PriceFeed {
    /// `Ok(None)` when the feed is disabled.
    pub fn from_config(cfg: &PriceConfig) -> Result<Option<Self>> {
        if !cfg.enabled {
            return Ok(None);
        }
        let timeout = Duration::from_secs_f64(cfg.timeout_seconds.max(0.1));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building price HTTP client")?;
        Ok(Some(Self {
            client,
            url: cfg.url.clone(),
            symbol: cfg.symbol.clone(),
            field: cfg.field.clone(),
            reading: PriceReading::unavailable(cfg.symbol.clone()),
        }))
    }

    /// Fetch a fresh price and cache it. On failure the previous reading is
    /// kept and the error is only logged.
    pub async fn poll(&mut self) -> &PriceReading {
        match self.fetch().await {
            Ok(value) => {
                debug!("{} = {value}", self.symbol);
                self.reading = PriceReading {
                    symbol: self.symbol.clone(),
                    value: Some(value),
                    updated_at: Some(Utc::now()),
                };
            }
            Err(e) => warn!("Price poll for {} failed: {e:#}", self.symbol),
        }
        &self.reading
    }

    /// Run the poller as a background task, publishing every reading on a
    /// watch channel. The first poll happens immediately.
    pub fn spawn(
        mut self,
        every: Duration,
    ) -> (watch::Receiver<PriceReading>, tokio::task::JoinHandle<()>) {
        let (tx, rx) = watch::channel(self.reading.clone());
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let reading = self.poll().await.clone();
                if tx.send(reading).is_err() {
                    break;
                }
            }
        });
        (rx, handle)
    }

    async fn fetch(&self) -> Result<f64> {
        let resp = self
            .client
            .get(&self.url)
            .query(&[("symbol", self.symbol.as_str())])
            .send()
            .await
            .context("requesting price")?
            .error_for_status()
            .context("price endpoint status")?;
        let body: Value = resp.json().await.context("parsing price body")?;
        extract_price(&body, &self.field)
            .ok_or_else(|| anyhow!("no numeric '{}' field in price response", self.field))
    }
}

/// Read `field` from a JSON object as a finite number (number or numeric
/// string). An array body uses its first element.
pub fn extract_price(body: &Value, field: &str) -> Option<f64> {
    let obj = match body {
        Value::Array(items) => items.first()?,
        other => other,
    };
    let v = obj.get(field)?;
    v.as_f64()
        .or_else(|| v.as_str().and_then(|s| s.trim().parse::<f64>().ok()))
        .filter(|x| x.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_string_and_number_prices() {
        assert_eq!(
            extract_price(&json!({"symbol": "PAXGUSDT", "price": "2650.12"}), "price"),
            Some(2650.12)
        );
        assert_eq!(extract_price(&json!({"last": 1.5}), "last"), Some(1.5));
        assert_eq!(extract_price(&json!([{"price": 3}]), "price"), Some(3.0));
    }

    #[test]
    fn missing_or_garbage_price_is_none() {
        assert_eq!(extract_price(&json!({"price": "n/a"}), "price"), None);
        assert_eq!(extract_price(&json!({"other": 1}), "price"), None);
        assert_eq!(extract_price(&json!([]), "price"), None);
    }

    #[test]
    fn disabled_feed_is_not_built() {
        let cfg = PriceConfig {
            enabled: false,
            ..PriceConfig::default()
        };
        assert!(PriceFeed::from_config(&cfg).expect("config").is_none());
    }

    #[test]
    fn enabled_feed_starts_with_placeholder() {
        let feed = PriceFeed::from_config(&PriceConfig::default())
            .expect("client builds")
            .expect("feed enabled");
        assert_eq!(feed.reading, PriceReading::unavailable("PAXGUSDT"));
    }

    #[tokio::test]
    async fn failed_poll_keeps_placeholder() {
        let cfg = PriceConfig {
            // Nothing listens on the discard port.
            url: "http://127.0.0.1:9/price".into(),
            timeout_seconds: 1.0,
            ..PriceConfig::default()
        };
        let mut feed = PriceFeed::from_config(&cfg)
            .expect("client builds")
            .expect("feed enabled");
        let reading = feed.poll().await.clone();
        assert_eq!(reading, PriceReading::unavailable(cfg.symbol.clone()));
    }
}
