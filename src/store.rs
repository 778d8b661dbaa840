/// store.rs – Async client for the Supabase REST and Realtime APIs.
///
/// Responsibilities:
///  - Fetch the whole account collection via PostgREST
///  - Subscribe to row changes via the Realtime (Phoenix) websocket and turn
///    each one into a payload-free refresh signal
use anyhow::{bail, Context, Result};
use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::normalize::RawAccountRecord;

// ---------------------------------------------------------------------------
// Signals sent through the channel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreSignal {
    /// The subscription is (re)established. Anything may have changed while
    /// it was down, so the consumer refetches.
    Subscribed,
    /// A row in the collection was inserted, updated or deleted.
    Changed,
    /// The websocket dropped; a reconnect is pending.
    Disconnected,
}

// ---------------------------------------------------------------------------
// StoreClient
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct StoreClient {
    pub rest_url: String,
    pub ws_url: String,
    pub schema: String,
    pub table: String,
    pub channel: String,
    heartbeat: Duration,
    api_key: String,
    http: Client,
}

impl StoreClient {
    pub fn new(cfg: &StoreConfig, api_key: String) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs_f64(cfg.request_timeout_seconds))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            rest_url: format!("{}/rest/v1", cfg.url.trim_end_matches('/')),
            ws_url: cfg.websocket_base(),
            schema: cfg.schema.clone(),
            table: cfg.table.clone(),
            channel: cfg.channel.clone(),
            heartbeat: Duration::from_secs_f64(cfg.heartbeat_seconds),
            api_key,
            http,
        })
    }

    // ------------------------------------------------------------------
    // Collection fetch
    // ------------------------------------------------------------------

    /// Fetch every row of the account table.
    pub async fn fetch_accounts(&self) -> Result<Vec<RawAccountRecord>> {
        let url = format!("{}/{}", self.rest_url, self.table);
        let resp = self
            .http
            .get(&url)
            .query(&[("select", "*")])
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header("Accept-Profile", &self.schema)
            .send()
            .await
            .context("fetching accounts")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("account fetch returned {status}: {}", truncate(&body, 200));
        }

        let rows: Vec<RawAccountRecord> = resp.json().await.context("parsing account rows")?;
        debug!("Fetched {} account row(s)", rows.len());
        Ok(rows)
    }

    // ------------------------------------------------------------------
    // Realtime feed
    // ------------------------------------------------------------------

    /// Start the Realtime listener as a background tokio task.
    ///
    /// Returns a channel receiver yielding `StoreSignal`s and a `JoinHandle`
    /// for the task. The task reconnects automatically with exponential
    /// backoff until the handle is aborted.
    pub fn start_realtime(&self) -> (mpsc::Receiver<StoreSignal>, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel::<StoreSignal>(64);
        let client = self.clone();

        let handle = tokio::spawn(async move {
            let mut backoff = 1u64;
            loop {
                match client.realtime_run(&tx).await {
                    Ok(true) => {
                        info!("Realtime disconnected after joining – reconnecting");
                        backoff = 1;
                    }
                    Ok(false) => {
                        info!("Realtime closed before the channel joined");
                    }
                    Err(e) => {
                        warn!("Realtime error: {e:#} – reconnecting in {backoff}s");
                    }
                }
                if tx.is_closed() {
                    break;
                }
                send_signal(&tx, StoreSignal::Disconnected);
                tokio::time::sleep(Duration::from_secs(backoff)).await;
                backoff = (backoff * 2).min(60);
            }
        });

        (rx, handle)
    }

    fn topic(&self) -> String {
        format!("realtime:{}", self.channel)
    }

    /// Returns `Ok(true)` if the channel join was acknowledged (so caller can
    /// reset backoff), `Ok(false)` for a close before that, and `Err` for
    /// connection failures.
    async fn realtime_run(&self, tx: &mpsc::Sender<StoreSignal>) -> Result<bool> {
        let url = format!(
            "{}/websocket?apikey={}&vsn=1.0.0",
            self.ws_url, self.api_key
        );
        info!("Connecting to Realtime: {}/websocket", self.ws_url);

        let (ws, _) = connect_async(url.as_str())
            .await
            .context("Realtime connect")?;
        let (mut sink, mut stream) = ws.split();

        let topic = self.topic();
        let join = join_message(&topic, &self.schema, &self.table, &self.api_key);
        sink.send(Message::Text(join.to_string())).await?;
        info!("Joining {topic} for {}.{}", self.schema, self.table);

        let mut heartbeat = tokio::time::interval(self.heartbeat);
        heartbeat.tick().await;
        let mut msg_ref = 1u64;
        let mut joined = false;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    msg_ref += 1;
                    sink.send(Message::Text(heartbeat_message(msg_ref).to_string())).await?;
                }
                msg = stream.next() => {
                    let Some(msg) = msg else { break };
                    match msg.context("Realtime read error")? {
                        Message::Text(text) => match classify_message(&text, &topic) {
                            Some(Frame::JoinOk) => {
                                joined = true;
                                info!("Subscribed to {topic}");
                                send_signal(tx, StoreSignal::Subscribed);
                            }
                            Some(Frame::JoinError(reason)) => {
                                bail!("channel join rejected: {reason}");
                            }
                            Some(Frame::Change) => send_signal(tx, StoreSignal::Changed),
                            Some(Frame::Closed) => break,
                            None => {}
                        },
                        Message::Ping(data) => {
                            sink.send(Message::Pong(data)).await?;
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }
            }
        }
        Ok(joined)
    }
}

fn send_signal(tx: &mpsc::Sender<StoreSignal>, signal: StoreSignal) {
    // Non-blocking send. A full channel already holds a pending refetch.
    match tx.try_send(signal) {
        Ok(_) => {}
        Err(TrySendError::Full(_)) => {
            debug!("Dropping {signal:?} (channel full)");
        }
        Err(TrySendError::Closed(_)) => {}
    }
}

// ---------------------------------------------------------------------------
// Phoenix protocol helpers
// ---------------------------------------------------------------------------

fn join_message(topic: &str, schema: &str, table: &str, api_key: &str) -> Value {
    json!({
        "topic": topic,
        "event": "phx_join",
        "payload": {
            "config": {
                "broadcast": {"self": false},
                "presence": {"key": ""},
                "postgres_changes": [
                    {"event": "*", "schema": schema, "table": table}
                ],
            },
            "access_token": api_key,
        },
        "ref": "1",
        "join_ref": "1",
    })
}

fn heartbeat_message(msg_ref: u64) -> Value {
    json!({
        "topic": "phoenix",
        "event": "heartbeat",
        "payload": {},
        "ref": msg_ref.to_string(),
    })
}

#[derive(Debug, PartialEq)]
enum Frame {
    JoinOk,
    JoinError(String),
    Change,
    Closed,
}

fn classify_message(text: &str, topic: &str) -> Option<Frame> {
    let Ok(msg) = serde_json::from_str::<Value>(text) else {
        return None;
    };
    if msg["topic"].as_str() != Some(topic) {
        return None;
    }

    match msg["event"].as_str()? {
        "phx_reply" if msg["ref"].as_str() == Some("1") => {
            match msg["payload"]["status"].as_str() {
                Some("ok") => Some(Frame::JoinOk),
                _ => Some(Frame::JoinError(
                    msg["payload"]["response"]["reason"]
                        .as_str()
                        .unwrap_or("unknown")
                        .to_string(),
                )),
            }
        }
        "postgres_changes" | "INSERT" | "UPDATE" | "DELETE" => Some(Frame::Change),
        "phx_close" | "phx_error" => Some(Frame::Closed),
        "system" => {
            if msg["payload"]["status"].as_str() == Some("error") {
                warn!(
                    "Realtime system error: {}",
                    msg["payload"]["message"].as_str().unwrap_or("")
                );
            }
            None
        }
        _ => None,
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}
