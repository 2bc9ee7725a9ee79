//! WebSocket feed client with automatic reconnection

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::{FeedCommand, FeedConfig, FeedError, FeedMessage};
use crate::exchange::{RequestSigner, Side};
use crate::market::Cents;

const WS_AUTH_PATH: &str = "/trade-api/ws/v2";

static MALFORMED_FRAMES: AtomicU64 = AtomicU64::new(0);

/// Total malformed feed frames dropped since startup
pub fn malformed_frame_count() -> u64 {
    MALFORMED_FRAMES.load(Ordering::Relaxed)
}

/// Reconnecting order-book feed
///
/// Spawns a background task owning the socket. Consumers receive decoded
/// [`FeedMessage`]s; the command channel adjusts the subscription set, which
/// is replayed in full after every reconnect so books resync from fresh
/// snapshots.
pub struct KalshiFeed {
    config: FeedConfig,
    signer: Arc<dyn RequestSigner>,
}

#[derive(Debug, Deserialize)]
struct WireEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    msg: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct WireSnapshot {
    market_ticker: String,
    #[serde(default)]
    yes: Vec<(Cents, i64)>,
    #[serde(default)]
    no: Vec<(Cents, i64)>,
}

#[derive(Debug, Deserialize)]
struct WireDelta {
    market_ticker: String,
    side: Side,
    price: Cents,
    delta: i64,
    #[serde(default)]
    ts: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct WireSubscribed {
    #[serde(default)]
    market_tickers: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
}

impl KalshiFeed {
    pub fn new(config: FeedConfig, signer: Arc<dyn RequestSigner>) -> Self {
        Self { config, signer }
    }

    /// Connect and return the message stream plus the command channel.
    pub fn connect(&self) -> (mpsc::Receiver<FeedMessage>, mpsc::Sender<FeedCommand>) {
        let (msg_tx, msg_rx) = mpsc::channel(1024);
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let config = self.config.clone();
        let signer = Arc::clone(&self.signer);

        tokio::spawn(async move {
            if let Err(e) = run_feed_loop(config, signer, msg_tx, cmd_rx).await {
                tracing::error!(error = %e, "feed loop terminated");
            }
        });

        (msg_rx, cmd_tx)
    }
}

async fn run_feed_loop(
    config: FeedConfig,
    signer: Arc<dyn RequestSigner>,
    tx: mpsc::Sender<FeedMessage>,
    mut cmd_rx: mpsc::Receiver<FeedCommand>,
) -> Result<(), FeedError> {
    let mut subscribed: BTreeSet<String> = BTreeSet::new();
    let mut reconnect_attempts = 0u32;
    let mut reconnect_delay = config.initial_reconnect_delay;

    loop {
        let mut established = false;
        match run_connection(
            &config,
            &signer,
            &tx,
            &mut cmd_rx,
            &mut subscribed,
            &mut established,
        )
        .await
        {
            Ok(()) => {
                tracing::info!("feed connection closed cleanly");
                let _ = tx.send(FeedMessage::Disconnected).await;
                return Ok(());
            }
            Err(e) => {
                if established {
                    // the outage follows a healthy session; restart backoff
                    reconnect_attempts = 0;
                    reconnect_delay = config.initial_reconnect_delay;
                }
                reconnect_attempts += 1;
                tracing::warn!(
                    error = %e,
                    attempt = reconnect_attempts,
                    "feed connection error, reconnecting"
                );

                if config.max_reconnect_attempts > 0
                    && reconnect_attempts >= config.max_reconnect_attempts
                {
                    let _ = tx.send(FeedMessage::Disconnected).await;
                    return Err(FeedError::MaxReconnectsExceeded);
                }
                if tx.is_closed() {
                    return Ok(());
                }

                let _ = tx
                    .send(FeedMessage::Reconnecting {
                        attempt: reconnect_attempts,
                    })
                    .await;
                sleep(reconnect_delay).await;
                reconnect_delay = (reconnect_delay * 2).min(config.max_reconnect_delay);
            }
        }
    }
}

async fn run_connection(
    config: &FeedConfig,
    signer: &Arc<dyn RequestSigner>,
    tx: &mpsc::Sender<FeedMessage>,
    cmd_rx: &mut mpsc::Receiver<FeedCommand>,
    subscribed: &mut BTreeSet<String>,
    established: &mut bool,
) -> Result<(), FeedError> {
    let mut request = config
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| FeedError::ConnectionFailed(e.to_string()))?;
    let headers = signer
        .headers("GET", WS_AUTH_PATH)
        .map_err(|e| FeedError::ConnectionFailed(e.to_string()))?;
    for (name, value) in headers {
        let name: tokio_tungstenite::tungstenite::http::HeaderName = name
            .parse()
            .map_err(|_| FeedError::ConnectionFailed(format!("bad header name {name}")))?;
        let value = value
            .parse()
            .map_err(|_| FeedError::ConnectionFailed("bad header value".into()))?;
        request.headers_mut().insert(name, value);
    }

    let (stream, _) = connect_async(request)
        .await
        .map_err(|e| FeedError::ConnectionFailed(e.to_string()))?;
    *established = true;
    let (mut sink, mut source) = stream.split();

    let _ = tx.send(FeedMessage::Connected).await;

    // replay the full subscription set so the exchange resends snapshots
    let mut next_cmd_id: u64 = 1;
    if !subscribed.is_empty() {
        let tickers: Vec<String> = subscribed.iter().cloned().collect();
        send_command(&mut sink, "subscribe", &tickers, &mut next_cmd_id).await?;
    }

    loop {
        tokio::select! {
            command = cmd_rx.recv() => {
                let Some(command) = command else {
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(());
                };
                match command {
                    FeedCommand::Subscribe(tickers) => {
                        let fresh: Vec<String> = tickers
                            .into_iter()
                            .filter(|t| subscribed.insert(t.clone()))
                            .collect();
                        if !fresh.is_empty() {
                            send_command(&mut sink, "subscribe", &fresh, &mut next_cmd_id).await?;
                        }
                    }
                    FeedCommand::Unsubscribe(tickers) => {
                        let gone: Vec<String> = tickers
                            .into_iter()
                            .filter(|t| subscribed.remove(t))
                            .collect();
                        if !gone.is_empty() {
                            send_command(&mut sink, "unsubscribe", &gone, &mut next_cmd_id).await?;
                        }
                    }
                }
            }
            frame = source.next() => {
                let Some(frame) = frame else {
                    return Err(FeedError::ConnectionFailed("stream ended".into()));
                };
                let frame = frame.map_err(|e| FeedError::ConnectionFailed(e.to_string()))?;
                match frame {
                    Message::Text(text) => {
                        if let Some(message) = decode(&text) {
                            if tx.send(message).await.is_err() {
                                return Err(FeedError::ChannelClosed);
                            }
                        }
                    }
                    Message::Ping(payload) => {
                        let _ = sink.send(Message::Pong(payload)).await;
                    }
                    Message::Close(frame) => {
                        return Err(FeedError::ConnectionFailed(format!(
                            "server closed connection: {frame:?}"
                        )));
                    }
                    _ => {}
                }
            }
        }
    }
}

async fn send_command<S>(
    sink: &mut S,
    cmd: &str,
    tickers: &[String],
    next_id: &mut u64,
) -> Result<(), FeedError>
where
    S: SinkExt<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let payload = serde_json::json!({
        "id": *next_id,
        "cmd": cmd,
        "params": {
            "channels": ["orderbook_delta"],
            "market_tickers": tickers,
        }
    });
    *next_id += 1;
    sink.send(Message::Text(payload.to_string()))
        .await
        .map_err(|e| FeedError::ConnectionFailed(e.to_string()))
}

/// Decode one wire frame; malformed frames are counted and dropped.
fn decode(text: &str) -> Option<FeedMessage> {
    let envelope: WireEnvelope = match serde_json::from_str(text) {
        Ok(env) => env,
        Err(e) => {
            MALFORMED_FRAMES.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(error = %e, "malformed feed frame dropped");
            return None;
        }
    };

    match envelope.kind.as_str() {
        "orderbook_snapshot" => {
            let snap: WireSnapshot = serde_json::from_value(envelope.msg).ok()?;
            Some(FeedMessage::Snapshot {
                ticker: snap.market_ticker,
                yes: snap.yes,
                no: snap.no,
            })
        }
        "orderbook_delta" => {
            let delta: WireDelta = serde_json::from_value(envelope.msg).ok()?;
            let ts = delta
                .ts
                .and_then(|ms| chrono::DateTime::from_timestamp_millis(ms))
                .unwrap_or_else(chrono::Utc::now);
            Some(FeedMessage::Delta {
                ticker: delta.market_ticker,
                side: delta.side,
                price: delta.price,
                delta_qty: delta.delta,
                ts,
            })
        }
        "subscribed" => {
            let sub: WireSubscribed = serde_json::from_value(envelope.msg).unwrap_or(WireSubscribed {
                market_tickers: vec![],
            });
            Some(FeedMessage::Subscribed {
                tickers: sub.market_tickers,
            })
        }
        "error" => {
            let err: WireError = serde_json::from_value(envelope.msg).unwrap_or(WireError {
                code: 0,
                msg: "unknown".into(),
            });
            Some(FeedMessage::Error {
                code: err.code,
                msg: err.msg,
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_snapshot() {
        let text = r#"{
            "type": "orderbook_snapshot",
            "msg": {"market_ticker": "MKT-A", "yes": [[29, 100], [28, 50]], "no": [[59, 80]]}
        }"#;
        match decode(text) {
            Some(FeedMessage::Snapshot { ticker, yes, no }) => {
                assert_eq!(ticker, "MKT-A");
                assert_eq!(yes, vec![(29, 100), (28, 50)]);
                assert_eq!(no, vec![(59, 80)]);
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn decodes_delta_with_timestamp() {
        let text = r#"{
            "type": "orderbook_delta",
            "msg": {"market_ticker": "MKT-A", "side": "no", "price": 61, "delta": -20, "ts": 1700000000000}
        }"#;
        match decode(text) {
            Some(FeedMessage::Delta {
                ticker,
                side,
                price,
                delta_qty,
                ts,
            }) => {
                assert_eq!(ticker, "MKT-A");
                assert_eq!(side, Side::No);
                assert_eq!(price, 61);
                assert_eq!(delta_qty, -20);
                assert_eq!(ts.timestamp_millis(), 1_700_000_000_000);
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn malformed_frame_is_dropped() {
        assert!(decode("not json").is_none());
        assert!(decode(r#"{"type": "orderbook_delta", "msg": {}}"#).is_none());
    }

    #[test]
    fn unknown_type_is_ignored() {
        assert!(decode(r#"{"type": "heartbeat", "msg": {}}"#).is_none());
    }

    #[test]
    fn decodes_exchange_error() {
        let text = r#"{"type": "error", "msg": {"code": 6, "msg": "bad ticker"}}"#;
        match decode(text) {
            Some(FeedMessage::Error { code, msg }) => {
                assert_eq!(code, 6);
                assert_eq!(msg, "bad ticker");
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }
}
