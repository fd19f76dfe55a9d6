//! Server-push subscriptions.
//!
//! The gateway pushes order/trade events on `log/subscribe` and per-symbol
//! price updates on `ticker/subscribe/{symbol}`, both as `text/event-stream`
//! responses. Frames are decoded incrementally from the byte stream and
//! forwarded on bounded channels; the subscription tasks exit when the
//! store's shutdown signal fires or the gateway closes the stream.

use std::str::FromStr;

use chrono::Utc;
use futures::StreamExt;
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use spbridge_broker::{BrokerError, BrokerErrorKind, BrokerResult};
use spbridge_core::{GatewayEvent, OrderRef, TickerUpdate};

use crate::{GatewayClient, ShutdownSignal};

const EVENT_CHANNEL_CAPACITY: usize = 1024;
const TICKER_CHANNEL_CAPACITY: usize = 2048;

/// One decoded `event`/`data` pair from an event stream.
#[derive(Clone, Debug, PartialEq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

/// Incremental decoder for `text/event-stream` payloads. Bytes arrive in
/// arbitrary chunk boundaries; frames are complete once a blank line is seen.
#[derive(Default)]
pub struct SseDecoder {
    buffer: String,
}

impl SseDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every frame completed by it.
    pub fn push(&mut self, chunk: &str) -> Vec<SseFrame> {
        self.buffer.push_str(chunk);
        // The stream may terminate lines with CRLF; fold them to LF so frame
        // detection sees one terminator. A trailing CR stays buffered until
        // its LF arrives with the next chunk.
        if self.buffer.contains('\r') {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }
        let mut frames = Vec::new();
        while let Some(boundary) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..boundary + 2).collect();
            if let Some(frame) = parse_block(block.trim_end()) {
                frames.push(frame);
            }
        }
        frames
    }
}

fn parse_block(block: &str) -> Option<SseFrame> {
    let mut event = String::from("message");
    let mut data_lines: Vec<&str> = Vec::new();
    for line in block.lines() {
        if line.starts_with(':') {
            continue; // comment / keep-alive
        }
        if let Some(value) = line.strip_prefix("event:") {
            event = value.trim_start().to_string();
        } else if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.strip_prefix(' ').unwrap_or(value));
        }
        // id:/retry: fields are irrelevant to this gateway and ignored.
    }
    if data_lines.is_empty() {
        return None;
    }
    Some(SseFrame {
        event,
        data: data_lines.join("\n"),
    })
}

/// Decode a frame from the order/trade log stream into a typed event.
///
/// Unknown event kinds return `None`; they are not errors. `Ref2` is always
/// parsed as the integer local order reference, accepting either a JSON
/// number or a numeric string.
#[must_use]
pub fn decode_event(frame: &SseFrame) -> Option<GatewayEvent> {
    let value: Value = match serde_json::from_str(&frame.data) {
        Ok(value) => value,
        Err(err) => {
            warn!(event = %frame.event, error = %err, "unparseable push payload");
            return None;
        }
    };
    let info = value.get("data")?;
    let reference = field_u64(info, "Ref2").map(OrderRef)?;

    match frame.event.as_str() {
        "OrderBeforeSendReport" => Some(GatewayEvent::BeforeSend { reference }),
        "OrderRequestFailed" => Some(GatewayEvent::RequestFailed { reference }),
        "OrderReport" => {
            let status = field_i64(info, "Status")?;
            let remote_id = remote_id_field(info);
            Some(GatewayEvent::StatusReport {
                reference,
                status,
                remote_id,
            })
        }
        "TradeReport" => {
            let quantity = field_i64(info, "Qty")?;
            let price = field_decimal(info, "Price")?;
            Some(GatewayEvent::TradeReport {
                reference,
                quantity,
                price,
            })
        }
        other => {
            debug!(event = other, "ignoring unsupported gateway event");
            None
        }
    }
}

fn field_i64(info: &Value, key: &str) -> Option<i64> {
    match info.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn field_u64(info: &Value, key: &str) -> Option<u64> {
    field_i64(info, key).and_then(|v| u64::try_from(v).ok())
}

fn field_decimal(info: &Value, key: &str) -> Option<Decimal> {
    match info.get(key)? {
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

fn remote_id_field(info: &Value) -> Option<String> {
    match info.get("IntOrderNo") {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// Open the long-lived order/trade log subscription. The connect happens
/// before this returns so connection failures surface to the caller; the
/// read loop then runs until shutdown or end of stream.
pub async fn subscribe_events(
    client: &GatewayClient,
    shutdown: ShutdownSignal,
) -> BrokerResult<mpsc::Receiver<GatewayEvent>> {
    let response = open_stream(client, "log/subscribe").await?;
    let debug_payloads = client.config().debug;
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        pump_frames(response, shutdown, move |frame| {
            if debug_payloads {
                debug!(event = %frame.event, data = %frame.data, "gateway push");
            }
            let tx = tx.clone();
            decode_event(&frame).map(move |event| async move { tx.send(event).await.is_ok() })
        })
        .await;
        debug!("gateway event subscription closed");
    });
    Ok(rx)
}

/// Open a per-symbol ticker subscription. Payload shape is feed-specific, so
/// updates are forwarded as raw JSON values.
pub async fn subscribe_ticker(
    client: &GatewayClient,
    symbol: &str,
    shutdown: ShutdownSignal,
) -> BrokerResult<mpsc::Receiver<TickerUpdate>> {
    let response = open_stream(client, &format!("ticker/subscribe/{symbol}")).await?;
    let symbol = symbol.to_string();
    let (tx, rx) = mpsc::channel(TICKER_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        pump_frames(response, shutdown, move |frame| {
            let payload: Value = match serde_json::from_str(&frame.data) {
                Ok(value) => value,
                Err(err) => {
                    warn!(symbol = %symbol, error = %err, "unparseable ticker payload");
                    return None;
                }
            };
            let update = TickerUpdate {
                symbol: symbol.clone(),
                payload,
                received_at: Utc::now(),
            };
            let tx = tx.clone();
            Some(async move { tx.send(update).await.is_ok() })
        })
        .await;
    });
    Ok(rx)
}

async fn open_stream(client: &GatewayClient, path: &str) -> BrokerResult<reqwest::Response> {
    client
        .http()
        .get(client.url(path))
        .send()
        .await
        .map_err(|err| BrokerError::from_display(err, BrokerErrorKind::Transport))?
        .error_for_status()
        .map_err(|err| BrokerError::from_display(err, BrokerErrorKind::Gateway))
}

/// Drive one subscription: decode frames and hand each to `handle`, which
/// returns a future resolving to `false` when the downstream receiver is
/// gone. Exits on shutdown, stream end, or a dropped receiver.
async fn pump_frames<H, F>(response: reqwest::Response, shutdown: ShutdownSignal, mut handle: H)
where
    H: FnMut(SseFrame) -> Option<F>,
    F: std::future::Future<Output = bool>,
{
    let mut stream = response.bytes_stream();
    let mut decoder = SseDecoder::new();
    loop {
        let chunk = tokio::select! {
            _ = shutdown.cancelled() => break,
            chunk = stream.next() => chunk,
        };
        match chunk {
            Some(Ok(bytes)) => {
                let text = match std::str::from_utf8(&bytes) {
                    Ok(text) => text.to_owned(),
                    Err(err) => {
                        warn!(error = %err, "non UTF-8 chunk on push stream");
                        continue;
                    }
                };
                for frame in decoder.push(&text) {
                    if let Some(forward) = handle(frame) {
                        if !forward.await {
                            return; // receiver dropped
                        }
                    }
                }
            }
            Some(Err(err)) => {
                warn!(error = %err, "push stream transport error");
                break;
            }
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spbridge_core::{STATUS_ACCEPTED, STATUS_CANCELLED};

    fn frame(event: &str, data: &str) -> SseFrame {
        SseFrame {
            event: event.into(),
            data: data.into(),
        }
    }

    #[test]
    fn decoder_reassembles_frames_across_chunk_boundaries() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push("event: TradeReport\ndata: {\"da").is_empty());
        let frames = decoder.push("ta\":{}}\n\nevent: OrderReport\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "TradeReport");
        assert_eq!(frames[0].data, "{\"data\":{}}");

        let frames = decoder.push("data: {}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "OrderReport");
    }

    #[test]
    fn decoder_accepts_crlf_line_terminators() {
        let mut decoder = SseDecoder::new();
        let frames =
            decoder.push("event: TradeReport\r\ndata: {\"data\":{\"Ref2\":1}}\r\n\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "TradeReport");
        assert_eq!(frames[0].data, "{\"data\":{\"Ref2\":1}}");
    }

    #[test]
    fn decoder_handles_crlf_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        // Chunk ends in the middle of a CRLF pair.
        assert!(decoder.push("event: OrderReport\r\ndata: {}\r\n\r").is_empty());
        let frames = decoder.push("\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "OrderReport");
        assert_eq!(frames[0].data, "{}");
    }

    #[test]
    fn decoder_skips_comment_keepalives() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(": keep-alive\n\n").is_empty());
    }

    #[test]
    fn before_send_and_failure_events_decode() {
        let event = decode_event(&frame(
            "OrderBeforeSendReport",
            r#"{"data":{"Ref2":"7"}}"#,
        ));
        assert_eq!(
            event,
            Some(GatewayEvent::BeforeSend {
                reference: OrderRef(7)
            })
        );

        let event = decode_event(&frame("OrderRequestFailed", r#"{"data":{"Ref2":7}}"#));
        assert_eq!(
            event,
            Some(GatewayEvent::RequestFailed {
                reference: OrderRef(7)
            })
        );
    }

    #[test]
    fn status_reports_carry_status_and_remote_id() {
        let event = decode_event(&frame(
            "OrderReport",
            r#"{"data":{"Ref2":"7","Status":4,"IntOrderNo":"G-1001"}}"#,
        ));
        assert_eq!(
            event,
            Some(GatewayEvent::StatusReport {
                reference: OrderRef(7),
                status: STATUS_ACCEPTED,
                remote_id: Some("G-1001".into()),
            })
        );

        let event = decode_event(&frame(
            "OrderReport",
            r#"{"data":{"Ref2":7,"Status":"6"}}"#,
        ));
        assert_eq!(
            event,
            Some(GatewayEvent::StatusReport {
                reference: OrderRef(7),
                status: STATUS_CANCELLED,
                remote_id: None,
            })
        );
    }

    #[test]
    fn trade_reports_parse_quantity_and_price() {
        let event = decode_event(&frame(
            "TradeReport",
            r#"{"data":{"Ref2":"7","Qty":100,"Price":10.5}}"#,
        ));
        assert_eq!(
            event,
            Some(GatewayEvent::TradeReport {
                reference: OrderRef(7),
                quantity: 100,
                price: Decimal::new(105, 1),
            })
        );
    }

    #[test]
    fn unknown_events_and_malformed_payloads_are_ignored() {
        assert_eq!(
            decode_event(&frame("HeartBeat", r#"{"data":{"Ref2":1}}"#)),
            None
        );
        assert_eq!(decode_event(&frame("TradeReport", "not json")), None);
        // Missing envelope.
        assert_eq!(decode_event(&frame("TradeReport", r#"{"Ref2":1}"#)), None);
    }
}
