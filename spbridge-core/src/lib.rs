//! Fundamental data types shared across the entire workspace.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Alias for price precision.
pub type Price = Decimal;
/// Contract quantities on the gateway are whole lots.
pub type Quantity = i64;

/// The gateway-assigned identifier returned once an order is acknowledged.
pub type RemoteOrderId = String;

/// Caller-assigned local order reference, stable for the lifetime of the
/// order. The trading engine hands these out monotonically; the bridge only
/// ever round-trips them.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct OrderRef(pub u64);

impl OrderRef {
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for OrderRef {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for OrderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The side of an order.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Single-letter encoding used by the gateway's order payload.
    #[must_use]
    pub fn as_wire(self) -> &'static str {
        match self {
            Self::Buy => "B",
            Self::Sell => "S",
        }
    }
}

/// Order execution style.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum OrderType {
    /// Execute immediately at best available price.
    Market,
    /// Execute at the provided limit price.
    Limit,
    /// A conditional order triggered by a price movement.
    Stop,
}

impl OrderType {
    /// Numeric encoding carried in the gateway's `OrderType` field.
    #[must_use]
    pub fn wire_code(self) -> u8 {
        match self {
            Self::Limit => 0,
            Self::Market => 1,
            Self::Stop => 2,
        }
    }
}

/// Parameters for a single order-creation request. Built by the caller,
/// enqueued to the create worker and consumed exactly once.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct OrderParams {
    pub side: Side,
    pub order_type: OrderType,
    /// Requested (not filled) price.
    pub price: Option<Price>,
    /// Absolute requested quantity in lots.
    pub quantity: Quantity,
    /// Product code resolved from the originating data feed.
    pub product_code: String,
}

/// Order status codes observed on the gateway's status reports.
pub const STATUS_ACCEPTED: i64 = 4;
pub const STATUS_CANCELLED: i64 = 6;

/// A decoded push message from the gateway's persistent event subscription.
///
/// Every variant carries the local order reference parsed from the payload's
/// `Ref2` field; anything that cannot be attributed to a local order is
/// dropped at decode time.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum GatewayEvent {
    /// The gateway is about to transmit the order to the exchange.
    BeforeSend { reference: OrderRef },
    /// The gateway could not transmit the order.
    RequestFailed { reference: OrderRef },
    /// Order status change; `remote_id` is present when the gateway has
    /// already assigned its own order number.
    StatusReport {
        reference: OrderRef,
        status: i64,
        remote_id: Option<RemoteOrderId>,
    },
    /// A (possibly partial) fill.
    TradeReport {
        reference: OrderRef,
        quantity: Quantity,
        price: Price,
    },
}

impl GatewayEvent {
    /// The local order reference this event concerns.
    #[must_use]
    pub fn reference(&self) -> OrderRef {
        match self {
            Self::BeforeSend { reference }
            | Self::RequestFailed { reference }
            | Self::StatusReport { reference, .. }
            | Self::TradeReport { reference, .. } => *reference,
        }
    }
}

/// Raw per-symbol price update delivered on a ticker subscription. The
/// payload shape is feed-specific, so the bridge forwards it undecoded.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct TickerUpdate {
    pub symbol: String,
    pub payload: Value,
    pub received_at: DateTime<Utc>,
}

/// An entry in the store's notification queue, drained by the owning engine.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Notification {
    pub message: String,
    /// Free-form context values attached by the producer.
    pub context: Vec<String>,
    pub at: DateTime<Utc>,
}

impl Notification {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: Vec::new(),
            at: Utc::now(),
        }
    }

    /// Attach a context value.
    #[must_use]
    pub fn with_context(mut self, value: impl Into<String>) -> Self {
        self.context.push(value.into());
        self
    }
}

/// Last-refreshed account cash/value snapshot. Reads never block on the
/// gateway; the account worker overwrites this in the background.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct AccountSnapshot {
    pub cash: Price,
    pub value: Price,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_wire_encoding_matches_gateway() {
        assert_eq!(Side::Buy.as_wire(), "B");
        assert_eq!(Side::Sell.as_wire(), "S");
    }

    #[test]
    fn order_ref_round_trips_through_serde() {
        let reference = OrderRef::from(7);
        let encoded = serde_json::to_string(&reference).unwrap();
        assert_eq!(encoded, "7");
        let decoded: OrderRef = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, reference);
    }

    #[test]
    fn event_reference_is_uniform_across_variants() {
        let events = [
            GatewayEvent::BeforeSend {
                reference: OrderRef(3),
            },
            GatewayEvent::StatusReport {
                reference: OrderRef(3),
                status: STATUS_ACCEPTED,
                remote_id: None,
            },
            GatewayEvent::TradeReport {
                reference: OrderRef(3),
                quantity: 10,
                price: Decimal::new(105, 1),
            },
        ];
        assert!(events.iter().all(|e| e.reference() == OrderRef(3)));
    }
}
