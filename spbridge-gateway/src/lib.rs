//! REST client for the brokerage gateway.
//!
//! The gateway exposes a small HTTP surface (login check, login, order add,
//! order close) plus two server-push subscriptions handled in [`sse`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Notify;
use tracing::debug;

use spbridge_broker::{BrokerError, BrokerErrorKind, BrokerResult};
use spbridge_core::{OrderParams, OrderRef, Price, Quantity, RemoteOrderId};

pub mod sse;

pub use sse::{subscribe_events, subscribe_ticker};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection settings for one gateway session.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct GatewayConfig {
    /// Base address of the gateway HTTP surface.
    #[serde(default = "default_gateway")]
    pub gateway: String,
    /// Account identifier used for cancellations.
    #[serde(default)]
    pub account: String,
    /// Credentials payload posted to `login` when the session lapses.
    /// `None` disables automatic re-authentication.
    #[serde(default)]
    pub login: Option<Value>,
    /// Use the practice environment instead of live.
    #[serde(default)]
    pub practice: bool,
    /// Log decoded push payloads at debug level.
    #[serde(default)]
    pub debug: bool,
    /// Seconds between periodic account refreshes.
    #[serde(default = "default_refresh_secs")]
    pub refresh_secs: u64,
}

fn default_refresh_secs() -> u64 {
    30
}

fn default_gateway() -> String {
    "http://localhost:5000/".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            gateway: default_gateway(),
            account: String::new(),
            login: None,
            practice: false,
            debug: false,
            refresh_secs: default_refresh_secs(),
        }
    }
}

impl GatewayConfig {
    /// Environment label used in logs and notifications.
    #[must_use]
    pub fn environment(&self) -> &'static str {
        if self.practice {
            "practice"
        } else {
            "live"
        }
    }

    /// Refresh interval as a [`Duration`].
    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_secs)
    }
}

/// A thin wrapper over the gateway's HTTP surface.
pub struct GatewayClient {
    http: reqwest::Client,
    config: GatewayConfig,
}

impl GatewayClient {
    /// Build a new client. The underlying HTTP client has no overall request
    /// timeout because it is shared with the long-lived push subscriptions;
    /// individual REST calls apply [`REQUEST_TIMEOUT`] themselves.
    pub fn new(config: GatewayConfig) -> BrokerResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|err| BrokerError::from_display(err, BrokerErrorKind::Other))?;
        Ok(Self { http, config })
    }

    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.gateway.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Query the session status. The gateway reports `-1` while logged out.
    pub async fn login_status(&self) -> BrokerResult<i64> {
        let info: LoginInfo = self
            .http
            .get(self.url("login-info"))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|err| BrokerError::from_display(err, BrokerErrorKind::Transport))?
            .error_for_status()
            .map_err(|err| BrokerError::from_display(err, BrokerErrorKind::Gateway))?
            .json()
            .await
            .map_err(|err| BrokerError::from_display(err, BrokerErrorKind::Serialization))?;
        debug!(status = info.status, "gateway login-info");
        Ok(info.status)
    }

    /// Whether the gateway currently holds an authenticated session.
    pub async fn is_logged_in(&self) -> BrokerResult<bool> {
        Ok(self.login_status().await? != -1)
    }

    /// Post the configured credentials payload.
    pub async fn login(&self, credentials: &Value) -> BrokerResult<()> {
        self.http
            .post(self.url("login"))
            .timeout(REQUEST_TIMEOUT)
            .json(credentials)
            .send()
            .await
            .map_err(|err| BrokerError::from_display(err, BrokerErrorKind::Transport))?
            .error_for_status()
            .map_err(|err| BrokerError::from_display(err, BrokerErrorKind::Authentication))?;
        Ok(())
    }

    /// Submit one order-creation ticket.
    pub async fn add_order(&self, ticket: &OrderTicket) -> BrokerResult<()> {
        self.http
            .post(self.url("order/add"))
            .timeout(REQUEST_TIMEOUT)
            .json(ticket)
            .send()
            .await
            .map_err(|err| BrokerError::from_display(err, BrokerErrorKind::Transport))?
            .error_for_status()
            .map_err(|err| BrokerError::from_display(err, BrokerErrorKind::Gateway))?;
        Ok(())
    }

    /// Request cancellation of a previously acknowledged order.
    pub async fn close_order(&self, remote_id: &RemoteOrderId) -> BrokerResult<()> {
        let payload = serde_json::json!({
            "AccNo": self.config.account,
            "IntOrderNo": remote_id,
        });
        self.http
            .post(self.url("order/close"))
            .timeout(REQUEST_TIMEOUT)
            .json(&payload)
            .send()
            .await
            .map_err(|err| BrokerError::from_display(err, BrokerErrorKind::Transport))?
            .error_for_status()
            .map_err(|err| BrokerError::from_display(err, BrokerErrorKind::Gateway))?;
        Ok(())
    }
}

#[derive(Deserialize)]
struct LoginInfo {
    status: i64,
}

/// Order-creation payload in the gateway's field naming. The constant
/// condition/validity fields mirror what the gateway expects for plain
/// outright orders.
#[derive(Clone, Debug, Serialize)]
pub struct OrderTicket {
    #[serde(rename = "BuySell")]
    pub buy_sell: &'static str,
    #[serde(rename = "Price")]
    pub price: Option<Price>,
    #[serde(rename = "Qty")]
    pub qty: Quantity,
    #[serde(rename = "ProdCode")]
    pub prod_code: String,
    #[serde(rename = "Ref")]
    pub reference_tag: String,
    #[serde(rename = "Ref2")]
    pub ref2: String,
    #[serde(rename = "ClOrderId")]
    pub client_order_id: String,
    #[serde(rename = "OrderType")]
    pub order_type: u8,
    #[serde(rename = "DecInPrice")]
    pub dec_in_price: u8,
    #[serde(rename = "OpenClose")]
    pub open_close: u8,
    #[serde(rename = "CondType")]
    pub cond_type: u8,
    #[serde(rename = "ValidType")]
    pub valid_type: u8,
    #[serde(rename = "StopType")]
    pub stop_type: u8,
    #[serde(rename = "OrderOptions")]
    pub order_options: u8,
}

impl OrderTicket {
    /// Build a ticket from enqueued order parameters. `Ref2` carries the
    /// local reference so push events can be correlated back to it.
    #[must_use]
    pub fn new(reference: OrderRef, params: &OrderParams) -> Self {
        Self {
            buy_sell: params.side.as_wire(),
            price: params.price,
            qty: params.quantity.abs(),
            prod_code: params.product_code.clone(),
            reference_tag: "spbridge".into(),
            ref2: reference.to_string(),
            client_order_id: format!("spbridge-{reference}"),
            order_type: params.order_type.wire_code(),
            dec_in_price: 0,
            open_close: 0,
            cond_type: 0,
            valid_type: 0,
            stop_type: 0,
            order_options: 0,
        }
    }
}

/// Cooperative cancellation handle shared by the store and its background
/// subscriptions. Triggering is sticky and wakes every waiter.
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    #[must_use]
    pub fn triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolve once the signal has been triggered.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.triggered() {
                return;
            }
            notified.await;
        }
    }
}
