//! The process-wide session store bridging an order engine to the gateway.
//!
//! One [`Store`] owns the gateway connection, the cached account snapshot,
//! the order registry and the notification sink. Attaching a broker handler
//! spawns the three worker loops (account refresh, order creation, order
//! cancellation) and the streaming event listener; all later communication
//! with those loops goes through typed command channels. Callers block only
//! long enough to enqueue — network I/O happens exclusively on the workers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{info, warn};

use spbridge_broker::{BrokerHandler, BrokerResult, FeedHandle};
use spbridge_core::{AccountSnapshot, Notification, OrderParams, OrderRef, Price, TickerUpdate};
use spbridge_gateway::{subscribe_ticker, GatewayClient, GatewayConfig, ShutdownSignal};

pub mod notify;
pub mod registry;
mod workers;

pub use notify::NotificationSink;
pub use registry::OrderRegistry;

/// Commands consumed by the account refresh worker.
pub(crate) enum AccountCommand {
    /// Refresh now instead of waiting out the interval.
    Refresh,
    Shutdown,
}

/// Commands consumed by the order create worker.
pub(crate) enum CreateCommand {
    Submit {
        reference: OrderRef,
        params: OrderParams,
    },
    Shutdown,
}

/// Commands consumed by the order cancel worker.
pub(crate) enum CancelCommand {
    Cancel { reference: OrderRef },
    Shutdown,
}

type CommandChannel<T> = (
    mpsc::UnboundedSender<T>,
    Mutex<Option<mpsc::UnboundedReceiver<T>>>,
);

fn command_channel<T>() -> CommandChannel<T> {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, Mutex::new(Some(rx)))
}

/// Session store. Construct exactly one per process and share it by `Arc`;
/// collaborators receive it by reference rather than through a global
/// accessor.
pub struct Store {
    client: GatewayClient,
    snapshot: Mutex<AccountSnapshot>,
    handler: Mutex<Option<Arc<dyn BrokerHandler>>>,
    feeds: Mutex<Vec<FeedHandle>>,
    registry: OrderRegistry,
    notifications: NotificationSink,
    account_tx: mpsc::UnboundedSender<AccountCommand>,
    account_rx: Mutex<Option<mpsc::UnboundedReceiver<AccountCommand>>>,
    create_tx: mpsc::UnboundedSender<CreateCommand>,
    create_rx: Mutex<Option<mpsc::UnboundedReceiver<CreateCommand>>>,
    cancel_tx: mpsc::UnboundedSender<CancelCommand>,
    cancel_rx: Mutex<Option<mpsc::UnboundedReceiver<CancelCommand>>>,
    shutdown: ShutdownSignal,
    broker_started: AtomicBool,
    stopped: AtomicBool,
}

impl Store {
    pub fn new(config: GatewayConfig) -> BrokerResult<Self> {
        let (account_tx, account_rx) = command_channel();
        let (create_tx, create_rx) = command_channel();
        let (cancel_tx, cancel_rx) = command_channel();
        Ok(Self {
            client: GatewayClient::new(config)?,
            snapshot: Mutex::new(AccountSnapshot::default()),
            handler: Mutex::new(None),
            feeds: Mutex::new(Vec::new()),
            registry: OrderRegistry::new(),
            notifications: NotificationSink::new(),
            account_tx,
            account_rx,
            create_tx,
            create_rx,
            cancel_tx,
            cancel_rx,
            shutdown: ShutdownSignal::new(),
            broker_started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        self.client.config()
    }

    #[must_use]
    pub fn registry(&self) -> &OrderRegistry {
        &self.registry
    }

    /// Register a data feed. When a broker is already attached it is told
    /// immediately that streaming for this feed may begin.
    ///
    /// The feed is recorded and the handler checked under the handler lock,
    /// so a feed is announced exactly once even when registration races a
    /// concurrent [`Store::start_broker`].
    pub fn start_data(&self, feed: FeedHandle) {
        info!(symbol = feed.symbol(), "data feed registered");
        let attached = {
            let handler = self.handler.lock().unwrap();
            self.feeds.lock().unwrap().push(feed.clone());
            handler.clone()
        };
        if let Some(handler) = attached {
            handler.data_started(&feed);
        }
    }

    /// Attach the broker handler and launch the background loops. Only the
    /// first attachment takes effect; an immediate forced account refresh is
    /// queued so the session authenticates without waiting an interval.
    pub fn start_broker(self: &Arc<Self>, handler: Arc<dyn BrokerHandler>) {
        if self.broker_started.swap(true, Ordering::SeqCst) {
            warn!("broker already attached; ignoring");
            return;
        }
        // Snapshot the feeds registered so far in the same critical section
        // that installs the handler: feeds registering afterwards announce
        // themselves, feeds in the snapshot are announced below.
        let feeds = {
            let mut slot = self.handler.lock().unwrap();
            let feeds = self.feeds.lock().unwrap().clone();
            *slot = Some(handler.clone());
            feeds
        };

        let account_rx = self.account_rx.lock().unwrap().take();
        let create_rx = self.create_rx.lock().unwrap().take();
        let cancel_rx = self.cancel_rx.lock().unwrap().take();
        let (Some(account_rx), Some(create_rx), Some(cancel_rx)) =
            (account_rx, create_rx, cancel_rx)
        else {
            warn!("worker channels already consumed; broker start aborted");
            return;
        };

        tokio::spawn(workers::run_account(self.clone(), account_rx));
        tokio::spawn(workers::run_create(
            self.clone(),
            handler.clone(),
            create_rx,
        ));
        tokio::spawn(workers::run_cancel(
            self.clone(),
            handler.clone(),
            cancel_rx,
        ));
        tokio::spawn(workers::run_listener(self.clone(), handler.clone()));

        let _ = self.account_tx.send(AccountCommand::Refresh);
        info!(
            environment = self.config().environment(),
            gateway = %self.config().gateway,
            "broker attached; workers started"
        );

        // Feeds that registered before the broker may now start streaming.
        for feed in &feeds {
            handler.data_started(feed);
        }
    }

    /// Idempotent reset of the cached cash figure.
    pub fn reset(&self) {
        self.snapshot.lock().unwrap().cash = Price::ZERO;
    }

    /// Push one shutdown command into each worker queue and close the push
    /// subscriptions. Safe to call repeatedly; only the first call after a
    /// broker attach does anything.
    pub fn stop(&self) {
        if self.handler.lock().unwrap().is_none() {
            return;
        }
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.create_tx.send(CreateCommand::Shutdown);
        let _ = self.cancel_tx.send(CancelCommand::Shutdown);
        let _ = self.account_tx.send(AccountCommand::Shutdown);
        self.shutdown.trigger();
        info!("store stopping; workers signalled");
    }

    /// Last-refreshed cash figure. Never blocks on the gateway.
    #[must_use]
    pub fn cash(&self) -> Price {
        self.snapshot.lock().unwrap().cash
    }

    /// Last-refreshed account value. Never blocks on the gateway.
    #[must_use]
    pub fn value(&self) -> Price {
        self.snapshot.lock().unwrap().value
    }

    pub fn update_snapshot(&self, snapshot: AccountSnapshot) {
        *self.snapshot.lock().unwrap() = snapshot;
    }

    /// Append a notification; callable from any thread or task.
    pub fn put_notification(&self, notification: Notification) {
        self.notifications.push(notification);
    }

    /// Drain all notifications queued at call time, oldest first.
    #[must_use]
    pub fn take_notifications(&self) -> Vec<Notification> {
        self.notifications.drain()
    }

    /// Queue an order for creation. Cannot fail synchronously: transport or
    /// gateway failures surface later as a notification plus a rejection
    /// callback for `reference`.
    pub fn order_create(&self, reference: OrderRef, params: OrderParams) {
        if self.stopped.load(Ordering::SeqCst) {
            warn!(%reference, "order_create after stop dropped");
            return;
        }
        let _ = self.create_tx.send(CreateCommand::Submit { reference, params });
    }

    /// Queue an order for cancellation. References the gateway never
    /// acknowledged are dropped silently by the worker.
    pub fn order_cancel(&self, reference: OrderRef) {
        if self.stopped.load(Ordering::SeqCst) {
            warn!(%reference, "order_cancel after stop dropped");
            return;
        }
        let _ = self.cancel_tx.send(CancelCommand::Cancel { reference });
    }

    /// Force an account refresh outside the periodic schedule.
    pub fn refresh_account(&self) {
        let _ = self.account_tx.send(AccountCommand::Refresh);
    }

    /// Open a price subscription for `symbol`. The returned channel closes
    /// when the store stops or the gateway ends the stream.
    pub async fn streaming_prices(
        &self,
        symbol: &str,
    ) -> BrokerResult<mpsc::Receiver<TickerUpdate>> {
        subscribe_ticker(&self.client, symbol, self.shutdown.clone()).await
    }

    pub(crate) fn client(&self) -> &GatewayClient {
        &self.client
    }

    pub(crate) fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }
}
