//! Background loops owned by the store.
//!
//! Each responsibility runs on its own task: account refresh, order
//! creation, order cancellation and the push-event listener. Workers check
//! for their shutdown command before acting on anything dequeued and exit
//! without draining the rest of the queue. No failure in any loop is fatal;
//! problems surface through the notification sink and broker callbacks.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use spbridge_broker::BrokerHandler;
use spbridge_core::{
    GatewayEvent, Notification, STATUS_ACCEPTED, STATUS_CANCELLED,
};
use spbridge_gateway::{subscribe_events, OrderTicket};

use crate::{AccountCommand, CancelCommand, CreateCommand, Store};

/// Account refresh loop: wait out the configured interval for an explicit
/// trigger, refreshing either way. A lapsed session (login-info status `-1`)
/// with configured credentials issues exactly one login per failing cycle.
pub(crate) async fn run_account(
    store: Arc<Store>,
    mut rx: mpsc::UnboundedReceiver<AccountCommand>,
) {
    let interval = store.config().refresh_interval();
    loop {
        match timeout(interval, rx.recv()).await {
            Ok(Some(AccountCommand::Shutdown)) | Ok(None) => break,
            Ok(Some(AccountCommand::Refresh)) => {}
            Err(_) => {} // interval lapsed; periodic refresh
        }
        refresh_login(&store).await;
    }
    debug!("account worker stopped");
}

async fn refresh_login(store: &Arc<Store>) {
    let Some(login) = store.config().login.clone() else {
        return;
    };
    match store.client().is_logged_in().await {
        Ok(true) => {}
        Ok(false) => {
            info!("session lapsed; re-authenticating");
            if let Err(err) = store.client().login(&login).await {
                warn!(error = %err, "gateway login failed");
                store.put_notification(
                    Notification::new("gateway login failed").with_context(err.to_string()),
                );
            }
        }
        Err(err) => {
            warn!(error = %err, "login check failed");
            store.put_notification(
                Notification::new("login check failed").with_context(err.to_string()),
            );
        }
    }
}

/// Order creation loop. On any transport or gateway failure the broker gets
/// exactly one rejection for the reference carried by the failed request and
/// one notification is recorded; the loop always continues.
pub(crate) async fn run_create(
    store: Arc<Store>,
    handler: Arc<dyn BrokerHandler>,
    mut rx: mpsc::UnboundedReceiver<CreateCommand>,
) {
    while let Some(command) = rx.recv().await {
        let CreateCommand::Submit { reference, params } = command else {
            break;
        };
        let ticket = OrderTicket::new(reference, &params);
        debug!(%reference, product = %ticket.prod_code, side = ticket.buy_sell, "submitting order");
        if let Err(err) = store.client().add_order(&ticket).await {
            warn!(%reference, error = %err, "order submission failed");
            store.put_notification(
                Notification::new(format!("order {reference} submission failed"))
                    .with_context(err.to_string()),
            );
            handler.on_rejected(reference);
        }
    }
    debug!("order create worker stopped");
}

/// Order cancellation loop. References without a registry entry are treated
/// as already resolved and dropped without a callback; cancellation failures
/// surface as a notification only, since the true order state will arrive on
/// the event stream.
pub(crate) async fn run_cancel(
    store: Arc<Store>,
    handler: Arc<dyn BrokerHandler>,
    mut rx: mpsc::UnboundedReceiver<CancelCommand>,
) {
    while let Some(command) = rx.recv().await {
        let CancelCommand::Cancel { reference } = command else {
            break;
        };
        let Some(remote_id) = store.registry().remote_of(reference) else {
            debug!(%reference, "cancel for unknown reference dropped");
            continue;
        };
        match store.client().close_order(&remote_id).await {
            Ok(()) => {
                handler.on_cancelled(reference);
                store.registry().remove(reference);
            }
            Err(err) => {
                warn!(%reference, remote_id = %remote_id, error = %err, "cancellation failed");
                store.put_notification(
                    Notification::new(format!("order {reference} cancellation failed"))
                        .with_context(err.to_string()),
                );
            }
        }
    }
    debug!("order cancel worker stopped");
}

/// Streaming listener: one long-lived subscription to the gateway's
/// order/trade log, dispatched event by event to the broker handler.
pub(crate) async fn run_listener(store: Arc<Store>, handler: Arc<dyn BrokerHandler>) {
    let mut rx = match subscribe_events(store.client(), store.shutdown_signal()).await {
        Ok(rx) => rx,
        Err(err) => {
            error!(error = %err, "event subscription failed");
            store.put_notification(
                Notification::new("event subscription failed").with_context(err.to_string()),
            );
            return;
        }
    };
    while let Some(event) = rx.recv().await {
        dispatch(&store, handler.as_ref(), event);
    }
    debug!("event listener stopped");
}

/// Translate one decoded gateway event into a broker callback. Status codes
/// other than accepted/cancelled are ignored by design.
fn dispatch(store: &Store, handler: &dyn BrokerHandler, event: GatewayEvent) {
    match event {
        GatewayEvent::BeforeSend { reference } => handler.on_submitted(reference),
        GatewayEvent::RequestFailed { reference } => handler.on_rejected(reference),
        GatewayEvent::StatusReport {
            reference,
            status,
            remote_id,
        } => match status {
            STATUS_ACCEPTED => {
                if let Some(remote_id) = remote_id {
                    store.registry().insert(reference, remote_id);
                }
                handler.on_accepted(reference);
            }
            STATUS_CANCELLED => {
                handler.on_cancelled(reference);
                store.registry().remove(reference);
            }
            other => debug!(%reference, status = other, "ignoring order status"),
        },
        GatewayEvent::TradeReport {
            reference,
            quantity,
            price,
        } => handler.on_fill(reference, quantity, price),
    }
}
