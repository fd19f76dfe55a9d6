use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use hyper::body::to_bytes;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;

/// Shared state of the mock gateway, cloneable into tests.
#[derive(Clone, Default)]
pub struct MockGatewayState {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    login_status: i64,
    /// When set, a successful login flips `login_status` to this value.
    status_after_login: Option<i64>,
    login_posts: Vec<Value>,
    orders_added: Vec<Value>,
    orders_closed: Vec<Value>,
    fail_order_add: bool,
    fail_order_close: bool,
    event_subscribers: Vec<mpsc::UnboundedSender<String>>,
    ticker_subscribers: HashMap<String, Vec<mpsc::UnboundedSender<String>>>,
}

impl MockGatewayState {
    pub async fn set_login_status(&self, status: i64) {
        self.inner.lock().await.login_status = status;
    }

    /// Make a successful login flip the reported status to `status`.
    pub async fn set_status_after_login(&self, status: i64) {
        self.inner.lock().await.status_after_login = Some(status);
    }

    pub async fn fail_order_add(&self, fail: bool) {
        self.inner.lock().await.fail_order_add = fail;
    }

    pub async fn fail_order_close(&self, fail: bool) {
        self.inner.lock().await.fail_order_close = fail;
    }

    pub async fn login_count(&self) -> usize {
        self.inner.lock().await.login_posts.len()
    }

    pub async fn orders_added(&self) -> Vec<Value> {
        self.inner.lock().await.orders_added.clone()
    }

    pub async fn orders_closed(&self) -> Vec<Value> {
        self.inner.lock().await.orders_closed.clone()
    }

    pub async fn request_count(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.login_posts.len() + inner.orders_added.len() + inner.orders_closed.len()
    }

    /// Push one event frame to every connected log subscriber.
    pub async fn push_event(&self, event: &str, data: &Value) {
        let frame = format!("event: {event}\ndata: {data}\n\n");
        let mut inner = self.inner.lock().await;
        inner
            .event_subscribers
            .retain(|tx| tx.send(frame.clone()).is_ok());
    }

    /// Push one update to every subscriber of `symbol`.
    pub async fn push_ticker(&self, symbol: &str, data: &Value) {
        let frame = format!("event: Ticker\ndata: {data}\n\n");
        let mut inner = self.inner.lock().await;
        if let Some(subscribers) = inner.ticker_subscribers.get_mut(symbol) {
            subscribers.retain(|tx| tx.send(frame.clone()).is_ok());
        }
    }

    pub async fn event_subscriber_count(&self) -> usize {
        self.inner.lock().await.event_subscribers.len()
    }
}

/// A running mock gateway bound to an ephemeral local port.
pub struct MockGateway {
    addr: SocketAddr,
    state: MockGatewayState,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl MockGateway {
    pub async fn start() -> Result<Self> {
        Self::start_with_state(MockGatewayState::default()).await
    }

    pub async fn start_with_state(state: MockGatewayState) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let addr = listener.local_addr()?;
        let std_listener = listener.into_std()?;
        std_listener.set_nonblocking(true)?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let route_state = state.clone();
        let make_svc = make_service_fn(move |_| {
            let state = route_state.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let state = state.clone();
                    async move { Ok::<_, Infallible>(route(req, state).await) }
                }))
            }
        });
        let server = Server::from_tcp(std_listener)?.serve(make_svc);
        let handle = tokio::spawn(async move {
            if let Err(err) = server
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
            {
                tracing::error!(error = %err, "mock gateway exited with error");
            }
        });
        Ok(Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
            handle,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    #[must_use]
    pub fn state(&self) -> MockGatewayState {
        self.state.clone()
    }

    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.handle.abort();
    }
}

impl Drop for MockGateway {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.handle.abort();
    }
}

async fn route(req: Request<Body>, state: MockGatewayState) -> Response<Body> {
    let (parts, body) = req.into_parts();
    let path = parts.uri.path().to_string();
    let body_bytes = match to_bytes(body).await {
        Ok(bytes) => bytes,
        Err(_) => return plain_status(StatusCode::BAD_REQUEST),
    };

    match (parts.method.clone(), path.as_str()) {
        (Method::GET, "/login-info") => {
            let status = state.inner.lock().await.login_status;
            json_response(json!({ "status": status }))
        }
        (Method::POST, "/login") => {
            let payload: Value = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);
            let mut inner = state.inner.lock().await;
            inner.login_posts.push(payload);
            if let Some(status) = inner.status_after_login {
                inner.login_status = status;
            }
            json_response(json!({}))
        }
        (Method::POST, "/order/add") => {
            let payload: Value = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);
            let mut inner = state.inner.lock().await;
            if inner.fail_order_add {
                return plain_status(StatusCode::INTERNAL_SERVER_ERROR);
            }
            inner.orders_added.push(payload);
            json_response(json!({}))
        }
        (Method::POST, "/order/close") => {
            let payload: Value = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);
            let mut inner = state.inner.lock().await;
            if inner.fail_order_close {
                return plain_status(StatusCode::INTERNAL_SERVER_ERROR);
            }
            inner.orders_closed.push(payload);
            json_response(json!({}))
        }
        (Method::GET, "/log/subscribe") => {
            let (tx, rx) = mpsc::unbounded_channel();
            let _ = tx.send(": connected\n\n".to_string());
            state.inner.lock().await.event_subscribers.push(tx);
            sse_response(rx)
        }
        (Method::GET, path) if path.starts_with("/ticker/subscribe/") => {
            let symbol = path.trim_start_matches("/ticker/subscribe/").to_string();
            let (tx, rx) = mpsc::unbounded_channel();
            let _ = tx.send(": connected\n\n".to_string());
            state
                .inner
                .lock()
                .await
                .ticker_subscribers
                .entry(symbol)
                .or_default()
                .push(tx);
            sse_response(rx)
        }
        _ => plain_status(StatusCode::NOT_FOUND),
    }
}

fn json_response(value: Value) -> Response<Body> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/json")
        .body(Body::from(value.to_string()))
        .unwrap()
}

fn plain_status(status: StatusCode) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Body::empty())
        .unwrap()
}

fn sse_response(rx: mpsc::UnboundedReceiver<String>) -> Response<Body> {
    let stream = UnboundedReceiverStream::new(rx).map(Ok::<_, Infallible>);
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/event-stream")
        .header("Cache-Control", "no-cache")
        .body(Body::wrap_stream(stream))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_orders_and_serves_login_info() {
        let mut gateway = MockGateway::start().await.unwrap();
        gateway.state().set_login_status(-1).await;

        let client = hyper::Client::new();
        let uri: hyper::Uri = format!("{}/login-info", gateway.base_url())
            .parse()
            .unwrap();
        let response = client.get(uri).await.unwrap();
        let bytes = to_bytes(response.into_body()).await.unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["status"], -1);

        let request = Request::builder()
            .method(Method::POST)
            .uri(format!("{}/order/add", gateway.base_url()))
            .header("Content-Type", "application/json")
            .body(Body::from(r#"{"Ref2":"7"}"#))
            .unwrap();
        let response = client.request(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(gateway.state().orders_added().await.len(), 1);

        gateway.shutdown().await;
    }
}
