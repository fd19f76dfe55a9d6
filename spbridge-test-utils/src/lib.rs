//! In-process mock of the brokerage gateway.
//!
//! Serves the same HTTP surface the real gateway exposes (login-info, login,
//! order/add, order/close) plus the two server-push subscriptions, recording
//! every request so tests can assert on exactly what the store sent. Tests
//! script the push stream by calling [`MockGatewayState::push_event`].

mod gateway;

pub use gateway::{MockGateway, MockGatewayState};
