//! Traits at the seam between the bridge core and its collaborators, plus
//! the error taxonomy shared by the gateway client and the workers.

use std::sync::Arc;

use thiserror::Error;

use spbridge_core::{OrderRef, Price, Quantity};

/// Convenience alias for broker results.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Common error type returned by the gateway client and the workers.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Transport-level failures (network, timeouts, broken streams).
    #[error("transport error: {0}")]
    Transport(String),
    /// Login failed or the session is missing required credentials.
    #[error("authentication failed: {0}")]
    Authentication(String),
    /// Wraps serialization or payload-parsing errors.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The gateway responded with a business error.
    #[error("gateway error: {0}")]
    Gateway(String),
    /// A catch-all branch for other issues.
    #[error("unexpected error: {0}")]
    Other(String),
}

impl BrokerError {
    /// Helper used when mapping any displayable error into a broker error.
    pub fn from_display(err: impl std::fmt::Display, kind: BrokerErrorKind) -> Self {
        match kind {
            BrokerErrorKind::Transport => Self::Transport(err.to_string()),
            BrokerErrorKind::Authentication => Self::Authentication(err.to_string()),
            BrokerErrorKind::Serialization => Self::Serialization(err.to_string()),
            BrokerErrorKind::Gateway => Self::Gateway(err.to_string()),
            BrokerErrorKind::Other => Self::Other(err.to_string()),
        }
    }
}

/// Enumerates the broad families of broker errors.
#[derive(Debug, Clone, Copy)]
pub enum BrokerErrorKind {
    Transport,
    Authentication,
    Serialization,
    Gateway,
    Other,
}

/// Shared handle for a registered data feed.
pub type FeedHandle = Arc<dyn MarketFeed>;

/// A data feed registered with the store. The feed owns its market-data
/// consumption; the store only needs enough of it to derive the product code
/// used on order tickets.
pub trait MarketFeed: Send + Sync {
    /// Raw identifier the feed was constructed with.
    fn symbol(&self) -> &str;

    /// Gateway product code, when the feed declares one. Feeds that trade
    /// their raw symbol directly return `None`.
    fn product_code(&self) -> Option<String> {
        None
    }

    /// Effective code placed on order tickets.
    fn effective_product_code(&self) -> String {
        self.product_code()
            .unwrap_or_else(|| self.symbol().to_string())
    }
}

/// The narrow interface the bridge drives as remote events arrive. The
/// implementing broker owns position and cash accounting; the bridge only
/// reports transitions, always asynchronously and never more than once per
/// underlying remote event.
///
/// Observable order lifecycle: submitted -> {accepted, rejected};
/// accepted -> {fill.., cancelled}. Rejected, fully filled and cancelled are
/// terminal.
pub trait BrokerHandler: Send + Sync {
    /// The gateway is transmitting the order.
    fn on_submitted(&self, reference: OrderRef);

    /// The gateway refused the order, or the creation request itself failed.
    fn on_rejected(&self, reference: OrderRef);

    /// The order is live on the exchange.
    fn on_accepted(&self, reference: OrderRef);

    /// The order was cancelled.
    fn on_cancelled(&self, reference: OrderRef);

    /// A fill of `quantity` lots at `price`.
    fn on_fill(&self, reference: OrderRef, quantity: Quantity, price: Price);

    /// A registered data feed may begin streaming.
    fn data_started(&self, feed: &FeedHandle);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BareFeed(&'static str);

    impl MarketFeed for BareFeed {
        fn symbol(&self) -> &str {
            self.0
        }
    }

    struct ProductFeed;

    impl MarketFeed for ProductFeed {
        fn symbol(&self) -> &str {
            "HSI-front"
        }

        fn product_code(&self) -> Option<String> {
            Some("HSIF8".into())
        }
    }

    #[test]
    fn effective_product_code_prefers_declared_code() {
        assert_eq!(ProductFeed.effective_product_code(), "HSIF8");
        assert_eq!(BareFeed("HSIQ8").effective_product_code(), "HSIQ8");
    }

    #[test]
    fn error_kinds_map_to_matching_variants() {
        let err = BrokerError::from_display("boom", BrokerErrorKind::Transport);
        assert!(matches!(err, BrokerError::Transport(_)));
        let err = BrokerError::from_display("boom", BrokerErrorKind::Authentication);
        assert!(matches!(err, BrokerError::Authentication(_)));
    }
}
