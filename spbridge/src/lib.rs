//! Spbridge aggregate crate that re-exports the main components for downstream users.

pub use spbridge_broker as broker;
pub use spbridge_config as config;
pub use spbridge_core as core;
pub use spbridge_gateway as gateway;
pub use spbridge_store as store;

pub mod telemetry;

/// Convenience prelude to pull commonly used items into scope.
pub mod prelude {
    pub use spbridge_broker::*;
    pub use spbridge_config::*;
    pub use spbridge_core::*;
    pub use spbridge_gateway::*;
    pub use spbridge_store::*;
}
