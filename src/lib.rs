//! Terminal OMS
//!
//! Keeps a local model of orders, brackets and positions in step with a
//! remote trading terminal that owns the real state. Lifecycle events arrive
//! asynchronously and may be duplicated or reordered; the engine applies them
//! idempotently, resolves bracket and one-cancels-other groups, attributes
//! ambiguous fills and rebuilds itself from a terminal snapshot on start and
//! reconnect.

pub mod broker;
pub mod config;
pub mod error;
pub mod oms;
pub mod reconcile;
pub mod terminal;
pub mod types;

pub use broker::Broker;
pub use config::{BrokerConfig, Config, PaperConfig};
pub use error::{BrokerError, BrokerResult, TerminalError, TerminalResult};
pub use reconcile::ReconcileReport;
pub use types::*;
