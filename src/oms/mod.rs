//! Order Management System (OMS)
//!
//! Local model of the terminal's orders:
//! - Order lifecycle state machine with bracket and OCO resolution
//! - Deferred transmission of bracket legs
//! - Attribution of fills reported against a bracket's primary
//! - Net position ledger

pub mod disambiguate;
pub mod engine;
pub mod gate;
pub mod groups;
pub mod position;
pub mod registry;
pub mod request;
pub mod tags;
pub mod types;

// Re-export core types
pub use engine::{CancelTarget, Command, CreateRequest, Notification, OrderEngine};
pub use groups::{Bracket, BracketRole};
pub use position::{Position, PositionLedger, PositionUpdate};
pub use request::OrderRequest;
pub use tags::OrderTags;
pub use types::{Execution, Fill, Order};
