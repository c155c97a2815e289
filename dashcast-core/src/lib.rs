//! Shared foundations for the dashcast workspace
//!
//! Configuration, the error taxonomy shared by every unit, logging bootstrap,
//! the timeout guard wrapped around every remote call, and the subscriber
//! list used for ordered event delivery.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod resilience;

pub use config::Config;
pub use error::{Error, Result};
pub use events::{SubscriptionId, Subscribers};
pub use models::{ConnectionId, RoomId};
pub use resilience::timeout::{guard, guard_result, TimeoutConfig, TimeoutError};
