//! # Cadence Core
//!
//! Shared foundation for the outreach scheduling engine: the domain
//! model (campaigns, steps, enrollments, touchpoints, seller windows),
//! the error taxonomy, configuration, and the capability traits that
//! the engine consumes (messaging gateway, template renderer, store,
//! clock). Everything here is transport- and storage-agnostic.

pub mod clock;
pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CadenceConfig;
pub use error::{CadenceError, Result};
pub use traits::{MessagingGateway, Store, TemplateRenderer};
