//! # Cadence Engine
//!
//! The scheduling core: given campaigns, enrollments, and the recorded
//! touchpoint history, each `tick()` decides whether, when, and through
//! which channel the next touchpoint fires for every open enrollment.
//!
//! The engine holds no timers and does no I/O of its own — persistence,
//! transports, and the clock all arrive as capabilities from
//! `cadence-core`, so a tick is deterministic given its inputs.

pub mod driver;
pub mod enrollment;
pub mod ratelimit;
pub mod selector;
pub mod window;

pub use driver::{Driver, GatewaySet, TickStats};
pub use ratelimit::{Quota, RateLimiter};
pub use selector::{NextStep, Selection};
