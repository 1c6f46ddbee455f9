//! Error taxonomy for the scheduling engine.
//!
//! Expected outcomes — daily quota exhaustion, losing an optimistic-lock
//! race — are ordinary control flow and deliberately not represented here.

use thiserror::Error;

/// All errors surfaced by Cadence components.
#[derive(Error, Debug)]
pub enum CadenceError {
    /// Bad or unreadable configuration.
    #[error("config error: {0}")]
    Config(String),

    /// A seller window that cannot be resolved (empty day set, inverted
    /// hours, unknown timezone). Fatal for that seller until fixed.
    #[error("invalid window config: {0}")]
    InvalidWindow(String),

    /// A delivery attempt failed at the transport layer. Retryable up to
    /// the per-step attempt budget.
    #[error("transport error: {0}")]
    Transport(String),

    /// Template rendering failed. Fatal for the step — a content bug,
    /// not a delivery bug.
    #[error("template error: {0}")]
    Template(String),

    /// The prospect already has a non-terminal enrollment in this campaign.
    #[error("prospect {prospect} is already enrolled in campaign {campaign}")]
    AlreadyEnrolled { prospect: String, campaign: String },

    /// Enrollment was attempted against a campaign that is not active.
    #[error("campaign {0} is not active")]
    CampaignNotActive(String),

    /// A referenced record does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Persistence failure.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CadenceError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { kind, id: id.into() }
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, CadenceError>;
