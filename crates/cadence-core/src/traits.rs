//! Capability traits — the seams between the engine and the outside
//! world. Each capability has interchangeable implementations chosen by
//! configuration, never by conditional branching inside the engine.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::Result;
use crate::types::{
    Campaign, CampaignStatus, DispatchReceipt, Enrollment, EnrollmentState, OutboundMessage,
    Prospect, RenderContext, SellerWindow, Touchpoint,
};

/// Outbound transport. Console, SMTP, and SMS providers all implement
/// this one capability; the engine never knows which is behind it.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    fn name(&self) -> &str;

    /// Hand a rendered message to the provider. `Ok` means the provider
    /// accepted it; the receipt says whether delivery is confirmed or
    /// merely pending. Transport failures surface as
    /// `CadenceError::Transport`.
    async fn send(&self, message: &OutboundMessage) -> Result<DispatchReceipt>;
}

/// Pure template expansion. No I/O; failures surface as
/// `CadenceError::Template` and abort only that step's dispatch.
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template: &str, ctx: &RenderContext) -> Result<String>;
}

/// Fields a single enrollment transition writes. Applied only when the
/// stored version still matches `expected_version`.
#[derive(Debug, Clone)]
pub struct EnrollmentUpdate {
    pub id: String,
    pub expected_version: u64,
    pub state: EnrollmentState,
    pub current_step: i32,
    pub attempts: u32,
    pub last_action_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Persistence for all engine records plus the two concurrency
/// primitives the driver relies on: versioned enrollment transitions
/// and compare-and-increment quota counters.
pub trait Store: Send + Sync {
    // ── Campaigns ────────────────────────────────────────────
    fn insert_campaign(&self, campaign: &Campaign) -> Result<()>;
    fn get_campaign(&self, id: &str) -> Result<Option<Campaign>>;
    fn list_campaigns(&self, status: Option<CampaignStatus>) -> Result<Vec<Campaign>>;
    fn set_campaign_status(&self, id: &str, status: CampaignStatus) -> Result<()>;

    // ── Prospects ────────────────────────────────────────────
    fn insert_prospect(&self, prospect: &Prospect) -> Result<()>;
    fn get_prospect(&self, id: &str) -> Result<Option<Prospect>>;

    // ── Seller windows ───────────────────────────────────────
    fn upsert_seller_window(&self, window: &SellerWindow) -> Result<()>;
    fn get_seller_window(&self, seller_id: &str) -> Result<Option<SellerWindow>>;

    // ── Enrollments ──────────────────────────────────────────
    fn insert_enrollment(&self, enrollment: &Enrollment) -> Result<()>;
    fn get_enrollment(&self, id: &str) -> Result<Option<Enrollment>>;
    /// The non-terminal enrollment for (prospect, campaign), if any.
    /// At most one exists by invariant.
    fn open_enrollment_for(
        &self,
        prospect_id: &str,
        campaign_id: &str,
    ) -> Result<Option<Enrollment>>;
    /// All non-terminal enrollments in a campaign.
    fn list_open_enrollments(&self, campaign_id: &str) -> Result<Vec<Enrollment>>;
    /// Compare-and-swap transition. Returns the updated row, or `None`
    /// when another worker already moved the enrollment (version
    /// mismatch) — the caller treats that as a silent no-op.
    fn transition_enrollment(&self, update: &EnrollmentUpdate) -> Result<Option<Enrollment>>;

    // ── Touchpoints (append-only) ────────────────────────────
    fn append_touchpoint(&self, touchpoint: &Touchpoint) -> Result<()>;
    fn touchpoints_for_prospect(&self, prospect_id: &str) -> Result<Vec<Touchpoint>>;
    fn touchpoints_for_enrollment(&self, enrollment_id: &str) -> Result<Vec<Touchpoint>>;

    // ── Daily quota counters ─────────────────────────────────
    /// Atomically increment the (campaign, date) counter if it is below
    /// `limit`. Returns `false` without mutating when the limit is
    /// reached. `limit` must be positive — unlimited campaigns never
    /// reach the store.
    fn try_reserve_quota(&self, campaign_id: &str, date: NaiveDate, limit: u32) -> Result<bool>;
    /// Compensating decrement after a failed dispatch, so transport
    /// failures do not waste quota.
    fn release_quota(&self, campaign_id: &str, date: NaiveDate) -> Result<()>;
    fn quota_used(&self, campaign_id: &str, date: NaiveDate) -> Result<u32>;
}
