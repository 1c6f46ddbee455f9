//! Enrollment lifecycle.
//!
//! Transitions are applied through the store's versioned
//! compare-and-swap; a worker that loses the race gets `None` back and
//! simply leaves the enrollment for the next tick.

use chrono::{DateTime, Utc};

use cadence_core::error::{CadenceError, Result};
use cadence_core::traits::{EnrollmentUpdate, Store};
use cadence_core::types::{CampaignStatus, Enrollment, EnrollmentState};

// Concurrent cancel attempts against an actively ticking driver; each
// retry re-reads the current version.
const CANCEL_RETRIES: u32 = 4;

/// Legal state transitions. `Dispatching` is the per-step lock; only
/// the holder may move out of it, everything else goes through
/// `Scheduled`.
pub fn can_transition(from: EnrollmentState, to: EnrollmentState) -> bool {
    use EnrollmentState::*;
    match (from, to) {
        (Pending, Scheduled) => true,
        // Pointer advances over skipped steps re-write Scheduled
        (Scheduled, Scheduled) => true,
        (Scheduled, Dispatching) => true,
        (Dispatching, Sent | Scheduled | Failed) => true,
        (Sent, Scheduled) => true,
        // Completion can be discovered from any non-locked live state
        (Pending | Scheduled | Sent, Completed) => true,
        (from, Cancelled) => !from.is_terminal(),
        _ => false,
    }
}

/// Enroll a prospect into a campaign. Validates campaign status and
/// the single-open-enrollment invariant before writing anything.
pub fn enroll(
    store: &dyn Store,
    prospect_id: &str,
    campaign_id: &str,
    now: DateTime<Utc>,
) -> Result<Enrollment> {
    let campaign = store
        .get_campaign(campaign_id)?
        .ok_or_else(|| CadenceError::not_found("campaign", campaign_id))?;
    if campaign.status != CampaignStatus::Active {
        return Err(CadenceError::CampaignNotActive(campaign_id.to_string()));
    }
    store
        .get_prospect(prospect_id)?
        .ok_or_else(|| CadenceError::not_found("prospect", prospect_id))?;
    if store.open_enrollment_for(prospect_id, campaign_id)?.is_some() {
        return Err(CadenceError::AlreadyEnrolled {
            prospect: prospect_id.to_string(),
            campaign: campaign_id.to_string(),
        });
    }

    let enrollment = Enrollment::new(prospect_id, campaign_id, now);
    store.insert_enrollment(&enrollment)?;
    tracing::info!(
        enrollment = %enrollment.id,
        prospect = %prospect_id,
        campaign = %campaign_id,
        "📋 Prospect enrolled"
    );
    Ok(enrollment)
}

/// Cancel an enrollment from any non-terminal state. Cancelling an
/// already-terminal enrollment is a no-op that returns the row as-is.
/// An in-flight dispatch is allowed to finish; its touchpoint still
/// lands, but the enrollment advances no further.
pub fn cancel(store: &dyn Store, enrollment_id: &str, now: DateTime<Utc>) -> Result<Enrollment> {
    for _ in 0..CANCEL_RETRIES {
        let current = store
            .get_enrollment(enrollment_id)?
            .ok_or_else(|| CadenceError::not_found("enrollment", enrollment_id))?;
        if current.state.is_terminal() {
            return Ok(current);
        }
        let update = EnrollmentUpdate {
            id: current.id.clone(),
            expected_version: current.version,
            state: EnrollmentState::Cancelled,
            current_step: current.current_step,
            attempts: current.attempts,
            last_action_at: Some(now),
        };
        if let Some(cancelled) = store.transition_enrollment(&update)? {
            tracing::info!(enrollment = %enrollment_id, "🛑 Enrollment cancelled");
            return Ok(cancelled);
        }
        // Lost to a concurrent transition; re-read and try again
    }
    Err(CadenceError::Storage(format!(
        "cancel of enrollment {enrollment_id} kept losing version races"
    )))
}
