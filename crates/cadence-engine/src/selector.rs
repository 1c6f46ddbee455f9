//! Step selection.
//!
//! Pure function from (enrollment, campaign, touchpoint history, now)
//! to the next action. Due times are cumulative from enrollment
//! creation, so a late send never shifts the rest of the sequence.

use chrono::{DateTime, Utc};

use cadence_core::types::{Campaign, Enrollment, Touchpoint};

/// What the enrollment should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    /// Step at `index` is due for dispatch.
    Due {
        index: usize,
        due_at: DateTime<Utc>,
    },
    /// Nothing to do before `until`.
    Waiting { until: DateTime<Utc> },
    /// The sequence is finished.
    NoMoreSteps,
}

/// Selector output: the steps passed over this evaluation plus the
/// next action. Skipped indexes are strictly increasing and all lie
/// before the `Due`/`Waiting` step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub skipped: Vec<usize>,
    pub next: NextStep,
}

/// Walk forward from the enrollment's pointer. Inactive steps and
/// steps whose skip condition fired are passed over; the first
/// surviving step is either due or names the wait deadline. Skip
/// evaluation runs before the due-time check, so a step that is both
/// due and responded-to is skipped, never sent.
pub fn next_step(
    enrollment: &Enrollment,
    campaign: &Campaign,
    touchpoints: &[Touchpoint],
    now: DateTime<Utc>,
) -> Selection {
    let mut skipped = Vec::new();
    let start = (enrollment.current_step + 1).max(0) as usize;

    for (index, step) in campaign.steps.iter().enumerate().skip(start) {
        if !step.is_active {
            skipped.push(index);
            continue;
        }
        let due_at = enrollment.created_at + step.delay();
        if step.skip_if_responded && responded_between(touchpoints, enrollment.created_at, due_at) {
            skipped.push(index);
            continue;
        }
        let next = if now >= due_at {
            NextStep::Due { index, due_at }
        } else {
            NextStep::Waiting { until: due_at }
        };
        return Selection { skipped, next };
    }

    Selection {
        skipped,
        next: NextStep::NoMoreSteps,
    }
}

/// A response in `[from, until]` triggers the skip condition. Responses
/// landing after the due time do not retroactively skip a step.
fn responded_between(
    touchpoints: &[Touchpoint],
    from: DateTime<Utc>,
    until: DateTime<Utc>,
) -> bool {
    touchpoints
        .iter()
        .any(|t| t.is_response() && t.occurred_at >= from && t.occurred_at <= until)
}
