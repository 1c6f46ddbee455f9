//! Daily send quota per campaign.
//!
//! Backed by the store's compare-and-increment counter, keyed on
//! (campaign id, calendar date in the configured quota timezone).
//! Exhaustion is control flow, not an error.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;

use cadence_core::error::{CadenceError, Result};
use cadence_core::traits::Store;
use cadence_core::types::Campaign;

/// Result of a reservation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quota {
    Reserved,
    Exhausted,
}

pub struct RateLimiter {
    store: Arc<dyn Store>,
    tz: Tz,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn Store>, quota_timezone: &str) -> Result<Self> {
        let tz = quota_timezone.parse::<Tz>().map_err(|_| {
            CadenceError::Config(format!("unknown quota timezone: {quota_timezone:?}"))
        })?;
        Ok(Self { store, tz })
    }

    /// Calendar date the quota counter for `now` lives under.
    pub fn quota_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.tz).date_naive()
    }

    /// Claim one send slot for the campaign on today's counter.
    /// A limit of 0 means unlimited and never touches the store.
    pub fn try_reserve(&self, campaign: &Campaign, now: DateTime<Utc>) -> Result<Quota> {
        if campaign.max_contacts_per_day == 0 {
            return Ok(Quota::Reserved);
        }
        let granted = self.store.try_reserve_quota(
            &campaign.id,
            self.quota_date(now),
            campaign.max_contacts_per_day,
        )?;
        Ok(if granted {
            Quota::Reserved
        } else {
            Quota::Exhausted
        })
    }

    /// Give a slot back after a dispatch that did not result in a send.
    pub fn release(&self, campaign: &Campaign, now: DateTime<Utc>) -> Result<()> {
        if campaign.max_contacts_per_day == 0 {
            return Ok(());
        }
        self.store.release_quota(&campaign.id, self.quota_date(now))
    }
}
