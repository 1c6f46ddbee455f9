//! In-memory store — the test double for the SQLite backend.
//!
//! A single mutex guards all tables, so the quota compare-and-increment
//! and the versioned enrollment transition are atomic exactly like
//! their SQL counterparts.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::NaiveDate;

use cadence_core::error::{CadenceError, Result};
use cadence_core::traits::{EnrollmentUpdate, Store};
use cadence_core::types::{
    Campaign, CampaignStatus, Enrollment, Prospect, SellerWindow, Touchpoint,
};

#[derive(Default)]
struct Inner {
    campaigns: HashMap<String, Campaign>,
    prospects: HashMap<String, Prospect>,
    windows: HashMap<String, SellerWindow>,
    enrollments: HashMap<String, Enrollment>,
    touchpoints: Vec<Touchpoint>,
    quota: HashMap<(String, NaiveDate), u32>,
}

/// HashMap-backed `Store`.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Poisoning only happens if a holder panicked; tests want the
        // data anyway.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Store for MemoryStore {
    fn insert_campaign(&self, campaign: &Campaign) -> Result<()> {
        self.lock()
            .campaigns
            .insert(campaign.id.clone(), campaign.clone());
        Ok(())
    }

    fn get_campaign(&self, id: &str) -> Result<Option<Campaign>> {
        Ok(self.lock().campaigns.get(id).cloned())
    }

    fn list_campaigns(&self, status: Option<CampaignStatus>) -> Result<Vec<Campaign>> {
        let inner = self.lock();
        let mut campaigns: Vec<Campaign> = inner
            .campaigns
            .values()
            .filter(|c| status.map_or(true, |s| c.status == s))
            .cloned()
            .collect();
        campaigns.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(campaigns)
    }

    fn set_campaign_status(&self, id: &str, status: CampaignStatus) -> Result<()> {
        let mut inner = self.lock();
        let campaign = inner
            .campaigns
            .get_mut(id)
            .ok_or_else(|| CadenceError::not_found("campaign", id))?;
        campaign.status = status;
        Ok(())
    }

    fn insert_prospect(&self, prospect: &Prospect) -> Result<()> {
        self.lock()
            .prospects
            .insert(prospect.id.clone(), prospect.clone());
        Ok(())
    }

    fn get_prospect(&self, id: &str) -> Result<Option<Prospect>> {
        Ok(self.lock().prospects.get(id).cloned())
    }

    fn upsert_seller_window(&self, window: &SellerWindow) -> Result<()> {
        self.lock()
            .windows
            .insert(window.seller_id.clone(), window.clone());
        Ok(())
    }

    fn get_seller_window(&self, seller_id: &str) -> Result<Option<SellerWindow>> {
        Ok(self.lock().windows.get(seller_id).cloned())
    }

    fn insert_enrollment(&self, enrollment: &Enrollment) -> Result<()> {
        let mut inner = self.lock();
        let open_exists = inner.enrollments.values().any(|e| {
            e.prospect_id == enrollment.prospect_id
                && e.campaign_id == enrollment.campaign_id
                && !e.state.is_terminal()
        });
        if open_exists {
            return Err(CadenceError::Storage(format!(
                "open enrollment already exists for prospect {} in campaign {}",
                enrollment.prospect_id, enrollment.campaign_id
            )));
        }
        inner
            .enrollments
            .insert(enrollment.id.clone(), enrollment.clone());
        Ok(())
    }

    fn get_enrollment(&self, id: &str) -> Result<Option<Enrollment>> {
        Ok(self.lock().enrollments.get(id).cloned())
    }

    fn open_enrollment_for(
        &self,
        prospect_id: &str,
        campaign_id: &str,
    ) -> Result<Option<Enrollment>> {
        Ok(self
            .lock()
            .enrollments
            .values()
            .find(|e| {
                e.prospect_id == prospect_id
                    && e.campaign_id == campaign_id
                    && !e.state.is_terminal()
            })
            .cloned())
    }

    fn list_open_enrollments(&self, campaign_id: &str) -> Result<Vec<Enrollment>> {
        let inner = self.lock();
        let mut enrollments: Vec<Enrollment> = inner
            .enrollments
            .values()
            .filter(|e| e.campaign_id == campaign_id && !e.state.is_terminal())
            .cloned()
            .collect();
        enrollments.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(enrollments)
    }

    fn transition_enrollment(&self, update: &EnrollmentUpdate) -> Result<Option<Enrollment>> {
        let mut inner = self.lock();
        let Some(enrollment) = inner.enrollments.get_mut(&update.id) else {
            return Err(CadenceError::not_found("enrollment", &update.id));
        };
        if enrollment.version != update.expected_version {
            return Ok(None);
        }
        enrollment.state = update.state;
        enrollment.current_step = update.current_step;
        enrollment.attempts = update.attempts;
        enrollment.last_action_at = update.last_action_at;
        enrollment.version += 1;
        Ok(Some(enrollment.clone()))
    }

    fn append_touchpoint(&self, touchpoint: &Touchpoint) -> Result<()> {
        self.lock().touchpoints.push(touchpoint.clone());
        Ok(())
    }

    fn touchpoints_for_prospect(&self, prospect_id: &str) -> Result<Vec<Touchpoint>> {
        Ok(self
            .lock()
            .touchpoints
            .iter()
            .filter(|t| t.prospect_id == prospect_id)
            .cloned()
            .collect())
    }

    fn touchpoints_for_enrollment(&self, enrollment_id: &str) -> Result<Vec<Touchpoint>> {
        Ok(self
            .lock()
            .touchpoints
            .iter()
            .filter(|t| t.enrollment_id.as_deref() == Some(enrollment_id))
            .cloned()
            .collect())
    }

    fn try_reserve_quota(&self, campaign_id: &str, date: NaiveDate, limit: u32) -> Result<bool> {
        let mut inner = self.lock();
        let used = inner
            .quota
            .entry((campaign_id.to_string(), date))
            .or_insert(0);
        if *used < limit {
            *used += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn release_quota(&self, campaign_id: &str, date: NaiveDate) -> Result<()> {
        let mut inner = self.lock();
        if let Some(used) = inner.quota.get_mut(&(campaign_id.to_string(), date)) {
            *used = used.saturating_sub(1);
        }
        Ok(())
    }

    fn quota_used(&self, campaign_id: &str, date: NaiveDate) -> Result<u32> {
        Ok(self
            .lock()
            .quota
            .get(&(campaign_id.to_string(), date))
            .copied()
            .unwrap_or(0))
    }
}
