//! The scheduling driver.
//!
//! One `tick()` walks every open enrollment of every active campaign
//! and pushes each one forward at most one step: select, gate on the
//! seller window, reserve quota, take the dispatch lock, render, send,
//! record, advance. Per-enrollment failures are counted and logged but
//! never abort the tick.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use cadence_core::clock::Clock;
use cadence_core::config::EngineConfig;
use cadence_core::error::{CadenceError, Result};
use cadence_core::traits::{EnrollmentUpdate, MessagingGateway, Store, TemplateRenderer};
use cadence_core::types::{
    Campaign, CampaignStatus, ChannelKind, Direction, Enrollment, EnrollmentState,
    OutboundMessage, Prospect, RenderContext, Touchpoint,
};

use crate::enrollment::can_transition;
use crate::ratelimit::{Quota, RateLimiter};
use crate::selector::{self, NextStep};
use crate::window;

/// One gateway per channel. The driver picks by the step's channel and
/// never knows which provider sits behind the trait.
#[derive(Clone)]
pub struct GatewaySet {
    pub email: Arc<dyn MessagingGateway>,
    pub sms: Arc<dyn MessagingGateway>,
}

impl GatewaySet {
    pub fn for_channel(&self, channel: ChannelKind) -> &Arc<dyn MessagingGateway> {
        match channel {
            ChannelKind::Email => &self.email,
            ChannelKind::Sms => &self.sms,
        }
    }
}

/// What one tick did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickStats {
    /// Open enrollments examined.
    pub processed: u32,
    /// Messages handed to a gateway and accepted.
    pub sent: u32,
    /// Steps passed over (responded, inactive, or undeliverable).
    pub skipped: u32,
    /// Enrollments waiting on a due time or a closed window.
    pub deferred: u32,
    /// Dispatches blocked by the daily quota.
    pub exhausted: u32,
    /// Failed dispatch attempts plus enrollments moved to `Failed`.
    pub failed: u32,
    /// Version races lost to a concurrent worker.
    pub conflicts: u32,
    /// Enrollments that reached the end of their sequence.
    pub completed: u32,
}

pub struct Driver {
    store: Arc<dyn Store>,
    gateways: GatewaySet,
    renderer: Arc<dyn TemplateRenderer>,
    clock: Arc<dyn Clock>,
    limiter: RateLimiter,
    dispatch_timeout: Duration,
    max_attempts: u32,
}

impl Driver {
    pub fn new(
        store: Arc<dyn Store>,
        gateways: GatewaySet,
        renderer: Arc<dyn TemplateRenderer>,
        clock: Arc<dyn Clock>,
        config: &EngineConfig,
    ) -> Result<Self> {
        let limiter = RateLimiter::new(Arc::clone(&store), &config.quota_timezone)?;
        Ok(Self {
            store,
            gateways,
            renderer,
            clock,
            limiter,
            dispatch_timeout: Duration::from_secs(config.dispatch_timeout_secs),
            max_attempts: config.max_dispatch_attempts.max(1),
        })
    }

    /// Run one scheduling pass over every active campaign.
    pub async fn tick(&self) -> Result<TickStats> {
        let now = self.clock.now();
        let mut stats = TickStats::default();

        for campaign in self.store.list_campaigns(Some(CampaignStatus::Active))? {
            if !campaign.is_running_on(self.limiter.quota_date(now)) {
                tracing::debug!(campaign = %campaign.name, "outside calendar bounds, dormant");
                continue;
            }
            if !campaign.steps_well_ordered() {
                tracing::warn!(campaign = %campaign.name, "step orders not increasing, skipping");
                continue;
            }
            for enrollment in self.store.list_open_enrollments(&campaign.id)? {
                stats.processed += 1;
                let id = enrollment.id.clone();
                if let Err(e) = self.advance(&campaign, enrollment, now, &mut stats).await {
                    stats.failed += 1;
                    tracing::warn!(enrollment = %id, error = %e, "enrollment advance failed");
                }
            }
        }

        tracing::info!(
            processed = stats.processed,
            sent = stats.sent,
            skipped = stats.skipped,
            deferred = stats.deferred,
            exhausted = stats.exhausted,
            failed = stats.failed,
            conflicts = stats.conflicts,
            completed = stats.completed,
            "⏱️ Tick finished"
        );
        Ok(stats)
    }

    /// Push one enrollment forward by at most one step.
    async fn advance(
        &self,
        campaign: &Campaign,
        mut enrollment: Enrollment,
        now: DateTime<Utc>,
        stats: &mut TickStats,
    ) -> Result<()> {
        // Fresh enrollments become schedulable on their first tick
        if enrollment.state == EnrollmentState::Pending {
            match self.transition(&enrollment, EnrollmentState::Scheduled, enrollment.current_step, 0, now)? {
                Some(updated) => enrollment = updated,
                None => {
                    stats.conflicts += 1;
                    return Ok(());
                }
            }
        }
        // A crash between Sent and the re-schedule leaves Sent behind;
        // normalize before selecting
        if enrollment.state == EnrollmentState::Sent {
            match self.transition(&enrollment, EnrollmentState::Scheduled, enrollment.current_step, 0, now)? {
                Some(updated) => enrollment = updated,
                None => {
                    stats.conflicts += 1;
                    return Ok(());
                }
            }
        }
        match enrollment.state {
            EnrollmentState::Scheduled => {}
            // Another worker holds the dispatch lock
            EnrollmentState::Dispatching => {
                stats.conflicts += 1;
                return Ok(());
            }
            _ => return Ok(()),
        }

        let prospect = self
            .store
            .get_prospect(&enrollment.prospect_id)?
            .ok_or_else(|| CadenceError::not_found("prospect", &enrollment.prospect_id))?;
        let touchpoints = self.store.touchpoints_for_prospect(&prospect.id)?;
        let selection = selector::next_step(&enrollment, campaign, &touchpoints, now);

        // Persist the pointer past skipped steps before acting on the
        // survivor, so a skip holds even if the dispatch below loses
        if let Some(&last_skipped) = selection.skipped.last() {
            match self.transition(
                &enrollment,
                EnrollmentState::Scheduled,
                last_skipped as i32,
                0,
                now,
            )? {
                Some(updated) => {
                    stats.skipped += selection.skipped.len() as u32;
                    tracing::debug!(
                        enrollment = %updated.id,
                        steps = ?selection.skipped,
                        "steps skipped"
                    );
                    enrollment = updated;
                }
                None => {
                    stats.conflicts += 1;
                    return Ok(());
                }
            }
        }

        match selection.next {
            NextStep::NoMoreSteps => {
                match self.transition(
                    &enrollment,
                    EnrollmentState::Completed,
                    enrollment.current_step,
                    0,
                    now,
                )? {
                    Some(done) => {
                        stats.completed += 1;
                        tracing::info!(enrollment = %done.id, campaign = %campaign.name, "✅ Sequence completed");
                    }
                    None => stats.conflicts += 1,
                }
                Ok(())
            }
            NextStep::Waiting { until } => {
                stats.deferred += 1;
                tracing::debug!(enrollment = %enrollment.id, %until, "waiting on due time");
                Ok(())
            }
            NextStep::Due { index, .. } => {
                self.dispatch(campaign, enrollment, &prospect, index, now, stats)
                    .await
            }
        }
    }

    /// Send the step at `index` for this enrollment, or decide not to.
    async fn dispatch(
        &self,
        campaign: &Campaign,
        enrollment: Enrollment,
        prospect: &Prospect,
        index: usize,
        now: DateTime<Utc>,
        stats: &mut TickStats,
    ) -> Result<()> {
        let step = &campaign.steps[index];

        // Opted-out or address-less channel: nothing to send, step over
        let Some(recipient) = prospect.recipient_for(step.channel) else {
            tracing::debug!(
                enrollment = %enrollment.id,
                prospect = %prospect.id,
                channel = %step.channel,
                "no deliverable address, skipping step"
            );
            match self.transition(&enrollment, EnrollmentState::Scheduled, index as i32, 0, now)? {
                Some(_) => stats.skipped += 1,
                None => stats.conflicts += 1,
            }
            return Ok(());
        };
        let recipient = recipient.to_string();

        // Seller working hours; prospects without a window are always open
        if let Some(seller_id) = &prospect.seller_id {
            if let Some(seller_window) = self.store.get_seller_window(seller_id)? {
                match window::is_within_window(now, &seller_window) {
                    Ok(true) => {}
                    Ok(false) => {
                        stats.deferred += 1;
                        match window::next_window_start(now, &seller_window) {
                            Ok(opens_at) => tracing::debug!(
                                enrollment = %enrollment.id,
                                seller = %seller_id,
                                %opens_at,
                                "outside seller window"
                            ),
                            Err(e) => tracing::warn!(
                                enrollment = %enrollment.id,
                                seller = %seller_id,
                                error = %e,
                                "outside seller window, no opening found"
                            ),
                        }
                        return Ok(());
                    }
                    Err(e) => {
                        // Bad window config defers rather than sends
                        stats.deferred += 1;
                        tracing::warn!(seller = %seller_id, error = %e, "invalid seller window");
                        return Ok(());
                    }
                }
            }
        }

        match self.limiter.try_reserve(campaign, now)? {
            Quota::Reserved => {}
            Quota::Exhausted => {
                stats.exhausted += 1;
                tracing::debug!(campaign = %campaign.name, "daily quota exhausted");
                return Ok(());
            }
        }

        // Dispatching doubles as the per-step lock; losing the race
        // here means another worker owns this enrollment right now
        let locked = match self.transition(
            &enrollment,
            EnrollmentState::Dispatching,
            enrollment.current_step,
            enrollment.attempts + 1,
            now,
        )? {
            Some(locked) => locked,
            None => {
                self.limiter.release(campaign, now)?;
                stats.conflicts += 1;
                return Ok(());
            }
        };

        let ctx = RenderContext::for_prospect(prospect);
        let rendered = self
            .renderer
            .render(&step.subject_template, &ctx)
            .and_then(|subject| {
                let body = self.renderer.render(&step.body_template, &ctx)?;
                Ok((subject, body))
            });
        let (subject, body) = match rendered {
            Ok(parts) => parts,
            Err(e) => {
                // Template failures never heal on retry
                self.limiter.release(campaign, now)?;
                self.transition(&locked, EnrollmentState::Failed, locked.current_step, locked.attempts, now)?;
                stats.failed += 1;
                tracing::warn!(
                    enrollment = %locked.id,
                    step = step.step_order,
                    error = %e,
                    "template render failed, enrollment failed"
                );
                return Ok(());
            }
        };

        let message = OutboundMessage {
            channel: step.channel,
            recipient,
            subject: subject.clone(),
            body,
        };
        let gateway = self.gateways.for_channel(step.channel);
        let receipt = match tokio::time::timeout(self.dispatch_timeout, gateway.send(&message)).await
        {
            Ok(Ok(receipt)) => receipt,
            Ok(Err(e)) => {
                return self.dispatch_failed(campaign, &locked, now, stats, e);
            }
            Err(_) => {
                // Assume non-delivery on timeout; a retry may duplicate,
                // a silent drop would lose the touch
                let e = CadenceError::Transport(format!(
                    "gateway {} timed out after {:?}",
                    gateway.name(),
                    self.dispatch_timeout
                ));
                return self.dispatch_failed(campaign, &locked, now, stats, e);
            }
        };

        // The audit record always lands, even if a cancel raced the send
        let touchpoint = Touchpoint {
            id: uuid::Uuid::new_v4().to_string(),
            prospect_id: prospect.id.clone(),
            campaign_id: Some(campaign.id.clone()),
            enrollment_id: Some(locked.id.clone()),
            step_order: Some(step.step_order),
            channel: step.channel,
            direction: Direction::Outbound,
            outcome: receipt.outcome,
            subject,
            note: format!("campaign: {}", campaign.name),
            provider_ref: receipt.provider_ref,
            occurred_at: now,
            automated: true,
        };
        self.store.append_touchpoint(&touchpoint)?;
        stats.sent += 1;
        tracing::info!(
            enrollment = %locked.id,
            prospect = %prospect.id,
            channel = %step.channel,
            step = step.step_order,
            gateway = gateway.name(),
            "📤 Step dispatched"
        );

        match self.transition(&locked, EnrollmentState::Sent, index as i32, 0, now)? {
            Some(sent) => {
                if self
                    .transition(&sent, EnrollmentState::Scheduled, sent.current_step, 0, now)?
                    .is_none()
                {
                    stats.conflicts += 1;
                }
            }
            // Cancelled mid-send; the message left, the pointer stays
            None => stats.conflicts += 1,
        }
        Ok(())
    }

    /// A dispatch that produced no send: give the quota slot back and
    /// either queue a retry or give up on the enrollment.
    fn dispatch_failed(
        &self,
        campaign: &Campaign,
        locked: &Enrollment,
        now: DateTime<Utc>,
        stats: &mut TickStats,
        error: CadenceError,
    ) -> Result<()> {
        self.limiter.release(campaign, now)?;
        stats.failed += 1;
        if locked.attempts >= self.max_attempts {
            tracing::warn!(
                enrollment = %locked.id,
                attempts = locked.attempts,
                error = %error,
                "dispatch failed, retry budget spent, enrollment failed"
            );
            self.transition(locked, EnrollmentState::Failed, locked.current_step, locked.attempts, now)?;
        } else {
            tracing::warn!(
                enrollment = %locked.id,
                attempts = locked.attempts,
                error = %error,
                "dispatch failed, will retry next tick"
            );
            self.transition(locked, EnrollmentState::Scheduled, locked.current_step, locked.attempts, now)?;
        }
        Ok(())
    }

    /// CAS transition from the in-memory view of the enrollment.
    /// `None` = another worker moved it first.
    fn transition(
        &self,
        enrollment: &Enrollment,
        state: EnrollmentState,
        current_step: i32,
        attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<Enrollment>> {
        debug_assert!(can_transition(enrollment.state, state));
        self.store.transition_enrollment(&EnrollmentUpdate {
            id: enrollment.id.clone(),
            expected_version: enrollment.version,
            state,
            current_step,
            attempts,
            last_action_at: Some(now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cadence_core::clock::ManualClock;
    use cadence_core::types::{CampaignStep, DispatchReceipt, Outcome, SellerWindow};
    use cadence_store::MemoryStore;
    use chrono::{NaiveTime, TimeZone};
    use std::sync::Mutex;

    #[derive(Clone, Copy, PartialEq)]
    enum Mode {
        Succeed,
        Refuse,
        Hang,
    }

    struct FakeGateway {
        mode: Mode,
        sent: Mutex<Vec<OutboundMessage>>,
    }

    impl FakeGateway {
        fn new(mode: Mode) -> Arc<Self> {
            Arc::new(Self {
                mode,
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<OutboundMessage> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessagingGateway for FakeGateway {
        fn name(&self) -> &str {
            "fake"
        }

        async fn send(&self, message: &OutboundMessage) -> cadence_core::error::Result<DispatchReceipt> {
            match self.mode {
                Mode::Succeed => {
                    self.sent.lock().unwrap().push(message.clone());
                    Ok(DispatchReceipt {
                        provider_ref: Some("ref-1".into()),
                        outcome: Outcome::Pending,
                    })
                }
                Mode::Refuse => Err(CadenceError::Transport("connection refused".into())),
                Mode::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(DispatchReceipt {
                        provider_ref: None,
                        outcome: Outcome::Pending,
                    })
                }
            }
        }
    }

    struct EchoRenderer;

    impl TemplateRenderer for EchoRenderer {
        fn render(&self, template: &str, _ctx: &RenderContext) -> cadence_core::error::Result<String> {
            Ok(template.to_string())
        }
    }

    struct BrokenRenderer;

    impl TemplateRenderer for BrokenRenderer {
        fn render(&self, _template: &str, _ctx: &RenderContext) -> cadence_core::error::Result<String> {
            Err(CadenceError::Template("unknown placeholder {{x}}".into()))
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        gateway: Arc<FakeGateway>,
        driver: Driver,
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
    }

    fn harness(mode: Mode) -> Harness {
        harness_with(mode, Arc::new(EchoRenderer), EngineConfig::default())
    }

    fn harness_with(
        mode: Mode,
        renderer: Arc<dyn TemplateRenderer>,
        config: EngineConfig,
    ) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(t0()));
        let gateway = FakeGateway::new(mode);
        let gateways = GatewaySet {
            email: gateway.clone(),
            sms: gateway.clone(),
        };
        let driver = Driver::new(
            store.clone(),
            gateways,
            renderer,
            clock.clone(),
            &config,
        )
        .unwrap();
        Harness {
            store,
            clock,
            gateway,
            driver,
        }
    }

    fn step(order: u32, delay_days: u32) -> CampaignStep {
        CampaignStep {
            step_order: order,
            channel: ChannelKind::Email,
            delay_days,
            delay_hours: 0,
            subject_template: "Hello".into(),
            body_template: "Following up".into(),
            skip_if_responded: false,
            is_active: true,
        }
    }

    fn seed_campaign(h: &Harness, steps: Vec<CampaignStep>, limit: u32) -> Campaign {
        let mut campaign = Campaign::new("two-step");
        campaign.status = CampaignStatus::Active;
        campaign.steps = steps;
        campaign.max_contacts_per_day = limit;
        h.store.insert_campaign(&campaign).unwrap();
        campaign
    }

    fn seed_prospect(h: &Harness, id: &str) -> Prospect {
        let prospect = Prospect {
            id: id.into(),
            company_name: "Acme".into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: Some(format!("{id}@acme.test")),
            phone: Some("+15551234567".into()),
            opted_out_email: false,
            opted_out_sms: false,
            seller_id: None,
        };
        h.store.insert_prospect(&prospect).unwrap();
        prospect
    }

    fn enroll(h: &Harness, prospect_id: &str, campaign_id: &str) -> Enrollment {
        crate::enrollment::enroll(h.store.as_ref(), prospect_id, campaign_id, h.clock.now())
            .unwrap()
    }

    fn enrollment_state(h: &Harness, id: &str) -> Enrollment {
        h.store.get_enrollment(id).unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_two_step_campaign_runs_to_completion() {
        let h = harness(Mode::Succeed);
        let campaign = seed_campaign(&h, vec![step(0, 0), step(1, 3)], 0);
        let prospect = seed_prospect(&h, "p1");
        let enrollment = enroll(&h, &prospect.id, &campaign.id);

        // Tick 1: step 0 due immediately
        let stats = h.driver.tick().await.unwrap();
        assert_eq!(stats.sent, 1);
        let e = enrollment_state(&h, &enrollment.id);
        assert_eq!(e.state, EnrollmentState::Scheduled);
        assert_eq!(e.current_step, 0);

        // Tick 2, an hour later: nothing due
        h.clock.advance(chrono::Duration::hours(1));
        let stats = h.driver.tick().await.unwrap();
        assert_eq!(stats.sent, 0);
        assert_eq!(stats.deferred, 1);

        // Tick 3, past step 1's due time
        h.clock.advance(chrono::Duration::days(3));
        let stats = h.driver.tick().await.unwrap();
        assert_eq!(stats.sent, 1);
        let e = enrollment_state(&h, &enrollment.id);
        assert_eq!(e.current_step, 1);

        // Tick 4: sequence is finished
        let stats = h.driver.tick().await.unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(
            enrollment_state(&h, &enrollment.id).state,
            EnrollmentState::Completed
        );

        assert_eq!(h.gateway.sent().len(), 2);
        let touchpoints = h.store.touchpoints_for_enrollment(&enrollment.id).unwrap();
        assert_eq!(touchpoints.len(), 2);
        assert!(touchpoints.iter().all(|t| t.automated));
    }

    #[tokio::test]
    async fn test_response_skips_follow_up_without_sending() {
        let h = harness(Mode::Succeed);
        let mut follow_up = step(1, 3);
        follow_up.skip_if_responded = true;
        let campaign = seed_campaign(&h, vec![step(0, 0), follow_up], 0);
        let prospect = seed_prospect(&h, "p1");
        let enrollment = enroll(&h, &prospect.id, &campaign.id);

        h.driver.tick().await.unwrap();
        assert_eq!(h.gateway.sent().len(), 1);

        // Prospect replies the next day
        h.clock.advance(chrono::Duration::days(1));
        h.store
            .append_touchpoint(&Touchpoint {
                id: "reply".into(),
                prospect_id: prospect.id.clone(),
                campaign_id: Some(campaign.id.clone()),
                enrollment_id: Some(enrollment.id.clone()),
                step_order: None,
                channel: ChannelKind::Email,
                direction: Direction::Inbound,
                outcome: Outcome::Success,
                subject: "Re: Hello".into(),
                note: String::new(),
                provider_ref: None,
                occurred_at: h.clock.now(),
                automated: false,
            })
            .unwrap();

        h.clock.advance(chrono::Duration::days(2));
        let stats = h.driver.tick().await.unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.completed, 1);
        // Follow-up never left
        assert_eq!(h.gateway.sent().len(), 1);
        assert_eq!(
            enrollment_state(&h, &enrollment.id).state,
            EnrollmentState::Completed
        );
    }

    #[tokio::test]
    async fn test_daily_quota_holds_second_enrollment_until_tomorrow() {
        let h = harness(Mode::Succeed);
        let campaign = seed_campaign(&h, vec![step(0, 0), step(1, 3)], 1);
        let p1 = seed_prospect(&h, "p1");
        let p2 = seed_prospect(&h, "p2");
        enroll(&h, &p1.id, &campaign.id);
        enroll(&h, &p2.id, &campaign.id);

        let stats = h.driver.tick().await.unwrap();
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.exhausted, 1);

        // Same day: still exhausted
        h.clock.advance(chrono::Duration::hours(2));
        let stats = h.driver.tick().await.unwrap();
        assert_eq!(stats.sent, 0);
        assert_eq!(stats.exhausted, 1);

        // Next day the counter resets
        h.clock.advance(chrono::Duration::days(1));
        let stats = h.driver.tick().await.unwrap();
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.exhausted, 0);
        assert_eq!(h.gateway.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_transport_failure_retries_then_fails_enrollment() {
        let h = harness(Mode::Refuse);
        let campaign = seed_campaign(&h, vec![step(0, 0)], 5);
        let prospect = seed_prospect(&h, "p1");
        let enrollment = enroll(&h, &prospect.id, &campaign.id);

        for attempt in 1..=2 {
            let stats = h.driver.tick().await.unwrap();
            assert_eq!(stats.failed, 1);
            let e = enrollment_state(&h, &enrollment.id);
            assert_eq!(e.state, EnrollmentState::Scheduled);
            assert_eq!(e.attempts, attempt);
        }
        // Third attempt exhausts the default budget of 3
        let stats = h.driver.tick().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(
            enrollment_state(&h, &enrollment.id).state,
            EnrollmentState::Failed
        );

        // Every reservation was handed back
        let date = h.clock.now().date_naive();
        assert_eq!(h.store.quota_used(&campaign.id, date).unwrap(), 0);
        assert!(h
            .store
            .touchpoints_for_enrollment(&enrollment.id)
            .unwrap()
            .is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_gateway_timeout_counts_as_failure_and_releases_quota() {
        let mut config = EngineConfig::default();
        config.dispatch_timeout_secs = 1;
        config.max_dispatch_attempts = 1;
        let h = harness_with(Mode::Hang, Arc::new(EchoRenderer), config);
        let campaign = seed_campaign(&h, vec![step(0, 0)], 1);
        let prospect = seed_prospect(&h, "p1");
        let enrollment = enroll(&h, &prospect.id, &campaign.id);

        let stats = h.driver.tick().await.unwrap();
        assert_eq!(stats.sent, 0);
        assert_eq!(stats.failed, 1);
        assert_eq!(
            enrollment_state(&h, &enrollment.id).state,
            EnrollmentState::Failed
        );
        let date = h.clock.now().date_naive();
        assert_eq!(h.store.quota_used(&campaign.id, date).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_template_failure_fails_enrollment_immediately() {
        let h = harness_with(Mode::Succeed, Arc::new(BrokenRenderer), EngineConfig::default());
        let campaign = seed_campaign(&h, vec![step(0, 0)], 1);
        let prospect = seed_prospect(&h, "p1");
        let enrollment = enroll(&h, &prospect.id, &campaign.id);

        let stats = h.driver.tick().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(
            enrollment_state(&h, &enrollment.id).state,
            EnrollmentState::Failed
        );
        // No retry, no send, quota returned
        assert!(h.gateway.sent().is_empty());
        let date = h.clock.now().date_naive();
        assert_eq!(h.store.quota_used(&campaign.id, date).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_opted_out_channel_skips_step() {
        let h = harness(Mode::Succeed);
        let campaign = seed_campaign(&h, vec![step(0, 0), step(1, 0)], 0);
        let mut prospect = seed_prospect(&h, "p1");
        prospect.opted_out_email = true;
        h.store.insert_prospect(&prospect).unwrap();
        let enrollment = enroll(&h, &prospect.id, &campaign.id);

        // Each tick steps over one undeliverable step
        let stats = h.driver.tick().await.unwrap();
        assert_eq!(stats.skipped, 1);
        let stats = h.driver.tick().await.unwrap();
        assert_eq!(stats.skipped, 1);
        let stats = h.driver.tick().await.unwrap();
        assert_eq!(stats.completed, 1);

        assert!(h.gateway.sent().is_empty());
        assert_eq!(
            enrollment_state(&h, &enrollment.id).state,
            EnrollmentState::Completed
        );
    }

    #[tokio::test]
    async fn test_closed_seller_window_defers_dispatch() {
        let h = harness(Mode::Succeed);
        let campaign = seed_campaign(&h, vec![step(0, 0)], 0);
        let mut prospect = seed_prospect(&h, "p1");
        prospect.seller_id = Some("s1".into());
        h.store.insert_prospect(&prospect).unwrap();
        // Monday-only window, 9-17 New York. t0 is Monday 07:00 local.
        h.store
            .upsert_seller_window(&SellerWindow {
                seller_id: "s1".into(),
                working_days: vec![1],
                start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                end: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
                timezone: "America/New_York".into(),
            })
            .unwrap();
        let enrollment = enroll(&h, &prospect.id, &campaign.id);

        let stats = h.driver.tick().await.unwrap();
        assert_eq!(stats.deferred, 1);
        assert!(h.gateway.sent().is_empty());

        // Window opens at 14:00 UTC
        h.clock.advance(chrono::Duration::hours(3));
        let stats = h.driver.tick().await.unwrap();
        assert_eq!(stats.sent, 1);
        assert_eq!(enrollment_state(&h, &enrollment.id).current_step, 0);
    }

    #[tokio::test]
    async fn test_concurrent_lock_holder_blocks_this_tick() {
        let h = harness(Mode::Succeed);
        let campaign = seed_campaign(&h, vec![step(0, 0)], 0);
        let prospect = seed_prospect(&h, "p1");
        let enrollment = enroll(&h, &prospect.id, &campaign.id);

        // Another worker already holds the dispatch lock
        h.store
            .transition_enrollment(&EnrollmentUpdate {
                id: enrollment.id.clone(),
                expected_version: enrollment.version,
                state: EnrollmentState::Dispatching,
                current_step: enrollment.current_step,
                attempts: 1,
                last_action_at: Some(h.clock.now()),
            })
            .unwrap()
            .unwrap();

        let stats = h.driver.tick().await.unwrap();
        assert_eq!(stats.conflicts, 1);
        assert_eq!(stats.sent, 0);
        assert!(h.gateway.sent().is_empty());
    }

    /// Holds the send open until the test says otherwise, so a cancel
    /// can land while the dispatch is in flight.
    struct BlockingGateway {
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    impl BlockingGateway {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                entered: tokio::sync::Notify::new(),
                release: tokio::sync::Notify::new(),
            })
        }
    }

    #[async_trait]
    impl MessagingGateway for BlockingGateway {
        fn name(&self) -> &str {
            "blocking"
        }

        async fn send(
            &self,
            _message: &OutboundMessage,
        ) -> cadence_core::error::Result<DispatchReceipt> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(DispatchReceipt {
                provider_ref: Some("ref-1".into()),
                outcome: Outcome::Pending,
            })
        }
    }

    #[tokio::test]
    async fn test_cancel_during_dispatch_keeps_audit_record() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(t0()));
        let gateway = BlockingGateway::new();
        let gateways = GatewaySet {
            email: gateway.clone(),
            sms: gateway.clone(),
        };
        let driver = Driver::new(
            store.clone(),
            gateways,
            Arc::new(EchoRenderer),
            clock.clone(),
            &EngineConfig::default(),
        )
        .unwrap();

        let mut campaign = Campaign::new("one-step");
        campaign.status = CampaignStatus::Active;
        campaign.steps = vec![step(0, 0)];
        store.insert_campaign(&campaign).unwrap();
        let prospect = Prospect {
            id: "p1".into(),
            company_name: "Acme".into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: Some("p1@acme.test".into()),
            phone: None,
            opted_out_email: false,
            opted_out_sms: false,
            seller_id: None,
        };
        store.insert_prospect(&prospect).unwrap();
        let enrollment =
            crate::enrollment::enroll(store.as_ref(), &prospect.id, &campaign.id, clock.now())
                .unwrap();

        // Cancel lands while the gateway call is in flight, then the
        // send is allowed to finish
        let cancel_mid_send = async {
            gateway.entered.notified().await;
            crate::enrollment::cancel(store.as_ref(), &enrollment.id, clock.now()).unwrap();
            gateway.release.notify_one();
        };
        let (stats, ()) = tokio::join!(driver.tick(), cancel_mid_send);
        let stats = stats.unwrap();

        // The message left and its audit record landed
        assert_eq!(stats.sent, 1);
        let touchpoints = store.touchpoints_for_enrollment(&enrollment.id).unwrap();
        assert_eq!(touchpoints.len(), 1);
        assert!(touchpoints[0].automated);

        // But the enrollment stays cancelled; the advance lost its race
        assert_eq!(stats.conflicts, 1);
        assert_eq!(
            store.get_enrollment(&enrollment.id).unwrap().unwrap().state,
            EnrollmentState::Cancelled
        );

        // A later tick leaves the cancelled enrollment untouched
        let stats = driver.tick().await.unwrap();
        assert_eq!(stats.processed, 0);
        assert_eq!(
            store.touchpoints_for_enrollment(&enrollment.id).unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_pointer_never_moves_backwards() {
        let h = harness(Mode::Succeed);
        let campaign = seed_campaign(&h, vec![step(0, 0), step(1, 1), step(2, 2)], 0);
        let prospect = seed_prospect(&h, "p1");
        let enrollment = enroll(&h, &prospect.id, &campaign.id);

        let mut last = -1;
        for _ in 0..6 {
            h.driver.tick().await.unwrap();
            let e = enrollment_state(&h, &enrollment.id);
            assert!(e.current_step >= last);
            last = e.current_step;
            h.clock.advance(chrono::Duration::days(1));
        }
        assert_eq!(last, 2);
        // Each step left exactly once
        assert_eq!(h.gateway.sent().len(), 3);
    }

    #[tokio::test]
    async fn test_paused_campaign_emits_nothing() {
        let h = harness(Mode::Succeed);
        let campaign = seed_campaign(&h, vec![step(0, 0)], 0);
        let prospect = seed_prospect(&h, "p1");
        enroll(&h, &prospect.id, &campaign.id);
        h.store
            .set_campaign_status(&campaign.id, CampaignStatus::Paused)
            .unwrap();

        let stats = h.driver.tick().await.unwrap();
        assert_eq!(stats.processed, 0);
        assert!(h.gateway.sent().is_empty());
    }
}
