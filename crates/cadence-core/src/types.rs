//! Domain types — campaigns, steps, enrollments, touchpoints, windows.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Delivery channel for an outreach step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Email,
    Sms,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Email => "email",
            ChannelKind::Sms => "sms",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "email" => Some(ChannelKind::Email),
            "sms" => Some(ChannelKind::Sms),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Campaign lifecycle status. Only `Active` campaigns emit sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Active,
    Paused,
    Completed,
    Archived,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Active => "active",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(CampaignStatus::Draft),
            "active" => Some(CampaignStatus::Active),
            "paused" => Some(CampaignStatus::Paused),
            "completed" => Some(CampaignStatus::Completed),
            "archived" => Some(CampaignStatus::Archived),
            _ => None,
        }
    }
}

/// One scheduled outreach action within a campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignStep {
    /// Position in the sequence. Strictly increasing within a campaign,
    /// gaps allowed.
    pub step_order: u32,
    pub channel: ChannelKind,
    /// Days to wait, counted from enrollment creation (not from the
    /// previous step's actual send time — avoids schedule drift).
    #[serde(default)]
    pub delay_days: u32,
    /// Additional hours on top of `delay_days`.
    #[serde(default)]
    pub delay_hours: u32,
    #[serde(default)]
    pub subject_template: String,
    pub body_template: String,
    /// Skip this step if the prospect responded before it came due.
    #[serde(default)]
    pub skip_if_responded: bool,
    /// Inactive steps are passed over by the selector.
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl CampaignStep {
    /// Offset from enrollment creation at which this step comes due.
    pub fn delay(&self) -> Duration {
        Duration::days(self.delay_days as i64) + Duration::hours(self.delay_hours as i64)
    }
}

/// An automated outreach campaign: an ordered list of steps plus
/// rate-limit and calendar settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub status: CampaignStatus,
    /// Ordered by `step_order`.
    pub steps: Vec<CampaignStep>,
    /// Daily send cap across all enrollments. 0 = unlimited.
    #[serde(default)]
    pub max_contacts_per_day: u32,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    // Defaulted so seed files may omit them
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    pub fn new(name: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: String::new(),
            status: CampaignStatus::Draft,
            steps: Vec::new(),
            max_contacts_per_day: 0,
            start_date: None,
            end_date: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Step orders must be strictly increasing.
    pub fn steps_well_ordered(&self) -> bool {
        self.steps
            .windows(2)
            .all(|pair| pair[0].step_order < pair[1].step_order)
    }

    /// Whether the campaign may emit sends on the given calendar date.
    /// Status must be `Active` and the date must fall inside the
    /// optional start/end bounds.
    pub fn is_running_on(&self, date: NaiveDate) -> bool {
        if self.status != CampaignStatus::Active {
            return false;
        }
        if let Some(start) = self.start_date {
            if date < start {
                return false;
            }
        }
        if let Some(end) = self.end_date {
            if date > end {
                return false;
            }
        }
        true
    }
}

/// Minimal prospect read-model: what the engine needs to address and
/// personalize a send. Full prospect CRUD lives outside the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prospect {
    pub id: String,
    pub company_name: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub opted_out_email: bool,
    #[serde(default)]
    pub opted_out_sms: bool,
    /// Seller whose working-hours window gates sends to this prospect.
    #[serde(default)]
    pub seller_id: Option<String>,
}

impl Prospect {
    /// Deliverable address for a channel, honoring opt-outs.
    pub fn recipient_for(&self, channel: ChannelKind) -> Option<&str> {
        match channel {
            ChannelKind::Email if !self.opted_out_email => {
                self.email.as_deref().filter(|s| !s.is_empty())
            }
            ChannelKind::Sms if !self.opted_out_sms => {
                self.phone.as_deref().filter(|s| !s.is_empty())
            }
            _ => None,
        }
    }
}

/// Enrollment lifecycle state.
///
/// `Dispatching` doubles as a lock: a tick that holds it is the only
/// one allowed to send the current step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentState {
    Pending,
    Scheduled,
    Dispatching,
    Sent,
    Completed,
    Cancelled,
    Failed,
}

impl EnrollmentState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EnrollmentState::Completed | EnrollmentState::Cancelled | EnrollmentState::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentState::Pending => "pending",
            EnrollmentState::Scheduled => "scheduled",
            EnrollmentState::Dispatching => "dispatching",
            EnrollmentState::Sent => "sent",
            EnrollmentState::Completed => "completed",
            EnrollmentState::Cancelled => "cancelled",
            EnrollmentState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(EnrollmentState::Pending),
            "scheduled" => Some(EnrollmentState::Scheduled),
            "dispatching" => Some(EnrollmentState::Dispatching),
            "sent" => Some(EnrollmentState::Sent),
            "completed" => Some(EnrollmentState::Completed),
            "cancelled" => Some(EnrollmentState::Cancelled),
            "failed" => Some(EnrollmentState::Failed),
            _ => None,
        }
    }
}

/// One prospect's progress through one campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: String,
    pub prospect_id: String,
    pub campaign_id: String,
    /// Index into the campaign's step list of the last sent or skipped
    /// step. −1 = not started. Monotonically non-decreasing.
    pub current_step: i32,
    pub state: EnrollmentState,
    /// Optimistic-concurrency counter, bumped on every transition.
    pub version: u64,
    /// Dispatch attempts for the step currently being tried.
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub last_action_at: Option<DateTime<Utc>>,
}

impl Enrollment {
    pub fn new(prospect_id: &str, campaign_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            prospect_id: prospect_id.to_string(),
            campaign_id: campaign_id.to_string(),
            current_step: -1,
            state: EnrollmentState::Pending,
            version: 0,
            attempts: 0,
            created_at: now,
            last_action_at: None,
        }
    }
}

/// Direction of a touchpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Outbound,
    Inbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Outbound => "outbound",
            Direction::Inbound => "inbound",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "outbound" => Some(Direction::Outbound),
            "inbound" => Some(Direction::Inbound),
            _ => None,
        }
    }
}

/// Outcome of an interaction attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    NoAnswer,
    Voicemail,
    Bounced,
    Declined,
    FollowUp,
    Pending,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::NoAnswer => "no_answer",
            Outcome::Voicemail => "voicemail",
            Outcome::Bounced => "bounced",
            Outcome::Declined => "declined",
            Outcome::FollowUp => "follow_up",
            Outcome::Pending => "pending",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Outcome::Success),
            "no_answer" => Some(Outcome::NoAnswer),
            "voicemail" => Some(Outcome::Voicemail),
            "bounced" => Some(Outcome::Bounced),
            "declined" => Some(Outcome::Declined),
            "follow_up" => Some(Outcome::FollowUp),
            "pending" => Some(Outcome::Pending),
            _ => None,
        }
    }
}

/// Immutable record of one interaction attempt or outcome.
/// Append-only; the audit trail is never rewritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Touchpoint {
    pub id: String,
    pub prospect_id: String,
    #[serde(default)]
    pub campaign_id: Option<String>,
    #[serde(default)]
    pub enrollment_id: Option<String>,
    /// Step that produced this touchpoint, when automated.
    #[serde(default)]
    pub step_order: Option<u32>,
    pub channel: ChannelKind,
    pub direction: Direction,
    pub outcome: Outcome,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub note: String,
    /// External message id (provider SID, SMTP message-id, ...).
    #[serde(default)]
    pub provider_ref: Option<String>,
    pub occurred_at: DateTime<Utc>,
    /// Emitted by the scheduler rather than logged by a person.
    #[serde(default)]
    pub automated: bool,
}

impl Touchpoint {
    /// Whether this touchpoint counts as the prospect having responded.
    ///
    /// Anything inbound counts, whatever its outcome — even a `bounced`
    /// or `declined` inbound record means the prospect (or their mail
    /// system) reached back, and a `skip_if_responded` step will yield
    /// to it. An outbound touchpoint counts only when a person logged
    /// it with a responsive outcome — the engine's own automated sends
    /// never mark a prospect as responded.
    pub fn is_response(&self) -> bool {
        if self.direction == Direction::Inbound {
            return true;
        }
        !self.automated && matches!(self.outcome, Outcome::Success | Outcome::FollowUp)
    }
}

/// A seller's working-hours window: when sends on their behalf may
/// leave the system. Days use ISO numbering (1 = Monday .. 7 = Sunday).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SellerWindow {
    pub seller_id: String,
    pub working_days: Vec<u8>,
    pub start: NaiveTime,
    pub end: NaiveTime,
    /// IANA timezone identifier, e.g. "America/New_York".
    pub timezone: String,
}

impl SellerWindow {
    pub fn allows_weekday(&self, weekday: Weekday) -> bool {
        self.working_days
            .contains(&(weekday.number_from_monday() as u8))
    }
}

/// A rendered message handed to a messaging gateway.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub channel: ChannelKind,
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

/// What a gateway reports back for an accepted send.
#[derive(Debug, Clone)]
pub struct DispatchReceipt {
    /// External reference for the message, when the provider gives one.
    pub provider_ref: Option<String>,
    /// `Success` when delivery is confirmed, `Pending` when merely accepted.
    pub outcome: Outcome,
}

/// Values available to template placeholders.
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    pub first_name: String,
    pub last_name: String,
    pub company_name: String,
}

impl RenderContext {
    pub fn for_prospect(prospect: &Prospect) -> Self {
        Self {
            first_name: prospect.first_name.clone(),
            last_name: prospect.last_name.clone(),
            company_name: prospect.company_name.clone(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        match key {
            "first_name" => Some(&self.first_name),
            "last_name" => Some(&self.last_name),
            "company_name" => Some(&self.company_name),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn step(order: u32) -> CampaignStep {
        CampaignStep {
            step_order: order,
            channel: ChannelKind::Email,
            delay_days: 0,
            delay_hours: 0,
            subject_template: String::new(),
            body_template: "hi".into(),
            skip_if_responded: false,
            is_active: true,
        }
    }

    #[test]
    fn test_step_ordering_invariant() {
        let mut campaign = Campaign::new("seq");
        campaign.steps = vec![step(0), step(2), step(5)];
        assert!(campaign.steps_well_ordered());

        campaign.steps = vec![step(0), step(0)];
        assert!(!campaign.steps_well_ordered());
    }

    #[test]
    fn test_campaign_calendar_bounds() {
        let mut campaign = Campaign::new("bounded");
        campaign.status = CampaignStatus::Active;
        campaign.start_date = NaiveDate::from_ymd_opt(2026, 3, 1);
        campaign.end_date = NaiveDate::from_ymd_opt(2026, 3, 31);

        assert!(!campaign.is_running_on(NaiveDate::from_ymd_opt(2026, 2, 28).unwrap()));
        assert!(campaign.is_running_on(NaiveDate::from_ymd_opt(2026, 3, 15).unwrap()));
        assert!(!campaign.is_running_on(NaiveDate::from_ymd_opt(2026, 4, 1).unwrap()));

        campaign.status = CampaignStatus::Paused;
        assert!(!campaign.is_running_on(NaiveDate::from_ymd_opt(2026, 3, 15).unwrap()));
    }

    #[test]
    fn test_recipient_honors_opt_out() {
        let mut prospect = Prospect {
            id: "p1".into(),
            company_name: "Acme".into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: Some("ada@acme.test".into()),
            phone: Some("+15551234567".into()),
            opted_out_email: false,
            opted_out_sms: true,
            seller_id: None,
        };
        assert_eq!(prospect.recipient_for(ChannelKind::Email), Some("ada@acme.test"));
        assert_eq!(prospect.recipient_for(ChannelKind::Sms), None);

        prospect.opted_out_email = true;
        assert_eq!(prospect.recipient_for(ChannelKind::Email), None);
    }

    #[test]
    fn test_automated_send_is_not_a_response() {
        let mut tp = Touchpoint {
            id: "t1".into(),
            prospect_id: "p1".into(),
            campaign_id: None,
            enrollment_id: None,
            step_order: Some(0),
            channel: ChannelKind::Email,
            direction: Direction::Outbound,
            outcome: Outcome::Success,
            subject: String::new(),
            note: String::new(),
            provider_ref: None,
            occurred_at: Utc::now(),
            automated: true,
        };
        assert!(!tp.is_response());

        tp.automated = false;
        assert!(tp.is_response());

        tp.outcome = Outcome::NoAnswer;
        assert!(!tp.is_response());

        tp.direction = Direction::Inbound;
        assert!(tp.is_response());
    }

    #[test]
    fn test_inbound_counts_as_response_regardless_of_outcome() {
        let mut tp = Touchpoint {
            id: "t1".into(),
            prospect_id: "p1".into(),
            campaign_id: None,
            enrollment_id: None,
            step_order: None,
            channel: ChannelKind::Email,
            direction: Direction::Inbound,
            outcome: Outcome::Bounced,
            subject: String::new(),
            note: String::new(),
            provider_ref: None,
            occurred_at: Utc::now(),
            automated: true,
        };
        assert!(tp.is_response());

        tp.outcome = Outcome::Declined;
        assert!(tp.is_response());
    }

    #[test]
    fn test_state_round_trip() {
        for s in [
            EnrollmentState::Pending,
            EnrollmentState::Scheduled,
            EnrollmentState::Dispatching,
            EnrollmentState::Sent,
            EnrollmentState::Completed,
            EnrollmentState::Cancelled,
            EnrollmentState::Failed,
        ] {
            assert_eq!(EnrollmentState::parse(s.as_str()), Some(s));
        }
        assert!(EnrollmentState::Completed.is_terminal());
        assert!(!EnrollmentState::Dispatching.is_terminal());
    }

    #[test]
    fn test_window_weekday_membership() {
        let window = SellerWindow {
            seller_id: "s1".into(),
            working_days: vec![1, 2, 3, 4, 5],
            start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            timezone: "America/New_York".into(),
        };
        assert!(window.allows_weekday(Weekday::Mon));
        assert!(!window.allows_weekday(Weekday::Sat));
    }
}
