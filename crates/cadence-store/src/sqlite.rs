//! SQLite-backed persistence for campaigns, prospects, enrollments,
//! touchpoints, seller windows, and daily quota counters.
//!
//! Concurrency primitives map to single SQL statements:
//! - enrollment transitions guard on `version = ?` and bump it;
//! - quota reservation is a conditional `UPDATE ... WHERE used < limit`.
//!
//! A partial unique index enforces at most one non-terminal enrollment
//! per (prospect, campaign) pair at the storage layer as well.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rusqlite::{params, Connection, Row};

use cadence_core::error::{CadenceError, Result};
use cadence_core::traits::{EnrollmentUpdate, Store};
use cadence_core::types::{
    Campaign, CampaignStatus, ChannelKind, Direction, Enrollment, EnrollmentState, Outcome,
    Prospect, SellerWindow, Touchpoint,
};

const DATE_FMT: &str = "%Y-%m-%d";

/// SQLite `Store` implementation.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn db_err(e: rusqlite::Error) -> CadenceError {
    CadenceError::Storage(e.to_string())
}

impl SqliteStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(db_err)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        tracing::debug!("📂 Database opened: {}", path.display());
        Ok(store)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn migrate(&self) -> Result<()> {
        self.lock()
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS campaigns (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'draft',
                steps TEXT NOT NULL DEFAULT '[]',   -- JSON array of steps
                max_contacts_per_day INTEGER NOT NULL DEFAULT 0,
                start_date TEXT,
                end_date TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS prospects (
                id TEXT PRIMARY KEY,
                company_name TEXT NOT NULL,
                first_name TEXT NOT NULL DEFAULT '',
                last_name TEXT NOT NULL DEFAULT '',
                email TEXT,
                phone TEXT,
                opted_out_email INTEGER NOT NULL DEFAULT 0,
                opted_out_sms INTEGER NOT NULL DEFAULT 0,
                seller_id TEXT
            );

            CREATE TABLE IF NOT EXISTS seller_windows (
                seller_id TEXT PRIMARY KEY,
                working_days TEXT NOT NULL,          -- '1,2,3,4,5'
                start_time TEXT NOT NULL,            -- 'HH:MM:SS' local
                end_time TEXT NOT NULL,
                timezone TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS enrollments (
                id TEXT PRIMARY KEY,
                prospect_id TEXT NOT NULL,
                campaign_id TEXT NOT NULL,
                current_step INTEGER NOT NULL DEFAULT -1,
                state TEXT NOT NULL DEFAULT 'pending',
                version INTEGER NOT NULL DEFAULT 0,
                attempts INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                last_action_at TEXT
            );

            -- At most one open enrollment per (prospect, campaign)
            CREATE UNIQUE INDEX IF NOT EXISTS idx_open_enrollment
                ON enrollments(prospect_id, campaign_id)
                WHERE state NOT IN ('completed', 'cancelled', 'failed');

            CREATE INDEX IF NOT EXISTS idx_enrollments_campaign
                ON enrollments(campaign_id, state);

            CREATE TABLE IF NOT EXISTS touchpoints (
                id TEXT PRIMARY KEY,
                prospect_id TEXT NOT NULL,
                campaign_id TEXT,
                enrollment_id TEXT,
                step_order INTEGER,
                channel TEXT NOT NULL,
                direction TEXT NOT NULL,
                outcome TEXT NOT NULL,
                subject TEXT NOT NULL DEFAULT '',
                note TEXT NOT NULL DEFAULT '',
                provider_ref TEXT,
                occurred_at TEXT NOT NULL,
                automated INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_touchpoints_prospect
                ON touchpoints(prospect_id, occurred_at);

            CREATE TABLE IF NOT EXISTS quota (
                campaign_id TEXT NOT NULL,
                date TEXT NOT NULL,
                used INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (campaign_id, date)
            );
         ",
            )
            .map_err(|e| CadenceError::Storage(format!("migration: {e}")))
    }
}

// ── Row mappers ─────────────────────────────────────────────

fn parse_ts(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn parse_opt_ts(s: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_ts).transpose()
}

fn invalid_enum(what: &str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        format!("unknown {what}: {value}").into(),
    )
}

fn row_to_campaign(row: &Row<'_>) -> rusqlite::Result<Campaign> {
    let status_str: String = row.get("status")?;
    let steps_json: String = row.get("steps")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let start_date: Option<String> = row.get("start_date")?;
    let end_date: Option<String> = row.get("end_date")?;

    Ok(Campaign {
        id: row.get("id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        status: CampaignStatus::parse(&status_str)
            .ok_or_else(|| invalid_enum("campaign status", &status_str))?,
        steps: serde_json::from_str(&steps_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?,
        max_contacts_per_day: row.get("max_contacts_per_day")?,
        start_date: start_date
            .map(|d| {
                NaiveDate::parse_from_str(&d, DATE_FMT)
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
            })
            .transpose()?,
        end_date: end_date
            .map(|d| {
                NaiveDate::parse_from_str(&d, DATE_FMT)
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
            })
            .transpose()?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

fn row_to_prospect(row: &Row<'_>) -> rusqlite::Result<Prospect> {
    Ok(Prospect {
        id: row.get("id")?,
        company_name: row.get("company_name")?,
        first_name: row.get("first_name")?,
        last_name: row.get("last_name")?,
        email: row.get("email")?,
        phone: row.get("phone")?,
        opted_out_email: row.get::<_, i64>("opted_out_email")? != 0,
        opted_out_sms: row.get::<_, i64>("opted_out_sms")? != 0,
        seller_id: row.get("seller_id")?,
    })
}

fn row_to_enrollment(row: &Row<'_>) -> rusqlite::Result<Enrollment> {
    let state_str: String = row.get("state")?;
    let created_at: String = row.get("created_at")?;
    let last_action_at: Option<String> = row.get("last_action_at")?;
    Ok(Enrollment {
        id: row.get("id")?,
        prospect_id: row.get("prospect_id")?,
        campaign_id: row.get("campaign_id")?,
        current_step: row.get("current_step")?,
        state: EnrollmentState::parse(&state_str)
            .ok_or_else(|| invalid_enum("enrollment state", &state_str))?,
        version: row.get::<_, i64>("version")? as u64,
        attempts: row.get("attempts")?,
        created_at: parse_ts(&created_at)?,
        last_action_at: parse_opt_ts(last_action_at)?,
    })
}

fn row_to_touchpoint(row: &Row<'_>) -> rusqlite::Result<Touchpoint> {
    let channel_str: String = row.get("channel")?;
    let direction_str: String = row.get("direction")?;
    let outcome_str: String = row.get("outcome")?;
    let occurred_at: String = row.get("occurred_at")?;
    Ok(Touchpoint {
        id: row.get("id")?,
        prospect_id: row.get("prospect_id")?,
        campaign_id: row.get("campaign_id")?,
        enrollment_id: row.get("enrollment_id")?,
        step_order: row.get("step_order")?,
        channel: ChannelKind::parse(&channel_str)
            .ok_or_else(|| invalid_enum("channel", &channel_str))?,
        direction: Direction::parse(&direction_str)
            .ok_or_else(|| invalid_enum("direction", &direction_str))?,
        outcome: Outcome::parse(&outcome_str)
            .ok_or_else(|| invalid_enum("outcome", &outcome_str))?,
        subject: row.get("subject")?,
        note: row.get("note")?,
        provider_ref: row.get("provider_ref")?,
        occurred_at: parse_ts(&occurred_at)?,
        automated: row.get::<_, i64>("automated")? != 0,
    })
}

impl Store for SqliteStore {
    fn insert_campaign(&self, campaign: &Campaign) -> Result<()> {
        let steps = serde_json::to_string(&campaign.steps)
            .map_err(|e| CadenceError::Storage(format!("serialize steps: {e}")))?;
        self.lock()
            .execute(
                "INSERT OR REPLACE INTO campaigns
                 (id, name, description, status, steps, max_contacts_per_day,
                  start_date, end_date, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    campaign.id,
                    campaign.name,
                    campaign.description,
                    campaign.status.as_str(),
                    steps,
                    campaign.max_contacts_per_day,
                    campaign.start_date.map(|d| d.format(DATE_FMT).to_string()),
                    campaign.end_date.map(|d| d.format(DATE_FMT).to_string()),
                    campaign.created_at.to_rfc3339(),
                    campaign.updated_at.to_rfc3339(),
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn get_campaign(&self, id: &str) -> Result<Option<Campaign>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM campaigns WHERE id = ?1")
            .map_err(db_err)?;
        let mut rows = stmt
            .query_map([id], row_to_campaign)
            .map_err(db_err)?;
        rows.next().transpose().map_err(db_err)
    }

    fn list_campaigns(&self, status: Option<CampaignStatus>) -> Result<Vec<Campaign>> {
        let conn = self.lock();
        let (sql, args): (&str, Vec<String>) = match status {
            Some(s) => (
                "SELECT * FROM campaigns WHERE status = ?1 ORDER BY created_at",
                vec![s.as_str().to_string()],
            ),
            None => ("SELECT * FROM campaigns ORDER BY created_at", vec![]),
        };
        let mut stmt = conn.prepare(sql).map_err(db_err)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args), row_to_campaign)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    fn set_campaign_status(&self, id: &str, status: CampaignStatus) -> Result<()> {
        let changed = self
            .lock()
            .execute(
                "UPDATE campaigns SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), Utc::now().to_rfc3339(), id],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(CadenceError::not_found("campaign", id));
        }
        Ok(())
    }

    fn insert_prospect(&self, prospect: &Prospect) -> Result<()> {
        self.lock()
            .execute(
                "INSERT OR REPLACE INTO prospects
                 (id, company_name, first_name, last_name, email, phone,
                  opted_out_email, opted_out_sms, seller_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    prospect.id,
                    prospect.company_name,
                    prospect.first_name,
                    prospect.last_name,
                    prospect.email,
                    prospect.phone,
                    prospect.opted_out_email as i32,
                    prospect.opted_out_sms as i32,
                    prospect.seller_id,
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn get_prospect(&self, id: &str) -> Result<Option<Prospect>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM prospects WHERE id = ?1")
            .map_err(db_err)?;
        let mut rows = stmt.query_map([id], row_to_prospect).map_err(db_err)?;
        rows.next().transpose().map_err(db_err)
    }

    fn upsert_seller_window(&self, window: &SellerWindow) -> Result<()> {
        let days = window
            .working_days
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.lock()
            .execute(
                "INSERT OR REPLACE INTO seller_windows
                 (seller_id, working_days, start_time, end_time, timezone)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    window.seller_id,
                    days,
                    window.start.format("%H:%M:%S").to_string(),
                    window.end.format("%H:%M:%S").to_string(),
                    window.timezone,
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn get_seller_window(&self, seller_id: &str) -> Result<Option<SellerWindow>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM seller_windows WHERE seller_id = ?1")
            .map_err(db_err)?;
        let mut rows = stmt
            .query_map([seller_id], |row| {
                let days_str: String = row.get("working_days")?;
                let start: String = row.get("start_time")?;
                let end: String = row.get("end_time")?;
                let parse_time = |s: &str| {
                    NaiveTime::parse_from_str(s, "%H:%M:%S").map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            0,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })
                };
                Ok(SellerWindow {
                    seller_id: row.get("seller_id")?,
                    working_days: days_str
                        .split(',')
                        .filter_map(|d| d.trim().parse().ok())
                        .collect(),
                    start: parse_time(&start)?,
                    end: parse_time(&end)?,
                    timezone: row.get("timezone")?,
                })
            })
            .map_err(db_err)?;
        rows.next().transpose().map_err(db_err)
    }

    fn insert_enrollment(&self, enrollment: &Enrollment) -> Result<()> {
        self.lock()
            .execute(
                "INSERT INTO enrollments
                 (id, prospect_id, campaign_id, current_step, state, version,
                  attempts, created_at, last_action_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    enrollment.id,
                    enrollment.prospect_id,
                    enrollment.campaign_id,
                    enrollment.current_step,
                    enrollment.state.as_str(),
                    enrollment.version as i64,
                    enrollment.attempts,
                    enrollment.created_at.to_rfc3339(),
                    enrollment.last_action_at.map(|t| t.to_rfc3339()),
                ],
            )
            .map_err(|e| {
                CadenceError::Storage(format!(
                    "insert enrollment for prospect {}: {e}",
                    enrollment.prospect_id
                ))
            })?;
        Ok(())
    }

    fn get_enrollment(&self, id: &str) -> Result<Option<Enrollment>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM enrollments WHERE id = ?1")
            .map_err(db_err)?;
        let mut rows = stmt.query_map([id], row_to_enrollment).map_err(db_err)?;
        rows.next().transpose().map_err(db_err)
    }

    fn open_enrollment_for(
        &self,
        prospect_id: &str,
        campaign_id: &str,
    ) -> Result<Option<Enrollment>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT * FROM enrollments
                 WHERE prospect_id = ?1 AND campaign_id = ?2
                   AND state NOT IN ('completed', 'cancelled', 'failed')",
            )
            .map_err(db_err)?;
        let mut rows = stmt
            .query_map([prospect_id, campaign_id], row_to_enrollment)
            .map_err(db_err)?;
        rows.next().transpose().map_err(db_err)
    }

    fn list_open_enrollments(&self, campaign_id: &str) -> Result<Vec<Enrollment>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT * FROM enrollments
                 WHERE campaign_id = ?1
                   AND state NOT IN ('completed', 'cancelled', 'failed')
                 ORDER BY created_at",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([campaign_id], row_to_enrollment)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    fn transition_enrollment(&self, update: &EnrollmentUpdate) -> Result<Option<Enrollment>> {
        let changed = self
            .lock()
            .execute(
                "UPDATE enrollments
                 SET state = ?1, current_step = ?2, attempts = ?3,
                     last_action_at = ?4, version = version + 1
                 WHERE id = ?5 AND version = ?6",
                params![
                    update.state.as_str(),
                    update.current_step,
                    update.attempts,
                    update.last_action_at.map(|t| t.to_rfc3339()),
                    update.id,
                    update.expected_version as i64,
                ],
            )
            .map_err(db_err)?;
        if changed == 0 {
            // Either missing or version mismatch; distinguish for callers
            return match self.get_enrollment(&update.id)? {
                Some(_) => Ok(None),
                None => Err(CadenceError::not_found("enrollment", &update.id)),
            };
        }
        self.get_enrollment(&update.id)
    }

    fn append_touchpoint(&self, touchpoint: &Touchpoint) -> Result<()> {
        self.lock()
            .execute(
                "INSERT INTO touchpoints
                 (id, prospect_id, campaign_id, enrollment_id, step_order, channel,
                  direction, outcome, subject, note, provider_ref, occurred_at, automated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    touchpoint.id,
                    touchpoint.prospect_id,
                    touchpoint.campaign_id,
                    touchpoint.enrollment_id,
                    touchpoint.step_order,
                    touchpoint.channel.as_str(),
                    touchpoint.direction.as_str(),
                    touchpoint.outcome.as_str(),
                    touchpoint.subject,
                    touchpoint.note,
                    touchpoint.provider_ref,
                    touchpoint.occurred_at.to_rfc3339(),
                    touchpoint.automated as i32,
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn touchpoints_for_prospect(&self, prospect_id: &str) -> Result<Vec<Touchpoint>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM touchpoints WHERE prospect_id = ?1 ORDER BY occurred_at")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([prospect_id], row_to_touchpoint)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    fn touchpoints_for_enrollment(&self, enrollment_id: &str) -> Result<Vec<Touchpoint>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM touchpoints WHERE enrollment_id = ?1 ORDER BY occurred_at")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([enrollment_id], row_to_touchpoint)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    fn try_reserve_quota(&self, campaign_id: &str, date: NaiveDate, limit: u32) -> Result<bool> {
        let date_str = date.format(DATE_FMT).to_string();
        let conn = self.lock();
        conn.execute(
            "INSERT OR IGNORE INTO quota (campaign_id, date, used) VALUES (?1, ?2, 0)",
            params![campaign_id, date_str],
        )
        .map_err(db_err)?;
        // Single-statement compare-and-increment
        let changed = conn
            .execute(
                "UPDATE quota SET used = used + 1
                 WHERE campaign_id = ?1 AND date = ?2 AND used < ?3",
                params![campaign_id, date_str, limit],
            )
            .map_err(db_err)?;
        Ok(changed == 1)
    }

    fn release_quota(&self, campaign_id: &str, date: NaiveDate) -> Result<()> {
        self.lock()
            .execute(
                "UPDATE quota SET used = used - 1
                 WHERE campaign_id = ?1 AND date = ?2 AND used > 0",
                params![campaign_id, date.format(DATE_FMT).to_string()],
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn quota_used(&self, campaign_id: &str, date: NaiveDate) -> Result<u32> {
        let conn = self.lock();
        let used = conn
            .query_row(
                "SELECT used FROM quota WHERE campaign_id = ?1 AND date = ?2",
                params![campaign_id, date.format(DATE_FMT).to_string()],
                |row| row.get::<_, u32>(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })
            .map_err(db_err)?;
        Ok(used.unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::types::CampaignStep;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn sample_campaign() -> Campaign {
        let mut campaign = Campaign::new("welcome-sequence");
        campaign.status = CampaignStatus::Active;
        campaign.max_contacts_per_day = 10;
        campaign.steps = vec![CampaignStep {
            step_order: 0,
            channel: ChannelKind::Email,
            delay_days: 0,
            delay_hours: 0,
            subject_template: "Hello {{first_name}}".into(),
            body_template: "Welcome aboard".into(),
            skip_if_responded: false,
            is_active: true,
        }];
        campaign
    }

    #[test]
    fn test_campaign_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let campaign = sample_campaign();
        store.insert_campaign(&campaign).unwrap();

        let loaded = store.get_campaign(&campaign.id).unwrap().unwrap();
        assert_eq!(loaded.name, "welcome-sequence");
        assert_eq!(loaded.status, CampaignStatus::Active);
        assert_eq!(loaded.steps.len(), 1);
        assert_eq!(loaded.steps[0].subject_template, "Hello {{first_name}}");

        let active = store.list_campaigns(Some(CampaignStatus::Active)).unwrap();
        assert_eq!(active.len(), 1);
        assert!(store
            .list_campaigns(Some(CampaignStatus::Paused))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_enrollment_cas_transition() {
        let store = SqliteStore::open_in_memory().unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();
        let enrollment = Enrollment::new("p1", "c1", now);
        store.insert_enrollment(&enrollment).unwrap();

        let update = EnrollmentUpdate {
            id: enrollment.id.clone(),
            expected_version: 0,
            state: EnrollmentState::Dispatching,
            current_step: -1,
            attempts: 1,
            last_action_at: Some(now),
        };
        let won = store.transition_enrollment(&update).unwrap().unwrap();
        assert_eq!(won.state, EnrollmentState::Dispatching);
        assert_eq!(won.version, 1);

        // A stale writer loses without error
        assert!(store.transition_enrollment(&update).unwrap().is_none());

        // Unknown id is a hard error, not a silent conflict
        let missing = EnrollmentUpdate {
            id: "nope".into(),
            ..update
        };
        assert!(store.transition_enrollment(&missing).is_err());
    }

    #[test]
    fn test_open_enrollment_unique_index() {
        let store = SqliteStore::open_in_memory().unwrap();
        let now = Utc::now();
        let first = Enrollment::new("p1", "c1", now);
        store.insert_enrollment(&first).unwrap();
        assert!(store.insert_enrollment(&Enrollment::new("p1", "c1", now)).is_err());

        // Same prospect, different campaign is fine
        store.insert_enrollment(&Enrollment::new("p1", "c2", now)).unwrap();

        let open = store.open_enrollment_for("p1", "c1").unwrap().unwrap();
        assert_eq!(open.id, first.id);
    }

    #[test]
    fn test_touchpoints_are_append_only_records() {
        let store = SqliteStore::open_in_memory().unwrap();
        let tp = Touchpoint {
            id: "t1".into(),
            prospect_id: "p1".into(),
            campaign_id: Some("c1".into()),
            enrollment_id: Some("e1".into()),
            step_order: Some(0),
            channel: ChannelKind::Sms,
            direction: Direction::Outbound,
            outcome: Outcome::Pending,
            subject: String::new(),
            note: "campaign: welcome".into(),
            provider_ref: Some("SM123".into()),
            occurred_at: Utc::now(),
            automated: true,
        };
        store.append_touchpoint(&tp).unwrap();

        let by_prospect = store.touchpoints_for_prospect("p1").unwrap();
        assert_eq!(by_prospect.len(), 1);
        assert_eq!(by_prospect[0].provider_ref.as_deref(), Some("SM123"));

        let by_enrollment = store.touchpoints_for_enrollment("e1").unwrap();
        assert_eq!(by_enrollment.len(), 1);
        assert_eq!(by_enrollment[0].outcome, Outcome::Pending);
    }

    #[test]
    fn test_seller_window_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let window = SellerWindow {
            seller_id: "s1".into(),
            working_days: vec![1, 2, 3, 4, 5],
            start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            timezone: "America/New_York".into(),
        };
        store.upsert_seller_window(&window).unwrap();

        let loaded = store.get_seller_window("s1").unwrap().unwrap();
        assert_eq!(loaded.working_days, vec![1, 2, 3, 4, 5]);
        assert_eq!(loaded.timezone, "America/New_York");
        assert!(store.get_seller_window("s2").unwrap().is_none());
    }

    #[test]
    fn test_quota_limit_enforced_across_threads() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let limit = 3u32;

        let mut handles = Vec::new();
        for _ in 0..12 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                store.try_reserve_quota("c1", date, limit).unwrap()
            }));
        }
        let reserved = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|granted| *granted)
            .count();
        assert_eq!(reserved as u32, limit);
        assert_eq!(store.quota_used("c1", date).unwrap(), limit);

        store.release_quota("c1", date).unwrap();
        assert_eq!(store.quota_used("c1", date).unwrap(), limit - 1);
        assert!(store.try_reserve_quota("c1", date, limit).unwrap());
    }
}
