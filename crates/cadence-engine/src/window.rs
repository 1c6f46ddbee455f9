//! Seller working-hours windows.
//!
//! All arithmetic happens in the seller's IANA timezone via chrono-tz,
//! never through fixed UTC offsets, so DST transitions resolve the way
//! a wall clock in that zone would.

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

use cadence_core::error::{CadenceError, Result};
use cadence_core::types::SellerWindow;

// Upper bound on the forward search for the next opening. A valid
// window has at least one working day per week, so two weeks is
// already generous.
const MAX_LOOKAHEAD_DAYS: u32 = 14;

fn validate(window: &SellerWindow) -> Result<Tz> {
    if window.working_days.is_empty() {
        return Err(CadenceError::InvalidWindow(format!(
            "seller {} has an empty working-day set",
            window.seller_id
        )));
    }
    if let Some(day) = window.working_days.iter().find(|d| !(1..=7).contains(*d)) {
        return Err(CadenceError::InvalidWindow(format!(
            "seller {}: working day {day} outside 1..=7",
            window.seller_id
        )));
    }
    if window.start >= window.end {
        return Err(CadenceError::InvalidWindow(format!(
            "seller {}: window start {} is not before end {}",
            window.seller_id, window.start, window.end
        )));
    }
    window.timezone.parse::<Tz>().map_err(|_| {
        CadenceError::InvalidWindow(format!(
            "seller {}: unknown timezone {:?}",
            window.seller_id, window.timezone
        ))
    })
}

/// Whether `instant` falls inside the seller's working hours.
/// The end bound is exclusive.
pub fn is_within_window(instant: DateTime<Utc>, window: &SellerWindow) -> Result<bool> {
    let tz = validate(window)?;
    let local = instant.with_timezone(&tz);
    Ok(window.allows_weekday(local.weekday())
        && local.time() >= window.start
        && local.time() < window.end)
}

/// Earliest instant at or after `instant` that falls inside the window.
/// Returns `instant` itself when it is already inside.
pub fn next_window_start(instant: DateTime<Utc>, window: &SellerWindow) -> Result<DateTime<Utc>> {
    let tz = validate(window)?;
    let local = instant.with_timezone(&tz);
    if window.allows_weekday(local.weekday())
        && local.time() >= window.start
        && local.time() < window.end
    {
        return Ok(instant);
    }

    // First candidate day: today if the window has not opened yet,
    // otherwise tomorrow.
    let mut date = local.date_naive();
    if !(window.allows_weekday(local.weekday()) && local.time() < window.start) {
        date = next_day(date, &window.seller_id)?;
    }

    for _ in 0..MAX_LOOKAHEAD_DAYS {
        if window.allows_weekday(date.weekday()) {
            if let Some(opening) = resolve_opening(tz, date, window) {
                return Ok(opening.with_timezone(&Utc));
            }
        }
        date = next_day(date, &window.seller_id)?;
    }
    Err(CadenceError::InvalidWindow(format!(
        "seller {}: no window opening within {MAX_LOOKAHEAD_DAYS} days",
        window.seller_id
    )))
}

fn next_day(date: NaiveDate, seller_id: &str) -> Result<NaiveDate> {
    date.succ_opt().ok_or_else(|| {
        CadenceError::InvalidWindow(format!("seller {seller_id}: calendar overflow"))
    })
}

/// Resolve the local opening time on `date` to a zoned instant.
/// Ambiguous local times (fall-back) take the earlier instant; a DST
/// gap that swallows the opening retries one hour later if that still
/// lands inside the window.
fn resolve_opening(tz: Tz, date: NaiveDate, window: &SellerWindow) -> Option<DateTime<Tz>> {
    match tz.from_local_datetime(&date.and_time(window.start)) {
        LocalResult::Single(dt) => Some(dt),
        LocalResult::Ambiguous(earlier, _) => Some(earlier),
        LocalResult::None => {
            let (shifted, wrapped) = window.start.overflowing_add_signed(Duration::hours(1));
            if wrapped != 0 || shifted >= window.end {
                return None;
            }
            match tz.from_local_datetime(&date.and_time(shifted)) {
                LocalResult::Single(dt) => Some(dt),
                LocalResult::Ambiguous(earlier, _) => Some(earlier),
                LocalResult::None => None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn weekday_window() -> SellerWindow {
        SellerWindow {
            seller_id: "s1".into(),
            working_days: vec![1, 2, 3, 4, 5],
            start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            timezone: "America/New_York".into(),
        }
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_within_working_hours() {
        let window = weekday_window();
        // Monday 2026-03-02, 10:00 New York = 15:00 UTC (EST)
        assert!(is_within_window(utc(2026, 3, 2, 15, 0), &window).unwrap());
        // 08:59 local
        assert!(!is_within_window(utc(2026, 3, 2, 13, 59), &window).unwrap());
        // 17:00 local — end is exclusive
        assert!(!is_within_window(utc(2026, 3, 2, 22, 0), &window).unwrap());
        // Saturday
        assert!(!is_within_window(utc(2026, 3, 7, 15, 0), &window).unwrap());
    }

    #[test]
    fn test_next_start_same_day_before_opening() {
        let window = weekday_window();
        // Monday 06:00 local
        let next = next_window_start(utc(2026, 3, 2, 11, 0), &window).unwrap();
        assert_eq!(next, utc(2026, 3, 2, 14, 0)); // 09:00 EST
    }

    #[test]
    fn test_next_start_skips_weekend() {
        let window = weekday_window();
        // Friday 18:00 local = 23:00 UTC
        let next = next_window_start(utc(2026, 3, 6, 23, 0), &window).unwrap();
        // Monday 09:00 EST
        assert_eq!(next, utc(2026, 3, 9, 13, 0));
    }

    #[test]
    fn test_next_start_round_trip() {
        let window = weekday_window();
        for instant in [
            utc(2026, 3, 2, 15, 0),  // already inside
            utc(2026, 3, 2, 2, 0),   // before opening
            utc(2026, 3, 7, 12, 0),  // weekend
            utc(2026, 3, 6, 23, 30), // after Friday close
        ] {
            let next = next_window_start(instant, &window).unwrap();
            assert!(next >= instant);
            assert!(is_within_window(next, &window).unwrap());
        }
    }

    #[test]
    fn test_dst_gap_shifts_opening() {
        // US spring-forward 2026-03-08: 02:00 local does not exist.
        let window = SellerWindow {
            seller_id: "s1".into(),
            working_days: vec![7],
            start: NaiveTime::from_hms_opt(2, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(5, 0, 0).unwrap(),
            timezone: "America/New_York".into(),
        };
        // Sunday 00:00 local
        let next = next_window_start(utc(2026, 3, 8, 5, 0), &window).unwrap();
        // Opening resolves to 03:00 EDT = 07:00 UTC
        assert_eq!(next, utc(2026, 3, 8, 7, 0));
        assert!(is_within_window(next, &window).unwrap());
    }

    #[test]
    fn test_invalid_configs_rejected() {
        let mut window = weekday_window();
        window.working_days = vec![];
        assert!(matches!(
            is_within_window(Utc::now(), &window),
            Err(CadenceError::InvalidWindow(_))
        ));

        let mut window = weekday_window();
        window.working_days = vec![1, 8];
        assert!(is_within_window(Utc::now(), &window).is_err());

        let mut window = weekday_window();
        window.end = window.start;
        assert!(is_within_window(Utc::now(), &window).is_err());

        let mut window = weekday_window();
        window.timezone = "Mars/Olympus_Mons".into();
        assert!(next_window_start(Utc::now(), &window).is_err());
    }
}
