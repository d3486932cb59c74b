//! NSE cash market session (09:15 - 15:30 IST, Monday to Friday)
//!
//! Exchange holidays are not modelled; the feed keeps ingesting outside the
//! session and this is reported for display only.

use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use chrono_tz::Asia::Kolkata;

const OPEN: (u32, u32) = (9, 15);
const CLOSE: (u32, u32) = (15, 30);

/// Whether the NSE cash session is open at `now`
pub fn is_market_open(now: DateTime<Utc>) -> bool {
    let ist = now.with_timezone(&Kolkata);
    if matches!(ist.weekday(), Weekday::Sat | Weekday::Sun) {
        return false;
    }

    let (Some(open), Some(close)) = (
        NaiveTime::from_hms_opt(OPEN.0, OPEN.1, 0),
        NaiveTime::from_hms_opt(CLOSE.0, CLOSE.1, 0),
    ) else {
        return false;
    };

    let time = ist.time();
    time >= open && time < close
}

/// Whether the session is open right now
pub fn market_open_now() -> bool {
    is_market_open(Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ist(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Kolkata
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_open_during_weekday_session() {
        // 2024-06-05 was a Wednesday
        assert!(is_market_open(ist(2024, 6, 5, 9, 15)));
        assert!(is_market_open(ist(2024, 6, 5, 12, 0)));
        assert!(is_market_open(ist(2024, 6, 5, 15, 29)));
    }

    #[test]
    fn test_closed_outside_session() {
        assert!(!is_market_open(ist(2024, 6, 5, 9, 14)));
        assert!(!is_market_open(ist(2024, 6, 5, 15, 30)));
        assert!(!is_market_open(ist(2024, 6, 5, 22, 0)));
    }

    #[test]
    fn test_closed_on_weekends() {
        // 2024-06-08 was a Saturday
        assert!(!is_market_open(ist(2024, 6, 8, 11, 0)));
        assert!(!is_market_open(ist(2024, 6, 9, 11, 0)));
    }
}
