//! Session arithmetic: open/closed checks and the next trading open.

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, LocalResult, NaiveDate, NaiveTime, Offset,
    TimeZone, Weekday,
};
use chrono_tz::Tz;
use research_core::MarketStatus;
use serde::{Deserialize, Serialize};

use crate::{is_us_market_holiday, Market};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum ClosureReason {
    Weekend,
    Holiday,
    AfterHours,
}

impl ClosureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClosureReason::Weekend => "weekend",
            ClosureReason::Holiday => "holiday",
            ClosureReason::AfterHours => "after_hours",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct MarketHours {
    pub open: String,
    pub close: String,
}

/// Snapshot of a market's session state at one instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SessionReport {
    pub market: Market,
    pub is_open: bool,
    pub phase: MarketStatus,
    pub current_time: DateTime<FixedOffset>,
    pub timezone: String,
    pub market_hours: MarketHours,
    pub next_open: Option<DateTime<FixedOffset>>,
    pub time_until_open_seconds: Option<i64>,
    pub time_until_open_hours: Option<f64>,
    pub closure_reason: Option<ClosureReason>,
}

/// How long a cached quote stays usable for a given session phase.
pub fn cache_ttl(status: MarketStatus) -> std::time::Duration {
    let secs = match status {
        MarketStatus::Open => 60,
        MarketStatus::PreMarket => 300,
        MarketStatus::AfterHours => 600,
        MarketStatus::Closed => 3600,
        MarketStatus::Holiday => 7200,
    };
    std::time::Duration::from_secs(secs)
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Attach a local wall-clock time to `tz`, resolving DST gaps and folds.
fn localize(tz: Tz, date: NaiveDate, time: NaiveTime) -> DateTime<Tz> {
    let naive = date.and_time(time);
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _) => earliest,
        // Wall time skipped by a DST jump: read it with the pre-jump offset,
        // which lands the same distance past the gap
        LocalResult::None => {
            let before = tz.offset_from_utc_datetime(&(naive - Duration::hours(24))).fix();
            let utc = naive - Duration::seconds(i64::from(before.local_minus_utc()));
            tz.from_utc_datetime(&utc)
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MarketSession {
    market: Market,
}

impl MarketSession {
    pub fn new(market: Market) -> Self {
        Self { market }
    }

    pub fn for_symbol(symbol: &str) -> Self {
        Self::new(Market::for_symbol(symbol))
    }

    pub fn market(&self) -> Market {
        self.market
    }

    fn local<Z: TimeZone>(&self, at: &DateTime<Z>) -> DateTime<Tz> {
        at.with_timezone(&self.market.timezone())
    }

    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        self.market.observes_us_holidays() && is_us_market_holiday(date)
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !is_weekend(date) && !self.is_holiday(date)
    }

    /// Regular session check, inclusive of both open and close.
    pub fn is_market_open<Z: TimeZone>(&self, at: &DateTime<Z>) -> bool {
        let local = self.local(at);
        if !self.is_trading_day(local.date_naive()) {
            return false;
        }
        let hours = self.market.hours();
        let t = local.time();
        hours.open <= t && t <= hours.close
    }

    /// First trading day on or after `date` (strictly after when `include_start` is false).
    fn next_trading_day(&self, date: NaiveDate, include_start: bool) -> NaiveDate {
        let mut day = if include_start {
            date
        } else {
            date.succ_opt().unwrap_or(date)
        };
        while !self.is_trading_day(day) {
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }
        day
    }

    /// Start of the next regular session, in the market's timezone.
    pub fn next_market_open<Z: TimeZone>(&self, at: &DateTime<Z>) -> DateTime<Tz> {
        let local = self.local(at);
        let hours = self.market.hours();
        let today = local.date_naive();

        let day = if self.is_market_open(at) || local.time() >= hours.close {
            self.next_trading_day(today, false)
        } else {
            self.next_trading_day(today, true)
        };

        localize(self.market.timezone(), day, hours.open)
    }

    /// `None` while the market is open.
    pub fn time_until_open<Z: TimeZone>(&self, at: &DateTime<Z>) -> Option<Duration> {
        if self.is_market_open(at) {
            return None;
        }
        let local = self.local(at);
        Some(self.next_market_open(at) - local)
    }

    pub fn closure_reason<Z: TimeZone>(&self, at: &DateTime<Z>) -> Option<ClosureReason> {
        if self.is_market_open(at) {
            return None;
        }
        let date = self.local(at).date_naive();
        if is_weekend(date) {
            Some(ClosureReason::Weekend)
        } else if self.is_holiday(date) {
            Some(ClosureReason::Holiday)
        } else {
            Some(ClosureReason::AfterHours)
        }
    }

    /// Session phase including the extended-hours windows.
    pub fn phase<Z: TimeZone>(&self, at: &DateTime<Z>) -> MarketStatus {
        let local = self.local(at);
        let date = local.date_naive();
        if self.is_holiday(date) {
            return MarketStatus::Holiday;
        }
        if is_weekend(date) {
            return MarketStatus::Closed;
        }

        let hours = self.market.hours();
        let t = local.time();
        if hours.open <= t && t <= hours.close {
            return MarketStatus::Open;
        }
        if let Some(pre) = hours.pre_market_open {
            if pre <= t && t < hours.open {
                return MarketStatus::PreMarket;
            }
        }
        if let Some(after) = hours.after_hours_close {
            if hours.close < t && t < after {
                return MarketStatus::AfterHours;
            }
        }
        MarketStatus::Closed
    }

    pub fn status<Z: TimeZone>(&self, at: &DateTime<Z>) -> SessionReport {
        let local = self.local(at);
        let hours = self.market.hours();
        let is_open = self.is_market_open(at);

        let (next_open, until) = if is_open {
            (None, None)
        } else {
            let next = self.next_market_open(at);
            let until = next.clone() - local.clone();
            (Some(next.fixed_offset()), Some(until))
        };

        SessionReport {
            market: self.market,
            is_open,
            phase: self.phase(at),
            current_time: local.fixed_offset(),
            timezone: self.market.timezone().name().to_string(),
            market_hours: MarketHours {
                open: hours.open.format("%H:%M").to_string(),
                close: hours.close.format("%H:%M").to_string(),
            },
            next_open,
            time_until_open_seconds: until.map(|d| d.num_seconds()),
            time_until_open_hours: until.map(|d| (d.num_seconds() as f64 / 3600.0 * 100.0).round() / 100.0),
            closure_reason: self.closure_reason(at),
        }
    }

    /// Maximum acceptable age for data about this market right now.
    pub fn freshness_requirement<Z: TimeZone>(&self, at: &DateTime<Z>) -> std::time::Duration {
        let secs = match self.closure_reason(at) {
            None => 60,
            Some(ClosureReason::Weekend) => 2 * 24 * 3600,
            Some(ClosureReason::Holiday) => 24 * 3600,
            Some(ClosureReason::AfterHours) => 3600,
        };
        std::time::Duration::from_secs(secs)
    }

    /// Whether fresh data is worth fetching, with a short reason code.
    pub fn should_fetch_realtime<Z: TimeZone>(&self, at: &DateTime<Z>) -> (bool, String) {
        match self.closure_reason(at) {
            None => (true, "market_open".to_string()),
            Some(reason) => (false, format!("market_closed_{}", reason.as_str())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use chrono_tz::America::New_York;

    fn ny(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Tz> {
        New_York.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn nyse() -> MarketSession {
        MarketSession::new(Market::Nyse)
    }

    #[test]
    fn test_localize_shifts_past_dst_gap() {
        // 02:30 does not exist on 2024-03-10 in New York
        let date = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let time = NaiveTime::from_hms_opt(2, 30, 0).unwrap();
        let dt = localize(New_York, date, time);
        assert_eq!(dt, ny(2024, 3, 10, 3, 30));

        // Fall-back fold keeps the earlier instant
        let fold = localize(
            New_York,
            NaiveDate::from_ymd_opt(2024, 11, 3).unwrap(),
            NaiveTime::from_hms_opt(1, 30, 0).unwrap(),
        );
        assert_eq!(fold.offset().fix().local_minus_utc(), -4 * 3600);
    }

    #[test]
    fn test_month_end_rolls_to_next_month() {
        let next = nyse().next_market_open(&ny(2024, 1, 31, 17, 0));
        assert_eq!(next, ny(2024, 2, 1, 9, 30));
    }

    #[test]
    fn test_year_end_skips_new_year_holiday() {
        let next = nyse().next_market_open(&ny(2024, 12, 31, 17, 0));
        assert_eq!(next, ny(2025, 1, 2, 9, 30));
    }

    #[test]
    fn test_independence_day_is_skipped() {
        let next = nyse().next_market_open(&ny(2024, 7, 3, 17, 0));
        assert_eq!(next, ny(2024, 7, 5, 9, 30));
    }

    #[test]
    fn test_friday_evening_rolls_to_monday() {
        let next = nyse().next_market_open(&ny(2024, 1, 5, 17, 0));
        assert_eq!(next, ny(2024, 1, 8, 9, 30));
    }

    #[test]
    fn test_long_weekend_skips_holiday_monday() {
        // MLK day 2024-01-15
        let next = nyse().next_market_open(&ny(2024, 1, 12, 16, 30));
        assert_eq!(next, ny(2024, 1, 16, 9, 30));
    }

    #[test]
    fn test_before_open_returns_same_day() {
        let next = nyse().next_market_open(&ny(2024, 2, 6, 7, 0));
        assert_eq!(next, ny(2024, 2, 6, 9, 30));
    }

    #[test]
    fn test_during_session_returns_next_day() {
        let at = ny(2024, 2, 6, 11, 0);
        assert!(nyse().is_market_open(&at));
        assert_eq!(nyse().next_market_open(&at), ny(2024, 2, 7, 9, 30));
        assert!(nyse().time_until_open(&at).is_none());
    }

    #[test]
    fn test_close_is_inclusive() {
        let at = ny(2024, 2, 6, 16, 0);
        assert!(nyse().is_market_open(&at));
        assert!(!nyse().is_market_open(&ny(2024, 2, 6, 16, 1)));
        assert!(nyse().is_market_open(&ny(2024, 2, 6, 9, 30)));
    }

    #[test]
    fn test_accepts_utc_input() {
        // 2024-02-06 14:30 UTC is 09:30 in New York
        let at = Utc.with_ymd_and_hms(2024, 2, 6, 14, 30, 0).unwrap();
        assert!(nyse().is_market_open(&at));
    }

    #[test]
    fn test_dst_start_shifts_utc_open() {
        let next = nyse().next_market_open(&ny(2024, 3, 8, 17, 0));
        assert_eq!(next.with_timezone(&Utc), Utc.with_ymd_and_hms(2024, 3, 11, 13, 30, 0).unwrap());

        let before = nyse().next_market_open(&ny(2024, 3, 7, 17, 0));
        assert_eq!(before.with_timezone(&Utc), Utc.with_ymd_and_hms(2024, 3, 8, 14, 30, 0).unwrap());
    }

    #[test]
    fn test_time_until_open() {
        let until = nyse().time_until_open(&ny(2024, 1, 31, 17, 0)).unwrap();
        assert_eq!(until, Duration::minutes(16 * 60 + 30));
    }

    #[test]
    fn test_phases() {
        let s = nyse();
        assert_eq!(s.phase(&ny(2024, 2, 6, 5, 0)), MarketStatus::PreMarket);
        assert_eq!(s.phase(&ny(2024, 2, 6, 10, 0)), MarketStatus::Open);
        assert_eq!(s.phase(&ny(2024, 2, 6, 18, 0)), MarketStatus::AfterHours);
        assert_eq!(s.phase(&ny(2024, 2, 6, 22, 0)), MarketStatus::Closed);
        assert_eq!(s.phase(&ny(2024, 2, 10, 10, 0)), MarketStatus::Closed);
        assert_eq!(s.phase(&ny(2024, 7, 4, 10, 0)), MarketStatus::Holiday);
    }

    #[test]
    fn test_closure_reasons() {
        let s = nyse();
        assert_eq!(s.closure_reason(&ny(2024, 2, 10, 10, 0)), Some(ClosureReason::Weekend));
        assert_eq!(s.closure_reason(&ny(2024, 7, 4, 10, 0)), Some(ClosureReason::Holiday));
        assert_eq!(s.closure_reason(&ny(2024, 2, 6, 20, 0)), Some(ClosureReason::AfterHours));
        assert_eq!(s.closure_reason(&ny(2024, 2, 6, 10, 0)), None);
    }

    #[test]
    fn test_freshness_and_fetch_decision() {
        let s = nyse();
        assert_eq!(s.freshness_requirement(&ny(2024, 2, 6, 10, 0)).as_secs(), 60);
        assert_eq!(s.freshness_requirement(&ny(2024, 2, 10, 10, 0)).as_secs(), 172_800);
        assert_eq!(s.freshness_requirement(&ny(2024, 7, 4, 10, 0)).as_secs(), 86_400);
        assert_eq!(s.freshness_requirement(&ny(2024, 2, 6, 20, 0)).as_secs(), 3600);

        assert_eq!(s.should_fetch_realtime(&ny(2024, 2, 6, 10, 0)), (true, "market_open".to_string()));
        assert_eq!(
            s.should_fetch_realtime(&ny(2024, 2, 10, 10, 0)),
            (false, "market_closed_weekend".to_string())
        );
    }

    #[test]
    fn test_status_report_when_closed() {
        let report = nyse().status(&ny(2024, 12, 31, 17, 0));
        assert!(!report.is_open);
        assert_eq!(report.timezone, "America/New_York");
        assert_eq!(report.market_hours.open, "09:30");
        assert_eq!(report.closure_reason, Some(ClosureReason::AfterHours));
        assert_eq!(report.next_open, Some(ny(2025, 1, 2, 9, 30).fixed_offset()));
        assert_eq!(report.time_until_open_seconds, Some((40 * 60 + 30) * 60));
        assert_eq!(report.time_until_open_hours, Some(40.5));
    }

    #[test]
    fn test_status_report_serializes() {
        let report = nyse().status(&ny(2024, 2, 6, 10, 0));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["market"], "NYSE");
        assert_eq!(json["is_open"], true);
        assert_eq!(json["phase"], "open");
        assert!(json["next_open"].is_null());
    }

    #[test]
    fn test_us_holidays_do_not_close_other_markets() {
        let london = MarketSession::new(Market::Lse);
        let at = chrono_tz::Europe::London
            .with_ymd_and_hms(2024, 7, 4, 10, 0, 0)
            .unwrap();
        assert!(london.is_market_open(&at));
    }

    #[test]
    fn test_tokyo_session() {
        let tokyo = MarketSession::for_symbol("7203.T");
        let at = chrono_tz::Asia::Tokyo.with_ymd_and_hms(2024, 2, 6, 15, 30, 0).unwrap();
        assert!(!tokyo.is_market_open(&at));
        let next = tokyo.next_market_open(&at);
        assert_eq!(
            next,
            chrono_tz::Asia::Tokyo.with_ymd_and_hms(2024, 2, 7, 9, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_cache_ttl_by_phase() {
        assert_eq!(cache_ttl(MarketStatus::Open).as_secs(), 60);
        assert_eq!(cache_ttl(MarketStatus::PreMarket).as_secs(), 300);
        assert_eq!(cache_ttl(MarketStatus::AfterHours).as_secs(), 600);
        assert_eq!(cache_ttl(MarketStatus::Closed).as_secs(), 3600);
        assert_eq!(cache_ttl(MarketStatus::Holiday).as_secs(), 7200);
    }
}
