use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc, Weekday};
use chrono_tz::Asia::Kolkata;
use chrono_tz::Tz;
use signal_engine::TradingPhase;

/// Maps UTC wall clock onto the IST trading session. All phase decisions and
/// the once-a-day triggers (reminder, forced close, daily reset) key off this.
pub struct SessionClock {
    open_minute: u32,
    reminder_minute: u32,
    forced_close_minute: u32,
}

impl SessionClock {
    pub fn new(open_minute: u32, reminder_minute: u32, forced_close_minute: u32) -> Self {
        Self {
            open_minute,
            reminder_minute,
            forced_close_minute,
        }
    }

    fn local(&self, now: DateTime<Utc>) -> DateTime<Tz> {
        now.with_timezone(&Kolkata)
    }

    fn minute_of_day(&self, now: DateTime<Utc>) -> u32 {
        let local = self.local(now);
        local.hour() * 60 + local.minute()
    }

    pub fn is_trading_day(&self, now: DateTime<Utc>) -> bool {
        !matches!(self.local(now).weekday(), Weekday::Sat | Weekday::Sun)
    }

    pub fn session_date(&self, now: DateTime<Utc>) -> NaiveDate {
        self.local(now).date_naive()
    }

    /// Minutes since session open, negative before it.
    pub fn minutes_since_open(&self, now: DateTime<Utc>) -> i64 {
        self.minute_of_day(now) as i64 - self.open_minute as i64
    }

    pub fn phase(&self, now: DateTime<Utc>) -> TradingPhase {
        if !self.is_trading_day(now) {
            return TradingPhase::AfterClose;
        }
        TradingPhase::from_session_offset(self.minutes_since_open(now))
    }

    /// Today's session open instant in UTC.
    pub fn session_open_utc(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let date = self.session_date(now);
        let naive = date
            .and_hms_opt(self.open_minute / 60, self.open_minute % 60, 0)
            .unwrap_or_else(|| date.and_hms_opt(0, 0, 0).unwrap());
        naive
            .and_local_timezone(Kolkata)
            .single()
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or(now)
    }

    pub fn past_reminder(&self, now: DateTime<Utc>) -> bool {
        self.is_trading_day(now) && self.minute_of_day(now) >= self.reminder_minute
    }

    pub fn past_forced_close(&self, now: DateTime<Utc>) -> bool {
        self.is_trading_day(now) && self.minute_of_day(now) >= self.forced_close_minute
    }
}
