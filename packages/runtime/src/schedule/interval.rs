//! Symbolic schedule intervals and their cron patterns.
//!
//! Patterns use six fields with seconds first:
//! `sec min hour day-of-month month day-of-week`.

use std::fmt;
use std::str::FromStr;

use super::ScheduleError;

/// Day of the week used by weekly and monthly intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DayOfWeek {
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl DayOfWeek {
    pub const ALL: [DayOfWeek; 7] = [
        DayOfWeek::Sunday,
        DayOfWeek::Monday,
        DayOfWeek::Tuesday,
        DayOfWeek::Wednesday,
        DayOfWeek::Thursday,
        DayOfWeek::Friday,
        DayOfWeek::Saturday,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DayOfWeek::Sunday => "sunday",
            DayOfWeek::Monday => "monday",
            DayOfWeek::Tuesday => "tuesday",
            DayOfWeek::Wednesday => "wednesday",
            DayOfWeek::Thursday => "thursday",
            DayOfWeek::Friday => "friday",
            DayOfWeek::Saturday => "saturday",
        }
    }

    /// Name understood by the day-of-week cron field.
    pub fn cron_name(&self) -> &'static str {
        match self {
            DayOfWeek::Sunday => "Sun",
            DayOfWeek::Monday => "Mon",
            DayOfWeek::Tuesday => "Tue",
            DayOfWeek::Wednesday => "Wed",
            DayOfWeek::Thursday => "Thu",
            DayOfWeek::Friday => "Fri",
            DayOfWeek::Saturday => "Sat",
        }
    }
}

impl fmt::Display for DayOfWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DayOfWeek {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        DayOfWeek::ALL
            .into_iter()
            .find(|day| day.as_str() == lower)
            .ok_or_else(|| ScheduleError::UnknownDayOfWeek(s.to_string()))
    }
}

/// How often a scheduled task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScheduleInterval {
    Second,
    TwoSeconds,
    ThreeSeconds,
    FourSeconds,
    FiveSeconds,
    TenSeconds,
    FifteenSeconds,
    TwentySeconds,
    ThirtySeconds,
    Minute,
    TwoMinutes,
    ThreeMinutes,
    FourMinutes,
    FiveMinutes,
    TenMinutes,
    FifteenMinutes,
    TwentyMinutes,
    ThirtyMinutes,
    Hour,
    TwoHours,
    ThreeHours,
    FourHours,
    FiveHours,
    SixHours,
    SevenHours,
    EightHours,
    NineHours,
    TenHours,
    ElevenHours,
    TwelveHours,
    Day,
    Week,
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Month,
}

const INTERVAL_NAMES: [(ScheduleInterval, &str); 40] = [
    (ScheduleInterval::Second, "second"),
    (ScheduleInterval::TwoSeconds, "two seconds"),
    (ScheduleInterval::ThreeSeconds, "three seconds"),
    (ScheduleInterval::FourSeconds, "four seconds"),
    (ScheduleInterval::FiveSeconds, "five seconds"),
    (ScheduleInterval::TenSeconds, "ten seconds"),
    (ScheduleInterval::FifteenSeconds, "fifteen seconds"),
    (ScheduleInterval::TwentySeconds, "twenty seconds"),
    (ScheduleInterval::ThirtySeconds, "thirty seconds"),
    (ScheduleInterval::Minute, "minute"),
    (ScheduleInterval::TwoMinutes, "two minutes"),
    (ScheduleInterval::ThreeMinutes, "three minutes"),
    (ScheduleInterval::FourMinutes, "four minutes"),
    (ScheduleInterval::FiveMinutes, "five minutes"),
    (ScheduleInterval::TenMinutes, "ten minutes"),
    (ScheduleInterval::FifteenMinutes, "fifteen minutes"),
    (ScheduleInterval::TwentyMinutes, "twenty minutes"),
    (ScheduleInterval::ThirtyMinutes, "thirty minutes"),
    (ScheduleInterval::Hour, "hour"),
    (ScheduleInterval::TwoHours, "two hours"),
    (ScheduleInterval::ThreeHours, "three hours"),
    (ScheduleInterval::FourHours, "four hours"),
    (ScheduleInterval::FiveHours, "five hours"),
    (ScheduleInterval::SixHours, "six hours"),
    (ScheduleInterval::SevenHours, "seven hours"),
    (ScheduleInterval::EightHours, "eight hours"),
    (ScheduleInterval::NineHours, "nine hours"),
    (ScheduleInterval::TenHours, "ten hours"),
    (ScheduleInterval::ElevenHours, "eleven hours"),
    (ScheduleInterval::TwelveHours, "twelve hours"),
    (ScheduleInterval::Day, "day"),
    (ScheduleInterval::Week, "week"),
    (ScheduleInterval::Sunday, "sunday"),
    (ScheduleInterval::Monday, "monday"),
    (ScheduleInterval::Tuesday, "tuesday"),
    (ScheduleInterval::Wednesday, "wednesday"),
    (ScheduleInterval::Thursday, "thursday"),
    (ScheduleInterval::Friday, "friday"),
    (ScheduleInterval::Saturday, "saturday"),
    (ScheduleInterval::Month, "month"),
];

impl ScheduleInterval {
    /// Symbolic name, e.g. `"two seconds"`.
    pub fn as_str(&self) -> &'static str {
        INTERVAL_NAMES
            .iter()
            .find(|(interval, _)| interval == self)
            .map(|(_, name)| *name)
            .unwrap_or("day")
    }

    /// Whether `.on(day)` applies.
    pub fn accepts_day_of_week(&self) -> bool {
        matches!(self, ScheduleInterval::Week | ScheduleInterval::Month)
    }

    /// Whether `.at(time)` applies: daily intervals or larger.
    pub fn accepts_time(&self) -> bool {
        matches!(
            self,
            ScheduleInterval::Day
                | ScheduleInterval::Week
                | ScheduleInterval::Sunday
                | ScheduleInterval::Monday
                | ScheduleInterval::Tuesday
                | ScheduleInterval::Wednesday
                | ScheduleInterval::Thursday
                | ScheduleInterval::Friday
                | ScheduleInterval::Saturday
                | ScheduleInterval::Month
        )
    }

    /// Cron pattern for this interval.
    pub fn to_cron(&self, options: &IntervalCronOptions) -> String {
        use ScheduleInterval::*;

        let IntervalCronOptions {
            minute,
            hour,
            day_of_month,
            day_of_week,
        } = *options;
        let weekday = day_of_week.unwrap_or(DayOfWeek::Sunday).cron_name();

        match self {
            Second => "* * * * * *".to_string(),
            TwoSeconds => "*/2 * * * * *".to_string(),
            ThreeSeconds => "*/3 * * * * *".to_string(),
            FourSeconds => "*/4 * * * * *".to_string(),
            FiveSeconds => "*/5 * * * * *".to_string(),
            TenSeconds => "*/10 * * * * *".to_string(),
            FifteenSeconds => "*/15 * * * * *".to_string(),
            TwentySeconds => "*/20 * * * * *".to_string(),
            ThirtySeconds => "*/30 * * * * *".to_string(),

            Minute => "0 * * * * *".to_string(),
            TwoMinutes => "0 */2 * * * *".to_string(),
            ThreeMinutes => "0 */3 * * * *".to_string(),
            FourMinutes => "0 */4 * * * *".to_string(),
            FiveMinutes => "0 */5 * * * *".to_string(),
            TenMinutes => "0 */10 * * * *".to_string(),
            FifteenMinutes => "0 */15 * * * *".to_string(),
            TwentyMinutes => "0 */20 * * * *".to_string(),
            ThirtyMinutes => "0 */30 * * * *".to_string(),

            Hour => format!("0 {minute} * * * *"),
            TwoHours => format!("0 {minute} */2 * * *"),
            ThreeHours => format!("0 {minute} */3 * * *"),
            FourHours => format!("0 {minute} */4 * * *"),
            FiveHours => format!("0 {minute} */5 * * *"),
            SixHours => format!("0 {minute} */6 * * *"),
            SevenHours => format!("0 {minute} */7 * * *"),
            EightHours => format!("0 {minute} */8 * * *"),
            NineHours => format!("0 {minute} */9 * * *"),
            TenHours => format!("0 {minute} */10 * * *"),
            ElevenHours => format!("0 {minute} */11 * * *"),
            TwelveHours => format!("0 {minute} */12 * * *"),

            Day => format!("0 {minute} {hour} * * *"),

            Week => format!("0 {minute} {hour} * * {weekday}"),
            Sunday => format!("0 {minute} {hour} * * Sun"),
            Monday => format!("0 {minute} {hour} * * Mon"),
            Tuesday => format!("0 {minute} {hour} * * Tue"),
            Wednesday => format!("0 {minute} {hour} * * Wed"),
            Thursday => format!("0 {minute} {hour} * * Thu"),
            Friday => format!("0 {minute} {hour} * * Fri"),
            Saturday => format!("0 {minute} {hour} * * Sat"),

            // Day-of-month and day-of-week must both match: the first such weekday.
            Month if day_of_week.is_some() => format!("0 {minute} {hour} 1-7 * {weekday}"),
            Month => format!("0 {minute} {hour} {day_of_month} * *"),
        }
    }
}

impl fmt::Display for ScheduleInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduleInterval {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        INTERVAL_NAMES
            .iter()
            .find(|(_, name)| *name == lower)
            .map(|(interval, _)| *interval)
            .ok_or_else(|| ScheduleError::UnknownInterval(s.to_string()))
    }
}

/// Offsets applied to hourly and larger intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalCronOptions {
    pub minute: u32,
    pub hour: u32,
    pub day_of_month: u32,
    pub day_of_week: Option<DayOfWeek>,
}

impl Default for IntervalCronOptions {
    fn default() -> Self {
        Self {
            minute: 0,
            hour: 0,
            day_of_month: 1,
            day_of_week: None,
        }
    }
}

impl IntervalCronOptions {
    pub fn at_minute(mut self, minute: u32) -> Self {
        self.minute = minute;
        self
    }

    pub fn at_hour(mut self, hour: u32) -> Self {
        self.hour = hour;
        self
    }

    pub fn on_day_of_month(mut self, day: u32) -> Self {
        self.day_of_month = day;
        self
    }

    pub fn on_day_of_week(mut self, day: DayOfWeek) -> Self {
        self.day_of_week = Some(day);
        self
    }
}

/// Parse `"HH:MM"` into `(hour, minute)`.
pub fn parse_time(time: &str) -> Result<(u32, u32), ScheduleError> {
    let format_error = || ScheduleError::TimeFormat(time.to_string());

    let (hour, minute) = time.split_once(':').ok_or_else(format_error)?;
    if hour.len() != 2 || minute.len() != 2 {
        return Err(format_error());
    }
    let hour: u32 = hour.parse().map_err(|_| format_error())?;
    let minute: u32 = minute.parse().map_err(|_| format_error())?;

    if hour > 23 || minute > 59 {
        return Err(ScheduleError::InvalidTime(time.to_string()));
    }
    Ok((hour, minute))
}
