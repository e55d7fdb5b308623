//! 阴阳历换算
//!
//! 纯函数，无隐藏状态：同样的输入永远得到同样的输出。

use std::fmt;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::lunar_table::{self, FIRST_LUNAR_YEAR, LAST_LUNAR_YEAR};
use crate::error::CalendarError;

/// 输入日期所用的历法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalendarSystem {
    /// 阳历（公历）
    Solar,
    /// 阴历（农历）
    Lunar,
}

impl CalendarSystem {
    /// 韩文标签
    pub fn label(self) -> &'static str {
        match self {
            CalendarSystem::Solar => "양력",
            CalendarSystem::Lunar => "음력",
        }
    }
}

/// 未经换算的年月日（可能是农历，所以不能直接用 NaiveDate 表示）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CivilDate {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl CivilDate {
    pub fn new(year: i32, month: u32, day: u32) -> Self {
        Self { year, month, day }
    }
}

impl fmt::Display for CivilDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

/// 农历日期
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LunarDate {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub is_leap_month: bool,
}

impl fmt::Display for LunarDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_leap_month {
            write!(f, "{}년 윤{}월 {}일", self.year, self.month, self.day)
        } else {
            write!(f, "{}년 {}월 {}일", self.year, self.month, self.day)
        }
    }
}

/// 统一换算成阳历后的出生时刻，创建后不可变
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedDate {
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
}

impl ResolvedDate {
    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn day(&self) -> u32 {
        self.day
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn minute(&self) -> u32 {
        self.minute
    }

    /// 阳历日期
    pub fn date(&self) -> Result<NaiveDate, CalendarError> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day).ok_or_else(|| {
            CalendarError::Calculation(format!(
                "已换算日期无效: {}-{}-{}",
                self.year, self.month, self.day
            ))
        })
    }

    /// 当地民用时刻（分钟精度）
    pub fn instant(&self) -> Result<NaiveDateTime, CalendarError> {
        self.date()?
            .and_hms_opt(self.hour, self.minute, 0)
            .ok_or_else(|| {
                CalendarError::Calculation(format!("已换算时刻无效: {}:{}", self.hour, self.minute))
            })
    }

    fn from_parts(date: NaiveDate, hour: u32, minute: u32) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
            day: date.day(),
            hour,
            minute,
        }
    }
}

impl fmt::Display for ResolvedDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute
        )
    }
}

/// 支持的最早阳历日期（农历 1900 年正月初一）
pub fn first_supported_solar() -> NaiveDate {
    lunar_table::lunar_epoch()
}

/// 支持的最晚阳历日期（农历 2100 年最后一天）
pub fn last_supported_solar() -> NaiveDate {
    let total: i64 = (FIRST_LUNAR_YEAR..=LAST_LUNAR_YEAR)
        .map(|y| lunar_table::year_days(y) as i64)
        .sum();
    lunar_table::lunar_epoch() + Duration::days(total - 1)
}

/// 把输入日期换算成阳历
///
/// # 参数
/// - `date`: 输入的年月日
/// - `hour` / `minute`: 出生时刻（0–23 / 0–59）
/// - `calendar`: 输入日期所用历法
/// - `is_leap_month`: 是否闰月（仅对农历有意义，阳历时忽略）
///
/// # 错误
/// - `InvalidDate`: 日期在对照表中不存在，或该月没有闰月却标记了闰月
/// - `UnsupportedRange`: 日期超出对照表覆盖范围
pub fn to_solar(
    date: CivilDate,
    hour: u32,
    minute: u32,
    calendar: CalendarSystem,
    is_leap_month: bool,
) -> Result<ResolvedDate, CalendarError> {
    if hour > 23 || minute > 59 {
        return Err(CalendarError::InvalidDate(format!(
            "时刻无效: {:02}:{:02}",
            hour, minute
        )));
    }

    let solar = match calendar {
        CalendarSystem::Solar => {
            let solar = NaiveDate::from_ymd_opt(date.year, date.month, date.day)
                .ok_or_else(|| CalendarError::InvalidDate(format!("阳历日期不存在: {}", date)))?;
            check_solar_range(solar)?;
            solar
        }
        CalendarSystem::Lunar => lunar_to_solar(date, is_leap_month)?,
    };

    Ok(ResolvedDate::from_parts(solar, hour, minute))
}

fn check_solar_range(date: NaiveDate) -> Result<(), CalendarError> {
    let first = first_supported_solar();
    let last = last_supported_solar();
    if date < first || date > last {
        return Err(CalendarError::UnsupportedRange(format!(
            "阳历 {} 不在 {} ~ {} 之间",
            date, first, last
        )));
    }
    Ok(())
}

fn lunar_to_solar(date: CivilDate, is_leap_month: bool) -> Result<NaiveDate, CalendarError> {
    if !lunar_table::contains_year(date.year) {
        return Err(CalendarError::UnsupportedRange(format!(
            "农历 {} 年不在 {} ~ {} 之间",
            date.year, FIRST_LUNAR_YEAR, LAST_LUNAR_YEAR
        )));
    }
    if !(1..=12).contains(&date.month) {
        return Err(CalendarError::InvalidDate(format!("农历月份无效: {}", date)));
    }

    let leap = lunar_table::leap_month(date.year);
    if is_leap_month && leap != Some(date.month) {
        return Err(CalendarError::InvalidDate(format!(
            "农历 {} 年没有闰{}月",
            date.year, date.month
        )));
    }

    let days_in_month = if is_leap_month {
        lunar_table::leap_month_days(date.year)
    } else {
        lunar_table::month_days(date.year, date.month)
    };
    if date.day == 0 || date.day > days_in_month {
        return Err(CalendarError::InvalidDate(format!(
            "农历 {}{} 只有 {} 天",
            date,
            if is_leap_month { "（闰月）" } else { "" },
            days_in_month
        )));
    }

    let mut offset: i64 = (FIRST_LUNAR_YEAR..date.year)
        .map(|y| lunar_table::year_days(y) as i64)
        .sum();
    offset += (1..date.month)
        .map(|m| lunar_table::month_days(date.year, m) as i64)
        .sum::<i64>();
    if matches!(leap, Some(l) if l < date.month) {
        offset += lunar_table::leap_month_days(date.year) as i64;
    }
    if is_leap_month {
        // 闰月紧跟在同名普通月之后
        offset += lunar_table::month_days(date.year, date.month) as i64;
    }
    offset += date.day as i64 - 1;

    Ok(lunar_table::lunar_epoch() + Duration::days(offset))
}

/// 阳历换算成农历
pub fn to_lunar(solar: NaiveDate) -> Result<LunarDate, CalendarError> {
    check_solar_range(solar)?;

    let mut offset = (solar - lunar_table::lunar_epoch()).num_days();
    let mut year = FIRST_LUNAR_YEAR;
    while offset >= lunar_table::year_days(year) as i64 {
        offset -= lunar_table::year_days(year) as i64;
        year += 1;
    }

    let leap = lunar_table::leap_month(year);
    for month in 1..=12 {
        let days = lunar_table::month_days(year, month) as i64;
        if offset < days {
            return Ok(lunar_date(year, month, offset, false));
        }
        offset -= days;

        if leap == Some(month) {
            let days = lunar_table::leap_month_days(year) as i64;
            if offset < days {
                return Ok(lunar_date(year, month, offset, true));
            }
            offset -= days;
        }
    }

    Err(CalendarError::Calculation(format!(
        "阳历 {} 无法落入农历 {} 年",
        solar, year
    )))
}

fn lunar_date(year: i32, month: u32, offset: i64, is_leap_month: bool) -> LunarDate {
    LunarDate {
        year,
        month,
        day: offset as u32 + 1,
        is_leap_month,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn lunar(y: i32, m: u32, d: u32, leap: bool) -> Result<ResolvedDate, CalendarError> {
        to_solar(CivilDate::new(y, m, d), 12, 0, CalendarSystem::Lunar, leap)
    }

    #[test]
    fn lunar_new_year_dates() {
        assert_eq!(lunar(2024, 1, 1, false).unwrap().date().unwrap(), ymd(2024, 2, 10));
        assert_eq!(lunar(2000, 1, 1, false).unwrap().date().unwrap(), ymd(2000, 2, 5));
        assert_eq!(lunar(1990, 1, 1, false).unwrap().date().unwrap(), ymd(1990, 1, 27));
        assert_eq!(lunar(1900, 1, 1, false).unwrap().date().unwrap(), ymd(1900, 1, 31));
    }

    #[test]
    fn leap_month_follows_its_regular_month() {
        assert_eq!(lunar(2020, 4, 1, false).unwrap().date().unwrap(), ymd(2020, 4, 23));
        assert_eq!(lunar(2020, 4, 1, true).unwrap().date().unwrap(), ymd(2020, 5, 23));
        assert_eq!(lunar(2020, 5, 1, false).unwrap().date().unwrap(), ymd(2020, 6, 21));
        assert_eq!(lunar(1990, 5, 1, true).unwrap().date().unwrap(), ymd(1990, 6, 23));
    }

    #[test]
    fn leap_flag_on_month_without_leap_is_invalid() {
        assert!(matches!(
            lunar(2024, 4, 1, true),
            Err(CalendarError::InvalidDate(_))
        ));
        assert!(matches!(
            lunar(2020, 5, 1, true),
            Err(CalendarError::InvalidDate(_))
        ));
    }

    #[test]
    fn nonexistent_lunar_days_are_invalid() {
        // 2024 年正月只有 29 天
        assert!(matches!(lunar(2024, 1, 30, false), Err(CalendarError::InvalidDate(_))));
        // 2020 年闰四月只有 29 天
        assert!(matches!(lunar(2020, 4, 30, true), Err(CalendarError::InvalidDate(_))));
        assert!(matches!(lunar(2020, 13, 1, false), Err(CalendarError::InvalidDate(_))));
        assert!(matches!(lunar(2020, 1, 0, false), Err(CalendarError::InvalidDate(_))));
    }

    #[test]
    fn out_of_table_range_is_unsupported() {
        assert!(matches!(lunar(1899, 1, 1, false), Err(CalendarError::UnsupportedRange(_))));
        assert!(matches!(lunar(2101, 1, 1, false), Err(CalendarError::UnsupportedRange(_))));
        let solar = to_solar(CivilDate::new(1900, 1, 30), 0, 0, CalendarSystem::Solar, false);
        assert!(matches!(solar, Err(CalendarError::UnsupportedRange(_))));
        assert_eq!(last_supported_solar(), ymd(2101, 1, 28));
    }

    #[test]
    fn solar_input_ignores_leap_flag() {
        let resolved =
            to_solar(CivilDate::new(1990, 5, 15), 14, 30, CalendarSystem::Solar, true).unwrap();
        assert_eq!(resolved.to_string(), "1990-05-15 14:30");
    }

    #[test]
    fn invalid_solar_date_and_time() {
        assert!(matches!(
            to_solar(CivilDate::new(2023, 2, 29), 0, 0, CalendarSystem::Solar, false),
            Err(CalendarError::InvalidDate(_))
        ));
        assert!(matches!(
            to_solar(CivilDate::new(2023, 2, 1), 24, 0, CalendarSystem::Solar, false),
            Err(CalendarError::InvalidDate(_))
        ));
    }

    #[test]
    fn solar_to_lunar() {
        let l = to_lunar(ymd(1990, 5, 15)).unwrap();
        assert_eq!((l.year, l.month, l.day, l.is_leap_month), (1990, 4, 21, false));
        let l = to_lunar(ymd(2020, 6, 1)).unwrap();
        assert_eq!((l.year, l.month, l.day, l.is_leap_month), (2020, 4, 10, true));
        assert_eq!(l.to_string(), "2020년 윤4월 10일");
        let l = to_lunar(ymd(2024, 2, 9)).unwrap();
        assert_eq!((l.year, l.month, l.day), (2023, 12, 30));
    }

    #[test]
    fn lunar_solar_round_trip() {
        let mut day = ymd(2019, 12, 1);
        while day < ymd(2021, 3, 1) {
            let l = to_lunar(day).unwrap();
            let back = lunar(l.year, l.month, l.day, l.is_leap_month).unwrap();
            assert_eq!(back.date().unwrap(), day);
            day += Duration::days(1);
        }
    }
}
