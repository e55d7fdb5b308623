//! 阴阳历对照表（1900–2100）
//!
//! 每一年一个编码：
//! - bit 0..=3: 闰月月份（0 表示无闰月）
//! - bit 4..=15: 正月到十二月的大小月（bit 15 为正月，置位表示 30 天）
//! - bit 16: 闰月为大月（30 天）
//!
//! 农历 1900 年正月初一对应公历 1900-01-31。

use chrono::NaiveDate;

use crate::error::CalendarError;

/// 对照表版本
pub const LUNAR_TABLE_VERSION: &str = "lunar-1900-2100/v1";

/// 表中第一年
pub const FIRST_LUNAR_YEAR: i32 = 1900;

/// 表中最后一年
pub const LAST_LUNAR_YEAR: i32 = 2100;

#[rustfmt::skip]
const LUNAR_INFO: [u32; 201] = [
    0x04bd8, 0x04ae0, 0x0a570, 0x054d5, 0x0d260, 0x0d950, 0x16554, 0x056a0, 0x09ad0, 0x055d2, // 1900
    0x04ae0, 0x0a5b6, 0x0a4d0, 0x0d250, 0x1d255, 0x0b540, 0x0d6a0, 0x0ada2, 0x095b0, 0x14977, // 1910
    0x04970, 0x0a4b0, 0x0b4b5, 0x06a50, 0x06d40, 0x1ab54, 0x02b60, 0x09570, 0x052f2, 0x04970, // 1920
    0x06566, 0x0d4a0, 0x0ea50, 0x16a95, 0x05ad0, 0x02b60, 0x186e3, 0x092e0, 0x1c8d7, 0x0c950, // 1930
    0x0d4a0, 0x1d8a6, 0x0b550, 0x056a0, 0x1a5b4, 0x025d0, 0x092d0, 0x0d2b2, 0x0a950, 0x0b557, // 1940
    0x06ca0, 0x0b550, 0x15355, 0x04da0, 0x0a5b0, 0x14573, 0x052b0, 0x0a9a8, 0x0e950, 0x06aa0, // 1950
    0x0aea6, 0x0ab50, 0x04b60, 0x0aae4, 0x0a570, 0x05260, 0x0f263, 0x0d950, 0x05b57, 0x056a0, // 1960
    0x096d0, 0x04dd5, 0x04ad0, 0x0a4d0, 0x0d4d4, 0x0d250, 0x0d558, 0x0b540, 0x0b6a0, 0x195a6, // 1970
    0x095b0, 0x049b0, 0x0a974, 0x0a4b0, 0x0b27a, 0x06a50, 0x06d40, 0x0af46, 0x0ab60, 0x09570, // 1980
    0x04af5, 0x04970, 0x064b0, 0x074a3, 0x0ea50, 0x06b58, 0x05ac0, 0x0ab60, 0x096d5, 0x092e0, // 1990
    0x0c960, 0x0d954, 0x0d4a0, 0x0da50, 0x07552, 0x056a0, 0x0abb7, 0x025d0, 0x092d0, 0x0cab5, // 2000
    0x0a950, 0x0b4a0, 0x0baa4, 0x0ad50, 0x055d9, 0x04ba0, 0x0a5b0, 0x15176, 0x052b0, 0x0a930, // 2010
    0x07954, 0x06aa0, 0x0ad50, 0x05b52, 0x04b60, 0x0a6e6, 0x0a4e0, 0x0d260, 0x0ea65, 0x0d530, // 2020
    0x05aa0, 0x076a3, 0x096d0, 0x04afb, 0x04ad0, 0x0a4d0, 0x1d0b6, 0x0d250, 0x0d520, 0x0dd45, // 2030
    0x0b5a0, 0x056d0, 0x055b2, 0x049b0, 0x0a577, 0x0a4b0, 0x0aa50, 0x1b255, 0x06d20, 0x0ada0, // 2040
    0x14b63, 0x09370, 0x049f8, 0x04970, 0x064b0, 0x168a6, 0x0ea50, 0x06b20, 0x1a6c4, 0x0aae0, // 2050
    0x092e0, 0x0d2e3, 0x0c960, 0x0d557, 0x0d4a0, 0x0da50, 0x05d55, 0x056a0, 0x0a6d0, 0x055d4, // 2060
    0x052d0, 0x0a9b8, 0x0a950, 0x0b4a0, 0x0b6a6, 0x0ad50, 0x055a0, 0x0aba4, 0x0a5b0, 0x052b0, // 2070
    0x0b273, 0x06930, 0x07337, 0x06aa0, 0x0ad50, 0x14b55, 0x04b60, 0x0a570, 0x054e4, 0x0d160, // 2080
    0x0e968, 0x0d520, 0x0daa0, 0x16aa6, 0x056d0, 0x04ae0, 0x0a9d4, 0x0a2d0, 0x0d150, 0x0f252, // 2090
    0x0d520,                                                                                   // 2100
];

/// 农历 1900 年正月初一对应的公历日期
pub fn lunar_epoch() -> NaiveDate {
    // 常量日期，不会失败
    NaiveDate::from_ymd_opt(1900, 1, 31).unwrap_or(NaiveDate::MIN)
}

/// 年份是否在表覆盖范围内
pub fn contains_year(year: i32) -> bool {
    (FIRST_LUNAR_YEAR..=LAST_LUNAR_YEAR).contains(&year)
}

fn info(year: i32) -> u32 {
    LUNAR_INFO[(year - FIRST_LUNAR_YEAR) as usize]
}

/// 该年闰几月（无闰月返回 None）
///
/// 调用方需保证年份在表内
pub fn leap_month(year: i32) -> Option<u32> {
    leap_of(info(year))
}

/// 该年闰月天数（无闰月为 0）
pub fn leap_month_days(year: i32) -> u32 {
    leap_days_of(info(year))
}

/// 该年普通 `month` 月的天数
pub fn month_days(year: i32, month: u32) -> u32 {
    month_days_of(info(year), month)
}

/// 该年总天数（含闰月）
pub fn year_days(year: i32) -> u32 {
    year_days_of(info(year))
}

fn leap_of(info: u32) -> Option<u32> {
    match info & 0xf {
        0 => None,
        m => Some(m),
    }
}

fn leap_days_of(info: u32) -> u32 {
    match (leap_of(info), info & 0x10000 != 0) {
        (None, _) => 0,
        (Some(_), true) => 30,
        (Some(_), false) => 29,
    }
}

fn month_days_of(info: u32, month: u32) -> u32 {
    if info & (0x10000 >> month) != 0 {
        30
    } else {
        29
    }
}

fn year_days_of(info: u32) -> u32 {
    (1..=12).map(|m| month_days_of(info, m)).sum::<u32>() + leap_days_of(info)
}

/// 加载时的范围校验：每年天数必须落在 353..=385 之间，闰月编号必须为 1..=12
pub fn validate() -> Result<(), CalendarError> {
    validate_table(FIRST_LUNAR_YEAR, &LUNAR_INFO)
}

fn validate_table(first_year: i32, table: &[u32]) -> Result<(), CalendarError> {
    for (year, &info) in (first_year..).zip(table) {
        let days = year_days_of(info);
        if !(353..=385).contains(&days) {
            return Err(CalendarError::Calculation(format!(
                "农历 {} 年天数异常: {}",
                year, days
            )));
        }
        if info & 0xf > 12 {
            return Err(CalendarError::Calculation(format!("农历 {} 年闰月编号异常", year)));
        }
        if leap_of(info).is_some() != (days > 355) {
            return Err(CalendarError::Calculation(format!(
                "农历 {} 年闰月与天数不一致: {}",
                year, days
            )));
        }
    }
    Ok(())
}
