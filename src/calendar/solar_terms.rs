//! 二十四节气
//!
//! 节气时刻来自内嵌的版本化数据表（`data/solar_terms.txt`），加载时做范围和单调性校验。
//! 换算方式通过 [`SolarTermSource`] 抽象，可以替换成其他实现（例如测试用的固定表）。

use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};

use crate::error::CalendarError;

const EMBEDDED_TABLE: &str = include_str!("../../data/solar_terms.txt");

/// 二十四节气（从小寒开始，每个相差 15°）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SolarTerm {
    Xiaohan,
    Dahan,
    Lichun,
    Yushui,
    Jingzhe,
    Chunfen,
    Qingming,
    Guyu,
    Lixia,
    Xiaoman,
    Mangzhong,
    Xiazhi,
    Xiaoshu,
    Dashu,
    Liqiu,
    Chushu,
    Bailu,
    Qiufen,
    Hanlu,
    Shuangjiang,
    Lidong,
    Xiaoxue,
    Daxue,
    Dongzhi,
}

impl SolarTerm {
    pub const ALL: [SolarTerm; 24] = [
        SolarTerm::Xiaohan,
        SolarTerm::Dahan,
        SolarTerm::Lichun,
        SolarTerm::Yushui,
        SolarTerm::Jingzhe,
        SolarTerm::Chunfen,
        SolarTerm::Qingming,
        SolarTerm::Guyu,
        SolarTerm::Lixia,
        SolarTerm::Xiaoman,
        SolarTerm::Mangzhong,
        SolarTerm::Xiazhi,
        SolarTerm::Xiaoshu,
        SolarTerm::Dashu,
        SolarTerm::Liqiu,
        SolarTerm::Chushu,
        SolarTerm::Bailu,
        SolarTerm::Qiufen,
        SolarTerm::Hanlu,
        SolarTerm::Shuangjiang,
        SolarTerm::Lidong,
        SolarTerm::Xiaoxue,
        SolarTerm::Daxue,
        SolarTerm::Dongzhi,
    ];

    /// 在一年中的序号（小寒 = 0）
    pub fn index(self) -> usize {
        self as usize
    }

    /// 是否为"节"（每个节气月的起点）
    pub fn opens_month(self) -> bool {
        self.index() % 2 == 0
    }

    /// 以该"节"开始的月支序号（子 = 0）；"气"返回 None
    ///
    /// 小寒开丑月，立春开寅月，……，大雪开子月
    pub fn month_branch(self) -> Option<usize> {
        self.opens_month().then(|| (self.index() / 2 + 1) % 12)
    }

    /// 韩文名称
    pub fn korean_name(self) -> &'static str {
        const NAMES: [&str; 24] = [
            "소한", "대한", "입춘", "우수", "경칩", "춘분", "청명", "곡우", "입하", "소만", "망종",
            "하지", "소서", "대서", "입추", "처서", "백로", "추분", "한로", "상강", "입동", "소설",
            "대설", "동지",
        ];
        NAMES[self.index()]
    }

    /// 一年中的十二个"节"
    pub fn month_openings() -> impl DoubleEndedIterator<Item = SolarTerm> {
        SolarTerm::ALL.into_iter().filter(|t| t.opens_month())
    }
}

/// 节气时刻来源
///
/// 返回的时刻均为当地民用时间（分钟精度）。
pub trait SolarTermSource: Send + Sync {
    /// 某年某节气的时刻
    fn term_instant(&self, year: i32, term: SolarTerm) -> Result<NaiveDateTime, CalendarError>;

    /// 数据覆盖的年份范围
    fn year_range(&self) -> RangeInclusive<i32>;

    /// 年柱交界（立春）
    fn solar_term_boundary(&self, year: i32) -> Result<NaiveDateTime, CalendarError> {
        self.term_instant(year, SolarTerm::Lichun)
    }
}

/// 内嵌节气表
#[derive(Debug, Clone)]
pub struct TabulatedSolarTerms {
    version: String,
    /// 年份 → 24 个节气距当年 1 月 1 日 00:00 UTC 的分钟数
    rows: BTreeMap<i32, [i64; 24]>,
    utc_offset_minutes: i64,
}

impl TabulatedSolarTerms {
    /// 加载内嵌数据表
    ///
    /// # 参数
    /// - `utc_offset_minutes`: 当地时区相对 UTC 的偏移（韩国标准时间为 +540）
    pub fn embedded(utc_offset_minutes: i32) -> Result<Self, CalendarError> {
        Self::parse(EMBEDDED_TABLE, utc_offset_minutes)
    }

    /// 解析数据表文本并校验
    pub fn parse(text: &str, utc_offset_minutes: i32) -> Result<Self, CalendarError> {
        let mut version = None;
        let mut rows = BTreeMap::new();

        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(v) = line.strip_prefix("version ") {
                version = Some(v.trim().to_string());
                continue;
            }

            let bad_line = || CalendarError::Calculation(format!("节气表第 {} 行格式错误", line_no + 1));
            let mut fields = line.split_whitespace();
            let year: i32 = fields.next().and_then(|v| v.parse().ok()).ok_or_else(bad_line)?;
            let values = fields
                .map(|v| v.parse::<i64>().map_err(|_| bad_line()))
                .collect::<Result<Vec<_>, _>>()?;
            let minutes: [i64; 24] = values.try_into().map_err(|_| bad_line())?;

            validate_row(year, &minutes)?;
            rows.insert(year, minutes);
        }

        let version = version
            .ok_or_else(|| CalendarError::Calculation("节气表缺少版本号".to_string()))?;
        let (first, last) = match (rows.keys().next(), rows.keys().next_back()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => return Err(CalendarError::Calculation("节气表为空".to_string())),
        };
        if rows.len() != (last - first + 1) as usize {
            return Err(CalendarError::Calculation(format!(
                "节气表年份不连续: {} ~ {} 只有 {} 行",
                first,
                last,
                rows.len()
            )));
        }

        Ok(Self {
            version,
            rows,
            utc_offset_minutes: utc_offset_minutes as i64,
        })
    }

    /// 数据表版本
    pub fn version(&self) -> &str {
        &self.version
    }
}

fn validate_row(year: i32, minutes: &[i64; 24]) -> Result<(), CalendarError> {
    const YEAR_MINUTES: i64 = 366 * 24 * 60;
    if minutes.windows(2).any(|w| w[0] >= w[1]) {
        return Err(CalendarError::Calculation(format!("{} 年节气时刻不是递增的", year)));
    }
    if minutes[0] < 0 || minutes[23] >= YEAR_MINUTES {
        return Err(CalendarError::Calculation(format!("{} 年节气时刻超出当年范围", year)));
    }
    // 小寒总在 1 月上旬
    if minutes[0] > 10 * 24 * 60 {
        return Err(CalendarError::Calculation(format!("{} 年小寒时刻异常", year)));
    }
    Ok(())
}

impl SolarTermSource for TabulatedSolarTerms {
    fn term_instant(&self, year: i32, term: SolarTerm) -> Result<NaiveDateTime, CalendarError> {
        let row = self.rows.get(&year).ok_or_else(|| {
            CalendarError::UnsupportedRange(format!("节气表不包含 {} 年", year))
        })?;
        let start = NaiveDate::from_ymd_opt(year, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .ok_or_else(|| CalendarError::Calculation(format!("无法构造 {} 年 1 月 1 日", year)))?;
        Ok(start + Duration::minutes(row[term.index()] + self.utc_offset_minutes))
    }

    fn year_range(&self) -> RangeInclusive<i32> {
        let first = self.rows.keys().next().copied().unwrap_or(0);
        let last = self.rows.keys().next_back().copied().unwrap_or(-1);
        first..=last
    }
}

/// 不晚于 `instant` 的最近一个"节"（交界时刻本身算作新月份的开始）
pub fn month_opening_at_or_before(
    source: &dyn SolarTermSource,
    instant: NaiveDateTime,
) -> Result<(SolarTerm, NaiveDateTime), CalendarError> {
    for year in [instant.year(), instant.year() - 1] {
        if !source.year_range().contains(&year) {
            continue;
        }
        for term in SolarTerm::month_openings().rev() {
            let at = source.term_instant(year, term)?;
            if at <= instant {
                return Ok((term, at));
            }
        }
    }
    Err(CalendarError::UnsupportedRange(format!(
        "{} 之前没有可用的节气数据",
        instant
    )))
}

/// 严格晚于 `instant` 的下一个"节"
pub fn month_opening_after(
    source: &dyn SolarTermSource,
    instant: NaiveDateTime,
) -> Result<(SolarTerm, NaiveDateTime), CalendarError> {
    for year in [instant.year(), instant.year() + 1] {
        if !source.year_range().contains(&year) {
            continue;
        }
        for term in SolarTerm::month_openings() {
            let at = source.term_instant(year, term)?;
            if at > instant {
                return Ok((term, at));
            }
        }
    }
    Err(CalendarError::UnsupportedRange(format!(
        "{} 之后没有可用的节气数据",
        instant
    )))
}
