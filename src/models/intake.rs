//! 输入行（접수 데이터）
//!
//! 输入表的列名可以是韩文（이름、생년월일、시、분、성별、음양력、윤달、이메일、전화번호），
//! 也可以是英文字段名。取值同样接受韩文标签（남/여、양력/음력）。

use std::fmt;
use std::sync::LazyLock;

use phf::phf_map;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::calendar::{CalendarSystem, CivilDate};
use crate::error::IntakeError;
use crate::saju::Sex;

/// 未填写时辰时按正午处理
const DEFAULT_HOUR: u32 = 12;

static DATE_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(\d{4})[-./年]?\s*(\d{1,2})[-./月]?\s*(\d{1,2})日?$").ok());

static SEX_LABELS: phf::Map<&'static str, Sex> = phf_map! {
    "남" => Sex::Male,
    "남성" => Sex::Male,
    "남자" => Sex::Male,
    "male" => Sex::Male,
    "m" => Sex::Male,
    "여" => Sex::Female,
    "여성" => Sex::Female,
    "여자" => Sex::Female,
    "female" => Sex::Female,
    "f" => Sex::Female,
};

static CALENDAR_LABELS: phf::Map<&'static str, CalendarSystem> = phf_map! {
    "양력" => CalendarSystem::Solar,
    "양" => CalendarSystem::Solar,
    "solar" => CalendarSystem::Solar,
    "음력" => CalendarSystem::Lunar,
    "음" => CalendarSystem::Lunar,
    "lunar" => CalendarSystem::Lunar,
};

static FLAG_LABELS: phf::Map<&'static str, bool> = phf_map! {
    "true" => true,
    "1" => true,
    "y" => true,
    "yes" => true,
    "o" => true,
    "윤" => true,
    "윤달" => true,
    "false" => false,
    "0" => false,
    "n" => false,
    "no" => false,
    "x" => false,
    "평" => false,
    "평달" => false,
};

/// 单元格原始值
///
/// CSV 会自动推断类型，TOML 里也可能写成数字或布尔，这里统一接住再转成文本。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawField {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for RawField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawField::Bool(b) => write!(f, "{}", b),
            RawField::Int(i) => write!(f, "{}", i),
            RawField::Float(x) => write!(f, "{}", x),
            RawField::Text(s) => write!(f, "{}", s.trim()),
        }
    }
}

/// 输入表中的一行（尚未校验）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntakeRow {
    #[serde(default, alias = "이름")]
    pub name: Option<RawField>,
    #[serde(default, alias = "생년월일")]
    pub birth_date: Option<RawField>,
    #[serde(default, alias = "시")]
    pub hour: Option<RawField>,
    #[serde(default, alias = "분")]
    pub minute: Option<RawField>,
    #[serde(default, alias = "성별")]
    pub sex: Option<RawField>,
    #[serde(default, alias = "음양력")]
    pub calendar: Option<RawField>,
    #[serde(default, alias = "윤달")]
    pub leap_month: Option<RawField>,
    #[serde(default, alias = "이메일")]
    pub email: Option<RawField>,
    #[serde(default, alias = "전화번호")]
    pub phone: Option<RawField>,
}

/// 校验后的输入记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntakeRecord {
    pub name: String,
    /// 按 `calendar` 解释的出生日期
    pub birth_date: CivilDate,
    pub hour: u32,
    pub minute: u32,
    pub sex: Sex,
    pub calendar: CalendarSystem,
    /// 仅在农历输入时有意义；阳历输入一律为 false
    pub is_leap_month: bool,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl IntakeRecord {
    /// 去重键：姓名 + 出生日期（连同历法和闰月标记）+ 出生时刻
    pub fn dedup_key(&self) -> (String, CalendarSystem, bool, CivilDate, u32, u32) {
        (
            self.name.clone(),
            self.calendar,
            self.is_leap_month,
            self.birth_date,
            self.hour,
            self.minute,
        )
    }
}

impl TryFrom<IntakeRow> for IntakeRecord {
    type Error = IntakeError;

    fn try_from(row: IntakeRow) -> Result<Self, Self::Error> {
        let name = text(&row.name).ok_or(IntakeError::MissingField { field: "이름" })?;
        let date_text =
            text(&row.birth_date).ok_or(IntakeError::MissingField { field: "생년월일" })?;
        let birth_date = parse_date(&date_text)?;

        let hour = match text(&row.hour) {
            Some(v) => parse_bounded("시", &v, 23)?,
            None => DEFAULT_HOUR,
        };
        let minute = match text(&row.minute) {
            Some(v) => parse_bounded("분", &v, 59)?,
            None => 0,
        };

        let sex_text = text(&row.sex).ok_or(IntakeError::MissingField { field: "성별" })?;
        let sex = lookup(&SEX_LABELS, "성별", &sex_text)?;

        let calendar = match text(&row.calendar) {
            Some(v) => lookup(&CALENDAR_LABELS, "음양력", &v)?,
            None => CalendarSystem::Solar,
        };
        let is_leap_month = match text(&row.leap_month) {
            Some(v) => lookup(&FLAG_LABELS, "윤달", &v)?,
            None => false,
        };

        Ok(Self {
            name,
            birth_date,
            hour,
            minute,
            sex,
            calendar,
            // 阳历输入忽略闰月标记
            is_leap_month: is_leap_month && calendar == CalendarSystem::Lunar,
            email: text(&row.email),
            phone: text(&row.phone),
        })
    }
}

fn text(field: &Option<RawField>) -> Option<String> {
    field
        .as_ref()
        .map(|f| f.to_string())
        .filter(|s| !s.is_empty())
}

fn lookup<T: Copy>(
    map: &phf::Map<&'static str, T>,
    field: &'static str,
    value: &str,
) -> Result<T, IntakeError> {
    map.get(value.to_lowercase().as_str())
        .copied()
        .ok_or_else(|| IntakeError::InvalidField {
            field,
            value: value.to_string(),
        })
}

fn parse_bounded(field: &'static str, value: &str, max: u32) -> Result<u32, IntakeError> {
    let invalid = || IntakeError::InvalidField {
        field,
        value: value.to_string(),
    };
    // 表格软件可能把 9 存成 9.0
    let number = value
        .strip_suffix(".0")
        .unwrap_or(value)
        .parse::<u32>()
        .map_err(|_| invalid())?;
    if number > max {
        return Err(invalid());
    }
    Ok(number)
}

/// 解析 `1990-05-15`、`1990.5.15`、`19900515`、`1990년 5월 15일` 等写法
///
/// 只检查格式；日期是否真实存在由历法换算判断（农历日期无法用阳历规则校验）。
pub fn parse_date(value: &str) -> Result<CivilDate, IntakeError> {
    let invalid = || IntakeError::InvalidField {
        field: "생년월일",
        value: value.to_string(),
    };
    let normalized = value
        .trim()
        .replace('년', "年")
        .replace('월', "月")
        .replace('일', "日")
        .replace(' ', "");
    // 带时间的写法（1990-05-15 00:00:00）只取日期部分
    let normalized = normalized
        .split('T')
        .next()
        .unwrap_or_default()
        .to_string();
    let normalized = if normalized.len() > 10 && normalized.contains(':') {
        normalized.chars().take(10).collect()
    } else {
        normalized
    };

    let caps = DATE_PATTERN
        .as_ref()
        .and_then(|re| re.captures(&normalized))
        .ok_or_else(invalid)?;
    let year = caps[1].parse().map_err(|_| invalid())?;
    let month: u32 = caps[2].parse().map_err(|_| invalid())?;
    let day: u32 = caps[3].parse().map_err(|_| invalid())?;
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return Err(invalid());
    }
    Ok(CivilDate::new(year, month, day))
}
