use anyhow::{Context, Result};
use serde::Deserialize;

use super::IntakeEntry;
use crate::models::intake::IntakeRow;

#[derive(Debug, Deserialize)]
struct SubjectsFile {
    #[serde(default)]
    subjects: Vec<IntakeRow>,
}

/// 解析 TOML 输入
///
/// 韩文字段名在 TOML 里必须加引号。
///
/// ```toml
/// [[subjects]]
/// "이름" = "홍길동"
/// "생년월일" = "1990-05-15"
/// "시" = 14
/// "분" = 30
/// "성별" = "남성"
/// "음양력" = "양력"
/// ```
pub fn parse_toml(content: &str) -> Result<Vec<IntakeEntry>> {
    let file: SubjectsFile = toml::from_str(content).context("TOML 格式错误")?;

    Ok(file
        .subjects
        .into_iter()
        .enumerate()
        .map(|(i, raw)| IntakeEntry::from_row(i + 1, raw))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::CalendarSystem;

    #[test]
    fn subjects_array_with_mixed_value_types() {
        let content = r#"
[[subjects]]
"이름" = "홍길동"
"생년월일" = "1990-05-15"
"시" = 14
"분" = 30
"성별" = "남성"
"음양력" = "양력"
"이메일" = "hong@example.com"

[[subjects]]
name = "B"
birth_date = "2020-04-01"
sex = "female"
calendar = "lunar"
leap_month = true
"#;
        let entries = parse_toml(content).unwrap();
        assert_eq!(entries.len(), 2);

        let first = entries[0].record.as_ref().unwrap();
        assert_eq!((first.hour, first.minute), (14, 30));

        let second = entries[1].record.as_ref().unwrap();
        assert_eq!(second.calendar, CalendarSystem::Lunar);
        assert!(second.is_leap_month);
        assert_eq!(second.hour, 12);
    }

    #[test]
    fn empty_file_has_no_subjects() {
        assert!(parse_toml("").unwrap().is_empty());
    }
}
