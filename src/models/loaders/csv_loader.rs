use anyhow::{Context, Result};

use super::IntakeEntry;
use crate::error::IntakeError;
use crate::models::intake::IntakeRow;

/// 解析 CSV 输入（第一行为表头，兼容 Excel 导出的 UTF-8 BOM）
pub fn parse_csv(content: &str) -> Result<Vec<IntakeEntry>> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers = reader.headers().context("无法读取 CSV 表头")?.clone();
    tracing::debug!("CSV 表头: {:?}", headers);

    let mut entries = Vec::new();
    for (i, result) in reader.deserialize::<IntakeRow>().enumerate() {
        let row = i + 1;
        match result {
            Ok(raw) => entries.push(IntakeEntry::from_row(row, raw)),
            Err(e) => {
                tracing::warn!("第 {} 行无法解析: {}", row, e);
                entries.push(IntakeEntry {
                    row,
                    raw_name: None,
                    record: Err(IntakeError::InvalidField {
                        field: "행",
                        value: e.to_string(),
                    }),
                });
            }
        }
    }

    Ok(entries)
}
