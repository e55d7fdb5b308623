//! 输入加载
//!
//! 支持 CSV（`.csv`）和 TOML（`.toml`，`[[subjects]]` 数组）。
//! 单行解析失败不影响其他行，只记录在该行的 [`IntakeEntry`] 中。

pub mod csv_loader;
pub mod toml_loader;

use std::path::Path;

use anyhow::{Context, Result};
use tokio::fs;

use crate::error::IntakeError;
use crate::models::intake::{IntakeRecord, IntakeRow, RawField};

pub use csv_loader::parse_csv;
pub use toml_loader::parse_toml;

/// 输入中的一行及其解析结果
#[derive(Debug, Clone)]
pub struct IntakeEntry {
    /// 行号（从 1 开始，不含表头）
    pub row: usize,
    /// 原始姓名，用于给解析失败的行命名
    pub raw_name: Option<String>,
    pub record: Result<IntakeRecord, IntakeError>,
}

impl IntakeEntry {
    pub(crate) fn from_row(row: usize, raw: IntakeRow) -> Self {
        let raw_name = raw
            .name
            .as_ref()
            .map(RawField::to_string)
            .filter(|s| !s.is_empty());
        Self {
            row,
            raw_name,
            record: IntakeRecord::try_from(raw),
        }
    }
}

/// 按扩展名加载输入文件
pub async fn load_intake(path: &Path) -> Result<Vec<IntakeEntry>> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("无法读取输入文件: {}", path.display()))?;

    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
        .unwrap_or_default();

    let entries = match extension.as_str() {
        "csv" => parse_csv(&content),
        "toml" => parse_toml(&content),
        other => anyhow::bail!("不支持的输入格式 '{}': {}", other, path.display()),
    }
    .with_context(|| format!("无法解析输入文件: {}", path.display()))?;

    let invalid = entries.iter().filter(|e| e.record.is_err()).count();
    tracing::info!(
        "成功加载 {} 行输入（其中 {} 行格式有误）",
        entries.len(),
        invalid
    );

    Ok(entries)
}
