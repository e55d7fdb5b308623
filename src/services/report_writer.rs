//! 报告写入服务 - 业务能力层
//!
//! 输出目录下唯一被多个对象共享的文件都经过这里：
//! - `outcomes.jsonl`: 每条阶段记录追加一行（包括历次重试），跨运行保留
//! - `report_<run_id>.csv` / `.json`: 批次结束时的对账报告，每个对象一行
//!
//! 所有写入都在同一把锁下进行（单写者）。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult, StageError};
use crate::infrastructure::ArtifactStore;
use crate::models::outcome::{Stage, StageOutcome, SubjectState};
use crate::models::subject::SubjectId;

const LEDGER_FILE: &str = "outcomes.jsonl";

/// 对象的最终结论
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectStatus {
    /// 流水线全部完成（含沿用上次产物）
    Succeeded,
    /// 在某个阶段失败
    Failed,
    /// 按重复策略未处理
    Skipped,
    /// 批次被中断时尚未完成
    Interrupted,
}

impl SubjectStatus {
    pub fn from_state(state: SubjectState) -> Self {
        match state {
            SubjectState::Failed(_) => SubjectStatus::Failed,
            s if s.is_complete() => SubjectStatus::Succeeded,
            _ => SubjectStatus::Interrupted,
        }
    }
}

/// 对账报告的一行（字段扁平，便于写 CSV）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    /// 输入中的行号（从 1 开始）
    pub index: usize,
    pub subject: String,
    pub name: String,
    pub final_state: String,
    pub status: SubjectStatus,
    /// 失败所在阶段
    pub failed_stage: Option<Stage>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub document: Option<String>,
    pub share_link: Option<String>,
    pub error: Option<String>,
    /// 重复输入时指向第一次出现的对象
    pub duplicate_of: Option<String>,
    pub defect: bool,
}

impl ReportRow {
    /// 尚未处理的对象
    pub fn new(index: usize, subject: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            index,
            subject: subject.into(),
            name: name.into(),
            final_state: SubjectState::Pending.to_string(),
            status: SubjectStatus::Interrupted,
            failed_stage: None,
            started_at: None,
            finished_at: None,
            document: None,
            share_link: None,
            error: None,
            duplicate_of: None,
            defect: false,
        }
    }

    /// 按最终状态填写状态列
    pub fn settle(&mut self, state: SubjectState) {
        self.final_state = state.to_string();
        self.status = SubjectStatus::from_state(state);
        self.failed_stage = match state {
            SubjectState::Failed(stage) => Some(stage),
            _ => None,
        };
    }
}

/// 批次汇总
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub interrupted: usize,
    pub defects: usize,
    pub elapsed_secs: f64,
}

impl RunSummary {
    pub fn from_rows(run_id: &str, rows: &[ReportRow], elapsed: Duration) -> Self {
        let count = |status| rows.iter().filter(|r| r.status == status).count();
        Self {
            run_id: run_id.to_string(),
            total: rows.len(),
            succeeded: count(SubjectStatus::Succeeded),
            failed: count(SubjectStatus::Failed),
            skipped: count(SubjectStatus::Skipped),
            interrupted: count(SubjectStatus::Interrupted),
            defects: rows.iter().filter(|r| r.defect).count(),
            elapsed_secs: elapsed.as_secs_f64(),
        }
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    summary: &'a RunSummary,
    subjects: &'a [ReportRow],
}

struct Ledger {
    file: File,
    /// 每个 (对象, 阶段) 已有的尝试次数（含历史运行）
    attempts: HashMap<(SubjectId, Stage), u32>,
}

/// 报告写入服务
pub struct ReportWriter {
    dir: PathBuf,
    run_id: String,
    ledger: Mutex<Ledger>,
}

impl ReportWriter {
    /// 打开输出目录下的记录文件，读取历史尝试次数
    ///
    /// # 参数
    /// - `dir`: 输出目录
    /// - `run_id`: 本次运行标识（用于报告文件名）
    pub async fn open(dir: impl Into<PathBuf>, run_id: impl Into<String>) -> AppResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| AppError::report(dir.display().to_string(), e))?;

        let path = dir.join(LEDGER_FILE);
        let attempts = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => count_attempts(&contents),
            Err(_) => HashMap::new(),
        };
        debug!("已读取 {} 组历史阶段记录", attempts.len());

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| AppError::report(path.display().to_string(), e))?;

        Ok(Self {
            dir,
            run_id: run_id.into(),
            ledger: Mutex::new(Ledger { file, attempts }),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.dir.join(LEDGER_FILE)
    }

    pub fn csv_path(&self) -> PathBuf {
        self.dir.join(format!("report_{}.csv", self.run_id))
    }

    pub fn json_path(&self) -> PathBuf {
        self.dir.join(format!("report_{}.json", self.run_id))
    }

    /// 领取下一个尝试序号（历史次数 + 1）
    pub async fn next_attempt(&self, subject: &SubjectId, stage: Stage) -> u32 {
        let mut ledger = self.ledger.lock().await;
        let counter = ledger
            .attempts
            .entry((subject.clone(), stage))
            .or_insert(0);
        *counter += 1;
        *counter
    }

    /// 追加一条阶段记录
    pub async fn record(&self, outcome: &StageOutcome) -> Result<(), StageError> {
        let path = self.ledger_path();
        let mut line = serde_json::to_string(outcome)
            .map_err(|e| StageError::artifact(path.display().to_string(), e))?;
        line.push('\n');

        let mut ledger = self.ledger.lock().await;
        ledger
            .file
            .write_all(line.as_bytes())
            .await
            .map_err(|e| StageError::artifact(path.display().to_string(), e))?;
        ledger
            .file
            .flush()
            .await
            .map_err(|e| StageError::artifact(path.display().to_string(), e))
    }

    /// 写出最终报告（CSV + JSON），返回汇总
    pub async fn write_report(
        &self,
        rows: &[ReportRow],
        elapsed: Duration,
    ) -> AppResult<RunSummary> {
        let summary = RunSummary::from_rows(&self.run_id, rows, elapsed);
        let store = ArtifactStore::new(&self.dir);
        // 持锁写报告，避免和仍在收尾的记录交错
        let _guard = self.ledger.lock().await;

        let csv_path = self.csv_path();
        let csv =
            render_csv(rows).map_err(|e| AppError::report(csv_path.display().to_string(), e))?;
        write_file(&store, &csv_path, csv).await?;

        let json_path = self.json_path();
        let json = serde_json::to_vec_pretty(&JsonReport {
            summary: &summary,
            subjects: rows,
        })
        .map_err(|e| AppError::report(json_path.display().to_string(), e))?;
        write_file(&store, &json_path, json).await?;

        Ok(summary)
    }
}

async fn write_file(store: &ArtifactStore, path: &Path, contents: Vec<u8>) -> AppResult<()> {
    store
        .write_atomic(path, contents)
        .await
        .map_err(|e| AppError::report(path.display().to_string(), e))
}

/// CSV 带 BOM，表格软件打开时韩文不乱码
fn render_csv(rows: &[ReportRow]) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::Writer::from_writer(vec![0xEF, 0xBB, 0xBF]);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    writer.into_inner().map_err(|e| e.into_error().into())
}

/// 统计历史记录中每个 (对象, 阶段) 的尝试次数；损坏的行跳过
fn count_attempts(contents: &str) -> HashMap<(SubjectId, Stage), u32> {
    let mut attempts: HashMap<(SubjectId, Stage), u32> = HashMap::new();
    for (n, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<StageOutcome>(line) {
            Ok(outcome) => {
                let counter = attempts.entry((outcome.subject, outcome.stage)).or_insert(0);
                *counter = (*counter).max(outcome.attempt);
            }
            Err(e) => warn!("⚠️  {} 第 {} 行无法解析，已跳过: {}", LEDGER_FILE, n + 1, e),
        }
    }
    attempts
}
