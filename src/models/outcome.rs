//! 阶段、阶段结果与对象状态机
//!
//! 状态只能通过 [`SubjectState::apply`] 沿流水线顺序前进：
//!
//! ```text
//! Pending → ChartComputed → ImagesGenerated → ChaptersGenerated → Assembled → Delivered
//!    ↘ 任一阶段失败 → Failed(stage)（吸收态）
//!    ↘ 上次运行已有产物 → Skipped(stage)，之后继续下一阶段
//! ```

use std::fmt;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::error::StageError;
use crate::models::subject::SubjectId;

/// 流水线阶段（按执行顺序）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Chart,
    Images,
    Chapters,
    Assembly,
    Delivery,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Chart,
        Stage::Images,
        Stage::Chapters,
        Stage::Assembly,
        Stage::Delivery,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Chart => "chart",
            Stage::Images => "images",
            Stage::Chapters => "chapters",
            Stage::Assembly => "assembly",
            Stage::Delivery => "delivery",
        }
    }

    /// 日志用的中文名
    pub fn label(self) -> &'static str {
        match self {
            Stage::Chart => "排盘",
            Stage::Images => "图表渲染",
            Stage::Chapters => "章节生成",
            Stage::Assembly => "文档组装",
            Stage::Delivery => "投递",
        }
    }

    pub fn next(self) -> Option<Stage> {
        let i = self as usize;
        Stage::ALL.get(i + 1).copied()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 阶段状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl StageStatus {
    pub fn is_final(self) -> bool {
        matches!(
            self,
            StageStatus::Succeeded | StageStatus::Failed | StageStatus::Skipped
        )
    }
}

/// 一次阶段执行的记录
///
/// 开始时创建，结束时定稿；重试会产生新的记录（`attempt` 递增），旧记录保留。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub subject: SubjectId,
    pub stage: Stage,
    pub status: StageStatus,
    pub attempt: u32,
    pub started_at: DateTime<Local>,
    pub finished_at: Option<DateTime<Local>>,
    pub error: Option<String>,
    /// 引擎缺陷（而非输入或外部服务问题）
    #[serde(default)]
    pub defect: bool,
    pub artifact: Option<String>,
}

impl StageOutcome {
    /// 阶段开始
    pub fn start(subject: SubjectId, stage: Stage, attempt: u32) -> Self {
        Self {
            subject,
            stage,
            status: StageStatus::Running,
            attempt,
            started_at: Local::now(),
            finished_at: None,
            error: None,
            defect: false,
            artifact: None,
        }
    }

    pub fn succeed(self, artifact: Option<String>) -> Self {
        self.finish(StageStatus::Succeeded, None, artifact)
    }

    pub fn skip(self, artifact: Option<String>) -> Self {
        self.finish(StageStatus::Skipped, None, artifact)
    }

    pub fn fail(mut self, error: &StageError) -> Self {
        self.defect = error.is_defect();
        self.finish(StageStatus::Failed, Some(error.to_string()), None)
    }

    fn finish(
        mut self,
        status: StageStatus,
        error: Option<String>,
        artifact: Option<String>,
    ) -> Self {
        self.status = status;
        self.finished_at = Some(Local::now());
        self.error = error;
        self.artifact = artifact;
        self
    }
}

/// 阶段的最终结论
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Succeeded,
    Skipped,
    Failed,
}

/// 对象在流水线中的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "stage")]
pub enum SubjectState {
    Pending,
    ChartComputed,
    ImagesGenerated,
    ChaptersGenerated,
    Assembled,
    Delivered,
    /// 该阶段沿用了上次运行的产物
    Skipped(Stage),
    /// 在该阶段失败（吸收态）
    Failed(Stage),
}

impl SubjectState {
    /// 最后一个完成（成功或跳过）的阶段
    pub fn reached(self) -> Option<Stage> {
        match self {
            SubjectState::Pending | SubjectState::Failed(_) => None,
            SubjectState::ChartComputed => Some(Stage::Chart),
            SubjectState::ImagesGenerated => Some(Stage::Images),
            SubjectState::ChaptersGenerated => Some(Stage::Chapters),
            SubjectState::Assembled => Some(Stage::Assembly),
            SubjectState::Delivered => Some(Stage::Delivery),
            SubjectState::Skipped(stage) => Some(stage),
        }
    }

    /// 下一个应执行的阶段；终态返回 None
    pub fn next_stage(self) -> Option<Stage> {
        match self {
            SubjectState::Pending => Some(Stage::Chart),
            SubjectState::Failed(_) => None,
            other => other.reached().and_then(Stage::next),
        }
    }

    pub fn is_terminal(self) -> bool {
        self.next_stage().is_none()
    }

    /// 流水线已全部完成
    pub fn is_complete(self) -> bool {
        self.reached() == Some(Stage::Delivery)
    }

    /// 经过校验的状态迁移：只允许对下一个阶段给出结论
    pub fn apply(self, stage: Stage, resolution: Resolution) -> Result<SubjectState, StageError> {
        if self.next_stage() != Some(stage) {
            return Err(StageError::InvalidTransition {
                from: self.to_string(),
                stage: stage.to_string(),
            });
        }
        Ok(match resolution {
            Resolution::Failed => SubjectState::Failed(stage),
            Resolution::Skipped => SubjectState::Skipped(stage),
            Resolution::Succeeded => match stage {
                Stage::Chart => SubjectState::ChartComputed,
                Stage::Images => SubjectState::ImagesGenerated,
                Stage::Chapters => SubjectState::ChaptersGenerated,
                Stage::Assembly => SubjectState::Assembled,
                Stage::Delivery => SubjectState::Delivered,
            },
        })
    }
}

impl fmt::Display for SubjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubjectState::Pending => f.write_str("pending"),
            SubjectState::ChartComputed => f.write_str("chart_computed"),
            SubjectState::ImagesGenerated => f.write_str("images_generated"),
            SubjectState::ChaptersGenerated => f.write_str("chapters_generated"),
            SubjectState::Assembled => f.write_str("assembled"),
            SubjectState::Delivered => f.write_str("delivered"),
            SubjectState::Skipped(stage) => write!(f, "skipped({})", stage),
            SubjectState::Failed(stage) => write!(f, "failed({})", stage),
        }
    }
}
