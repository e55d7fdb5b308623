//! 业务能力层（Services）
//!
//! 每个外部协作方一个 trait，流程层只依赖 trait：
//!
//! - `ChartRenderer` - 命盘 → 图表 PNG
//! - `ChapterGenerator` - 章节模板 + 命盘 → 正文
//! - `DocumentAssembler` - 章节 + 图表 → PDF
//! - `DeliveryChannel` - 成品投递（云端上传、邮件）
//!
//! 能力层只处理单个对象，不关心流程顺序，也不直接写输出目录：
//! 返回的字节由流程层通过 `ArtifactStore` 原子写入。

pub mod chart_renderer;
pub mod delivery;
pub mod document_assembler;
pub mod llm_service;
pub mod report_writer;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::error::StageError;
use crate::models::chapter::ChapterTemplate;
use crate::models::subject::{SubjectId, SubjectRecord};

pub use chart_renderer::HtmlChartRenderer;
pub use delivery::{HttpUploadChannel, MailGatewayChannel};
pub use document_assembler::HtmlDocumentAssembler;
pub use llm_service::{CostEstimate, LlmService};
pub use report_writer::{ReportWriter, RunSummary};

/// 渲染好的一张图
#[derive(Debug, Clone)]
pub struct RenderedImage {
    /// 图表种类（`four_pillars`、`luck_cycle` …）
    pub kind: String,
    pub file_name: String,
    pub png: Vec<u8>,
}

/// 图表清单（`images/manifest.json`）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageManifest {
    pub images: Vec<ImageEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageEntry {
    pub kind: String,
    pub path: PathBuf,
}

/// 图表渲染
#[async_trait]
pub trait ChartRenderer: Send + Sync {
    /// 渲染全部图表；同样的命盘重复渲染结果一致
    ///
    /// # 参数
    /// - `work_dir`: 可写的工作目录（放中间 HTML）
    async fn render(
        &self,
        subject: &SubjectRecord,
        work_dir: &Path,
    ) -> Result<Vec<RenderedImage>, StageError>;
}

/// 章节生成
#[async_trait]
pub trait ChapterGenerator: Send + Sync {
    /// 生成一个章节；限流返回 `RateLimited`（可重试），其余返回 `Content`
    async fn generate_chapter(
        &self,
        chapter: &ChapterTemplate,
        subject: &SubjectRecord,
    ) -> Result<String, StageError>;
}

/// 文档组装的输入
pub struct AssemblyInput<'a> {
    pub subject: &'a SubjectRecord,
    /// 按章节顺序排列
    pub chapters: &'a [(ChapterTemplate, String)],
    pub images: &'a ImageManifest,
    pub work_dir: &'a Path,
}

/// 文档组装
#[async_trait]
pub trait DocumentAssembler: Send + Sync {
    /// 返回 PDF 字节
    async fn assemble(&self, input: AssemblyInput<'_>) -> Result<Vec<u8>, StageError>;
}

/// 投递请求
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    pub subject: SubjectId,
    pub name: String,
    pub email: Option<String>,
    pub document: PathBuf,
    /// 前一个渠道（上传）返回的分享链接
    pub share_link: Option<String>,
}

/// 单个渠道的投递回执
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryConfirmation {
    pub channel: String,
    pub confirmation: String,
    pub link: Option<String>,
    pub delivered_at: DateTime<Local>,
}

/// 投递回执文件（`delivery.json`）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub confirmations: Vec<DeliveryConfirmation>,
}

impl DeliveryReceipt {
    pub fn confirmation(&self, channel: &str) -> Option<&DeliveryConfirmation> {
        self.confirmations.iter().find(|c| c.channel == channel)
    }

    /// 最近一个带链接的回执
    pub fn share_link(&self) -> Option<&str> {
        self.confirmations
            .iter()
            .rev()
            .find_map(|c| c.link.as_deref())
    }
}

/// 投递渠道
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    fn name(&self) -> &'static str;

    /// 该请求是否需要这个渠道（例如没有邮箱就不发邮件）
    fn applies_to(&self, _request: &DeliveryRequest) -> bool {
        true
    }

    async fn deliver(&self, request: &DeliveryRequest) -> Result<DeliveryConfirmation, StageError>;
}
