//! # Saju Report
//!
//! 批量生成四柱命盘报告的 Rust 应用程序
//!
//! ## 架构设计
//!
//! 排盘引擎是纯计算（同步、无 I/O）；其余部分采用严格的四层架构：
//!
//! ### 排盘引擎
//! - `calendar/` - 阴阳历换算（版本化对照表）、节气表
//! - `saju/` - 干支、四柱、大运、岁运 / 月运、五行统计
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源，只暴露能力
//! - `ArtifactStore` - 输出目录的唯一读写入口（原子写入）
//! - `HtmlPrinter` - 唯一的浏览器持有者，HTML → PNG / PDF
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单个对象
//! - `HtmlChartRenderer` / `LlmService` / `HtmlDocumentAssembler` - 图表、章节、文档
//! - `HttpUploadChannel` / `MailGatewayChannel` - 投递
//! - `ReportWriter` - 阶段记录与对账报告（单写者）
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个对象"的完整处理流程
//! - `SubjectFlow` - 五阶段状态机（排盘 → 图表 → 章节 → 文档 → 投递），支持断点续跑
//! - `ChapterPool` - 章节并发生成、限流退避
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_processor` - 批量处理器，管理资源、并发和中断

pub mod browser;
pub mod calendar;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod orchestrator;
pub mod saju;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::{Config, DuplicatePolicy};
pub use error::{AppError, AppResult, CalendarError, StageError};
pub use models::{IntakeRecord, SubjectId, SubjectRecord};
pub use orchestrator::{App, BatchOrchestrator};
pub use saju::{FourPillars, LuckCycle, SexagenaryEngine};
pub use workflow::{Collaborators, SubjectFlow};
