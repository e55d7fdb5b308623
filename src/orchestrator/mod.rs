//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责批量处理和流程调度，是整个系统的"指挥中心"。
//!
//! ### `batch_processor` - 批量处理器
//! - 管理应用生命周期（初始化、运行、清理）
//! - 批量加载对象，识别重复输入
//! - 控制并发数量（对象级 Semaphore；生成调用的全局 Semaphore 交给流程层共用）
//! - 持有浏览器资源（HtmlPrinter）
//! - 中断处理与对账报告
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (处理 Vec<IntakeEntry>)
//!     ↓
//! workflow::SubjectFlow (处理单个对象的五个阶段)
//!     ↓
//! services (能力层：图表 / 章节 / 文档 / 投递 / 报告)
//!     ↓
//! infrastructure (基础设施：ArtifactStore、HtmlPrinter)
//! ```

pub mod batch_processor;

// 重新导出主要类型
pub use batch_processor::{plan_subjects, App, BatchOrchestrator, PlannedSubject};
