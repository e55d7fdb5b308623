//! 流程层（Workflow）
//!
//! - `subject_flow` - 单个对象的五阶段状态机
//! - `chapter_pool` - 单个对象内 15 个章节的并发生成与汇合
//! - `progress` - 批次进度板（中断时用于出报告）

pub mod chapter_pool;
pub mod progress;
pub mod subject_ctx;
pub mod subject_flow;

pub use chapter_pool::{ChapterPool, ChapterRun};
pub use progress::ProgressBoard;
pub use subject_ctx::SubjectCtx;
pub use subject_flow::{Collaborators, SubjectFlow};
