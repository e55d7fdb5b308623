//! 基础设施层
//!
//! - `ArtifactStore` - 输出目录的唯一读写入口（原子写入、产物存在性检查）
//! - `HtmlPrinter` - 唯一的浏览器持有者，提供 HTML → PNG / PDF 能力

pub mod artifact_store;
pub mod html_printer;

pub use artifact_store::ArtifactStore;
pub use html_printer::HtmlPrinter;
