//! 日志工具模块
//!
//! 提供日志初始化、批次横幅和运行日志文件的辅助函数

use std::path::Path;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::services::{CostEstimate, RunSummary};

/// 初始化 tracing（`RUST_LOG`，默认 info）
///
/// 重复调用是安全的（测试里会多次调用）。
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init();
}

/// 初始化运行日志文件（写入表头，覆盖旧内容）
///
/// # 参数
/// - `log_file_path`: 日志文件路径
pub async fn init_log_file(log_file_path: &Path) -> Result<()> {
    let log_header = format!(
        "{}\n사주 리포트 배치 로그 - {}\n{}\n\n",
        "=".repeat(60),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(60)
    );
    if let Some(parent) = log_file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(log_file_path, log_header)
        .await
        .with_context(|| format!("无法写入日志文件: {}", log_file_path.display()))?;
    Ok(())
}

/// 在运行日志末尾追加批次汇总
pub async fn append_summary(
    log_file_path: &Path,
    summary: &RunSummary,
    report_path: &Path,
) -> Result<()> {
    let text = format!(
        "{}\n실행 ID: {}\n완료 시간: {}\n전체: {} / 성공: {} / 실패: {} / 건너뜀: {} / 중단: {}\n결함: {}\n소요 시간: {:.1}초\n리포트: {}\n",
        "-".repeat(60),
        summary.run_id,
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        summary.total,
        summary.succeeded,
        summary.failed,
        summary.skipped,
        summary.interrupted,
        summary.defects,
        summary.elapsed_secs,
        report_path.display()
    );
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file_path)
        .await
        .with_context(|| format!("无法打开日志文件: {}", log_file_path.display()))?;
    file.write_all(text.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

/// 记录程序启动信息
pub fn log_startup(config: &Config, run_id: &str) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 批量命盘报告模式 (运行 {})", run_id);
    info!(
        "📊 对象并发: {} | 生成调用并发: {}",
        config.max_concurrent_subjects, config.max_concurrent_generations
    );
    info!("📁 输出目录: {}", config.output_dir);
    info!("{}", "=".repeat(60));
}

/// 记录对象加载信息
///
/// # 参数
/// - `total`: 输入行数
/// - `invalid`: 无法解析的行数（仍会进入报告）
pub fn log_subjects_loaded(total: usize, invalid: usize) {
    info!("✓ 读取到 {} 个对象", total);
    if invalid > 0 {
        info!("⚠️  其中 {} 行输入无法解析，将记为排盘失败", invalid);
    }
}

/// 记录费用估算
pub fn log_cost_estimate(estimate: &CostEstimate) {
    info!("\n{}", "─".repeat(60));
    info!("💰 预计生成调用 {} 次", estimate.calls);
    info!(
        "💰 预计 token: 输入 {} / 输出 {}",
        estimate.input_tokens, estimate.output_tokens
    );
    info!("💰 预计费用: ${:.4}", estimate.cost_usd);
    info!("{}", "─".repeat(60));
}

/// 打印最终统计信息
pub fn print_final_stats(summary: &RunSummary, report_path: &Path, log_file_path: &Path) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 成功: {}/{}", summary.succeeded, summary.total);
    info!("❌ 失败: {}", summary.failed);
    if summary.skipped > 0 {
        info!("⏭  重复跳过: {}", summary.skipped);
    }
    if summary.interrupted > 0 {
        info!("⏸  中断未完成: {}", summary.interrupted);
    }
    if summary.defects > 0 {
        info!("🐞 引擎缺陷: {}", summary.defects);
    }
    info!("⏱  耗时: {:.1} 秒", summary.elapsed_secs);
    info!("{}", "=".repeat(60));
    info!("\n报告已保存至: {}", report_path.display());
    info!("日志已保存至: {}", log_file_path.display());
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_counts_characters_not_bytes() {
        assert_eq!(truncate_text("갑자을축병인", 3), "갑자을...");
        assert_eq!(truncate_text("short", 10), "short");
    }

    #[tokio::test]
    async fn run_log_gets_header_then_summary() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("logs").join("run.log");
        init_log_file(&log).await.unwrap();

        let summary = RunSummary {
            run_id: "r1".to_string(),
            total: 2,
            succeeded: 1,
            failed: 1,
            skipped: 0,
            interrupted: 0,
            defects: 0,
            elapsed_secs: 1.25,
        };
        append_summary(&log, &summary, Path::new("out/report_r1.csv"))
            .await
            .unwrap();

        let text = std::fs::read_to_string(&log).unwrap();
        assert!(text.starts_with(&"=".repeat(60)));
        assert!(text.contains("전체: 2 / 성공: 1 / 실패: 1"));
        assert!(text.contains("report_r1.csv"));
    }
}
