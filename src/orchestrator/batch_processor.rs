//! 批量处理器 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个应用的入口，负责批量对象的处理和资源管理。
//!
//! ## 核心功能
//!
//! 1. **应用初始化**：校验配置、启动日志、加载节气表、启动浏览器
//! 2. **批量加载**：读取输入文件（CSV / TOML），识别重复对象
//! 3. **并发控制**：对象级 Semaphore + 全局生成调用 Semaphore
//! 4. **中断处理**：Ctrl-C 时中止进行中的对象，已完成的产物保持原样
//! 5. **全局统计**：汇总所有对象的结论，写出对账报告

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Local;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::calendar;
use crate::config::{Config, DuplicatePolicy};
use crate::error::{AppError, AppResult, IntakeError};
use crate::infrastructure::{ArtifactStore, HtmlPrinter};
use crate::models::chapter::CHAPTERS;
use crate::models::intake::IntakeRecord;
use crate::models::loaders::{load_intake, IntakeEntry};
use crate::models::subject::SubjectId;
use crate::saju::SexagenaryEngine;
use crate::services::report_writer::{ReportRow, SubjectStatus};
use crate::services::{
    CostEstimate, DeliveryChannel, HtmlChartRenderer, HtmlDocumentAssembler, HttpUploadChannel,
    LlmService, MailGatewayChannel, ReportWriter, RunSummary,
};
use crate::utils::logging;
use crate::workflow::{Collaborators, ProgressBoard, SubjectCtx, SubjectFlow};

/// 应用主结构
pub struct App {
    config: Config,
    run_id: String,
    printer: Arc<HtmlPrinter>,
    writer: Arc<ReportWriter>,
    orchestrator: BatchOrchestrator,
}

impl App {
    /// 初始化应用
    ///
    /// 配置错误在这里整批终止，此时还没有处理任何对象。
    pub async fn initialize(config: Config) -> Result<Self> {
        config.validate().map_err(AppError::from)?;

        let run_id = Local::now().format("%Y%m%d_%H%M%S").to_string();
        logging::init_log_file(Path::new(&config.run_log_file)).await?;
        logging::log_startup(&config, &run_id);

        let master_prompt = tokio::fs::read_to_string(&config.master_prompt_path)
            .await
            .with_context(|| format!("无法读取提示词文件: {}", config.master_prompt_path))?;

        let terms = calendar::load_tables(config.utc_offset_minutes).context("历法对照表加载失败")?;
        let engine = SexagenaryEngine::new(Arc::new(terms), config.luck_cycle_len);

        info!("🌐 正在启动无头浏览器...");
        let printer = Arc::new(
            HtmlPrinter::launch(config.chrome_executable.as_deref().map(Path::new)).await?,
        );

        let collaborators = Collaborators {
            renderer: Arc::new(HtmlChartRenderer::new(printer.clone())),
            generator: Arc::new(LlmService::new(&config, master_prompt)),
            assembler: Arc::new(HtmlDocumentAssembler::new(printer.clone())),
            channels: delivery_channels(&config),
        };

        let writer = Arc::new(ReportWriter::open(&config.output_dir, run_id.clone()).await?);
        let orchestrator = BatchOrchestrator::new(&config, engine, collaborators, writer.clone());

        Ok(Self {
            config,
            run_id,
            printer,
            writer,
            orchestrator,
        })
    }

    /// 运行应用主逻辑
    pub async fn run(self) -> Result<RunSummary> {
        info!("\n📁 正在读取输入: {}", self.config.input_path);
        let entries = load_intake(Path::new(&self.config.input_path)).await?;
        let invalid = entries.iter().filter(|e| e.record.is_err()).count();
        logging::log_subjects_loaded(entries.len(), invalid);

        if entries.is_empty() {
            warn!("⚠️ 输入中没有任何对象，程序结束");
        }

        let calls = (entries.len() - invalid) as u64 * CHAPTERS.len() as u64;
        logging::log_cost_estimate(&CostEstimate::estimate(calls, &self.config));

        let summary = self.orchestrator.run(entries).await?;

        let log_path = PathBuf::from(&self.config.run_log_file);
        let report_path = self.writer.csv_path();
        if let Err(e) = logging::append_summary(&log_path, &summary, &report_path).await {
            warn!("⚠️ 运行日志写入失败: {:#}", e);
        }
        logging::print_final_stats(&summary, &report_path, &log_path);
        info!("运行 {} 结束", self.run_id);

        // 先释放流程层持有的引用，再关闭浏览器
        let Self {
            printer,
            orchestrator,
            ..
        } = self;
        drop(orchestrator);
        match Arc::try_unwrap(printer) {
            Ok(printer) => printer.close().await,
            Err(_) => warn!("浏览器仍被占用，跳过关闭"),
        }

        Ok(summary)
    }
}

/// 按配置构建投递渠道（上传在前，邮件在后）
fn delivery_channels(config: &Config) -> Vec<Arc<dyn DeliveryChannel>> {
    let mut channels: Vec<Arc<dyn DeliveryChannel>> = Vec::new();
    if let (Some(endpoint), Some(token)) = (&config.upload_endpoint, &config.upload_token) {
        channels.push(Arc::new(HttpUploadChannel::new(endpoint, token)));
    }
    if let (Some(endpoint), Some(token), Some(sender)) =
        (&config.mail_endpoint, &config.mail_token, &config.mail_sender)
    {
        channels.push(Arc::new(MailGatewayChannel::new(endpoint, token, sender)));
    }
    if channels.is_empty() {
        warn!("⚠️ 未配置任何投递渠道，文档只保存在输出目录");
    }
    channels
}

/// 编排计划中的一个对象
#[derive(Debug)]
pub struct PlannedSubject {
    pub ctx: SubjectCtx,
    pub intake: Result<IntakeRecord, IntakeError>,
    /// 按重复策略跳过
    pub skip: bool,
}

/// 为每一行分配对象标识并识别重复
///
/// 同名、同出生时刻视为重复：`ProcessBoth` 两个都处理（后者目录名带 `__dupN`），
/// `SkipDuplicate` 只处理第一个。无法解析的行用行号命名，照常进入流程并在排盘阶段失败。
pub fn plan_subjects(entries: Vec<IntakeEntry>, policy: DuplicatePolicy) -> Vec<PlannedSubject> {
    let mut first_seen: HashMap<_, (SubjectId, usize)> = HashMap::new();
    let mut used: HashSet<SubjectId> = HashSet::new();
    let mut planned = Vec::with_capacity(entries.len());

    for (i, entry) in entries.into_iter().enumerate() {
        let index = i + 1;
        let (base, name) = match &entry.record {
            Ok(record) => (SubjectId::from_intake(record), record.name.clone()),
            Err(_) => (
                SubjectId::new(format!("row_{:04}", entry.row)),
                entry.raw_name.clone().unwrap_or_default(),
            ),
        };

        let mut duplicate_of = None;
        let mut skip = false;
        if let Ok(record) = &entry.record {
            let seen = first_seen
                .entry(record.dedup_key())
                .or_insert_with(|| (base.clone(), 0));
            seen.1 += 1;
            if seen.1 > 1 {
                duplicate_of = Some(seen.0.clone());
                skip = policy == DuplicatePolicy::SkipDuplicate;
                warn!(
                    "[대상 {}] ⚠️ 与 {} 重复（第 {} 次出现）{}",
                    index,
                    seen.0,
                    seen.1,
                    if skip { "，按策略跳过" } else { "，两个都处理" }
                );
            }
        }

        // 目录名必须唯一（重复项、或清洗后同名的不同对象）
        let mut id = base.clone();
        let mut n = 2;
        while used.contains(&id) {
            id = base.duplicate(n);
            n += 1;
        }
        used.insert(id.clone());

        let mut ctx = SubjectCtx::new(index, id, name);
        ctx.duplicate_of = duplicate_of;
        planned.push(PlannedSubject {
            ctx,
            intake: entry.record,
            skip,
        });
    }

    planned
}

/// 批次编排器
///
/// 持有流程和报告写入器，不持有任何外部资源，测试里可以直接用替身构造。
pub struct BatchOrchestrator {
    flow: Arc<SubjectFlow>,
    writer: Arc<ReportWriter>,
    max_concurrent_subjects: usize,
    duplicate_policy: DuplicatePolicy,
}

impl BatchOrchestrator {
    pub fn new(
        config: &Config,
        engine: SexagenaryEngine,
        collaborators: Collaborators,
        writer: Arc<ReportWriter>,
    ) -> Self {
        let limiter = Arc::new(Semaphore::new(config.max_concurrent_generations));
        let flow = SubjectFlow::new(
            config,
            engine,
            ArtifactStore::new(&config.output_dir),
            writer.clone(),
            limiter,
            collaborators,
        );
        Self {
            flow: Arc::new(flow),
            writer,
            max_concurrent_subjects: config.max_concurrent_subjects.max(1),
            duplicate_policy: config.duplicate_policy,
        }
    }

    /// 处理全部对象，Ctrl-C 时中断
    pub async fn run(&self, entries: Vec<IntakeEntry>) -> AppResult<RunSummary> {
        let interrupted = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => warn!("\n⏸  收到中断信号，停止调度新的对象..."),
                Err(e) => {
                    warn!("无法监听中断信号: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };
        self.run_until(entries, interrupted).await
    }

    /// 处理全部对象，`shutdown` 完成时中断
    ///
    /// 中断时进行中的对象被中止（已写入的产物完整保留），报告照常写出。
    pub async fn run_until(
        &self,
        entries: Vec<IntakeEntry>,
        shutdown: impl Future<Output = ()>,
    ) -> AppResult<RunSummary> {
        let started = Instant::now();
        let board = Arc::new(ProgressBoard::new());
        let planned = plan_subjects(entries, self.duplicate_policy);
        let total = planned.len();

        let mut runnable = Vec::new();
        for subject in planned {
            let mut row = ReportRow::new(
                subject.ctx.index,
                subject.ctx.id.as_str(),
                subject.ctx.name.as_str(),
            );
            row.duplicate_of = subject.ctx.duplicate_of.as_ref().map(|d| d.to_string());
            if subject.skip {
                row.status = SubjectStatus::Skipped;
                board.publish(&row);
            } else {
                board.publish(&row);
                runnable.push(subject);
            }
        }

        info!(
            "📋 共 {} 个对象，{} 个待处理，最多同时处理 {} 个",
            total,
            runnable.len(),
            self.max_concurrent_subjects
        );

        let process = self.process_all(runnable, board.clone());
        tokio::select! {
            _ = process => {}
            _ = shutdown => {
                warn!("⏸  批次已中断，正在写出当前进度");
            }
        }

        let rows = board.snapshot();
        let summary = self.writer.write_report(&rows, started.elapsed()).await?;
        Ok(summary)
    }

    async fn process_all(&self, runnable: Vec<PlannedSubject>, board: Arc<ProgressBoard>) {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_subjects));
        // JoinSet 被丢弃时（中断）会中止所有对象任务
        let mut tasks = JoinSet::new();

        for subject in runnable {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let flow = self.flow.clone();
            let board = board.clone();

            tasks.spawn(async move {
                let _permit = permit;
                let PlannedSubject { ctx, intake, .. } = subject;
                info!("{} 🔄 开始处理 {}", ctx, ctx.id);
                flow.run(&ctx, intake, &board).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("对象任务执行失败: {}", e);
            }
        }
    }
}
