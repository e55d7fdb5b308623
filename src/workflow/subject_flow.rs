//! 对象处理流程 - 流程层
//!
//! 核心职责：定义"一个对象"的完整处理流程
//!
//! 流程顺序（严格按序，任一阶段失败即停止）：
//! 1. 排盘 → chart.json
//! 2. 图表渲染 → images/*.png + manifest.json
//! 3. 章节生成 → chapters/chNN.md（并发，见 `ChapterPool`）
//! 4. 文档组装 → <id>_report.pdf
//! 5. 投递 → delivery.json
//!
//! 每个阶段开始前先看输出目录：产物已存在就沿用（Skipped），不再调用外部服务。
//! 排盘结果一旦重算，派生产物全部作废，后续阶段从头再做。

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{IntakeError, StageError};
use crate::infrastructure::ArtifactStore;
use crate::models::chapter::CHAPTERS;
use crate::models::intake::IntakeRecord;
use crate::models::outcome::{Resolution, Stage, StageOutcome, SubjectState};
use crate::models::subject::SubjectRecord;
use crate::saju::SexagenaryEngine;
use crate::services::report_writer::ReportRow;
use crate::services::{
    AssemblyInput, ChapterGenerator, ChartRenderer, DeliveryChannel, DeliveryReceipt,
    DeliveryRequest, DocumentAssembler, ImageEntry, ImageManifest, ReportWriter,
};
use crate::workflow::chapter_pool::ChapterPool;
use crate::workflow::progress::ProgressBoard;
use crate::workflow::subject_ctx::SubjectCtx;

/// 外部协作方
#[derive(Clone)]
pub struct Collaborators {
    pub renderer: Arc<dyn ChartRenderer>,
    pub generator: Arc<dyn ChapterGenerator>,
    pub assembler: Arc<dyn DocumentAssembler>,
    /// 按顺序执行：上传在前，邮件在后（邮件要用上传返回的链接）
    pub channels: Vec<Arc<dyn DeliveryChannel>>,
}

/// 阶段执行结果：新做的，或沿用上次的
enum StageRun<T> {
    Done(T, Option<String>),
    Reused(T, Option<String>),
}

/// 对象处理流程
///
/// - 驱动单个对象的状态机
/// - 决定每个阶段是执行还是沿用
/// - 每个阶段的结论都写入记录文件
/// - 不知道批次里还有哪些对象
pub struct SubjectFlow {
    engine: SexagenaryEngine,
    store: ArtifactStore,
    writer: Arc<ReportWriter>,
    collaborators: Collaborators,
    chapters: ChapterPool,
    report_year: i32,
    annual_span: u32,
}

impl SubjectFlow {
    /// 创建对象处理流程
    ///
    /// # 参数
    /// - `limiter`: 全局生成调用信号量（所有对象共用）
    pub fn new(
        config: &Config,
        engine: SexagenaryEngine,
        store: ArtifactStore,
        writer: Arc<ReportWriter>,
        limiter: Arc<Semaphore>,
        collaborators: Collaborators,
    ) -> Self {
        let chapters = ChapterPool::new(
            collaborators.generator.clone(),
            limiter,
            store.clone(),
            config.max_generation_attempts,
            Duration::from_millis(config.backoff_base_ms),
        );
        Self {
            engine,
            store,
            writer,
            collaborators,
            chapters,
            report_year: config.effective_report_year(),
            annual_span: config.annual_span,
        }
    }

    /// 处理一个对象，返回它的报告行
    ///
    /// 永远不会返回错误：所有失败都落在 (对象, 阶段) 上并写进报告行。
    pub async fn run(
        &self,
        ctx: &SubjectCtx,
        intake: Result<IntakeRecord, IntakeError>,
        board: &ProgressBoard,
    ) -> ReportRow {
        let mut row = ReportRow::new(ctx.index, ctx.id.as_str(), ctx.name.as_str());
        row.duplicate_of = ctx.duplicate_of.as_ref().map(|d| d.to_string());
        row.started_at = Some(timestamp());
        board.publish(&row);

        let mut state = SubjectState::Pending;
        self.drive(ctx, intake, &mut state, &mut row, board).await;

        row.finished_at = Some(timestamp());
        row.settle(state);
        board.publish(&row);

        if state.is_complete() {
            info!("{} ✅ 处理完成 ({})", ctx, ctx.id);
        } else {
            error!("{} ❌ 处理终止于 {}", ctx, state);
        }
        row
    }

    async fn drive(
        &self,
        ctx: &SubjectCtx,
        intake: Result<IntakeRecord, IntakeError>,
        state: &mut SubjectState,
        row: &mut ReportRow,
        board: &ProgressBoard,
    ) {
        // ========== 阶段 1: 排盘 ==========
        let Some(subject) = self
            .run_stage(ctx, state, row, Stage::Chart, self.chart_stage(ctx, intake))
            .await
        else {
            return;
        };
        row.name = subject.name().to_string();
        board.publish(row);

        // ========== 阶段 2: 图表渲染 ==========
        let Some(manifest) = self
            .run_stage(ctx, state, row, Stage::Images, self.images_stage(ctx, &subject))
            .await
        else {
            return;
        };
        board.publish(row);

        // ========== 阶段 3: 章节生成 ==========
        let Some(()) = self
            .run_stage(ctx, state, row, Stage::Chapters, self.chapters_stage(ctx, &subject))
            .await
        else {
            return;
        };
        board.publish(row);

        // ========== 阶段 4: 文档组装 ==========
        let Some(document) = self
            .run_stage(
                ctx,
                state,
                row,
                Stage::Assembly,
                self.assembly_stage(ctx, &subject, &manifest),
            )
            .await
        else {
            return;
        };
        row.document = Some(document.display().to_string());
        board.publish(row);

        // ========== 阶段 5: 投递 ==========
        if let Some(link) = self
            .run_stage(
                ctx,
                state,
                row,
                Stage::Delivery,
                self.delivery_stage(ctx, &subject, document),
            )
            .await
        {
            row.share_link = link;
        }
    }

    /// 执行一个阶段：领取尝试序号 → 执行 → 状态迁移 → 写记录
    ///
    /// 返回 None 表示该阶段失败，对象停在 `Failed(stage)`。
    async fn run_stage<T>(
        &self,
        ctx: &SubjectCtx,
        state: &mut SubjectState,
        row: &mut ReportRow,
        stage: Stage,
        work: impl Future<Output = Result<StageRun<T>, StageError>>,
    ) -> Option<T> {
        let attempt = self.writer.next_attempt(&ctx.id, stage).await;
        let outcome = StageOutcome::start(ctx.id.clone(), stage, attempt);
        debug!("{} ▶ {} (第 {} 次)", ctx, stage.label(), attempt);

        let (outcome, resolution, value) = match work.await {
            Ok(StageRun::Done(value, artifact)) => {
                info!("{} ✓ {} 完成", ctx, stage.label());
                (outcome.succeed(artifact), Resolution::Succeeded, Some(value))
            }
            Ok(StageRun::Reused(value, artifact)) => {
                info!("{} ⏭ {} 已有产物，跳过", ctx, stage.label());
                (outcome.skip(artifact), Resolution::Skipped, Some(value))
            }
            Err(e) => {
                error!("{} ❌ {} 失败: {}", ctx, stage.label(), e);
                row.error = Some(e.to_string());
                row.defect |= e.is_defect();
                (outcome.fail(&e), Resolution::Failed, None)
            }
        };

        let (outcome, value) = match state.apply(stage, resolution) {
            Ok(next) => {
                *state = next;
                (outcome, value)
            }
            Err(e) => {
                error!("{} ❌ {}", ctx, e);
                *state = SubjectState::Failed(stage);
                row.error = Some(e.to_string());
                row.defect = true;
                (outcome.fail(&e), None)
            }
        };

        if let Err(e) = self.writer.record(&outcome).await {
            warn!("{} ⚠️ 阶段记录写入失败: {}", ctx, e);
        }
        row.settle(*state);
        value
    }

    async fn chart_stage(
        &self,
        ctx: &SubjectCtx,
        intake: Result<IntakeRecord, IntakeError>,
    ) -> Result<StageRun<Arc<SubjectRecord>>, StageError> {
        let intake = intake?;
        let path = self.store.chart_path(&ctx.id);
        let artifact = Some(path.display().to_string());

        if let Some(existing) = self.store.read_json::<SubjectRecord>(&path).await {
            if existing.id == ctx.id
                && existing.intake == intake
                && existing.report_year == self.report_year
            {
                return Ok(StageRun::Reused(Arc::new(existing), artifact));
            }
            info!("{} 输入或报告年份已变化，重新排盘", ctx);
        }

        let record = SubjectRecord::compute(
            ctx.id.clone(),
            intake,
            &self.engine,
            self.report_year,
            self.annual_span,
        )?;
        debug!(
            "{} 四柱: {}",
            ctx,
            record.pillars.as_array().map(|p| p.hanja()).join(" ")
        );
        // 后续产物都派生自命盘，命盘重算就全部作废
        let removed = self.store.clear_derived(&ctx.id).await?;
        if removed > 0 {
            info!("{} 🧹 已清除 {} 项基于旧命盘的产物", ctx, removed);
        }
        self.store.write_json(&path, &record).await?;
        Ok(StageRun::Done(Arc::new(record), artifact))
    }

    async fn images_stage(
        &self,
        ctx: &SubjectCtx,
        subject: &SubjectRecord,
    ) -> Result<StageRun<ImageManifest>, StageError> {
        let subject_dir = self.store.subject_dir(&ctx.id);
        let manifest_path = self.store.image_manifest_path(&ctx.id);
        let artifact = Some(manifest_path.display().to_string());

        if let Some(manifest) = self.store.read_json::<ImageManifest>(&manifest_path).await {
            let mut complete = !manifest.images.is_empty();
            for entry in &manifest.images {
                complete = complete && self.store.is_present(&subject_dir.join(&entry.path)).await;
            }
            if complete {
                return Ok(StageRun::Reused(manifest, artifact));
            }
        }

        let images = self
            .collaborators
            .renderer
            .render(subject, &subject_dir)
            .await?;
        if images.is_empty() {
            return Err(StageError::render("没有生成任何图表"));
        }

        let mut manifest = ImageManifest::default();
        for image in images {
            let relative = ArtifactStore::relative_image_path(&image.file_name);
            self.store
                .write_atomic(&subject_dir.join(&relative), &image.png)
                .await?;
            manifest.images.push(ImageEntry {
                kind: image.kind,
                path: relative,
            });
        }
        // 清单最后写：清单存在即代表图片齐全
        self.store.write_json(&manifest_path, &manifest).await?;
        Ok(StageRun::Done(manifest, artifact))
    }

    async fn chapters_stage(
        &self,
        ctx: &SubjectCtx,
        subject: &Arc<SubjectRecord>,
    ) -> Result<StageRun<()>, StageError> {
        let run = self.chapters.generate_missing(ctx, subject.clone()).await?;
        let artifact = Some(self.store.chapters_dir(&ctx.id).display().to_string());
        if run.generated == 0 {
            Ok(StageRun::Reused((), artifact))
        } else {
            Ok(StageRun::Done((), artifact))
        }
    }

    async fn assembly_stage(
        &self,
        ctx: &SubjectCtx,
        subject: &SubjectRecord,
        manifest: &ImageManifest,
    ) -> Result<StageRun<PathBuf>, StageError> {
        let document = self.store.document_path(&ctx.id);
        let artifact = Some(document.display().to_string());
        if self.store.is_present(&document).await {
            return Ok(StageRun::Reused(document, artifact));
        }

        let mut chapters = Vec::with_capacity(CHAPTERS.len());
        for chapter in CHAPTERS {
            let text = self
                .store
                .read_text(&self.store.chapter_path(&ctx.id, &chapter))
                .await
                .ok_or_else(|| StageError::assembly(format!("缺少第{}章正文", chapter.number)))?;
            chapters.push((chapter, text));
        }

        let work_dir = self.store.subject_dir(&ctx.id);
        let pdf = self
            .collaborators
            .assembler
            .assemble(AssemblyInput {
                subject,
                chapters: &chapters,
                images: manifest,
                work_dir: &work_dir,
            })
            .await?;
        self.store.write_atomic(&document, &pdf).await?;
        Ok(StageRun::Done(document, artifact))
    }

    /// 依次执行各渠道；回执里已有确认的渠道不再重复投递
    async fn delivery_stage(
        &self,
        ctx: &SubjectCtx,
        subject: &SubjectRecord,
        document: PathBuf,
    ) -> Result<StageRun<Option<String>>, StageError> {
        let receipt_path = self.store.receipt_path(&ctx.id);
        let artifact = Some(receipt_path.display().to_string());
        let mut receipt: DeliveryReceipt = self
            .store
            .read_json(&receipt_path)
            .await
            .unwrap_or_default();

        let mut request = DeliveryRequest {
            subject: ctx.id.clone(),
            name: subject.name().to_string(),
            email: subject.intake.email.clone(),
            document,
            share_link: receipt.share_link().map(String::from),
        };

        let channels: Vec<&Arc<dyn DeliveryChannel>> = self
            .collaborators
            .channels
            .iter()
            .filter(|c| c.applies_to(&request))
            .collect();
        if channels.is_empty() {
            if self.store.is_present(&receipt_path).await {
                return Ok(StageRun::Reused(receipt.share_link().map(String::from), artifact));
            }
            warn!("{} ⚠️ 没有可用的投递渠道，文档只保存在本地", ctx);
            // 空回执也落盘，下次直接沿用
            self.store.write_json(&receipt_path, &receipt).await?;
            return Ok(StageRun::Done(None, artifact));
        }

        let mut delivered = 0;
        for channel in channels {
            if receipt.confirmation(channel.name()).is_some() {
                continue;
            }
            let confirmation = channel.deliver(&request).await?;
            info!("{} 📤 {} 投递成功: {}", ctx, channel.name(), confirmation.confirmation);
            if let Some(link) = &confirmation.link {
                request.share_link = Some(link.clone());
            }
            receipt.confirmations.push(confirmation);
            // 每个渠道成功后立即落盘，下次只补没成功的渠道
            self.store.write_json(&receipt_path, &receipt).await?;
            delivered += 1;
        }

        let link = receipt.share_link().map(String::from);
        if delivered == 0 {
            Ok(StageRun::Reused(link, artifact))
        } else {
            Ok(StageRun::Done(link, artifact))
        }
    }
}

fn timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
