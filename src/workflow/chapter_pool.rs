//! 章节并发生成 - 流程层
//!
//! 一个对象的 15 个章节并发生成，再在这里汇合：
//!
//! - 已有正文的章节直接沿用，不再调用生成接口
//! - 生成调用前从全局信号量取许可，调用结束立刻归还（所有对象共用一个信号量）
//! - 限流错误按 `base * 2^n` 退避（或按接口给出的等待时间）重试，超过次数后放弃
//! - 每个章节成功后立即原子写盘；部分失败时已写好的章节保留，下次运行只补缺

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::StageError;
use crate::infrastructure::ArtifactStore;
use crate::models::chapter::{ChapterTemplate, CHAPTERS};
use crate::models::subject::SubjectRecord;
use crate::services::ChapterGenerator;
use crate::utils::truncate_text;
use crate::workflow::subject_ctx::SubjectCtx;

/// 退避上限，避免指数增长失控
const MAX_BACKOFF: Duration = Duration::from_secs(120);

/// 一次章节阶段的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChapterRun {
    /// 本次新生成的章节数
    pub generated: usize,
    /// 沿用上次运行的章节数
    pub reused: usize,
}

/// 章节生成池
#[derive(Clone)]
pub struct ChapterPool {
    generator: Arc<dyn ChapterGenerator>,
    limiter: Arc<Semaphore>,
    store: ArtifactStore,
    max_attempts: u32,
    backoff_base: Duration,
}

impl ChapterPool {
    /// # 参数
    /// - `limiter`: 全局生成调用信号量（跨对象共享）
    /// - `max_attempts`: 单个章节最多调用次数
    /// - `backoff_base`: 第一次退避的等待时间
    pub fn new(
        generator: Arc<dyn ChapterGenerator>,
        limiter: Arc<Semaphore>,
        store: ArtifactStore,
        max_attempts: u32,
        backoff_base: Duration,
    ) -> Self {
        Self {
            generator,
            limiter,
            store,
            max_attempts: max_attempts.max(1),
            backoff_base,
        }
    }

    /// 补齐缺失的章节
    ///
    /// 全部章节就绪返回 `Ok`；任何章节最终失败返回 `ChaptersIncomplete`，列出每个失败章节。
    pub async fn generate_missing(
        &self,
        ctx: &SubjectCtx,
        subject: Arc<SubjectRecord>,
    ) -> Result<ChapterRun, StageError> {
        let mut run = ChapterRun::default();
        let mut tasks = JoinSet::new();
        let mut pending: BTreeMap<u8, ChapterTemplate> = BTreeMap::new();

        for chapter in CHAPTERS {
            let path = self.store.chapter_path(&subject.id, &chapter);
            if self.store.read_text(&path).await.is_some() {
                run.reused += 1;
                continue;
            }

            pending.insert(chapter.number, chapter);
            let pool = self.clone();
            let subject = subject.clone();
            let tag = ctx.to_string();
            tasks.spawn(async move {
                let result = pool.generate_one(&tag, chapter, &subject).await;
                (chapter.number, result)
            });
        }

        if pending.is_empty() {
            debug!("{} 全部 {} 个章节已存在", ctx, run.reused);
            return Ok(run);
        }
        info!(
            "{} 📝 开始生成 {} 个章节（已有 {} 个）",
            ctx,
            pending.len(),
            run.reused
        );

        let mut failed = Vec::new();
        let mut join_failure = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((number, Ok(()))) => {
                    pending.remove(&number);
                    run.generated += 1;
                }
                Ok((number, Err(e))) => {
                    pending.remove(&number);
                    failed.push((number, e.to_string()));
                }
                Err(e) => {
                    warn!("{} 章节任务异常退出: {}", ctx, e);
                    join_failure = Some(e.to_string());
                }
            }
        }

        // 异常退出的任务没有带回章节号，剩下的就是它们
        if let Some(reason) = join_failure {
            failed.extend(pending.keys().map(|n| (*n, reason.clone())));
        }

        if failed.is_empty() {
            info!("{} ✓ 章节全部就绪（新生成 {} 个）", ctx, run.generated);
            Ok(run)
        } else {
            failed.sort_by_key(|(n, _)| *n);
            Err(StageError::ChaptersIncomplete { failed })
        }
    }

    /// 生成单个章节（含限流重试），成功后写盘
    async fn generate_one(
        &self,
        tag: &str,
        chapter: ChapterTemplate,
        subject: &SubjectRecord,
    ) -> Result<(), StageError> {
        let mut attempt = 1;
        loop {
            let result = {
                let _permit = self
                    .limiter
                    .acquire()
                    .await
                    .map_err(|e| StageError::Content {
                        message: format!("生成信号量已关闭: {}", e),
                    })?;
                self.generator.generate_chapter(&chapter, subject).await
            };

            match result {
                Ok(text) => {
                    let path = self.store.chapter_path(&subject.id, &chapter);
                    self.store.write_atomic(&path, text.as_bytes()).await?;
                    debug!(
                        "{} 第{}章完成 ({} 字): {}",
                        tag,
                        chapter.number,
                        text.chars().count(),
                        truncate_text(&text, 40)
                    );
                    return Ok(());
                }
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let wait = self.backoff_for(attempt, &e);
                    warn!(
                        "{} ⏳ 第{}章被限流，{}ms 后重试 ({}/{})",
                        tag,
                        chapter.number,
                        wait.as_millis(),
                        attempt,
                        self.max_attempts
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!("{} ❌ 第{}章生成失败: {}", tag, chapter.number, e);
                    return Err(e);
                }
            }
        }
    }

    /// 第 n 次失败后的等待时间
    fn backoff_for(&self, attempt: u32, error: &StageError) -> Duration {
        if let StageError::RateLimited {
            retry_after_ms: Some(ms),
            ..
        } = error
        {
            return Duration::from_millis(*ms).min(MAX_BACKOFF);
        }
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Never;

    #[async_trait::async_trait]
    impl ChapterGenerator for Never {
        async fn generate_chapter(
            &self,
            _chapter: &ChapterTemplate,
            _subject: &SubjectRecord,
        ) -> Result<String, StageError> {
            Err(StageError::Content {
                message: "unused".to_string(),
            })
        }
    }

    fn pool(base_ms: u64) -> ChapterPool {
        ChapterPool::new(
            Arc::new(Never),
            Arc::new(Semaphore::new(1)),
            ArtifactStore::new("unused"),
            4,
            Duration::from_millis(base_ms),
        )
    }

    #[test]
    fn backoff_doubles_each_attempt() {
        let p = pool(100);
        let limited = StageError::RateLimited {
            message: "429".to_string(),
            retry_after_ms: None,
        };
        let waits: Vec<u128> = (1..=4).map(|n| p.backoff_for(n, &limited).as_millis()).collect();
        assert_eq!(waits, [100, 200, 400, 800]);
    }

    #[test]
    fn server_hint_overrides_backoff_and_is_capped() {
        let p = pool(100);
        let hinted = StageError::RateLimited {
            message: "429".to_string(),
            retry_after_ms: Some(1_500),
        };
        assert_eq!(p.backoff_for(3, &hinted), Duration::from_millis(1_500));

        let huge = StageError::RateLimited {
            message: "429".to_string(),
            retry_after_ms: Some(10_000_000),
        };
        assert_eq!(p.backoff_for(1, &huge), MAX_BACKOFF);

        let plain = StageError::RateLimited {
            message: "429".to_string(),
            retry_after_ms: None,
        };
        assert_eq!(pool(60_000).backoff_for(10, &plain), MAX_BACKOFF);
    }
}
