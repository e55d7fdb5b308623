//! 编排层集成测试：用替身代替浏览器、生成接口和投递渠道

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use saju_report::calendar::TabulatedSolarTerms;
use saju_report::models::chapter::ChapterTemplate;
use saju_report::models::loaders::parse_csv;
use saju_report::models::outcome::{Stage, StageOutcome, StageStatus};
use saju_report::services::report_writer::{ReportRow, SubjectStatus};
use saju_report::services::{
    AssemblyInput, ChapterGenerator, ChartRenderer, DeliveryChannel, DeliveryConfirmation,
    DeliveryRequest, DocumentAssembler, RenderedImage, ReportWriter, RunSummary,
};
use saju_report::utils::logging;
use saju_report::{
    App, BatchOrchestrator, Collaborators, Config, DuplicatePolicy, SexagenaryEngine, StageError,
    SubjectRecord,
};

const THREE_SUBJECTS: &str = "\
name,birth_date,hour,minute,sex,calendar,leap_month,email,phone
A,1990-05-15,14,30,male,solar,false,a@example.com,
B,1985-11-03,8,10,female,solar,false,b@example.com,
C,1992-04-21,9,0,female,lunar,false,,
";

// ========== 替身 ==========

#[derive(Default)]
struct FakeRenderer {
    calls: AtomicUsize,
}

#[async_trait]
impl ChartRenderer for FakeRenderer {
    async fn render(
        &self,
        _subject: &SubjectRecord,
        _work_dir: &Path,
    ) -> Result<Vec<RenderedImage>, StageError> {
        self.calls.fetch_add(1, SeqCst);
        Ok(vec![
            RenderedImage {
                kind: "four_pillars".to_string(),
                file_name: "four_pillars.png".to_string(),
                png: vec![0x89, b'P', b'N', b'G'],
            },
            RenderedImage {
                kind: "luck_cycle".to_string(),
                file_name: "luck_cycle.png".to_string(),
                png: vec![0x89, b'P', b'N', b'G'],
            },
        ])
    }
}

#[derive(Default)]
struct FakeGenerator {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Duration,
    /// 这些对象（按姓名）的所有章节都返回内容错误
    failing_subjects: HashSet<String>,
    /// 这些章节返回内容错误
    failing_chapters: HashSet<u8>,
    /// 这些章节永远被限流
    always_limited: HashSet<u8>,
    /// 每个章节第一次调用被限流
    limit_first_call: bool,
    /// 调用永不返回（模拟中断时卡住的请求）
    hang: bool,
    seen: Mutex<HashSet<(String, u8)>>,
    per_chapter: Mutex<HashMap<u8, usize>>,
}

#[async_trait]
impl ChapterGenerator for FakeGenerator {
    async fn generate_chapter(
        &self,
        chapter: &ChapterTemplate,
        subject: &SubjectRecord,
    ) -> Result<String, StageError> {
        self.calls.fetch_add(1, SeqCst);
        *self
            .per_chapter
            .lock()
            .unwrap()
            .entry(chapter.number)
            .or_insert(0) += 1;

        let now = self.in_flight.fetch_add(1, SeqCst) + 1;
        self.max_in_flight.fetch_max(now, SeqCst);
        if self.hang {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, SeqCst);

        let first_call = self
            .seen
            .lock()
            .unwrap()
            .insert((subject.id.to_string(), chapter.number));

        if self.always_limited.contains(&chapter.number) || (self.limit_first_call && first_call) {
            return Err(StageError::RateLimited {
                message: "429 Too Many Requests".to_string(),
                retry_after_ms: Some(1),
            });
        }
        if self.failing_subjects.contains(subject.name())
            || self.failing_chapters.contains(&chapter.number)
        {
            return Err(StageError::Content {
                message: "content policy".to_string(),
            });
        }
        Ok(format!(
            "## {}\n\n{} 님의 {} 이야기.",
            chapter.title,
            subject.name(),
            subject.pillars.day
        ))
    }
}

#[derive(Default)]
struct FakeAssembler {
    calls: AtomicUsize,
}

#[async_trait]
impl DocumentAssembler for FakeAssembler {
    async fn assemble(&self, input: AssemblyInput<'_>) -> Result<Vec<u8>, StageError> {
        self.calls.fetch_add(1, SeqCst);
        assert_eq!(input.chapters.len(), 15);
        assert!(!input.images.images.is_empty());
        Ok(b"%PDF-1.4 fake".to_vec())
    }
}

#[derive(Default)]
struct FakeUpload {
    calls: AtomicUsize,
}

#[async_trait]
impl DeliveryChannel for FakeUpload {
    fn name(&self) -> &'static str {
        "upload"
    }

    async fn deliver(&self, request: &DeliveryRequest) -> Result<DeliveryConfirmation, StageError> {
        self.calls.fetch_add(1, SeqCst);
        assert!(request.document.is_file());
        Ok(DeliveryConfirmation {
            channel: "upload".to_string(),
            confirmation: format!("file-{}", request.subject),
            link: Some(format!("https://drive.example.com/{}", request.subject)),
            delivered_at: Local::now(),
        })
    }
}

// ========== 辅助函数 ==========

struct Fakes {
    renderer: Arc<FakeRenderer>,
    generator: Arc<FakeGenerator>,
    assembler: Arc<FakeAssembler>,
    upload: Arc<FakeUpload>,
    /// 不配置任何投递渠道
    local_only: bool,
}

impl Fakes {
    fn with_generator(generator: FakeGenerator) -> Self {
        Self {
            renderer: Arc::default(),
            generator: Arc::new(generator),
            assembler: Arc::default(),
            upload: Arc::default(),
            local_only: false,
        }
    }

    fn local_only() -> Self {
        Self {
            local_only: true,
            ..Self::with_generator(FakeGenerator::default())
        }
    }

    fn collaborators(&self) -> Collaborators {
        let channels: Vec<Arc<dyn DeliveryChannel>> = if self.local_only {
            Vec::new()
        } else {
            vec![self.upload.clone() as Arc<dyn DeliveryChannel>]
        };
        Collaborators {
            renderer: self.renderer.clone(),
            generator: self.generator.clone(),
            assembler: self.assembler.clone(),
            channels,
        }
    }
}

fn config(dir: &Path) -> Config {
    Config {
        output_dir: dir.display().to_string(),
        report_year: Some(2026),
        annual_span: 5,
        max_concurrent_subjects: 3,
        max_concurrent_generations: 5,
        max_generation_attempts: 3,
        backoff_base_ms: 1,
        ..Config::default()
    }
}

fn engine() -> SexagenaryEngine {
    SexagenaryEngine::new(Arc::new(TabulatedSolarTerms::embedded(540).unwrap()), 10)
}

async fn run_batch(config: &Config, fakes: &Fakes, run_id: &str, csv: &str) -> RunSummary {
    logging::init();
    let writer = Arc::new(ReportWriter::open(&config.output_dir, run_id).await.unwrap());
    let orchestrator = BatchOrchestrator::new(config, engine(), fakes.collaborators(), writer);
    orchestrator
        .run_until(parse_csv(csv).unwrap(), std::future::pending())
        .await
        .unwrap()
}

fn report_rows(dir: &Path, run_id: &str) -> Vec<ReportRow> {
    let path = dir.join(format!("report_{}.json", run_id));
    let json: serde_json::Value = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
    serde_json::from_value(json["subjects"].clone()).unwrap()
}

fn ledger(dir: &Path) -> Vec<StageOutcome> {
    std::fs::read_to_string(dir.join("outcomes.jsonl"))
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

fn chapter_files(dir: &Path, subject: &str) -> usize {
    std::fs::read_dir(dir.join(subject).join("chapters"))
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|e| e.file_name().to_string_lossy().ends_with(".md"))
                .count()
        })
        .unwrap_or(0)
}

fn document(dir: &Path, subject: &str) -> PathBuf {
    dir.join(subject).join(format!("{}_report.pdf", subject))
}

// ========== 测试 ==========

#[tokio::test]
async fn every_subject_reaches_delivered() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let fakes = Fakes::with_generator(FakeGenerator::default());

    let summary = run_batch(&config, &fakes, "run1", THREE_SUBJECTS).await;

    assert_eq!((summary.total, summary.succeeded, summary.failed), (3, 3, 0));
    assert_eq!(fakes.generator.calls.load(SeqCst), 45);
    assert_eq!(fakes.renderer.calls.load(SeqCst), 3);
    assert_eq!(fakes.assembler.calls.load(SeqCst), 3);
    assert_eq!(fakes.upload.calls.load(SeqCst), 3);

    for subject in ["A_19900515_1430", "B_19851103_0810", "C_19920421_0900_lunar"] {
        assert!(dir.path().join(subject).join("chart.json").is_file());
        assert!(dir.path().join(subject).join("images/manifest.json").is_file());
        assert_eq!(chapter_files(dir.path(), subject), 15);
        assert!(document(dir.path(), subject).is_file());
        assert!(dir.path().join(subject).join("delivery.json").is_file());
    }

    let rows = report_rows(dir.path(), "run1");
    assert!(rows.iter().all(|r| r.final_state == "delivered"));
    assert_eq!(
        rows[0].share_link.as_deref(),
        Some("https://drive.example.com/A_19900515_1430")
    );
    assert!(dir.path().join("report_run1.csv").is_file());

    // 每个对象每个阶段一条记录
    let outcomes = ledger(dir.path());
    assert_eq!(outcomes.len(), 15);
    assert!(outcomes.iter().all(|o| o.status == StageStatus::Succeeded));
}

#[tokio::test]
async fn rerun_skips_every_stage_without_external_calls() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    run_batch(
        &config,
        &Fakes::with_generator(FakeGenerator::default()),
        "run1",
        THREE_SUBJECTS,
    )
    .await;

    let second = Fakes::with_generator(FakeGenerator::default());
    let summary = run_batch(&config, &second, "run2", THREE_SUBJECTS).await;

    assert_eq!(summary.succeeded, 3);
    assert_eq!(second.generator.calls.load(SeqCst), 0);
    assert_eq!(second.renderer.calls.load(SeqCst), 0);
    assert_eq!(second.assembler.calls.load(SeqCst), 0);
    assert_eq!(second.upload.calls.load(SeqCst), 0);

    let rerun: Vec<StageOutcome> = ledger(dir.path())
        .into_iter()
        .filter(|o| o.attempt == 2)
        .collect();
    assert_eq!(rerun.len(), 15);
    assert!(rerun.iter().all(|o| o.status == StageStatus::Skipped));

    let rows = report_rows(dir.path(), "run2");
    assert!(rows.iter().all(|r| r.final_state == "skipped(delivery)"));
    assert!(rows.iter().all(|r| r.status == SubjectStatus::Succeeded));
}

#[tokio::test]
async fn changed_sex_rebuilds_everything_derived_from_the_chart() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let male = "name,birth_date,hour,minute,sex\nA,1990-05-15,14,30,male\n";
    let female = "name,birth_date,hour,minute,sex\nA,1990-05-15,14,30,female\n";

    run_batch(&config, &Fakes::with_generator(FakeGenerator::default()), "run1", male).await;
    let chart_path = dir.path().join("A_19900515_1430/chart.json");
    let chart: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&chart_path).unwrap()).unwrap();
    assert_eq!(chart["luck"]["direction"], "forward");

    let second = Fakes::with_generator(FakeGenerator::default());
    let summary = run_batch(&config, &second, "run2", female).await;

    assert_eq!(summary.succeeded, 1);
    let chart: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&chart_path).unwrap()).unwrap();
    assert_eq!(chart["luck"]["direction"], "reverse");
    // 旧命盘上的图表、章节、文档和投递全部重做
    assert_eq!(second.renderer.calls.load(SeqCst), 1);
    assert_eq!(second.generator.calls.load(SeqCst), 15);
    assert_eq!(second.assembler.calls.load(SeqCst), 1);
    assert_eq!(second.upload.calls.load(SeqCst), 1);

    let rerun: Vec<StageOutcome> = ledger(dir.path())
        .into_iter()
        .filter(|o| o.attempt == 2)
        .collect();
    assert_eq!(rerun.len(), 5);
    assert!(rerun.iter().all(|o| o.status == StageStatus::Succeeded));
}

#[tokio::test]
async fn local_only_delivery_is_skipped_on_rerun() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let csv = "name,birth_date,hour,minute,sex\nA,1990-05-15,14,30,male\n";

    run_batch(&config, &Fakes::local_only(), "run1", csv).await;
    run_batch(&config, &Fakes::local_only(), "run2", csv).await;

    let delivery: Vec<StageStatus> = ledger(dir.path())
        .into_iter()
        .filter(|o| o.stage == Stage::Delivery)
        .map(|o| o.status)
        .collect();
    assert_eq!(delivery, [StageStatus::Succeeded, StageStatus::Skipped]);
    let rows = report_rows(dir.path(), "run2");
    assert_eq!(rows[0].final_state, "skipped(delivery)");
    assert!(rows[0].share_link.is_none());
}

#[tokio::test]
async fn one_failing_subject_does_not_stop_its_neighbours() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let fakes = Fakes::with_generator(FakeGenerator {
        failing_subjects: HashSet::from(["B".to_string()]),
        ..FakeGenerator::default()
    });

    let summary = run_batch(&config, &fakes, "run1", THREE_SUBJECTS).await;
    assert_eq!((summary.succeeded, summary.failed), (2, 1));

    let rows = report_rows(dir.path(), "run1");
    assert_eq!(rows[0].status, SubjectStatus::Succeeded);
    assert_eq!(rows[1].status, SubjectStatus::Failed);
    assert_eq!(rows[1].failed_stage, Some(Stage::Chapters));
    assert!(rows[1].error.as_deref().unwrap_or("").contains("15 个章节"));
    assert_eq!(rows[2].status, SubjectStatus::Succeeded);

    // 失败只归到一个 (对象, 阶段)
    let failures: Vec<(String, Stage)> = ledger(dir.path())
        .into_iter()
        .filter(|o| o.status == StageStatus::Failed)
        .map(|o| (o.subject.to_string(), o.stage))
        .collect();
    assert_eq!(failures, [("B_19851103_0810".to_string(), Stage::Chapters)]);
    assert!(!document(dir.path(), "B_19851103_0810").exists());
}

#[tokio::test]
async fn in_flight_generation_calls_never_exceed_the_limit() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.max_concurrent_subjects = 4;
    let fakes = Fakes::with_generator(FakeGenerator {
        delay: Duration::from_millis(15),
        ..FakeGenerator::default()
    });
    let csv = format!("{}D,2001-01-01,0,5,male,solar,false,,\n", THREE_SUBJECTS);

    let summary = run_batch(&config, &fakes, "run1", &csv).await;

    assert_eq!(summary.succeeded, 4);
    assert_eq!(fakes.generator.calls.load(SeqCst), 60);
    let peak = fakes.generator.max_in_flight.load(SeqCst);
    assert!(peak <= 5, "peak in-flight calls: {}", peak);
    assert!(peak >= 2, "chapters should run concurrently, peak: {}", peak);
}

#[tokio::test]
async fn rate_limited_chapters_are_retried() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let fakes = Fakes::with_generator(FakeGenerator {
        limit_first_call: true,
        ..FakeGenerator::default()
    });

    let summary = run_batch(&config, &fakes, "run1", THREE_SUBJECTS).await;

    assert_eq!(summary.succeeded, 3);
    assert_eq!(fakes.generator.calls.load(SeqCst), 90);
}

#[tokio::test]
async fn retries_stop_after_the_attempt_limit() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let fakes = Fakes::with_generator(FakeGenerator {
        always_limited: HashSet::from([5]),
        ..FakeGenerator::default()
    });
    let csv = "name,birth_date,hour,minute,sex\nA,1990-05-15,14,30,male\n";

    let summary = run_batch(&config, &fakes, "run1", csv).await;

    assert_eq!(summary.failed, 1);
    assert_eq!(fakes.generator.per_chapter.lock().unwrap()[&5], 3);
    let rows = report_rows(dir.path(), "run1");
    assert!(rows[0].error.as_deref().unwrap_or("").contains("第5章"));
    // 其余章节已写盘
    assert_eq!(chapter_files(dir.path(), "A_19900515_1430"), 14);
}

#[tokio::test]
async fn partial_chapter_failure_only_regenerates_missing_chapters() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let csv = "name,birth_date,hour,minute,sex\nA,1990-05-15,14,30,male\n";

    let first = Fakes::with_generator(FakeGenerator {
        failing_chapters: HashSet::from([3, 7]),
        ..FakeGenerator::default()
    });
    let summary = run_batch(&config, &first, "run1", csv).await;
    assert_eq!(summary.failed, 1);
    assert_eq!(chapter_files(dir.path(), "A_19900515_1430"), 13);
    let rows = report_rows(dir.path(), "run1");
    let error = rows[0].error.clone().unwrap_or_default();
    assert!(error.contains("第3章") && error.contains("第7章"));

    let second = Fakes::with_generator(FakeGenerator::default());
    let summary = run_batch(&config, &second, "run2", csv).await;
    assert_eq!(summary.succeeded, 1);
    assert_eq!(second.generator.calls.load(SeqCst), 2);
    assert_eq!(second.renderer.calls.load(SeqCst), 0);
    assert_eq!(second.assembler.calls.load(SeqCst), 1);

    let chapters = ledger(dir.path())
        .into_iter()
        .filter(|o| o.stage == Stage::Chapters)
        .map(|o| (o.attempt, o.status))
        .collect::<Vec<_>>();
    assert_eq!(
        chapters,
        [(1, StageStatus::Failed), (2, StageStatus::Succeeded)]
    );
}

#[tokio::test]
async fn duplicates_are_flagged_or_skipped_by_policy() {
    let csv = format!("{}A,1990-05-15,14,30,male,solar,false,other@example.com,\n", THREE_SUBJECTS);

    let dir = tempfile::tempdir().unwrap();
    let fakes = Fakes::with_generator(FakeGenerator::default());
    let summary = run_batch(&config(dir.path()), &fakes, "both", &csv).await;
    assert_eq!(summary.succeeded, 4);
    assert!(document(dir.path(), "A_19900515_1430__dup2").is_file());
    let rows = report_rows(dir.path(), "both");
    assert_eq!(rows[3].duplicate_of.as_deref(), Some("A_19900515_1430"));

    let dir = tempfile::tempdir().unwrap();
    let mut skip = config(dir.path());
    skip.duplicate_policy = DuplicatePolicy::SkipDuplicate;
    let fakes = Fakes::with_generator(FakeGenerator::default());
    let summary = run_batch(&skip, &fakes, "skip", &csv).await;
    assert_eq!((summary.succeeded, summary.skipped), (3, 1));
    assert_eq!(fakes.generator.calls.load(SeqCst), 45);
    let rows = report_rows(dir.path(), "skip");
    assert_eq!(rows[3].status, SubjectStatus::Skipped);
    assert!(!dir.path().join("A_19900515_1430__dup2").exists());
}

#[tokio::test]
async fn unparseable_rows_fail_at_the_chart_stage() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let fakes = Fakes::with_generator(FakeGenerator::default());
    let csv = "\
name,birth_date,hour,minute,sex
A,1990-05-15,14,30,male
B,1990-02-30,8,0,female
C,1992-04-21,9,0,female
";

    let summary = run_batch(&config, &fakes, "run1", csv).await;
    assert_eq!((summary.succeeded, summary.failed), (2, 1));

    let rows = report_rows(dir.path(), "run1");
    assert_eq!(rows[1].failed_stage, Some(Stage::Chart));
    assert!(!rows[1].defect);

    let chart_failures: Vec<StageOutcome> = ledger(dir.path())
        .into_iter()
        .filter(|o| o.stage == Stage::Chart && o.status == StageStatus::Failed)
        .collect();
    assert_eq!(chart_failures.len(), 1);
}

#[tokio::test]
async fn interrupted_batch_keeps_artifacts_and_resumes() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.max_concurrent_subjects = 2;
    let csv = "name,birth_date,hour,minute,sex\nA,1990-05-15,14,30,male\nB,1985-11-03,8,10,female\n";

    logging::init();
    let stuck = Fakes::with_generator(FakeGenerator {
        hang: true,
        ..FakeGenerator::default()
    });
    let writer = Arc::new(ReportWriter::open(dir.path(), "run1").await.unwrap());
    let orchestrator = BatchOrchestrator::new(&config, engine(), stuck.collaborators(), writer);
    let summary = orchestrator
        .run_until(
            parse_csv(csv).unwrap(),
            tokio::time::sleep(Duration::from_millis(300)),
        )
        .await
        .unwrap();

    assert_eq!(summary.interrupted, 2);
    let rows = report_rows(dir.path(), "run1");
    assert!(rows.iter().all(|r| r.final_state == "images_generated"));
    assert!(dir.path().join("A_19900515_1430/chart.json").is_file());
    drop(orchestrator);

    let resumed = Fakes::with_generator(FakeGenerator::default());
    let summary = run_batch(&config, &resumed, "run2", csv).await;
    assert_eq!(summary.succeeded, 2);
    assert_eq!(resumed.renderer.calls.load(SeqCst), 0);
    assert_eq!(resumed.generator.calls.load(SeqCst), 30);
}

#[tokio::test]
async fn missing_credentials_halt_before_any_subject() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out");
    let config = Config {
        output_dir: output.display().to_string(),
        run_log_file: dir.path().join("run.log").display().to_string(),
        llm_api_key: String::new(),
        ..Config::default()
    };

    let err = match App::initialize(config).await {
        Ok(_) => panic!("initialization should fail without an API key"),
        Err(e) => e,
    };
    assert!(err.to_string().contains("LLM_API_KEY"));
    assert!(!output.exists());
    assert!(!dir.path().join("run.log").exists());
}
