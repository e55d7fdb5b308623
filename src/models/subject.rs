//! 对象记录：输入 + 换算后的日期 + 命盘
//!
//! 排盘阶段结束后不再修改，后续阶段只读。

use std::fmt;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::calendar::{to_lunar, to_solar, CalendarSystem, LunarDate, ResolvedDate};
use crate::error::StageError;
use crate::models::intake::IntakeRecord;
use crate::saju::flow::annual_flow;
use crate::saju::{
    AnnualFlow, ChartRelations, Element, ElementTally, FourPillars, LuckCycle, MonthlyFlow,
    PillarRelations, SexagenaryEngine,
};

/// 对象标识，同时也是输出目录名
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn new(raw: impl Into<String>) -> Self {
        SubjectId(raw.into())
    }

    /// 由姓名 + 出生日期 + 出生时刻生成；农历输入带 `_lunar`（闰月 `_lunar_leap`）后缀
    pub fn from_intake(intake: &IntakeRecord) -> Self {
        let d = intake.birth_date;
        let calendar = match (intake.calendar, intake.is_leap_month) {
            (CalendarSystem::Solar, _) => "",
            (CalendarSystem::Lunar, false) => "_lunar",
            (CalendarSystem::Lunar, true) => "_lunar_leap",
        };
        SubjectId(format!(
            "{}_{:04}{:02}{:02}_{:02}{:02}{}",
            sanitize(&intake.name),
            d.year,
            d.month,
            d.day,
            intake.hour,
            intake.minute,
            calendar
        ))
    }

    /// 第 n 个重复项（n >= 2）
    pub fn duplicate(&self, n: usize) -> Self {
        SubjectId(format!("{}__dup{}", self.0, n))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 只保留字母、数字（含韩文）以及 `-`，其余替换为 `_`
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "subject".to_string()
    } else {
        cleaned
    }
}

/// 完整的对象记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectRecord {
    pub id: SubjectId,
    pub intake: IntakeRecord,
    pub resolved: ResolvedDate,
    pub lunar: LunarDate,
    pub pillars: FourPillars,
    /// 十神、藏干、十二运星、空亡
    pub relations: ChartRelations,
    pub luck: LuckCycle,
    /// 报告针对的年份
    pub report_year: i32,
    /// 韩国式年龄（报告年份 − 出生年份 + 1）
    pub korean_age: i32,
    pub annual: Vec<AnnualFlow>,
    pub monthly: Vec<MonthlyFlow>,
    pub elements: ElementTally,
}

impl SubjectRecord {
    /// 排盘：历法换算 → 四柱 → 大运 → 岁运 / 月运
    ///
    /// # 参数
    /// - `report_year`: 报告年份（岁运、月运从这一年开始）
    /// - `annual_span`: 岁运覆盖的年数
    pub fn compute(
        id: SubjectId,
        intake: IntakeRecord,
        engine: &SexagenaryEngine,
        report_year: i32,
        annual_span: u32,
    ) -> Result<Self, StageError> {
        let resolved = to_solar(
            intake.birth_date,
            intake.hour,
            intake.minute,
            intake.calendar,
            intake.is_leap_month,
        )?;
        let lunar = to_lunar(resolved.date()?)?;
        let pillars = engine.compute_pillars(&resolved)?;
        let luck = engine.compute_luck_cycle(Some(pillars.year), intake.sex, &resolved)?;
        let monthly = engine.monthly_flow(report_year)?;

        Ok(Self {
            id,
            korean_age: report_year - resolved.year() + 1,
            intake,
            resolved,
            lunar,
            relations: ChartRelations::from_pillars(&pillars),
            pillars,
            luck,
            report_year,
            annual: annual_flow(report_year, annual_span),
            monthly,
            elements: ElementTally::from_pillars(&pillars),
        })
    }

    pub fn name(&self) -> &str {
        &self.intake.name
    }

    /// 报告年份所在的大运
    pub fn current_luck_label(&self) -> String {
        match self.luck.pillar_at_age(self.korean_age.max(0) as u32) {
            Some(p) => format!("{} ({}~{}세)", p.pillar, p.start_age, p.end_age()),
            None => "대운 시작 전".to_string(),
        }
    }

    /// 提供给生成接口的命盘摘要（纯文本，输出稳定）
    pub fn to_prompt_text(&self) -> String {
        let mut out = String::new();
        let p = &self.pillars;

        let _ = writeln!(out, "■ 기본 정보");
        let _ = writeln!(out, "이름: {}", self.intake.name);
        let _ = writeln!(out, "성별: {}", self.intake.sex.label());
        let _ = writeln!(out, "나이: {}세 ({}년 기준)", self.korean_age, self.report_year);
        let _ = writeln!(out, "양력: {}", self.resolved);
        let _ = writeln!(out, "음력: {}", self.lunar);
        let _ = writeln!(out);

        let _ = writeln!(out, "■ 사주 원국 (시 / 일 / 월 / 년)");
        let _ = writeln!(
            out,
            "천간: {} {} {} {}",
            p.hour.stem().hanja(),
            p.day.stem().hanja(),
            p.month.stem().hanja(),
            p.year.stem().hanja()
        );
        let _ = writeln!(
            out,
            "지지: {} {} {} {}",
            p.hour.branch().hanja(),
            p.day.branch().hanja(),
            p.month.branch().hanja(),
            p.year.branch().hanja()
        );
        let _ = writeln!(
            out,
            "일간: {}{} ({}{})",
            p.day.stem().hanja(),
            p.day.stem().hangul(),
            p.day.stem().element().hangul(),
            p.day.stem().element().hanja()
        );
        let _ = writeln!(out);

        let r = self.relations.right_to_left();
        let _ = writeln!(out, "■ 십성 · 12운성 · 지장간 (시 / 일 / 월 / 년)");
        let stem_gods: Vec<&str> = r
            .iter()
            .map(|p| p.stem_god.map_or("일간", |g| g.hangul()))
            .collect();
        let _ = writeln!(out, "천간 십성: {}", stem_gods.join(" "));
        let branch_gods: Vec<&str> = r.iter().map(|p| p.branch_god.hangul()).collect();
        let _ = writeln!(out, "지지 십성: {}", branch_gods.join(" "));
        let stages: Vec<&str> = r.iter().map(|p| p.stage.hangul()).collect();
        let _ = writeln!(out, "12운성: {}", stages.join(" "));
        let hidden: Vec<String> = r.iter().map(|p| hidden_label(p)).collect();
        let _ = writeln!(out, "지장간: {}", hidden.join(" / "));
        let _ = writeln!(
            out,
            "공망: {}{} (일주 기준), {}{} (연주 기준)",
            self.relations.day_void[0].hanja(),
            self.relations.day_void[1].hanja(),
            self.relations.year_void[0].hanja(),
            self.relations.year_void[1].hanja()
        );
        let _ = writeln!(out);

        let _ = writeln!(out, "■ 오행 분포");
        let tally: Vec<String> = Element::ALL
            .iter()
            .map(|e| format!("{}({}) {}", e.hangul(), e.hanja(), self.elements.get(*e)))
            .collect();
        let _ = writeln!(out, "{}", tally.join(", "));
        let missing = self.elements.missing();
        if !missing.is_empty() {
            let names: Vec<&str> = missing.iter().map(|e| e.hangul()).collect();
            let _ = writeln!(out, "부족한 오행: {}", names.join(", "));
        }
        let _ = writeln!(out);

        let _ = writeln!(
            out,
            "■ 대운 ({}, 대운수 {})",
            self.luck.direction.label(),
            self.luck.start_age
        );
        for entry in &self.luck.pillars {
            let _ = writeln!(out, "{}세~: {}", entry.start_age, entry.pillar);
        }
        let _ = writeln!(out, "현재 대운: {}", self.current_luck_label());
        let _ = writeln!(out);

        let _ = writeln!(out, "■ 세운");
        for flow in &self.annual {
            let _ = writeln!(out, "{}년: {}", flow.year, flow.pillar);
        }
        let _ = writeln!(out);

        let _ = writeln!(out, "■ {}년 월운", self.report_year);
        for month in &self.monthly {
            let _ = writeln!(
                out,
                "{} ({}~): {}",
                month.term,
                month.starts_at.format("%m-%d"),
                month.pillar
            );
        }

        out
    }
}

/// 藏干连写，例如 `戊庚丙(편인·비견·편관)`
fn hidden_label(relations: &PillarRelations) -> String {
    let stems: String = relations.hidden.iter().map(|h| h.stem.hanja()).collect();
    let gods: Vec<&str> = relations.hidden.iter().map(|h| h.god.hangul()).collect();
    format!("{}({})", stems, gods.join("·"))
}
