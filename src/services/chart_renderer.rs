//! 图表渲染服务 - 业务能力层
//!
//! 把命盘画成 HTML 表格，再用无头浏览器截图成 PNG。

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{ChartRenderer, RenderedImage};
use crate::error::StageError;
use crate::infrastructure::HtmlPrinter;
use crate::models::subject::SubjectRecord;
use crate::saju::{Element, Pillar};

const CHART_SELECTOR: &str = "#chart";

const STYLE: &str = r#"
body { margin: 0; padding: 24px; background: #ffffff; font-family: 'Noto Sans KR', 'Malgun Gothic', sans-serif; }
#chart { display: inline-block; padding: 16px; border: 1px solid #d8d2c4; background: #fbf8f1; }
h2 { margin: 0 0 12px 0; font-size: 20px; color: #3b3326; }
table { border-collapse: collapse; }
th, td { border: 1px solid #d8d2c4; padding: 8px 12px; text-align: center; }
th { background: #efe8d8; font-weight: 600; }
.hanja { font-size: 28px; }
.hangul { font-size: 13px; color: #6b5f4b; }
.bar { height: 18px; display: inline-block; }
.wood { background: #4f9d69; color: #fff; }
.fire { background: #d9534f; color: #fff; }
.earth { background: #c8a24a; color: #fff; }
.metal { background: #9aa0a6; color: #fff; }
.water { background: #2f4b7c; color: #fff; }
"#;

fn element_class(element: Element) -> &'static str {
    match element {
        Element::Wood => "wood",
        Element::Fire => "fire",
        Element::Earth => "earth",
        Element::Metal => "metal",
        Element::Water => "water",
    }
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"ko\"><head><meta charset=\"UTF-8\"><style>{}</style></head>\
         <body><div id=\"chart\"><h2>{}</h2>{}</div></body></html>\n",
        STYLE, title, body
    )
}

/// 一柱两格（天干、地支），按五行上色
fn pillar_cells(pillar: Pillar) -> (String, String) {
    let stem = pillar.stem();
    let branch = pillar.branch();
    (
        format!(
            "<td class=\"{}\"><div class=\"hanja\">{}</div><div>{}</div></td>",
            element_class(stem.element()),
            stem.hanja(),
            stem.hangul()
        ),
        format!(
            "<td class=\"{}\"><div class=\"hanja\">{}</div><div>{}</div></td>",
            element_class(branch.element()),
            branch.hanja(),
            branch.hangul()
        ),
    )
}

/// 一行柱（天干行 + 地支行）的表格
fn pillar_table(headers: &[String], pillars: &[Pillar]) -> String {
    let head: String = headers.iter().map(|h| format!("<th>{}</th>", h)).collect();
    let (stems, branches): (Vec<String>, Vec<String>) =
        pillars.iter().map(|p| pillar_cells(*p)).unzip();
    format!(
        "<table><tr>{}</tr><tr>{}</tr><tr>{}</tr></table>",
        head,
        stems.concat(),
        branches.concat()
    )
}

/// 四柱表（按传统从右到左：时 日 月 年）
pub fn four_pillars_html(subject: &SubjectRecord) -> String {
    let p = &subject.pillars;
    let headers = ["시주", "일주", "월주", "연주"].map(String::from);
    let body = format!(
        "{}<p class=\"hangul\">{} · {} · 양력 {} · 음력 {}</p>",
        pillar_table(&headers, &[p.hour, p.day, p.month, p.year]),
        subject.name(),
        subject.intake.sex.label(),
        subject.resolved,
        subject.lunar
    );
    page("사주 원국", &body)
}

/// 大运表（从右到左，年龄递增）
pub fn luck_cycle_html(subject: &SubjectRecord) -> String {
    let entries: Vec<_> = subject.luck.pillars.iter().rev().collect();
    let headers: Vec<String> = entries.iter().map(|e| format!("{}세", e.start_age)).collect();
    let pillars: Vec<Pillar> = entries.iter().map(|e| e.pillar).collect();
    let title = format!(
        "대운 ({}, 대운수 {})",
        subject.luck.direction.label(),
        subject.luck.start_age
    );
    page(&title, &pillar_table(&headers, &pillars))
}

/// 岁运表
pub fn annual_flow_html(subject: &SubjectRecord) -> String {
    let headers: Vec<String> = subject.annual.iter().map(|f| format!("{}년", f.year)).collect();
    let pillars: Vec<Pillar> = subject.annual.iter().map(|f| f.pillar).collect();
    page("세운", &pillar_table(&headers, &pillars))
}

/// 月运表
pub fn monthly_flow_html(subject: &SubjectRecord) -> String {
    let headers: Vec<String> = subject
        .monthly
        .iter()
        .map(|m| format!("{}<br>{}", m.term, m.starts_at.format("%m/%d")))
        .collect();
    let pillars: Vec<Pillar> = subject.monthly.iter().map(|m| m.pillar).collect();
    page(&format!("{}년 월운", subject.report_year), &pillar_table(&headers, &pillars))
}

/// 五行分布条形图
pub fn five_elements_html(subject: &SubjectRecord) -> String {
    let rows: String = Element::ALL
        .iter()
        .map(|e| {
            let count = subject.elements.get(*e);
            format!(
                "<tr><th>{}({})</th><td style=\"text-align:left;width:320px\">\
                 <span class=\"bar {}\" style=\"width:{}px\"></span> {}</td></tr>",
                e.hangul(),
                e.hanja(),
                element_class(*e),
                count as u32 * 40,
                count
            )
        })
        .collect();
    page("오행 분포", &format!("<table>{}</table>", rows))
}

/// 十神 / 藏干 / 十二运星表（列顺序与四柱表一致）
pub fn ten_gods_html(subject: &SubjectRecord) -> String {
    let p = &subject.pillars;
    let r = subject.relations.right_to_left();
    let row = |label: &str, cells: Vec<String>| -> String {
        let tds: String = cells.iter().map(|c| format!("<td>{}</td>", c)).collect();
        format!("<tr><th>{}</th>{}</tr>", label, tds)
    };
    let (stems, branches): (Vec<String>, Vec<String>) =
        [p.hour, p.day, p.month, p.year].iter().map(|x| pillar_cells(*x)).unzip();

    let stem_gods = r
        .iter()
        .map(|x| x.stem_god.map_or("일간".to_string(), |g| g.hangul().to_string()))
        .collect();
    let branch_gods = r.iter().map(|x| x.branch_god.hangul().to_string()).collect();
    let hidden = r
        .iter()
        .map(|x| {
            x.hidden
                .iter()
                .map(|h| {
                    format!(
                        "{}<span class=\"hangul\">{}</span>",
                        h.stem.hanja(),
                        h.god.hangul()
                    )
                })
                .collect::<Vec<_>>()
                .join("<br>")
        })
        .collect();
    let stages = r
        .iter()
        .map(|x| {
            format!(
                "{}<br><span class=\"hangul\">{}</span>",
                x.stage.hangul(),
                x.stage.hanja()
            )
        })
        .collect();

    let void = &subject.relations.day_void;
    let body = format!(
        "<table><tr><th></th><th>시주</th><th>일주</th><th>월주</th><th>연주</th></tr>\
         {}<tr><th>천간</th>{}</tr><tr><th>지지</th>{}</tr>{}{}{}</table>\
         <p class=\"hangul\">공망(일주): {}{} ({}{})</p>",
        row("십성", stem_gods),
        stems.concat(),
        branches.concat(),
        row("지지 십성", branch_gods),
        row("지장간", hidden),
        row("12운성", stages),
        void[0].hanja(),
        void[1].hanja(),
        void[0].hangul(),
        void[1].hangul()
    );
    page("십성 · 지장간 · 12운성", &body)
}

/// 全部图表页面：(种类, HTML)
pub fn chart_pages(subject: &SubjectRecord) -> Vec<(&'static str, String)> {
    vec![
        ("four_pillars", four_pillars_html(subject)),
        ("luck_cycle", luck_cycle_html(subject)),
        ("annual_flow", annual_flow_html(subject)),
        ("monthly_flow", monthly_flow_html(subject)),
        ("five_elements", five_elements_html(subject)),
        ("ten_gods", ten_gods_html(subject)),
    ]
}

/// 基于无头浏览器的图表渲染
pub struct HtmlChartRenderer {
    printer: Arc<HtmlPrinter>,
}

impl HtmlChartRenderer {
    pub fn new(printer: Arc<HtmlPrinter>) -> Self {
        Self { printer }
    }
}

#[async_trait]
impl ChartRenderer for HtmlChartRenderer {
    async fn render(
        &self,
        subject: &SubjectRecord,
        work_dir: &Path,
    ) -> Result<Vec<RenderedImage>, StageError> {
        tokio::fs::create_dir_all(work_dir)
            .await
            .map_err(|e| StageError::artifact(work_dir.display().to_string(), e))?;

        let mut images = Vec::new();
        for (kind, html) in chart_pages(subject) {
            let html_path = work_dir.join(format!("{}.html", kind));
            tokio::fs::write(&html_path, html)
                .await
                .map_err(|e| StageError::artifact(html_path.display().to_string(), e))?;

            let png = self
                .printer
                .capture_element(&html_path, CHART_SELECTOR)
                .await
                .map_err(|e| StageError::render(format!("{}: {:#}", kind, e)))?;
            debug!("[{}] 图表 {} 渲染完成 ({} 字节)", subject.id, kind, png.len());

            let _ = tokio::fs::remove_file(&html_path).await;
            images.push(RenderedImage {
                kind: kind.to_string(),
                file_name: format!("{}.png", kind),
                png,
            });
        }

        Ok(images)
    }
}
