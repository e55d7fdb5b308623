//! 文档组装服务 - 业务能力层
//!
//! 封面 + 图表 + 15 个章节 → 单个 HTML → 浏览器打印为 PDF。
//! 章节正文是生成接口返回的 Markdown，这里只转换常用的几种写法。

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{AssemblyInput, DocumentAssembler};
use crate::error::StageError;
use crate::infrastructure::HtmlPrinter;

const DOCUMENT_FILE: &str = "report.html";

const STYLE: &str = r#"
@page { size: A4; margin: 18mm 16mm; }
body { font-family: 'Noto Serif KR', 'Noto Sans KR', serif; font-size: 11pt; line-height: 1.75; color: #2b2b2b; }
.cover { height: 250mm; display: flex; flex-direction: column; justify-content: center; align-items: center; page-break-after: always; }
.cover h1 { font-size: 30pt; margin: 0 0 8mm 0; letter-spacing: 2px; }
.cover .meta { font-size: 12pt; color: #5a5a5a; text-align: center; }
.toc { page-break-after: always; }
.toc li { margin: 2mm 0; }
.charts { page-break-after: always; text-align: center; }
.charts img { max-width: 100%; margin: 4mm 0; }
.chapter { page-break-before: always; }
.chapter h2 { border-bottom: 2px solid #8a6d3b; padding-bottom: 2mm; }
"#;

/// 基于无头浏览器的 PDF 组装
pub struct HtmlDocumentAssembler {
    printer: Arc<HtmlPrinter>,
}

impl HtmlDocumentAssembler {
    pub fn new(printer: Arc<HtmlPrinter>) -> Self {
        Self { printer }
    }
}

#[async_trait]
impl DocumentAssembler for HtmlDocumentAssembler {
    async fn assemble(&self, input: AssemblyInput<'_>) -> Result<Vec<u8>, StageError> {
        let html = build_document(&input);
        let html_path = input.work_dir.join(DOCUMENT_FILE);
        tokio::fs::write(&html_path, html)
            .await
            .map_err(|e| StageError::artifact(html_path.display().to_string(), e))?;

        let pdf = self
            .printer
            .print_pdf(&html_path)
            .await
            .map_err(|e| StageError::assembly(format!("{:#}", e)))?;
        debug!("[{}] PDF 生成完成 ({} 字节)", input.subject.id, pdf.len());

        let _ = tokio::fs::remove_file(&html_path).await;
        if pdf.is_empty() {
            return Err(StageError::assembly("浏览器返回了空的 PDF"));
        }
        Ok(pdf)
    }
}

/// 拼装完整的报告 HTML
///
/// 图片路径相对于 `work_dir`（即对象目录）。
pub fn build_document(input: &AssemblyInput<'_>) -> String {
    let subject = input.subject;
    let mut body = String::new();

    body.push_str(&format!(
        "<section class=\"cover\"><h1>{}년 사주 리포트</h1><div class=\"meta\">\
         <p>{} 님</p><p>양력 {} · 음력 {}</p><p>{}</p></div></section>\n",
        subject.report_year,
        escape_html(subject.name()),
        subject.resolved,
        subject.lunar,
        subject.pillars.as_array().map(|p| p.hanja()).join(" "),
    ));

    body.push_str("<section class=\"toc\"><h2>목차</h2><ol>");
    for (chapter, _) in input.chapters {
        body.push_str(&format!("<li>{}</li>", escape_html(chapter.title)));
    }
    body.push_str("</ol></section>\n");

    if !input.images.images.is_empty() {
        body.push_str("<section class=\"charts\">");
        for image in &input.images.images {
            body.push_str(&format!(
                "<img alt=\"{}\" src=\"{}\">",
                image.kind,
                image.path.to_string_lossy().replace('\\', "/")
            ));
        }
        body.push_str("</section>\n");
    }

    for (chapter, text) in input.chapters {
        body.push_str(&format!(
            "<section class=\"chapter\"><h2>{}</h2>\n{}</section>\n",
            escape_html(&chapter.heading()),
            markdown_to_html(text)
        ));
    }

    format!(
        "<!DOCTYPE html>\n<html lang=\"ko\"><head><meta charset=\"UTF-8\"><title>{}</title><style>{}</style></head>\
         <body>\n{}</body></html>\n",
        escape_html(subject.name()),
        STYLE,
        body
    )
}

pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// `**粗体**` → `<strong>`
fn inline(text: &str) -> String {
    let escaped = escape_html(text);
    let mut out = String::with_capacity(escaped.len());
    let mut open = false;
    let mut parts = escaped.split("**").peekable();
    while let Some(part) = parts.next() {
        out.push_str(part);
        if parts.peek().is_some() {
            out.push_str(if open { "</strong>" } else { "<strong>" });
            open = !open;
        }
    }
    if open {
        out.push_str("</strong>");
    }
    out
}

/// 极简 Markdown：标题、列表、段落、粗体
pub fn markdown_to_html(markdown: &str) -> String {
    let mut out = String::new();
    let mut paragraph: Vec<&str> = Vec::new();
    let mut in_list = false;

    fn flush(out: &mut String, paragraph: &mut Vec<&str>) {
        if !paragraph.is_empty() {
            out.push_str(&format!("<p>{}</p>\n", inline(&paragraph.join(" "))));
            paragraph.clear();
        }
    }

    for line in markdown.lines().map(str::trim) {
        let item = line.strip_prefix("- ").or_else(|| line.strip_prefix("* "));
        if item.is_none() && in_list {
            out.push_str("</ul>\n");
            in_list = false;
        }

        if line.is_empty() {
            flush(&mut out, &mut paragraph);
        } else if let Some(item) = item {
            flush(&mut out, &mut paragraph);
            if !in_list {
                out.push_str("<ul>\n");
                in_list = true;
            }
            out.push_str(&format!("<li>{}</li>\n", inline(item)));
        } else if line.starts_with('#') {
            flush(&mut out, &mut paragraph);
            let level = line.chars().take_while(|c| *c == '#').count().min(3);
            let text = line.trim_start_matches('#').trim();
            // 章节标题是 h2，正文里的标题往下降一级
            let tag = level + 2;
            out.push_str(&format!("<h{tag}>{}</h{tag}>\n", inline(text)));
        } else {
            paragraph.push(line);
        }
    }

    flush(&mut out, &mut paragraph);
    if in_list {
        out.push_str("</ul>\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_common_markdown() {
        let html = markdown_to_html(
            "## 타고난 성향\n\n당신은 **경금** 일간입니다.\n이어지는 문장.\n\n- 첫째\n- 둘째\n\n끝.",
        );
        assert_eq!(
            html,
            "<h4>타고난 성향</h4>\n\
             <p>당신은 <strong>경금</strong> 일간입니다. 이어지는 문장.</p>\n\
             <ul>\n<li>첫째</li>\n<li>둘째</li>\n</ul>\n\
             <p>끝.</p>\n"
        );
    }

    #[test]
    fn generated_text_cannot_inject_markup() {
        let html = markdown_to_html("<script>alert(1)</script> & **굵게");
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(html.contains("&amp;"));
        assert!(html.ends_with("</strong></p>\n"));
    }
}
