//! HTML 打印机 - 基础设施层
//!
//! 持有唯一的浏览器资源，只暴露"把本地 HTML 变成 PNG / PDF"的能力。
//! 不认识命盘或章节，调用方负责生成 HTML 并写盘。

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use chromiumoxide::cdp::browser_protocol::page::{CaptureScreenshotFormat, PrintToPdfParams};
use chromiumoxide::{Browser, Page};
use reqwest::Url;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::browser::launch_headless_browser;

/// HTML 打印机
pub struct HtmlPrinter {
    browser: Browser,
    events: JoinHandle<()>,
}

impl HtmlPrinter {
    /// 启动浏览器
    pub async fn launch(chrome_executable: Option<&Path>) -> Result<Self> {
        let (browser, events) = launch_headless_browser(chrome_executable).await?;
        Ok(Self { browser, events })
    }

    /// 打开本地 HTML 文件
    async fn open(&self, html_path: &Path) -> Result<Page> {
        let absolute = tokio::fs::canonicalize(html_path)
            .await
            .with_context(|| format!("找不到 HTML 文件: {}", html_path.display()))?;
        let url = file_url(&absolute)?;
        debug!("打开页面: {}", url);

        let page = self
            .browser
            .new_page(url.as_str())
            .await
            .with_context(|| format!("创建页面失败: {}", url))?;
        page.wait_for_navigation().await?;
        Ok(page)
    }

    /// 截取页面中某个元素，返回 PNG 字节
    ///
    /// # 参数
    /// - `html_path`: 本地 HTML 文件
    /// - `selector`: 要截图的元素（CSS 选择器）
    pub async fn capture_element(&self, html_path: &Path, selector: &str) -> Result<Vec<u8>> {
        let page = self.open(html_path).await?;
        let result = async {
            let element = page
                .find_element(selector)
                .await
                .with_context(|| format!("页面中没有元素 {}", selector))?;
            let bytes = element.screenshot(CaptureScreenshotFormat::Png).await?;
            Ok::<_, anyhow::Error>(bytes)
        }
        .await;
        let _ = page.close().await;
        result
    }

    /// 打印整页为 PDF（A4，保留背景色），返回 PDF 字节
    pub async fn print_pdf(&self, html_path: &Path) -> Result<Vec<u8>> {
        let page = self.open(html_path).await?;
        let params = PrintToPdfParams {
            print_background: Some(true),
            prefer_css_page_size: Some(true),
            paper_width: Some(8.27),
            paper_height: Some(11.69),
            ..Default::default()
        };
        let result = page.pdf(params).await.context("打印 PDF 失败");
        let _ = page.close().await;
        result
    }

    /// 关闭浏览器
    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            debug!("关闭浏览器时出错: {}", e);
        }
        let _ = self.browser.wait().await;
        self.events.abort();
    }
}

/// 本地绝对路径 → file:// URL
fn file_url(path: &Path) -> Result<Url> {
    Url::from_file_path(path).map_err(|()| anyhow!("不是绝对路径: {}", path.display()))
}
