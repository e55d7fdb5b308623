use std::path::Path;

use anyhow::Result;
use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info};

/// 启动无头浏览器
///
/// # 参数
/// - `chrome_executable`: 浏览器可执行文件；为 None 时由 chromiumoxide 自动查找
///
/// # 返回
/// 返回浏览器实例和后台事件处理任务
pub async fn launch_headless_browser(
    chrome_executable: Option<&Path>,
) -> Result<(Browser, JoinHandle<()>)> {
    info!("🚀 启动无头浏览器...");

    let mut builder = BrowserConfig::builder().new_headless_mode().args(vec![
        "--disable-gpu",             // 无头模式禁用 GPU
        "--no-sandbox",              // 容器内没有沙盒权限
        "--disable-dev-shm-usage",   // 防止共享内存不足
        "--allow-file-access-from-files", // 报告页面引用本地图片
        "--remote-debugging-port=0", // 自动选择端口
    ]);
    if let Some(path) = chrome_executable {
        debug!("浏览器路径: {}", path.display());
        builder = builder.chrome_executable(path);
    }

    let config = builder.build().map_err(|e| {
        error!("配置无头浏览器失败: {}", e);
        anyhow::anyhow!("配置无头浏览器失败: {}", e)
    })?;

    let (browser, mut handler) = Browser::launch(config).await.map_err(|e| {
        error!("启动无头浏览器失败: {}", e);
        anyhow::anyhow!("启动无头浏览器失败: {}", e)
    })?;

    // 在后台处理浏览器事件
    let events = tokio::spawn(async move {
        while let Some(h) = handler.next().await {
            if h.is_err() {
                break;
            }
        }
    });

    // 等待浏览器状态同步
    sleep(tokio::time::Duration::from_millis(300)).await;

    info!("✅ 无头浏览器已启动");
    Ok((browser, events))
}
