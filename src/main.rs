use anyhow::Result;
use saju_report::utils::logging;
use saju_report::{App, AppError, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    logging::init();

    // 加载配置（第一个命令行参数覆盖输入文件路径）
    let mut config = Config::load().map_err(AppError::from)?;
    if let Some(input) = std::env::args().nth(1) {
        config.input_path = input;
    }

    // 初始化并运行应用
    let summary = App::initialize(config).await?.run().await?;

    if summary.failed > 0 || summary.interrupted > 0 {
        std::process::exit(1);
    }
    Ok(())
}
