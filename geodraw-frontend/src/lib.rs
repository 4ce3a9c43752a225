pub mod cli;
pub mod errors;
pub mod loader;

use std::path::Path;

use errors::FrontendError;
use geodraw_config::AppConfig;
use tracing::info;

pub use cli::Summary;

/// 在无界面场景中运行脚本演示。未指定脚本时使用内置示例。
pub fn run_cli_demo(config: &AppConfig, script: Option<&Path>) -> Result<Summary, FrontendError> {
    info!("启动 CLI 演示前端");
    cli::run_demo(config, script)
}
