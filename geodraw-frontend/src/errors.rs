use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrontendError {
    #[error("读取脚本失败: {path}")]
    ScriptIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("解析脚本失败: {path}")]
    ScriptParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
