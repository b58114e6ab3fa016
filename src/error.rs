// 错误处理模块

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON 解析错误: {0}")]
    Json(#[from] serde_json::Error),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("环境准备失败: {0}")]
    Setup(String),

    #[error("外部进程失败: {0}")]
    Process(String),

    #[error("前置条件未满足: {0}")]
    Prerequisite(String),

    #[error("依赖缺失: {0}")]
    DependencyMissing(String),

    #[error("未找到: {0}")]
    NotFound(String),

    #[error("无效参数: {0}")]
    InvalidArgument(String),
}

pub type AppResult<T> = Result<T, AppError>;
