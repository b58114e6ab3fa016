// 配置管理模块

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::fs;
use crate::error::{AppError, AppResult};
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use tracing::{info, warn};

static CONFIG: OnceCell<RwLock<AppConfig>> = OnceCell::new();

/// 应用数据目录名
const APP_DIR_NAME: &str = "yolo-runner";

/// 日志级别
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// 转换为 tracing 过滤器字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// 检测会话默认参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionDefaults {
    /// 权重文件名或路径
    pub weights: String,
    /// 置信度阈值 (0.0 - 1.0)
    pub confidence_threshold: f32,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            weights: "yolov5m.pt".to_string(),
            confidence_threshold: 0.7,
        }
    }
}

/// 外部检测工具包配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolkitConfig {
    /// 仓库地址
    pub repo_url: String,
    /// 检出目录（相对于工作目录）
    pub checkout_dir: String,
    /// Python 解释器
    pub python: String,
    /// 需要预先安装的 pip 包
    pub packages: Vec<String>,
    /// 是否安装工具包自带的 requirements.txt
    pub install_requirements: bool,
}

fn default_python() -> String {
    if cfg!(target_os = "windows") {
        "python".to_string()
    } else {
        "python3".to_string()
    }
}

fn default_packages() -> Vec<String> {
    vec![
        "tensorflow".to_string(),
        "tensorboard".to_string(),
        "torch".to_string(),
    ]
}

impl Default for ToolkitConfig {
    fn default() -> Self {
        Self {
            repo_url: "https://github.com/ultralytics/yolov5".to_string(),
            checkout_dir: "yolov5".to_string(),
            python: default_python(),
            packages: default_packages(),
            install_requirements: true,
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// 会话默认参数
    #[serde(default)]
    pub session: SessionDefaults,
    /// 工具包配置
    #[serde(default)]
    pub toolkit: ToolkitConfig,
    /// 日志级别
    #[serde(default)]
    pub log_level: LogLevel,
}

/// 默认数据目录（日志和配置文件所在位置）
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .unwrap_or_else(|| {
            std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join(".yolo-runner")
        })
}

/// 读取到的配置
///
/// 读取发生在日志初始化之前，解析失败的原因留给调用方在日志就绪后记录。
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: AppConfig,
    /// 配置文件解析失败、回退到默认配置的原因
    pub fallback_reason: Option<String>,
}

impl LoadedConfig {
    /// 记录读取结果，需在日志初始化之后调用
    pub fn report(&self, config_path: &Path) {
        match self.fallback_reason {
            Some(ref reason) => warn!(
                "[CONFIG] 配置文件 JSON 解析失败: {}，使用默认配置 ({})",
                reason,
                config_path.display()
            ),
            None => info!("[CONFIG] 配置已加载: {}", config_path.display()),
        }
    }
}

/// 读取配置文件；不存在时写入默认配置，解析失败时回退到默认配置
pub fn load_config(config_path: &Path) -> AppResult<LoadedConfig> {
    if config_path.exists() {
        let content = fs::read_to_string(config_path)?;
        Ok(match serde_json::from_str(&content) {
            Ok(config) => LoadedConfig { config, fallback_reason: None },
            Err(e) => LoadedConfig {
                config: AppConfig::default(),
                fallback_reason: Some(e.to_string()),
            },
        })
    } else {
        let config = AppConfig::default();
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(config_path, serde_json::to_string_pretty(&config)?)?;
        Ok(LoadedConfig { config, fallback_reason: None })
    }
}

/// 初始化全局配置，只能调用一次
pub fn init_config(config: AppConfig) -> AppResult<()> {
    CONFIG.set(RwLock::new(config))
        .map_err(|_| AppError::Config("配置已初始化".to_string()))?;

    Ok(())
}

/// 获取配置
pub fn get_config() -> AppConfig {
    CONFIG.get()
        .map(|c| c.read().clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_writes_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = load_config(&path).unwrap().config;
        assert_eq!(config.session.weights, "yolov5m.pt");
        assert!((config.session.confidence_threshold - 0.7).abs() < f32::EPSILON);
        assert!(path.exists());

        let reloaded = load_config(&path).unwrap().config;
        assert_eq!(reloaded.toolkit.checkout_dir, "yolov5");
    }

    #[test]
    fn test_load_malformed_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let loaded = load_config(&path).unwrap();
        assert!(loaded.fallback_reason.is_some());
        assert_eq!(loaded.config.log_level, LogLevel::Info);
        assert_eq!(loaded.config.toolkit.packages.len(), 3);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "log_level": "debug" }"#).unwrap();

        let config = load_config(&path).unwrap().config;
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.toolkit.repo_url, "https://github.com/ultralytics/yolov5");
    }

    #[test]
    fn test_init_config_uses_loaded_value_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "session": { "confidence_threshold": 0.25 } }"#).unwrap();

        let loaded = load_config(&path).unwrap();
        assert!(loaded.fallback_reason.is_none());
        init_config(loaded.config.clone()).unwrap();

        let current = get_config();
        assert!((current.session.confidence_threshold - 0.25).abs() < f32::EPSILON);
        assert_eq!(current.session.weights, "yolov5m.pt");
        assert!(init_config(loaded.config).is_err());
    }
}
