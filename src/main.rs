// YoloRunner - YOLOv5 目标检测命令行封装
// 主入口文件

mod catalog;
mod config;
mod console;
mod detection;
mod error;
mod locator;
mod logging;
mod menu;
mod models;
mod runner;
mod utils;

use clap::{Parser, Subcommand};
use console::{rule, Console, TerminalConsole};
use detection::{DetectionRequest, DetectionSession, SessionConfig, Source};
use error::AppResult;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "yolo-runner")]
#[command(about = "YOLOv5 目标检测命令行封装：自动准备环境并调用 detect.py", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// 配置文件路径
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// 模型权重 (yolov5n/s/m/l/x.pt 或自定义权重路径)
    #[arg(long, short, global = true)]
    weights: Option<String>,

    /// 置信度阈值 (0-1)
    #[arg(long = "conf", global = true)]
    confidence: Option<f32>,

    /// 工具包检出所在目录，默认为当前目录
    #[arg(long, global = true)]
    workdir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// 交互式菜单（默认）
    Menu,

    /// 安装依赖并下载 YOLOv5
    Setup,

    /// 图片目标检测
    Image {
        path: PathBuf,

        /// 类别过滤，逗号分隔，例如 0,2
        #[arg(long)]
        classes: Option<String>,

        /// 结果输出目录
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// 检测前先执行完整的环境准备
        #[arg(long)]
        setup: bool,
    },

    /// 视频目标检测
    Video {
        path: PathBuf,

        #[arg(long)]
        classes: Option<String>,

        #[arg(long, short)]
        output: Option<PathBuf>,

        #[arg(long)]
        setup: bool,
    },

    /// 摄像头实时检测，在预览窗口按 q 退出
    Camera {
        /// 摄像头编号
        #[arg(long, short, default_value = "0")]
        index: u32,

        #[arg(long)]
        classes: Option<String>,

        #[arg(long)]
        setup: bool,
    },

    /// 显示可检测的类别
    Classes,

    /// 显示可用的预训练权重
    Weights,
}

fn print_banner(console: &mut TerminalConsole) {
    console.print(&format!("╔{}╗", "═".repeat(78)));
    console.print(&format!("║{:^78}║", "YOLOv5 Object Detector"));
    console.print(&format!("╚{}╝", "═".repeat(78)));
}

/// 解析命令行中的类别过滤参数
fn parse_classes(raw: Option<&str>) -> AppResult<Option<Vec<u16>>> {
    raw.map(catalog::parse_class_filter).transpose()
}

fn build_session(cli: &Cli) -> AppResult<DetectionSession> {
    let app_config = config::get_config();
    let weights = cli.weights.clone().unwrap_or(app_config.session.weights);
    let confidence = cli.confidence.unwrap_or(app_config.session.confidence_threshold);
    let session_config = SessionConfig::new(weights, confidence)?;

    let base_dir = match cli.workdir {
        Some(ref dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    info!("[MAIN] 工作目录: {}", base_dir.display());

    Ok(DetectionSession::with_system(session_config, app_config.toolkit, base_dir))
}

/// 单次检测命令：按需执行环境准备，否则直接使用已有工具包
fn run_detection(
    session: &mut DetectionSession,
    request: DetectionRequest,
    setup: bool,
) -> bool {
    let ready = if setup {
        session.prepare_environment()
    } else {
        session.attach_toolkit()
    };
    ready && session.detect(&request).is_some()
}

fn run(mut cli: Cli) -> AppResult<bool> {
    let command = cli.command.take().unwrap_or(Commands::Menu);
    let mut term = TerminalConsole;

    match &command {
        Commands::Classes => {
            menu::print_classes(&mut term);
            return Ok(true);
        }
        Commands::Weights => {
            term.print(&rule());
            term.print(models::format_weights_table().trim_end());
            term.print(&rule());
            return Ok(true);
        }
        _ => {}
    }

    let mut session = build_session(&cli)?;

    let ok = match command {
        Commands::Menu => {
            print_banner(&mut term);
            if !session.prepare_environment() {
                term.error("环境准备失败");
                return Ok(false);
            }
            menu::print_classes(session.console_mut());
            menu::run_menu(&mut session)?;
            true
        }
        Commands::Setup => session.prepare_environment(),
        Commands::Image { path, classes, output, setup } => {
            let request = DetectionRequest::new(Source::Image(path))
                .with_classes(parse_classes(classes.as_deref())?.as_deref())
                .with_output_dir(output);
            run_detection(&mut session, request, setup)
        }
        Commands::Video { path, classes, output, setup } => {
            let request = DetectionRequest::new(Source::Video(path))
                .with_classes(parse_classes(classes.as_deref())?.as_deref())
                .with_output_dir(output);
            run_detection(&mut session, request, setup)
        }
        Commands::Camera { index, classes, setup } => {
            let request = DetectionRequest::new(Source::Camera(index))
                .with_classes(parse_classes(classes.as_deref())?.as_deref());
            run_detection(&mut session, request, setup)
        }
        Commands::Classes | Commands::Weights => true,
    };
    Ok(ok)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let data_dir = config::default_data_dir();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| data_dir.join("config.json"));

    // 配置只读取一次：先取日志级别初始化日志，再写入全局配置
    let loaded = config::load_config(&config_path);
    let log_level = loaded
        .as_ref()
        .map(|l| l.config.log_level.clone())
        .unwrap_or_default();
    let _log_guard = logging::init_logging(&data_dir, &log_level);

    info!("YoloRunner 启动中...");

    let app_config = match loaded {
        Ok(loaded) => {
            loaded.report(&config_path);
            loaded.config
        }
        Err(e) => {
            error!("配置读取失败: {}", e);
            eprintln!("✗ 配置读取失败: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = config::init_config(app_config) {
        error!("配置初始化失败: {}", e);
        eprintln!("✗ 配置初始化失败: {}", e);
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("运行失败: {}", e);
            eprintln!("✗ {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parses_image_command() {
        let cli = Cli::parse_from([
            "yolo-runner", "--conf", "0.4", "image", "a.jpg", "--classes", "0,2",
        ]);
        assert_eq!(cli.confidence, Some(0.4));
        match cli.command {
            Some(Commands::Image { path, classes, output, setup }) => {
                assert_eq!(path, PathBuf::from("a.jpg"));
                assert_eq!(classes.as_deref(), Some("0,2"));
                assert!(output.is_none());
                assert!(!setup);
            }
            _ => panic!("expected image command"),
        }
    }

    #[test]
    fn test_parse_classes_argument() {
        assert_eq!(parse_classes(None).unwrap(), None);
        assert_eq!(parse_classes(Some("2,0")).unwrap(), Some(vec![2, 0]));
        assert!(parse_classes(Some("x")).is_err());
    }
}
