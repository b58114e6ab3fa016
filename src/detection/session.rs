// 检测会话
//
// 环境准备流程：
// 1. 升级 pip
// 2. 逐个安装配置中的依赖包（失败只告警）
// 3. 克隆 YOLOv5（已存在时询问是否重新下载）
// 4. 安装工具包的 requirements.txt
//
// 检测流程：校验前置条件 → 校验输入 → 记录已有实验目录 → 调用 detect.py
//          → 定位本次运行新建的实验目录中的结果文件

use crate::catalog;
use crate::config::ToolkitConfig;
use crate::console::{rule, Console, TerminalConsole};
use crate::error::{AppError, AppResult};
use crate::locator::{ArtifactLocator, ExperimentDir, FsArtifactLocator};
use crate::models;
use crate::runner::{CommandRunner, CommandSpec, SystemRunner};
use crate::utils::{absolutize, truncate_diagnostic};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// 诊断输出最多展示的字符数
const MAX_DIAGNOSTIC_CHARS: usize = 500;

/// 工具包入口脚本
const DETECT_SCRIPT: &str = "detect.py";

/// 会话配置，构造后不可变
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    weights: String,
    confidence_threshold: f32,
}

impl SessionConfig {
    /// 校验并创建会话配置，阈值必须在 [0, 1] 内
    pub fn new(weights: impl Into<String>, confidence_threshold: f32) -> AppResult<Self> {
        let weights = weights.into();
        if weights.trim().is_empty() {
            return Err(AppError::InvalidArgument("权重文件不能为空".to_string()));
        }
        if !(0.0..=1.0).contains(&confidence_threshold) {
            return Err(AppError::InvalidArgument(format!(
                "置信度阈值必须在 0 到 1 之间: {}",
                confidence_threshold
            )));
        }
        Ok(Self {
            weights,
            confidence_threshold,
        })
    }

    pub fn weights(&self) -> &str {
        &self.weights
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }
}

/// 检测输入源
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    Image(PathBuf),
    Video(PathBuf),
    Camera(u32),
}

impl Source {
    fn file(&self) -> Option<&Path> {
        match self {
            Source::Image(p) | Source::Video(p) => Some(p),
            Source::Camera(_) => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Source::Image(_) => "图片",
            Source::Video(_) => "视频",
            Source::Camera(_) => "摄像头",
        }
    }
}

/// 一次检测请求
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionRequest {
    pub source: Source,
    /// 类别过滤，None 表示检测全部类别
    pub classes: Option<Vec<u16>>,
    /// 输出目录，None 时使用工具包默认的 runs/detect
    pub output_dir: Option<PathBuf>,
}

impl DetectionRequest {
    pub fn new(source: Source) -> Self {
        Self {
            source,
            classes: None,
            output_dir: None,
        }
    }

    pub fn with_classes(mut self, classes: Option<&[u16]>) -> Self {
        self.classes = classes.map(|c| c.to_vec());
        self
    }

    pub fn with_output_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.output_dir = dir;
        self
    }
}

/// 检测会话
pub struct DetectionSession<R = SystemRunner, L = FsArtifactLocator, C = TerminalConsole> {
    config: SessionConfig,
    toolkit: ToolkitConfig,
    /// 工具包检出目录的基准目录
    base_dir: PathBuf,
    /// 环境准备完成后才有值
    toolkit_path: Option<PathBuf>,
    runner: R,
    locator: L,
    console: C,
}

impl DetectionSession {
    /// 使用真实进程、文件系统和终端的会话
    pub fn with_system(config: SessionConfig, toolkit: ToolkitConfig, base_dir: PathBuf) -> Self {
        Self::new(config, toolkit, base_dir, SystemRunner, FsArtifactLocator, TerminalConsole)
    }
}

impl<R: CommandRunner, L: ArtifactLocator, C: Console> DetectionSession<R, L, C> {
    pub fn new(
        config: SessionConfig,
        toolkit: ToolkitConfig,
        base_dir: PathBuf,
        runner: R,
        locator: L,
        console: C,
    ) -> Self {
        match models::get_weights_by_name(config.weights()) {
            Some(w) => info!("[SESSION] 使用预训练权重: {} ({})", w.name, w.filename),
            None => info!("[SESSION] 使用自定义权重: {}", config.weights()),
        }
        Self {
            config,
            toolkit,
            base_dir,
            toolkit_path: None,
            runner,
            locator,
            console,
        }
    }

    pub fn console_mut(&mut self) -> &mut C {
        &mut self.console
    }

    #[cfg(test)]
    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// 工具包检出目录
    pub fn checkout_path(&self) -> PathBuf {
        absolutize(&self.base_dir, Path::new(&self.toolkit.checkout_dir))
    }

    pub fn is_prepared(&self) -> bool {
        self.toolkit_path.is_some()
    }

    pub fn list_classes(&self) -> Vec<(u16, &'static str)> {
        catalog::list_classes()
    }

    // ========== 环境准备 ==========

    /// 安装依赖并确保工具包存在
    ///
    /// 依赖安装失败只告警；克隆失败或结束时工具包不存在则返回 false。
    pub fn prepare_environment(&mut self) -> bool {
        self.console.print(&format!("\n{}", rule()));
        self.console.print("开始准备 YOLOv5 环境");
        self.console.print(&rule());

        match self.try_prepare() {
            Ok(path) => {
                self.console.print(&format!("\n{}", rule()));
                self.console.success("环境准备完成");
                self.console.success(&format!("YOLOv5 路径: {}", path.display()));
                self.console.print(&rule());
                info!("[SESSION] 环境准备完成: {}", path.display());
                self.toolkit_path = Some(path);
                true
            }
            Err(e) => {
                error!("[SESSION] 环境准备失败: {}", e);
                self.console.error(&e.to_string());
                self.toolkit_path = None;
                false
            }
        }
    }

    fn try_prepare(&mut self) -> AppResult<PathBuf> {
        let packages = self.toolkit.packages.clone();
        let total = packages.len() + 2;

        self.console.print(&format!("\n[1/{}] 升级 pip...", total));
        self.pip_install(&["--upgrade", "pip"], "pip 升级");

        for (i, package) in packages.iter().enumerate() {
            self.console.print(&format!("\n[{}/{}] 安装 {}...", i + 2, total, package));
            self.pip_install(&[package.as_str()], package);
        }

        self.console.print(&format!("\n[{}/{}] 获取 YOLOv5...", total, total));
        let checkout = self.ensure_checkout()?;

        if self.toolkit.install_requirements {
            let requirements = checkout.join("requirements.txt");
            if requirements.exists() {
                self.console.info("安装 requirements.txt...");
                let args = ["-r".to_string(), requirements.to_string_lossy().into_owned()];
                self.pip_install(&args, "requirements.txt");
            } else {
                warn!("[SESSION] 未找到 {}", requirements.display());
            }
        }

        if !checkout.join(DETECT_SCRIPT).exists() {
            return Err(AppError::Setup(format!(
                "工具包不完整，缺少 {}: {}",
                DETECT_SCRIPT,
                checkout.display()
            )));
        }
        Ok(checkout)
    }

    /// pip 安装单个步骤，失败不中断流程
    fn pip_install<S: AsRef<str>>(&mut self, packages: &[S], label: &str) {
        let spec = CommandSpec::new(self.toolkit.python.clone())
            .args(["-m", "pip", "install"])
            .args(packages.iter().map(|p| p.as_ref().to_string()))
            .arg("--quiet")
            .current_dir(self.base_dir.clone());

        match self.runner.run(&spec) {
            Ok(output) if output.success() => {
                info!("[SESSION] {} 成功", label);
                self.console.success(&format!("{} 完成", label));
            }
            Ok(output) => {
                warn!(
                    "[SESSION] {} 失败，退出码 {:?}: {}",
                    label,
                    output.code,
                    truncate_diagnostic(output.diagnostic(), MAX_DIAGNOSTIC_CHARS)
                );
                self.console.warn(&format!("{} 失败（继续执行）", label));
            }
            Err(e) => {
                warn!("[SESSION] {} 无法执行: {}", label, e);
                self.console.warn(&format!("{} 无法执行: {}（继续执行）", label, e));
            }
        }
    }

    /// 确保工具包检出存在；已存在时只有用户明确同意才删除并重新克隆
    fn ensure_checkout(&mut self) -> AppResult<PathBuf> {
        let checkout = self.checkout_path();

        if checkout.exists() {
            self.console.info(&format!("{} 已存在", checkout.display()));
            if !self.console.confirm("是否重新下载?")? {
                info!("[SESSION] 保留已有工具包: {}", checkout.display());
                return Ok(checkout);
            }
            info!("[SESSION] 删除旧工具包并重新克隆: {}", checkout.display());
            std::fs::remove_dir_all(&checkout)?;
        }

        self.clone_toolkit(&checkout)?;
        Ok(checkout)
    }

    fn clone_toolkit(&mut self, checkout: &Path) -> AppResult<()> {
        let spec = CommandSpec::new("git")
            .arg("clone")
            .arg(self.toolkit.repo_url.clone())
            .arg(checkout.to_string_lossy().into_owned())
            .current_dir(self.base_dir.clone());

        let output = self.runner.run(&spec)?;
        if !output.success() {
            return Err(AppError::Setup(format!(
                "克隆 {} 失败: {}",
                self.toolkit.repo_url,
                truncate_diagnostic(output.diagnostic(), MAX_DIAGNOSTIC_CHARS)
            )));
        }
        self.console.success("YOLOv5 下载完成");
        Ok(())
    }

    /// 使用已存在的工具包，不安装任何依赖
    pub fn attach_toolkit(&mut self) -> bool {
        let checkout = self.checkout_path();
        if checkout.join(DETECT_SCRIPT).exists() {
            info!("[SESSION] 使用已有工具包: {}", checkout.display());
            self.toolkit_path = Some(checkout);
            true
        } else {
            warn!("[SESSION] 工具包不存在: {}", checkout.display());
            self.console.error(&format!(
                "未找到 YOLOv5 工具包: {}，请先运行 setup",
                checkout.display()
            ));
            false
        }
    }

    // ========== 检测 ==========

    pub fn run_on_image(&mut self, path: impl AsRef<Path>, classes: Option<&[u16]>) -> Option<PathBuf> {
        let request = DetectionRequest::new(Source::Image(path.as_ref().to_path_buf())).with_classes(classes);
        self.detect(&request)
    }

    pub fn run_on_video(&mut self, path: impl AsRef<Path>, classes: Option<&[u16]>) -> Option<PathBuf> {
        let request = DetectionRequest::new(Source::Video(path.as_ref().to_path_buf())).with_classes(classes);
        self.detect(&request)
    }

    /// 摄像头实时检测，在预览窗口按 q 结束；返回本次运行的实验目录
    pub fn run_on_camera(&mut self, index: u32, classes: Option<&[u16]>) -> Option<PathBuf> {
        let request = DetectionRequest::new(Source::Camera(index)).with_classes(classes);
        self.detect(&request)
    }

    /// 执行一次检测，所有错误都转换为 None 和一条控制台消息
    pub fn detect(&mut self, request: &DetectionRequest) -> Option<PathBuf> {
        match self.try_detect(request) {
            Ok(path) => Some(path),
            Err(e) => {
                error!("[SESSION] {}检测失败: {}", request.source.label(), e);
                self.console.error(&e.to_string());
                None
            }
        }
    }

    fn try_detect(&mut self, request: &DetectionRequest) -> AppResult<PathBuf> {
        let toolkit = self
            .toolkit_path
            .clone()
            .ok_or_else(|| AppError::Prerequisite("请先完成环境准备 (setup)".to_string()))?;

        // 输入文件在启动任何进程之前校验
        let source = match &request.source {
            Source::Image(p) | Source::Video(p) => {
                if !p.exists() {
                    return Err(AppError::NotFound(format!(
                        "{}不存在: {}",
                        request.source.label(),
                        p.display()
                    )));
                }
                let absolute = std::fs::canonicalize(p)?;
                absolute.to_string_lossy().into_owned()
            }
            Source::Camera(index) => index.to_string(),
        };

        let output_dir = match request.output_dir {
            Some(ref dir) => absolutize(&std::env::current_dir()?, dir),
            None => toolkit.join("runs").join("detect"),
        };

        self.print_request_summary(request);
        let baseline = self.experiment_baseline(&output_dir)?;

        let project = request.output_dir.as_ref().map(|_| output_dir.as_path());
        let spec = self.build_detect_command(&toolkit, &source, request.classes.as_deref(), project);
        info!("[SESSION] 检测命令: {}", spec.display());

        match request.source {
            Source::Camera(_) => {
                self.console.info("正在启动摄像头，在预览窗口按 q 退出");
                let exit = self.runner.run_attached(&spec)?;
                if exit.interrupted {
                    info!("[SESSION] 摄像头检测被用户中断");
                    self.console.info("检测已被用户停止");
                } else if exit.success() {
                    self.console.success("检测已停止");
                } else {
                    warn!("[SESSION] 摄像头检测退出码: {:?}", exit.code);
                    // 没有生成新的实验目录时视为运行失败
                    if self.new_experiment(&output_dir, baseline)?.is_none() {
                        return Err(AppError::Process(format!(
                            "{} 退出码 {:?}，没有生成结果",
                            DETECT_SCRIPT, exit.code
                        )));
                    }
                    self.console.warn(&format!("检测进程已退出，退出码 {:?}", exit.code));
                }
            }
            _ => {
                self.console.info("处理中...");
                let output = self.runner.run(&spec)?;
                if !output.success() {
                    return Err(AppError::Process(format!(
                        "{} 退出码 {:?}: {}",
                        DETECT_SCRIPT,
                        output.code,
                        truncate_diagnostic(output.diagnostic(), MAX_DIAGNOSTIC_CHARS)
                    )));
                }
                self.console.success("检测完成");
            }
        }

        let experiment = self.new_experiment(&output_dir, baseline)?.ok_or_else(|| {
            AppError::NotFound(format!("{} 下没有本次运行的实验目录", output_dir.display()))
        })?;

        let artifact = match &request.source {
            Source::Image(p) => {
                let file_name = p.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
                self.locator.find_image(&experiment.path, &file_name)
            }
            Source::Video(p) => {
                let stem = p.file_stem().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
                self.locator.find_video(&experiment.path, &stem)
            }
            Source::Camera(_) => Some(experiment.path.clone()),
        }
        .ok_or_else(|| {
            AppError::NotFound(format!("{} 中没有找到结果文件", experiment.path.display()))
        })?;

        info!("[SESSION] 结果: {}", artifact.display());
        self.console.success(&format!("结果已保存: {}", artifact.display()));
        Ok(artifact)
    }

    /// 运行前已有的最大实验序号
    fn experiment_baseline(&self, output_dir: &Path) -> AppResult<Option<u64>> {
        if !output_dir.is_dir() {
            return Ok(None);
        }
        Ok(self.locator.latest_experiment(output_dir)?.map(|e| e.index))
    }

    /// 本次运行新建的实验目录：序号必须大于运行前的最大序号
    fn new_experiment(&self, output_dir: &Path, baseline: Option<u64>) -> AppResult<Option<ExperimentDir>> {
        if !output_dir.is_dir() {
            return Ok(None);
        }
        let latest = self.locator.latest_experiment(output_dir)?;
        Ok(latest.filter(|e| baseline.map_or(true, |before| e.index > before)))
    }

    /// 拼装 detect.py 命令行，在工具包目录中执行
    pub fn build_detect_command(
        &self,
        toolkit: &Path,
        source: &str,
        classes: Option<&[u16]>,
        project: Option<&Path>,
    ) -> CommandSpec {
        let mut spec = CommandSpec::new(self.toolkit.python.clone())
            .arg(DETECT_SCRIPT)
            .args(["--weights", self.config.weights()])
            .arg("--conf-thres")
            .arg(self.config.confidence_threshold().to_string())
            .args(["--source", source]);

        if let Some(ids) = classes {
            spec = spec.arg("--classes").args(ids.iter().map(|id| id.to_string()));
        }
        if let Some(dir) = project {
            spec = spec.arg("--project").arg(dir.to_string_lossy().into_owned());
        }
        spec.current_dir(toolkit)
    }

    fn print_request_summary(&mut self, request: &DetectionRequest) {
        let title = format!("{}目标检测", request.source.label());
        let input = match &request.source {
            Source::Camera(index) => format!("摄像头: {}", index),
            other => format!(
                "输入{}: {}",
                other.label(),
                other.file().map(|p| p.display().to_string()).unwrap_or_default()
            ),
        };
        let weights = format!("模型权重: {}", self.config.weights());
        let threshold = format!("置信度阈值: {}", self.config.confidence_threshold());

        self.console.print(&format!("\n{}", rule()));
        self.console.print(&title);
        self.console.print(&rule());
        self.console.print(&input);
        self.console.print(&weights);
        self.console.print(&threshold);

        if let Some(ref ids) = request.classes {
            let names: Vec<String> = ids
                .iter()
                .map(|id| format!("{}({})", id, catalog::class_name(*id).unwrap_or("?")))
                .collect();
            self.console.print(&format!("类别过滤: {}", names.join(", ")));
        }
    }
}
