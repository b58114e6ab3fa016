// 外部进程执行模块
//
// 所有子进程（pip、git、detect.py）都通过 CommandRunner 启动，
// 工作目录只作用于子进程，不修改当前进程的 cwd。
//
// 交互子进程运行期间 Ctrl+C 只结束子进程，主程序记下中断后回到调用方；
// 其余时间 Ctrl+C 直接退出程序。

use crate::error::{AppError, AppResult};
use crate::utils::hidden_command;
use once_cell::sync::OnceCell;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

/// Ctrl+C 被按下时的退出码（128 + SIGINT）
const INTERRUPT_EXIT_CODE: i32 = 130;

static ATTACHED: AtomicBool = AtomicBool::new(false);
static INTERRUPTED: AtomicBool = AtomicBool::new(false);
static INTERRUPT_HANDLER: OnceCell<()> = OnceCell::new();

/// 待执行的外部命令
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// 子进程工作目录，None 表示继承当前目录
    pub working_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// 便于日志输出的命令行
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// 子进程执行结果
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// 退出码，被信号终止时为 None
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// 失败时用于展示的诊断文本，stderr 为空时退回 stdout
    pub fn diagnostic(&self) -> &str {
        if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }
}

/// 交互子进程的退出情况
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttachedExit {
    /// 退出码，被信号终止时为 None
    pub code: Option<i32>,
    /// 运行期间用户按下了 Ctrl+C
    pub interrupted: bool,
}

impl AttachedExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// 外部进程执行接口
pub trait CommandRunner {
    /// 运行到结束并捕获输出
    fn run(&self, spec: &CommandSpec) -> AppResult<CommandOutput>;

    /// 继承终端的标准输入输出运行（摄像头模式需要交互）
    fn run_attached(&self, spec: &CommandSpec) -> AppResult<AttachedExit>;
}

fn handle_interrupt() {
    if ATTACHED.load(Ordering::SeqCst) {
        INTERRUPTED.store(true, Ordering::SeqCst);
    } else {
        std::process::exit(INTERRUPT_EXIT_CODE);
    }
}

/// 注册一次 Ctrl+C 处理函数
fn install_interrupt_handler() {
    INTERRUPT_HANDLER.get_or_init(|| {
        if let Err(e) = ctrlc::set_handler(handle_interrupt) {
            warn!("[RUNNER] 注册 Ctrl+C 处理失败: {}", e);
        }
    });
}

/// 交互子进程运行期间持有，释放时恢复 Ctrl+C 的默认行为
struct AttachedGuard;

impl AttachedGuard {
    fn enter() -> Self {
        INTERRUPTED.store(false, Ordering::SeqCst);
        ATTACHED.store(true, Ordering::SeqCst);
        Self
    }

    fn interrupted(&self) -> bool {
        INTERRUPTED.load(Ordering::SeqCst)
    }
}

impl Drop for AttachedGuard {
    fn drop(&mut self) {
        ATTACHED.store(false, Ordering::SeqCst);
    }
}

/// 基于 std::process 的实现
#[derive(Debug, Default)]
pub struct SystemRunner;

impl SystemRunner {
    fn command(spec: &CommandSpec, attached: bool) -> Command {
        // 交互子进程需要共用当前控制台，不能使用隐藏窗口的标志
        let mut cmd = if attached {
            Command::new(&spec.program)
        } else {
            hidden_command(&spec.program)
        };
        cmd.args(&spec.args);
        if let Some(ref dir) = spec.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> AppResult<CommandOutput> {
        info!("[RUNNER] 执行: {}", spec.display());
        let output = Self::command(spec, false)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| {
                error!("[RUNNER] 启动 {} 失败: {}", spec.program, e);
                spawn_error(&spec.program, e)
            })?;

        let result = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!("[RUNNER] {} 退出码: {:?}", spec.program, result.code);
        Ok(result)
    }

    fn run_attached(&self, spec: &CommandSpec) -> AppResult<AttachedExit> {
        info!("[RUNNER] 交互执行: {}", spec.display());
        install_interrupt_handler();

        let guard = AttachedGuard::enter();
        let status = Self::command(spec, true).status().map_err(|e| {
            error!("[RUNNER] 启动 {} 失败: {}", spec.program, e);
            spawn_error(&spec.program, e)
        })?;
        let exit = AttachedExit {
            code: status.code(),
            interrupted: guard.interrupted(),
        };
        drop(guard);

        if exit.interrupted {
            info!("[RUNNER] {} 被用户中断", spec.program);
        }
        debug!("[RUNNER] {} 退出码: {:?}", spec.program, exit.code);
        Ok(exit)
    }
}

fn spawn_error(program: &str, e: std::io::Error) -> AppError {
    if e.kind() == std::io::ErrorKind::NotFound {
        AppError::DependencyMissing(format!("找不到可执行文件 {}，请确认已安装并加入 PATH", program))
    } else {
        AppError::Process(format!("{} 启动失败: {}", program, e))
    }
}

/// 测试用的假执行器：记录所有命令，并模拟 git clone 和 detect.py 的文件输出
#[cfg(test)]
#[derive(Debug)]
pub struct FakeRunner {
    pub calls: std::cell::RefCell<Vec<CommandSpec>>,
    pub pip_code: i32,
    pub clone_code: i32,
    pub detect_code: i32,
    pub failure_stderr: String,
    /// detect.py 成功时是否写出结果文件
    pub write_artifacts: bool,
    /// detect.py 失败前是否已经建好实验目录
    pub exp_on_failure: bool,
    /// git clone 是否得到完整的工具包（含 detect.py）
    pub clone_complete: bool,
    /// 交互运行时模拟用户按下 Ctrl+C
    pub interrupt: bool,
}

#[cfg(test)]
impl Default for FakeRunner {
    fn default() -> Self {
        Self {
            calls: Default::default(),
            pip_code: 0,
            clone_code: 0,
            detect_code: 0,
            failure_stderr: String::new(),
            write_artifacts: true,
            exp_on_failure: false,
            clone_complete: true,
            interrupt: false,
        }
    }
}

#[cfg(test)]
impl FakeRunner {
    pub fn programs_called(&self) -> Vec<String> {
        self.calls.borrow().iter().map(|c| c.display()).collect()
    }

    pub fn detect_calls(&self) -> Vec<CommandSpec> {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.args.first().map(|a| a == "detect.py").unwrap_or(false))
            .cloned()
            .collect()
    }

    fn value_after(spec: &CommandSpec, flag: &str) -> Option<String> {
        let pos = spec.args.iter().position(|a| a == flag)?;
        spec.args.get(pos + 1).cloned()
    }

    fn simulate(&self, spec: &CommandSpec) -> i32 {
        let first = spec.args.first().map(String::as_str);
        match first {
            Some("clone") => {
                if self.clone_code == 0 {
                    let target = PathBuf::from(spec.args.last().cloned().unwrap_or_default());
                    std::fs::create_dir_all(&target).unwrap();
                    if self.clone_complete {
                        std::fs::write(target.join("detect.py"), "# detect").unwrap();
                    }
                    std::fs::write(target.join("requirements.txt"), "torch").unwrap();
                }
                self.clone_code
            }
            Some("-m") => self.pip_code,
            Some("detect.py") => {
                if self.write_artifacts && (self.detect_code == 0 || self.exp_on_failure) {
                    let project = Self::value_after(spec, "--project")
                        .map(PathBuf::from)
                        .unwrap_or_else(|| {
                            spec.working_dir.clone().unwrap_or_default().join("runs").join("detect")
                        });
                    std::fs::create_dir_all(&project).unwrap();
                    let latest = std::fs::read_dir(&project)
                        .unwrap()
                        .filter_map(|e| e.ok())
                        .filter_map(|e| crate::locator::experiment_index(&e.file_name().to_string_lossy()))
                        .max();
                    let name = match latest {
                        Some(index) => format!("exp{}", index + 1),
                        None => "exp".to_string(),
                    };
                    let exp = project.join(name);
                    std::fs::create_dir_all(&exp).unwrap();

                    let source = PathBuf::from(Self::value_after(spec, "--source").unwrap_or_default());
                    let is_video = matches!(
                        source.extension().and_then(|e| e.to_str()),
                        Some("avi") | Some("mp4") | Some("mov")
                    );
                    if is_video {
                        let stem = source.file_stem().unwrap().to_string_lossy().into_owned();
                        std::fs::write(exp.join(format!("{}.mp4", stem)), "video").unwrap();
                    } else if let Some(file_name) = source.file_name() {
                        std::fs::write(exp.join(file_name), "image").unwrap();
                    }
                }
                self.detect_code
            }
            _ => 0,
        }
    }
}

#[cfg(test)]
impl CommandRunner for FakeRunner {
    fn run(&self, spec: &CommandSpec) -> AppResult<CommandOutput> {
        self.calls.borrow_mut().push(spec.clone());
        let code = self.simulate(spec);
        let stderr = if code == 0 { String::new() } else { self.failure_stderr.clone() };
        Ok(CommandOutput { code: Some(code), stdout: String::new(), stderr })
    }

    fn run_attached(&self, spec: &CommandSpec) -> AppResult<AttachedExit> {
        self.calls.borrow_mut().push(spec.clone());
        let code = self.simulate(spec);
        if self.interrupt {
            // 被 Ctrl+C 打断的 Python 进程以 KeyboardInterrupt 退出
            return Ok(AttachedExit { code: Some(1), interrupted: true });
        }
        Ok(AttachedExit { code: Some(code), interrupted: false })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_builder_and_display() {
        let spec = CommandSpec::new("python3")
            .arg("detect.py")
            .args(["--source", "a.jpg"])
            .current_dir("/tmp/yolov5");
        assert_eq!(spec.display(), "python3 detect.py --source a.jpg");
        assert_eq!(spec.working_dir, Some(PathBuf::from("/tmp/yolov5")));
    }

    #[test]
    fn test_output_diagnostic_prefers_stderr() {
        let out = CommandOutput {
            code: Some(1),
            stdout: "progress".to_string(),
            stderr: "Traceback".to_string(),
        };
        assert!(!out.success());
        assert_eq!(out.diagnostic(), "Traceback");

        let out = CommandOutput {
            code: Some(2),
            stdout: "usage".to_string(),
            stderr: "  ".to_string(),
        };
        assert_eq!(out.diagnostic(), "usage");
    }

    #[test]
    fn test_interrupt_recorded_only_while_attached() {
        {
            let guard = AttachedGuard::enter();
            assert!(!guard.interrupted());
            handle_interrupt();
            assert!(guard.interrupted());
        }
        assert!(!ATTACHED.load(Ordering::SeqCst));

        // 重新进入时清除上一次的中断标记
        let guard = AttachedGuard::enter();
        assert!(!guard.interrupted());
    }

    #[test]
    fn test_attached_command_keeps_args_and_dir() {
        let spec = CommandSpec::new("python3")
            .args(["detect.py", "--source", "0"])
            .current_dir("/tmp/yolov5");
        for attached in [true, false] {
            let cmd = SystemRunner::command(&spec, attached);
            assert_eq!(cmd.get_program(), "python3");
            assert_eq!(cmd.get_args().count(), 3);
            assert_eq!(cmd.get_current_dir(), Some(std::path::Path::new("/tmp/yolov5")));
        }
    }

    #[test]
    fn test_attached_exit_success() {
        assert!(AttachedExit { code: Some(0), interrupted: false }.success());
        assert!(!AttachedExit { code: None, interrupted: true }.success());
    }

    #[test]
    fn test_missing_program_is_dependency_error() {
        let spec = CommandSpec::new("yolo-runner-definitely-missing-binary");
        match SystemRunner.run(&spec) {
            Err(AppError::DependencyMissing(_)) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }
}
