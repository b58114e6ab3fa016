// 交互式菜单

use crate::catalog::{format_class_table, parse_class_filter};
use crate::console::{rule, Console};
use crate::detection::DetectionSession;
use crate::error::AppResult;
use crate::locator::ArtifactLocator;
use crate::runner::CommandRunner;
use tracing::{info, warn};

/// 菜单选项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    Image,
    Video,
    Camera,
    Classes,
    Exit,
}

impl MenuChoice {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim() {
            "1" => Some(Self::Image),
            "2" => Some(Self::Video),
            "3" => Some(Self::Camera),
            "4" => Some(Self::Classes),
            "5" => Some(Self::Exit),
            _ => None,
        }
    }
}

/// 打印类别表
pub fn print_classes<C: Console>(console: &mut C) {
    console.print(&format!("\n{}", rule()));
    console.print("可检测的类别 (COCO 数据集)");
    console.print(&rule());
    console.print(format_class_table().trim_end());
    console.print(&rule());
}

fn print_menu<C: Console>(console: &mut C) {
    console.print(&format!("\n{}", rule()));
    console.print("主菜单:");
    console.print("1. 图片目标检测");
    console.print("2. 视频目标检测");
    console.print("3. 摄像头实时检测");
    console.print("4. 显示类别列表");
    console.print("5. 退出");
    console.print(&rule());
}

/// 询问是否过滤类别；格式错误时告警并检测全部类别
///
/// 返回 Ok(None) 表示不过滤。
fn ask_class_filter<C: Console>(console: &mut C) -> AppResult<Option<Vec<u16>>> {
    if !console.confirm("是否只检测特定类别?")? {
        return Ok(None);
    }
    let input = console
        .ask("输入类别编号，用逗号分隔 (例如: 0,2,3): ")?
        .unwrap_or_default();
    match parse_class_filter(&input) {
        Ok(ids) => Ok(Some(ids)),
        Err(e) => {
            warn!("[MENU] 类别过滤输入无效: {}", e);
            console.warn(&format!("{}，将检测全部类别", e));
            Ok(None)
        }
    }
}

/// 菜单主循环，输入流结束或选择退出时返回
pub fn run_menu<R, L, C>(session: &mut DetectionSession<R, L, C>) -> AppResult<()>
where
    R: CommandRunner,
    L: ArtifactLocator,
    C: Console,
{
    loop {
        print_menu(session.console_mut());
        let choice = match session.console_mut().ask("\n请选择 (1-5): ")? {
            Some(c) => c,
            None => break,
        };

        let choice = match MenuChoice::parse(&choice) {
            Some(c) => c,
            None => {
                session.console_mut().warn("无效的选项");
                continue;
            }
        };
        info!("[MENU] 选择: {:?}", choice);

        match choice {
            MenuChoice::Image | MenuChoice::Video => {
                let question = if choice == MenuChoice::Image {
                    "输入图片路径: "
                } else {
                    "输入视频路径: "
                };
                let path = match session.console_mut().ask(question)? {
                    Some(p) => p,
                    None => break,
                };
                let classes = ask_class_filter(session.console_mut())?;
                if choice == MenuChoice::Image {
                    session.run_on_image(&path, classes.as_deref());
                } else {
                    session.run_on_video(&path, classes.as_deref());
                }
            }
            MenuChoice::Camera => {
                let classes = ask_class_filter(session.console_mut())?;
                session.run_on_camera(0, classes.as_deref());
            }
            MenuChoice::Classes => print_classes(session.console_mut()),
            MenuChoice::Exit => {
                let console = session.console_mut();
                console.print(&format!("\n{}", rule()));
                console.print("退出程序，感谢使用");
                console.print(&rule());
                break;
            }
        }
    }
    Ok(())
}
