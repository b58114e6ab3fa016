// 目标检测模块
//
// 基于外部 YOLOv5 工具包：本模块只负责环境准备、拼装 detect.py 命令行、
// 定位输出文件，不包含任何推理逻辑。
//
// 子模块：
// - session: 检测会话，串联 pip 安装、git clone、detect.py 调用和结果定位

pub mod session;

pub use session::{DetectionRequest, DetectionSession, SessionConfig, Source};
