// 权重模型目录

use serde::{Deserialize, Serialize};

/// 预训练权重信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightsInfo {
    /// 权重文件名（传给 --weights）
    pub filename: String,
    /// 显示名称
    pub name: String,
    /// 模型描述
    pub description: String,
    /// 速度评分 (1-5, 5最快)
    pub speed_rating: u8,
    /// 精度评分 (1-5, 5最高)
    pub accuracy_rating: u8,
}

fn weights(filename: &str, name: &str, description: &str, speed: u8, accuracy: u8) -> WeightsInfo {
    WeightsInfo {
        filename: filename.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        speed_rating: speed,
        accuracy_rating: accuracy,
    }
}

/// 获取所有已知的 YOLOv5 预训练权重
pub fn get_available_weights() -> Vec<WeightsInfo> {
    vec![
        weights("yolov5n.pt", "YOLOv5 Nano", "最小最快，适合边缘设备", 5, 1),
        weights("yolov5s.pt", "YOLOv5 Small", "速度与精度兼顾的轻量模型", 4, 2),
        weights("yolov5m.pt", "YOLOv5 Medium", "默认模型，适合大多数场景", 3, 3),
        weights("yolov5l.pt", "YOLOv5 Large", "较高精度，需要较好的 GPU", 2, 4),
        weights("yolov5x.pt", "YOLOv5 XLarge", "精度最高，速度最慢", 1, 5),
    ]
}

/// 根据文件名查找权重信息，自定义权重返回 None
pub fn get_weights_by_name(weights: &str) -> Option<WeightsInfo> {
    get_available_weights().into_iter().find(|w| w.filename == weights)
}

/// 渲染权重列表
pub fn format_weights_table() -> String {
    let mut out = String::new();
    for w in get_available_weights() {
        out.push_str(&format!(
            "{:12} {:15} 速度 {}/5  精度 {}/5  {}\n",
            w.filename, w.name, w.speed_rating, w.accuracy_rating, w.description
        ));
    }
    out
}
