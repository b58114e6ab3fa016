// COCO 类别目录
//
// 外部检测工具包的预训练权重基于 COCO 数据集，类别编号固定为 0-79。

use crate::error::{AppError, AppResult};

/// 类别总数
pub const CLASS_COUNT: usize = 80;

/// 按编号排列的 COCO 类别名
pub static COCO_CLASSES: [&str; CLASS_COUNT] = [
    "person", "bicycle", "car", "motorcycle", "airplane",
    "bus", "train", "truck", "boat", "traffic light",
    "fire hydrant", "stop sign", "parking meter", "bench", "bird",
    "cat", "dog", "horse", "sheep", "cow",
    "elephant", "bear", "zebra", "giraffe", "backpack",
    "umbrella", "handbag", "tie", "suitcase", "frisbee",
    "skis", "snowboard", "sports ball", "kite", "baseball bat",
    "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon",
    "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut",
    "cake", "chair", "couch", "potted plant", "bed",
    "dining table", "toilet", "tv", "laptop", "mouse",
    "remote", "keyboard", "cell phone", "microwave", "oven",
    "toaster", "sink", "refrigerator", "book", "clock",
    "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// 返回完整的 (编号, 名称) 列表
pub fn list_classes() -> Vec<(u16, &'static str)> {
    COCO_CLASSES
        .iter()
        .enumerate()
        .map(|(id, name)| (id as u16, *name))
        .collect()
}

pub fn class_name(id: u16) -> Option<&'static str> {
    COCO_CLASSES.get(id as usize).copied()
}

/// 每行四个类别的表格，末尾附总数
pub fn format_class_table() -> String {
    let mut out = String::new();
    for row in list_classes().chunks(4) {
        let line: Vec<String> = row
            .iter()
            .map(|(id, name)| format!("{:2}: {:15}", id, name))
            .collect();
        out.push_str(line.join(" ").trim_end());
        out.push('\n');
    }
    out.push_str(&format!("合计: {} 个类别\n", CLASS_COUNT));
    out
}

/// 解析逗号分隔的类别编号，例如 "0, 2,3"
///
/// 保持输入顺序，重复编号只保留第一次出现。
pub fn parse_class_filter(input: &str) -> AppResult<Vec<u16>> {
    let mut ids: Vec<u16> = Vec::new();
    for part in input.split(',') {
        let part = part.trim();
        let id: u16 = part
            .parse()
            .map_err(|_| AppError::InvalidArgument(format!("无效的类别编号: '{}'", part)))?;
        if id as usize >= CLASS_COUNT {
            return Err(AppError::InvalidArgument(format!(
                "类别编号超出范围 0-{}: {}",
                CLASS_COUNT - 1,
                id
            )));
        }
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_catalog_has_80_unique_entries() {
        let classes = list_classes();
        assert_eq!(classes.len(), 80);
        for (expected, (id, _)) in classes.iter().enumerate() {
            assert_eq!(*id as usize, expected);
        }
        let names: HashSet<&str> = classes.iter().map(|(_, n)| *n).collect();
        assert_eq!(names.len(), 80);
    }

    #[test]
    fn test_class_name_lookup() {
        assert_eq!(class_name(0), Some("person"));
        assert_eq!(class_name(2), Some("car"));
        assert_eq!(class_name(79), Some("toothbrush"));
        assert_eq!(class_name(80), None);
    }

    #[test]
    fn test_parse_class_filter() {
        assert_eq!(parse_class_filter("0,2").unwrap(), vec![0, 2]);
        assert_eq!(parse_class_filter(" 5 , 1 ,5").unwrap(), vec![5, 1]);
        assert!(parse_class_filter("0,a").is_err());
        assert!(parse_class_filter("").is_err());
        assert!(parse_class_filter("0,,2").is_err());
        assert!(parse_class_filter("-1").is_err());
        assert!(parse_class_filter("80").is_err());
    }

    #[test]
    fn test_class_table_layout() {
        let table = format_class_table();
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 21);
        assert!(lines[0].starts_with(" 0: person"));
        assert!(lines[19].contains("79: toothbrush"));
        assert!(lines[20].contains("80"));
    }
}
