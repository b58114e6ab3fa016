// 输出文件定位模块
//
// detect.py 每次运行会在输出目录下新建实验目录：exp、exp2、exp3 ... exp10。
// 按名称字典序排序时 exp10 会排在 exp9 前面，所以这里按数字后缀排序。
// 输出目录里不符合 exp<N> 命名的子目录一律忽略。

use crate::error::{AppError, AppResult};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info};
use walkdir::WalkDir;

static EXP_SUFFIX_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^exp(?P<index>\d*)$").expect("静态正则表达式无效"));

/// 实验目录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentDir {
    pub path: PathBuf,
    pub name: String,
    /// 运行序号：exp 为 1，expN 为 N
    pub index: u64,
}

/// 从目录名解析运行序号，不是实验目录时返回 None
pub fn experiment_index(name: &str) -> Option<u64> {
    let index = EXP_SUFFIX_REGEX.captures(name)?.name("index")?.as_str();
    if index.is_empty() {
        Some(1)
    } else {
        index.parse::<u64>().ok()
    }
}

/// 输出文件定位接口
pub trait ArtifactLocator {
    /// 输出目录下最新的实验目录
    fn latest_experiment(&self, output_dir: &Path) -> AppResult<Option<ExperimentDir>>;

    /// 实验目录中与输入图片同名的文件
    fn find_image(&self, experiment: &Path, file_name: &str) -> Option<PathBuf>;

    /// 实验目录中主文件名与输入视频相同的文件（扩展名可能被改写）
    fn find_video(&self, experiment: &Path, stem: &str) -> Option<PathBuf>;
}

/// 基于文件系统扫描的实现
#[derive(Debug, Default)]
pub struct FsArtifactLocator;

fn modified_time(path: &Path) -> SystemTime {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

/// 列出目录的直接子项
fn children(dir: &Path) -> impl Iterator<Item = walkdir::DirEntry> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
}

impl ArtifactLocator for FsArtifactLocator {
    fn latest_experiment(&self, output_dir: &Path) -> AppResult<Option<ExperimentDir>> {
        if !output_dir.is_dir() {
            return Err(AppError::NotFound(format!(
                "输出目录不存在: {}",
                output_dir.display()
            )));
        }

        let latest = children(output_dir)
            .filter(|e| e.file_type().is_dir())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                let index = experiment_index(&name)?;
                let path = e.into_path();
                let mtime = modified_time(&path);
                Some((ExperimentDir { path, name, index }, mtime))
            })
            .max_by(|(a, a_time), (b, b_time)| a.index.cmp(&b.index).then(a_time.cmp(b_time)))
            .map(|(exp, _)| exp);

        match latest {
            Some(ref exp) => info!("[LOCATOR] 最新实验目录: {} ({}, 序号 {})", exp.path.display(), exp.name, exp.index),
            None => debug!("[LOCATOR] {} 下没有实验目录", output_dir.display()),
        }
        Ok(latest)
    }

    fn find_image(&self, experiment: &Path, file_name: &str) -> Option<PathBuf> {
        let candidate = experiment.join(file_name);
        candidate.is_file().then_some(candidate)
    }

    fn find_video(&self, experiment: &Path, stem: &str) -> Option<PathBuf> {
        children(experiment)
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .find(|p| p.file_stem().map(|s| s == stem).unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_experiment_index() {
        assert_eq!(experiment_index("exp"), Some(1));
        assert_eq!(experiment_index("exp2"), Some(2));
        assert_eq!(experiment_index("exp10"), Some(10));
        assert_eq!(experiment_index("run"), None);
        assert_eq!(experiment_index("backup2024"), None);
        assert_eq!(experiment_index("exp_old"), None);
    }

    #[test]
    fn test_latest_ignores_unrelated_dirs() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["backup2024", "exp", "exp2", "old_exp9"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }

        let latest = FsArtifactLocator.latest_experiment(dir.path()).unwrap().unwrap();
        assert_eq!(latest.name, "exp2");

        let only_unrelated = tempfile::tempdir().unwrap();
        fs::create_dir(only_unrelated.path().join("backup2024")).unwrap();
        assert!(FsArtifactLocator.latest_experiment(only_unrelated.path()).unwrap().is_none());
    }

    #[test]
    fn test_latest_uses_numeric_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["exp", "exp2", "exp9", "exp10"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }
        fs::write(dir.path().join("exp99.txt"), "not a dir").unwrap();

        let latest = FsArtifactLocator.latest_experiment(dir.path()).unwrap().unwrap();
        assert_eq!(latest.name, "exp10");
        assert_eq!(latest.index, 10);
    }

    #[test]
    fn test_latest_empty_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FsArtifactLocator.latest_experiment(dir.path()).unwrap().is_none());
        assert!(FsArtifactLocator.latest_experiment(&dir.path().join("nope")).is_err());
    }

    #[test]
    fn test_find_image_and_video() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("street.jpg"), "img").unwrap();
        fs::write(dir.path().join("clip.mp4"), "vid").unwrap();

        let image = FsArtifactLocator.find_image(dir.path(), "street.jpg").unwrap();
        assert_eq!(image, dir.path().join("street.jpg"));
        assert!(FsArtifactLocator.find_image(dir.path(), "other.jpg").is_none());

        let video = FsArtifactLocator.find_video(dir.path(), "clip").unwrap();
        assert_eq!(video, dir.path().join("clip.mp4"));
        assert!(FsArtifactLocator.find_video(dir.path(), "street.jpg").is_none());
    }
}
