//! 工具函数模块
//!
//! 文件路径处理与单位换算等通用工具函数。

/// 文件路径处理工具函数
pub mod path {
    use std::path::{Path, PathBuf};

    /// 提取文件名（返回String，用于日志显示）
    #[inline]
    pub fn extract_filename_lossy(path: &Path) -> String {
        path.file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string()
    }

    /// 获取父目录，如果不存在则返回当前目录
    #[inline]
    pub fn get_parent_dir(path: &Path) -> &Path {
        match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        }
    }

    /// 与给定文件同目录的另一个文件
    #[inline]
    pub fn sibling_path(path: &Path, file_name: &str) -> PathBuf {
        match path.parent() {
            Some(dir) => dir.join(file_name),
            None => PathBuf::from(file_name),
        }
    }
}

/// 单位换算
pub mod units {
    /// 像素位移换算为纳米
    #[inline]
    pub fn px_to_nm(displacement_px: f64, nm_per_px: f64) -> f64 {
        displacement_px * nm_per_px
    }
}

pub use path::{extract_filename_lossy, get_parent_dir, sibling_path};
pub use units::px_to_nm;
