//! 统一错误处理框架
//!
//! ODM分析链路的核心错误类型定义。致命错误（边界、拟合不收敛、流顺序）
//! 直接中止会话；畸形数据行在会话内部丢弃后继续处理。

use chrono::NaiveDateTime;
use std::fmt;
use std::io;

/// ODM分析相关的统一错误类型
#[derive(Debug)]
pub enum OdmError {
    /// 输入验证错误（参数、配置、模型名称）
    InvalidInput(String),

    /// 文件I/O错误
    IoError(io::Error),

    /// 数据格式错误（CSV/JSON解析）
    FormatError(String),

    /// 锚点或拟合窗口超出强度剖面的有效索引范围
    Bounds {
        /// 出错的位置描述（锚点名称或窗口）
        what: String,
        /// 请求的像素索引
        index: i64,
        /// 剖面长度
        profile_len: usize,
    },

    /// 优化器在某个剖面上未能收敛，热启动链从此处断开
    FitConvergence {
        /// 剖面位置：会话内为数据流中的行号（含被丢弃的畸形行）
        profile_index: usize,
        /// 剖面时间戳（若可用）
        timestamp: Option<NaiveDateTime>,
        /// 本次拟合使用的初始参数
        seed: Vec<f64>,
        /// 失败原因
        reason: String,
    },

    /// 数据行的强度剖面为空或长度不符（会话内部恢复，不向外传播）
    MalformedRow { row_index: usize, reason: String },

    /// 后续数据块的时间戳未严格晚于上一块末尾
    StreamOrdering {
        previous: NaiveDateTime,
        next: NaiveDateTime,
    },

    /// 资源访问错误（线程、通道、文件监视器）
    ResourceError(String),
}

impl fmt::Display for OdmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OdmError::InvalidInput(msg) => write!(f, "输入验证失败: {msg}"),
            OdmError::IoError(err) => write!(f, "文件I/O错误: {err}"),
            OdmError::FormatError(msg) => write!(f, "数据格式错误: {msg}"),
            OdmError::Bounds {
                what,
                index,
                profile_len,
            } => write!(
                f,
                "越界错误: {what} 的索引 {index} 超出剖面范围 [0, {profile_len})"
            ),
            OdmError::FitConvergence {
                profile_index,
                timestamp,
                seed,
                reason,
            } => {
                write!(f, "拟合未收敛: 剖面 #{profile_index}")?;
                if let Some(ts) = timestamp {
                    write!(f, " ({ts})")?;
                }
                write!(f, ", 初始参数 {seed:?}: {reason}")
            }
            OdmError::MalformedRow { row_index, reason } => {
                write!(f, "畸形数据行 #{row_index}: {reason}")
            }
            OdmError::StreamOrdering { previous, next } => write!(
                f,
                "数据流顺序错误: {next} 未晚于上一块末尾 {previous}"
            ),
            OdmError::ResourceError(msg) => write!(f, "资源访问错误: {msg}"),
        }
    }
}

impl std::error::Error for OdmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OdmError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for OdmError {
    fn from(err: io::Error) -> Self {
        OdmError::IoError(err)
    }
}

impl From<csv::Error> for OdmError {
    fn from(err: csv::Error) -> Self {
        if err.is_io_error() {
            match err.into_kind() {
                csv::ErrorKind::Io(io_err) => OdmError::IoError(io_err),
                other => OdmError::FormatError(format!("CSV错误: {other:?}")),
            }
        } else {
            OdmError::FormatError(format!("CSV错误: {err}"))
        }
    }
}

impl From<serde_json::Error> for OdmError {
    fn from(err: serde_json::Error) -> Self {
        OdmError::FormatError(format!("JSON错误: {err}"))
    }
}

impl From<notify::Error> for OdmError {
    fn from(err: notify::Error) -> Self {
        OdmError::ResourceError(format!("文件监视器错误: {err}"))
    }
}

/// ODM分析操作的标准Result类型
pub type OdmResult<T> = Result<T, OdmError>;

// ==================== 错误转换Helper函数 ====================

/// 创建格式错误的helper函数
#[inline]
pub fn format_error<E: fmt::Display>(context: &str, err: E) -> OdmError {
    OdmError::FormatError(format!("{context}: {err}"))
}

/// 创建资源错误的helper函数
#[inline]
pub fn resource_error<E: fmt::Display>(context: &str, err: E) -> OdmError {
    OdmError::ResourceError(format!("{context}: {err}"))
}

/// 创建越界错误的helper函数
#[inline]
pub fn bounds_error(what: impl Into<String>, index: i64, profile_len: usize) -> OdmError {
    OdmError::Bounds {
        what: what.into(),
        index,
        profile_len,
    }
}

// ==================== 错误分类系统 ====================

/// 错误类别枚举（用于退出码映射和批处理统计）
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum ErrorCategory {
    /// 配置相关错误（锚点越界、模型名称、参数）
    Configuration,
    /// 数据相关错误（格式损坏、顺序错误、畸形行）
    Data,
    /// I/O相关错误（文件不存在、权限不足等）
    Io,
    /// 拟合相关错误（优化器不收敛）
    Fitting,
    /// 其他未分类错误
    Other,
}

impl ErrorCategory {
    /// 从OdmError提取错误类别
    pub fn from_odm_error(e: &OdmError) -> Self {
        match e {
            OdmError::InvalidInput(_) | OdmError::Bounds { .. } => Self::Configuration,
            OdmError::FormatError(_)
            | OdmError::MalformedRow { .. }
            | OdmError::StreamOrdering { .. } => Self::Data,
            OdmError::IoError(_) => Self::Io,
            OdmError::FitConvergence { .. } => Self::Fitting,
            OdmError::ResourceError(_) => Self::Other,
        }
    }

    /// 获取错误类别的显示名称
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Configuration => "配置错误",
            Self::Data => "数据错误",
            Self::Io => "I/O错误",
            Self::Fitting => "拟合错误",
            Self::Other => "其他错误",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_convergence_display_carries_context() {
        let err = OdmError::FitConvergence {
            profile_index: 17,
            timestamp: None,
            seed: vec![1.0, 2.5],
            reason: "超过最大函数调用次数".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("#17"));
        assert!(text.contains("2.5"));
        assert_eq!(ErrorCategory::from_odm_error(&err), ErrorCategory::Fitting);
    }

    #[test]
    fn test_bounds_error_category() {
        let err = bounds_error("peak", 120, 100);
        assert!(err.to_string().contains("120"));
        assert_eq!(
            ErrorCategory::from_odm_error(&err),
            ErrorCategory::Configuration
        );
    }
}
