//! ODM Analysis Tool
//!
//! 光学位移测量（ODM）数据分析：对一维强度剖面序列中的移动峰（及可选参考峰）
//! 逐行拟合峰形模型，得到亚像素位移，并由执行器电压重建驱动方向与周期编号。
//!
//! ## 核心特性
//! - 9 种可互换峰形模型（解析模型与样条模板模型）
//! - Levenberg-Marquardt 最小二乘，逐行热启动
//! - 分块增量会话：任意分块方式的结果与一次性处理完全一致
//! - 读取 → 拟合 → 写出 三级流水线，支持监视增长中的数据文件
//! - 位移噪声分析（多项式去趋势 + 描述统计）

pub mod core;
pub mod error;
pub mod processing;
pub mod source;
pub mod tools;

// 重新导出核心类型
pub use core::{
    AnalysisRow, AnchorPoints, CycleAnnotator, CycleLabel, Direction, FitWindow,
    IntensityProfile, PeakFunction, PeakModel, Point, ProfileRecord,
};
pub use error::{ErrorCategory, OdmError, OdmResult};
pub use processing::{IncrementalAnalysisSession, PeakFitSettings, SessionConfig};
pub use source::{AnalysisCsvWriter, FitSettings, RawDataReader};
