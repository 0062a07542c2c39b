//! 核心算法模块
//!
//! 剖面数据模型、峰形模型族、最小二乘引擎、逐剖面拟合、周期标注与噪声统计。
//! 本模块不做任何I/O，全部为纯计算。

pub mod cycle_annotator;
pub mod least_squares;
pub mod noise_stats;
pub mod peak_fitter;
pub mod peak_model;
pub mod profile;
pub mod spline;

// 重新导出公共接口
pub use cycle_annotator::{CycleAnnotator, CycleLabel, CycleSample, Direction};
pub use least_squares::{CurveFitResult, OptimizerOptions};
pub use peak_fitter::{FitContext, FitSeries, fit_displacements};
pub use peak_model::{PeakFunction, PeakModel};
pub use profile::{
    AnalysisRow, AnchorPoints, FitWindow, IntensityProfile, PeakFit, Point, ProfileRecord,
};
