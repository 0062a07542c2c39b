//! 剖面数据模型
//!
//! 强度剖面、数据行记录、锚点坐标与拟合窗口，以及分析输出行。

use crate::core::cycle_annotator::CycleLabel;
use crate::core::least_squares::CurveFitResult;
use crate::error::{OdmResult, bounds_error};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// 一维强度剖面（按像素索引 0..N-1 排列，读取后不可变）
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IntensityProfile(Vec<f64>);

impl IntensityProfile {
    pub fn new(samples: Vec<f64>) -> Self {
        Self(samples)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn samples(&self) -> &[f64] {
        &self.0
    }

    /// 读取单个像素强度，越界时返回BoundsError
    pub fn value_at(&self, index: i64, what: &str) -> OdmResult<f64> {
        if index < 0 || index as usize >= self.0.len() {
            return Err(bounds_error(what, index, self.0.len()));
        }
        Ok(self.0[index as usize])
    }
}

impl From<Vec<f64>> for IntensityProfile {
    fn from(samples: Vec<f64>) -> Self {
        Self(samples)
    }
}

/// 原始数据行：时间戳、相对时间、执行器电压与强度剖面
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileRecord {
    pub timestamp: NaiveDateTime,
    /// 相对测量开始的时间（秒）
    pub relative_time: f64,
    pub actuator_voltage: f64,
    pub intensity_profile: IntensityProfile,
}

/// 锚点坐标（像素位置, 强度）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// x坐标四舍五入到像素索引
    #[inline]
    pub fn pixel(&self) -> i64 {
        self.x.round() as i64
    }
}

/// 初值估计与拟合窗口所需的全部锚点
///
/// 由外部配置（设置文件或交互界面）提供，会话开始前必须完整解析。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnchorPoints {
    pub peak: Point,
    pub lower_valley: Point,
    pub upper_valley: Point,
    pub min_bound: Point,
    pub max_bound: Point,
    /// 有界样条模型的插值区间下限
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spline_min_bound: Option<Point>,
    /// 有界样条模型的插值区间上限
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spline_max_bound: Option<Point>,
}

impl AnchorPoints {
    /// 检查峰/谷/窗口锚点的像素位置均落在剖面内
    pub fn validate_against(&self, profile_len: usize) -> OdmResult<()> {
        let named = [
            ("peak", self.peak),
            ("lower_valley", self.lower_valley),
            ("upper_valley", self.upper_valley),
            ("min_bound", self.min_bound),
        ];
        for (what, point) in named {
            let px = point.pixel();
            if px < 0 || px as usize >= profile_len {
                return Err(bounds_error(what, px, profile_len));
            }
        }
        // max_bound 是半开区间的上界，允许等于剖面长度
        let px = self.max_bound.pixel();
        if px < 0 || px as usize > profile_len {
            return Err(bounds_error("max_bound", px, profile_len));
        }
        Ok(())
    }
}

/// 拟合窗口 [xmin_bound, xmax_bound)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FitWindow {
    pub xmin_bound: usize,
    pub xmax_bound: usize,
}

impl FitWindow {
    /// 由锚点的 min_bound / max_bound 四舍五入得到窗口
    pub fn from_anchors(anchors: &AnchorPoints) -> OdmResult<Self> {
        let xmin = anchors.min_bound.pixel();
        let xmax = anchors.max_bound.pixel();
        if xmin < 0 {
            return Err(bounds_error("min_bound", xmin, 0));
        }
        if xmax <= xmin {
            return Err(crate::error::OdmError::InvalidInput(format!(
                "拟合窗口为空: [{xmin}, {xmax})"
            )));
        }
        Ok(Self {
            xmin_bound: xmin as usize,
            xmax_bound: xmax as usize,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.xmax_bound - self.xmin_bound
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.xmax_bound <= self.xmin_bound
    }

    /// 检查窗口完全落在给定长度的剖面内
    pub fn check(&self, profile_len: usize) -> OdmResult<()> {
        if self.xmax_bound > profile_len {
            return Err(bounds_error(
                "fit window upper bound",
                self.xmax_bound as i64,
                profile_len,
            ));
        }
        Ok(())
    }

    /// 窗口内的像素x坐标
    pub fn x_values(&self) -> Vec<f64> {
        (self.xmin_bound..self.xmax_bound).map(|x| x as f64).collect()
    }

    /// 截取窗口内的强度值
    #[inline]
    pub fn slice<'a>(&self, profile: &'a IntensityProfile) -> &'a [f64] {
        &profile.samples()[self.xmin_bound..self.xmax_bound]
    }
}

/// 单个峰在某一剖面上的拟合结论
#[derive(Debug, Clone, PartialEq)]
pub struct PeakFit {
    pub displacement: f64,
    pub chi_square: f64,
    pub beam_width: Option<f64>,
    pub curve_fit: CurveFitResult,
}

/// 分析输出行：原始记录 + 周期标签 + 位移
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRow {
    pub record: ProfileRecord,
    pub label: CycleLabel,
    /// 移动峰拟合
    pub moving: PeakFit,
    /// 参考峰拟合（可选）
    pub reference: Option<PeakFit>,
    /// 合成位移（像素）：有参考峰时为 移动峰 − 参考峰
    pub displacement: f64,
}

impl AnalysisRow {
    #[inline]
    pub fn displacement_mp(&self) -> f64 {
        self.moving.displacement
    }

    #[inline]
    pub fn chi_square_mp(&self) -> f64 {
        self.moving.chi_square
    }

    #[inline]
    pub fn displacement_ref(&self) -> Option<f64> {
        self.reference.as_ref().map(|r| r.displacement)
    }

    #[inline]
    pub fn chi_square_ref(&self) -> Option<f64> {
        self.reference.as_ref().map(|r| r.chi_square)
    }
}

/// 合成位移列
#[inline]
pub fn combine_displacement(moving: f64, reference: Option<f64>) -> f64 {
    match reference {
        Some(r) => moving - r,
        None => moving,
    }
}
