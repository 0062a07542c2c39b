//! 峰形模型族
//!
//! 每个模型提供三件事：逐点求值、由锚点估计初值、由最优参数提取位移。
//! 参数向量的顺序即 [`PeakFunction::parameter_names`] 的顺序，
//! 估计得到的初值与求值函数使用同一顺序，可直接作为优化器起点。
//!
//! 样条类模型在 `estimate_initial_parameters` 中基于（高斯平滑后的）剖面
//! 构造并持有自己的样条，每次重新估计都会重建。

use std::f64::consts::PI;

use crate::core::profile::{AnchorPoints, IntensityProfile};
use crate::core::spline::{CubicSpline, gaussian_filter1d};
use crate::error::{OdmError, OdmResult, bounds_error};

/// 样条模型的平滑尺度（像素）
const SPLINE_SMOOTHING_SIGMA: f64 = 2.0;

/// 峰形函数接口
pub trait PeakFunction {
    /// 模型显示名称（设置文件中以此名称引用）
    fn name(&self) -> &'static str;

    /// 参数名称，顺序即参数向量顺序
    fn parameter_names(&self) -> &'static [&'static str];

    /// 单点求值
    fn evaluate(&self, x: f64, params: &[f64]) -> f64;

    /// 由锚点坐标估计初始参数
    fn estimate_initial_parameters(
        &mut self,
        profile: &IntensityProfile,
        anchors: &AnchorPoints,
    ) -> OdmResult<Vec<f64>>;

    /// 位移（峰位置，像素）
    fn displacement(&self, params: &[f64]) -> f64;

    /// 光束宽度（仅部分模型支持）
    fn beam_width(&self, _params: &[f64]) -> Option<f64> {
        None
    }

    #[inline]
    fn parameter_count(&self) -> usize {
        self.parameter_names().len()
    }

    /// 批量求值
    fn evaluate_all(&self, xs: &[f64], params: &[f64]) -> Vec<f64> {
        xs.iter().map(|&x| self.evaluate(x, params)).collect()
    }
}

// ========== 解析模型 ==========

/// 高斯峰 + 线性背景
///
/// 指数项为 `exp(-((x-μ)/σ)²)`，不含 ½ 因子；σ 与光束宽度按此定义。
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Gaussian;

impl PeakFunction for Gaussian {
    fn name(&self) -> &'static str {
        "Gaussian"
    }

    fn parameter_names(&self) -> &'static [&'static str] {
        &["mu", "sigma", "A", "a1", "a0"]
    }

    fn evaluate(&self, x: f64, p: &[f64]) -> f64 {
        let (mu, sigma, a, a1, a0) = (p[0], p[1], p[2], p[3], p[4]);
        let z = (x - mu) / sigma;
        a / (sigma * (2.0 * PI).sqrt()) * (-z * z).exp() + 0.003 * a1 * (x - mu) + a0
    }

    fn estimate_initial_parameters(
        &mut self,
        profile: &IntensityProfile,
        anchors: &AnchorPoints,
    ) -> OdmResult<Vec<f64>> {
        anchors.validate_against(profile.len())?;
        let sigma = (anchors.upper_valley.x - anchors.lower_valley.x) / 2.0;
        Ok(vec![
            anchors.peak.x,
            sigma,
            anchors.peak.y * sigma,
            0.0,
            (anchors.lower_valley.y + anchors.upper_valley.y) / 2.0,
        ])
    }

    fn displacement(&self, p: &[f64]) -> f64 {
        p[0]
    }

    fn beam_width(&self, p: &[f64]) -> Option<f64> {
        Some(2.0 * p[1])
    }
}

/// 余弦峰 + 缓变背景
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Harmonic;

impl PeakFunction for Harmonic {
    fn name(&self) -> &'static str {
        "Harmonic"
    }

    fn parameter_names(&self) -> &'static [&'static str] {
        &["x0", "A", "f", "a1", "a0"]
    }

    fn evaluate(&self, x: f64, p: &[f64]) -> f64 {
        let (x0, a, f, a1, a0) = (p[0], p[1], p[2], p[3], p[4]);
        a * (2.0 * PI * f * (x - x0)).cos() + a1 * (1.0 + 0.0003 * x) + a0
    }

    fn estimate_initial_parameters(
        &mut self,
        profile: &IntensityProfile,
        anchors: &AnchorPoints,
    ) -> OdmResult<Vec<f64>> {
        anchors.validate_against(profile.len())?;
        Ok(vec![
            anchors.peak.x,
            (anchors.peak.y - anchors.lower_valley.y) / 2.0,
            1.0 / (anchors.upper_valley.x - anchors.lower_valley.x),
            0.0,
            (anchors.lower_valley.y + anchors.upper_valley.y) / 2.0,
        ])
    }

    fn displacement(&self, p: &[f64]) -> f64 {
        p[0]
    }
}

/// 倒置双洛伦兹（Merlijn 形式）
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Merlijnian;

impl PeakFunction for Merlijnian {
    fn name(&self) -> &'static str {
        "Inverted Double Lorentzian (Merlijn)"
    }

    fn parameter_names(&self) -> &'static [&'static str] {
        &["a1", "a2", "a3", "a4", "a5", "a6"]
    }

    fn evaluate(&self, x: f64, p: &[f64]) -> f64 {
        let (a1, a2, a3, a4, a5, a6) = (p[0], p[1], p[2], p[3], p[4], p[5]);
        let lorentz = 1.0 / (a1 + (x - a2).powi(2)) + 1.0 / (a1 + (x - a3).powi(2));
        -lorentz * a4 * (x - a5).powi(2) * (1.0 + 0.0003 * x) + a6
    }

    fn estimate_initial_parameters(
        &mut self,
        profile: &IntensityProfile,
        anchors: &AnchorPoints,
    ) -> OdmResult<Vec<f64>> {
        anchors.validate_against(profile.len())?;
        let spread = anchors.peak.x - anchors.lower_valley.x;
        if spread < 0.0 {
            return Err(OdmError::InvalidInput(format!(
                "{}: 峰位置({})位于下谷({})左侧",
                self.name(),
                anchors.peak.x,
                anchors.lower_valley.x
            )));
        }
        Ok(vec![
            spread.sqrt(),
            anchors.lower_valley.x,
            anchors.upper_valley.x,
            anchors.peak.y,
            anchors.peak.x,
            anchors.peak.y,
        ])
    }

    fn displacement(&self, p: &[f64]) -> f64 {
        (p[1] + p[2]) / 2.0
    }

    fn beam_width(&self, p: &[f64]) -> Option<f64> {
        Some((p[2] - p[1]).abs())
    }
}

/// 倒置双洛伦兹（Jaap 形式）
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Jaapian;

impl Jaapian {
    fn lorentz_dip(x: f64, center: f64, gamma: f64) -> f64 {
        let half = gamma / 2.0;
        1.0 - gamma * gamma / 4.0 / (half * half + (x - center).powi(2))
    }
}

impl PeakFunction for Jaapian {
    fn name(&self) -> &'static str {
        "Inverted Double Lorentzian (Jaap)"
    }

    fn parameter_names(&self) -> &'static [&'static str] {
        &["w", "Gamma", "contrast", "x0", "A", "a0"]
    }

    fn evaluate(&self, x: f64, p: &[f64]) -> f64 {
        let (w, gamma, contrast, x0, a, a0) = (p[0], p[1], p[2], p[3], p[4], p[5]);
        let shape = (1.0 - contrast)
            + contrast
                * Self::lorentz_dip(x, x0 + w / 2.0, gamma)
                * Self::lorentz_dip(x, x0 - w / 2.0, gamma);
        a * shape + a0
    }

    fn estimate_initial_parameters(
        &mut self,
        profile: &IntensityProfile,
        anchors: &AnchorPoints,
    ) -> OdmResult<Vec<f64>> {
        anchors.validate_against(profile.len())?;
        Ok(vec![
            anchors.upper_valley.x - anchors.lower_valley.x,
            10.0,
            1.0,
            anchors.peak.x,
            anchors.peak.y,
            anchors.lower_valley.y,
        ])
    }

    fn displacement(&self, p: &[f64]) -> f64 {
        p[3]
    }

    fn beam_width(&self, p: &[f64]) -> Option<f64> {
        Some(p[0])
    }
}

/// 基波 + 二次谐波
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DualHarmonic;

impl PeakFunction for DualHarmonic {
    fn name(&self) -> &'static str {
        "Dual Harmonic"
    }

    fn parameter_names(&self) -> &'static [&'static str] {
        &["x0", "w", "a1", "a2", "a0"]
    }

    fn evaluate(&self, x: f64, p: &[f64]) -> f64 {
        let (x0, w, a1, a2, a0) = (p[0], p[1], p[2], p[3], p[4]);
        a1 * (w * (x - x0)).cos() + a2 * (2.0 * w * (x - x0)).cos() + a0
    }

    fn estimate_initial_parameters(
        &mut self,
        profile: &IntensityProfile,
        anchors: &AnchorPoints,
    ) -> OdmResult<Vec<f64>> {
        anchors.validate_against(profile.len())?;
        let a0 = (anchors.min_bound.y + anchors.max_bound.y) / 2.0;
        let a1 = (anchors.peak.y - a0) / 2.0;
        Ok(vec![
            anchors.peak.x,
            PI / (anchors.upper_valley.x - anchors.lower_valley.x),
            a1,
            a1,
            a0,
        ])
    }

    fn displacement(&self, p: &[f64]) -> f64 {
        p[0]
    }
}

/// sinc 峰
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Sinc;

impl PeakFunction for Sinc {
    fn name(&self) -> &'static str {
        "Sinc"
    }

    fn parameter_names(&self) -> &'static [&'static str] {
        &["w", "A", "c", "x0"]
    }

    fn evaluate(&self, x: f64, p: &[f64]) -> f64 {
        let (w, a, c, x0) = (p[0], p[1], p[2], p[3]);
        let arg = w * (x - x0);
        if arg == 0.0 {
            // 可去奇点：sin(t)/t → 1
            a + c
        } else {
            a * arg.sin() / arg + c
        }
    }

    fn estimate_initial_parameters(
        &mut self,
        profile: &IntensityProfile,
        anchors: &AnchorPoints,
    ) -> OdmResult<Vec<f64>> {
        anchors.validate_against(profile.len())?;
        let x0 = anchors.peak.x;
        let half_span =
            ((anchors.upper_valley.x - x0) + (x0 - anchors.lower_valley.x)) / 2.0;
        let w = 2.0 * PI / (half_span * 4.0 / 3.0);
        let c = (anchors.min_bound.y + anchors.max_bound.y) / 2.0;
        Ok(vec![w, anchors.peak.y - c, c, x0])
    }

    fn displacement(&self, p: &[f64]) -> f64 {
        p[3]
    }
}

// ========== 样条模型 ==========

/// 整条剖面平滑后建样条
fn build_profile_spline(profile: &IntensityProfile) -> OdmResult<CubicSpline> {
    if profile.len() < CubicSpline::MIN_POINTS {
        return Err(bounds_error(
            "spline support",
            CubicSpline::MIN_POINTS as i64 - 1,
            profile.len(),
        ));
    }
    let smoothed = gaussian_filter1d(profile.samples(), SPLINE_SMOOTHING_SIGMA);
    CubicSpline::from_samples(0, &smoothed)
}

#[inline]
fn spline_value(spline: Option<&CubicSpline>, t: f64) -> f64 {
    // 未估计前求值得到 NaN，由优化器报告为非有限残差
    spline.map_or(f64::NAN, |s| s.eval(t))
}

/// 以平滑剖面为模板的平移样条
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Spline {
    spline: Option<CubicSpline>,
}

impl PeakFunction for Spline {
    fn name(&self) -> &'static str {
        "Spline"
    }

    fn parameter_names(&self) -> &'static [&'static str] {
        &["x0"]
    }

    fn evaluate(&self, x: f64, p: &[f64]) -> f64 {
        spline_value(self.spline.as_ref(), x - p[0])
    }

    fn estimate_initial_parameters(
        &mut self,
        profile: &IntensityProfile,
        _anchors: &AnchorPoints,
    ) -> OdmResult<Vec<f64>> {
        self.spline = Some(build_profile_spline(profile)?);
        Ok(vec![0.0])
    }

    fn displacement(&self, p: &[f64]) -> f64 {
        p[0]
    }
}

/// 平移 + 缩放 + 偏置的样条模板
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScaledSpline {
    spline: Option<CubicSpline>,
}

impl PeakFunction for ScaledSpline {
    fn name(&self) -> &'static str {
        "Scaled Spline"
    }

    fn parameter_names(&self) -> &'static [&'static str] {
        &["x0", "A", "a0"]
    }

    fn evaluate(&self, x: f64, p: &[f64]) -> f64 {
        p[1] * spline_value(self.spline.as_ref(), x - p[0]) + p[2]
    }

    fn estimate_initial_parameters(
        &mut self,
        profile: &IntensityProfile,
        _anchors: &AnchorPoints,
    ) -> OdmResult<Vec<f64>> {
        self.spline = Some(build_profile_spline(profile)?);
        Ok(vec![0.0, 1.0, 0.0])
    }

    fn displacement(&self, p: &[f64]) -> f64 {
        p[0]
    }
}

/// 仅在 [xmin, xmax] 内使用样条，区间外取端点值
#[derive(Debug, Clone, PartialEq)]
struct BoundedSupport {
    spline: CubicSpline,
    xmin: f64,
    xmax: f64,
    ymin: f64,
    ymax: f64,
}

/// 局部区间样条模板
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundedSpline {
    support: Option<BoundedSupport>,
}

impl PeakFunction for BoundedSpline {
    fn name(&self) -> &'static str {
        "Bounded Spline"
    }

    fn parameter_names(&self) -> &'static [&'static str] {
        &["x0", "A", "a0"]
    }

    fn evaluate(&self, x: f64, p: &[f64]) -> f64 {
        let Some(support) = &self.support else {
            return f64::NAN;
        };
        if x < support.xmin {
            support.ymin
        } else if x > support.xmax {
            support.ymax
        } else {
            p[1] * support.spline.eval(x - p[0]) + p[2]
        }
    }

    fn estimate_initial_parameters(
        &mut self,
        profile: &IntensityProfile,
        anchors: &AnchorPoints,
    ) -> OdmResult<Vec<f64>> {
        let (Some(lower), Some(upper)) = (anchors.spline_min_bound, anchors.spline_max_bound)
        else {
            return Err(OdmError::InvalidInput(format!(
                "{} 需要 spline_min_bound 与 spline_max_bound 锚点",
                self.name()
            )));
        };
        let (xmin, xmax) = (lower.pixel(), upper.pixel());
        if xmin < 0 {
            return Err(bounds_error("spline_min_bound", xmin, profile.len()));
        }
        if xmax as usize > profile.len() {
            return Err(bounds_error("spline_max_bound", xmax, profile.len()));
        }
        if xmax - xmin < CubicSpline::MIN_POINTS as i64 {
            return Err(OdmError::InvalidInput(format!(
                "样条区间 [{xmin}, {xmax}) 过短"
            )));
        }

        let window = &profile.samples()[xmin as usize..xmax as usize];
        let smoothed = gaussian_filter1d(window, SPLINE_SMOOTHING_SIGMA);
        let spline = CubicSpline::from_samples(xmin as usize, &smoothed)?;
        let (xmin, xmax) = (xmin as f64, xmax as f64);
        self.support = Some(BoundedSupport {
            ymin: spline.eval(xmin),
            ymax: spline.eval(xmax),
            spline,
            xmin,
            xmax,
        });
        Ok(vec![0.0, 1.0, 0.0])
    }

    fn displacement(&self, p: &[f64]) -> f64 {
        p[0]
    }
}

// ========== 模型注册表 ==========

/// 可互换的峰形模型
#[derive(Debug, Clone, PartialEq)]
pub enum PeakModel {
    Merlijnian(Merlijnian),
    Gaussian(Gaussian),
    Harmonic(Harmonic),
    Jaapian(Jaapian),
    Sinc(Sinc),
    DualHarmonic(DualHarmonic),
    Spline(Spline),
    ScaledSpline(ScaledSpline),
    BoundedSpline(BoundedSpline),
}

macro_rules! delegate {
    ($self:expr, $model:ident => $body:expr) => {
        match $self {
            PeakModel::Merlijnian($model) => $body,
            PeakModel::Gaussian($model) => $body,
            PeakModel::Harmonic($model) => $body,
            PeakModel::Jaapian($model) => $body,
            PeakModel::Sinc($model) => $body,
            PeakModel::DualHarmonic($model) => $body,
            PeakModel::Spline($model) => $body,
            PeakModel::ScaledSpline($model) => $body,
            PeakModel::BoundedSpline($model) => $body,
        }
    };
}

impl PeakModel {
    /// 全部模型（未估计状态）
    pub fn available_models() -> Vec<PeakModel> {
        vec![
            PeakModel::Merlijnian(Merlijnian),
            PeakModel::Gaussian(Gaussian),
            PeakModel::Harmonic(Harmonic),
            PeakModel::Jaapian(Jaapian),
            PeakModel::Sinc(Sinc),
            PeakModel::DualHarmonic(DualHarmonic),
            PeakModel::Spline(Spline::default()),
            PeakModel::ScaledSpline(ScaledSpline::default()),
            PeakModel::BoundedSpline(BoundedSpline::default()),
        ]
    }

    /// 命令行/设置文件使用的短标识
    pub fn key(&self) -> &'static str {
        match self {
            PeakModel::Merlijnian(_) => "merlijn",
            PeakModel::Gaussian(_) => "gaussian",
            PeakModel::Harmonic(_) => "harmonic",
            PeakModel::Jaapian(_) => "jaap",
            PeakModel::Sinc(_) => "sinc",
            PeakModel::DualHarmonic(_) => "dual-harmonic",
            PeakModel::Spline(_) => "spline",
            PeakModel::ScaledSpline(_) => "scaled-spline",
            PeakModel::BoundedSpline(_) => "bounded-spline",
        }
    }

    /// 按显示名称或短标识（不区分大小写）查找模型
    pub fn from_name(name: &str) -> OdmResult<Self> {
        let wanted = name.trim();
        Self::available_models()
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(wanted) || m.key().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                let known: Vec<&str> = Self::available_models().iter().map(|m| m.name()).collect();
                OdmError::InvalidInput(format!(
                    "未知峰形模型 '{wanted}'，可选: {}",
                    known.join(", ")
                ))
            })
    }

    /// 是否提供光束宽度
    pub fn supports_beam_width(&self) -> bool {
        matches!(
            self,
            PeakModel::Gaussian(_) | PeakModel::Merlijnian(_) | PeakModel::Jaapian(_)
        )
    }
}

impl PeakFunction for PeakModel {
    fn name(&self) -> &'static str {
        delegate!(self, m => m.name())
    }

    fn parameter_names(&self) -> &'static [&'static str] {
        delegate!(self, m => m.parameter_names())
    }

    #[inline]
    fn evaluate(&self, x: f64, params: &[f64]) -> f64 {
        delegate!(self, m => m.evaluate(x, params))
    }

    fn estimate_initial_parameters(
        &mut self,
        profile: &IntensityProfile,
        anchors: &AnchorPoints,
    ) -> OdmResult<Vec<f64>> {
        delegate!(self, m => m.estimate_initial_parameters(profile, anchors))
    }

    fn displacement(&self, params: &[f64]) -> f64 {
        delegate!(self, m => m.displacement(params))
    }

    fn beam_width(&self, params: &[f64]) -> Option<f64> {
        delegate!(self, m => m.beam_width(params))
    }
}
