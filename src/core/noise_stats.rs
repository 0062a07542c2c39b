//! 位移噪声统计
//!
//! 对一段位移曲线做多项式去趋势，残差换算为纳米后给出描述统计：
//! 样本数、极值、均值、方差（ddof=1）、偏度与超额峰度（有偏矩估计），
//! 另附四分位数。

use nalgebra::{DMatrix, DVector};
use serde::Serialize;
use std::fmt;

use crate::error::{OdmError, OdmResult};

/// SVD 截断阈值
const SVD_EPS: f64 = 1e-14;

/// 描述统计
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatsDescription {
    pub size: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// 样本方差（ddof=1）
    pub variance: f64,
    pub skewness: f64,
    /// 超额峰度（正态分布为0）
    pub kurtosis: f64,
    pub q25: f64,
    pub median: f64,
    pub q75: f64,
}

impl StatsDescription {
    #[inline]
    pub fn std_dev(&self) -> f64 {
        self.variance.sqrt()
    }
}

impl fmt::Display for StatsDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "count: {}", self.size)?;
        writeln!(f, "minimum: {:.2} nm", self.min)?;
        writeln!(f, "maximum: {:.2} nm", self.max)?;
        writeln!(f, "mean: {:.2} nm", self.mean)?;
        writeln!(f, "std.dev: {:.2} nm", self.std_dev())?;
        writeln!(f, "variance: {:.2} nm^2", self.variance)?;
        writeln!(f, "25%: {:.2} nm", self.q25)?;
        writeln!(f, "50%: {:.2} nm", self.median)?;
        writeln!(f, "75%: {:.2} nm", self.q75)?;
        writeln!(f, "skewness: {:.2}", self.skewness)?;
        write!(f, "kurtosis: {:.2}", self.kurtosis)
    }
}

/// 线性插值分位数（输入已排序）
fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

/// 计算描述统计；至少需要两个有限样本
pub fn describe(values: &[f64]) -> OdmResult<StatsDescription> {
    if values.len() < 2 {
        return Err(OdmError::InvalidInput(format!(
            "描述统计至少需要2个样本，实际 {}",
            values.len()
        )));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(OdmError::InvalidInput("样本包含非有限值".to_string()));
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;

    let (m2, m3, m4) = values.iter().fold((0.0, 0.0, 0.0), |(m2, m3, m4), &v| {
        let d = v - mean;
        let d2 = d * d;
        (m2 + d2, m3 + d2 * d, m4 + d2 * d2)
    });
    let (m2, m3, m4) = (m2 / n, m3 / n, m4 / n);

    let (skewness, kurtosis) = if m2 == 0.0 {
        (0.0, -3.0)
    } else {
        (m3 / m2.powf(1.5), m4 / (m2 * m2) - 3.0)
    };

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    Ok(StatsDescription {
        size: values.len(),
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        mean,
        variance: m2 * n / (n - 1.0),
        skewness,
        kurtosis,
        q25: quantile_sorted(&sorted, 0.25),
        median: quantile_sorted(&sorted, 0.5),
        q75: quantile_sorted(&sorted, 0.75),
    })
}

/// 最小二乘多项式拟合，返回升幂系数 `[c0, c1, ..., c_deg]`
///
/// 范德蒙矩阵按列范数缩放后用 SVD 求解。
pub fn polyfit(x: &[f64], y: &[f64], degree: usize) -> OdmResult<Vec<f64>> {
    if x.len() != y.len() {
        return Err(OdmError::InvalidInput(format!(
            "polyfit: x与y长度不一致 ({} vs {})",
            x.len(),
            y.len()
        )));
    }
    if x.len() <= degree {
        return Err(OdmError::InvalidInput(format!(
            "polyfit: {} 个点不足以拟合 {degree} 次多项式",
            x.len()
        )));
    }

    let cols = degree + 1;
    let mut vander = DMatrix::from_fn(x.len(), cols, |i, j| x[i].powi(j as i32));
    let scales: Vec<f64> = (0..cols)
        .map(|j| {
            let norm = vander.column(j).norm();
            if norm == 0.0 { 1.0 } else { norm }
        })
        .collect();
    for (j, s) in scales.iter().enumerate() {
        for v in vander.column_mut(j).iter_mut() {
            *v /= s;
        }
    }

    let rhs = DVector::from_column_slice(y);
    let solution = vander
        .svd(true, true)
        .solve(&rhs, SVD_EPS)
        .map_err(|e| OdmError::InvalidInput(format!("polyfit 求解失败: {e}")))?;

    Ok(solution
        .iter()
        .zip(&scales)
        .map(|(c, s)| c / s)
        .collect())
}

/// 升幂系数多项式求值（Horner）
pub fn polyval(coefficients: &[f64], x: f64) -> f64 {
    coefficients.iter().rev().fold(0.0, |acc, c| acc * x + c)
}

/// 去趋势后的位移噪声（nm）
///
/// 横轴为段内样本序号 0..n-1。
pub fn detrended_noise(displacement_px: &[f64], degree: usize, px_to_nm: f64) -> OdmResult<Vec<f64>> {
    let x: Vec<f64> = (0..displacement_px.len()).map(|i| i as f64).collect();
    let coefficients = polyfit(&x, displacement_px, degree)?;
    Ok(x.iter()
        .zip(displacement_px)
        .map(|(&xi, &d)| (d - polyval(&coefficients, xi)) * px_to_nm)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_describe_matches_reference_values() {
        let d = describe(&[1.0, 2.0, 3.0, 4.0, 10.0]).unwrap();
        assert_eq!(d.size, 5);
        assert_eq!(d.min, 1.0);
        assert_eq!(d.max, 10.0);
        assert_abs_diff_eq!(d.mean, 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(d.variance, 12.5, epsilon = 1e-12);
        // 有偏偏度：m3 / m2^1.5，m2 = 10，m3 = 180/5
        assert_abs_diff_eq!(d.skewness, 36.0 / 10f64.powf(1.5), epsilon = 1e-12);
        // m4 = 1394/5
        assert_abs_diff_eq!(d.kurtosis, 278.8 / 100.0 - 3.0, epsilon = 1e-12);
        assert_eq!(d.median, 3.0);
        assert_eq!(d.q25, 2.0);
        assert_eq!(d.q75, 4.0);
    }

    #[test]
    fn test_describe_rejects_degenerate_input() {
        assert!(describe(&[1.0]).is_err());
        assert!(describe(&[1.0, f64::NAN]).is_err());
        let flat = describe(&[2.0; 4]).unwrap();
        assert_eq!(flat.variance, 0.0);
        assert_eq!(flat.skewness, 0.0);
    }

    #[test]
    fn test_polyfit_recovers_quadratic() {
        let x: Vec<f64> = (0..500).map(f64::from).collect();
        let y: Vec<f64> = x.iter().map(|&t| 3.0 - 0.02 * t + 1e-5 * t * t).collect();
        let c = polyfit(&x, &y, 2).unwrap();
        assert_abs_diff_eq!(c[0], 3.0, epsilon = 1e-8);
        assert_abs_diff_eq!(c[1], -0.02, epsilon = 1e-10);
        assert_abs_diff_eq!(c[2], 1e-5, epsilon = 1e-12);
        assert_abs_diff_eq!(polyval(&c, 10.0), 3.0 - 0.2 + 1e-3, epsilon = 1e-9);
    }

    #[test]
    fn test_detrended_noise_removes_trend_and_scales() {
        let displacement: Vec<f64> = (0..200)
            .map(|i| 0.01 * i as f64 + if i % 2 == 0 { 0.1 } else { -0.1 })
            .collect();
        let noise = detrended_noise(&displacement, 1, 50.0).unwrap();
        let stats = describe(&noise).unwrap();
        assert_abs_diff_eq!(stats.mean, 0.0, epsilon = 1e-9);
        assert!((stats.max - 5.0).abs() < 0.1);
        assert!((stats.min + 5.0).abs() < 0.1);
    }

    #[test]
    fn test_polyfit_needs_enough_points() {
        assert!(polyfit(&[0.0, 1.0], &[1.0, 2.0], 2).is_err());
    }
}
