//! 样条模型的插值基础设施
//!
//! - [`gaussian_filter1d`]：高斯平滑（反射边界，截断半径 4σ）
//! - [`CubicSpline`]：not-a-knot 边界条件的三次插值样条，区间外按端段多项式外推

use crate::error::{OdmError, OdmResult};

/// 高斯核截断倍数（半径 = ⌊truncate·σ + 0.5⌋）
const GAUSSIAN_TRUNCATE: f64 = 4.0;

/// 对称反射边界：`d c b a | a b c d | d c b a`
#[inline]
fn reflect_index(i: isize, n: usize) -> usize {
    let period = 2 * n as isize;
    let m = i.rem_euclid(period);
    if m < n as isize {
        m as usize
    } else {
        (period - 1 - m) as usize
    }
}

fn gaussian_kernel(sigma: f64) -> Vec<f64> {
    let radius = (GAUSSIAN_TRUNCATE * sigma + 0.5) as usize;
    let denom = 2.0 * sigma * sigma;
    let mut weights: Vec<f64> = (-(radius as isize)..=radius as isize)
        .map(|k| (-((k * k) as f64) / denom).exp())
        .collect();
    let total: f64 = weights.iter().sum();
    weights.iter_mut().for_each(|w| *w /= total);
    weights
}

/// 一维高斯平滑
///
/// `sigma <= 0` 或输入为空时原样返回。
pub fn gaussian_filter1d(input: &[f64], sigma: f64) -> Vec<f64> {
    let n = input.len();
    if n == 0 || sigma <= 0.0 {
        return input.to_vec();
    }
    let kernel = gaussian_kernel(sigma);
    let radius = (kernel.len() / 2) as isize;

    (0..n as isize)
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .map(|(k, w)| w * input[reflect_index(i + k as isize - radius, n)])
                .sum()
        })
        .collect()
}

/// not-a-knot 三次插值样条
#[derive(Debug, Clone, PartialEq)]
pub struct CubicSpline {
    x: Vec<f64>,
    y: Vec<f64>,
    /// 各节点处的二阶导数
    second_derivatives: Vec<f64>,
}

impl CubicSpline {
    /// 最少节点数（not-a-knot 条件需要至少两个内部节点）
    pub const MIN_POINTS: usize = 4;

    pub fn new(x: &[f64], y: &[f64]) -> OdmResult<Self> {
        let n = x.len();
        if n != y.len() {
            return Err(OdmError::InvalidInput(format!(
                "样条节点x与y长度不一致: {n} vs {}",
                y.len()
            )));
        }
        if n < Self::MIN_POINTS {
            return Err(OdmError::InvalidInput(format!(
                "样条至少需要 {} 个节点，实际 {n}",
                Self::MIN_POINTS
            )));
        }
        if x.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(OdmError::InvalidInput("样条节点x必须严格递增".to_string()));
        }

        let second_derivatives = solve_not_a_knot(x, y);
        Ok(Self {
            x: x.to_vec(),
            y: y.to_vec(),
            second_derivatives,
        })
    }

    /// 以整数像素 `offset, offset+1, ...` 为节点构造样条
    pub fn from_samples(offset: usize, samples: &[f64]) -> OdmResult<Self> {
        let x: Vec<f64> = (offset..offset + samples.len()).map(|i| i as f64).collect();
        Self::new(&x, samples)
    }

    #[inline]
    pub fn x_min(&self) -> f64 {
        self.x[0]
    }

    #[inline]
    pub fn x_max(&self) -> f64 {
        self.x[self.x.len() - 1]
    }

    /// 样条取值；区间外沿用首末段多项式
    pub fn eval(&self, t: f64) -> f64 {
        let n = self.x.len();
        // 落点所在区间 [x_i, x_{i+1}]，夹紧到 [0, n-2]
        let i = self
            .x
            .partition_point(|&xi| xi <= t)
            .saturating_sub(1)
            .min(n - 2);

        let (x0, x1) = (self.x[i], self.x[i + 1]);
        let (y0, y1) = (self.y[i], self.y[i + 1]);
        let (m0, m1) = (self.second_derivatives[i], self.second_derivatives[i + 1]);
        let h = x1 - x0;
        let left = x1 - t;
        let right = t - x0;

        m0 * left.powi(3) / (6.0 * h)
            + m1 * right.powi(3) / (6.0 * h)
            + (y0 / h - m0 * h / 6.0) * left
            + (y1 / h - m1 * h / 6.0) * right
    }
}

/// 求解二阶导数 M₀..Mₙ₋₁
///
/// 两端的 not-a-knot 条件（首末内部节点处三阶导连续）消去 M₀ 与 Mₙ₋₁，
/// 剩余未知量 M₁..Mₙ₋₂ 构成三对角系统，用追赶法求解。
fn solve_not_a_knot(x: &[f64], y: &[f64]) -> Vec<f64> {
    let n = x.len();
    let h: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();
    let k = n - 2;

    let mut sub = vec![0.0; k];
    let mut diag = vec![0.0; k];
    let mut sup = vec![0.0; k];
    let mut rhs = vec![0.0; k];

    for row in 0..k {
        let i = row + 1;
        let (ha, hb) = (h[i - 1], h[i]);
        sub[row] = ha;
        diag[row] = 2.0 * (ha + hb);
        sup[row] = hb;
        rhs[row] = 6.0 * ((y[i + 1] - y[i]) / hb - (y[i] - y[i - 1]) / ha);
    }

    // M₀ = (1 + h₀/h₁)·M₁ − (h₀/h₁)·M₂
    let (h0, h1) = (h[0], h[1]);
    diag[0] += h0 + h0 * h0 / h1;
    sup[0] -= h0 * h0 / h1;
    sub[0] = 0.0;

    // Mₙ₋₁ = (1 + b/a)·Mₙ₋₂ − (b/a)·Mₙ₋₃，a = hₙ₋₃，b = hₙ₋₂
    let (a, b) = (h[n - 3], h[n - 2]);
    diag[k - 1] += b + b * b / a;
    sub[k - 1] -= b * b / a;
    sup[k - 1] = 0.0;

    let inner = thomas(&sub, &diag, &sup, &rhs);

    let mut m = Vec::with_capacity(n);
    m.push((1.0 + h0 / h1) * inner[0] - (h0 / h1) * inner[1]);
    m.extend_from_slice(&inner);
    m.push((1.0 + b / a) * inner[k - 1] - (b / a) * inner[k - 2]);
    m
}

/// 追赶法求解三对角方程组
fn thomas(sub: &[f64], diag: &[f64], sup: &[f64], rhs: &[f64]) -> Vec<f64> {
    let k = diag.len();
    let mut c = vec![0.0; k];
    let mut d = vec![0.0; k];

    c[0] = sup[0] / diag[0];
    d[0] = rhs[0] / diag[0];
    for i in 1..k {
        let denom = diag[i] - sub[i] * c[i - 1];
        c[i] = sup[i] / denom;
        d[i] = (rhs[i] - sub[i] * d[i - 1]) / denom;
    }

    let mut out = vec![0.0; k];
    out[k - 1] = d[k - 1];
    for i in (0..k - 1).rev() {
        out[i] = d[i] - c[i] * out[i + 1];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn cubic(t: f64) -> f64 {
        0.5 * t * t * t - 2.0 * t * t + t - 3.0
    }

    #[test]
    fn test_spline_reproduces_cubic_polynomial() {
        let x: Vec<f64> = (0..12).map(f64::from).collect();
        let y: Vec<f64> = x.iter().map(|&t| cubic(t)).collect();
        let spline = CubicSpline::new(&x, &y).unwrap();

        for t in [0.0, 0.25, 3.7, 6.5, 10.99, 11.0] {
            assert_abs_diff_eq!(spline.eval(t), cubic(t), epsilon = 1e-8);
        }
        // 外推沿端段多项式，三次函数仍然精确
        assert_abs_diff_eq!(spline.eval(-1.5), cubic(-1.5), epsilon = 1e-7);
        assert_abs_diff_eq!(spline.eval(13.0), cubic(13.0), epsilon = 1e-7);
    }

    #[test]
    fn test_spline_minimum_four_points_is_single_cubic() {
        let x = [1.0, 2.0, 4.0, 5.0];
        let y: Vec<f64> = x.iter().map(|&t| cubic(t)).collect();
        let spline = CubicSpline::new(&x, &y).unwrap();
        assert_abs_diff_eq!(spline.eval(3.0), cubic(3.0), epsilon = 1e-9);
    }

    #[test]
    fn test_spline_interpolates_knots() {
        let y = [3.0, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0, 6.0];
        let spline = CubicSpline::from_samples(10, &y).unwrap();
        for (i, &v) in y.iter().enumerate() {
            assert_abs_diff_eq!(spline.eval(10.0 + i as f64), v, epsilon = 1e-10);
        }
        assert_eq!(spline.x_min(), 10.0);
        assert_eq!(spline.x_max(), 17.0);
    }

    #[test]
    fn test_spline_rejects_short_or_unsorted_input() {
        assert!(CubicSpline::new(&[0.0, 1.0, 2.0], &[0.0, 1.0, 0.0]).is_err());
        assert!(CubicSpline::new(&[0.0, 2.0, 1.0, 3.0], &[0.0; 4]).is_err());
    }

    #[test]
    fn test_gaussian_filter_preserves_constant_signal() {
        let smoothed = gaussian_filter1d(&[7.0; 30], 2.0);
        assert!(smoothed.iter().all(|&v| (v - 7.0).abs() < 1e-12));
    }

    #[test]
    fn test_gaussian_filter_reflect_boundary_and_symmetry() {
        let mut impulse = vec![0.0; 41];
        impulse[20] = 1.0;
        let smoothed = gaussian_filter1d(&impulse, 2.0);
        // 核半径为8，对称且总和为1
        assert_eq!(smoothed[11], 0.0);
        assert!(smoothed[12] > 0.0);
        assert_abs_diff_eq!(smoothed[18], smoothed[22], epsilon = 1e-15);
        assert_abs_diff_eq!(smoothed.iter().sum::<f64>(), 1.0, epsilon = 1e-12);

        // 反射边界不丢失质量
        let ramp: Vec<f64> = (0..5).map(f64::from).collect();
        let short = gaussian_filter1d(&ramp, 2.0);
        assert_eq!(short.len(), 5);
        assert_abs_diff_eq!(short.iter().sum::<f64>(), 10.0, epsilon = 1e-9);
    }

    #[test]
    fn test_reflect_index() {
        assert_eq!(reflect_index(-1, 4), 0);
        assert_eq!(reflect_index(-2, 4), 1);
        assert_eq!(reflect_index(4, 4), 3);
        assert_eq!(reflect_index(5, 4), 2);
        assert_eq!(reflect_index(9, 4), 1);
    }
}
