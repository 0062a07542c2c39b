//! 非线性最小二乘引擎
//!
//! Levenberg-Marquardt 算法，前向差分雅可比，Marquardt 对角缩放。
//! 行为对齐常用的 `curve_fit` 语义：
//! - 初始步长上界 = `factor × ‖D·p₀‖`（p₀ 全零时为 `factor`）
//! - 函数调用次数上限 `max_fev`，默认 `200 × (n + 1)`
//! - 协方差 = pinv(JᵀJ) × SSR / (m − n)，m ≤ n 或矩阵奇异时填充为 ∞
//!
//! ## 收敛判据
//! - 实际与预测的相对残差下降均 ≤ `ftol`
//! - 缩放后的相对步长 ≤ `xtol`
//! - 梯度与残差夹角余弦 ≤ `gtol`（默认关闭）

use nalgebra::{DMatrix, DVector};

/// 前向差分步长系数（√machine-eps）
const JACOBIAN_EPS: f64 = 1.490_116_119_384_765_6e-8;

/// 初始阻尼系数
const INITIAL_LAMBDA: f64 = 1e-3;

/// 阻尼系数上限，超过视为无法继续下降
const MAX_LAMBDA: f64 = 1e16;

/// 优化器选项
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizerOptions {
    /// 初始步长上界系数
    pub factor: f64,
    /// 最大函数调用次数；`None` 时为 `200 × (参数个数 + 1)`
    pub max_fev: Option<usize>,
    pub ftol: f64,
    pub xtol: f64,
    pub gtol: f64,
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        Self {
            factor: 100.0,
            max_fev: None,
            ftol: 1.49012e-8,
            xtol: 1.49012e-8,
            gtol: 0.0,
        }
    }
}

impl OptimizerOptions {
    /// 指定步长系数与调用上限（会话默认 factor=100, max_fev=20000）
    pub fn with_limits(factor: f64, max_fev: usize) -> Self {
        Self {
            factor,
            max_fev: Some(max_fev),
            ..Self::default()
        }
    }

    fn effective_max_fev(&self, n_params: usize) -> usize {
        self.max_fev.unwrap_or(200 * (n_params + 1))
    }
}

/// 单次曲线拟合结果
#[derive(Debug, Clone, PartialEq)]
pub struct CurveFitResult {
    pub optimal_parameters: Vec<f64>,
    pub covariance: DMatrix<f64>,
    pub chi_square: f64,
    /// 本次拟合消耗的函数调用次数
    pub function_evals: usize,
}

/// 最小二乘求解输出（不含拟合优度）
#[derive(Debug, Clone)]
pub struct LeastSquaresFit {
    pub parameters: Vec<f64>,
    pub covariance: DMatrix<f64>,
    pub function_evals: usize,
    pub sum_squared_residuals: f64,
}

/// 求解失败原因
#[derive(Debug, Clone, PartialEq)]
pub struct FitFailure {
    pub reason: String,
    pub function_evals: usize,
}

impl FitFailure {
    fn new(reason: impl Into<String>, function_evals: usize) -> Self {
        Self {
            reason: reason.into(),
            function_evals,
        }
    }
}

/// 拟合优度：Σ (观测 − 期望)² / 期望
pub fn chi_square(observed: &[f64], expected: &[f64]) -> f64 {
    observed
        .iter()
        .zip(expected)
        .map(|(&o, &e)| (o - e) * (o - e) / e)
        .sum()
}

struct Problem<'a, F> {
    model: F,
    x: &'a [f64],
    y: &'a [f64],
    evals: usize,
}

impl<F> Problem<'_, F>
where
    F: Fn(f64, &[f64]) -> f64,
{
    fn residuals(&mut self, p: &[f64]) -> DVector<f64> {
        self.evals += 1;
        DVector::from_iterator(
            self.x.len(),
            self.x.iter().zip(self.y).map(|(&x, &y)| (self.model)(x, p) - y),
        )
    }

    fn jacobian(&mut self, p: &[f64], r: &DVector<f64>) -> DMatrix<f64> {
        let m = self.x.len();
        let n = p.len();
        let mut jac = DMatrix::zeros(m, n);
        let mut probe = p.to_vec();
        for j in 0..n {
            let original = probe[j];
            let mut h = JACOBIAN_EPS * original.abs();
            if h == 0.0 {
                h = JACOBIAN_EPS;
            }
            probe[j] = original + h;
            let shifted = self.residuals(&probe);
            probe[j] = original;
            for i in 0..m {
                jac[(i, j)] = (shifted[i] - r[i]) / h;
            }
        }
        jac
    }
}

fn all_finite(v: &DVector<f64>) -> bool {
    v.iter().all(|x| x.is_finite())
}

fn scaled_norm(d: &DVector<f64>, v: &DVector<f64>) -> f64 {
    d.component_mul(v).norm()
}

/// 以 `p0` 为起点拟合 `model(x, p) ≈ y`
///
/// # 参数
/// * `model` - 逐点模型函数 `(x, 参数) -> y`
/// * `x`, `y` - 等长数据
/// * `p0` - 初始参数（热启动时为上一剖面的最优解）
pub fn curve_fit<F>(
    model: F,
    x: &[f64],
    y: &[f64],
    p0: &[f64],
    options: &OptimizerOptions,
) -> Result<LeastSquaresFit, FitFailure>
where
    F: Fn(f64, &[f64]) -> f64,
{
    let m = x.len();
    let n = p0.len();
    if m != y.len() {
        return Err(FitFailure::new(
            format!("x与y长度不一致: {m} vs {}", y.len()),
            0,
        ));
    }
    if n == 0 {
        return Err(FitFailure::new("参数向量为空", 0));
    }
    if m < n {
        return Err(FitFailure::new(
            format!("数据点数({m})少于参数个数({n})"),
            0,
        ));
    }

    let max_fev = options.effective_max_fev(n);
    let mut problem = Problem {
        model,
        x,
        y,
        evals: 0,
    };

    let mut p = DVector::from_column_slice(p0);
    let mut r = problem.residuals(p.as_slice());
    if !all_finite(&r) {
        return Err(FitFailure::new("初始参数处残差非有限值", problem.evals));
    }
    let mut cost = r.norm_squared();

    let mut lambda = INITIAL_LAMBDA;
    let mut nu = 2.0;
    let mut diag = DVector::from_element(n, 0.0);
    let mut step_bound: Option<f64> = None;

    'outer: loop {
        if cost == 0.0 {
            break;
        }

        let jac = problem.jacobian(p.as_slice(), &r);
        let jtj = jac.transpose() * &jac;
        let grad = jac.transpose() * &r;

        // 对角缩放取历史最大值（保持尺度单调）
        for j in 0..n {
            let col = jtj[(j, j)].sqrt();
            if col > diag[j] {
                diag[j] = col;
            }
            if diag[j] == 0.0 {
                diag[j] = 1.0;
            }
        }

        if options.gtol > 0.0 {
            let rnorm = cost.sqrt();
            let cosine = (0..n)
                .map(|j| {
                    let col = jac.column(j).norm();
                    if col == 0.0 {
                        0.0
                    } else {
                        (grad[j] / (col * rnorm)).abs()
                    }
                })
                .fold(0.0_f64, f64::max);
            if cosine <= options.gtol {
                break;
            }
        }

        if grad.iter().all(|&g| g == 0.0) {
            return Err(FitFailure::new(
                "雅可比矩阵为零，参数不影响模型输出",
                problem.evals,
            ));
        }

        let mut bound = *step_bound.get_or_insert_with(|| {
            let pn = scaled_norm(&diag, &p);
            if pn > 0.0 { options.factor * pn } else { options.factor }
        });

        // 被拒绝的步长只调整阻尼，复用本轮的 JᵀJ 与梯度
        loop {
            if problem.evals >= max_fev {
                return Err(FitFailure::new(
                    format!("函数调用次数达到上限 {max_fev}"),
                    problem.evals,
                ));
            }

            let mut damped = jtj.clone();
            for j in 0..n {
                damped[(j, j)] += lambda * diag[j] * diag[j];
            }
            let Some(chol) = damped.cholesky() else {
                lambda *= nu;
                nu *= 2.0;
                if lambda > MAX_LAMBDA {
                    return Err(FitFailure::new("法方程无法分解", problem.evals));
                }
                continue;
            };

            let mut step = chol.solve(&(-&grad));
            let mut step_norm = scaled_norm(&diag, &step);
            if step_norm > bound {
                step *= bound / step_norm;
                step_norm = bound;
            }

            let p_norm = scaled_norm(&diag, &p);
            let trial = &p + &step;
            let r_trial = problem.residuals(trial.as_slice());
            let cost_trial = r_trial.norm_squared();

            // 线性化模型的预测下降量
            let predicted = -(2.0 * step.dot(&grad) + (&jtj * &step).dot(&step));

            if all_finite(&r_trial) && cost_trial < cost {
                let actual_reduction = 1.0 - cost_trial / cost;
                let predicted_reduction = predicted / cost;
                let rho = if predicted > 0.0 {
                    (cost - cost_trial) / predicted
                } else {
                    0.0
                };

                p = trial;
                r = r_trial;
                cost = cost_trial;

                let factor = 1.0 - (2.0 * rho - 1.0).powi(3);
                lambda *= factor.max(1.0 / 3.0);
                nu = 2.0;
                step_bound = Some(if rho > 0.75 {
                    bound.max(2.0 * step_norm)
                } else {
                    bound
                });

                if actual_reduction.abs() <= options.ftol
                    && predicted_reduction <= options.ftol
                    && rho <= 2.0
                {
                    break 'outer;
                }
                if step_norm <= options.xtol * p_norm {
                    break 'outer;
                }
                continue 'outer;
            }

            // 拒绝：加大阻尼并收缩步长上界
            if step_norm <= options.xtol * p_norm {
                break 'outer;
            }
            lambda *= nu;
            nu *= 2.0;
            bound = (0.5 * step_norm).min(bound);
            if lambda > MAX_LAMBDA {
                return Err(FitFailure::new(
                    format!("阻尼系数超过 {MAX_LAMBDA:e}，无法找到下降方向"),
                    problem.evals,
                ));
            }
        }
    }

    let function_evals = problem.evals;
    let jac = problem.jacobian(p.as_slice(), &r);
    let covariance = covariance_from_jacobian(&jac, cost, m, n);

    Ok(LeastSquaresFit {
        parameters: p.as_slice().to_vec(),
        covariance,
        function_evals,
        sum_squared_residuals: cost,
    })
}

/// pinv(JᵀJ) × SSR / (m − n)
fn covariance_from_jacobian(jac: &DMatrix<f64>, ssr: f64, m: usize, n: usize) -> DMatrix<f64> {
    if m <= n {
        return DMatrix::from_element(n, n, f64::INFINITY);
    }
    let jtj = jac.transpose() * jac;
    match jtj.pseudo_inverse(1e-15) {
        Ok(inverse) if inverse.iter().all(|v| v.is_finite()) => inverse * (ssr / (m - n) as f64),
        _ => DMatrix::from_element(n, n, f64::INFINITY),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn line(x: f64, p: &[f64]) -> f64 {
        p[0] * x + p[1]
    }

    fn gaussian(x: f64, p: &[f64]) -> f64 {
        p[2] * (-0.5 * ((x - p[0]) / p[1]).powi(2)).exp() + p[3]
    }

    #[test]
    fn test_linear_fit_recovers_exact_parameters() {
        let x: Vec<f64> = (0..20).map(f64::from).collect();
        let y: Vec<f64> = x.iter().map(|&x| 2.5 * x - 1.0).collect();
        let fit = curve_fit(line, &x, &y, &[0.0, 0.0], &OptimizerOptions::default()).unwrap();
        assert_abs_diff_eq!(fit.parameters[0], 2.5, epsilon = 1e-7);
        assert_abs_diff_eq!(fit.parameters[1], -1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_gaussian_fit_from_rough_seed() {
        let x: Vec<f64> = (0..80).map(f64::from).collect();
        let truth = [41.3, 5.5, 120.0, 10.0];
        let y: Vec<f64> = x.iter().map(|&x| gaussian(x, &truth)).collect();
        let fit = curve_fit(
            gaussian,
            &x,
            &y,
            &[40.0, 8.0, 100.0, 5.0],
            &OptimizerOptions::default(),
        )
        .unwrap();
        assert_abs_diff_eq!(fit.parameters[0], truth[0], epsilon = 1e-6);
        assert_abs_diff_eq!(fit.parameters[1], truth[1], epsilon = 1e-6);
    }

    #[test]
    fn test_noisy_fit_has_finite_covariance() {
        let x: Vec<f64> = (0..30).map(f64::from).collect();
        // 确定性“噪声”
        let y: Vec<f64> = x
            .iter()
            .enumerate()
            .map(|(i, &x)| 0.7 * x + 3.0 + if i % 2 == 0 { 0.05 } else { -0.05 })
            .collect();
        let fit = curve_fit(line, &x, &y, &[1.0, 1.0], &OptimizerOptions::default()).unwrap();
        assert_eq!(fit.covariance.nrows(), 2);
        assert!(fit.covariance.iter().all(|v| v.is_finite()));
        assert!(fit.covariance[(0, 0)] > 0.0);
    }

    #[test]
    fn test_max_fev_exhaustion_is_failure() {
        let x: Vec<f64> = (0..80).map(f64::from).collect();
        let y: Vec<f64> = x
            .iter()
            .map(|&x| gaussian(x, &[41.3, 5.5, 120.0, 10.0]))
            .collect();
        let options = OptimizerOptions {
            max_fev: Some(3),
            ..OptimizerOptions::default()
        };
        let err = curve_fit(gaussian, &x, &y, &[30.0, 2.0, 10.0, 0.0], &options).unwrap_err();
        assert!(err.reason.contains("上限"));
    }

    #[test]
    fn test_parameter_free_model_is_failure() {
        let x: Vec<f64> = (0..10).map(f64::from).collect();
        let y: Vec<f64> = x.iter().map(|&x| x + 1.0).collect();
        let err = curve_fit(|x, _p| 2.0 * x, &x, &y, &[1.0, 3.0], &OptimizerOptions::default())
            .unwrap_err();
        assert!(err.reason.contains("雅可比"), "{}", err.reason);
    }

    #[test]
    fn test_damping_overflow_is_failure() {
        // |p|·x + 1 在 p = 0 处有折点：前向差分梯度指向增大方向，所有步长都被拒绝
        let x: Vec<f64> = (1..12).map(f64::from).collect();
        let y = vec![0.0; x.len()];
        let err = curve_fit(
            |x, p| p[0].abs() * x + 1.0,
            &x,
            &y,
            &[0.0],
            &OptimizerOptions::default(),
        )
        .unwrap_err();
        assert!(err.reason.contains("阻尼"), "{}", err.reason);
        // 拒绝后不重算雅可比：每次尝试只消耗一次函数调用
        assert!(err.function_evals < 20, "{}", err.function_evals);
    }

    #[test]
    fn test_too_few_points_is_failure() {
        let err = curve_fit(line, &[1.0], &[2.0], &[0.0, 0.0], &OptimizerOptions::default())
            .unwrap_err();
        assert_eq!(err.function_evals, 0);
    }

    #[test]
    fn test_chi_square() {
        assert_eq!(chi_square(&[2.0, 4.0], &[1.0, 4.0]), 1.0);
        assert_eq!(chi_square(&[], &[]), 0.0);
    }
}
