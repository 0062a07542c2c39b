//! 逐剖面峰拟合
//!
//! 对一组剖面按时间顺序逐个拟合：每个剖面以上一个剖面的最优参数为起点（热启动），
//! 第一个剖面的起点来自调用方给定的参数或模型的初值估计。
//! 任一剖面失败即整体失败，不跳过、不重试。

use log::debug;

use crate::core::least_squares::{CurveFitResult, OptimizerOptions, chi_square, curve_fit};
use crate::core::peak_model::PeakFunction;
use crate::core::profile::{AnchorPoints, FitWindow, PeakFit, ProfileRecord};
use crate::error::{OdmError, OdmResult};

/// 拟合上下文（会话期间不变的配置）
#[derive(Debug, Clone, Copy)]
pub struct FitContext<'a> {
    pub anchors: &'a AnchorPoints,
    pub window: FitWindow,
    pub options: OptimizerOptions,
    /// 本批第一个剖面在整个数据流中的索引（用于错误定位）
    pub index_base: usize,
}

/// 一批剖面的拟合结果，与输入一一对应
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FitSeries {
    pub fits: Vec<PeakFit>,
}

impl FitSeries {
    #[inline]
    pub fn len(&self) -> usize {
        self.fits.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fits.is_empty()
    }

    /// 最后一个剖面的最优参数（下一批的热启动起点）
    pub fn last_parameters(&self) -> Option<&[f64]> {
        self.fits
            .last()
            .map(|f| f.curve_fit.optimal_parameters.as_slice())
    }

    pub fn displacements(&self) -> Vec<f64> {
        self.fits.iter().map(|f| f.displacement).collect()
    }

    pub fn chi_squares(&self) -> Vec<f64> {
        self.fits.iter().map(|f| f.chi_square).collect()
    }

    /// 光束宽度序列（模型不支持时为 None）
    pub fn beam_widths(&self) -> Option<Vec<f64>> {
        self.fits.iter().map(|f| f.beam_width).collect()
    }
}

/// 拟合一批剖面的位移
///
/// `p_initial` 为 `None` 时在第一个剖面上调用模型的初值估计
/// （样条模型会在此时重建样条）。
pub fn fit_displacements<M: PeakFunction>(
    model: &mut M,
    records: &[ProfileRecord],
    p_initial: Option<&[f64]>,
    ctx: &FitContext<'_>,
) -> OdmResult<FitSeries> {
    let Some(first) = records.first() else {
        return Ok(FitSeries::default());
    };

    let seed = match p_initial {
        Some(p) => p.to_vec(),
        None => {
            let estimate = model.estimate_initial_parameters(&first.intensity_profile, ctx.anchors)?;
            debug!("{} 初值估计: {estimate:?}", model.name());
            estimate
        }
    };

    let model: &M = model;
    let x_values = ctx.window.x_values();

    let (_, fits) = records.iter().enumerate().try_fold(
        (seed, Vec::with_capacity(records.len())),
        |(seed, mut fits), (offset, record)| {
            let profile_index = ctx.index_base + offset;
            let profile = &record.intensity_profile;
            ctx.window.check(profile.len())?;
            let observed = ctx.window.slice(profile);

            let solved = curve_fit(
                |x, p| model.evaluate(x, p),
                &x_values,
                observed,
                &seed,
                &ctx.options,
            )
            .map_err(|failure| OdmError::FitConvergence {
                profile_index,
                timestamp: Some(record.timestamp),
                seed: seed.clone(),
                reason: failure.reason,
            })?;

            let expected = model.evaluate_all(&x_values, &solved.parameters);
            let chi = chi_square(observed, &expected);
            let fit = PeakFit {
                displacement: model.displacement(&solved.parameters),
                chi_square: chi,
                beam_width: model.beam_width(&solved.parameters),
                curve_fit: CurveFitResult {
                    chi_square: chi,
                    optimal_parameters: solved.parameters.clone(),
                    covariance: solved.covariance,
                    function_evals: solved.function_evals,
                },
            };
            fits.push(fit);

            Ok::<_, OdmError>((solved.parameters, fits))
        },
    )?;

    debug!(
        "{}: 完成 {} 个剖面拟合（起始索引 {}）",
        model.name(),
        fits.len(),
        ctx.index_base
    );
    Ok(FitSeries { fits })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::peak_model::{
        DualHarmonic, Gaussian, Harmonic, Jaapian, Merlijnian, ScaledSpline, Sinc,
    };
    use crate::core::profile::{IntensityProfile, Point};
    use chrono::{Duration, NaiveDate, NaiveDateTime};

    const PROFILE_LEN: usize = 100;

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2014, 3, 12)
            .and_then(|d| d.and_hms_opt(10, 0, 0))
            .unwrap()
    }

    fn record(i: usize, samples: Vec<f64>) -> ProfileRecord {
        ProfileRecord {
            timestamp: t0() + Duration::milliseconds(50 * i as i64),
            relative_time: 0.05 * i as f64,
            actuator_voltage: i as f64 * 0.1,
            intensity_profile: IntensityProfile::new(samples),
        }
    }

    fn synth<M: PeakFunction>(model: &M, params: &[f64]) -> Vec<f64> {
        (0..PROFILE_LEN)
            .map(|x| model.evaluate(x as f64, params))
            .collect()
    }

    fn anchors() -> AnchorPoints {
        AnchorPoints {
            peak: Point::new(45.0, 240.0),
            lower_valley: Point::new(35.0, 20.0),
            upper_valley: Point::new(55.0, 20.0),
            min_bound: Point::new(30.0, 20.0),
            max_bound: Point::new(70.0, 20.0),
            spline_min_bound: None,
            spline_max_bound: None,
        }
    }

    fn ctx(anchors: &AnchorPoints) -> FitContext<'_> {
        FitContext {
            anchors,
            window: FitWindow::from_anchors(anchors).unwrap(),
            options: OptimizerOptions::with_limits(100.0, 20_000),
            index_base: 0,
        }
    }

    #[test]
    fn test_drifting_gaussian_tracks_every_profile() {
        let truth = |i: usize| [45.0 + 0.01 * i as f64, 5.0, 1500.0, 0.0, 20.0];
        let records: Vec<ProfileRecord> = (0..40)
            .map(|i| record(i, synth(&Gaussian, &truth(i))))
            .collect();
        let anchors = anchors();

        let series = fit_displacements(&mut Gaussian, &records, None, &ctx(&anchors)).unwrap();
        assert_eq!(series.len(), records.len());
        for (i, d) in series.displacements().iter().enumerate() {
            assert!((d - truth(i)[0]).abs() < 1e-3, "profile {i}: {d}");
        }
        let widths = series.beam_widths().unwrap();
        assert!((widths[0] - 10.0).abs() < 1e-3);
        assert!(series.chi_squares().iter().all(|c| c.abs() < 1e-6));
        assert_eq!(series.last_parameters().unwrap().len(), 5);
    }

    fn assert_round_trip<M: PeakFunction>(mut model: M, truth: &[f64], seed: &[f64]) {
        let records = vec![record(0, synth(&model, truth))];
        let anchors = anchors();
        let series = fit_displacements(&mut model, &records, Some(seed), &ctx(&anchors)).unwrap();
        let expected = model.displacement(truth);
        let got = series.displacements()[0];
        assert!(
            (got - expected).abs() < 1e-3,
            "{}: expected {expected}, got {got}",
            model.name()
        );
    }

    #[test]
    fn test_analytic_models_round_trip() {
        assert_round_trip(
            Gaussian,
            &[50.3, 6.0, 3000.0, 0.5, 20.0],
            &[50.0, 6.5, 2800.0, 0.0, 18.0],
        );
        assert_round_trip(
            Harmonic,
            &[50.2, 80.0, 0.025, 5.0, 10.0],
            &[50.6, 76.0, 0.0255, 4.0, 11.0],
        );
        assert_round_trip(
            Merlijnian,
            &[4.0, 42.0, 58.4, 2.0, 50.2, 300.0],
            &[4.2, 42.2, 58.2, 2.1, 50.0, 295.0],
        );
        assert_round_trip(
            Jaapian,
            &[16.0, 6.0, 0.9, 50.3, 200.0, 10.0],
            &[16.4, 6.3, 0.9, 50.0, 205.0, 10.0],
        );
        assert_round_trip(
            DualHarmonic,
            &[50.1, 0.15, 40.0, 20.0, 30.0],
            &[50.4, 0.148, 38.0, 21.0, 31.0],
        );
        assert_round_trip(
            Sinc,
            &[0.3, 150.0, 20.0, 49.8],
            &[0.31, 140.0, 22.0, 50.1],
        );
    }

    /// 在真值剖面上取锚点：(峰, 下谷, 上谷, 窗口下界, 窗口上界) 的像素位置
    fn anchors_on(samples: &[f64], pixels: [usize; 5]) -> AnchorPoints {
        let at = |x: usize| Point::new(x as f64, samples[x]);
        AnchorPoints {
            peak: at(pixels[0]),
            lower_valley: at(pixels[1]),
            upper_valley: at(pixels[2]),
            min_bound: at(pixels[3]),
            max_bound: at(pixels[4]),
            spline_min_bound: None,
            spline_max_bound: None,
        }
    }

    fn assert_estimated_round_trip<M: PeakFunction>(mut model: M, truth: &[f64], pixels: [usize; 5]) {
        let samples = synth(&model, truth);
        let anchors = anchors_on(&samples, pixels);
        let records = vec![record(0, samples.clone()), record(1, samples)];
        let series = fit_displacements(&mut model, &records, None, &ctx(&anchors))
            .unwrap_or_else(|e| panic!("{}: {e}", model.name()));
        let expected = model.displacement(truth);
        for got in series.displacements() {
            assert!(
                (got - expected).abs() < 1e-3,
                "{}: expected {expected}, got {got}",
                model.name()
            );
        }
    }

    #[test]
    fn test_analytic_models_round_trip_from_anchor_estimates() {
        assert_estimated_round_trip(
            Gaussian,
            &[50.3, 6.0, 3000.0, 0.5, 20.0],
            [50, 44, 56, 30, 70],
        );
        assert_estimated_round_trip(
            Harmonic,
            &[50.2, 80.0, 0.025, 5.0, 10.0],
            [50, 30, 70, 30, 70],
        );
        assert_estimated_round_trip(
            Merlijnian,
            &[2.9, 42.3, 58.1, 290.0, 50.2, 300.0],
            [50, 42, 58, 30, 70],
        );
        assert_estimated_round_trip(
            Jaapian,
            &[16.0, 8.0, 0.95, 50.3, 200.0, 10.0],
            [50, 42, 58, 30, 70],
        );
        assert_estimated_round_trip(
            DualHarmonic,
            &[50.1, 0.15, 40.0, 20.0, 30.0],
            [50, 40, 61, 30, 70],
        );
        assert_estimated_round_trip(
            Sinc,
            &[0.3, 150.0, 20.0, 49.8],
            [50, 35, 65, 30, 70],
        );
    }

    #[test]
    fn test_scaled_spline_follows_template_shift() {
        let base = |shift: f64| -> Vec<f64> {
            (0..PROFILE_LEN)
                .map(|x| {
                    let z = (x as f64 - 50.0 - shift) / 8.0;
                    400.0 * (-0.5 * z * z).exp() + 15.0
                })
                .collect()
        };
        let records = vec![record(0, base(0.0)), record(1, base(0.5)), record(2, base(1.0))];
        let anchors = anchors();

        let series =
            fit_displacements(&mut ScaledSpline::default(), &records, None, &ctx(&anchors))
                .unwrap();
        let d = series.displacements();
        assert!(d[0].abs() < 0.05, "{d:?}");
        assert!((d[1] - 0.5).abs() < 0.05, "{d:?}");
        assert!((d[2] - 1.0).abs() < 0.05, "{d:?}");
    }

    #[test]
    fn test_failure_carries_profile_index_and_seed() {
        let truth = [45.0, 5.0, 1500.0, 0.0, 20.0];
        let mut records: Vec<ProfileRecord> =
            (0..6).map(|i| record(i, synth(&Gaussian, &truth))).collect();
        records[3].intensity_profile = IntensityProfile::new(vec![f64::NAN; PROFILE_LEN]);

        let anchors = anchors();
        let mut context = ctx(&anchors);
        context.index_base = 100;

        let err = fit_displacements(&mut Gaussian, &records, None, &context).unwrap_err();
        match err {
            OdmError::FitConvergence {
                profile_index,
                timestamp,
                seed,
                ..
            } => {
                assert_eq!(profile_index, 103);
                assert_eq!(timestamp, Some(records[3].timestamp));
                assert!((seed[0] - 45.0).abs() < 1e-3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_window_outside_profile_is_bounds_error() {
        let records = vec![record(0, vec![1.0; 60])];
        let anchors = anchors();
        let err = fit_displacements(
            &mut Gaussian,
            &records,
            Some(&[45.0, 5.0, 1500.0, 0.0, 20.0]),
            &ctx(&anchors),
        )
        .unwrap_err();
        assert!(matches!(err, OdmError::Bounds { .. }));
    }

    #[test]
    fn test_empty_batch_is_empty_series() {
        let anchors = anchors();
        let series = fit_displacements(&mut Gaussian, &[], None, &ctx(&anchors)).unwrap();
        assert!(series.is_empty());
        assert!(series.last_parameters().is_none());
    }
}
