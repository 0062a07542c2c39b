//! ODM测试固件生成器
//!
//! 生成带漂移高斯峰（及静止参考峰）的合成强度剖面序列，
//! 以及对应的原始数据文件。

#![allow(dead_code)]

use chrono::{Duration, NaiveDate, NaiveDateTime};
use odm_analysis_tool::core::peak_model::{Gaussian, PeakFunction, PeakModel};
use odm_analysis_tool::core::profile::{AnchorPoints, IntensityProfile, Point, ProfileRecord};
use odm_analysis_tool::core::least_squares::OptimizerOptions;
use odm_analysis_tool::processing::session::{PeakFitSettings, SessionConfig};
use std::fs::create_dir_all;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

pub fn log(msg_zh: impl AsRef<str>, msg_en: impl AsRef<str>) {
    println!("{} / {}", msg_zh.as_ref(), msg_en.as_ref());
}

/// 剖面长度（像素）
pub const PROFILE_LEN: usize = 200;

/// 移动峰静止位置与随电压的漂移系数（像素/伏）
pub const MOVING_CENTER: f64 = 60.0;
pub const DRIFT_PX_PER_VOLT: f64 = 0.8;

/// 参考峰位置
pub const REFERENCE_CENTER: f64 = 140.0;

const MOVING_SIGMA: f64 = 5.0;
const MOVING_AREA: f64 = 20_000.0;
const REFERENCE_SIGMA: f64 = 6.0;
const REFERENCE_AREA: f64 = 15_000.0;
const BACKGROUND: f64 = 40.0;

pub fn t0() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2014, 1, 21)
        .and_then(|d| d.and_hms_milli_opt(14, 3, 7, 250))
        .expect("valid fixture time")
}

/// 三角波执行器电压：0 → peak → 0 → ...，每个半周期 `half_period` 行
pub fn triangle_voltage(i: usize, half_period: usize, peak: f64) -> f64 {
    let phase = i % (2 * half_period);
    let step = peak / half_period as f64;
    if phase <= half_period {
        phase as f64 * step
    } else {
        (2 * half_period - phase) as f64 * step
    }
}

/// 第 `i` 行移动峰的真实位置
pub fn moving_center(voltage: f64) -> f64 {
    MOVING_CENTER + DRIFT_PX_PER_VOLT * voltage
}

/// 生成一条剖面（可选叠加参考峰）
pub fn synth_profile(moving_mu: f64, with_reference: bool) -> Vec<f64> {
    let moving = [moving_mu, MOVING_SIGMA, MOVING_AREA, 0.0, BACKGROUND];
    let reference = [REFERENCE_CENTER, REFERENCE_SIGMA, REFERENCE_AREA, 0.0, 0.0];
    (0..PROFILE_LEN)
        .map(|x| {
            let x = x as f64;
            let mut value = Gaussian.evaluate(x, &moving);
            if with_reference {
                value += Gaussian.evaluate(x, &reference);
            }
            value
        })
        .collect()
}

/// 生成 `n` 行合成记录（10 ms 间隔）
pub fn synthetic_records(n: usize, with_reference: bool) -> Vec<ProfileRecord> {
    (0..n)
        .map(|i| {
            let voltage = triangle_voltage(i, 12, 6.0);
            ProfileRecord {
                timestamp: t0() + Duration::milliseconds(10 * i as i64),
                relative_time: 0.01 * i as f64,
                actuator_voltage: voltage,
                intensity_profile: IntensityProfile::new(synth_profile(
                    moving_center(voltage),
                    with_reference,
                )),
            }
        })
        .collect()
}

fn peak_value(sigma: f64, area: f64) -> f64 {
    area / (sigma * (2.0 * std::f64::consts::PI).sqrt()) + BACKGROUND
}

pub fn moving_anchors() -> AnchorPoints {
    AnchorPoints {
        peak: Point::new(MOVING_CENTER, peak_value(MOVING_SIGMA, MOVING_AREA)),
        lower_valley: Point::new(MOVING_CENTER - 6.0, BACKGROUND),
        upper_valley: Point::new(MOVING_CENTER + 6.0, BACKGROUND),
        min_bound: Point::new(35.0, BACKGROUND),
        max_bound: Point::new(100.0, BACKGROUND),
        spline_min_bound: None,
        spline_max_bound: None,
    }
}

pub fn reference_anchors() -> AnchorPoints {
    AnchorPoints {
        peak: Point::new(
            REFERENCE_CENTER,
            peak_value(REFERENCE_SIGMA, REFERENCE_AREA),
        ),
        lower_valley: Point::new(REFERENCE_CENTER - 7.0, BACKGROUND),
        upper_valley: Point::new(REFERENCE_CENTER + 7.0, BACKGROUND),
        min_bound: Point::new(115.0, BACKGROUND),
        max_bound: Point::new(165.0, BACKGROUND),
        spline_min_bound: None,
        spline_max_bound: None,
    }
}

/// 会话配置：移动峰高斯模型，可选参考峰
pub fn session_config(with_reference: bool) -> SessionConfig {
    let moving = PeakFitSettings::new(PeakModel::Gaussian(Gaussian), moving_anchors())
        .expect("valid moving settings");
    let mut config = SessionConfig::new(moving);
    if with_reference {
        config.reference = Some(
            PeakFitSettings::new(PeakModel::Gaussian(Gaussian), reference_anchors())
                .expect("valid reference settings"),
        );
    }
    config.optimizer = OptimizerOptions::with_limits(100.0, 20_000);
    config
}

/// 测试专用的唯一临时目录
pub fn unique_temp_dir(tag: &str) -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let dir = std::env::temp_dir().join(format!(
        "odm_tests_{}_{}_{tag}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::SeqCst)
    ));
    create_dir_all(&dir).expect("无法创建临时测试目录");
    dir
}

/// 格式化为原始数据文件的一行（剖面四舍五入为整数，数值带单位后缀）
pub fn raw_line(record: &ProfileRecord) -> String {
    let profile: String = record
        .intensity_profile
        .samples()
        .iter()
        .map(|v| format!("{};", v.round() as i64))
        .collect();
    format!(
        "{}\t{} s\t{} V\t<{profile}>\n",
        record.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
        record.relative_time,
        record.actuator_voltage
    )
}

pub const RAW_HEADER: &str = "timestamp\trelativeTime\tactuatorVoltage\tintensityProfile\n";

/// 写出原始数据文件，返回路径
pub fn write_raw_data_file(dir: &std::path::Path, records: &[ProfileRecord]) -> PathBuf {
    let path = dir.join("data.csv");
    let mut content = String::from(RAW_HEADER);
    for record in records {
        content.push_str(&raw_line(record));
    }
    std::fs::write(&path, content).expect("无法写入原始数据文件");
    path
}

/// 剖面四舍五入为整数后的记录（与写出文件后读回的内容一致）
pub fn quantized(records: &[ProfileRecord]) -> Vec<ProfileRecord> {
    records
        .iter()
        .map(|r| ProfileRecord {
            intensity_profile: IntensityProfile::new(
                r.intensity_profile.samples().iter().map(|v| v.round()).collect(),
            ),
            ..r.clone()
        })
        .collect()
}
