//! 分析结果文件
//!
//! - [`AnalysisCsvWriter`]：逐块追加写出分析结果CSV，首次写入时截断已有文件并写表头
//! - [`read_analysis_csv`]：读回分析结果（噪声分析使用），可附加纳米位移列
//! - [`FitResultsWriter`]：逐行拟合细节（最优参数、协方差）以 JSON lines 归档

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::core::cycle_annotator::{CycleLabel, Direction};
use crate::core::least_squares::CurveFitResult;
use crate::core::profile::AnalysisRow;
use crate::error::{OdmError, OdmResult, format_error};
use crate::processing::pipeline::AnalysisSink;
use crate::source::raw_csv::parse_timestamp;
use crate::tools::utils::units;

/// 输出时间戳格式（小数秒按精度自动取3/6/9位）
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

const BASE_COLUMNS: [&str; 8] = [
    "timestamp",
    "relativeTime",
    "cycleNumber",
    "direction",
    "actuatorVoltage",
    "displacement",
    "displacement_mp",
    "chiSquare_mp",
];

const REFERENCE_COLUMNS: [&str; 2] = ["displacement_ref", "chiSquare_ref"];

/// 分析结果CSV写出端
///
/// 是否包含参考峰列由第一次写入的数据决定，之后保持不变。
#[derive(Debug)]
pub struct AnalysisCsvWriter {
    path: PathBuf,
    writer: Option<csv::Writer<File>>,
    with_reference: bool,
    rows_written: usize,
}

impl AnalysisCsvWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
            with_reference: false,
            rows_written: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    /// 首次写入时创建文件（截断已有内容）并写表头
    fn ensure_open(&mut self, with_reference: bool) -> OdmResult<()> {
        if self.writer.is_some() {
            return Ok(());
        }
        let mut writer = csv::Writer::from_path(&self.path)?;
        let header = BASE_COLUMNS
            .iter()
            .chain(REFERENCE_COLUMNS.iter().filter(|_| with_reference));
        writer.write_record(header)?;
        self.with_reference = with_reference;
        self.writer = Some(writer);
        Ok(())
    }
}

fn row_fields(row: &AnalysisRow, with_reference: bool) -> Vec<String> {
    let mut fields = vec![
        row.record.timestamp.format(TIMESTAMP_FORMAT).to_string(),
        row.record.relative_time.to_string(),
        row.label.cycle_number.to_string(),
        row.label.direction.as_str().to_string(),
        row.record.actuator_voltage.to_string(),
        row.displacement.to_string(),
        row.displacement_mp().to_string(),
        row.chi_square_mp().to_string(),
    ];
    if with_reference {
        let optional = |v: Option<f64>| v.map(|v| v.to_string()).unwrap_or_default();
        fields.push(optional(row.displacement_ref()));
        fields.push(optional(row.chi_square_ref()));
    }
    fields
}

impl AnalysisSink for AnalysisCsvWriter {
    fn write_rows(&mut self, rows: &[AnalysisRow]) -> OdmResult<()> {
        let Some(first) = rows.first() else {
            return Ok(());
        };
        self.ensure_open(first.reference.is_some())?;
        let with_reference = self.with_reference;
        let Some(writer) = self.writer.as_mut() else {
            return Err(OdmError::ResourceError("分析结果文件未打开".to_string()));
        };
        for row in rows {
            writer.write_record(row_fields(row, with_reference))?;
        }
        writer.flush()?;
        self.rows_written += rows.len();
        Ok(())
    }

    fn finish(&mut self) -> OdmResult<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }
}

/// 读回的分析结果行
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRecord {
    pub timestamp: NaiveDateTime,
    pub relative_time: f64,
    pub label: CycleLabel,
    pub actuator_voltage: f64,
    pub displacement: f64,
    pub displacement_mp: f64,
    pub chi_square_mp: f64,
    pub displacement_ref: Option<f64>,
    pub chi_square_ref: Option<f64>,
    /// `displacement × px_to_nm`（提供换算系数时）
    pub displacement_nm: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawAnalysisRecord {
    timestamp: String,
    #[serde(rename = "relativeTime")]
    relative_time: f64,
    #[serde(rename = "cycleNumber")]
    cycle_number: u32,
    direction: String,
    #[serde(rename = "actuatorVoltage")]
    actuator_voltage: f64,
    displacement: f64,
    displacement_mp: f64,
    #[serde(rename = "chiSquare_mp")]
    chi_square_mp: f64,
    #[serde(default)]
    displacement_ref: Option<f64>,
    #[serde(default, rename = "chiSquare_ref")]
    chi_square_ref: Option<f64>,
}

impl RawAnalysisRecord {
    fn into_record(self, px_to_nm: Option<f64>) -> OdmResult<AnalysisRecord> {
        Ok(AnalysisRecord {
            timestamp: parse_timestamp(&self.timestamp)?,
            relative_time: self.relative_time,
            label: CycleLabel {
                direction: self.direction.parse::<Direction>()?,
                cycle_number: self.cycle_number,
            },
            actuator_voltage: self.actuator_voltage,
            displacement: self.displacement,
            displacement_mp: self.displacement_mp,
            chi_square_mp: self.chi_square_mp,
            displacement_ref: self.displacement_ref,
            chi_square_ref: self.chi_square_ref,
            displacement_nm: px_to_nm.map(|nm_per_px| units::px_to_nm(self.displacement, nm_per_px)),
        })
    }
}

/// 读取分析结果CSV
pub fn read_analysis_csv(path: &Path, px_to_nm: Option<f64>) -> OdmResult<Vec<AnalysisRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)?;
    reader
        .deserialize::<RawAnalysisRecord>()
        .enumerate()
        .map(|(i, raw)| {
            raw.map_err(OdmError::from)
                .and_then(|raw| raw.into_record(px_to_nm))
                .map_err(|e| format_error(&format!("{} 第 {} 行", path.display(), i + 2), e))
        })
        .collect()
}

// ========== 拟合细节归档 ==========

/// 可序列化的单峰拟合细节
///
/// JSON 无法表示非有限浮点数，协方差中的 ±inf/NaN 写为 `null`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedCurveFit {
    pub optimal_parameters: Vec<f64>,
    pub covariance: Vec<Vec<Option<f64>>>,
    pub chi_square: f64,
    pub function_evals: usize,
}

impl From<&CurveFitResult> for ArchivedCurveFit {
    fn from(fit: &CurveFitResult) -> Self {
        let covariance = fit
            .covariance
            .row_iter()
            .map(|row| row.iter().map(|&v| v.is_finite().then_some(v)).collect())
            .collect();
        Self {
            optimal_parameters: fit.optimal_parameters.clone(),
            covariance,
            chi_square: fit.chi_square,
            function_evals: fit.function_evals,
        }
    }
}

/// 归档中的一行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResultsEntry {
    pub timestamp: NaiveDateTime,
    pub moving: ArchivedCurveFit,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<ArchivedCurveFit>,
}

impl From<&AnalysisRow> for FitResultsEntry {
    fn from(row: &AnalysisRow) -> Self {
        Self {
            timestamp: row.record.timestamp,
            moving: ArchivedCurveFit::from(&row.moving.curve_fit),
            reference: row
                .reference
                .as_ref()
                .map(|r| ArchivedCurveFit::from(&r.curve_fit)),
        }
    }
}

/// 拟合细节归档写出端（JSON lines，首次写入时截断已有文件）
#[derive(Debug)]
pub struct FitResultsWriter {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl FitResultsWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AnalysisSink for FitResultsWriter {
    fn write_rows(&mut self, rows: &[AnalysisRow]) -> OdmResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let writer = match self.writer.take() {
            Some(w) => w,
            None => BufWriter::new(File::create(&self.path)?),
        };
        let writer = self.writer.insert(writer);
        for row in rows {
            serde_json::to_writer(&mut *writer, &FitResultsEntry::from(row))?;
            writer.write_all(b"\n")?;
        }
        // 监视模式下进程可能随时被中断，每块落盘
        writer.flush()?;
        Ok(())
    }

    fn finish(&mut self) -> OdmResult<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }
}

/// 读取拟合细节归档
pub fn read_fit_results(path: &Path) -> OdmResult<Vec<FitResultsEntry>> {
    let content = std::fs::read_to_string(path)?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(OdmError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;

    fn temp_file(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("odm_analysis_csv_{}_{name}", std::process::id()))
    }

    #[test]
    fn test_non_finite_covariance_is_archived_as_null() {
        let fit = CurveFitResult {
            optimal_parameters: vec![1.0, 2.0],
            covariance: DMatrix::from_row_slice(2, 2, &[0.5, f64::INFINITY, f64::NAN, 0.25]),
            chi_square: 3.0,
            function_evals: 17,
        };
        let archived = ArchivedCurveFit::from(&fit);
        assert_eq!(
            archived.covariance,
            vec![vec![Some(0.5), None], vec![None, Some(0.25)]]
        );

        let json = serde_json::to_string(&archived).unwrap();
        assert!(json.contains("null"));
        let back: ArchivedCurveFit = serde_json::from_str(&json).unwrap();
        assert_eq!(back, archived);
    }

    #[test]
    fn test_read_analysis_csv_without_reference_columns() {
        let path = temp_file("no_ref.csv");
        std::fs::write(
            &path,
            "timestamp,relativeTime,cycleNumber,direction,actuatorVoltage,displacement,displacement_mp,chiSquare_mp\n\
             2014-01-21 14:03:07.250,0,1,forward,0,1.5,1.5,0.02\n\
             2014-01-21 14:03:07.260,0.01,1,backward,0.5,1.25,1.25,0.03\n",
        )
        .unwrap();

        let records = read_analysis_csv(&path, Some(4.0)).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].label.direction, Direction::Backward);
        assert_eq!(records[1].displacement_ref, None);
        assert_eq!(records[0].displacement_nm, Some(6.0));
        assert_eq!(records[1].displacement_nm, Some(5.0));

        let without_scale = read_analysis_csv(&path, None).unwrap();
        assert!(without_scale.iter().all(|r| r.displacement_nm.is_none()));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_read_analysis_csv_reports_bad_row() {
        let path = temp_file("bad_dir.csv");
        std::fs::write(
            &path,
            "timestamp,relativeTime,cycleNumber,direction,actuatorVoltage,displacement,displacement_mp,chiSquare_mp\n\
             2014-01-21 14:03:07.250,0,1,sideways,0,1.5,1.5,0.02\n",
        )
        .unwrap();

        let err = read_analysis_csv(&path, None).unwrap_err();
        assert!(matches!(err, OdmError::FormatError(_)));
        assert!(err.to_string().contains("第 2 行"), "{err}");

        std::fs::remove_file(&path).ok();
    }
}
