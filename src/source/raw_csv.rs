//! 原始测量数据读取
//!
//! 采集程序写出的数据文件为制表符分隔文本，首行为表头，之后每行：
//!
//! ```text
//! timestamp \t relativeTime \t actuatorVoltage \t <i;i;...;i;>
//! ```
//!
//! 数值列可能带单位后缀（`"0.25 s"`、`"3.5 V"`），读取时忽略。
//! [`RawDataReader`] 记住已消费的字节偏移，每次调用都重新打开文件并从上次结束处继续，
//! 因此既可用于一次性批处理，也可在监视模式下跟随增长中的文件。

use chrono::NaiveDateTime;
use csv::{ReaderBuilder, StringRecord};
use log::debug;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::core::profile::{IntensityProfile, ProfileRecord};
use crate::error::{OdmError, OdmResult, format_error};
use crate::processing::pipeline::ChunkSource;
use crate::tools::constants::reader_defaults::{CHUNK_SIZE, PROFILE_SEPARATOR, RAW_DELIMITER};

/// 支持的时间戳格式（按尝试顺序）
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
    "%d-%m-%Y %H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S%.f",
];

/// 解析时间戳
pub fn parse_timestamp(text: &str) -> OdmResult<NaiveDateTime> {
    let text = text.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .ok_or_else(|| OdmError::FormatError(format!("无法识别的时间戳: {text:?}")))
}

/// 解析数值列，忽略空白后的单位后缀
pub fn parse_quantity(text: &str) -> Option<f64> {
    text.split_whitespace().next()?.parse().ok()
}

/// 解析强度剖面字段 `<i;i;...;>`，空字段得到空剖面
pub fn parse_intensity_profile(text: &str) -> Result<IntensityProfile, String> {
    text.trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .split(PROFILE_SEPARATOR)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<i64>()
                .map(|v| v as f64)
                .map_err(|_| format!("剖面中的非整数值 {part:?}"))
        })
        .collect::<Result<Vec<f64>, String>>()
        .map(IntensityProfile::new)
}

/// 把一条CSV记录转换为数据行；`line` 仅用于错误信息
fn parse_record(record: &StringRecord, line: usize) -> OdmResult<ProfileRecord> {
    let field = |i: usize| record.get(i).unwrap_or("");

    let timestamp = parse_timestamp(field(0))
        .map_err(|e| format_error(&format!("第 {line} 行"), e))?;
    let relative_time = parse_quantity(field(1)).ok_or_else(|| {
        OdmError::FormatError(format!("第 {line} 行: 无效的相对时间 {:?}", field(1)))
    })?;
    let actuator_voltage = parse_quantity(field(2)).ok_or_else(|| {
        OdmError::FormatError(format!("第 {line} 行: 无效的执行器电压 {:?}", field(2)))
    })?;
    let intensity_profile = parse_intensity_profile(field(3))
        .map_err(|reason| OdmError::FormatError(format!("第 {line} 行: {reason}")))?;

    Ok(ProfileRecord {
        timestamp,
        relative_time,
        actuator_voltage,
        intensity_profile,
    })
}

/// 可续读的原始数据读取器
#[derive(Debug, Clone)]
pub struct RawDataReader {
    path: PathBuf,
    chunk_size: usize,
    /// 只消费以换行结尾的完整行（跟随写入中的文件时使用）
    complete_lines_only: bool,
    /// 已消费的字节数（含表头）
    byte_offset: u64,
    header_skipped: bool,
    /// 已消费的数据行数（不含表头）
    lines_read: usize,
}

impl RawDataReader {
    /// 批处理读取：文件末尾没有换行的最后一行也会被读取
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            chunk_size: CHUNK_SIZE,
            complete_lines_only: false,
            byte_offset: 0,
            header_skipped: false,
            lines_read: 0,
        }
    }

    /// 跟随模式：尚未写完的末行留到下次读取
    pub fn following(path: impl Into<PathBuf>) -> Self {
        Self {
            complete_lines_only: true,
            ..Self::new(path)
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// 已读取的数据行数
    pub fn lines_read(&self) -> usize {
        self.lines_read
    }

    /// 从上次结束处读取至多 `chunk_size` 行；没有新数据时返回 `None`
    pub fn read_next(&mut self) -> OdmResult<Option<Vec<ProfileRecord>>> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.byte_offset))?;
        let mut reader = BufReader::new(file);

        let mut buffer = Vec::new();
        let mut consumed: u64 = 0;
        let mut lines = 0usize;
        let mut line = Vec::new();

        while lines < self.chunk_size {
            line.clear();
            let n = reader.read_until(b'\n', &mut line)?;
            if n == 0 {
                break;
            }
            let complete = line.last() == Some(&b'\n');
            if !complete && self.complete_lines_only {
                break;
            }
            consumed += n as u64;

            if !self.header_skipped {
                self.header_skipped = true;
                continue;
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            buffer.extend_from_slice(&line);
            if !complete {
                buffer.push(b'\n');
            }
            lines += 1;
        }

        self.byte_offset += consumed;
        if lines == 0 {
            return Ok(None);
        }

        let first_line = self.lines_read + 1;
        let records = ReaderBuilder::new()
            .delimiter(RAW_DELIMITER)
            .has_headers(false)
            .flexible(true)
            .from_reader(buffer.as_slice())
            .records()
            .enumerate()
            .map(|(i, record)| parse_record(&record?, first_line + i))
            .collect::<OdmResult<Vec<_>>>()?;

        self.lines_read += records.len();
        debug!(
            "读取 {} 行 (累计 {}) / Read {} rows from {}",
            records.len(),
            self.lines_read,
            records.len(),
            self.path.display()
        );
        Ok(Some(records))
    }
}

impl ChunkSource for RawDataReader {
    fn next_chunk(&mut self) -> OdmResult<Option<Vec<ProfileRecord>>> {
        self.read_next()
    }
}
