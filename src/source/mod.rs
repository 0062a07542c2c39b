//! 数据源与结果文件
//!
//! 原始测量数据读取、分析结果读写、拟合设置与文件变化监视。

pub mod analysis_csv;
pub mod raw_csv;
pub mod settings;
pub mod watcher;

pub use analysis_csv::{
    AnalysisCsvWriter, AnalysisRecord, FitResultsWriter, read_analysis_csv, read_fit_results,
};
pub use raw_csv::{RawDataReader, parse_timestamp};
pub use settings::{FitSettings, PeakSettings};
pub use watcher::{DataFileWatcher, watch_data_file};
