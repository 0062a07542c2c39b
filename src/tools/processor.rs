//! 分析流程编排
//!
//! 读取设置 → 构建会话 → 批处理或监视模式运行流水线 → 汇总。

use log::{debug, info};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::cli::AppConfig;
use crate::core::cycle_annotator::CycleAnnotator;
use crate::core::least_squares::OptimizerOptions;
use crate::core::peak_model::PeakFunction;
use crate::error::{OdmError, OdmResult};
use crate::processing::pipeline::{
    AnalysisSink, PipelineOptions, PipelineReport, WatchStop, run_batch, run_watch,
    stop_channel, watch_channel,
};
use crate::processing::session::{IncrementalAnalysisSession, SessionConfig, SessionStats};
use crate::source::{AnalysisCsvWriter, FitResultsWriter, FitSettings, RawDataReader, watch_data_file};

/// 一次分析运行的汇总
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub data_path: PathBuf,
    pub output_path: PathBuf,
    pub fit_results_path: Option<PathBuf>,
    pub moving_model: &'static str,
    pub reference_model: Option<&'static str>,
    pub report: PipelineReport,
    pub session: SessionStats,
    pub elapsed: Duration,
}

/// 由命令行配置与设置文件构建会话配置
pub fn build_session_config(config: &AppConfig, settings: &FitSettings) -> OdmResult<SessionConfig> {
    let mut session_config = SessionConfig::new(settings.moving_settings()?);
    session_config.reference = settings.reference_settings()?;
    session_config.annotator = CycleAnnotator::new(config.start_direction, config.start_cycle);
    session_config.optimizer = OptimizerOptions::with_limits(config.factor, config.max_fev);
    session_config.parallel_reference = config.parallel_reference;
    Ok(session_config)
}

fn required_input(config: &AppConfig) -> OdmResult<&Path> {
    let input = config
        .input_path
        .as_deref()
        .ok_or_else(|| OdmError::InvalidInput("未指定数据文件".to_string()))?;
    if !input.is_file() {
        return Err(OdmError::IoError(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("数据文件不存在: {}", input.display()),
        )));
    }
    Ok(input)
}

/// 运行分析（批处理或监视模式）
pub fn run_analysis(config: &AppConfig) -> OdmResult<RunSummary> {
    let input = required_input(config)?;
    let settings_path = config.resolved_settings_path();
    let settings = FitSettings::load_or_create_default(&settings_path)?;
    let session_config = build_session_config(config, &settings)?;

    let moving_model = session_config.moving.model.name();
    let reference_model = session_config.reference.as_ref().map(|r| r.model.name());
    info!(
        "移动峰模型 / Moving peak model: {moving_model}, 参考峰 / reference: {}",
        reference_model.unwrap_or("-")
    );

    let output_path = config.resolved_output_path();
    let fit_results_path = config.fit_results_path();
    let mut sink = (
        AnalysisCsvWriter::new(&output_path),
        fit_results_path.as_ref().map(FitResultsWriter::new),
    );

    let mut session = IncrementalAnalysisSession::new(session_config);
    let options = PipelineOptions {
        remove_incomplete_cycles: config.remove_incomplete_cycles,
    };

    let start = Instant::now();
    let report = if config.watch {
        run_watch_mode(input, config.chunk_size, &mut session, &mut sink, options)?
    } else {
        let reader = RawDataReader::new(input).with_chunk_size(config.chunk_size);
        run_batch(reader, &mut session, &mut sink, options)?
    };

    Ok(RunSummary {
        data_path: input.to_path_buf(),
        output_path,
        fit_results_path,
        moving_model,
        reference_model,
        report,
        session: session.stats(),
        elapsed: start.elapsed(),
    })
}

/// 监视模式：先处理已有数据，之后每次文件变化读取新增行
///
/// 监视器存活期间持续运行，进程被中断时结束。
fn run_watch_mode<K: AnalysisSink>(
    input: &Path,
    chunk_size: usize,
    session: &mut IncrementalAnalysisSession,
    sink: &mut K,
    options: PipelineOptions,
) -> OdmResult<PipelineReport> {
    let mut reader = RawDataReader::following(input).with_chunk_size(chunk_size);
    let (trigger, requests) = watch_channel();
    let (stop, stop_signals) = stop_channel();
    let _watcher = watch_data_file(input, trigger.clone())?;

    trigger.trigger();
    drop(trigger);
    spawn_stdin_stop(stop)?;

    println!(
        "👀 监视中 / Watching {} (按 Enter 结束 / press Enter to stop)",
        input.display()
    );
    run_watch(&mut reader, session, sink, requests, stop_signals, options)
}

/// 标准输入读到一行时请求停止；标准输入关闭时不停止，继续监视
fn spawn_stdin_stop(stop: WatchStop) -> OdmResult<()> {
    std::thread::Builder::new()
        .name("odm-watch-stop".to_string())
        .spawn(move || {
            let mut line = String::new();
            match std::io::stdin().lock().read_line(&mut line) {
                Ok(n) if n > 0 => stop.stop(),
                Ok(_) => debug!("标准输入已关闭，监视持续到进程结束"),
                Err(e) => debug!("读取标准输入失败: {e}"),
            }
        })
        .map(|_| ())
        .map_err(|e| OdmError::ResourceError(format!("无法启动停止监听线程: {e}")))
}
