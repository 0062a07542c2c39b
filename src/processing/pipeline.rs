//! 读取 → 拟合 → 写出 三级流水线
//!
//! ## 架构
//!
//! ```text
//! ChunkSource ──bounded(1)──▶ Session(拟合+标注) ──unbounded──▶ AnalysisSink
//!   读取线程                       处理线程                      调用线程
//! ```
//!
//! - 读取端容量为1：最多预读一块，避免无限制预读
//! - 写出端无界：写出慢时不阻塞拟合
//! - 数据源耗尽即整体结束；任一阶段出错，首个错误被返回，其余阶段随通道断开退出
//!
//! 监视模式下不使用读取线程：文件变化事件通过 [`WatchTrigger`] 投递“读取请求”，
//! 请求通道容量为1，已有请求未处理时新请求被直接丢弃（合并抖动事件）。
//! 监视器持有触发器直到进程结束，因此监视循环由 [`WatchStop`] 显式结束：
//! 停止前最后读取一次新数据，再按选项处理末尾不完整周期并刷新写出端。

use crossbeam_channel::{self, Receiver, Sender, TrySendError};
use log::{debug, info};
use std::thread;

use crate::core::cycle_annotator::has_incomplete_trailing_cycle;
use crate::core::profile::{AnalysisRow, ProfileRecord};
use crate::error::{OdmError, OdmResult, resource_error};
use crate::processing::session::{ChunkOutput, IncrementalAnalysisSession};
use crate::tools::constants::pipeline_limits::{READER_QUEUE_CAPACITY, WATCH_REQUEST_CAPACITY};

/// 有序数据块来源
///
/// - `Ok(Some(rows))`：下一块（块内按时间排序）
/// - `Ok(None)`：当前已无更多数据
/// - 返回 `None` 后再次调用可能得到新数据（文件增长时），批处理模式视为结束
pub trait ChunkSource {
    fn next_chunk(&mut self) -> OdmResult<Option<Vec<ProfileRecord>>>;
}

/// 分析结果写出端
pub trait AnalysisSink {
    fn write_rows(&mut self, rows: &[AnalysisRow]) -> OdmResult<()>;

    /// 数据流结束时调用（刷新缓冲区）
    fn finish(&mut self) -> OdmResult<()> {
        Ok(())
    }
}

impl<S: ChunkSource + ?Sized> ChunkSource for Box<S> {
    fn next_chunk(&mut self) -> OdmResult<Option<Vec<ProfileRecord>>> {
        (**self).next_chunk()
    }
}

impl<K: AnalysisSink + ?Sized> AnalysisSink for Box<K> {
    fn write_rows(&mut self, rows: &[AnalysisRow]) -> OdmResult<()> {
        (**self).write_rows(rows)
    }

    fn finish(&mut self) -> OdmResult<()> {
        (**self).finish()
    }
}

/// 同时写出到两个写出端
impl<A: AnalysisSink, B: AnalysisSink> AnalysisSink for (A, B) {
    fn write_rows(&mut self, rows: &[AnalysisRow]) -> OdmResult<()> {
        self.0.write_rows(rows)?;
        self.1.write_rows(rows)
    }

    fn finish(&mut self) -> OdmResult<()> {
        self.0.finish()?;
        self.1.finish()
    }
}

/// 可选写出端：`None` 时丢弃
impl<K: AnalysisSink> AnalysisSink for Option<K> {
    fn write_rows(&mut self, rows: &[AnalysisRow]) -> OdmResult<()> {
        match self {
            Some(sink) => sink.write_rows(rows),
            None => Ok(()),
        }
    }

    fn finish(&mut self) -> OdmResult<()> {
        match self {
            Some(sink) => sink.finish(),
            None => Ok(()),
        }
    }
}

/// 内存数据源：按给定切分依次吐出数据块
#[derive(Debug, Default)]
pub struct VecChunkSource {
    chunks: std::collections::VecDeque<Vec<ProfileRecord>>,
}

impl VecChunkSource {
    pub fn new(chunks: Vec<Vec<ProfileRecord>>) -> Self {
        Self {
            chunks: chunks.into(),
        }
    }

    /// 按固定块大小切分
    pub fn from_records(records: Vec<ProfileRecord>, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        let mut chunks = Vec::new();
        let mut iter = records.into_iter().peekable();
        while iter.peek().is_some() {
            chunks.push(iter.by_ref().take(chunk_size).collect());
        }
        Self::new(chunks)
    }
}

impl ChunkSource for VecChunkSource {
    fn next_chunk(&mut self) -> OdmResult<Option<Vec<ProfileRecord>>> {
        Ok(self.chunks.pop_front())
    }
}

/// 内存写出端（测试与小数据量使用）
#[derive(Debug, Default)]
pub struct VecSink {
    pub rows: Vec<AnalysisRow>,
    pub finished: bool,
}

impl AnalysisSink for VecSink {
    fn write_rows(&mut self, rows: &[AnalysisRow]) -> OdmResult<()> {
        self.rows.extend_from_slice(rows);
        Ok(())
    }

    fn finish(&mut self) -> OdmResult<()> {
        self.finished = true;
        Ok(())
    }
}

/// 流水线选项
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineOptions {
    /// 数据流结束时去除末尾不完整周期的最后一行
    pub remove_incomplete_cycles: bool,
}

/// 流水线运行报告
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub chunks_processed: usize,
    pub rows_written: usize,
    pub rows_dropped: usize,
    /// 是否因不完整周期删除了末行
    pub trimmed_trailing_row: bool,
}

/// 读取线程 → 处理线程 的消息
enum SourceMessage {
    Records(Vec<ProfileRecord>),
    /// 明确的结束标记
    EOF,
}

/// 写出阶段：按需扣留每块的最后一行，直到确认它不是不完整周期的末行
struct RowWriter<'a, K: AnalysisSink + ?Sized> {
    sink: &'a mut K,
    options: PipelineOptions,
    pending: Option<AnalysisRow>,
    last_written_cycle: Option<u32>,
    report: PipelineReport,
}

impl<'a, K: AnalysisSink + ?Sized> RowWriter<'a, K> {
    fn new(sink: &'a mut K, options: PipelineOptions) -> Self {
        Self {
            sink,
            options,
            pending: None,
            last_written_cycle: None,
            report: PipelineReport::default(),
        }
    }

    fn accept(&mut self, output: ChunkOutput) -> OdmResult<()> {
        self.report.chunks_processed += 1;
        self.report.rows_dropped += output.dropped_rows;

        if !self.options.remove_incomplete_cycles {
            self.report.rows_written += output.rows.len();
            return self.sink.write_rows(&output.rows);
        }

        let mut rows: Vec<AnalysisRow> = self.pending.take().into_iter().collect();
        rows.extend(output.rows);
        self.pending = rows.pop();
        if let Some(last) = rows.last() {
            self.last_written_cycle = Some(last.label.cycle_number);
        }
        self.report.rows_written += rows.len();
        self.sink.write_rows(&rows)
    }

    fn finish(mut self) -> OdmResult<PipelineReport> {
        if let Some(row) = self.pending.take() {
            let cycles: Vec<u32> = self
                .last_written_cycle
                .into_iter()
                .chain(std::iter::once(row.label.cycle_number))
                .collect();
            if has_incomplete_trailing_cycle(&cycles) {
                info!(
                    "去除不完整周期末行 / Dropped trailing incomplete cycle row (cycle {})",
                    row.label.cycle_number
                );
                self.report.trimmed_trailing_row = true;
            } else {
                self.report.rows_written += 1;
                self.sink.write_rows(std::slice::from_ref(&row))?;
            }
        }
        self.sink.finish()?;
        Ok(self.report)
    }
}

/// 批处理：读取、拟合、写出三阶段并行，直到数据源耗尽
pub fn run_batch<S, K>(
    source: S,
    session: &mut IncrementalAnalysisSession,
    sink: &mut K,
    options: PipelineOptions,
) -> OdmResult<PipelineReport>
where
    S: ChunkSource + Send,
    K: AnalysisSink + ?Sized,
{
    let (chunk_tx, chunk_rx) =
        crossbeam_channel::bounded::<OdmResult<SourceMessage>>(READER_QUEUE_CAPACITY);
    let (output_tx, output_rx) = crossbeam_channel::unbounded::<OdmResult<ChunkOutput>>();

    thread::scope(|scope| {
        let reader = thread::Builder::new()
            .name("odm-reader".to_string())
            .spawn_scoped(scope, move || read_stage(source, chunk_tx))
            .map_err(|e| resource_error("无法启动读取线程", e))?;

        let processor = thread::Builder::new()
            .name("odm-processor".to_string())
            .spawn_scoped(scope, move || process_stage(session, chunk_rx, output_tx))
            .map_err(|e| resource_error("无法启动处理线程", e))?;

        let mut writer = RowWriter::new(sink, options);
        let written = output_rx
            .iter()
            .try_for_each(|result| result.and_then(|output| writer.accept(output)));
        // 写出端出错时先断开接收端，让上游阶段尽快退出
        drop(output_rx);

        let joined_processor = processor.join();
        let joined_reader = reader.join();
        if joined_processor.is_err() || joined_reader.is_err() {
            return Err(OdmError::ResourceError("流水线线程异常退出".to_string()));
        }

        written?;
        let report = writer.finish()?;
        debug!("流水线完成: {report:?}");
        Ok(report)
    })
}

fn read_stage<S: ChunkSource>(mut source: S, chunk_tx: Sender<OdmResult<SourceMessage>>) {
    loop {
        let message = match source.next_chunk() {
            Ok(Some(records)) => Ok(SourceMessage::Records(records)),
            Ok(None) => Ok(SourceMessage::EOF),
            Err(e) => Err(e),
        };
        let done = !matches!(message, Ok(SourceMessage::Records(_)));
        if chunk_tx.send(message).is_err() || done {
            break;
        }
    }
}

fn process_stage(
    session: &mut IncrementalAnalysisSession,
    chunk_rx: Receiver<OdmResult<SourceMessage>>,
    output_tx: Sender<OdmResult<ChunkOutput>>,
) {
    for message in chunk_rx {
        let result = match message {
            Ok(SourceMessage::Records(records)) => session.process_chunk(records),
            Ok(SourceMessage::EOF) => break,
            Err(e) => Err(e),
        };
        let fatal = result.is_err();
        if output_tx.send(result).is_err() || fatal {
            break;
        }
    }
}

// ========== 监视模式 ==========

/// 读取请求触发器（可克隆，交给文件变化回调使用）
#[derive(Debug, Clone)]
pub struct WatchTrigger {
    sender: Sender<()>,
}

impl WatchTrigger {
    /// 投递一次读取请求；已有待处理请求时丢弃本次，返回是否入队
    pub fn trigger(&self) -> bool {
        match self.sender.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) => false,
            Err(TrySendError::Disconnected(())) => false,
        }
    }
}

/// 创建容量为1的请求通道
pub fn watch_channel() -> (WatchTrigger, Receiver<()>) {
    let (sender, receiver) = crossbeam_channel::bounded(WATCH_REQUEST_CAPACITY);
    (WatchTrigger { sender }, receiver)
}

/// 监视停止句柄
#[derive(Debug, Clone)]
pub struct WatchStop {
    sender: Sender<()>,
}

impl WatchStop {
    /// 请求结束监视循环（重复调用无副作用）
    pub fn stop(&self) {
        let _ = self.sender.try_send(());
    }
}

/// 创建停止通道
pub fn stop_channel() -> (WatchStop, Receiver<()>) {
    let (sender, receiver) = crossbeam_channel::bounded(1);
    (WatchStop { sender }, receiver)
}

enum WatchEvent {
    Read,
    Stop,
    /// 停止端全部被丢弃：之后只响应读取请求
    StopDetached,
    /// 触发器全部被丢弃
    Closed,
}

/// 读取数据源中当前所有新数据并写出
fn drain_source<S, K>(
    source: &mut S,
    session: &mut IncrementalAnalysisSession,
    writer: &mut RowWriter<'_, K>,
) -> OdmResult<usize>
where
    S: ChunkSource + ?Sized,
    K: AnalysisSink + ?Sized,
{
    let mut rows = 0;
    while let Some(records) = source.next_chunk()? {
        let output = session.process_chunk(records)?;
        rows += output.rows.len();
        writer.accept(output)?;
    }
    Ok(rows)
}

/// 监视模式：每收到一次请求，读取数据源中所有新数据并处理
///
/// 收到停止信号（最后再读取一次）或所有触发器被丢弃后结束，
/// 结束时才处理被扣留的末行。
pub fn run_watch<S, K>(
    source: &mut S,
    session: &mut IncrementalAnalysisSession,
    sink: &mut K,
    requests: Receiver<()>,
    stop: Receiver<()>,
    options: PipelineOptions,
) -> OdmResult<PipelineReport>
where
    S: ChunkSource + ?Sized,
    K: AnalysisSink + ?Sized,
{
    let mut writer = RowWriter::new(sink, options);
    let mut stop = stop;
    loop {
        let event = crossbeam_channel::select! {
            recv(requests) -> request => match request {
                Ok(()) => WatchEvent::Read,
                Err(_) => WatchEvent::Closed,
            },
            recv(stop) -> signal => match signal {
                Ok(()) => WatchEvent::Stop,
                Err(_) => WatchEvent::StopDetached,
            },
        };

        match event {
            WatchEvent::Read => {
                let rows = drain_source(source, session, &mut writer)?;
                debug!("监视请求完成: {rows} 行");
            }
            WatchEvent::Stop => {
                let rows = drain_source(source, session, &mut writer)?;
                info!("停止监视 / Watch stopped ({rows} 行在停止前读取)");
                break;
            }
            WatchEvent::StopDetached => stop = crossbeam_channel::never(),
            WatchEvent::Closed => break,
        }
    }
    writer.finish()
}
