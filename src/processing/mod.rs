//! 增量处理模块
//!
//! 分块分析会话与 读取 → 拟合 → 写出 流水线。

pub mod pipeline;
pub mod session;

pub use pipeline::{
    AnalysisSink, ChunkSource, PipelineOptions, PipelineReport, VecChunkSource, VecSink,
    WatchStop, WatchTrigger, run_batch, run_watch, stop_channel, watch_channel,
};
pub use session::{
    ChunkOutput, IncrementalAnalysisSession, PeakFitSettings, SessionConfig, SessionStats,
};
