//! 工具模块集合
//!
//! 包含CLI、流程编排、格式化等工具模块，支持main.rs的流程控制。

pub mod cli;
pub mod constants;
pub mod formatter;
pub mod processor;
pub mod utils;

// 重新导出主要的公共接口
pub use cli::{AppConfig, parse_args, parse_args_from, show_completion_info, show_startup_info};
pub use formatter::{format_model_table, format_run_summary, format_stats_table};
pub use processor::{RunSummary, build_session_config, run_analysis};
pub use utils::path;
