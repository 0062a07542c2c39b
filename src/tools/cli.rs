//! 命令行接口模块
//!
//! 负责命令行参数解析、配置管理和程序信息展示。

use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use std::path::{Path, PathBuf};

use super::constants::{fit_defaults, output_files, reader_defaults, session_defaults};
use super::utils::sibling_path;
use crate::core::cycle_annotator::Direction;

/// 应用程序版本信息
const VERSION: &str = env!("CARGO_PKG_VERSION");
const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// 应用程序配置
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// 原始测量数据文件
    pub input_path: Option<PathBuf>,

    /// 拟合设置文件（默认与数据文件同目录的 fitSettings.json）
    pub settings_path: Option<PathBuf>,

    /// 分析结果CSV（默认与数据文件同目录的 odmanalysis.csv）
    pub output_path: Option<PathBuf>,

    /// 是否归档逐行拟合细节
    pub save_fit_results: bool,

    pub chunk_size: usize,

    /// 监视模式：数据文件增长时增量分析
    pub watch: bool,

    pub remove_incomplete_cycles: bool,
    pub start_direction: Direction,
    pub start_cycle: u32,

    pub max_fev: usize,
    pub factor: f64,

    /// 移动峰与参考峰并行拟合
    pub parallel_reference: bool,

    /// 仅列出可用峰形模型
    pub list_models: bool,

    /// 是否显示详细信息
    pub verbose: bool,
}

impl AppConfig {
    fn data_file(&self) -> &Path {
        self.input_path.as_deref().unwrap_or(Path::new("."))
    }

    /// 实际使用的设置文件路径
    pub fn resolved_settings_path(&self) -> PathBuf {
        self.settings_path
            .clone()
            .unwrap_or_else(|| sibling_path(self.data_file(), output_files::FIT_SETTINGS))
    }

    /// 实际使用的结果文件路径
    pub fn resolved_output_path(&self) -> PathBuf {
        self.output_path
            .clone()
            .unwrap_or_else(|| sibling_path(self.data_file(), output_files::ANALYSIS_CSV))
    }

    /// 拟合细节归档路径（未启用时为 `None`）
    pub fn fit_results_path(&self) -> Option<PathBuf> {
        self.save_fit_results
            .then(|| sibling_path(&self.resolved_output_path(), output_files::FIT_RESULTS))
    }
}

/// 构建命令定义
pub fn build_command() -> Command {
    Command::new("odm-fit")
        .version(VERSION)
        .about(DESCRIPTION)
        .author("ODM Analysis Team")
        .arg(
            Arg::new("INPUT")
                .help("原始测量数据文件（制表符分隔） / Raw ODM data file (tab separated)")
                .required_unless_present("list-models")
                .value_parser(value_parser!(PathBuf))
                .index(1),
        )
        .arg(
            Arg::new("settings")
                .long("settings")
                .short('s')
                .help("拟合设置文件 / Fit settings JSON (default: <input dir>/fitSettings.json)")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .short('o')
                .help("分析结果CSV / Analysis CSV (default: <input dir>/odmanalysis.csv)")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("fit-results")
                .long("fit-results")
                .help("归档逐行拟合参数与协方差 / Archive per-row fit parameters (fitResults.jsonl)")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("chunk-size")
                .long("chunk-size")
                .help("每块读取的行数 / Rows per chunk")
                .value_name("ROWS")
                .default_value(reader_defaults::CHUNK_SIZE.to_string())
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("watch")
                .long("watch")
                .short('w')
                .help("监视数据文件并增量分析新数据，按 Enter 结束 / Watch the data file and analyse new rows, press Enter to stop")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("remove-incomplete-cycles")
                .long("remove-incomplete-cycles")
                .help("去除末尾不完整周期的最后一行 / Drop the last row of a trailing incomplete cycle")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("start-direction")
                .long("start-direction")
                .help("首行方向 / Direction of the first row")
                .value_name("DIR")
                .default_value(Direction::Forward.as_str())
                .value_parser(["forward", "backward"]),
        )
        .arg(
            Arg::new("start-cycle")
                .long("start-cycle")
                .help("起始周期编号 / First cycle number")
                .value_name("N")
                .default_value(session_defaults::START_CYCLE_NUMBER.to_string())
                .value_parser(value_parser!(u32)),
        )
        .arg(
            Arg::new("max-fev")
                .long("max-fev")
                .help("每个剖面的最大函数调用次数 / Max function evaluations per profile")
                .value_name("N")
                .default_value(fit_defaults::MAX_FUNCTION_EVALS.to_string())
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("factor")
                .long("factor")
                .help("优化器初始步长上界系数 / Initial step bound factor")
                .value_name("F")
                .default_value(fit_defaults::STEP_BOUND_FACTOR.to_string())
                .value_parser(value_parser!(f64)),
        )
        .arg(
            Arg::new("parallel-reference")
                .long("parallel-reference")
                .help("移动峰与参考峰并行拟合 / Fit moving and reference peak concurrently")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("list-models")
                .long("list-models")
                .help("列出可用峰形模型 / List available peak models")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .help("显示详细处理信息 / Verbose output")
                .action(ArgAction::SetTrue),
        )
}

fn config_from_matches(matches: &ArgMatches) -> AppConfig {
    let start_direction = match matches.get_one::<String>("start-direction").map(String::as_str) {
        Some("backward") => Direction::Backward,
        _ => Direction::Forward,
    };

    AppConfig {
        input_path: matches.get_one::<PathBuf>("INPUT").cloned(),
        settings_path: matches.get_one::<PathBuf>("settings").cloned(),
        output_path: matches.get_one::<PathBuf>("output").cloned(),
        save_fit_results: matches.get_flag("fit-results"),
        chunk_size: matches
            .get_one::<usize>("chunk-size")
            .copied()
            .unwrap_or(reader_defaults::CHUNK_SIZE),
        watch: matches.get_flag("watch"),
        remove_incomplete_cycles: matches.get_flag("remove-incomplete-cycles"),
        start_direction,
        start_cycle: matches
            .get_one::<u32>("start-cycle")
            .copied()
            .unwrap_or(session_defaults::START_CYCLE_NUMBER),
        max_fev: matches
            .get_one::<usize>("max-fev")
            .copied()
            .unwrap_or(fit_defaults::MAX_FUNCTION_EVALS),
        factor: matches
            .get_one::<f64>("factor")
            .copied()
            .unwrap_or(fit_defaults::STEP_BOUND_FACTOR),
        parallel_reference: matches.get_flag("parallel-reference"),
        list_models: matches.get_flag("list-models"),
        verbose: matches.get_flag("verbose"),
    }
}

/// 解析命令行参数并创建配置
pub fn parse_args() -> AppConfig {
    config_from_matches(&build_command().get_matches())
}

/// 从给定参数解析（测试与嵌入使用）
pub fn parse_args_from<I, T>(args: I) -> Result<AppConfig, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    build_command()
        .try_get_matches_from(args)
        .map(|m| config_from_matches(&m))
}

/// 显示程序启动信息
pub fn show_startup_info(config: &AppConfig) {
    println!("🚀 ODM Fit v{VERSION} 启动 / started");
    println!("📝 {DESCRIPTION}");
    if config.verbose {
        if let Some(input) = &config.input_path {
            println!("📂 数据文件 / Data file: {}", input.display());
        }
        println!(
            "⚙️  设置文件 / Settings: {}",
            config.resolved_settings_path().display()
        );
        println!(
            "📦 块大小 / Chunk size: {} | max_fev: {} | factor: {}",
            config.chunk_size, config.max_fev, config.factor
        );
    }
    println!();
}

/// 显示程序完成信息
pub fn show_completion_info(config: &AppConfig) {
    if config.verbose {
        println!("✅ 分析完成！ / Analysis finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_constants() {
        let config = parse_args_from(["odm-fit", "/data/run1/data.csv"]).unwrap();
        assert_eq!(config.chunk_size, reader_defaults::CHUNK_SIZE);
        assert_eq!(config.max_fev, fit_defaults::MAX_FUNCTION_EVALS);
        assert_eq!(config.factor, fit_defaults::STEP_BOUND_FACTOR);
        assert_eq!(config.start_direction, Direction::Forward);
        assert_eq!(config.start_cycle, 1);
        assert!(!config.watch);
        assert_eq!(
            config.resolved_output_path(),
            PathBuf::from("/data/run1/odmanalysis.csv")
        );
        assert_eq!(
            config.resolved_settings_path(),
            PathBuf::from("/data/run1/fitSettings.json")
        );
        assert!(config.fit_results_path().is_none());
    }

    #[test]
    fn test_explicit_options() {
        let config = parse_args_from([
            "odm-fit",
            "data.csv",
            "--chunk-size",
            "100",
            "--start-direction",
            "backward",
            "--start-cycle",
            "5",
            "--watch",
            "--fit-results",
            "-o",
            "out/result.csv",
        ])
        .unwrap();
        assert_eq!(config.chunk_size, 100);
        assert_eq!(config.start_direction, Direction::Backward);
        assert_eq!(config.start_cycle, 5);
        assert!(config.watch);
        assert_eq!(
            config.fit_results_path(),
            Some(PathBuf::from("out/fitResults.jsonl"))
        );
    }

    #[test]
    fn test_input_required_unless_listing_models() {
        assert!(parse_args_from(["odm-fit"]).is_err());
        let config = parse_args_from(["odm-fit", "--list-models"]).unwrap();
        assert!(config.list_models);
        assert!(config.input_path.is_none());
    }
}
