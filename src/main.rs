//! ODM Fit - 主程序入口
//!
//! 纯流程控制器，负责协调各个工具模块完成位移分析任务。

use odm_analysis_tool::{
    error::{ErrorCategory, OdmError},
    tools::{self, AppConfig},
};
use std::process;

/// 错误退出码定义
mod exit_codes {
    /// 通用错误
    pub const GENERAL_ERROR: i32 = 1;
    /// 配置/输入错误
    pub const CONFIGURATION_ERROR: i32 = 2;
    /// 数据格式错误
    pub const DATA_ERROR: i32 = 3;
    /// 拟合失败
    pub const FITTING_ERROR: i32 = 4;
    /// 资源/并发错误
    pub const RESOURCE_ERROR: i32 = 5;
}

/// 获取错误建议文本
fn get_error_suggestion(error: &OdmError) -> &'static str {
    match error {
        OdmError::Bounds { .. } => {
            "锚点或拟合窗口超出剖面范围，请检查设置文件中的坐标 / Anchor or fit window outside the profile, check the coordinates in the settings file"
        }
        OdmError::FitConvergence { .. } => {
            "拟合未收敛，尝试调整初始锚点、更换峰形模型或增大 --max-fev / Fit did not converge, adjust anchors, try another model or raise --max-fev"
        }
        OdmError::StreamOrdering { .. } => {
            "数据行时间戳未递增，请确认数据文件未被重写 / Timestamps are not increasing, make sure the data file was not rewritten"
        }
        OdmError::ResourceError(_) => {
            "资源不可用，请检查系统资源或重试 / Resource unavailable, check system resources or retry"
        }
        _ => match ErrorCategory::from_odm_error(error) {
            ErrorCategory::Configuration => {
                "检查命令行参数和设置文件，使用 --help 查看完整用法 / Check arguments and settings file, use --help to see full usage"
            }
            ErrorCategory::Data => {
                "数据文件格式异常，请确认为制表符分隔的原始测量数据 / Data file malformed, expected tab separated raw ODM data"
            }
            ErrorCategory::Io => {
                "检查文件路径是否正确，文件是否存在且可读 / Check if file path is correct, file exists and is readable"
            }
            ErrorCategory::Fitting | ErrorCategory::Other => {
                "请检查输入文件和参数设置 / Please check input file and parameter settings"
            }
        },
    }
}

/// 错误处理和建议
fn handle_error(error: OdmError) -> ! {
    eprintln!("[ERROR] 错误 / Error: {error}");

    let category = ErrorCategory::from_odm_error(&error);
    eprintln!("[INFO] 类别 / Category: {}", category.display_name());
    eprintln!("[INFO] 建议 / Suggestion: {}", get_error_suggestion(&error));

    let exit_code = match &error {
        OdmError::ResourceError(_) => exit_codes::RESOURCE_ERROR,
        _ => match category {
            ErrorCategory::Configuration => exit_codes::CONFIGURATION_ERROR,
            ErrorCategory::Data => exit_codes::DATA_ERROR,
            ErrorCategory::Fitting => exit_codes::FITTING_ERROR,
            ErrorCategory::Io | ErrorCategory::Other => exit_codes::GENERAL_ERROR,
        },
    };

    process::exit(exit_code);
}

fn init_logging(config: &AppConfig) {
    let default_filter = if config.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
}

/// 应用程序主逻辑（便于测试和复用）
fn run() -> Result<(), OdmError> {
    // 1. 解析命令行参数
    let config = tools::parse_args();
    init_logging(&config);

    if config.list_models {
        println!("{}", tools::format_model_table());
        return Ok(());
    }

    // 2. 显示启动信息
    tools::show_startup_info(&config);

    // 3. 运行分析
    let summary = tools::run_analysis(&config)?;
    println!("{}", tools::format_run_summary(&summary));

    tools::show_completion_info(&config);
    Ok(())
}

fn main() {
    // 可选：CPU火焰图分析（需开启 feature: flame-prof 且设置 ODM_FLAME=1）
    #[cfg(feature = "flame-prof")]
    let _guard = {
        let enabled = std::env::var("ODM_FLAME").map(|v| v == "1").unwrap_or(false);
        if enabled {
            match pprof::ProfilerGuard::new(250) {
                Ok(g) => Some(g),
                Err(e) => {
                    eprintln!(
                        "[WARNING] 启用火焰图采样失败 / Failed to enable flame graph sampling: {e}"
                    );
                    None
                }
            }
        } else {
            None
        }
    };

    let result = run();

    // 在退出前生成火焰图（仅在启用时）
    #[cfg(feature = "flame-prof")]
    if let Some(guard) = _guard
        && let Ok(report) = guard.report().build()
    {
        use std::fs::File;
        let mut options = pprof::flamegraph::Options::default();
        let out_path =
            std::env::var("ODM_FLAME_FILE").unwrap_or_else(|_| "flamegraph.svg".to_string());
        if let Ok(file) = File::create(&out_path)
            && report.flamegraph_with_options(file, &mut options).is_ok()
        {
            eprintln!("FlameGraph generated successfully / 生成成功: {out_path}");
        }
    }

    if let Err(error) = result {
        handle_error(error);
    }
}
