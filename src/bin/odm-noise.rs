//! odm-noise - 位移噪声分析
//!
//! 读取分析结果CSV，在选定的行区间上做多项式去趋势，
//! 残差换算为纳米后输出描述统计，并写入 position_noise_stats.txt。

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use serde::Serialize;

use odm_analysis_tool::core::noise_stats::{StatsDescription, describe, detrended_noise};
use odm_analysis_tool::source::{FitSettings, read_analysis_csv};
use odm_analysis_tool::tools::constants::output_files;
use odm_analysis_tool::tools::format_stats_table;
use odm_analysis_tool::tools::utils::sibling_path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "odm-noise")]
#[command(about = "位移噪声分析 / Displacement noise analysis")]
#[command(version)]
struct Cli {
    /// 分析结果CSV
    /// Analysis CSV produced by odm-fit
    #[arg(default_value = output_files::ANALYSIS_CSV)]
    input: PathBuf,

    /// 拟合设置文件（读取 px_to_nm，默认同目录 fitSettings.json）
    /// Settings file holding px_to_nm
    #[arg(long, short)]
    settings: Option<PathBuf>,

    /// 直接指定像素到纳米换算系数（优先于设置文件）
    /// Pixel to nanometre factor, overrides the settings file
    #[arg(long)]
    px_to_nm: Option<f64>,

    /// 区间起始行（含）
    /// First row of the range (inclusive)
    #[arg(long, default_value_t = 0)]
    start: usize,

    /// 区间结束行（不含，默认到末尾）
    /// End row of the range (exclusive)
    #[arg(long)]
    end: Option<usize>,

    /// 去趋势多项式次数
    /// Polynomial degree of the trend
    #[arg(long, short, default_value_t = 1)]
    degree: usize,

    /// 终端输出格式
    /// Console output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    /// 统计结果文件（默认同目录 position_noise_stats.txt）
    /// Stats output file
    #[arg(long, short)]
    output: Option<PathBuf>,
}

#[derive(Serialize)]
struct NoiseReport {
    input: String,
    rows: (usize, usize),
    degree: usize,
    px_to_nm: f64,
    stats: StatsDescription,
}

fn resolve_px_to_nm(cli: &Cli) -> Result<f64> {
    if let Some(value) = cli.px_to_nm {
        if !(value.is_finite() && value > 0.0) {
            bail!("px_to_nm must be positive / 换算系数必须为正数: {value}");
        }
        return Ok(value);
    }
    let path = cli
        .settings
        .clone()
        .unwrap_or_else(|| sibling_path(&cli.input, output_files::FIT_SETTINGS));
    if !path.is_file() {
        eprintln!(
            "[WARNING] 未找到设置文件，使用 px_to_nm = 1 / Settings not found, using px_to_nm = 1: {}",
            path.display()
        );
        return Ok(1.0);
    }
    let settings = FitSettings::load(&path)
        .with_context(|| format!("Failed to load settings / 读取设置失败: {}", path.display()))?;
    Ok(settings.px_to_nm)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let px_to_nm = resolve_px_to_nm(&cli)?;
    let records = read_analysis_csv(&cli.input, Some(px_to_nm))
        .with_context(|| format!("Failed to read / 读取失败: {}", cli.input.display()))?;

    let end = cli.end.unwrap_or(records.len()).min(records.len());
    if cli.start >= end {
        bail!(
            "Empty row range / 行区间为空: [{}, {end}) of {} rows",
            cli.start,
            records.len()
        );
    }

    let displacement: Vec<f64> = records[cli.start..end]
        .iter()
        .map(|r| r.displacement)
        .collect();
    let noise = detrended_noise(&displacement, cli.degree, px_to_nm)
        .context("Polynomial fit failed / 多项式拟合失败")?;
    let stats = describe(&noise).context("Statistics failed / 统计失败")?;

    let report = NoiseReport {
        input: cli.input.display().to_string(),
        rows: (cli.start, end),
        degree: cli.degree,
        px_to_nm,
        stats,
    };

    match cli.format {
        OutputFormat::Table => {
            println!(
                "Noise Report / 噪声报告: rows [{}, {end}), degree {}",
                cli.start, cli.degree
            );
            println!("{}", format_stats_table(&stats));
        }
        OutputFormat::Text => println!("{stats}"),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| sibling_path(&cli.input, output_files::NOISE_STATS));
    let content = if cli.format == OutputFormat::Json {
        serde_json::to_string_pretty(&report)?
    } else {
        format!("{stats}\n")
    };
    std::fs::write(&output, content)
        .with_context(|| format!("Failed to write / 写入失败: {}", output.display()))?;
    println!("💾 {}", output.display());

    Ok(())
}
