//! 输出格式化模块
//!
//! 运行汇总、峰形模型列表与噪声统计的终端表格。

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::UTF8_FULL};

use super::processor::RunSummary;
use super::utils;
use crate::core::noise_stats::StatsDescription;
use crate::core::peak_model::{PeakFunction, PeakModel};

fn new_table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn right(text: impl ToString) -> Cell {
    Cell::new(text.to_string()).set_alignment(CellAlignment::Right)
}

/// 可用峰形模型表
pub fn format_model_table() -> String {
    let mut table = new_table();
    table.set_header(vec![
        "Model / 模型",
        "Key / 标识",
        "Parameters / 参数",
        "Beam width / 光束宽度",
    ]);
    for model in PeakModel::available_models() {
        table.add_row(vec![
            Cell::new(model.name()),
            Cell::new(model.key()),
            Cell::new(model.parameter_names().join(", ")),
            Cell::new(if model.supports_beam_width() { "✓" } else { "" }),
        ]);
    }
    table.to_string()
}

/// 分析运行汇总
pub fn format_run_summary(summary: &RunSummary) -> String {
    let mut output = String::new();
    output.push_str(&format!(
        "📊 {} → {}\n",
        utils::extract_filename_lossy(&summary.data_path),
        summary.output_path.display()
    ));

    let mut table = new_table();
    table.set_header(vec!["Item / 项目", "Value / 数值"]);
    table.add_row(vec![Cell::new("Moving peak / 移动峰"), Cell::new(summary.moving_model)]);
    table.add_row(vec![
        Cell::new("Reference peak / 参考峰"),
        Cell::new(summary.reference_model.unwrap_or("-")),
    ]);
    table.add_row(vec![
        Cell::new("Chunks / 数据块"),
        right(summary.report.chunks_processed),
    ]);
    table.add_row(vec![
        Cell::new("Rows written / 写出行数"),
        right(summary.report.rows_written),
    ]);
    table.add_row(vec![
        Cell::new("Malformed rows dropped / 丢弃畸形行"),
        right(summary.report.rows_dropped),
    ]);
    if summary.report.trimmed_trailing_row {
        table.add_row(vec![
            Cell::new("Incomplete cycle trimmed / 去除不完整周期"),
            right("1"),
        ]);
    }
    table.add_row(vec![
        Cell::new("Elapsed (s) / 耗时"),
        right(format!("{:.2}", summary.elapsed.as_secs_f64())),
    ]);
    output.push_str(&table.to_string());

    if let Some(path) = &summary.fit_results_path {
        output.push_str(&format!("\n🗂️  拟合细节 / Fit details: {}", path.display()));
    }
    output
}

/// 噪声统计表（单位 nm）
pub fn format_stats_table(stats: &StatsDescription) -> String {
    let mut table = new_table();
    table.set_header(vec!["Statistic / 统计量", "Value / 数值"]);
    let rows: [(&str, String); 11] = [
        ("count / 样本数", stats.size.to_string()),
        ("minimum (nm)", format!("{:.3}", stats.min)),
        ("maximum (nm)", format!("{:.3}", stats.max)),
        ("mean (nm)", format!("{:.3}", stats.mean)),
        ("std.dev (nm)", format!("{:.3}", stats.std_dev())),
        ("variance (nm²)", format!("{:.3}", stats.variance)),
        ("25% (nm)", format!("{:.3}", stats.q25)),
        ("50% (nm)", format!("{:.3}", stats.median)),
        ("75% (nm)", format!("{:.3}", stats.q75)),
        ("skewness", format!("{:.3}", stats.skewness)),
        ("kurtosis", format!("{:.3}", stats.kurtosis)),
    ];
    for (name, value) in rows {
        table.add_row(vec![Cell::new(name), right(value)]);
    }
    table.to_string()
}
