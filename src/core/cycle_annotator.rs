//! 执行方向与周期重建
//!
//! 由执行器电压序列推导每一行的驱动方向（forward/backward）与周期编号。
//!
//! ## 规则
//! - 第0行无前值，直接取 `start_direction`
//! - 第i行：电压一阶差分严格小于0为 backward，否则（含差分为0）为 forward
//! - 方向与上一行不同即为一次“转换”，第0行总是第0号转换
//! - 第k号转换处 `cycle = k / 2 + start_cycle_number`，转换之间保持不变
//!
//! 增量处理时，从上一块末尾的标签恢复游标状态继续标注，
//! 结果与一次性处理整条序列完全一致。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::OdmError;

/// 驱动方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Backward => "backward",
        }
    }

    /// 由电压差分确定方向（仅严格负差分为 backward）
    #[inline]
    fn from_delta(delta: f64) -> Self {
        if delta < 0.0 {
            Direction::Backward
        } else {
            Direction::Forward
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = OdmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "forward" => Ok(Direction::Forward),
            "backward" => Ok(Direction::Backward),
            other => Err(OdmError::InvalidInput(format!(
                "未知方向 '{other}'，应为 forward 或 backward"
            ))),
        }
    }
}

/// 单行的方向与周期标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleLabel {
    pub direction: Direction,
    pub cycle_number: u32,
}

/// 已标注的电压采样（增量拼接所需的最小携带记录）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleSample {
    pub voltage: f64,
    pub label: CycleLabel,
}

/// 周期标注器配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleAnnotator {
    pub start_direction: Direction,
    pub start_cycle_number: u32,
}

impl Default for CycleAnnotator {
    fn default() -> Self {
        Self {
            start_direction: Direction::Forward,
            start_cycle_number: 1,
        }
    }
}

/// 标注游标：逐行推进的显式状态
#[derive(Debug, Clone, Copy)]
struct Cursor {
    last_voltage: Option<f64>,
    direction: Direction,
    cycle_number: u32,
    /// 已出现的转换次数（下一次转换的编号）
    transitions: u32,
    start_direction: Direction,
    start_cycle_number: u32,
}

impl Cursor {
    fn fresh(annotator: &CycleAnnotator) -> Self {
        Self {
            last_voltage: None,
            direction: annotator.start_direction,
            cycle_number: annotator.start_cycle_number,
            transitions: 0,
            start_direction: annotator.start_direction,
            start_cycle_number: annotator.start_cycle_number,
        }
    }

    /// 从上一块的最后一个已标注采样恢复状态
    ///
    /// 转换方向严格交替且第0号转换取 start_direction，
    /// 因此最后一次转换编号的奇偶性由当前方向唯一确定。
    fn resume(annotator: &CycleAnnotator, last: &CycleSample) -> Self {
        let parity = u32::from(last.label.direction != annotator.start_direction);
        let completed = last
            .label
            .cycle_number
            .saturating_sub(annotator.start_cycle_number);
        Self {
            last_voltage: Some(last.voltage),
            direction: last.label.direction,
            cycle_number: last.label.cycle_number,
            transitions: 2 * completed + parity + 1,
            start_direction: annotator.start_direction,
            start_cycle_number: annotator.start_cycle_number,
        }
    }

    fn step(&mut self, voltage: f64) -> CycleLabel {
        let direction = match self.last_voltage {
            None => self.start_direction,
            Some(previous) => Direction::from_delta(voltage - previous),
        };

        // 第0行与前一行（不存在）比较必然不同，计为第0号转换
        if self.last_voltage.is_none() || direction != self.direction {
            self.cycle_number = self.transitions / 2 + self.start_cycle_number;
            self.transitions += 1;
        }

        self.direction = direction;
        self.last_voltage = Some(voltage);

        CycleLabel {
            direction,
            cycle_number: self.cycle_number,
        }
    }
}

impl CycleAnnotator {
    pub fn new(start_direction: Direction, start_cycle_number: u32) -> Self {
        Self {
            start_direction,
            start_cycle_number,
        }
    }

    /// 无状态标注：返回与输入等长、同序的标签序列
    pub fn annotate(&self, voltages: &[f64]) -> Vec<CycleLabel> {
        let mut cursor = Cursor::fresh(self);
        voltages.iter().map(|&v| cursor.step(v)).collect()
    }

    /// 拼接标注：把上一块末尾的已标注采样视为前缀，只返回新行的标签
    ///
    /// `tail` 为空时等价于 [`annotate`](Self::annotate)。
    pub fn annotate_stitched(&self, tail: &[CycleSample], voltages: &[f64]) -> Vec<CycleLabel> {
        let mut cursor = match tail.last() {
            Some(last) => Cursor::resume(self, last),
            None => Cursor::fresh(self),
        };
        voltages.iter().map(|&v| cursor.step(v)).collect()
    }
}

/// 判断末行是否属于未完成的周期（末行周期号与倒数第二行不同）
pub fn has_incomplete_trailing_cycle(cycle_numbers: &[u32]) -> bool {
    match cycle_numbers {
        [.., second_last, last] => second_last != last,
        _ => false,
    }
}

/// 去除末尾不完整周期的最后一行
///
/// 仅当末行周期号与倒数第二行不同时删除末行，返回是否删除。
pub fn remove_incomplete_cycles<T>(rows: &mut Vec<T>, cycle_of: impl Fn(&T) -> u32) -> bool {
    let n = rows.len();
    if n < 2 {
        return false;
    }
    if cycle_of(&rows[n - 1]) != cycle_of(&rows[n - 2]) {
        rows.pop();
        true
    } else {
        false
    }
}
