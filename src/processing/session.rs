//! 增量分析会话
//!
//! 逐块接收原始数据行，对移动峰（及可选的参考峰）做热启动拟合，
//! 合成位移并标注方向/周期。块与块之间只携带一个很小的状态：
//! 两条峰各自最后一次的最优参数，以及上一块末尾两行的已标注采样。
//! 按任意方式分块处理的拼接结果与一次性处理整条数据流完全一致。
//!
//! ## 状态机
//!
//! ```text
//! Uninitialized ──首个有效块──▶ Warm ──后续块──▶ Warm
//!        │                        │
//!        └────────致命错误────────┴──▶ Failed（拒绝后续块）
//! ```
//!
//! 畸形数据行（剖面为空或长度不符）在会话内部丢弃并计数，不中断处理。

use chrono::NaiveDateTime;
use log::{debug, info, warn};

use crate::core::cycle_annotator::{CycleAnnotator, CycleSample};
use crate::core::least_squares::OptimizerOptions;
use crate::core::peak_fitter::{FitContext, FitSeries, fit_displacements};
use crate::core::peak_model::{PeakFunction, PeakModel};
use crate::core::profile::{
    AnalysisRow, AnchorPoints, FitWindow, ProfileRecord, combine_displacement,
};
use crate::error::{OdmError, OdmResult};
use crate::tools::constants::session_defaults::CHUNK_TAIL_ROWS;

/// 单个峰的拟合配置：模型 + 锚点 + 窗口
#[derive(Debug, Clone)]
pub struct PeakFitSettings {
    pub model: PeakModel,
    pub anchors: AnchorPoints,
    pub window: FitWindow,
}

impl PeakFitSettings {
    /// 由模型与锚点构造，拟合窗口取自 min_bound / max_bound
    pub fn new(model: PeakModel, anchors: AnchorPoints) -> OdmResult<Self> {
        let window = FitWindow::from_anchors(&anchors)?;
        Ok(Self {
            model,
            anchors,
            window,
        })
    }
}

/// 会话配置（会话开始前必须完整解析）
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub moving: PeakFitSettings,
    pub reference: Option<PeakFitSettings>,
    pub annotator: CycleAnnotator,
    pub optimizer: OptimizerOptions,
    /// 移动峰与参考峰是否并行拟合
    pub parallel_reference: bool,
    /// 期望的剖面长度；`None` 时取首个非空剖面的长度
    pub expected_profile_len: Option<usize>,
}

impl SessionConfig {
    pub fn new(moving: PeakFitSettings) -> Self {
        Self {
            moving,
            reference: None,
            annotator: CycleAnnotator::default(),
            optimizer: OptimizerOptions::default(),
            parallel_reference: false,
            expected_profile_len: None,
        }
    }
}

/// 块间携带状态
#[derive(Debug, Clone)]
struct CarryState {
    last_moving_params: Vec<f64>,
    last_reference_params: Option<Vec<f64>>,
    last_chunk_tail: Vec<CycleSample>,
    last_timestamp: NaiveDateTime,
    profile_len: usize,
}

#[derive(Debug, Clone)]
enum SessionState {
    Uninitialized,
    Warm(CarryState),
    Failed(String),
}

/// 单块处理输出
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkOutput {
    pub rows: Vec<AnalysisRow>,
    /// 本块中被丢弃的畸形行数
    pub dropped_rows: usize,
}

/// 会话累计统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub chunks_processed: usize,
    /// 已读入的行数（含被丢弃的畸形行），即下一行在数据流中的位置
    pub rows_consumed: usize,
    pub rows_emitted: usize,
    pub rows_dropped: usize,
}

/// 增量分析会话
///
/// 单写者：同一时刻只允许一个线程调用 [`process_chunk`](Self::process_chunk)，
/// 由 `&mut self` 在编译期保证。
#[derive(Debug)]
pub struct IncrementalAnalysisSession {
    config: SessionConfig,
    state: SessionState,
    stats: SessionStats,
}

impl IncrementalAnalysisSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            state: SessionState::Uninitialized,
            stats: SessionStats::default(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn has_reference(&self) -> bool {
        self.config.reference.is_some()
    }

    /// 是否已处理过至少一个有效块
    pub fn is_warm(&self) -> bool {
        matches!(self.state, SessionState::Warm(_))
    }

    /// 会话是否因致命错误终止
    pub fn is_failed(&self) -> bool {
        matches!(self.state, SessionState::Failed(_))
    }

    /// 移动峰的热启动参数
    pub fn last_moving_params(&self) -> Option<&[f64]> {
        match &self.state {
            SessionState::Warm(carry) => Some(&carry.last_moving_params),
            _ => None,
        }
    }

    /// 参考峰的热启动参数
    pub fn last_reference_params(&self) -> Option<&[f64]> {
        match &self.state {
            SessionState::Warm(carry) => carry.last_reference_params.as_deref(),
            _ => None,
        }
    }

    /// 处理一个数据块
    ///
    /// # 错误
    /// 越界、拟合不收敛、流顺序错误均为致命错误：返回错误并使会话进入终止状态。
    pub fn process_chunk(&mut self, records: Vec<ProfileRecord>) -> OdmResult<ChunkOutput> {
        if let SessionState::Failed(reason) = &self.state {
            return Err(OdmError::ResourceError(format!(
                "会话已因致命错误终止，拒绝继续处理: {reason}"
            )));
        }

        match self.process_chunk_inner(records) {
            Ok(output) => Ok(output),
            Err(e) => {
                self.state = SessionState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    fn process_chunk_inner(&mut self, records: Vec<ProfileRecord>) -> OdmResult<ChunkOutput> {
        let stream_base = self.stats.rows_consumed;
        self.stats.rows_consumed += records.len();
        let (records, positions) = self.filter_malformed(records, stream_base);
        let dropped_rows = self.stats.rows_consumed - stream_base - records.len();
        self.stats.rows_dropped += dropped_rows;

        if records.is_empty() {
            debug!("数据块无有效行（丢弃 {dropped_rows} 行）");
            return Ok(ChunkOutput {
                rows: Vec::new(),
                dropped_rows,
            });
        }

        self.check_ordering(&records)?;

        // 拟合错误中的剖面索引换算为数据流中的行位置
        let (moving_series, reference_series) =
            self.fit_peaks(&records).map_err(|e| match e {
                OdmError::FitConvergence {
                    profile_index,
                    timestamp,
                    seed,
                    reason,
                } => OdmError::FitConvergence {
                    profile_index: positions
                        .get(profile_index)
                        .map_or(profile_index, |&p| stream_base + p),
                    timestamp,
                    seed,
                    reason,
                },
                other => other,
            })?;

        // 🎛️ 方向/周期标注：首块独立标注，之后从携带的尾部续接
        let voltages: Vec<f64> = records.iter().map(|r| r.actuator_voltage).collect();
        let labels = match &self.state {
            SessionState::Warm(carry) => self
                .config
                .annotator
                .annotate_stitched(&carry.last_chunk_tail, &voltages),
            _ => self.config.annotator.annotate(&voltages),
        };

        let previous_tail = match &self.state {
            SessionState::Warm(carry) => carry.last_chunk_tail.clone(),
            _ => Vec::new(),
        };

        let moving_params = moving_series
            .last_parameters()
            .map(<[f64]>::to_vec)
            .unwrap_or_default();
        let reference_params = reference_series
            .as_ref()
            .and_then(|s| s.last_parameters().map(<[f64]>::to_vec));

        let mut reference_fits = reference_series.map(|s| s.fits.into_iter());
        let rows: Vec<AnalysisRow> = records
            .into_iter()
            .zip(moving_series.fits)
            .zip(labels)
            .map(|((record, moving), label)| {
                let reference = reference_fits.as_mut().and_then(|fits| fits.next());
                let displacement = combine_displacement(
                    moving.displacement,
                    reference.as_ref().map(|r| r.displacement),
                );
                AnalysisRow {
                    record,
                    label,
                    moving,
                    reference,
                    displacement,
                }
            })
            .collect();

        // 携带状态：参数 + 最后两行
        let mut tail = previous_tail;
        tail.extend(rows.iter().map(|row| CycleSample {
            voltage: row.record.actuator_voltage,
            label: row.label,
        }));
        let keep_from = tail.len().saturating_sub(CHUNK_TAIL_ROWS);
        tail.drain(..keep_from);

        let last = &rows[rows.len() - 1];
        let was_warm = self.is_warm();
        self.state = SessionState::Warm(CarryState {
            last_moving_params: moving_params,
            last_reference_params: reference_params,
            last_chunk_tail: tail,
            last_timestamp: last.record.timestamp,
            profile_len: last.record.intensity_profile.len(),
        });

        self.stats.chunks_processed += 1;
        self.stats.rows_emitted += rows.len();
        if !was_warm {
            info!(
                "会话就绪: 模型 {}，首块 {} 行",
                self.config.moving.model.name(),
                rows.len()
            );
        }
        debug!(
            "块 #{} 完成: {} 行输出, {} 行丢弃, 累计 {} 行",
            self.stats.chunks_processed,
            rows.len(),
            dropped_rows,
            self.stats.rows_emitted
        );

        Ok(ChunkOutput { rows, dropped_rows })
    }

    /// 丢弃剖面为空或长度与期望不符的行，同时返回保留行在块内的位置
    fn filter_malformed(
        &self,
        records: Vec<ProfileRecord>,
        stream_base: usize,
    ) -> (Vec<ProfileRecord>, Vec<usize>) {
        let mut expected = match &self.state {
            SessionState::Warm(carry) => Some(carry.profile_len),
            _ => self.config.expected_profile_len,
        };

        records
            .into_iter()
            .enumerate()
            .filter_map(|(position, record)| {
                let len = record.intensity_profile.len();
                let reason = if len == 0 {
                    Some("强度剖面为空".to_string())
                } else {
                    match expected {
                        Some(want) if want != len => {
                            Some(format!("剖面长度 {len} 与期望 {want} 不符"))
                        }
                        Some(_) => None,
                        None => {
                            expected = Some(len);
                            None
                        }
                    }
                };

                match reason {
                    Some(reason) => {
                        let row_index = stream_base + position;
                        warn!("{}", OdmError::MalformedRow { row_index, reason });
                        None
                    }
                    None => Some((record, position)),
                }
            })
            .unzip()
    }

    /// 块内时间戳严格递增，且首行晚于上一块末尾
    fn check_ordering(&self, records: &[ProfileRecord]) -> OdmResult<()> {
        if let SessionState::Warm(carry) = &self.state
            && records[0].timestamp <= carry.last_timestamp
        {
            return Err(OdmError::StreamOrdering {
                previous: carry.last_timestamp,
                next: records[0].timestamp,
            });
        }
        if let Some(pair) = records
            .windows(2)
            .find(|pair| pair[1].timestamp <= pair[0].timestamp)
        {
            return Err(OdmError::StreamOrdering {
                previous: pair[0].timestamp,
                next: pair[1].timestamp,
            });
        }
        Ok(())
    }

    /// 拟合移动峰与参考峰（两条热启动链互相独立，可并行）
    fn fit_peaks(
        &mut self,
        records: &[ProfileRecord],
    ) -> OdmResult<(FitSeries, Option<FitSeries>)> {
        let (moving_seed, reference_seed) = match &self.state {
            SessionState::Warm(carry) => (
                Some(carry.last_moving_params.clone()),
                carry.last_reference_params.clone(),
            ),
            _ => (None, None),
        };

        let optimizer = self.config.optimizer;
        let parallel = self.config.parallel_reference;
        let SessionConfig {
            moving, reference, ..
        } = &mut self.config;

        let mut fit_moving = || {
            let ctx = FitContext {
                anchors: &moving.anchors,
                window: moving.window,
                options: optimizer,
                index_base: 0,
            };
            fit_displacements(&mut moving.model, records, moving_seed.as_deref(), &ctx)
        };

        let Some(reference) = reference.as_mut() else {
            return Ok((fit_moving()?, None));
        };

        let mut fit_reference = || {
            let ctx = FitContext {
                anchors: &reference.anchors,
                window: reference.window,
                options: optimizer,
                index_base: 0,
            };
            fit_displacements(
                &mut reference.model,
                records,
                reference_seed.as_deref(),
                &ctx,
            )
        };

        let (moving_result, reference_result) = if parallel {
            rayon::join(fit_moving, fit_reference)
        } else {
            (fit_moving(), fit_reference())
        };

        Ok((moving_result?, Some(reference_result?)))
    }
}
