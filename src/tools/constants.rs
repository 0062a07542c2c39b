//! 常量和默认配置集中管理
//!
//! 将所有重要常量集中定义，避免"默认值漂移"和重复定义

/// 拟合默认配置
pub mod fit_defaults {
    /// 优化器初始步长上界系数
    pub const STEP_BOUND_FACTOR: f64 = 100.0;

    /// 每个剖面的最大函数调用次数
    ///
    /// 热启动下通常几十次即可收敛，上限只用于拦截发散的拟合
    pub const MAX_FUNCTION_EVALS: usize = 20_000;

    /// 默认峰形模型
    pub const MODEL_NAME: &str = "Gaussian";
}

/// 会话默认配置
pub mod session_defaults {
    /// 块间携带的已标注尾部行数
    pub const CHUNK_TAIL_ROWS: usize = 2;

    /// 默认起始周期编号
    pub const START_CYCLE_NUMBER: u32 = 1;
}

/// 数据读取常量
pub mod reader_defaults {
    /// 每块读取的数据行数
    pub const CHUNK_SIZE: usize = 2005;

    /// 原始数据文件的列分隔符
    pub const RAW_DELIMITER: u8 = b'\t';

    /// 强度剖面字段内的分隔符
    pub const PROFILE_SEPARATOR: char = ';';
}

/// 流水线容量限制
pub mod pipeline_limits {
    /// 读取 → 处理 的通道容量（最多预读一块）
    pub const READER_QUEUE_CAPACITY: usize = 1;

    /// 监视模式的读取请求通道容量（多余的触发被丢弃）
    pub const WATCH_REQUEST_CAPACITY: usize = 1;

    /// 文件变化事件轮询间隔（毫秒）
    pub const WATCH_POLL_INTERVAL_MS: u64 = 500;
}

/// 输出文件名
pub mod output_files {
    /// 分析结果CSV
    pub const ANALYSIS_CSV: &str = "odmanalysis.csv";

    /// 逐行拟合结果归档（JSON lines）
    pub const FIT_RESULTS: &str = "fitResults.jsonl";

    /// 拟合设置
    pub const FIT_SETTINGS: &str = "fitSettings.json";

    /// 位移噪声统计
    pub const NOISE_STATS: &str = "position_noise_stats.txt";
}
