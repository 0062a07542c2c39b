//! 数据文件变化监视
//!
//! 监视数据文件所在目录，目标文件被修改或创建时投递一次读取请求。
//! 请求通道容量为1，事件风暴会被合并成至多一个待处理请求。

use log::{debug, warn};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{OdmError, OdmResult};
use crate::processing::pipeline::WatchTrigger;
use crate::tools::constants::pipeline_limits::WATCH_POLL_INTERVAL_MS;

/// 文件变化监视器；丢弃即停止监视
pub struct DataFileWatcher {
    // 持有即保持监视
    _watcher: RecommendedWatcher,
    path: PathBuf,
}

impl std::fmt::Debug for DataFileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataFileWatcher")
            .field("path", &self.path)
            .finish()
    }
}

impl DataFileWatcher {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn is_relevant(event: &Event, file_name: &OsString) -> bool {
    matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(file_name.as_os_str()))
}

/// 开始监视 `path`，每次变化调用 `trigger.trigger()`
pub fn watch_data_file(path: &Path, trigger: WatchTrigger) -> OdmResult<DataFileWatcher> {
    let file_name = path
        .file_name()
        .map(OsString::from)
        .ok_or_else(|| OdmError::InvalidInput(format!("不是文件路径: {}", path.display())))?;
    let directory = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let config =
        Config::default().with_poll_interval(Duration::from_millis(WATCH_POLL_INTERVAL_MS));
    let mut watcher = RecommendedWatcher::new(
        move |result: notify::Result<Event>| match result {
            Ok(event) if is_relevant(&event, &file_name) => {
                let queued = trigger.trigger();
                debug!("文件变化 {:?}: 请求{}", event.kind, if queued { "入队" } else { "合并" });
            }
            Ok(_) => {}
            Err(e) => warn!("文件监视错误 / Watch error: {e}"),
        },
        config,
    )?;
    watcher.watch(&directory, RecursiveMode::NonRecursive)?;

    Ok(DataFileWatcher {
        _watcher: watcher,
        path: path.to_path_buf(),
    })
}
