//! 拟合设置文件（JSON）
//!
//! 保存像素到纳米的换算系数、默认峰形模型，以及移动峰/参考峰的锚点。
//! 会话开始前由此解析出完整的 [`PeakFitSettings`]。
//!
//! ```json
//! {
//!   "px_to_nm": 4.2,
//!   "default_model": "Gaussian",
//!   "moving_peak": { "model": "Gaussian", "anchors": { "peak": {"x": 50, "y": 900}, ... } },
//!   "reference_peak": null
//! }
//! ```

use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::peak_model::{PeakFunction, PeakModel};
use crate::core::profile::AnchorPoints;
use crate::error::{OdmError, OdmResult};
use crate::processing::session::PeakFitSettings;
use crate::tools::constants::fit_defaults::MODEL_NAME;

fn default_px_to_nm() -> f64 {
    1.0
}

fn default_model_name() -> String {
    MODEL_NAME.to_string()
}

/// 单个峰的设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakSettings {
    /// 峰形模型名称或键名；缺省时使用 `default_model`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub anchors: AnchorPoints,
}

impl PeakSettings {
    pub fn new(model: PeakModel, anchors: AnchorPoints) -> Self {
        Self {
            model: Some(model.name().to_string()),
            anchors,
        }
    }
}

/// 拟合设置文件内容
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitSettings {
    /// 像素到纳米的换算系数
    #[serde(default = "default_px_to_nm")]
    pub px_to_nm: f64,
    #[serde(default = "default_model_name")]
    pub default_model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moving_peak: Option<PeakSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_peak: Option<PeakSettings>,
}

impl Default for FitSettings {
    fn default() -> Self {
        Self {
            px_to_nm: default_px_to_nm(),
            default_model: default_model_name(),
            moving_peak: None,
            reference_peak: None,
        }
    }
}

impl FitSettings {
    pub fn load(path: &Path) -> OdmResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// 文件存在时读取，否则写出默认设置并返回
    pub fn load_or_create_default(path: &Path) -> OdmResult<Self> {
        if path.is_file() {
            return Self::load(path);
        }
        let settings = Self::default();
        settings.save(path)?;
        info!("已创建默认设置文件 / Created default settings: {}", path.display());
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> OdmResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn validate(&self) -> OdmResult<()> {
        if !(self.px_to_nm.is_finite() && self.px_to_nm > 0.0) {
            return Err(OdmError::InvalidInput(format!(
                "px_to_nm 必须为正数，实际 {}",
                self.px_to_nm
            )));
        }
        PeakModel::from_name(&self.default_model)?;
        Ok(())
    }

    fn resolve(&self, peak: &PeakSettings) -> OdmResult<PeakFitSettings> {
        let name = peak.model.as_deref().unwrap_or(&self.default_model);
        PeakFitSettings::new(PeakModel::from_name(name)?, peak.anchors)
    }

    /// 解析移动峰设置（必需）
    pub fn moving_settings(&self) -> OdmResult<PeakFitSettings> {
        let peak = self.moving_peak.as_ref().ok_or_else(|| {
            OdmError::InvalidInput("设置文件缺少 moving_peak 锚点".to_string())
        })?;
        self.resolve(peak)
    }

    /// 解析参考峰设置（可选）
    pub fn reference_settings(&self) -> OdmResult<Option<PeakFitSettings>> {
        self.reference_peak
            .as_ref()
            .map(|peak| self.resolve(peak))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::profile::Point;

    fn anchors() -> AnchorPoints {
        AnchorPoints {
            peak: Point::new(50.0, 900.0),
            lower_valley: Point::new(35.0, 100.0),
            upper_valley: Point::new(65.0, 110.0),
            min_bound: Point::new(30.0, 0.0),
            max_bound: Point::new(70.0, 0.0),
            spline_min_bound: None,
            spline_max_bound: None,
        }
    }

    #[test]
    fn test_settings_round_trip_through_file() {
        let path = std::env::temp_dir().join(format!("odm_settings_{}.json", std::process::id()));
        let settings = FitSettings {
            px_to_nm: 4.2,
            moving_peak: Some(PeakSettings::new(PeakModel::from_name("harmonic").unwrap(), anchors())),
            ..FitSettings::default()
        };
        settings.save(&path).unwrap();
        let loaded = FitSettings::load(&path).unwrap();
        assert_eq!(loaded, settings);

        let moving = loaded.moving_settings().unwrap();
        assert_eq!(moving.model.key(), "harmonic");
        assert_eq!(moving.window.xmin_bound, 30);
        assert!(loaded.reference_settings().unwrap().is_none());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_model_falls_back_to_default() {
        let json = r#"{
            "default_model": "sinc",
            "moving_peak": { "anchors": {
                "peak": {"x": 50, "y": 900}, "lower_valley": {"x": 35, "y": 100},
                "upper_valley": {"x": 65, "y": 110}, "min_bound": {"x": 30, "y": 0},
                "max_bound": {"x": 70, "y": 0} } }
        }"#;
        let settings: FitSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.px_to_nm, 1.0);
        assert_eq!(settings.moving_settings().unwrap().model.key(), "sinc");
    }

    #[test]
    fn test_missing_moving_peak_is_invalid_input() {
        let err = FitSettings::default().moving_settings().unwrap_err();
        assert!(matches!(err, OdmError::InvalidInput(_)));
    }
}
