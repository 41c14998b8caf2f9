use anyhow::{Context, Result};
use directories::ProjectDirs;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use smartdoor_vision::{DetectorOptions, LensFacing, PerformanceMode, Rotation, V4lProvider};
use std::path::{Path, PathBuf};

pub static CONFIG_PATH: Lazy<PathBuf> = Lazy::new(|| {
    if let Some(path) = option_env!("SMARTDOOR_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    ProjectDirs::from("", "", "smartdoor")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("/usr/local/etc/smartdoor/config.toml"))
});

static DEFAULT_MODEL_PATH: &str = "/usr/local/share/smartdoor/face_detection_yunet_2023mar.onnx";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    #[default]
    Front,
    Back,
}

impl From<Facing> for LensFacing {
    fn from(f: Facing) -> Self {
        match f {
            Facing::Front => LensFacing::Front,
            Facing::Back => LensFacing::Back,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Fast,
    Accurate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub front: String,
    pub back: String,
    pub initial: Facing,
    pub buffers: u32,
    pub front_rotation: u32,
    pub back_rotation: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            front: "/dev/video0".to_string(),
            back: "/dev/video2".to_string(),
            initial: Facing::Front,
            buffers: 4,
            front_rotation: 0,
            back_rotation: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub model: PathBuf,
    pub performance_mode: Mode,
    pub tracking: bool,
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model: PathBuf::from(DEFAULT_MODEL_PATH),
            performance_mode: Mode::Fast,
            tracking: true,
            score_threshold: 0.6,
            nms_threshold: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: CameraConfig,
    pub detector: DetectorConfig,
}

impl Config {
    pub fn provider(&self) -> Result<V4lProvider> {
        let rotation = |deg: u32| {
            Rotation::from_degrees(deg)
                .with_context(|| format!("rotation must be a multiple of 90, got {}", deg))
        };
        Ok(V4lProvider {
            front: self.camera.front.clone(),
            back: self.camera.back.clone(),
            front_rotation: rotation(self.camera.front_rotation)?,
            back_rotation: rotation(self.camera.back_rotation)?,
            buffers: self.camera.buffers,
        })
    }

    pub fn detector_options(&self) -> DetectorOptions {
        DetectorOptions {
            performance_mode: match self.detector.performance_mode {
                Mode::Fast => PerformanceMode::Fast,
                Mode::Accurate => PerformanceMode::Accurate,
            },
            tracking: self.detector.tracking,
            score_threshold: self.detector.score_threshold,
            nms_threshold: self.detector.nms_threshold,
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("smartdoor-config-{}-{}", std::process::id(), name))
            .join("config.toml")
    }

    #[test]
    fn test_missing_file_gives_defaults() -> Result<()> {
        let cfg = load_config(Some(&scratch("missing")))?;
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.camera.initial, Facing::Front);
        assert!(cfg.detector.tracking);
        Ok(())
    }

    #[test]
    fn test_partial_file_fills_defaults() -> Result<()> {
        let path = scratch("partial");
        std::fs::create_dir_all(path.parent().unwrap())?;
        std::fs::write(
            &path,
            "[camera]\nback = \"/dev/video4\"\ninitial = \"back\"\n\n[detector]\nperformance_mode = \"accurate\"\n",
        )?;
        let cfg = load_config(Some(&path))?;
        assert_eq!(cfg.camera.back, "/dev/video4");
        assert_eq!(cfg.camera.front, "/dev/video0");
        assert_eq!(cfg.camera.initial, Facing::Back);
        assert_eq!(
            cfg.detector_options().performance_mode,
            PerformanceMode::Accurate
        );
        assert_eq!(cfg.detector.score_threshold, 0.6);
        std::fs::remove_dir_all(path.parent().unwrap())?;
        Ok(())
    }

    #[test]
    fn test_save_then_load() -> Result<()> {
        let path = scratch("saved");
        let mut cfg = Config::default();
        cfg.camera.front_rotation = 90;
        cfg.detector.tracking = false;
        save_config(&cfg, Some(&path))?;
        assert_eq!(load_config(Some(&path))?, cfg);
        std::fs::remove_dir_all(path.parent().unwrap())?;
        Ok(())
    }

    #[test]
    fn test_bad_rotation_rejected() {
        let mut cfg = Config::default();
        cfg.camera.back_rotation = 45;
        assert!(cfg.provider().is_err());
        cfg.camera.back_rotation = 270;
        assert_eq!(cfg.provider().unwrap().back_rotation, Rotation::Deg270);
    }
}
