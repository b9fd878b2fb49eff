use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_LABELS_PATH: &str = "../models/labels.txt";
const DEFAULT_MODEL_PATH: &str = "../models/box_classifier.onnx";
const DEFAULT_CAMERA_DEVICE: &str = "/dev/video0";
const DEFAULT_FRAME_WIDTH: u32 = 320;
const DEFAULT_FRAME_HEIGHT: u32 = 240;
const DEFAULT_CAPTURE_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_FRAMEBUFFER_DEVICE: &str = "/dev/fb0";
const DEFAULT_SCREEN_WIDTH: u32 = 800;
const DEFAULT_SCREEN_HEIGHT: u32 = 480;
const DEFAULT_DRAW_BUFFER_LINES: u32 = 40;
const DEFAULT_GPIO_CHIP: &str = "/dev/gpiochip4";
const DEFAULT_GPIO_LINE: u32 = 3;
const DEFAULT_FRAME_PERIOD_MS: u64 = 33;

/// Environment variable naming the JSON config file.
pub const CONFIG_ENV: &str = "SMART_VERIFIER_CONFIG";

#[derive(Debug, Deserialize, Default)]
struct VerifierConfigFile {
    labels_path: Option<PathBuf>,
    model_path: Option<PathBuf>,
    camera: Option<CameraConfigFile>,
    display: Option<DisplayConfigFile>,
    indicator: Option<IndicatorConfigFile>,
    frame_period_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DisplayConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    draw_buffer_lines: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct IndicatorConfigFile {
    chip: Option<String>,
    line: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct VerifierConfig {
    pub labels_path: PathBuf,
    pub model_path: PathBuf,
    pub camera: CameraSettings,
    pub display: DisplaySettings,
    pub indicator: IndicatorSettings,
    /// Fixed sleep at the end of every loop iteration.
    pub frame_period: Duration,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct DisplaySettings {
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub draw_buffer_lines: u32,
}

#[derive(Debug, Clone)]
pub struct IndicatorSettings {
    pub chip: String,
    pub line: u32,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self::from_file(VerifierConfigFile::default())
    }
}

impl VerifierConfig {
    /// Load configuration from an optional JSON file, then apply environment
    /// overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => VerifierConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Configuration with every device and model path pointing at the
    /// in-memory backends.
    pub fn stub() -> Self {
        let mut cfg = Self::default();
        cfg.model_path = PathBuf::from("stub://classifier");
        cfg.camera.device = "stub://camera".to_string();
        cfg.display.device = "stub://display".to_string();
        cfg.indicator.chip = "stub://indicator".to_string();
        cfg
    }

    /// Number of bytes in one RGB24 frame.
    pub fn frame_len(&self) -> usize {
        self.camera.width as usize * self.camera.height as usize * 3
    }

    fn from_file(file: VerifierConfigFile) -> Self {
        let camera = file.camera.unwrap_or_default();
        let display = file.display.unwrap_or_default();
        let indicator = file.indicator.unwrap_or_default();
        Self {
            labels_path: file
                .labels_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LABELS_PATH)),
            model_path: file
                .model_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
            camera: CameraSettings {
                device: camera
                    .device
                    .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
                width: camera.width.unwrap_or(DEFAULT_FRAME_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_FRAME_HEIGHT),
                timeout: Duration::from_millis(
                    camera.timeout_ms.unwrap_or(DEFAULT_CAPTURE_TIMEOUT_MS),
                ),
            },
            display: DisplaySettings {
                device: display
                    .device
                    .unwrap_or_else(|| DEFAULT_FRAMEBUFFER_DEVICE.to_string()),
                width: display.width.unwrap_or(DEFAULT_SCREEN_WIDTH),
                height: display.height.unwrap_or(DEFAULT_SCREEN_HEIGHT),
                draw_buffer_lines: display
                    .draw_buffer_lines
                    .unwrap_or(DEFAULT_DRAW_BUFFER_LINES),
            },
            indicator: IndicatorSettings {
                chip: indicator
                    .chip
                    .unwrap_or_else(|| DEFAULT_GPIO_CHIP.to_string()),
                line: indicator.line.unwrap_or(DEFAULT_GPIO_LINE),
            },
            frame_period: Duration::from_millis(
                file.frame_period_ms.unwrap_or(DEFAULT_FRAME_PERIOD_MS),
            ),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = non_empty_env("SMART_VERIFIER_LABELS") {
            self.labels_path = PathBuf::from(path);
        }
        if let Some(path) = non_empty_env("SMART_VERIFIER_MODEL") {
            self.model_path = PathBuf::from(path);
        }
        if let Some(device) = non_empty_env("SMART_VERIFIER_CAMERA") {
            self.camera.device = device;
        }
        if let Some(device) = non_empty_env("SMART_VERIFIER_FRAMEBUFFER") {
            self.display.device = device;
        }
        if let Some(chip) = non_empty_env("SMART_VERIFIER_GPIO_CHIP") {
            self.indicator.chip = chip;
        }
        if let Some(line) = non_empty_env("SMART_VERIFIER_GPIO_LINE") {
            self.indicator.line = line
                .parse()
                .map_err(|_| anyhow!("SMART_VERIFIER_GPIO_LINE must be a line offset"))?;
        }
        if let Some(period) = non_empty_env("SMART_VERIFIER_FRAME_PERIOD_MS") {
            let millis: u64 = period.parse().map_err(|_| {
                anyhow!("SMART_VERIFIER_FRAME_PERIOD_MS must be an integer number of milliseconds")
            })?;
            self.frame_period = Duration::from_millis(millis);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera width and height must be greater than zero"));
        }
        if self.display.width == 0 || self.display.height == 0 {
            return Err(anyhow!("display width and height must be greater than zero"));
        }
        if self.camera.width > self.display.width || self.camera.height > self.display.height {
            return Err(anyhow!(
                "frame {}x{} does not fit on a {}x{} screen",
                self.camera.width,
                self.camera.height,
                self.display.width,
                self.display.height
            ));
        }
        if self.display.draw_buffer_lines == 0 {
            return Err(anyhow!("draw_buffer_lines must be greater than zero"));
        }
        if self.camera.timeout.is_zero() {
            return Err(anyhow!("camera timeout must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<VerifierConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}
