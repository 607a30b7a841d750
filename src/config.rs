use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::queue::OverflowPolicy;

pub const DEFAULT_CONFIG_PATH: &str = "/app/config.yaml";
pub const ENV_PREFIX: &str = "RTSP_SIM";
pub const UNDEFINED_SCO_ID: &str = "UNDEFINE_SCO_ID";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiMode {
    /// `{"timestamp", "qr_data"}` to one endpoint.
    #[default]
    Generic,
    /// `ts|frame|scan_frame|action` records mapped to self-checkout events.
    ScoEvents,
}

/// What the stream encoder does on a tick with an empty frame queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdlePolicy {
    #[default]
    Pause,
    RepeatLast,
}

/// Resolved per-camera settings. Immutable once the pipeline starts.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub camera: String,
    pub video: PathBuf,
    pub download_url: Option<String>,
    pub md5: Option<String>,

    pub api_url: String,
    pub api_path: String,
    pub api_mode: ApiMode,
    pub api_timeout_ms: u64,
    pub payload_max_age_ms: Option<u64>,
    pub sco_id: Option<String>,

    pub rtsp_port: u16,
    pub rtsp_path: String,
    pub fps: u32,
    pub stream_fps: Option<u32>,
    pub keyframe_interval: Option<u32>,
    pub bitrate_kbps: u32,
    pub prefer_hardware: bool,
    pub idle_policy: IdlePolicy,

    pub original_width: u32,
    pub original_height: u32,
    pub frame_x: u32,
    pub frame_y: u32,
    pub frame_width: u32,
    pub frame_height: u32,
    pub qrcode_size: u32,
    pub overlay_timestamp: bool,

    pub queue_size: usize,
    pub overflow_policy: OverflowPolicy,
    pub warmup_frames: u64,
    pub timezone: String,
    pub stats_interval_secs: u64,
    pub drain_timeout_ms: u64,
    pub join_timeout_ms: u64,
    pub frame_limit: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            camera: String::new(),
            video: PathBuf::new(),
            download_url: None,
            md5: None,
            api_url: String::new(),
            api_path: "/qr-events".to_string(),
            api_mode: ApiMode::Generic,
            api_timeout_ms: 500,
            payload_max_age_ms: None,
            sco_id: None,
            rtsp_port: 8554,
            rtsp_path: "/simulation".to_string(),
            fps: 15,
            stream_fps: None,
            keyframe_interval: None,
            bitrate_kbps: 2000,
            prefer_hardware: false,
            idle_policy: IdlePolicy::Pause,
            original_width: 640,
            original_height: 800,
            frame_x: 0,
            frame_y: 0,
            frame_width: 640,
            frame_height: 480,
            qrcode_size: 160,
            overlay_timestamp: true,
            queue_size: 30,
            overflow_policy: OverflowPolicy::DropOldest,
            warmup_frames: 90,
            timezone: "UTC".to_string(),
            stats_interval_secs: 5,
            drain_timeout_ms: 3000,
            join_timeout_ms: 2000,
            frame_limit: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CameraNames {
    #[serde(default)]
    cameras: HashMap<String, config::Value>,
}

impl Settings {
    /// Loads `defaults` and `cameras.<camera>` from a YAML file, with
    /// `RTSP_SIM__...` environment overrides on top.
    pub fn load(path: &Path, camera: &str) -> anyhow::Result<Self> {
        let raw = Config::builder()
            .add_source(File::from(path).format(FileFormat::Yaml))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .map_err(|e| anyhow::anyhow!("load config {}: {}", path.display(), e))?;
        Self::from_config(&raw, camera)
    }

    /// Flattens one camera out of an already built layered config: camera
    /// keys override `defaults`, which override the built-in defaults.
    pub fn from_config(raw: &Config, camera: &str) -> anyhow::Result<Self> {
        let names: CameraNames = raw.clone().try_deserialize()?;
        if !names.cameras.contains_key(camera) {
            let mut available: Vec<&String> = names.cameras.keys().collect();
            available.sort();
            anyhow::bail!(
                "camera '{}' not found in configuration, available cameras: {}",
                camera,
                available
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        let mut builder = Config::builder();
        if let Ok(defaults) = raw.get_table("defaults") {
            for (key, value) in defaults {
                builder = builder.set_default(key, value)?;
            }
        }
        for (key, value) in raw.get_table(&format!("cameras.{}", camera))? {
            builder = builder.set_override(key, value)?;
        }
        builder = builder.set_override("camera", camera)?;

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.video.as_os_str().is_empty() {
            anyhow::bail!("'video' not configured for camera '{}'", self.camera);
        }
        if self.api_url.is_empty() {
            anyhow::bail!("'api_url' not configured for camera '{}'", self.camera);
        }
        if self.fps == 0 || self.stream_fps == Some(0) {
            anyhow::bail!("fps must be positive");
        }
        if self.queue_size == 0 {
            anyhow::bail!("queue_size must be positive");
        }
        if !self.rtsp_path.starts_with('/') {
            anyhow::bail!("rtsp_path must start with '/': {}", self.rtsp_path);
        }
        Ok(())
    }

    pub fn output_fps(&self) -> u32 {
        self.stream_fps.unwrap_or(self.fps)
    }

    pub fn keyframe_interval(&self) -> u32 {
        self.keyframe_interval.unwrap_or(self.output_fps() * 2)
    }

    pub fn sco_id(&self) -> &str {
        self.sco_id.as_deref().unwrap_or(UNDEFINED_SCO_ID)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_millis(self.api_timeout_ms)
    }

    pub fn payload_max_age(&self) -> Option<Duration> {
        self.payload_max_age_ms.map(Duration::from_millis)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs.max(1))
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn tz(&self) -> Tz {
        parse_timezone(&self.timezone)
    }
}

/// IANA name to timezone, UTC (with a warning) when unknown.
pub fn parse_timezone(name: &str) -> Tz {
    name.parse::<Tz>().unwrap_or_else(|_| {
        log::warn!("unknown timezone '{}', falling back to UTC", name);
        Tz::UTC
    })
}
