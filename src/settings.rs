use log::{info, warn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderSettings {
    #[serde(default = "RenderSettings::default_shadow_map_size")]
    pub shadow_map_size: u32,
    #[serde(default)]
    pub shadow_key_policy: ShadowKeyPolicy,
    /// Evict shadow maps unused for this many frames. `None` keeps them until teardown.
    #[serde(default)]
    pub shadow_cache_max_idle_frames: Option<u64>,
    #[serde(default)]
    pub resolution: Resolution,
    #[serde(default)]
    pub present_mode: PresentModeSetting,
    #[serde(default = "RenderSettings::default_max_objects_per_frame")]
    pub max_objects_per_frame: u32,
    #[serde(default = "RenderSettings::default_max_lights_per_frame")]
    pub max_lights_per_frame: u32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            shadow_map_size: Self::default_shadow_map_size(),
            shadow_key_policy: ShadowKeyPolicy::default(),
            shadow_cache_max_idle_frames: None,
            resolution: Resolution::default(),
            present_mode: PresentModeSetting::default(),
            max_objects_per_frame: Self::default_max_objects_per_frame(),
            max_lights_per_frame: Self::default_max_lights_per_frame(),
        }
    }
}

impl RenderSettings {
    pub fn load() -> Self {
        Self::load_from_path("settings.json")
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Self {
        use std::fs;

        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<RenderSettings>(&contents) {
                Ok(settings) => {
                    info!("Loaded render settings from {:?}", path);
                    settings.validate()
                }
                Err(err) => {
                    warn!(
                        "Failed to parse {:?} ({}). Falling back to default render settings.",
                        path, err
                    );
                    RenderSettings::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "Render settings file {:?} not found. Using default settings.",
                    path
                );
                RenderSettings::default()
            }
            Err(err) => {
                warn!(
                    "Failed to read {:?} ({}). Falling back to default render settings.",
                    path, err
                );
                RenderSettings::default()
            }
        }
    }

    pub fn validate(mut self) -> Self {
        if self.shadow_map_size == 0 {
            warn!("Shadow map size must be greater than zero. Using default value.");
            self.shadow_map_size = Self::default_shadow_map_size();
        }

        if self.resolution.width == 0 || self.resolution.height == 0 {
            warn!("Resolution must be greater than zero. Using default resolution.");
            self.resolution = Resolution::default();
        }

        if self.max_objects_per_frame == 0 {
            warn!("Object budget must be greater than zero. Using default value.");
            self.max_objects_per_frame = Self::default_max_objects_per_frame();
        }

        if self.max_lights_per_frame == 0 {
            warn!("Light budget must be greater than zero. Using default value.");
            self.max_lights_per_frame = Self::default_max_lights_per_frame();
        }

        if self.shadow_cache_max_idle_frames == Some(0) {
            warn!("Shadow cache idle limit of zero would evict every frame. Disabling eviction.");
            self.shadow_cache_max_idle_frames = None;
        }

        self
    }

    pub fn present_mode(&self, available: &[wgpu::PresentMode]) -> wgpu::PresentMode {
        let desired = self.present_mode.to_wgpu();
        if available.contains(&desired) {
            return desired;
        }

        warn!(
            "Requested present mode {:?} is not supported. Falling back to FIFO.",
            desired
        );

        if available.contains(&wgpu::PresentMode::Fifo) {
            wgpu::PresentMode::Fifo
        } else {
            available
                .first()
                .copied()
                .unwrap_or(wgpu::PresentMode::Fifo)
        }
    }

    const fn default_shadow_map_size() -> u32 {
        2048
    }

    const fn default_max_objects_per_frame() -> u32 {
        1024
    }

    const fn default_max_lights_per_frame() -> u32 {
        64
    }
}

/// How shadow maps are keyed in the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShadowKeyPolicy {
    /// Source light entity plus face / cascade index.
    #[default]
    Stable,
    /// Index in the frame's flattened light list.
    Positional,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentModeSetting {
    #[default]
    Fifo,
    FifoRelaxed,
    Immediate,
    Mailbox,
    AutoVsync,
    AutoNoVsync,
}

impl PresentModeSetting {
    fn to_wgpu(&self) -> wgpu::PresentMode {
        match self {
            PresentModeSetting::Fifo => wgpu::PresentMode::Fifo,
            PresentModeSetting::FifoRelaxed => wgpu::PresentMode::FifoRelaxed,
            PresentModeSetting::Immediate => wgpu::PresentMode::Immediate,
            PresentModeSetting::Mailbox => wgpu::PresentMode::Mailbox,
            PresentModeSetting::AutoVsync => wgpu::PresentMode::AutoVsync,
            PresentModeSetting::AutoNoVsync => wgpu::PresentMode::AutoNoVsync,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_replaces_invalid_values_with_defaults() {
        let invalid = RenderSettings {
            shadow_map_size: 0,
            resolution: Resolution {
                width: 0,
                height: 0,
            },
            max_objects_per_frame: 0,
            max_lights_per_frame: 0,
            shadow_cache_max_idle_frames: Some(0),
            ..RenderSettings::default()
        };
        let validated = invalid.validate();
        let defaults = RenderSettings::default();

        assert_eq!(validated.shadow_map_size, defaults.shadow_map_size);
        assert_eq!(validated.resolution.width, Resolution::default().width);
        assert_eq!(validated.max_objects_per_frame, defaults.max_objects_per_frame);
        assert_eq!(validated.max_lights_per_frame, defaults.max_lights_per_frame);
        assert_eq!(validated.shadow_cache_max_idle_frames, None);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings: RenderSettings =
            serde_json::from_str(r#"{ "shadow_key_policy": "positional", "shadow_cache_max_idle_frames": 120 }"#)
                .unwrap();
        assert_eq!(settings.shadow_key_policy, ShadowKeyPolicy::Positional);
        assert_eq!(settings.shadow_cache_max_idle_frames, Some(120));
        assert_eq!(settings.shadow_map_size, 2048);
    }

    #[test]
    fn missing_file_uses_defaults() {
        let settings = RenderSettings::load_from_path("does/not/exist/settings.json");
        assert_eq!(settings.shadow_key_policy, ShadowKeyPolicy::Stable);
        assert!(settings.shadow_cache_max_idle_frames.is_none());
    }

    #[test]
    fn present_mode_falls_back_to_fifo_when_desired_missing() {
        let settings = RenderSettings {
            present_mode: PresentModeSetting::Mailbox,
            ..RenderSettings::default()
        };

        let available = [wgpu::PresentMode::Fifo, wgpu::PresentMode::Immediate];

        assert_eq!(settings.present_mode(&available), wgpu::PresentMode::Fifo);
    }

    #[test]
    fn present_mode_uses_first_available_when_fifo_missing() {
        let settings = RenderSettings {
            present_mode: PresentModeSetting::Mailbox,
            ..RenderSettings::default()
        };

        assert_eq!(
            settings.present_mode(&[wgpu::PresentMode::Immediate]),
            wgpu::PresentMode::Immediate
        );
    }
}
