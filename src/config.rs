// Scene manifest: asset path, camera/zoom/focus tuning, lighting presets and
// the table of named interaction targets.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "assets/scene.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SceneConfig {
    pub model_path: PathBuf,
    pub window: WindowConfig,
    pub camera: CameraConfig,
    pub zoom: ZoomParams,
    pub focus: FocusParams,
    pub hover: HoverParams,
    pub lamp: LampParams,
    pub lighting: LightingConfig,
    pub loader: LoaderConfig,
    pub screen: ScreenConfig,
    pub targets: Vec<TargetEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "folio3d".to_string(),
            width: 1280,
            height: 800,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Vertical field of view in degrees.
    pub fov_degrees: f32,
    pub near: f32,
    pub far: f32,
    pub position: [f32; 3],
    /// Orbit target; aimed right of centre so the panel doesn't cover the room.
    pub target: [f32; 3],
    pub damping_factor: f32,
    pub rotate_speed: f32,
    pub pan_speed: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov_degrees: 22.0,
            near: 0.1,
            far: 100.0,
            position: [7.0, 10.0, 9.0],
            target: [0.7, 1.9, -1.0],
            damping_factor: 0.05,
            rotate_speed: 1.0,
            pan_speed: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ZoomParams {
    pub enabled: bool,
    pub duration: f32,
    /// Exponent applied per pixel of wheel delta.
    pub speed: f32,
    pub min_distance: f32,
    pub max_distance: f32,
}

/// Smallest gap kept between the zoom limits.
pub const MIN_ZOOM_SPAN: f32 = 0.1;

impl ZoomParams {
    /// Make the distance limits usable: finite, positive and ordered with at
    /// least [`MIN_ZOOM_SPAN`] between them.
    pub fn sanitize(&mut self) {
        let defaults = Self::default();
        if !self.min_distance.is_finite() || self.min_distance <= 0.0 {
            self.min_distance = defaults.min_distance;
        }
        if !self.max_distance.is_finite() || self.max_distance <= 0.0 {
            self.max_distance = defaults.max_distance;
        }
        if self.min_distance > self.max_distance - MIN_ZOOM_SPAN {
            warn!(
                "Zoom min_distance {} exceeds max_distance {}. Clamping",
                self.min_distance, self.max_distance
            );
            self.min_distance = (self.max_distance - MIN_ZOOM_SPAN).max(f32::EPSILON);
            self.max_distance = self.max_distance.max(self.min_distance + MIN_ZOOM_SPAN);
        }
    }
}

impl Default for ZoomParams {
    fn default() -> Self {
        Self {
            enabled: true,
            duration: 0.7,
            speed: 0.0025,
            min_distance: 2.0,
            max_distance: 40.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FocusParams {
    pub duration: f32,
    pub fit_offset: f32,
    /// Comma separated node names that never take focus.
    pub lock_names: String,
}

impl Default for FocusParams {
    fn default() -> Self {
        Self {
            duration: 0.5,
            fit_offset: 1.0,
            lock_names: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HoverParams {
    pub scale: f32,
    pub tween_duration: f32,
    pub tracker_scale: f32,
}

impl Default for HoverParams {
    fn default() -> Self {
        Self {
            scale: 1.25,
            tween_duration: 0.25,
            tracker_scale: 1.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LampParams {
    pub color_on: u32,
    pub emissive_on: f32,
    pub tween_duration: f32,
    pub light_intensity_on: f32,
    pub light_intensity_off: f32,
    pub light_distance: f32,
    pub light_decay: f32,
}

impl Default for LampParams {
    fn default() -> Self {
        Self {
            color_on: 0xffee88,
            emissive_on: 3.0,
            tween_duration: 0.25,
            light_intensity_on: 3.0,
            light_intensity_off: 0.0,
            light_distance: 5.0,
            light_decay: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct LightSetting {
    pub intensity: f32,
    pub color: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct SunSetting {
    pub intensity: f32,
    pub color: u32,
    pub position: [f32; 3],
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct LightingPreset {
    pub ambient: LightSetting,
    pub sun: SunSetting,
    pub window: LightSetting,
    pub background: u32,
}

impl LightingPreset {
    pub fn day() -> Self {
        Self {
            ambient: LightSetting {
                intensity: 2.05,
                color: 0xffffff,
            },
            sun: SunSetting {
                intensity: 4.3,
                color: 0xffffff,
                position: [0.56, 4.73, 0.3],
            },
            window: LightSetting {
                intensity: 0.0,
                color: 0xffffff,
            },
            background: 0xf7fbff,
        }
    }

    pub fn night() -> Self {
        Self {
            ambient: LightSetting {
                intensity: 2.05,
                color: 0xbf00e6,
            },
            sun: SunSetting {
                intensity: 4.3,
                color: 0xff00c8,
                position: [0.56, 4.73, 0.3],
            },
            window: LightSetting {
                intensity: 0.9,
                color: 0xbf00e6,
            },
            background: 0x022b33,
        }
    }
}

/// Fixed geometry of the spot light that shines through the window.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WindowLightConfig {
    pub position: [f32; 3],
    pub target: [f32; 3],
    pub angle_degrees: f32,
    pub penumbra: f32,
    pub distance: f32,
    pub decay: f32,
}

impl Default for WindowLightConfig {
    fn default() -> Self {
        Self {
            position: [2.5, 3.8, 3.2],
            target: [0.0, 1.2, 0.0],
            angle_degrees: 32.0,
            penumbra: 0.3,
            distance: 20.0,
            decay: 1.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LightingConfig {
    pub start_at_night: bool,
    pub day: LightingPreset,
    pub night: LightingPreset,
    pub window_light: WindowLightConfig,
}

impl Default for LightingConfig {
    fn default() -> Self {
        Self {
            start_at_night: false,
            day: LightingPreset::day(),
            night: LightingPreset::night(),
            window_light: WindowLightConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub min_visible_secs: f32,
    pub fade_secs: f32,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            min_visible_secs: 2.0,
            fade_secs: 0.5,
        }
    }
}

/// The mesh that would show the screen video. Only its presence is checked.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ScreenConfig {
    pub node: String,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            node: "Cube007_1".to_string(),
        }
    }
}

/// One named interaction target: a stable id, the node names it covers, and
/// what it does.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TargetEntry {
    pub id: String,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(flatten)]
    pub kind: TargetKind,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetKind {
    SocialLink {
        #[serde(default)]
        url: Option<String>,
    },
    HoverGroup,
    Lamp,
    RaycastTarget,
}

impl TargetEntry {
    fn new(id: &str, names: &[&str], kind: TargetKind) -> Self {
        Self {
            id: id.to_string(),
            names: names.iter().map(|n| n.to_string()).collect(),
            kind,
        }
    }

    fn link(id: &str, names: &[&str], url: &str) -> Self {
        Self::new(
            id,
            names,
            TargetKind::SocialLink {
                url: Some(url.to_string()),
            },
        )
    }
}

/// Targets matching the node names of the bundled room model.
pub fn default_targets() -> Vec<TargetEntry> {
    const TELEGRAM: &[&str] = &["Cylinder005", "Cylinder005_1"];
    const WHATSAPP: &[&str] = &["Cylinder002", "Cylinder002_1"];
    const INSTAGRAM: &[&str] = &["Plane001_1", "Plane001_2"];
    const TIKTOK: &[&str] = &["Cylinder004", "Cylinder004_1", "Cylinder004_2", "Cylinder004_3"];

    vec![
        TargetEntry::link("social-link:telegram", TELEGRAM, "https://t.me/nomadicaddict"),
        TargetEntry::link("social-link:whatsapp", WHATSAPP, "https://wa.me/918668824809"),
        TargetEntry::link(
            "social-link:instagram",
            INSTAGRAM,
            "https://www.instagram.com/deathnoteuser5",
        ),
        TargetEntry::link(
            "social-link:tiktok",
            TIKTOK,
            "https://www.tiktok.com/@smartenspaces?_t=ZP-8zVlEv7Dvkl&_r=1",
        ),
        TargetEntry::new("hover-group:0", INSTAGRAM, TargetKind::HoverGroup),
        TargetEntry::new("hover-group:1", TELEGRAM, TargetKind::HoverGroup),
        TargetEntry::new("hover-group:2", WHATSAPP, TargetKind::HoverGroup),
        TargetEntry::new("hover-group:3", TIKTOK, TargetKind::HoverGroup),
        TargetEntry::new("lamp", &["Cylinder003_2"], TargetKind::Lamp),
        TargetEntry::new(
            "raycast:props",
            &["headset", "plushie_1", "plushie_2"],
            TargetKind::RaycastTarget,
        ),
    ]
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("assets/models/v10.glb"),
            window: WindowConfig::default(),
            camera: CameraConfig::default(),
            zoom: ZoomParams::default(),
            focus: FocusParams::default(),
            hover: HoverParams::default(),
            lamp: LampParams::default(),
            lighting: LightingConfig::default(),
            loader: LoaderConfig::default(),
            screen: ScreenConfig::default(),
            targets: default_targets(),
        }
    }
}

impl SceneConfig {
    /// Load configuration from the default path.
    pub fn load() -> Self {
        Self::load_from_path(Path::new(DEFAULT_CONFIG_PATH))
    }

    /// Load configuration from an explicit path, falling back to defaults on errors.
    pub fn load_from_path(path: &Path) -> Self {
        match Self::try_load_from_path(path) {
            Ok(cfg) => cfg,
            Err(ConfigError::Read { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                warn!("Scene config not found at {}. Using defaults", path.display());
                SceneConfig::default()
            }
            Err(err) => {
                warn!("{err}. Using defaults");
                SceneConfig::default()
            }
        }
    }

    pub fn try_load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut cfg = Self::from_toml(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        // Relative model paths are resolved against the manifest's directory.
        if cfg.model_path.is_relative() {
            if let Some(dir) = path.parent() {
                let candidate = dir.join(&cfg.model_path);
                if candidate.exists() {
                    cfg.model_path = candidate;
                }
            }
        }
        Ok(cfg)
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        let mut cfg: Self = toml::from_str(contents)?;
        cfg.zoom.sanitize();
        debug!("Zoom limits {}..{}", cfg.zoom.min_distance, cfg.zoom.max_distance);
        Ok(cfg)
    }
}

/// Lock names split on commas, trimmed, blanks dropped.
pub fn parse_lock_names(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_manifest_matches_defaults() {
        let cfg = SceneConfig::from_toml(include_str!("../assets/scene.toml")).unwrap();
        let defaults = SceneConfig::default();
        assert_eq!(cfg.targets, defaults.targets);
        assert_eq!(cfg.zoom, defaults.zoom);
        assert_eq!(cfg.focus, defaults.focus);
        assert_eq!(cfg.lamp, defaults.lamp);
        assert_eq!(cfg.lighting.day, LightingPreset::day());
        assert_eq!(cfg.lighting.night, LightingPreset::night());
        assert_eq!(cfg.lighting.window_light, defaults.lighting.window_light);
    }

    #[test]
    fn empty_manifest_uses_defaults() {
        let cfg = SceneConfig::from_toml("").unwrap();
        assert_eq!(cfg.zoom, ZoomParams::default());
        assert_eq!(cfg.targets, default_targets());
    }

    #[test]
    fn targets_parse_as_tagged_variants() {
        let cfg = SceneConfig::from_toml(
            r#"
            [[targets]]
            id = "social-link:telegram"
            kind = "social_link"
            names = ["Cylinder005", "Cylinder005_1"]
            url = "https://t.me/example"

            [[targets]]
            id = "lamp"
            kind = "lamp"
            names = ["Cylinder003_2"]

            [[targets]]
            id = "social-link:broken"
            kind = "social_link"
            names = ["Nope"]
            "#,
        )
        .unwrap();

        assert_eq!(cfg.targets.len(), 3);
        assert_eq!(
            cfg.targets[0].kind,
            TargetKind::SocialLink {
                url: Some("https://t.me/example".to_string())
            }
        );
        assert_eq!(cfg.targets[1].kind, TargetKind::Lamp);
        assert_eq!(cfg.targets[2].kind, TargetKind::SocialLink { url: None });
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = SceneConfig::from_toml(
            r#"
            [zoom]
            speed = 0.01

            [lamp]
            color_on = 0xff0000
            "#,
        )
        .unwrap();
        assert_eq!(cfg.zoom.speed, 0.01);
        assert_eq!(cfg.zoom.max_distance, 40.0);
        assert_eq!(cfg.lamp.color_on, 0xff0000);
        assert_eq!(cfg.lamp.emissive_on, 3.0);
    }

    #[test]
    fn inverted_zoom_limits_are_reordered() {
        let cfg = SceneConfig::from_toml("[zoom]\nmin_distance = 50.0\nmax_distance = 5.0").unwrap();
        assert!(cfg.zoom.min_distance <= cfg.zoom.max_distance - MIN_ZOOM_SPAN + 1e-6);
        assert_eq!(cfg.zoom.max_distance, 5.0);
        assert!((cfg.zoom.min_distance - 4.9).abs() < 1e-5);
    }

    #[test]
    fn non_positive_zoom_limits_take_defaults() {
        let cfg = SceneConfig::from_toml("[zoom]\nmin_distance = -1.0\nmax_distance = 0.0").unwrap();
        assert_eq!(cfg.zoom.min_distance, 2.0);
        assert_eq!(cfg.zoom.max_distance, 40.0);
    }

    #[test]
    fn screen_node_defaults_to_monitor() {
        assert_eq!(SceneConfig::from_toml("").unwrap().screen.node, "Cube007_1");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = SceneConfig::load_from_path(Path::new("does/not/exist.toml"));
        assert_eq!(cfg.camera.fov_degrees, 22.0);
    }

    #[test]
    fn malformed_manifest_is_a_parse_error() {
        let dir = std::env::temp_dir().join("folio3d-config-test");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("broken.toml");
        fs::write(&path, "zoom = [").unwrap();
        let err = SceneConfig::try_load_from_path(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn lock_names_are_trimmed() {
        assert_eq!(parse_lock_names(" Desk , ,Chair"), vec!["Desk", "Chair"]);
        assert!(parse_lock_names("").is_empty());
    }
}
