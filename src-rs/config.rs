use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const OPACITY_RANGE: (u8, u8) = (0, 100);
pub const OFFSET_RANGE: (i32, i32) = (-500, 500);
pub const SCALE_RANGE: (u32, u32) = (10, 200);

const OPACITY_STEP: u8 = 5;
const NUDGE_STEP: i32 = 1;

/// Current overlay configuration as held by the configuration store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OverlayConfig {
    pub image_path: Option<PathBuf>,
    pub opacity: u8,
    pub is_visible: bool,
    pub offset_x: i32,
    pub offset_y: i32,
    /// Percent.
    pub scale: u32,
    pub diff_mode: bool,
    pub no_color_diff: bool,
    pub ruler_mode: bool,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            image_path: None,
            opacity: 50,
            is_visible: true,
            offset_x: 0,
            offset_y: 0,
            scale: 100,
            diff_mode: false,
            no_color_diff: false,
            ruler_mode: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffVariant {
    Color,
    Luminance,
}

impl OverlayConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        let config: OverlayConfig = serde_json::from_str(&raw)
            .with_context(|| format!("invalid config JSON: {}", path.display()))?;
        Ok(config.normalized())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create parent directory: {}", parent.display())
                })?;
            }
        }
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(path, raw).with_context(|| format!("failed to write config: {}", path.display()))
    }

    pub fn image_present(&self) -> bool {
        self.image_path.is_some()
    }

    pub fn normalized(mut self) -> Self {
        self.opacity = self.opacity.clamp(OPACITY_RANGE.0, OPACITY_RANGE.1);
        self.offset_x = self.offset_x.clamp(OFFSET_RANGE.0, OFFSET_RANGE.1);
        self.offset_y = self.offset_y.clamp(OFFSET_RANGE.0, OFFSET_RANGE.1);
        self.scale = self.scale.clamp(SCALE_RANGE.0, SCALE_RANGE.1);
        self
    }

    /// Diff flavour the user asked for, ignoring whether it can run.
    pub fn requested_diff(&self) -> Option<DiffVariant> {
        if self.diff_mode {
            Some(DiffVariant::Color)
        } else if self.no_color_diff {
            Some(DiffVariant::Luminance)
        } else {
            None
        }
    }

    /// Diff flavour that should actually be running.
    pub fn effective_diff(&self) -> Option<DiffVariant> {
        if !self.is_visible || !self.image_present() {
            return None;
        }
        self.requested_diff()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyChord {
    pub key: String,
    pub alt: bool,
    pub shift: bool,
    pub ctrl: bool,
}

impl KeyChord {
    pub fn plain(key: &str) -> Self {
        Self {
            key: key.to_string(),
            ..Self::default()
        }
    }

    pub fn alt_shift(key: &str) -> Self {
        Self {
            key: key.to_string(),
            alt: true,
            shift: true,
            ctrl: false,
        }
    }

    pub fn alt_ctrl_shift(key: &str) -> Self {
        Self {
            key: key.to_string(),
            alt: true,
            shift: true,
            ctrl: true,
        }
    }

    pub fn is_escape(&self) -> bool {
        self.key == "Escape"
    }
}

/// Maps a keyboard shortcut to the configuration it requests. `None` when
/// the chord is not a shortcut or its precondition (an image) is missing.
pub fn apply_shortcut(config: &OverlayConfig, chord: &KeyChord) -> Option<OverlayConfig> {
    if !(chord.alt && chord.shift) {
        return None;
    }

    let has_image = config.image_present();
    let mut next = config.clone();

    if chord.key.starts_with("Arrow") {
        if !has_image {
            return None;
        }
        if chord.ctrl {
            match chord.key.as_str() {
                "ArrowLeft" => next.offset_x -= NUDGE_STEP,
                "ArrowRight" => next.offset_x += NUDGE_STEP,
                "ArrowUp" => next.offset_y -= NUDGE_STEP,
                "ArrowDown" => next.offset_y += NUDGE_STEP,
                _ => return None,
            }
        } else {
            match chord.key.as_str() {
                "ArrowUp" => next.opacity = next.opacity.saturating_add(OPACITY_STEP),
                "ArrowDown" => next.opacity = next.opacity.saturating_sub(OPACITY_STEP),
                _ => return None,
            }
        }
        return Some(next.normalized());
    }

    // AltGr reports alt + ctrl, so letter shortcuts ignore ctrl
    match chord.key.as_str() {
        "V" if has_image => next.is_visible = !config.is_visible,
        "D" if has_image => {
            next.diff_mode = !config.diff_mode;
            next.is_visible = next.diff_mode;
            if next.diff_mode {
                next.no_color_diff = false;
            }
        }
        "G" if has_image => {
            next.no_color_diff = !config.no_color_diff;
            next.is_visible = next.no_color_diff;
            if next.no_color_diff {
                next.diff_mode = false;
            }
        }
        "R" => next.ruler_mode = !config.ruler_mode,
        _ => return None,
    }
    Some(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn with_image() -> OverlayConfig {
        OverlayConfig {
            image_path: Some(PathBuf::from("mock.png")),
            ..OverlayConfig::default()
        }
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: OverlayConfig = serde_json::from_str(r#"{"offsetX": 12, "rulerMode": true}"#).unwrap();
        assert_eq!(config.offset_x, 12);
        assert!(config.ruler_mode);
        assert_eq!(config.scale, 100);
        assert_eq!(config.opacity, 50);
        assert!(config.is_visible);
    }

    #[test]
    fn load_clamps_out_of_range_values() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("overlay.json");
        let config = OverlayConfig {
            offset_x: 900,
            scale: 1,
            opacity: 250,
            ..OverlayConfig::default()
        };
        config.save(&path).unwrap();

        let loaded = OverlayConfig::load(&path).unwrap();
        assert_eq!(loaded.offset_x, 500);
        assert_eq!(loaded.scale, 10);
        assert_eq!(loaded.opacity, 100);
    }

    #[test]
    fn diff_needs_image_and_visibility() {
        let mut config = OverlayConfig {
            diff_mode: true,
            ..OverlayConfig::default()
        };
        assert_eq!(config.requested_diff(), Some(DiffVariant::Color));
        assert_eq!(config.effective_diff(), None);

        config.image_path = Some(PathBuf::from("mock.png"));
        assert_eq!(config.effective_diff(), Some(DiffVariant::Color));

        config.is_visible = false;
        assert_eq!(config.effective_diff(), None);
    }

    #[test]
    fn color_diff_wins_over_luminance() {
        let config = OverlayConfig {
            diff_mode: true,
            no_color_diff: true,
            ..with_image()
        };
        assert_eq!(config.effective_diff(), Some(DiffVariant::Color));
    }

    #[test]
    fn diff_toggles_are_mutually_exclusive() {
        let config = OverlayConfig {
            no_color_diff: true,
            ..with_image()
        };
        let next = apply_shortcut(&config, &KeyChord::alt_shift("D")).unwrap();
        assert!(next.diff_mode);
        assert!(!next.no_color_diff);
        assert!(next.is_visible);

        let back = apply_shortcut(&next, &KeyChord::alt_shift("D")).unwrap();
        assert!(!back.diff_mode);
        assert!(!back.is_visible);

        let gray = apply_shortcut(&next, &KeyChord::alt_shift("G")).unwrap();
        assert!(gray.no_color_diff);
        assert!(!gray.diff_mode);
    }

    #[test]
    fn image_shortcuts_need_an_image() {
        let config = OverlayConfig::default();
        assert_eq!(apply_shortcut(&config, &KeyChord::alt_shift("D")), None);
        assert_eq!(apply_shortcut(&config, &KeyChord::alt_shift("V")), None);
        assert_eq!(apply_shortcut(&config, &KeyChord::alt_shift("ArrowUp")), None);

        let ruler = apply_shortcut(&config, &KeyChord::alt_shift("R")).unwrap();
        assert!(ruler.ruler_mode);
    }

    #[test]
    fn opacity_steps_are_clamped() {
        let config = OverlayConfig {
            opacity: 98,
            ..with_image()
        };
        let up = apply_shortcut(&config, &KeyChord::alt_shift("ArrowUp")).unwrap();
        assert_eq!(up.opacity, 100);

        let low = OverlayConfig {
            opacity: 3,
            ..with_image()
        };
        let down = apply_shortcut(&low, &KeyChord::alt_shift("ArrowDown")).unwrap();
        assert_eq!(down.opacity, 0);
    }

    #[test]
    fn ctrl_arrows_nudge_offset() {
        let config = with_image();
        let left = apply_shortcut(&config, &KeyChord::alt_ctrl_shift("ArrowLeft")).unwrap();
        assert_eq!((left.offset_x, left.offset_y), (-1, 0));
        let down = apply_shortcut(&left, &KeyChord::alt_ctrl_shift("ArrowDown")).unwrap();
        assert_eq!((down.offset_x, down.offset_y), (-1, 1));
        assert_eq!(down.opacity, config.opacity);
    }

    #[test]
    fn altgr_letter_shortcuts_still_apply() {
        let config = with_image();
        let diff = apply_shortcut(&config, &KeyChord::alt_ctrl_shift("D")).unwrap();
        assert!(diff.diff_mode);
        assert!(diff.is_visible);

        let ruler = apply_shortcut(&config, &KeyChord::alt_ctrl_shift("R")).unwrap();
        assert!(ruler.ruler_mode);

        let hidden = apply_shortcut(&config, &KeyChord::alt_ctrl_shift("V")).unwrap();
        assert!(!hidden.is_visible);
    }

    #[test]
    fn unmodified_keys_are_not_shortcuts() {
        let config = with_image();
        assert_eq!(apply_shortcut(&config, &KeyChord::plain("D")), None);
        assert_eq!(apply_shortcut(&config, &KeyChord::alt_shift("Q")), None);
    }
}
