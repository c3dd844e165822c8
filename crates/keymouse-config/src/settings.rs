use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::key_code::{KeyBinding, KeyCode, Modifiers};

const MIN_TUNABLE: f64 = 0.1;
const MAX_TUNABLE: f64 = 1000.0;

/// Acceleration model tunables for one mover, in pixels per tick.
///
/// All three fields are required when the object is present; a missing
/// object falls back to the mover's defaults as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MotionSettings {
    pub acceleration: f64,
    pub max_speed: f64,
    pub start_speed: f64,
}

impl MotionSettings {
    pub const CURSOR: Self = Self {
        acceleration: 1.5,
        max_speed: 20.0,
        start_speed: 3.0,
    };

    pub const SCROLL: Self = Self {
        acceleration: 1.0,
        max_speed: 15.0,
        start_speed: 2.0,
    };

    fn validate(&mut self, defaults: &MotionSettings) {
        self.acceleration = clamp_tunable(self.acceleration, defaults.acceleration);
        self.max_speed = clamp_tunable(self.max_speed, defaults.max_speed);
        self.start_speed = clamp_tunable(self.start_speed, defaults.start_speed).min(self.max_speed);
    }
}

fn clamp_tunable(value: f64, fallback: f64) -> f64 {
    if value.is_nan() {
        return fallback;
    }
    value.clamp(MIN_TUNABLE, MAX_TUNABLE)
}

/// User settings (keymouse.json).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct Settings {
    pub cursor: MotionSettings,
    pub scroll: MotionSettings,
    /// Cursor ceiling while the turbo key is held.
    pub turbo_max_speed: f64,
    pub activate: KeyBinding,
    pub deactivate: KeyBinding,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cursor: MotionSettings::CURSOR,
            scroll: MotionSettings::SCROLL,
            turbo_max_speed: 40.0,
            activate: KeyBinding::new(KeyCode::Space, Modifiers::CONTROL.union(Modifiers::ALT)),
            deactivate: KeyBinding::new(KeyCode::Escape, Modifiers::empty()),
        }
    }
}

impl Settings {
    pub fn validate(&mut self) {
        self.cursor.validate(&MotionSettings::CURSOR);
        self.scroll.validate(&MotionSettings::SCROLL);
        self.turbo_max_speed = clamp_tunable(self.turbo_max_speed, 40.0);
    }

    /// Read settings from a JSON file.
    pub fn read(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let mut settings: Settings = serde_json::from_str(&data)?;
        settings.validate();
        Ok(settings)
    }

    /// Write settings to a JSON file.
    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.cursor, MotionSettings::CURSOR);
        assert_eq!(s.scroll, MotionSettings::SCROLL);
        assert_eq!(s.turbo_max_speed, 40.0);
        assert_eq!(s.activate.key, KeyCode::Space);
        assert_eq!(s.activate.modifiers, Modifiers::CONTROL | Modifiers::ALT);
        assert_eq!(s.deactivate.key, KeyCode::Escape);
        assert!(s.deactivate.modifiers.is_empty());
    }

    #[test]
    fn test_validate_clamps() {
        let mut s = Settings {
            cursor: MotionSettings {
                acceleration: -3.0,
                max_speed: 5000.0,
                start_speed: f64::NAN,
            },
            scroll: MotionSettings {
                acceleration: 0.0,
                max_speed: 4.0,
                start_speed: 9.0,
            },
            turbo_max_speed: 0.0,
            ..Default::default()
        };
        s.validate();
        assert_eq!(s.cursor.acceleration, MIN_TUNABLE);
        assert_eq!(s.cursor.max_speed, MAX_TUNABLE);
        assert_eq!(s.cursor.start_speed, MotionSettings::CURSOR.start_speed);
        assert_eq!(s.scroll.acceleration, MIN_TUNABLE);
        assert_eq!(s.scroll.start_speed, 4.0);
        assert_eq!(s.turbo_max_speed, MIN_TUNABLE);
    }

    #[test]
    fn test_deserialize_from_empty() {
        let s: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(s, Settings::default());
    }

    #[test]
    fn test_missing_motion_object_keeps_defaults() {
        let s: Settings = serde_json::from_str(
            r#"{"cursor":{"acceleration":2.0,"maxSpeed":30.0,"startSpeed":4.0}}"#,
        )
        .unwrap();
        assert_eq!(s.cursor.max_speed, 30.0);
        assert_eq!(s.scroll, MotionSettings::SCROLL);
    }

    #[test]
    fn test_incomplete_motion_object_is_rejected() {
        let result: Result<Settings, _> = serde_json::from_str(r#"{"cursor":{"maxSpeed":30.0}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_camel_case_field_names() {
        let json = serde_json::to_string(&Settings::default()).unwrap();
        assert!(json.contains("\"turboMaxSpeed\""));
        assert!(json.contains("\"startSpeed\""));
        assert!(json.contains("\"maxSpeed\""));
    }

    #[test]
    fn test_read_write_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keymouse.json");

        let mut settings = Settings::default();
        settings.cursor.max_speed = 25.0;
        settings.deactivate = KeyBinding::new(KeyCode::Q, Modifiers::META);
        settings.write(&path).unwrap();

        let loaded = Settings::read(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_read_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keymouse.json");
        std::fs::write(&path, r#"{"turboMaxSpeed": -1.0}"#).unwrap();

        let loaded = Settings::read(&path).unwrap();
        assert_eq!(loaded.turbo_max_speed, MIN_TUNABLE);
    }

    #[test]
    fn test_read_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Settings::read(&dir.path().join("missing.json")).is_err());
    }
}
