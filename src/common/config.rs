use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::bail;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::common::collections::HashSet;
use crate::layout_engine::WindowLimits;
use crate::model::ability_store::AbilityKey;
use crate::sys::geometry::Rect;
use crate::sys::screen::{DisplayId, ScreenDescriptor};

const MAX_WORKER_THREADS: usize = 64;

pub fn config_file() -> PathBuf {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
        .unwrap_or_default()
        .join("scene-wm")
        .join("config.toml")
}

#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub displays: Vec<DisplayConfig>,
    #[serde(default)]
    pub ability_rules: Vec<AbilityRule>,
}

#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub tasks: TaskSettings,
    #[serde(default)]
    pub layout: LayoutSettings,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
pub struct TaskSettings {
    /// Threads shared by every session queue.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Upper bound for blocking client calls.
    #[serde(default = "default_sync_timeout_ms")]
    pub sync_timeout_ms: u64,
}

impl Default for TaskSettings {
    fn default() -> Self {
        TaskSettings {
            worker_threads: default_worker_threads(),
            sync_timeout_ms: default_sync_timeout_ms(),
        }
    }
}

impl TaskSettings {
    pub fn sync_timeout(&self) -> Duration { Duration::from_millis(self.sync_timeout_ms) }

    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.worker_threads == 0 {
            issues.push("settings.tasks.worker_threads must be at least 1".to_string());
        }
        if self.worker_threads > MAX_WORKER_THREADS {
            issues.push(format!(
                "settings.tasks.worker_threads should not exceed {MAX_WORKER_THREADS}"
            ));
        }
        if self.sync_timeout_ms == 0 {
            issues.push("settings.tasks.sync_timeout_ms must be greater than 0".to_string());
        }
        issues
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
pub struct LayoutSettings {
    /// Pointer travel in px before a pointer-down becomes a move.
    #[serde(default = "default_move_threshold")]
    pub move_threshold: i32,
    /// Width in px of the resize band along each window edge.
    #[serde(default = "default_hot_zone")]
    pub hot_zone: i32,
    #[serde(default)]
    pub default_limits: WindowLimits,
}

impl Default for LayoutSettings {
    fn default() -> Self {
        LayoutSettings {
            move_threshold: default_move_threshold(),
            hot_zone: default_hot_zone(),
            default_limits: WindowLimits::default(),
        }
    }
}

impl LayoutSettings {
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.move_threshold < 0 {
            issues.push("settings.layout.move_threshold must not be negative".to_string());
        }
        if self.hot_zone < 0 {
            issues.push("settings.layout.hot_zone must not be negative".to_string());
        }
        if let Err(e) = self.default_limits.validate() {
            issues.push(format!("settings.layout.default_limits: {e}"));
        }
        issues
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
pub struct DisplayConfig {
    pub id: u64,
    #[serde(default)]
    pub x: i32,
    #[serde(default)]
    pub y: i32,
    pub width: i32,
    pub height: i32,
    #[serde(default = "no", rename = "virtual")]
    pub is_virtual: bool,
}

impl DisplayConfig {
    pub fn descriptor(&self) -> ScreenDescriptor {
        ScreenDescriptor {
            id: DisplayId(self.id),
            frame: Rect::new(self.x, self.y, self.width, self.height),
            is_virtual: self.is_virtual,
        }
    }
}

/// Limits and ratios applied to sessions of matching abilities.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
pub struct AbilityRule {
    pub bundle: String,
    #[serde(default)]
    pub module: Option<String>,
    /// Exact ability name. Takes precedence over `ability_pattern`.
    #[serde(default)]
    pub ability: Option<String>,
    #[serde(default)]
    pub ability_pattern: Option<String>,
    #[serde(default)]
    pub limits: Option<WindowLimits>,
    #[serde(default)]
    pub aspect_ratio: Option<f64>,
}

impl AbilityRule {
    pub fn matches(&self, key: &AbilityKey) -> bool {
        if self.bundle != key.bundle {
            return false;
        }
        if let Some(module) = &self.module
            && module != &key.module
        {
            return false;
        }
        match (&self.ability, &self.ability_pattern) {
            (Some(ability), _) => ability == &key.ability,
            (None, Some(pattern)) => {
                Regex::new(pattern).map(|re| re.is_match(&key.ability)).unwrap_or(false)
            }
            (None, None) => true,
        }
    }
}

fn default_worker_threads() -> usize { 4 }
fn default_sync_timeout_ms() -> u64 { 3000 }
fn default_move_threshold() -> i32 { 4 }
fn default_hot_zone() -> i32 { 8 }

fn no() -> bool { false }

impl Config {
    pub fn read(path: &Path) -> anyhow::Result<Config> {
        let buf = std::fs::read_to_string(path)?;
        Self::parse(&buf)
    }

    pub fn parse(buf: &str) -> anyhow::Result<Config> {
        let config: Config = toml::from_str(buf)?;
        Ok(config)
    }

    /// Reads `path` when it exists and otherwise falls back to defaults.
    pub fn read_or_default(path: &Path) -> anyhow::Result<Config> {
        if path.exists() {
            Self::read(path)
        } else {
            Ok(Config::default())
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let toml_string = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml_string.as_bytes())?;
        Ok(())
    }

    /// Displays to start with. A config without any gets a single 1920x1080
    /// display with id 0.
    pub fn screens(&self) -> Vec<ScreenDescriptor> {
        if self.displays.is_empty() {
            return vec![ScreenDescriptor::new(0, Rect::new(0, 0, 1920, 1080))];
        }
        self.displays.iter().map(DisplayConfig::descriptor).collect()
    }

    /// First matching rule for `key`.
    pub fn rule_for(&self, key: &AbilityKey) -> Option<&AbilityRule> {
        self.ability_rules.iter().find(|rule| rule.matches(key))
    }

    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        issues.extend(self.settings.tasks.validate());
        issues.extend(self.settings.layout.validate());

        let mut seen = HashSet::default();
        for display in &self.displays {
            if !seen.insert(display.id) {
                issues.push(format!("display id {} is declared more than once", display.id));
            }
            if display.width <= 0 || display.height <= 0 {
                issues.push(format!(
                    "display {} has a non-positive size {}x{}",
                    display.id, display.width, display.height
                ));
            }
        }

        for (index, rule) in self.ability_rules.iter().enumerate() {
            if rule.bundle.is_empty() {
                issues.push(format!("ability rule {index} has an empty bundle"));
            }
            if let Some(pattern) = &rule.ability_pattern
                && let Err(e) = Regex::new(pattern)
            {
                issues.push(format!("ability rule {index} has an invalid ability_pattern: {e}"));
            }
            if let Some(limits) = &rule.limits
                && let Err(e) = limits.validate()
            {
                issues.push(format!("ability rule {index}: {e}"));
            }
            if let Some(ratio) = rule.aspect_ratio {
                let limits = rule.limits.unwrap_or(self.settings.layout.default_limits);
                if let Err(e) = crate::layout_engine::validate_aspect_ratio(ratio, &limits) {
                    issues.push(format!("ability rule {index}: {e}"));
                }
            }
        }
        issues
    }

    /// Like [`Config::validate`] but fails on the first batch of issues.
    pub fn ensure_valid(&self) -> anyhow::Result<()> {
        let issues = self.validate();
        if !issues.is_empty() {
            bail!("invalid configuration:\n  {}", issues.join("\n  "));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let cfg = Config::parse("").unwrap();
        assert_eq!(cfg.settings.tasks.worker_threads, 4);
        assert_eq!(cfg.settings.tasks.sync_timeout(), Duration::from_millis(3000));
        assert_eq!(cfg.settings.layout.move_threshold, 4);
        assert_eq!(cfg.settings.layout.hot_zone, 8);
        assert_eq!(cfg.screens().len(), 1);
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn parses_displays_and_rules() {
        let toml = r#"
            [settings.tasks]
            worker_threads = 2

            [settings.layout]
            default_limits = { min_width = 200, min_height = 150 }

            [[displays]]
            id = 1
            width = 1920
            height = 1080

            [[displays]]
            id = 2
            x = 1920
            width = 1280
            height = 1024
            virtual = true

            [[ability_rules]]
            bundle = "com.example.player"
            ability_pattern = "^Video.*"
            aspect_ratio = 1.7777
        "#;
        let cfg = Config::parse(toml).unwrap();
        assert_eq!(cfg.settings.tasks.worker_threads, 2);
        assert_eq!(cfg.settings.layout.default_limits.min_width, 200);
        assert_eq!(cfg.settings.layout.default_limits.max_width, 16384);
        let screens = cfg.screens();
        assert_eq!(screens[1].frame, Rect::new(1920, 0, 1280, 1024));
        assert!(screens[1].is_virtual);

        let key = AbilityKey::new("com.example.player", "entry", "VideoAbility");
        assert_eq!(cfg.rule_for(&key).and_then(|r| r.aspect_ratio), Some(1.7777));
        let other = AbilityKey::new("com.example.player", "entry", "MainAbility");
        assert!(cfg.rule_for(&other).is_none());
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(Config::parse("[settings.tasks]\nthreads = 3\n").is_err());
    }

    #[test]
    fn validate_reports_every_issue() {
        let toml = r#"
            [settings.tasks]
            worker_threads = 0

            [settings.layout]
            default_limits = { min_width = 500, max_width = 100 }

            [[displays]]
            id = 1
            width = 100
            height = 100

            [[displays]]
            id = 1
            width = 0
            height = 100

            [[ability_rules]]
            bundle = "b"
            ability_pattern = "(unclosed"
            aspect_ratio = -2.0
            limits = { min_width = 10, min_height = 10, max_width = 100, max_height = 100 }
        "#;
        let issues = Config::parse(toml).unwrap().validate();
        assert_eq!(issues.len(), 6, "{issues:#?}");
        assert!(Config::parse(toml).unwrap().ensure_valid().is_err());
    }

    #[test]
    fn save_then_read_preserves_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut cfg = Config::default();
        cfg.displays.push(DisplayConfig {
            id: 7,
            x: -100,
            y: 0,
            width: 800,
            height: 600,
            is_virtual: false,
        });
        cfg.save(&path).unwrap();
        assert_eq!(Config::read(&path).unwrap(), cfg);
    }

    #[test]
    fn missing_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::read_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg, Config::default());
    }
}
