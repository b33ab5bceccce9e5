use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::correction::rules::RuleTable;
use crate::session::export::SaveContext;
use crate::session::flagging::InteractionSettings;

/// Environment variable naming an explicit settings file.
pub const CONFIG_ENV: &str = "TRACEGAS_QC_CONFIG";

/// Settings file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "tracegas-qc.toml";

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Application settings. Every field is optional in the file.
///
/// ```toml
/// rules_path = "config/rules.toml"
/// feed_dir = "feeds"
/// flags_dir = "flags"
/// user = "analyst"
/// session = "2019-review"
///
/// [interaction]
/// min_drag_fraction = 0.01
/// pick_radius = 0.03
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Rule table document; `None` uses the table built into the binary.
    pub rules_path: Option<PathBuf>,
    pub feed_dir: PathBuf,
    pub flags_dir: PathBuf,
    pub user: String,
    pub session: String,
    pub interaction: InteractionSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            rules_path: None,
            feed_dir: PathBuf::from("feeds"),
            flags_dir: PathBuf::from("flags"),
            user: std::env::var("USER").unwrap_or_else(|_| "analyst".to_string()),
            session: "default".to_string(),
            interaction: InteractionSettings::default(),
        }
    }
}

impl Settings {
    /// Load from `$TRACEGAS_QC_CONFIG`, else `./tracegas-qc.toml`. A missing
    /// file gives the defaults; a malformed one is an error.
    pub fn load() -> Result<Self> {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        if !path.exists() {
            log::info!("No settings file at {}; using defaults", path.display());
            return Ok(Self::default());
        }
        Self::from_path(&path)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings {}", path.display()))?;
        let settings: Settings = toml::from_str(&text)
            .with_context(|| format!("parsing settings {}", path.display()))?;
        log::info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// The configured rule table, or the built-in one.
    pub fn rule_table(&self) -> Result<RuleTable> {
        match &self.rules_path {
            Some(path) => RuleTable::load(path),
            None => RuleTable::embedded().context("building the built-in rule table"),
        }
    }

    pub fn save_context(&self) -> SaveContext {
        SaveContext::new(self.user.clone(), self.session.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracegas-qc.toml");
        std::fs::write(
            &path,
            "user = \"mk\"\nfeed_dir = \"out/feeds\"\n\n[interaction]\npick_radius = 0.05\n",
        )
        .unwrap();

        let settings = Settings::from_path(&path).unwrap();
        assert_eq!(settings.user, "mk");
        assert_eq!(settings.feed_dir, PathBuf::from("out/feeds"));
        assert_eq!(settings.flags_dir, PathBuf::from("flags"));
        assert_eq!(settings.interaction.pick_radius, 0.05);
        assert_eq!(settings.interaction.min_drag_fraction, 0.01);
        assert_eq!(settings.save_context().user, "mk");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "user = [").unwrap();
        assert!(Settings::from_path(&path).is_err());
    }

    #[test]
    fn default_rules_come_from_the_binary() {
        let table = Settings::default().rule_table().unwrap();
        assert!(!table.is_empty());
    }
}
