use crate::error::{CardsenseError, CardsenseResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where the card profile comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProfileSource {
    #[default]
    Demo,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProfileCfg {
    #[serde(default)]
    pub source: ProfileSource,

    #[serde(default)]
    pub path: Option<String>,

    #[serde(default = "default_profile_latency_ms")]
    pub latency_ms: u64,

    #[serde(default = "default_profile_jitter_ms")]
    pub jitter_ms: u64,
}

fn default_profile_latency_ms() -> u64 {
    650
}

fn default_profile_jitter_ms() -> u64 {
    520
}

impl Default for ProfileCfg {
    fn default() -> Self {
        Self {
            source: ProfileSource::Demo,
            path: None,
            latency_ms: default_profile_latency_ms(),
            jitter_ms: default_profile_jitter_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RiskCfg {
    #[serde(default = "default_min_score")]
    pub min_score: u32,

    #[serde(default = "default_max_score")]
    pub max_score: u32,

    /// Scores strictly below this value are approved.
    #[serde(default = "default_approval_threshold")]
    pub approval_threshold: u32,

    #[serde(default = "default_risk_delay_ms")]
    pub delay_ms: u64,
}

fn default_min_score() -> u32 {
    200
}

fn default_max_score() -> u32 {
    850
}

fn default_approval_threshold() -> u32 {
    720
}

fn default_risk_delay_ms() -> u64 {
    720
}

impl Default for RiskCfg {
    fn default() -> Self {
        Self {
            min_score: default_min_score(),
            max_score: default_max_score(),
            approval_threshold: default_approval_threshold(),
            delay_ms: default_risk_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ControlsCfg {
    /// Explicit path to the `card-controls` helper. Discovered when unset.
    #[serde(default)]
    pub binary_path: Option<String>,

    #[serde(default = "default_controls_timeout_secs")]
    pub timeout_secs: u64,

    /// Substitute the in-process fallback when the secure channel cannot load.
    #[serde(default = "default_true")]
    pub allow_fallback: bool,

    #[serde(default = "default_mutation_delay_ms")]
    pub mutation_delay_ms: u64,
}

fn default_controls_timeout_secs() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

fn default_mutation_delay_ms() -> u64 {
    380
}

impl Default for ControlsCfg {
    fn default() -> Self {
        Self {
            binary_path: None,
            timeout_secs: default_controls_timeout_secs(),
            allow_fallback: true,
            mutation_delay_ms: default_mutation_delay_ms(),
        }
    }
}

/// Format of the configuration file on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfigFormat {
    #[default]
    Toml,
    Yaml,
}

impl ConfigFormat {
    fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                ConfigFormat::Yaml
            }
            _ => ConfigFormat::Toml,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct CardsenseConfig {
    #[serde(default)]
    pub profile: ProfileCfg,

    #[serde(default)]
    pub risk: RiskCfg,

    #[serde(default)]
    pub controls: ControlsCfg,

    #[serde(skip)]
    pub path: PathBuf,

    #[serde(skip)]
    pub format: ConfigFormat,
}

impl CardsenseConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> CardsenseResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let format = ConfigFormat::from_path(path);
        let mut cfg = match format {
            ConfigFormat::Toml => toml::from_str::<Self>(&contents)?,
            ConfigFormat::Yaml => serde_yaml::from_str::<Self>(&contents)?,
        };

        cfg.path = path.to_path_buf();
        cfg.format = format;

        let issues = cfg.validate();
        if let Some(first) = issues.into_iter().next() {
            return Err(CardsenseError::InvalidConfig(first));
        }

        Ok(cfg)
    }

    /// Load `path` if it exists, otherwise fall back to built-in defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> CardsenseResult<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }
        log::debug!("config {} not found; using defaults", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            ..Self::default()
        })
    }

    /// Collect every semantic problem with the configuration.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if self.risk.min_score > self.risk.max_score {
            issues.push(format!(
                "risk.min_score ({}) must not exceed risk.max_score ({})",
                self.risk.min_score, self.risk.max_score
            ));
        }

        if self.risk.approval_threshold < self.risk.min_score
            || self.risk.approval_threshold > self.risk.max_score
        {
            issues.push(format!(
                "risk.approval_threshold ({}) must lie within [{}, {}]",
                self.risk.approval_threshold, self.risk.min_score, self.risk.max_score
            ));
        }

        if self.profile.source == ProfileSource::File && self.profile.path.is_none() {
            issues.push("profile.path is required when profile.source = \"file\"".to_string());
        }

        if self.controls.timeout_secs == 0 {
            issues.push("controls.timeout_secs must be greater than zero".to_string());
        }

        issues
    }

    pub fn risk_delay(&self) -> Duration {
        Duration::from_millis(self.risk.delay_ms)
    }

    pub fn controls_timeout(&self) -> Duration {
        Duration::from_secs(self.controls.timeout_secs)
    }

    pub fn mutation_delay(&self) -> Duration {
        Duration::from_millis(self.controls.mutation_delay_ms)
    }

    pub fn controls_binary_path(&self) -> Option<PathBuf> {
        self.controls.binary_path.as_ref().map(PathBuf::from)
    }

    pub fn profile_path(&self) -> Option<PathBuf> {
        self.profile.path.as_ref().map(PathBuf::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_toml_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cardsense.toml");
        fs::write(&path, "").unwrap();

        let cfg = CardsenseConfig::load(&path).unwrap();
        assert_eq!(cfg.format, ConfigFormat::Toml);
        assert_eq!(cfg.risk.min_score, 200);
        assert_eq!(cfg.risk.max_score, 850);
        assert_eq!(cfg.risk.approval_threshold, 720);
        assert_eq!(cfg.risk_delay(), Duration::from_millis(720));
        assert_eq!(cfg.profile.source, ProfileSource::Demo);
        assert!(cfg.controls.allow_fallback);
    }

    #[test]
    fn yaml_overrides_sections() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cardsense.yaml");
        fs::write(
            &path,
            "risk:\n  delay_ms: 10\ncontrols:\n  binary_path: /opt/card-controls\n  allow_fallback: false\n",
        )
        .unwrap();

        let cfg = CardsenseConfig::load(&path).unwrap();
        assert_eq!(cfg.format, ConfigFormat::Yaml);
        assert_eq!(cfg.risk.delay_ms, 10);
        assert_eq!(
            cfg.controls_binary_path(),
            Some(PathBuf::from("/opt/card-controls"))
        );
        assert!(!cfg.controls.allow_fallback);
    }

    #[test]
    fn load_rejects_inverted_score_range() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cardsense.toml");
        fs::write(&path, "[risk]\nmin_score = 900\nmax_score = 100\n").unwrap();

        let err = CardsenseConfig::load(&path).unwrap_err();
        assert!(matches!(err, CardsenseError::InvalidConfig(_)));
        assert_eq!(err.code(), "CS1100");
    }

    #[test]
    fn validate_flags_file_source_without_path() {
        let mut cfg = CardsenseConfig::default();
        cfg.profile.source = ProfileSource::File;
        cfg.controls.timeout_secs = 0;

        let issues = cfg.validate();
        assert_eq!(issues.len(), 2);
        assert!(issues[0].contains("profile.path"));
    }

    #[test]
    fn load_or_default_tolerates_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.toml");

        let cfg = CardsenseConfig::load_or_default(&path).unwrap();
        assert_eq!(cfg.path, path);
        assert_eq!(cfg.controls.timeout_secs, 5);
    }
}
