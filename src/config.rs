use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::detect::DetectOptions;
use crate::intent::SeverityBands;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    #[serde(default = "default_intent_path")]
    pub intent_path: String,
    #[serde(default = "default_records_path")]
    pub records_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    #[serde(default = "default_true")]
    pub parallel: bool,
    #[serde(default = "default_severity_low_max")]
    pub severity_low_max: f64,
    #[serde(default = "default_severity_medium_max")]
    pub severity_medium_max: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ValueEnum, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Csv,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub intent_path: Option<String>,
    pub records_path: Option<String>,
    pub format: Option<OutputFormat>,
    pub sequential: bool,
}

impl Config {
    pub fn default_path() -> PathBuf {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(".config/policy-drift/config.toml")
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(|p| p.to_path_buf())
            .unwrap_or_else(Self::default_path);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(&path)
            .with_context(|| format!("failed reading config: {}", path.display()))?;
        let parsed: Self = toml::from_str(&data)
            .with_context(|| format!("failed parsing TOML config: {}", path.display()))?;
        parsed
            .default_bands()
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid [detection] severity bands: {e}"))?;
        Ok(parsed)
    }

    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(intent_path) = overrides.intent_path {
            self.input.intent_path = intent_path;
        }
        if let Some(records_path) = overrides.records_path {
            self.input.records_path = records_path;
        }
        if let Some(format) = overrides.format {
            self.output.format = format;
        }
        if overrides.sequential {
            self.detection.parallel = false;
        }
    }

    pub fn write_template(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed creating config directory: {}", parent.display())
            })?;
        }
        fs::write(path, Self::default_template())
            .with_context(|| format!("failed writing config template: {}", path.display()))
    }

    pub fn resolved_intent_path(&self) -> PathBuf {
        expand_tilde(&self.input.intent_path)
    }

    pub fn resolved_records_path(&self) -> PathBuf {
        expand_tilde(&self.input.records_path)
    }

    pub fn default_bands(&self) -> SeverityBands {
        SeverityBands {
            low_max: self.detection.severity_low_max,
            medium_max: self.detection.severity_medium_max,
        }
    }

    pub fn detect_options(&self) -> DetectOptions {
        DetectOptions {
            parallel: self.detection.parallel,
            default_bands: self.default_bands(),
        }
    }

    pub fn default_template() -> String {
        let template = r#"[input]
intent_path = "policy_intent.json"
records_path = "implementation_data.csv"

[detection]
parallel = true
severity_low_max = 0.15
severity_medium_max = 0.35

[output]
format = "table"
"#;
        template.to_string()
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            intent_path: default_intent_path(),
            records_path: default_records_path(),
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            severity_low_max: default_severity_low_max(),
            severity_medium_max: default_severity_medium_max(),
        }
    }
}

fn default_intent_path() -> String {
    "policy_intent.json".to_string()
}

fn default_records_path() -> String {
    "implementation_data.csv".to_string()
}

fn default_severity_low_max() -> f64 {
    SeverityBands::default().low_max
}

fn default_severity_medium_max() -> f64 {
    SeverityBands::default().medium_max
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::{Config, ConfigOverrides, OutputFormat};

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config::load(Some(&dir.path().join("absent.toml"))).expect("config");
        assert!(config.detection.parallel);
        assert_eq!(config.output.format, OutputFormat::Table);
        assert_eq!(config.default_bands().medium_max, 0.35);
    }

    #[test]
    fn template_round_trips_through_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested/config.toml");
        Config::write_template(&path).expect("write");
        let config = Config::load(Some(&path)).expect("config");
        assert_eq!(config.input.intent_path, "policy_intent.json");
        assert_eq!(config.default_bands().low_max, 0.15);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "[output]\nformat = \"csv\"\n\n[detection]\nparallel = false").expect("write");
        let config = Config::load(Some(file.path())).expect("config");
        assert_eq!(config.output.format, OutputFormat::Csv);
        assert!(!config.detection.parallel);
        assert_eq!(config.input.records_path, "implementation_data.csv");
        assert_eq!(config.detection.severity_low_max, 0.15);
    }

    #[test]
    fn inverted_bands_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(
            file,
            "[detection]\nseverity_low_max = 0.5\nseverity_medium_max = 0.1"
        )
        .expect("write");
        assert!(Config::load(Some(file.path())).is_err());
    }

    #[test]
    fn overrides_take_precedence() {
        let mut config = Config::default();
        config.apply_overrides(ConfigOverrides {
            intent_path: Some("other.json".to_string()),
            records_path: None,
            format: Some(OutputFormat::Json),
            sequential: true,
        });
        assert_eq!(config.input.intent_path, "other.json");
        assert_eq!(config.output.format, OutputFormat::Json);
        assert!(!config.detect_options().parallel);
    }
}
