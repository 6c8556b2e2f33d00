//! Engine configuration.
//!
//! Loaded from an optional TOML file overlaid with `DOCCTL_`-prefixed environment
//! variables (`DOCCTL_COLLABORATOR_TIMEOUT_MS=2000`). Every field has a default.
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    /// Upper bound for any call to a rendering, notification or text-generation service.
    #[serde(default = "default_timeout")]
    pub collaborator_timeout_ms: u64,
    #[serde(default = "default_internal_category")]
    pub internal_category: String,
    #[serde(default = "default_external_category")]
    pub external_category: String,
    /// Attempts at assigning a code before a commit-time collision is reported.
    #[serde(default = "default_code_retries")]
    pub code_retries: u32,
    /// Event-log entries containing any of these (lower-case) are left out of trails.
    #[serde(default = "default_noise_patterns")]
    pub noise_patterns: Vec<String>,
    #[serde(default = "default_rejection_phrases")]
    pub rejection_phrases: Vec<String>,
    /// Months from issue to the next scheduled review; 0 leaves it unset.
    #[serde(default = "default_next_review_months")]
    pub next_review_months: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            collaborator_timeout_ms: default_timeout(),
            internal_category: default_internal_category(),
            external_category: default_external_category(),
            code_retries: default_code_retries(),
            noise_patterns: default_noise_patterns(),
            rejection_phrases: default_rejection_phrases(),
            next_review_months: default_next_review_months(),
        }
    }
}

impl EngineConfig {
    pub fn load(file: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(file) = file {
            builder = builder.add_source(config::File::from(file).required(true));
        }
        let mut cfg: EngineConfig = builder
            .add_source(config::Environment::with_prefix("DOCCTL").try_parsing(true))
            .build()?
            .try_deserialize()?;
        cfg.noise_patterns = lowercase(cfg.noise_patterns);
        cfg.rejection_phrases = lowercase(cfg.rejection_phrases);
        Ok(cfg)
    }

    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_millis(self.collaborator_timeout_ms)
    }
}

fn lowercase(phrases: Vec<String>) -> Vec<String> {
    phrases.into_iter().map(|p| p.to_lowercase()).collect()
}

fn default_timeout() -> u64 {
    5_000
}

fn default_internal_category() -> String {
    "GEN".to_string()
}

fn default_external_category() -> String {
    "EXT".to_string()
}

fn default_code_retries() -> u32 {
    3
}

fn default_noise_patterns() -> Vec<String> {
    vec!["pending activities".to_string()]
}

fn default_rejection_phrases() -> Vec<String> {
    vec!["rejected".to_string(), "returned for corrections".to_string()]
}

fn default_next_review_months() -> u32 {
    12
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn file_values_override_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "collaborator_timeout_ms = 250\nrejection_phrases = [\"Sent Back\"]"
        )
        .unwrap();

        let cfg = EngineConfig::load(Some(file.path())).unwrap();
        assert_eq!(cfg.collaborator_timeout(), Duration::from_millis(250));
        assert_eq!(cfg.rejection_phrases, vec!["sent back".to_string()]);
        assert_eq!(cfg.internal_category, "GEN");
        assert_eq!(cfg.code_retries, 3);
    }
}
