//! Pipeline configuration.
//!
//! One `PipelineConfig` is built at startup (TOML file + environment
//! overrides), validated, and shared read-only by every run. Per-run knobs are
//! copied into `RunOptions`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{BackendKind, DocumentType};

/// Application-level constants
pub const APP_NAME: &str = "docflow";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "docflow=info"
}

/// Location of the user config file (`<config_dir>/docflow/config.toml`).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_NAME).join("config.toml"))
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ═══════════════════════════════════════════════════════════
// Sections
// ═══════════════════════════════════════════════════════════

/// Upper bound on configured extraction retries.
pub const MAX_RETRIES: u32 = 10;

/// Retry schedule for transient extraction failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt (total attempts = max_retries + 1).
    /// At most `MAX_RETRIES`.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
    /// Timeout of a single inference attempt, started once a permit is held.
    pub attempt_timeout_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 250,
            backoff_multiplier: 2.0,
            max_backoff_ms: 5_000,
            attempt_timeout_secs: 120,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (1-based).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16) as i32;
        let ms = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(exp);
        Duration::from_millis((ms as u64).min(self.max_backoff_ms))
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// In-flight inference calls across all runs.
    pub max_concurrent_inferences: usize,
    /// Documents processed at once by `process_batch`.
    pub max_parallel_runs: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_inferences: 4,
            max_parallel_runs: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub enabled: bool,
    pub tesseract_path: PathBuf,
    /// Tesseract language string. None = derived from the detected language.
    pub languages: Option<String>,
    pub timeout_secs: u64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tesseract_path: PathBuf::from("tesseract"),
            languages: None,
            timeout_secs: 60,
        }
    }
}

/// Local Ollama backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalModelConfig {
    pub url: String,
    pub model: String,
    pub request_timeout_secs: u64,
}

impl Default for LocalModelConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:11434".to_string(),
            model: "llama3.1:8b".to_string(),
            request_timeout_secs: 300,
        }
    }
}

/// OpenAI-compatible chat completions backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudModelConfig {
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the bearer key.
    pub api_key_env: String,
    pub request_timeout_secs: u64,
}

impl Default for CloudModelConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "DOCFLOW_CLOUD_API_KEY".to_string(),
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelBackends {
    pub local: LocalModelConfig,
    pub cloud: CloudModelConfig,
}

/// How an ambiguous single separator (`1.234` / `1,234`) is read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumberLocale {
    /// `.` groups thousands, `,` is the decimal mark.
    #[default]
    Es,
    /// `,` groups thousands, `.` is the decimal mark.
    En,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// chrono formats tried in order; first match wins.
    pub date_formats: Vec<String>,
    pub number_locale: NumberLocale,
    /// Max characters of document text placed in a prompt.
    pub prompt_char_budget: usize,
    /// Run the deterministic regex pass alongside the model pass.
    pub pattern_pass: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            date_formats: ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y", "%m/%d/%Y"]
                .iter()
                .map(|f| f.to_string())
                .collect(),
            number_locale: NumberLocale::Es,
            prompt_char_budget: 12_000,
            pattern_pass: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Tolerance for subtotal + tax == total.
    pub amount_epsilon: f64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            amount_epsilon: 0.01,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// PipelineConfig
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Records with overall confidence below this go to human review.
    pub review_threshold: f32,
    /// Top classification score below which a second extractor is tried.
    pub disambiguation_threshold: f32,
    pub default_backend: BackendKind,
    pub retry: RetryPolicy,
    pub concurrency: ConcurrencyConfig,
    pub ocr: OcrConfig,
    pub backends: ModelBackends,
    pub extraction: ExtractionConfig,
    pub reconcile: ReconcileConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            review_threshold: 0.7,
            disambiguation_threshold: 0.6,
            default_backend: BackendKind::Local,
            retry: RetryPolicy::default(),
            concurrency: ConcurrencyConfig::default(),
            ocr: OcrConfig::default(),
            backends: ModelBackends::default(),
            extraction: ExtractionConfig::default(),
            reconcile: ReconcileConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = toml::from_str(&content)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        tracing::debug!(path = %path.display(), "Loaded pipeline config");
        Ok(config)
    }

    /// Load the user config file if it exists, otherwise defaults.
    /// Environment overrides apply either way.
    pub fn load_or_default() -> Result<Self, ConfigError> {
        match default_config_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                let mut config = Self::default();
                config.apply_overrides(|key| std::env::var(key).ok());
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Apply `DOCFLOW_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("DOCFLOW_BACKEND") {
            match value.parse::<BackendKind>() {
                Ok(kind) => self.default_backend = kind,
                Err(e) => tracing::warn!(error = %e, "Ignoring DOCFLOW_BACKEND override"),
            }
        }
        if let Some(url) = lookup("DOCFLOW_OLLAMA_URL") {
            self.backends.local.url = url;
        }
        if let Some(model) = lookup("DOCFLOW_OLLAMA_MODEL") {
            self.backends.local.model = model;
        }
        if let Some(url) = lookup("DOCFLOW_CLOUD_URL") {
            self.backends.cloud.base_url = url;
        }
        if let Some(model) = lookup("DOCFLOW_CLOUD_MODEL") {
            self.backends.cloud.model = model;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("review_threshold", self.review_threshold),
            ("disambiguation_threshold", self.disambiguation_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be within 0.0-1.0, got {value}"
                )));
            }
        }
        if self.concurrency.max_concurrent_inferences == 0 {
            return Err(ConfigError::Invalid(
                "concurrency.max_concurrent_inferences must be at least 1".into(),
            ));
        }
        if self.concurrency.max_parallel_runs == 0 {
            return Err(ConfigError::Invalid(
                "concurrency.max_parallel_runs must be at least 1".into(),
            ));
        }
        if self.retry.attempt_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "retry.attempt_timeout_secs must be at least 1".into(),
            ));
        }
        if self.retry.max_retries > MAX_RETRIES {
            return Err(ConfigError::Invalid(format!(
                "retry.max_retries must be at most {MAX_RETRIES}, got {}",
                self.retry.max_retries
            )));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "retry.backoff_multiplier must be >= 1.0".into(),
            ));
        }
        if self.extraction.date_formats.is_empty() {
            return Err(ConfigError::Invalid(
                "extraction.date_formats must not be empty".into(),
            ));
        }
        if self.reconcile.amount_epsilon < 0.0 {
            return Err(ConfigError::Invalid(
                "reconcile.amount_epsilon must not be negative".into(),
            ));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════
// RunOptions
// ═══════════════════════════════════════════════════════════

/// Per-run options. Defaults come from the pipeline config.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    /// Skips classification when set (confidence 1.0, no alternates).
    pub document_type_hint: Option<DocumentType>,
    pub ocr_enabled: bool,
    pub model_backend: BackendKind,
    /// Review threshold for this run.
    pub confidence_threshold: f32,
    pub disambiguation_threshold: f32,
    pub retry_policy: RetryPolicy,
}

impl RunOptions {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            document_type_hint: None,
            ocr_enabled: config.ocr.enabled,
            model_backend: config.default_backend,
            confidence_threshold: config.review_threshold,
            disambiguation_threshold: config.disambiguation_threshold,
            retry_policy: config.retry.clone(),
        }
    }

    pub fn with_type_hint(mut self, document_type: DocumentType) -> Self {
        self.document_type_hint = Some(document_type);
        self
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.model_backend = backend;
        self
    }

    pub fn without_ocr(mut self) -> Self {
        self.ocr_enabled = false;
        self
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_backend, BackendKind::Local);
        assert_eq!(config.retry.max_attempts(), 3);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            review_threshold = 0.8
            default_backend = "cloud"

            [retry]
            max_retries = 5

            [extraction]
            number_locale = "en"
            "#,
        )
        .unwrap();
        assert!((config.review_threshold - 0.8).abs() < f32::EPSILON);
        assert_eq!(config.default_backend, BackendKind::Cloud);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.initial_backoff_ms, 250);
        assert_eq!(config.extraction.number_locale, NumberLocale::En);
        assert!(config.extraction.pattern_pass);
    }

    #[test]
    fn out_of_range_threshold_rejected() {
        let err = PipelineConfig::from_toml_str("review_threshold = 1.5").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn zero_concurrency_rejected() {
        let err = PipelineConfig::from_toml_str(
            "[concurrency]\nmax_concurrent_inferences = 0",
        )
        .unwrap_err();
        assert!(err.to_string().contains("max_concurrent_inferences"));
    }

    #[test]
    fn excessive_retries_rejected() {
        let err = PipelineConfig::from_toml_str("[retry]\nmax_retries = 4294967295").unwrap_err();
        assert!(err.to_string().contains("max_retries"));
        let policy = RetryPolicy {
            max_retries: u32::MAX,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.max_attempts(), u32::MAX);
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let err = PipelineConfig::from_toml_str("review_threshold = [").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "disambiguation_threshold = 0.5\n").unwrap();
        let config = PipelineConfig::load(&path).unwrap();
        assert!((config.disambiguation_threshold - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = PipelineConfig::load(Path::new("/nonexistent/docflow.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("DOCFLOW_BACKEND", "cloud"),
            ("DOCFLOW_OLLAMA_URL", "http://gpu-box:11434"),
            ("DOCFLOW_CLOUD_MODEL", "gpt-4o"),
        ]
        .into_iter()
        .collect();
        let mut config = PipelineConfig::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.default_backend, BackendKind::Cloud);
        assert_eq!(config.backends.local.url, "http://gpu-box:11434");
        assert_eq!(config.backends.cloud.model, "gpt-4o");
        assert_eq!(config.backends.local.model, LocalModelConfig::default().model);
    }

    #[test]
    fn bad_backend_override_is_ignored() {
        let mut config = PipelineConfig::default();
        config.apply_overrides(|k| (k == "DOCFLOW_BACKEND").then(|| "quantum".to_string()));
        assert_eq!(config.default_backend, BackendKind::Local);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            initial_backoff_ms: 100,
            backoff_multiplier: 2.0,
            max_backoff_ms: 350,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(350));
    }

    #[test]
    fn run_options_follow_config() {
        let mut config = PipelineConfig::default();
        config.ocr.enabled = false;
        config.review_threshold = 0.9;
        let options = RunOptions::from_config(&config).with_type_hint(DocumentType::Cv);
        assert!(!options.ocr_enabled);
        assert!((options.confidence_threshold - 0.9).abs() < f32::EPSILON);
        assert_eq!(options.document_type_hint, Some(DocumentType::Cv));
    }

    #[test]
    fn default_log_filter_targets_crate() {
        assert_eq!(default_log_filter(), "docflow=info");
    }
}
