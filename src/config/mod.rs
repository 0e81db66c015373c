//! Engine configuration from `vellum.toml`.
//!
//! | Section       | Purpose                                          |
//! |---------------|--------------------------------------------------|
//! | `[views]`     | Refresh interval, id shortening, contracts, suffix |
//! | `[lifecycle]` | Project stage, protected views, rebuild cap      |
//! | `[log]`       | Verbose output                                   |
//!
//! Every section and field is optional.

mod error;

pub use error::ConfigError;

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::{Millis, ProjectStage};
use crate::lifecycle::LifecycleOptions;
use crate::resource::DEFAULT_CONTRACTS_DIR;
use crate::view::ViewOptions;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "vellum.toml";

// ============================================================================
// root configuration
// ============================================================================

/// Root configuration structure representing vellum.toml
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VellumConfig {
    #[serde(default)]
    pub views: ViewsConfig,

    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    #[serde(default)]
    pub log: LogConfig,
}

/// `[views]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewsConfig {
    /// Positive: re-check sources at most once per interval.
    /// 0: compile on every access. Negative: never re-check.
    pub refresh_interval_seconds: i64,
    pub short_ids: bool,
    pub trim_comments: bool,
    pub contracts_dir: String,
    pub suffix: String,
}

impl Default for ViewsConfig {
    fn default() -> Self {
        Self {
            refresh_interval_seconds: 2,
            short_ids: true,
            trim_comments: true,
            contracts_dir: DEFAULT_CONTRACTS_DIR.to_string(),
            suffix: ".xhtml".to_string(),
        }
    }
}

/// `[lifecycle]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub project_stage: ProjectStage,
    pub protected_views: Vec<String>,
    /// Unbounded when unset.
    pub max_view_rebuilds: Option<usize>,
}

/// `[log]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub verbose: bool,
}

impl VellumConfig {
    /// Parse configuration from TOML string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file path.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;
        Self::from_str(&content)
    }

    /// Load `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_path(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.views.suffix.is_empty() {
            return Err(ConfigError::Validation("[views] suffix must not be empty".into()));
        }
        if !self.views.suffix.starts_with('.') {
            return Err(ConfigError::Validation(format!(
                "[views] suffix `{}` must start with '.'",
                self.views.suffix
            )));
        }
        if !self.views.contracts_dir.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "[views] contracts_dir `{}` must start with '/'",
                self.views.contracts_dir
            )));
        }
        if let Some(bad) = self.lifecycle.protected_views.iter().find(|v| !v.starts_with('/')) {
            return Err(ConfigError::Validation(format!(
                "[lifecycle] protected view `{bad}` must be an absolute view id"
            )));
        }
        Ok(())
    }

    /// Refresh interval in milliseconds; -1 disables re-checking.
    pub fn refresh_interval_ms(&self) -> Millis {
        match self.views.refresh_interval_seconds {
            s if s >= 0 => s.saturating_mul(1_000),
            _ => -1,
        }
    }

    pub fn view_options(&self) -> ViewOptions {
        ViewOptions {
            refresh_ms: self.refresh_interval_ms(),
            short_ids: self.views.short_ids,
            trim_comments: self.views.trim_comments,
        }
    }

    pub fn lifecycle_options(&self) -> LifecycleOptions {
        LifecycleOptions {
            protected_views: self.lifecycle.protected_views.clone(),
            max_view_rebuilds: self.lifecycle.max_view_rebuilds,
            suffix: self.views.suffix.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_str_invalid_toml() {
        let result = VellumConfig::from_str("[views\nsuffix = \".xhtml\"");
        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }

    #[test]
    fn test_defaults() {
        let config = VellumConfig::from_str("").unwrap();
        assert_eq!(config, VellumConfig::default());
        assert_eq!(config.views.refresh_interval_seconds, 2);
        assert_eq!(config.refresh_interval_ms(), 2_000);
        assert_eq!(config.views.contracts_dir, "/contracts");
        assert_eq!(config.lifecycle.project_stage, ProjectStage::Production);
        assert_eq!(config.lifecycle.max_view_rebuilds, None);
        assert!(!config.log.verbose);
    }

    #[test]
    fn test_sections() {
        let config = VellumConfig::from_str(
            r#"
            [views]
            refresh_interval_seconds = -1
            short_ids = false
            suffix = ".html"

            [lifecycle]
            project_stage = "development"
            protected_views = ["/admin.xhtml"]
            max_view_rebuilds = 5

            [log]
            verbose = true
            "#,
        )
        .unwrap();

        assert_eq!(config.refresh_interval_ms(), -1);
        assert!(config.lifecycle.project_stage.is_development());
        assert!(config.log.verbose);

        let views = config.view_options();
        assert_eq!(views.refresh_ms, -1);
        assert!(!views.short_ids);
        assert!(views.trim_comments);

        let lifecycle = config.lifecycle_options();
        assert_eq!(lifecycle.protected_views, vec!["/admin.xhtml".to_string()]);
        assert_eq!(lifecycle.max_view_rebuilds, Some(5));
        assert_eq!(lifecycle.suffix, ".html");
    }

    #[test]
    fn test_zero_interval_compiles_every_time() {
        let config = VellumConfig::from_str("[views]\nrefresh_interval_seconds = 0").unwrap();
        assert_eq!(config.refresh_interval_ms(), 0);
    }

    #[test]
    fn test_validation() {
        for bad in [
            "[views]\nsuffix = \"\"",
            "[views]\nsuffix = \"xhtml\"",
            "[views]\ncontracts_dir = \"contracts\"",
            "[lifecycle]\nprotected_views = [\"admin.xhtml\"]",
        ] {
            assert!(
                matches!(VellumConfig::from_str(bad), Err(ConfigError::Validation(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "[views]\nrefresh_interval_seconds = 10\n").unwrap();
        assert_eq!(VellumConfig::from_path(&path).unwrap().refresh_interval_ms(), 10_000);

        let missing = dir.path().join("missing.toml");
        assert!(matches!(VellumConfig::from_path(&missing), Err(ConfigError::Io(..))));
        assert_eq!(VellumConfig::load_or_default(&missing).unwrap(), VellumConfig::default());
    }
}
