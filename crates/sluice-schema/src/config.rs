use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = "sluice.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("unsupported config_version: {0}, expected 1")]
    UnsupportedVersion(u32),
    #[error("paths.target must not be empty")]
    EmptyTarget,
    #[error("exclude path '{0}' must be relative to the target directory")]
    AbsoluteExclude(String),
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SluiceConfig {
    pub config_version: u32,
    pub paths: PathsSection,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub exclude: ExcludeSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PathsSection {
    /// The live directory that `apply` writes into.
    pub target: PathBuf,
    /// Parent of per-stage working copies. Defaults to `<store>/staging`.
    #[serde(default)]
    pub staging_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EngineSection {
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Program that `modify` runs inside the working copy.
    #[serde(default = "default_package_manager")]
    pub package_manager: String,
    /// Timeout for `begin` and `stage`, in seconds. `None` waits forever.
    #[serde(default = "default_timeout")]
    pub timeout_secs: Option<u64>,
    #[serde(default = "default_apply_timeout")]
    pub apply_timeout_secs: Option<u64>,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            package_manager: default_package_manager(),
            timeout_secs: default_timeout(),
            apply_timeout_secs: default_apply_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ExcludeSection {
    /// Paths relative to the target that are never copied in either direction.
    #[serde(default)]
    pub paths: Vec<String>,
    /// Exclude version-control directories found under the target.
    #[serde(default = "default_true")]
    pub vcs: bool,
}

impl Default for ExcludeSection {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            vcs: true,
        }
    }
}

fn default_backend() -> String {
    "rsync".to_owned()
}

fn default_package_manager() -> String {
    "composer".to_owned()
}

#[allow(clippy::unnecessary_wraps)]
fn default_timeout() -> Option<u64> {
    Some(300)
}

#[allow(clippy::unnecessary_wraps)]
fn default_apply_timeout() -> Option<u64> {
    Some(600)
}

fn default_true() -> bool {
    true
}

impl SluiceConfig {
    pub fn for_target(target: impl Into<PathBuf>) -> Self {
        Self {
            config_version: 1,
            paths: PathsSection {
                target: target.into(),
                staging_root: None,
            },
            engine: EngineSection::default(),
            exclude: ExcludeSection::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.config_version != 1 {
            return Err(ConfigError::UnsupportedVersion(self.config_version));
        }
        if self.paths.target.as_os_str().is_empty() {
            return Err(ConfigError::EmptyTarget);
        }
        if let Some(abs) = self
            .exclude
            .paths
            .iter()
            .find(|p| Path::new(p.as_str()).is_absolute())
        {
            return Err(ConfigError::AbsoluteExclude(abs.clone()));
        }
        Ok(())
    }

    /// Resolve relative paths against the directory holding the config file.
    #[must_use]
    pub fn resolve_relative_to(mut self, base: &Path) -> Self {
        if self.paths.target.is_relative() {
            self.paths.target = base.join(&self.paths.target);
        }
        if let Some(root) = self.paths.staging_root.take() {
            self.paths.staging_root = Some(if root.is_relative() {
                base.join(root)
            } else {
                root
            });
        }
        self
    }
}

pub fn parse_config_str(input: &str) -> Result<SluiceConfig, ConfigError> {
    let config: SluiceConfig = toml::from_str(input)?;
    config.validate()?;
    Ok(config)
}

pub fn parse_config_file(path: impl AsRef<Path>) -> Result<SluiceConfig, ConfigError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    let config = parse_config_str(&content)?;
    let base = path.parent().unwrap_or(Path::new("."));
    Ok(config.resolve_relative_to(base))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let config = parse_config_str(
            r#"
config_version = 1
[paths]
target = "/srv/app"
staging_root = "/var/tmp/sluice"
[engine]
backend = "mock"
package_manager = "/opt/bin/composer"
timeout_secs = 30
[exclude]
paths = ["config/local.php", "files"]
vcs = false
"#,
        )
        .unwrap();
        assert_eq!(config.paths.target, PathBuf::from("/srv/app"));
        assert_eq!(
            config.paths.staging_root,
            Some(PathBuf::from("/var/tmp/sluice"))
        );
        assert_eq!(config.engine.backend, "mock");
        assert_eq!(config.engine.package_manager, "/opt/bin/composer");
        assert_eq!(config.engine.timeout_secs, Some(30));
        assert_eq!(config.engine.apply_timeout_secs, Some(600));
        assert_eq!(config.exclude.paths.len(), 2);
        assert!(!config.exclude.vcs);
    }

    #[test]
    fn defaults_apply() {
        let config = parse_config_str(
            r#"
config_version = 1
[paths]
target = "/srv/app"
"#,
        )
        .unwrap();
        assert_eq!(config.engine.backend, "rsync");
        assert_eq!(config.engine.package_manager, "composer");
        assert_eq!(config.engine.timeout_secs, Some(300));
        assert!(config.exclude.vcs);
        assert!(config.paths.staging_root.is_none());
    }

    #[test]
    fn rejects_unknown_version() {
        let err = parse_config_str(
            r#"
config_version = 2
[paths]
target = "/srv/app"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedVersion(2)));
    }

    #[test]
    fn rejects_unknown_fields() {
        let err = parse_config_str(
            r#"
config_version = 1
[paths]
target = "/srv/app"
typo = true
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::ParseToml(_)));
    }

    #[test]
    fn rejects_empty_target_and_absolute_excludes() {
        let mut config = SluiceConfig::for_target("");
        assert!(matches!(config.validate(), Err(ConfigError::EmptyTarget)));
        config.paths.target = PathBuf::from("/srv/app");
        config.exclude.paths.push("/etc/passwd".to_owned());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::AbsoluteExclude(_))
        ));
    }

    #[test]
    fn relative_paths_resolve_against_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(
            &path,
            r#"
config_version = 1
[paths]
target = "app"
staging_root = "scratch"
"#,
        )
        .unwrap();
        let config = parse_config_file(&path).unwrap();
        assert_eq!(config.paths.target, dir.path().join("app"));
        assert_eq!(config.paths.staging_root, Some(dir.path().join("scratch")));
    }
}
