use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use serde::Deserialize;

/// File picked up from the working directory when `--config` is not given.
pub const CONFIG_FILE: &str = "benchstate.yaml";

/// Bench-level defaults from `benchstate.yaml`. CLI flags and env vars take
/// precedence over every field.
#[derive(Debug, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BenchConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Run document directory, relative to the config file.
    pub store_dir: Option<PathBuf>,
    /// Plan used by `validate` and `dry-run` when none is passed, relative to
    /// the config file.
    pub plan: Option<PathBuf>,
    /// Queue depth of each run-state subscriber. At least 1.
    pub subscriber_capacity: Option<usize>,
}

impl BenchConfig {
    /// Load the config file at `path`, or `benchstate.yaml` in the working
    /// directory if present. An explicit path that does not exist is an
    /// error; no file at all yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(file) = Self::locate(path)? else {
            return Ok(Self::default());
        };

        let contents = std::fs::read_to_string(&file)
            .with_context(|| format!("Failed to read config file: {}", file.display()))?;
        let mut config = Self::from_yaml_str(&contents)
            .with_context(|| format!("Invalid config file: {}", file.display()))?;

        if let Some(dir) = file.parent() {
            config.resolve_paths(dir);
        }
        Ok(config)
    }

    fn locate(path: Option<&Path>) -> Result<Option<PathBuf>> {
        match path {
            Some(p) if p.is_file() => Ok(Some(p.to_path_buf())),
            Some(p) => anyhow::bail!("Config file not found: {}", p.display()),
            None => {
                let default_path = Path::new(CONFIG_FILE);
                Ok(default_path.is_file().then(|| default_path.to_path_buf()))
            }
        }
    }

    /// Parse and validate config YAML. Paths are left as written.
    pub fn from_yaml_str(source: &str) -> Result<Self> {
        let config: Self = serde_yml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.subscriber_capacity == Some(0) {
            anyhow::bail!("subscriber_capacity must be at least 1");
        }
        if self.port == Some(0) {
            anyhow::bail!("port must be between 1 and 65535");
        }
        if self.host.as_deref().is_some_and(|h| h.trim().is_empty()) {
            anyhow::bail!("host must not be empty");
        }
        Ok(())
    }

    fn resolve_paths(&mut self, dir: &Path) {
        for path in [&mut self.store_dir, &mut self.plan].into_iter().flatten() {
            if path.is_relative() {
                *path = dir.join(&*path);
            }
        }
    }

    /// The plan passed on the command line, else the configured one.
    pub fn plan_path(&self, flag: Option<PathBuf>) -> Result<PathBuf> {
        flag.or_else(|| self.plan.clone())
            .with_context(|| format!("No plan given and none set in {}", CONFIG_FILE))
    }
}
