use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::schema::{ConfigWarning, SimConfig};

/// Loads the simulation configuration.
///
/// Loading happens before logging is set up, so the loader collects what it
/// would have logged and [`ConfigLoader::report`] emits it afterwards.
pub struct ConfigLoader {
    config: SimConfig,
    config_path: PathBuf,
    found: bool,
    warnings: Vec<ConfigWarning>,
}

impl ConfigLoader {
    pub const FILE_NAME: &'static str = "simulacra.toml";

    /// Resolve the config path: explicit path > SIMULACRA_CONFIG env > ~/.simulacra/simulacra.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("SIMULACRA_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".simulacra")
            .join(Self::FILE_NAME)
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> sim_core::Result<Self> {
        let config_path = Self::resolve_path(path);
        let found = config_path.exists();
        let config = if found {
            let raw = std::fs::read_to_string(&config_path)?;
            Self::parse(&raw).map_err(|e| {
                sim_core::SimError::Config(format!("failed to parse {}: {}", config_path.display(), e))
            })?
        } else {
            SimConfig::default()
        };

        let config = Self::apply_env_overrides(config);
        let warnings = config.validate().map_err(sim_core::SimError::Config)?;

        Ok(Self {
            config,
            config_path,
            found,
            warnings,
        })
    }

    /// Log where the config came from and every validation warning.
    pub fn report(&self) {
        if self.found {
            info!(config_path = ?self.config_path, "loaded configuration");
        } else {
            warn!(config_path = ?self.config_path, "config file not found, using defaults");
        }
        for w in &self.warnings {
            warn!("{}", w);
        }
    }

    /// Whether the config was read from a file rather than defaulted.
    pub fn found(&self) -> bool {
        self.found
    }

    /// Non-fatal validation findings.
    pub fn warnings(&self) -> &[ConfigWarning] {
        &self.warnings
    }

    /// Parse a TOML document without touching the environment.
    pub fn parse(raw: &str) -> Result<SimConfig, toml::de::Error> {
        toml::from_str::<SimConfig>(raw)
    }

    /// Get a copy of the loaded config.
    pub fn get(&self) -> SimConfig {
        self.config.clone()
    }

    /// Path the config was (or would have been) read from.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Write the default configuration to `path`. Refuses to overwrite unless `force`.
    pub fn write_default(path: &Path, force: bool) -> sim_core::Result<()> {
        if path.exists() && !force {
            return Err(sim_core::SimError::Config(format!(
                "{} already exists (use --force to overwrite)",
                path.display()
            )));
        }
        let raw = toml::to_string_pretty(&SimConfig::default())
            .map_err(|e| sim_core::SimError::Config(format!("failed to render config: {e}")))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, raw)?;
        info!(path = %path.display(), "wrote default configuration");
        Ok(())
    }

    /// Apply env var overrides (SIMULACRA_TICK_PERIOD_MS, SIMULACRA_LOG_LEVEL, etc.)
    fn apply_env_overrides(mut config: SimConfig) -> SimConfig {
        if let Ok(v) = std::env::var("SIMULACRA_TICK_PERIOD_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                config.scheduler.tick_period_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("SIMULACRA_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Ok(v) = std::env::var("SIMULACRA_CHAT_MODEL") {
            config.services.chat_model = v;
        }
        // Config file takes priority, env is the fallback.
        if config.services.api_key.is_none() {
            if let Ok(v) = std::env::var("OPENAI_API_KEY") {
                config.services.api_key = Some(v);
            }
        }
        config
    }
}
