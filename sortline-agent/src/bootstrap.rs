//! Startup configuration: file, then environment, then command line

use sortline_core::config::SortlineConfig;
use sortline_core::error::ConfigError;
use tracing::info;

/// Command-line values that win over file and environment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    pub url: Option<String>,
    pub log_level: Option<String>,
    pub reconnect_delay_ms: Option<u64>,
}

impl Overrides {
    fn apply(&self, config: &mut SortlineConfig) {
        if let Some(url) = &self.url {
            config.link.url = url.clone();
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(delay) = self.reconnect_delay_ms {
            config.link.reconnect_delay_ms = delay;
        }
    }
}

/// Build the effective configuration and validate it
pub fn resolve_config<F>(
    path: Option<&str>,
    overrides: &Overrides,
    env: F,
) -> Result<SortlineConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match path {
        Some(path) => {
            info!("Loading configuration from {}", path);
            SortlineConfig::from_file(path)?
        }
        None => SortlineConfig::default(),
    };

    config.apply_overrides(env)?;
    overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}
