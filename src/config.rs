use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::common::error::QshellError;
use crate::session::request::ShareMode;

pub const SITE_CONFIG_PATH: &str = "/etc/qshell/config.toml";

/// One configuration layer. All keys optional; unknown keys are
/// ignored so site and user files can carry extra tooling sections.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    cpus: Option<u32>,
    memory_mb: Option<u64>,
    partition: Option<String>,
    /// Boolean-like token, same spellings as the `--shared` flag.
    shared: Option<String>,
    /// Humantime duration, e.g. "8h" or "30m".
    time_limit: Option<String>,
    job_name: Option<String>,
    /// Seconds to wait for the session before giving up.
    startup_timeout: Option<u64>,
}

/// Fully-resolved default resource set: compiled-in values overridden
/// field-by-field by the site file, then by the user file.
#[derive(Debug, Clone)]
pub struct Defaults {
    pub cpus: u32,
    pub memory_mb: u64,
    pub partition: String,
    pub share_mode: ShareMode,
    pub time_limit: Duration,
    pub job_name: String,
    pub startup_timeout: Duration,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            cpus: 1,
            memory_mb: 4096,
            partition: "interactive".to_string(),
            share_mode: ShareMode::Shared,
            time_limit: Duration::from_secs(8 * 3600),
            job_name: "qshell".to_string(),
            startup_timeout: Duration::from_secs(300),
        }
    }
}

impl Defaults {
    pub fn load() -> crate::Result<Defaults> {
        Defaults::load_from(Path::new(SITE_CONFIG_PATH), user_config_path().as_deref())
    }

    /// A missing site file is tolerated with a warning, a missing user
    /// file silently.
    pub fn load_from(site: &Path, user: Option<&Path>) -> crate::Result<Defaults> {
        let mut defaults = Defaults::default();

        match read_layer(site)? {
            Some(layer) => defaults.apply(layer, site)?,
            None => log::warn!("Site configuration {} not found", site.display()),
        }

        if let Some(user) = user {
            if let Some(layer) = read_layer(user)? {
                defaults.apply(layer, user)?;
            }
        }

        Ok(defaults)
    }

    fn apply(&mut self, layer: ConfigFile, origin: &Path) -> crate::Result<()> {
        let context = |message: String| {
            QshellError::UserInput(format!("{}: {message}", origin.display()))
        };

        if let Some(cpus) = layer.cpus {
            if cpus == 0 {
                return Err(context("cpus must be positive".to_string()));
            }
            self.cpus = cpus;
        }
        if let Some(memory_mb) = layer.memory_mb {
            if memory_mb == 0 {
                return Err(context("memory_mb must be positive".to_string()));
            }
            self.memory_mb = memory_mb;
        }
        if let Some(partition) = layer.partition {
            self.partition = partition;
        }
        if let Some(token) = layer.shared {
            self.share_mode = ShareMode::parse(&token).map_err(context)?;
        }
        if let Some(time_limit) = layer.time_limit {
            self.time_limit = humantime::parse_duration(&time_limit)
                .map_err(|e| context(format!("invalid time_limit: {e}")))?;
        }
        if let Some(job_name) = layer.job_name {
            self.job_name = job_name;
        }
        if let Some(seconds) = layer.startup_timeout {
            self.startup_timeout = Duration::from_secs(seconds);
        }
        Ok(())
    }
}

fn read_layer(path: &Path) -> crate::Result<Option<ConfigFile>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(error) => {
            return Err(QshellError::UserInput(format!(
                "Cannot read {}: {error}",
                path.display()
            )));
        }
    };
    let layer = toml::from_str(&content).map_err(|error| {
        QshellError::UserInput(format!("Cannot parse {}: {error}", path.display()))
    })?;
    Ok(Some(layer))
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("qshell").join("config.toml"))
}
