use anyhow::{Context, Result};
use pursuit_env::EnvConfig;
use pursuit_ipc::{default_shm_dir, IpcError, ResourceNames};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_CONFIG_PATH: &str = "config/pursuit.toml";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Prefix shared with the client for every resource name.
    pub prefix: String,
    /// Directory holding the resources. Defaults to `/dev/shm` when present.
    pub shm_dir: Option<PathBuf>,
    /// Tracing filter used when `RUST_LOG` is unset.
    pub log_filter: String,
    pub env: EnvConfig,
    pub headless: HeadlessConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            prefix: "pursuit-".to_owned(),
            shm_dir: None,
            log_filter: "info".to_owned(),
            env: EnvConfig::default(),
            headless: HeadlessConfig::default(),
        }
    }
}

/// Settings of the synthetic road simulation.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HeadlessConfig {
    pub width: u32,
    pub height: u32,
    pub seed: u64,
    /// Expected crashes per second of steering.
    pub crash_rate: f64,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            width: 160,
            height: 120,
            seed: 0x5EED,
            crash_rate: 0.25,
        }
    }
}

impl ServerConfig {
    /// Load from `path`, or from the default path when none is given.
    ///
    /// A missing default file yields the defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(path) => (path, true),
            None => (Path::new(DEFAULT_CONFIG_PATH), false),
        };
        match fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents)
                .with_context(|| format!("failed to parse {}", path.display())),
            Err(err) if !explicit && err.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            Err(err) => {
                Err(err).with_context(|| format!("failed to read {}", path.display()))
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.env.validate()?;
        Ok(config)
    }

    pub fn resource_names(&self) -> Result<ResourceNames, IpcError> {
        let dir = self.shm_dir.clone().unwrap_or_else(default_shm_dir);
        ResourceNames::new(&self.prefix, dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        assert_eq!(ServerConfig::parse("").unwrap(), ServerConfig::default());
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = ServerConfig::parse(
            r#"
            prefix = "hp-"

            [env]
            frameskip = 4
            real_time = true

            [headless]
            width = 32
            "#,
        )
        .unwrap();

        assert_eq!(config.prefix, "hp-");
        assert_eq!(config.env.frameskip, 4);
        assert!(config.env.real_time);
        assert_eq!(config.env.fps, 60.0);
        assert_eq!(config.headless.width, 32);
        assert_eq!(config.headless.height, 120);
    }

    #[test]
    fn invalid_env_values_are_rejected() {
        assert!(ServerConfig::parse("[env]\nframeskip = 0\n").is_err());
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ServerConfig::load(Some(&dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn explicit_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        fs::write(&path, "log_filter = \"debug\"\n").unwrap();
        assert_eq!(
            ServerConfig::load(Some(&path)).unwrap().log_filter,
            "debug"
        );
    }

    #[test]
    fn resource_names_use_the_configured_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            shm_dir: Some(dir.path().to_path_buf()),
            ..ServerConfig::default()
        };
        let names = config.resource_names().unwrap();
        assert_eq!(names.dir(), dir.path());
        assert_eq!(names.prefix(), "pursuit-");
    }
}
