use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};
use strum::{Display, EnumString, IntoStaticStr};

/// Environment variable naming a config file, used when `--config` is absent
pub const CONFIG_ENV: &str = "DEVSHELL_CONFIG";

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Runtime {
    #[default]
    Docker,
    Podman,
}

impl Runtime {
    pub fn binary(self) -> &'static str {
        self.into()
    }
}

/// host path -> container path
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Mount {
    pub host: PathBuf,
    pub container: PathBuf,
}

impl Mount {
    pub fn new(host: impl Into<PathBuf>, container: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
        }
    }

    /// Same path on both sides
    pub fn identity(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            host: path.clone(),
            container: path,
        }
    }

    /// Relative host paths are taken from `cwd`
    pub fn resolve(&self, cwd: &Path) -> Self {
        Self {
            host: cwd.join(&self.host),
            container: self.container.clone(),
        }
    }

    /// `host:container`, as `-v` and `--container-mounts` want it
    pub fn spec(&self) -> String {
        format!("{}:{}", self.host.display(), self.container.display())
    }
}

/// Cluster job settings
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobConfig {
    /// squashfs export of the image, relative to the working directory
    pub squash_image: PathBuf,
    /// mounted before the project directory
    pub container_mounts: Vec<Mount>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            squash_image: PathBuf::from("kylevedder_offline_sceneflow_latest.sqsh"),
            container_mounts: vec![Mount::new("../../datasets/", "/efs/")],
        }
    }
}

/// Everything that goes into a launch. Defaults are the workstation setup.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub runtime: Runtime,
    pub image: String,
    pub gpus: String,
    pub shm_size: String,
    /// where the working directory shows up
    pub project_target: PathBuf,
    pub data_mounts: Vec<Mount>,
    pub x11_socket: PathBuf,
    pub history: Mount,
    pub forward_env: Vec<String>,
    pub privileged: bool,
    /// run `xhost +` first
    pub grant_display_access: bool,
    /// empty means the image's own entrypoint
    pub command: Vec<String>,
    pub job: JobConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            runtime: Runtime::Docker,
            image: String::from("kylevedder/offline_sceneflow:latest"),
            gpus: String::from("all"),
            shm_size: String::from("16gb"),
            project_target: PathBuf::from("/project"),
            data_mounts: ["/efs", "/efs2", "/bigdata", "/Datasets"]
                .into_iter()
                .map(Mount::identity)
                .collect(),
            x11_socket: PathBuf::from("/tmp/.X11-unix"),
            history: Mount::new("docker_history.txt", "/root/.bash_history"),
            forward_env: vec![String::from("DISPLAY")],
            privileged: true,
            grant_display_access: true,
            command: Vec::new(),
            job: JobConfig::default(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("reading {}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid shm size {0:?}")]
    ShmSize(String),
    #[error("invalid environment variable name {0:?}")]
    EnvName(String),
    #[error("container path is not absolute: {}", .0.display())]
    RelativeContainerPath(PathBuf),
    #[error("empty image reference")]
    EmptyImage,
}

impl Config {
    /// Defaults, overridden by `path` when given
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        lazy_static! {
            // docker accepts a number with an optional b/k/m/g unit
            static ref SHM: Regex = Regex::new(r"(?i)^[0-9]+([bkmg]b?)?$").unwrap();
            static ref ENV_NAME: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
        }

        if self.image.trim().is_empty() {
            return Err(ConfigError::EmptyImage);
        }

        if !SHM.is_match(&self.shm_size) {
            return Err(ConfigError::ShmSize(self.shm_size.clone()));
        }

        if let Some(name) = self.forward_env.iter().find(|n| !ENV_NAME.is_match(n)) {
            return Err(ConfigError::EnvName(name.clone()));
        }

        let targets = std::iter::once(&self.project_target)
            .chain(self.data_mounts.iter().map(|m| &m.container))
            .chain(std::iter::once(&self.x11_socket))
            .chain(std::iter::once(&self.history.container))
            .chain(self.job.container_mounts.iter().map(|m| &m.container));

        for target in targets {
            if !target.is_absolute() {
                return Err(ConfigError::RelativeContainerPath(target.clone()));
            }
        }

        Ok(())
    }
}
