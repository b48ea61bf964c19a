use crate::error::SetupError;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Env var naming a settings file when `--settings` is not given.
pub const SETTINGS_ENV: &str = "GOSIM_SETTINGS";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunnerSettings {
    /// Name the configuration is copied to inside each working directory.
    pub config_name: String,
    pub record_name: String,
    pub stdout_name: String,
    pub stderr_name: String,
    /// Arguments passed to the executable; `-` tells it to read its default config.
    pub default_args: Vec<String>,
    pub default_name: String,
    /// Presence of any of these marks a managed cluster job.
    pub cluster_job_vars: Vec<String>,
    pub scratch_roots: Vec<PathBuf>,
    pub dir_mode: u32,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        let mut scratch_roots = Vec::new();
        if let Ok(user) = std::env::var("USER") {
            if !user.is_empty() {
                scratch_roots.push(Path::new("/scratch").join(user));
            }
        }
        scratch_roots.push(PathBuf::from("/scratch"));
        Self {
            config_name: "config.cym".to_string(),
            record_name: "log.txt".to_string(),
            stdout_name: "out.txt".to_string(),
            stderr_name: "err.txt".to_string(),
            default_args: vec!["-".to_string()],
            default_name: "run0000".to_string(),
            cluster_job_vars: vec!["SLURM_JOB_ID".to_string(), "LSB_JOBID".to_string()],
            scratch_roots,
            dir_mode: 0o770,
        }
    }
}

impl RunnerSettings {
    pub fn load(path: &Path) -> Result<Self, SetupError> {
        let raw = fs::read_to_string(path).map_err(|e| SetupError::Settings {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_yaml(&raw).map_err(|reason| SetupError::Settings {
            path: path.to_path_buf(),
            reason,
        })
    }

    pub fn from_yaml(raw: &str) -> Result<Self, String> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw).map_err(|e| e.to_string())
    }

    /// Explicit path first, then `GOSIM_SETTINGS`, then built-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, SetupError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match std::env::var_os(SETTINGS_ENV) {
            Some(path) if !path.is_empty() => Self::load(Path::new(&path)),
            _ => Ok(Self::default()),
        }
    }
}
