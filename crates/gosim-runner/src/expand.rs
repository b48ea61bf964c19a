//! Turning one input configuration into the concrete configurations to run.
//!
//! The contract is `config, options, repeat, dest_dir -> [config paths]`.
//! [`RepeatExpander`] is built in. [`ScriptExpander`] talks to an external
//! generator over a subprocess protocol: it is called as
//! `<script> <config> <repeat> <dest_dir> [key=value ...]` and prints one
//! generated path per line on stdout.

use crate::process::ExitOutcome;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExpandError {
    #[error("cannot launch expander `{}`", script.display())]
    Launch {
        script: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("expander `{}` exited with status {status}: {stderr}", script.display())]
    Failed {
        script: PathBuf,
        status: ExitOutcome,
        stderr: String,
    },
    #[error("cannot create a directory for generated configs under `{}`", base.display())]
    DestDir {
        base: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no configuration files were produced")]
    Empty,
}

pub trait ConfigExpander {
    fn expand(
        &self,
        config: &Path,
        options: &BTreeMap<String, String>,
        repeat: usize,
        dest_dir: &Path,
    ) -> Result<Vec<PathBuf>, ExpandError>;

    /// Whether generated files need a fresh directory of their own.
    fn needs_dest_dir(&self) -> bool {
        false
    }

    fn describe(&self) -> String;
}

/// Runs the input configuration `repeat` times as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct RepeatExpander;

impl ConfigExpander for RepeatExpander {
    fn expand(
        &self,
        config: &Path,
        _options: &BTreeMap<String, String>,
        repeat: usize,
        _dest_dir: &Path,
    ) -> Result<Vec<PathBuf>, ExpandError> {
        Ok(vec![config.to_path_buf(); repeat])
    }

    fn describe(&self) -> String {
        "repeat".to_string()
    }
}

#[derive(Debug, Clone)]
pub struct ScriptExpander {
    script: PathBuf,
    interpreter: Option<OsString>,
}

impl ScriptExpander {
    /// `.py` scripts go through `python3`; anything else is executed directly.
    pub fn new(script: impl Into<PathBuf>) -> Self {
        let script = script.into();
        let interpreter = match script.extension().and_then(|e| e.to_str()) {
            Some("py") => Some(OsString::from("python3")),
            _ => None,
        };
        Self {
            script,
            interpreter,
        }
    }

    fn command(&self) -> Command {
        match &self.interpreter {
            Some(interpreter) => {
                let mut cmd = Command::new(interpreter);
                cmd.arg(&self.script);
                cmd
            }
            None => Command::new(&self.script),
        }
    }
}

impl ConfigExpander for ScriptExpander {
    fn expand(
        &self,
        config: &Path,
        options: &BTreeMap<String, String>,
        repeat: usize,
        dest_dir: &Path,
    ) -> Result<Vec<PathBuf>, ExpandError> {
        let mut cmd = self.command();
        cmd.arg(config).arg(repeat.to_string()).arg(dest_dir);
        for (key, value) in options {
            cmd.arg(format!("{}={}", key, value));
        }
        let output = cmd
            .stdin(Stdio::null())
            .output()
            .map_err(|source| ExpandError::Launch {
                script: self.script.clone(),
                source,
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr)
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("expander exited without a message")
                .to_string();
            return Err(ExpandError::Failed {
                script: self.script.clone(),
                status: ExitOutcome::from_status(output.status),
                stderr,
            });
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| {
                let path = PathBuf::from(l);
                if path.is_relative() {
                    dest_dir.join(path)
                } else {
                    path
                }
            })
            .collect())
    }

    fn needs_dest_dir(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        self.script.display().to_string()
    }
}
