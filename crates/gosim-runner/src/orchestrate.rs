use crate::context::{ExecutionContext, Identity};
use crate::error::{RunError, SetupError};
use crate::process::{ExitOutcome, ProcessRunner};
use crate::record::RunRecorder;
use crate::settings::RunnerSettings;
use gosim_core::{allocate_numbered, allocate_scratch};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Steps of a single run, in order. Any step may end in failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Allocating,
    ConfiguringInputs,
    RecordingStart,
    Executing,
    RecordingEnd,
    Done,
}

impl RunPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            RunPhase::Allocating => "allocating",
            RunPhase::ConfiguringInputs => "configuring_inputs",
            RunPhase::RecordingStart => "recording_start",
            RunPhase::Executing => "executing",
            RunPhase::RecordingEnd => "recording_end",
            RunPhase::Done => "done",
        }
    }
}

/// One run request. Paths are absolute once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    pub executable: PathBuf,
    pub base_dir: PathBuf,
    pub config: PathBuf,
    pub name_hint: String,
    pub args: Vec<String>,
}

impl RunSpec {
    pub fn new(
        executable: &Path,
        base_dir: &Path,
        config: &Path,
        name_hint: impl Into<String>,
    ) -> Result<Self, SetupError> {
        let executable = check_executable(executable)?;
        let base_dir = check_base_dir(base_dir)?;
        let config = check_config(config)?;
        Ok(Self {
            executable,
            base_dir,
            config,
            name_hint: name_hint.into(),
            args: vec!["-".to_string()],
        })
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Same executable and base for a generated configuration. The new config
    /// is checked when it is staged, so a bad one fails only its own run.
    pub fn for_config(&self, config: &Path, name_hint: &str) -> Self {
        Self {
            executable: self.executable.clone(),
            base_dir: self.base_dir.clone(),
            config: absolute(config),
            name_hint: name_hint.to_string(),
            args: self.args.clone(),
        }
    }
}

pub fn is_executable(path: &Path) -> bool {
    let Ok(meta) = fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

pub fn check_executable(path: &Path) -> Result<PathBuf, SetupError> {
    if !path.is_file() {
        return Err(SetupError::MissingExecutable(path.to_path_buf()));
    }
    if !is_executable(path) {
        return Err(SetupError::NotExecutable(path.to_path_buf()));
    }
    Ok(absolute(path))
}

pub fn check_base_dir(path: &Path) -> Result<PathBuf, SetupError> {
    if !path.is_dir() {
        return Err(SetupError::MissingBaseDir(path.to_path_buf()));
    }
    Ok(absolute(path))
}

pub fn check_config(path: &Path) -> Result<PathBuf, SetupError> {
    if !path.is_file() || fs::File::open(path).is_err() {
        return Err(SetupError::MissingConfig(path.to_path_buf()));
    }
    Ok(absolute(path))
}

pub fn check_park(path: &Path) -> Result<PathBuf, SetupError> {
    if !path.is_dir() {
        return Err(SetupError::InvalidPark(path.to_path_buf()));
    }
    Ok(absolute(path))
}

pub(crate) fn absolute(path: &Path) -> PathBuf {
    path.canonicalize()
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedRun {
    pub working_dir: PathBuf,
    pub status: ExitOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachedRun {
    pub working_dir: PathBuf,
    pub pid: u32,
}

/// Drives one run from allocation to the completion record.
///
/// The executable gets its working directory through `Command::current_dir`,
/// so the controller's own cwd never changes and needs no restoring.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    settings: RunnerSettings,
    context: ExecutionContext,
    identity: Identity,
    recorder: RunRecorder,
    runner: ProcessRunner,
}

impl Orchestrator {
    pub fn new(settings: RunnerSettings, context: ExecutionContext, identity: Identity) -> Self {
        let recorder = RunRecorder::new(settings.record_name.clone(), identity.clone());
        let runner = ProcessRunner::new(settings.stdout_name.clone(), settings.stderr_name.clone());
        Self {
            settings,
            context,
            identity,
            recorder,
            runner,
        }
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    pub fn recorder(&self) -> &RunRecorder {
        &self.recorder
    }

    /// Runs synchronously and returns once the completion block is written.
    pub fn run(&self, spec: &RunSpec) -> Result<CompletedRun, RunError> {
        let working_dir = self.prepare(spec)?;

        self.enter(RunPhase::RecordingStart, &working_dir);
        self.recorder.record_start(
            &working_dir,
            &spec.executable,
            &spec.args,
            &spec.config,
            std::process::id(),
        );

        self.enter(RunPhase::Executing, &working_dir);
        let status = self
            .runner
            .run_sync(&spec.executable, &spec.args, &working_dir)
            .map_err(|source| RunError::Launch {
                executable: spec.executable.clone(),
                working_dir: working_dir.clone(),
                source,
            })?;

        self.enter(RunPhase::RecordingEnd, &working_dir);
        self.recorder.record_end(&working_dir, &status);

        self.enter(RunPhase::Done, &working_dir);
        info!(
            config = %spec.config.display(),
            working_dir = %working_dir.display(),
            status = %status,
            "run completed"
        );
        Ok(CompletedRun {
            working_dir,
            status,
        })
    }

    /// Starts the run and returns at once. Only the start block is written;
    /// its pid is the child's.
    ///
    /// Unlike [`Orchestrator::run`], the start block is written after the
    /// spawn, since the child's pid is not known before it.
    pub fn start(&self, spec: &RunSpec) -> Result<DetachedRun, RunError> {
        let working_dir = self.prepare(spec)?;

        self.enter(RunPhase::Executing, &working_dir);
        let pid = self
            .runner
            .run_detached(&spec.executable, &spec.args, &working_dir)
            .map_err(|source| RunError::Launch {
                executable: spec.executable.clone(),
                working_dir: working_dir.clone(),
                source,
            })?;

        self.enter(RunPhase::RecordingStart, &working_dir);
        self.recorder
            .record_start(&working_dir, &spec.executable, &spec.args, &spec.config, pid);
        info!(working_dir = %working_dir.display(), pid, "run detached");
        Ok(DetachedRun { working_dir, pid })
    }

    fn prepare(&self, spec: &RunSpec) -> Result<PathBuf, RunError> {
        debug!(phase = RunPhase::Allocating.as_str(), config = %spec.config.display());
        let working_dir = self.allocate(spec)?;
        self.enter(RunPhase::ConfiguringInputs, &working_dir);
        fs::copy(&spec.config, working_dir.join(&self.settings.config_name)).map_err(
            |source| RunError::Stage {
                config: spec.config.clone(),
                working_dir: working_dir.clone(),
                source,
            },
        )?;
        Ok(working_dir)
    }

    fn allocate(&self, spec: &RunSpec) -> Result<PathBuf, RunError> {
        let allocated = match &self.context {
            ExecutionContext::ClusterManaged { .. } => {
                let user = if self.identity.user == "unknown" {
                    "run"
                } else {
                    self.identity.user.as_str()
                };
                allocate_scratch(
                    &format!("{}-", user),
                    &self.settings.scratch_roots,
                    &spec.base_dir,
                )
            }
            ExecutionContext::Local => allocate_numbered(&spec.base_dir.join(&spec.name_hint), 0),
        };
        let working_dir = allocated.map_err(|source| RunError::Allocate {
            config: spec.config.clone(),
            source,
        })?;
        self.apply_dir_mode(&working_dir);
        Ok(working_dir)
    }

    #[cfg(unix)]
    fn apply_dir_mode(&self, dir: &Path) {
        use std::os::unix::fs::PermissionsExt;
        let perms = fs::Permissions::from_mode(self.settings.dir_mode);
        if let Err(err) = fs::set_permissions(dir, perms) {
            warn!(dir = %dir.display(), error = %err, "could not set directory mode");
        }
    }

    #[cfg(not(unix))]
    fn apply_dir_mode(&self, _dir: &Path) {}

    fn enter(&self, phase: RunPhase, working_dir: &Path) {
        debug!(phase = phase.as_str(), working_dir = %working_dir.display());
    }
}
